use crate::state::GenerationRecord;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Name the log is exported under.
pub const EXPORT_FILE_NAME: &str = "stories.csv";
pub const EXPORT_MIME_TYPE: &str = "text/csv";

pub const HEADER: [&str; 7] = ["Date", "Title", "Main Character", "Genre", "Tone", "Chapter", "Story"];

#[derive(Debug, Error)]
pub enum StoryLogError {
    #[error("story log not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("I/O error on story log {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("story log {} is unreadable: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("story log {} has unexpected columns: {found:?}", .path.display())]
    HeaderMismatch { path: PathBuf, found: Vec<String> },
    #[error("could not encode story record: {0}")]
    Encode(#[source] csv::Error),
}

/// Append-only CSV file of generated chapters.
///
/// A missing file reads as an empty log. Appends never rewrite existing rows,
/// and are serialized within the process. A row left incomplete by an
/// interrupted write is ignored when reading and cut off by the next append.
pub struct StoryLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

/// File contents plus the length of the part made of whole rows.
struct Intact {
    bytes: Vec<u8>,
    len: usize,
    /// The last row is whole but the file does not end with a newline.
    needs_newline: bool,
}

impl Intact {
    fn rows(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl StoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn append(&self, record: &GenerationRecord) -> Result<(), StoryLogError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        match self.read_intact()? {
            Some(intact) if !intact.bytes.is_empty() => {
                self.check_header(intact.rows())?;
                self.append_row(&intact, record)
            }
            _ => self.create_with(record),
        }
    }

    pub fn load_all(&self) -> Result<Vec<GenerationRecord>, StoryLogError> {
        let intact = match self.read_intact()? {
            Some(intact) => intact,
            None => return Ok(Vec::new()),
        };

        let mut reader = csv::Reader::from_reader(intact.rows());
        reader
            .deserialize()
            .collect::<Result<Vec<GenerationRecord>, _>>()
            .map_err(|e| self.corrupt(e))
    }

    /// The file contents as stored, for download.
    pub fn export(&self) -> Result<Vec<u8>, StoryLogError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoryLogError::NotFound(self.path.clone()))
            }
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Writes the exported bytes to `dir/stories.csv` and returns that path.
    pub fn export_to(&self, dir: &Path) -> Result<PathBuf, StoryLogError> {
        let bytes = self.export()?;
        let dest = dir.join(EXPORT_FILE_NAME);
        fs::create_dir_all(dir).map_err(|source| StoryLogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        fs::write(&dest, bytes).map_err(|source| StoryLogError::Io {
            path: dest.clone(),
            source,
        })?;
        Ok(dest)
    }

    fn read_intact(&self) -> Result<Option<Intact>, StoryLogError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let (complete, quoted) = scan_rows(&bytes);
        let tail = &bytes[complete..];
        let (len, needs_newline) = if tail.is_empty() {
            (complete, false)
        } else if !quoted && is_whole_row(tail) {
            (bytes.len(), true)
        } else {
            log::warn!(
                "Ignoring {} bytes of an incomplete row at the end of {}",
                tail.len(),
                self.path.display()
            );
            (complete, false)
        };

        Ok(Some(Intact {
            bytes,
            len,
            needs_newline,
        }))
    }

    /// First write goes to a sibling temp file that is renamed into place,
    /// so a crash never leaves a log without its header.
    fn create_with(&self, record: &GenerationRecord) -> Result<(), StoryLogError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let mut content = Vec::new();
        {
            let mut writer = csv::Writer::from_writer(&mut content);
            writer.serialize(record).map_err(StoryLogError::Encode)?;
            writer.flush().map_err(|e| self.io_error(e))?;
        }

        let tmp = self.path.with_extension("csv.tmp");
        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(&content)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|_| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(self.io_error(e));
        }
        Ok(())
    }

    fn append_row(&self, intact: &Intact, record: &GenerationRecord) -> Result<(), StoryLogError> {
        let mut row = Vec::new();
        if intact.needs_newline {
            row.push(b'\n');
        }
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut row);
            writer.serialize(record).map_err(StoryLogError::Encode)?;
            writer.flush().map_err(|e| self.io_error(e))?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        write_at(&mut file, intact.len as u64, &row).map_err(|e| self.io_error(e))
    }

    fn check_header(&self, rows: &[u8]) -> Result<(), StoryLogError> {
        let mut reader = csv::Reader::from_reader(rows);
        let headers = reader.headers().map_err(|e| self.corrupt(e))?;
        if headers.iter().ne(HEADER.iter().copied()) {
            return Err(StoryLogError::HeaderMismatch {
                path: self.path.clone(),
                found: headers.iter().map(str::to_string).collect(),
            });
        }
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> StoryLogError {
        StoryLogError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn corrupt(&self, source: csv::Error) -> StoryLogError {
        StoryLogError::Corrupt {
            path: self.path.clone(),
            source,
        }
    }
}

/// Length of the leading run of whole rows, i.e. up to the last newline
/// outside a quoted field, and whether the input ends inside quotes.
/// Escaped quotes are doubled, so toggling on every `"` tracks the state.
fn scan_rows(bytes: &[u8]) -> (usize, bool) {
    let mut quoted = false;
    let mut end = 0;
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'"' => quoted = !quoted,
            b'\n' if !quoted => end = i + 1,
            _ => {}
        }
    }
    (end, quoted)
}

/// A trailing row without its newline still counts if it has every column.
fn is_whole_row(tail: &[u8]) -> bool {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(tail);
    let mut record = csv::ByteRecord::new();
    matches!(reader.read_byte_record(&mut record), Ok(true)) && record.len() == HEADER.len()
}

/// Writes `row` at `offset`, dropping whatever followed it. On failure the
/// file is cut back to `offset` so no half-written row is left behind.
fn write_at(file: &mut File, offset: u64, row: &[u8]) -> io::Result<()> {
    let result = file
        .set_len(offset)
        .and_then(|_| file.seek(SeekFrom::Start(offset)))
        .and_then(|_| file.write_all(row))
        .and_then(|_| file.sync_data());
    if result.is_err() {
        let _ = file.set_len(offset);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Genre, Tone};
    use tempfile::TempDir;

    fn record(title: &str, chapter: Option<u32>, text: &str) -> GenerationRecord {
        GenerationRecord {
            timestamp: "2024-05-01 10:30:00".to_string(),
            title: title.to_string(),
            character: "Aria".to_string(),
            genre: Genre::SciFi,
            tone: Tone::Epic,
            chapter,
            text: text.to_string(),
        }
    }

    fn log_in(dir: &TempDir) -> StoryLog {
        StoryLog::new(dir.path().join("stories.csv"))
    }

    #[test]
    fn test_missing_file_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        assert!(!log.exists());
        assert!(log.load_all().unwrap().is_empty());
        assert!(matches!(log.export(), Err(StoryLogError::NotFound(_))));
    }

    #[test]
    fn test_first_append_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        log.append(&record("The Lost Kingdom", None, "Once upon a time.")).unwrap();

        let content = String::from_utf8(log.export().unwrap()).unwrap();
        let first_line = content.lines().next().unwrap();
        assert_eq!(first_line, "Date,Title,Main Character,Genre,Tone,Chapter,Story");
        assert!(content.contains(",Sci-Fi,Epic,,"));
        assert!(!dir.path().join("stories.csv.tmp").exists());
    }

    #[test]
    fn test_round_trip_preserves_awkward_text() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let tricky = record(
            "Commas, \"quotes\"",
            Some(2),
            "Line one, with comma.\n\n\"Run!\" she said.\n  indented line  ",
        );

        log.append(&record("First", None, "plain")).unwrap();
        let mut expected = log.load_all().unwrap();
        log.append(&tricky).unwrap();
        expected.push(tricky);

        assert_eq!(log.load_all().unwrap(), expected);
    }

    #[test]
    fn test_repeated_appends_each_add_a_row() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let same = record("Again", None, "same story");

        for _ in 0..3 {
            log.append(&same).unwrap();
        }

        let records = log.load_all().unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r == &same));

        let bytes = log.export().unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        assert_eq!(reader.records().count(), 3);
    }

    #[test]
    fn test_header_mismatch_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        fs::write(log.path(), "name,score\nbob,3\n").unwrap();

        let err = log.append(&record("X", None, "y")).unwrap_err();

        assert!(matches!(err, StoryLogError::HeaderMismatch { .. }));
        assert_eq!(fs::read_to_string(log.path()).unwrap(), "name,score\nbob,3\n");
    }

    #[test]
    fn test_incomplete_row_is_replaced_by_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.append(&record("X", None, "y")).unwrap();
        let clean = fs::read_to_string(log.path()).unwrap();
        fs::write(log.path(), format!("{}2024-05-01 10:31:00,Half", clean)).unwrap();

        assert_eq!(log.load_all().unwrap().len(), 1);
        log.append(&record("Z", None, "w")).unwrap();

        let titles: Vec<String> = log.load_all().unwrap().into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["X".to_string(), "Z".to_string()]);
        assert!(!fs::read_to_string(log.path()).unwrap().contains("Half"));
    }

    #[test]
    fn test_row_cut_inside_quoted_story_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.append(&record("first", None, "one")).unwrap();

        let mut torn = Vec::new();
        {
            let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(&mut torn);
            writer.serialize(record("second", None, "para one\npara two")).unwrap();
            writer.flush().unwrap();
        }
        let cut = torn.iter().position(|b| *b == b'\n').unwrap() + 1;
        let mut content = fs::read(log.path()).unwrap();
        content.extend_from_slice(&torn[..cut]);
        fs::write(log.path(), &content).unwrap();

        log.append(&record("third", None, "three")).unwrap();

        let records = log.load_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "first");
        assert_eq!(records[1].title, "third");
        assert_eq!(records[1].text, "three");
    }

    #[test]
    fn test_last_row_without_newline_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        fs::write(
            log.path(),
            "Date,Title,Main Character,Genre,Tone,Chapter,Story\n2024-05-01 10:30:00,Edited,Aria,Horror,Dark,,by hand",
        )
        .unwrap();

        assert_eq!(log.load_all().unwrap().len(), 1);
        log.append(&record("Next", None, "z")).unwrap();

        let titles: Vec<String> = log.load_all().unwrap().into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["Edited".to_string(), "Next".to_string()]);
    }

    #[test]
    fn test_failed_write_leaves_rows_intact() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.append(&record("X", None, "y")).unwrap();
        let before = fs::read(log.path()).unwrap();

        let mut read_only = File::open(log.path()).unwrap();
        let result = write_at(&mut read_only, before.len() as u64, b"half,a,row");

        assert!(result.is_err());
        assert_eq!(fs::read(log.path()).unwrap(), before);
        assert_eq!(log.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_zero_byte_file_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        fs::write(log.path(), "").unwrap();

        assert!(log.exists());
        assert!(log.load_all().unwrap().is_empty());

        log.append(&record("X", None, "y")).unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        assert!(content.starts_with("Date,Title,Main Character,Genre,Tone,Chapter,Story\n"));
        assert_eq!(log.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_scan_rows_respects_quotes() {
        assert_eq!(scan_rows(b"a,b\n\"x\ny\"\n"), (10, false));
        assert_eq!(scan_rows(b"a,b\n\"x\ny"), (4, true));
        assert_eq!(scan_rows(b"a,\"say \"\"hi\"\"\"\n"), (15, false));
    }

    #[test]
    fn test_unreadable_rows_differ_from_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        fs::write(
            log.path(),
            "Date,Title,Main Character,Genre,Tone,Chapter,Story\n2024,T,A,Western,Epic,,s\n",
        )
        .unwrap();

        assert!(matches!(log.load_all(), Err(StoryLogError::Corrupt { .. })));
    }

    #[test]
    fn test_export_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.append(&record("X", Some(1), "y")).unwrap();

        let out = dir.path().join("downloads");
        let dest = log.export_to(&out).unwrap();

        assert_eq!(dest, out.join(EXPORT_FILE_NAME));
        assert_eq!(fs::read(&dest).unwrap(), log.export().unwrap());
    }

    #[test]
    fn test_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log = StoryLog::new(dir.path().join("nested").join("log.csv"));

        log.append(&record("X", None, "y")).unwrap();

        assert_eq!(log.load_all().unwrap().len(), 1);
    }
}
