use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Genre {
    Fantasy,
    #[serde(rename = "Sci-Fi")]
    SciFi,
    Horror,
    Romance,
    Adventure,
    Mystery,
}

impl Genre {
    pub const ALL: [Genre; 6] = [
        Genre::Fantasy,
        Genre::SciFi,
        Genre::Horror,
        Genre::Romance,
        Genre::Adventure,
        Genre::Mystery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Fantasy => "Fantasy",
            Genre::SciFi => "Sci-Fi",
            Genre::Horror => "Horror",
            Genre::Romance => "Romance",
            Genre::Adventure => "Adventure",
            Genre::Mystery => "Mystery",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Genre {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace(['-', ' '], "").to_lowercase();
        Genre::ALL
            .into_iter()
            .find(|g| g.as_str().replace('-', "").to_lowercase() == wanted)
            .ok_or_else(|| format!("unknown genre '{}'", s))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tone {
    Lighthearted,
    Serious,
    Dark,
    Funny,
    Epic,
}

impl Tone {
    pub const ALL: [Tone; 5] = [Tone::Lighthearted, Tone::Serious, Tone::Dark, Tone::Funny, Tone::Epic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Lighthearted => "Lighthearted",
            Tone::Serious => "Serious",
            Tone::Dark => "Dark",
            Tone::Funny => "Funny",
            Tone::Epic => "Epic",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Tone::ALL
            .into_iter()
            .find(|t| t.as_str().to_lowercase() == wanted)
            .ok_or_else(|| format!("unknown tone '{}'", s))
    }
}

/// What the user asked for. Not modified once generation starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    pub title: String,
    pub character: String,
    pub genre: Genre,
    pub tone: Tone,
    pub target_word_length: usize,
    pub chapter_count: u32,
}

/// One row of the story log. Field names double as the CSV header.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GenerationRecord {
    #[serde(rename = "Date")]
    pub timestamp: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Main Character")]
    pub character: String,
    #[serde(rename = "Genre")]
    pub genre: Genre,
    #[serde(rename = "Tone")]
    pub tone: Tone,
    #[serde(rename = "Chapter")]
    pub chapter: Option<u32>,
    #[serde(rename = "Story")]
    pub text: String,
}

impl GenerationRecord {
    /// Stamps a finished chapter with the current local time.
    /// `chapter` is only kept for multi-chapter requests.
    pub fn new(request: &GenerationRequest, chapter: u32, text: String) -> Self {
        Self {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            title: request.title.clone(),
            character: request.character.clone(),
            genre: request.genre,
            tone: request.tone,
            chapter: (request.chapter_count > 1).then_some(chapter),
            text,
        }
    }
}
