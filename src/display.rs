use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Where generated text is shown while a story is being written.
pub trait DisplaySink {
    /// Called before a chapter starts generating.
    fn start(&mut self, label: &str);
    /// Replaces whatever was shown last with `text`.
    fn update(&mut self, text: &str);
    /// Shows the final text of a chapter.
    fn finish(&mut self, heading: &str, text: &str);
    /// Shows a message that did not stop the run.
    fn report_error(&mut self, message: &str);
}

/// Spinner while waiting, last line of the partial text as its message,
/// final text printed once the chapter is done.
pub struct TerminalSink {
    spinner: Option<ProgressBar>,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self { spinner: None }
    }

    fn clear(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySink for TerminalSink {
    fn start(&mut self, label: &str) {
        self.clear();
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {prefix} {wide_msg}") {
            pb.set_style(style);
        }
        pb.set_prefix(label.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        self.spinner = Some(pb);
    }

    fn update(&mut self, text: &str) {
        if let Some(pb) = &self.spinner {
            let words = text.split_whitespace().count();
            let tail = text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            pb.set_message(format!("({} words) {}", words, tail.trim()));
        }
    }

    fn finish(&mut self, heading: &str, text: &str) {
        self.clear();
        println!("\n{}\n", heading);
        println!("{}", text.trim());
    }

    fn report_error(&mut self, message: &str) {
        match &self.spinner {
            Some(pb) => pb.println(format!("Error: {}", message)),
            None => eprintln!("Error: {}", message),
        }
    }
}
