use crate::config::InputConfig;
use crate::state::{GenerationRequest, Genre, Tone};
use anyhow::Result;
use inquire::validator::Validation;
use inquire::{CustomType, Select, Text};

pub const DEFAULT_TITLE: &str = "The Lost Kingdom";
pub const DEFAULT_CHARACTER: &str = "Aria";

/// Values already given on the command line. Anything left as `None` is
/// asked for interactively.
#[derive(Debug, Default, Clone)]
pub struct RequestDraft {
    pub title: Option<String>,
    pub character: Option<String>,
    pub genre: Option<Genre>,
    pub tone: Option<Tone>,
    pub length: Option<usize>,
    pub chapters: Option<u32>,
}

impl RequestDraft {
    pub fn is_complete(&self) -> bool {
        self.title.is_some()
            && self.character.is_some()
            && self.genre.is_some()
            && self.tone.is_some()
            && self.length.is_some()
    }

    /// Fills the gaps with the defaults instead of asking.
    pub fn with_defaults(self, input: &InputConfig) -> GenerationRequest {
        GenerationRequest {
            title: self.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            character: self.character.unwrap_or_else(|| DEFAULT_CHARACTER.to_string()),
            genre: self.genre.unwrap_or(Genre::Fantasy),
            tone: self.tone.unwrap_or(Tone::Lighthearted),
            target_word_length: self.length.unwrap_or(input.default_words),
            chapter_count: self.chapters.unwrap_or(1),
        }
    }
}

pub fn collect_request(draft: RequestDraft, input: &InputConfig) -> Result<GenerationRequest> {
    let title = match draft.title {
        Some(t) => t,
        None => Text::new("Story Title:").with_default(DEFAULT_TITLE).prompt()?,
    };

    let character = match draft.character {
        Some(c) => c,
        None => Text::new("Main Character Name:")
            .with_default(DEFAULT_CHARACTER)
            .prompt()?,
    };

    let genre = match draft.genre {
        Some(g) => g,
        None => Select::new("Genre:", Genre::ALL.to_vec()).prompt()?,
    };

    let tone = match draft.tone {
        Some(t) => t,
        None => Select::new("Tone:", Tone::ALL.to_vec()).prompt()?,
    };

    let target_word_length = match draft.length {
        Some(l) => l,
        None => {
            let (min, max) = (input.min_words, input.max_words);
            CustomType::<usize>::new("Story Length (words):")
                .with_default(input.default_words.clamp(min, max))
                .with_help_message(&format!("Between {} and {}", min, max))
                .with_validator(move |v: &usize| {
                    if (min..=max).contains(v) {
                        Ok(Validation::Valid)
                    } else {
                        Ok(Validation::Invalid(format!("Enter a value between {} and {}", min, max).into()))
                    }
                })
                .prompt()?
        }
    };

    // Only asked when the whole request is being filled in interactively.
    let chapter_count = match draft.chapters {
        Some(c) => c,
        None if input.max_chapters > 1 => {
            let max = input.max_chapters;
            CustomType::<u32>::new("Number of Chapters:")
                .with_default(1)
                .with_validator(move |v: &u32| {
                    if (1..=max).contains(v) {
                        Ok(Validation::Valid)
                    } else {
                        Ok(Validation::Invalid(format!("Enter a value between 1 and {}", max).into()))
                    }
                })
                .prompt()?
        }
        None => 1,
    };

    Ok(GenerationRequest {
        title,
        character,
        genre,
        tone,
        target_word_length,
        chapter_count,
    })
}
