use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";
/// Upper limit for chapters in one request.
pub const MAX_CHAPTERS: u32 = 5;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_story_log")]
    pub story_log: PathBuf,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub input: InputConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // "openai", "gemini" or "ollama"
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    pub openai: Option<OpenAIConfig>,
    pub gemini: Option<GeminiConfig>,
    pub ollama: Option<OllamaConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    #[serde(default = "default_openai_model")]
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    /// Falls back to `GEMINI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    pub model: String,
    /// How long the daemon keeps the weights resident, e.g. "30m".
    pub keep_alive: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    SingleShot,
    Chunked,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default = "default_chunk_step")]
    pub chunk_step: usize,
}

/// Bounds used by the interactive prompts. Flag values bypass them.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InputConfig {
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    #[serde(default = "default_words")]
    pub default_words: usize,
    #[serde(default = "default_max_chapters")]
    pub max_chapters: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            story_log: default_story_log(),
            llm: LlmConfig::default(),
            generation: GenerationConfig::default(),
            input: InputConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            request_timeout_seconds: default_request_timeout(),
            openai: None,
            gemini: None,
            ollama: None,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            chunk_step: default_chunk_step(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            min_words: default_min_words(),
            max_words: default_max_words(),
            default_words: default_words(),
            max_chapters: default_max_chapters(),
        }
    }
}

fn default_story_log() -> PathBuf {
    PathBuf::from("stories.csv")
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_request_timeout() -> u64 {
    120
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_ollama_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_chunk_step() -> usize {
    20
}
fn default_min_words() -> usize {
    100
}
fn default_max_words() -> usize {
    2000
}
fn default_words() -> usize {
    500
}
fn default_max_chapters() -> u32 {
    MAX_CHAPTERS
}

impl Config {
    /// Loads the config file, or the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::warn!("{} not found, using default settings", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.generation.chunk_step == 0 {
            bail!("generation.chunk_step must be greater than zero");
        }
        let input = &self.input;
        if input.min_words > input.max_words {
            bail!(
                "input.min_words ({}) is larger than input.max_words ({})",
                input.min_words,
                input.max_words
            );
        }
        if !(1..=MAX_CHAPTERS).contains(&input.max_chapters) {
            bail!(
                "input.max_chapters must be between 1 and {}, got {}",
                MAX_CHAPTERS,
                input.max_chapters
            );
        }
        Ok(())
    }
}
