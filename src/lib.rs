pub mod config;
pub mod display;
pub mod generation;
pub mod llm;
pub mod prompt;
pub mod setup;
pub mod state;
pub mod story_log;
pub mod workflow;
