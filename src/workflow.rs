use crate::display::DisplaySink;
use crate::generation::{GenerationLoop, GenerationPolicy};
use crate::llm::ModelProvider;
use crate::prompt::build_prompt;
use crate::state::{GenerationRecord, GenerationRequest};
use crate::story_log::StoryLog;
use anyhow::{Context, Result};

pub struct StoryWorkflow {
    provider: Box<dyn ModelProvider>,
    policy: GenerationPolicy,
    story_log: StoryLog,
}

impl StoryWorkflow {
    pub fn new(provider: Box<dyn ModelProvider>, policy: GenerationPolicy, story_log: StoryLog) -> Self {
        Self {
            provider,
            policy,
            story_log,
        }
    }

    pub fn story_log(&self) -> &StoryLog {
        &self.story_log
    }

    /// Writes every chapter of `request` in order and logs each one as soon
    /// as it is done.
    ///
    /// A generation error stops the run; chapters finished before it stay in
    /// the story log. A story log error is shown on `sink` and the run goes on.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        sink: &mut dyn DisplaySink,
    ) -> Result<Vec<GenerationRecord>> {
        let generator = GenerationLoop::new(self.provider.as_ref(), self.policy);
        let total = request.chapter_count;
        let mut records = Vec::with_capacity(total as usize);

        for chapter in 1..=total {
            let prompt = build_prompt(request, chapter);
            let label = if total > 1 {
                format!("Writing chapter {}/{}...", chapter, total)
            } else {
                "Creating your story...".to_string()
            };

            sink.start(&label);
            let text = generator
                .generate(&prompt, request.target_word_length, &mut |partial: &str| {
                    sink.update(partial)
                })
                .await
                .with_context(|| format!("Failed to generate chapter {} of {}", chapter, total))?;

            let heading = if total > 1 {
                format!("Chapter {}", chapter)
            } else {
                "Your Generated Story:".to_string()
            };
            sink.finish(&heading, &text);

            let record = GenerationRecord::new(request, chapter, text);
            match self.story_log.append(&record) {
                Ok(()) => log::info!(
                    "Saved '{}' chapter {} to {}",
                    record.title,
                    chapter,
                    self.story_log.path().display()
                ),
                Err(e) => {
                    log::error!("Could not save chapter {}: {}", chapter, e);
                    sink.report_error(&format!("Could not save story: {}", e));
                }
            }
            records.push(record);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Genre, Tone};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct MockProvider {
        prompts: Mutex<Vec<String>>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl ModelProvider for MockProvider {
        async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            if self.fail_on_call == Some(prompts.len()) {
                return Err(anyhow!("connection reset"));
            }
            Ok(format!("Story #{} ({} tokens)", prompts.len(), max_tokens))
        }
    }

    #[derive(Default)]
    struct MockSink {
        starts: Vec<String>,
        updates: Vec<String>,
        finished: Vec<String>,
        errors: Vec<String>,
    }

    impl DisplaySink for MockSink {
        fn start(&mut self, label: &str) {
            self.starts.push(label.to_string());
        }
        fn update(&mut self, text: &str) {
            self.updates.push(text.to_string());
        }
        fn finish(&mut self, _heading: &str, text: &str) {
            self.finished.push(text.to_string());
        }
        fn report_error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }
    }

    fn request(chapters: u32) -> GenerationRequest {
        GenerationRequest {
            title: "The Lost Kingdom".to_string(),
            character: "Aria".to_string(),
            genre: Genre::Fantasy,
            tone: Tone::Epic,
            target_word_length: 300,
            chapter_count: chapters,
        }
    }

    fn workflow(provider: MockProvider, policy: GenerationPolicy, log: StoryLog) -> StoryWorkflow {
        StoryWorkflow::new(Box::new(provider), policy, log)
    }

    #[tokio::test]
    async fn test_single_chapter_appends_one_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = StoryLog::new(dir.path().join("stories.csv"));
        let flow = workflow(MockProvider::default(), GenerationPolicy::SingleShot, log);
        let mut sink = MockSink::default();

        let records = flow.run(&request(1), &mut sink).await?;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chapter, None);
        assert!(!records[0].text.is_empty());
        assert_eq!(records[0].text, "Story #1 (600 tokens)");

        let saved = flow.story_log().load_all()?;
        assert_eq!(saved, records);
        assert_eq!(sink.starts, vec!["Creating your story...".to_string()]);
        assert!(sink.updates.is_empty());
        assert!(sink.errors.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_three_chapters_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = StoryLog::new(dir.path().join("stories.csv"));
        let flow = workflow(MockProvider::default(), GenerationPolicy::SingleShot, log);
        let mut sink = MockSink::default();

        flow.run(&request(3), &mut sink).await?;

        let saved = flow.story_log().load_all()?;
        let chapters: Vec<Option<u32>> = saved.iter().map(|r| r.chapter).collect();
        assert_eq!(chapters, vec![Some(1), Some(2), Some(3)]);
        for record in &saved {
            assert_eq!(record.title, "The Lost Kingdom");
            assert_eq!(record.character, "Aria");
            assert_eq!(record.genre, Genre::Fantasy);
            assert_eq!(record.tone, Tone::Epic);
        }
        assert_eq!(sink.finished.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_each_chapter_gets_its_own_prompt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let provider = MockProvider::default();
        let log = StoryLog::new(dir.path().join("stories.csv"));
        let flow = StoryWorkflow::new(Box::new(provider), GenerationPolicy::SingleShot, log);

        let records = flow.run(&request(2), &mut MockSink::default()).await?;

        assert_eq!(records[0].text, "Story #1 (600 tokens)");
        assert_eq!(records[1].text, "Story #2 (600 tokens)");
        Ok(())
    }

    #[tokio::test]
    async fn test_chunked_partials_reach_the_sink() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = StoryLog::new(dir.path().join("stories.csv"));
        let flow = workflow(
            MockProvider::default(),
            GenerationPolicy::ChunkedRegenerate { step: 20 },
            log,
        );
        let mut sink = MockSink::default();
        let mut req = request(1);
        req.target_word_length = 30;

        let records = flow.run(&req, &mut sink).await?;

        assert_eq!(sink.updates.len(), 3);
        assert_eq!(sink.updates.last(), Some(&records[0].text));
        assert_eq!(records[0].text, "Story #3 (60 tokens)");
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_keeps_finished_chapters() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = StoryLog::new(dir.path().join("stories.csv"));
        let provider = MockProvider {
            fail_on_call: Some(2),
            ..Default::default()
        };
        let flow = workflow(provider, GenerationPolicy::SingleShot, log);

        let err = flow.run(&request(3), &mut MockSink::default()).await.unwrap_err();

        assert!(err.to_string().contains("chapter 2 of 3"));
        let saved = flow.story_log().load_all()?;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].chapter, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_story_log_error_is_reported_not_raised() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stories.csv");
        fs::write(&path, "something,else\n")?;
        let flow = workflow(MockProvider::default(), GenerationPolicy::SingleShot, StoryLog::new(&path));
        let mut sink = MockSink::default();

        let records = flow.run(&request(2), &mut sink).await?;

        assert_eq!(records.len(), 2);
        assert_eq!(sink.errors.len(), 2);
        assert!(sink.errors[0].starts_with("Could not save story"));
        assert_eq!(fs::read_to_string(&path)?, "something,else\n");
        Ok(())
    }
}
