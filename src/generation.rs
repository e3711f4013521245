use crate::config::{GenerationConfig, PolicyKind};
use crate::llm::ModelProvider;
use anyhow::{anyhow, Result};
use std::iter;

/// Fixed proxy for how many tokens a word costs.
pub const TOKENS_PER_WORD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPolicy {
    /// One call with the full budget.
    SingleShot,
    /// Calls with a budget growing by `step` until the full budget is reached.
    /// Every call decodes from the original prompt again, so with sampling
    /// the partial texts are not guaranteed to be prefixes of each other.
    ChunkedRegenerate { step: usize },
}

impl From<&GenerationConfig> for GenerationPolicy {
    fn from(cfg: &GenerationConfig) -> Self {
        match cfg.policy {
            PolicyKind::SingleShot => GenerationPolicy::SingleShot,
            PolicyKind::Chunked => GenerationPolicy::ChunkedRegenerate { step: cfg.chunk_step },
        }
    }
}

/// `None` when the budget does not fit in a `usize`.
pub fn token_budget(target_word_length: usize) -> Option<usize> {
    target_word_length.checked_mul(TOKENS_PER_WORD)
}

/// `step, 2*step, ...` below `total`, then `total` itself.
pub fn chunk_budgets(total: usize, step: usize) -> impl Iterator<Item = usize> {
    let steps = (step > 0 && total > 0).then(|| (step..total).step_by(step));
    steps.into_iter().flatten().chain(iter::once(total))
}

pub struct GenerationLoop<'a> {
    provider: &'a dyn ModelProvider,
    policy: GenerationPolicy,
}

impl<'a> GenerationLoop<'a> {
    pub fn new(provider: &'a dyn ModelProvider, policy: GenerationPolicy) -> Self {
        Self { provider, policy }
    }

    /// Produces the final text for one prompt. `on_partial` only fires under
    /// the chunked policy, once per call. Provider errors are returned as is.
    pub async fn generate(
        &self,
        prompt: &str,
        target_word_length: usize,
        on_partial: &mut dyn FnMut(&str),
    ) -> Result<String> {
        let total = token_budget(target_word_length)
            .ok_or_else(|| anyhow!("target length of {} words is too large", target_word_length))?;

        match self.policy {
            GenerationPolicy::SingleShot => self.provider.generate(prompt, total).await,
            GenerationPolicy::ChunkedRegenerate { step } => {
                let mut text = String::new();
                for budget in chunk_budgets(total, step) {
                    log::debug!("Regenerating with budget {}/{}", budget, total);
                    text = self.provider.generate(prompt, budget).await?;
                    on_partial(&text);
                }
                Ok(text)
            }
        }
    }
}
