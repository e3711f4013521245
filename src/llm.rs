use crate::config::{Config, GeminiConfig, OllamaConfig, OpenAIConfig};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

/// Nucleus sampling threshold used for locally served models.
pub const TOP_P: f32 = 0.9;
/// Sampling temperature used for locally served models.
pub const TEMPERATURE: f32 = 0.8;

#[async_trait]
pub trait ModelProvider: Send + Sync + Debug {
    /// Generates text for `prompt`, stopping after at most `max_tokens` tokens.
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String>;
}

#[async_trait]
impl<T: ModelProvider + ?Sized> ModelProvider for Arc<T> {
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        (**self).generate(prompt, max_tokens).await
    }
}

pub async fn create_provider(config: &Config) -> Result<Box<dyn ModelProvider>> {
    let timeout = Duration::from_secs(config.llm.request_timeout_seconds);
    log::info!("Initializing model provider: {}", config.llm.provider);

    match config.llm.provider.as_str() {
        "openai" => {
            let default_cfg;
            let cfg = match config.llm.openai.as_ref() {
                Some(cfg) => cfg,
                None => {
                    default_cfg = OpenAIConfig {
                        api_key: None,
                        model: "gpt-4o-mini".to_string(),
                        base_url: None,
                    };
                    &default_cfg
                }
            };
            let api_key = resolve_api_key(cfg.api_key.as_deref(), "OPENAI_API_KEY")?;
            Ok(Box::new(OpenAIClient::new(&api_key, &cfg.model, cfg.base_url.as_deref(), timeout)?))
        }
        "gemini" => {
            let cfg: &GeminiConfig = config.llm.gemini.as_ref().context("Gemini config missing")?;
            let api_key = resolve_api_key(cfg.api_key.as_deref(), "GEMINI_API_KEY")?;
            Ok(Box::new(GeminiClient::new(&api_key, &cfg.model, timeout)?))
        }
        "ollama" => {
            let cfg = config.llm.ollama.as_ref().context("Ollama config missing")?;
            let model = OllamaClient::get_or_load(cfg, timeout).await?;
            Ok(Box::new(model))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.llm.provider)),
    }
}

fn resolve_api_key(configured: Option<&str>, env_var: &str) -> Result<String> {
    match configured {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => std::env::var(env_var)
            .with_context(|| format!("No API key configured and {} is not set", env_var)),
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

// --- Load-once cache ---

/// A value that is loaded on first use and then shared for the rest of the
/// process. A failed load leaves the cell empty so the next caller retries.
pub struct LoadOnce<T> {
    cell: OnceCell<Arc<T>>,
}

impl<T> LoadOnce<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let value = self
            .cell
            .get_or_try_init(move || async move { load().await.map(Arc::new) })
            .await?;
        Ok(value.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

impl<T> Default for LoadOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}

static LOCAL_MODEL: LoadOnce<OllamaClient> = LoadOnce::new();

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.unwrap_or("https://api.openai.com/v1");
        Url::parse(base_url).with_context(|| format!("Invalid OpenAI base_url: {}", base_url))?;
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
        })
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: usize,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl ModelProvider for OpenAIClient {
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let result: OpenAIResponse = resp.json().await?;
        if let Some(choice) = result.choices.first() {
            if let Some(content) = &choice.message.content {
                return Ok(content.clone());
            }
        }

        Err(anyhow!("OpenAI response empty or missing content"))
    }
}

// --- Gemini ---

#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: http_client(timeout)?,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: usize,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

impl GeminiResponse {
    fn into_text(self) -> Result<String> {
        if let Some(err) = self.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }

        let first = self
            .candidates
            .and_then(|c| c.into_iter().next())
            .context("Gemini response has no candidates")?;

        let text: String = first
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }
        Ok(text)
    }
}

#[async_trait]
impl ModelProvider for GeminiClient {
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        let url = Url::parse_with_params(
            &format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                self.model
            ),
            &[("key", self.api_key.as_str())],
        )?;

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: max_tokens,
            },
        };

        let resp = self.client.post(url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text).with_context(|| {
            format!("Failed to parse Gemini response. Body: {}", response_text)
        })?;
        result.into_text()
    }
}

// --- Ollama (local model) ---

#[derive(Debug)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    keep_alive: Option<String>,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(cfg: &OllamaConfig, timeout: Duration) -> Result<Self> {
        Url::parse(&cfg.base_url)
            .with_context(|| format!("Invalid Ollama base_url: {}", cfg.base_url))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            keep_alive: cfg.keep_alive.clone(),
            client: http_client(timeout)?,
        })
    }

    /// Returns the process-wide local model, loading it on first use.
    /// Later calls get the same handle regardless of `cfg`.
    pub async fn get_or_load(cfg: &OllamaConfig, timeout: Duration) -> Result<Arc<OllamaClient>> {
        if LOCAL_MODEL.is_loaded() {
            log::debug!("Reusing loaded local model");
        }
        LOCAL_MODEL
            .get_or_load(move || async move {
                let client = OllamaClient::new(cfg, timeout)?;
                client.load().await?;
                Ok(client)
            })
            .await
    }

    /// A generate call without a prompt makes the daemon load the weights.
    async fn load(&self) -> Result<()> {
        log::info!("Loading local model {} from {}", self.model, self.base_url);
        let request_body = OllamaRequest {
            model: self.model.clone(),
            prompt: None,
            stream: false,
            options: None,
            keep_alive: self.keep_alive.clone(),
        };

        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request_body)
            .send()
            .await
            .with_context(|| format!("Failed to reach Ollama at {}", self.base_url))?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Failed to load model {}: {}", self.model, error_text));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<String>,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: usize,
    top_p: f32,
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

#[async_trait]
impl ModelProvider for OllamaClient {
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request_body = OllamaRequest {
            model: self.model.clone(),
            prompt: Some(prompt.to_string()),
            stream: false,
            options: Some(OllamaOptions {
                num_predict: max_tokens,
                top_p: TOP_P,
                temperature: TEMPERATURE,
            }),
            keep_alive: self.keep_alive.clone(),
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Ollama API error: {}", error_text));
        }

        let result: OllamaResponse = resp.json().await?;
        Ok(result.response)
    }
}
