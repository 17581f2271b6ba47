//! AI provider abstraction: a uniform `generate` capability so the underlying
//! vendor is swappable without touching orchestration logic.
//!
//! The factory resolves the provider once at startup from settings. An env
//! override (`NEWSDESK_AI_MODE=mock`) forces the deterministic mock, which is
//! what the tests and the demo binary run against.

pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::settings::AiSettings;

pub const ENV_AI_MODE: &str = "NEWSDESK_AI_MODE";

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rate limited")]
    RateLimited,
    #[error("provider rejected the API key")]
    InvalidKey,
    #[error("provider call timed out")]
    Timeout,
    #[error("provider failure: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Everything except a bad key is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::InvalidKey)
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, req: &GenerationRequest) -> Result<String, ProviderError>;
    fn name(&self) -> &'static str;
}

pub type DynProvider = Arc<dyn Provider>;

/// Build a provider from settings, wrapped with the retry envelope.
/// Returns `None` when AI is disabled; the process phase then no-ops.
pub fn build_provider(cfg: &AiSettings) -> Option<DynProvider> {
    if std::env::var(ENV_AI_MODE).map(|v| v == "mock").unwrap_or(false) {
        return Some(Arc::new(Retrying::new(
            MockProvider::default(),
            cfg.retry_attempts,
        )));
    }

    match cfg.provider.as_str() {
        "openai" => Some(Arc::new(Retrying::new(
            openai::OpenAiProvider::new(cfg),
            cfg.retry_attempts,
        ))),
        "mock" => Some(Arc::new(Retrying::new(
            MockProvider::default(),
            cfg.retry_attempts,
        ))),
        "disabled" => None,
        other => {
            tracing::warn!(provider = other, "unknown ai provider, treating as disabled");
            None
        }
    }
}

// ------------------------------------------------------------
// Retry wrapper
// ------------------------------------------------------------

/// Fixed-attempt retry with doubling backoff (500ms, 1s, 2s, ...).
/// Non-retryable errors fail immediately.
pub struct Retrying<P: Provider> {
    inner: P,
    attempts: u32,
}

impl<P: Provider> Retrying<P> {
    pub fn new(inner: P, attempts: u32) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
        }
    }
}

#[async_trait]
impl<P: Provider> Provider for Retrying<P> {
    async fn generate(&self, req: &GenerationRequest) -> Result<String, ProviderError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.generate(req).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    let backoff = Duration::from_millis(500u64 << (attempt - 1));
                    tracing::debug!(
                        provider = self.inner.name(),
                        attempt,
                        error = %e,
                        "provider call failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// Mock provider (tests, demo, local runs)
// ------------------------------------------------------------

/// Deterministic provider: recognizes the stage from the system prompt and
/// answers with something the processor can parse.
#[derive(Debug, Clone, Default)]
pub struct MockProvider;

#[async_trait]
impl Provider for MockProvider {
    async fn generate(&self, req: &GenerationRequest) -> Result<String, ProviderError> {
        let sys = req.system.to_lowercase();
        if sys.contains("fact") {
            return Ok("0.82".to_string());
        }
        if sys.contains("seo") || sys.contains("engagement") {
            return Ok("0.70".to_string());
        }
        // synthesis / translation: answer with well-formed content JSON
        let snippet: String = req.prompt.chars().take(60).collect();
        let piece = serde_json::json!({
            "title": format!("(mock) {snippet}"),
            "lead": "Mock lead paragraph.",
            "body": "Mock body text, two sentences long. Nothing here is real.",
        });
        Ok(piece.to_string())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
