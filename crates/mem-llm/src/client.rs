//! Provider-selecting completion client.
//!
//! The pipeline retries at the queue layer, so this client never retries a
//! call itself; its only resilience duty is the hard per-call deadline,
//! enforced by cancelling the in-flight request future.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::instrument;

use mem_core::settings::{Provider, Settings};

use crate::error::LlmError;
use crate::{gemini, openrouter};

pub const TEMPERATURE: f64 = 0.3;
pub const OBSERVATION_MAX_TOKENS: u32 = 4096;
pub const SUMMARY_MAX_TOKENS: u32 = 2048;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One completion call: a system preamble plus a single user payload.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_output_tokens: u32,
}

/// Provider response. `content` may be empty on a 2xx with no text; the
/// parser downstream treats that as zero observations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub total_tokens: u64,
}

/// Seam between the workers and the network. Implemented by [`LlmClient`]
/// for production and [`crate::MockClient`] in tests.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

pub struct LlmClient {
    client: Client,
    settings: Settings,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(settings: Settings) -> Self {
        Self::with_timeout(settings, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(settings: Settings, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            settings,
            timeout,
        }
    }

    pub fn provider(&self) -> Provider {
        self.settings.provider
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    #[instrument(skip(self, request), fields(provider = %self.settings.provider, max_tokens = request.max_output_tokens))]
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let call = async {
            match self.settings.provider {
                Provider::OpenRouter => {
                    openrouter::complete(&self.client, &self.settings, request).await
                }
                Provider::Gemini => gemini::complete(&self.client, &self.settings, request).await,
            }
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants() {
        assert!((TEMPERATURE - 0.3).abs() < f64::EPSILON);
        assert_eq!(OBSERVATION_MAX_TOKENS, 4096);
        assert_eq!(SUMMARY_MAX_TOKENS, 2048);
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_millis(60_000));
    }

    #[test]
    fn provider_comes_from_settings() {
        let mut settings = Settings::default();
        settings.provider = Provider::Gemini;
        let client = LlmClient::new(settings);
        assert_eq!(client.provider(), Provider::Gemini);
    }

    #[tokio::test]
    async fn missing_key_fails_before_network() {
        // Default settings carry no API key, so the call must fail fast
        // with AuthMissing rather than attempt a request.
        let client = LlmClient::new(Settings::default());
        let request = CompletionRequest {
            system: "sys".into(),
            user: "user".into(),
            max_output_tokens: 16,
        };
        let err = client.complete(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::AuthMissing("openrouter")));
    }

    #[tokio::test]
    async fn missing_gemini_key_fails_fast() {
        let mut settings = Settings::default();
        settings.provider = Provider::Gemini;
        let client = LlmClient::new(settings);
        let request = CompletionRequest {
            system: "sys".into(),
            user: "user".into(),
            max_output_tokens: 16,
        };
        let err = client.complete(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::AuthMissing("gemini")));
    }
}
