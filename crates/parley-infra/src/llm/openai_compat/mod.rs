//! OpenAI-compatible chat-completions source.
//!
//! [`OpenAiChatSource`] posts the full request (history, model, `stream:
//! true`) to a configurable chat-completions URL with bearer authentication
//! and exposes the SSE response body as a [`DeltaStream`]. Any endpoint
//! speaking the same protocol (proxies, self-hosted gateways) works by
//! pointing the URL at it.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged.

pub mod streaming;
pub mod types;

use std::time::Duration;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use parley_core::llm::source::{CompletionSource, DeltaStream};
use parley_types::llm::{CompletionRequest, UpstreamError};

use self::streaming::map_sse_stream;
use self::types::ApiErrorResponse;

/// Time allowed to open the TCP/TLS connection to the endpoint.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Streaming client for an OpenAI-compatible chat-completions endpoint.
///
/// Does NOT derive Debug so the API key can never end up in logs.
pub struct OpenAiChatSource {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
}

impl OpenAiChatSource {
    /// Create a source posting to `endpoint` (the full chat-completions URL).
    pub fn new(api_key: SecretString, endpoint: impl Into<String>) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| UpstreamError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.into(),
        })
    }
}

impl CompletionSource for OpenAiChatSource {
    fn name(&self) -> &str {
        "openai"
    }

    async fn open_stream(&self, request: CompletionRequest) -> Result<DeltaStream, UpstreamError> {
        debug!(
            endpoint = %self.endpoint,
            model = %request.model,
            turns = request.messages.len(),
            "opening chat completion stream"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::Provider {
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "chat completion request rejected");
            return Err(map_status_error(status, &body));
        }

        Ok(map_sse_stream(response.bytes_stream()))
    }
}

/// Map a non-2xx response to an [`UpstreamError`].
fn map_status_error(status: StatusCode, body: &str) -> UpstreamError {
    match status.as_u16() {
        401 | 403 => UpstreamError::AuthenticationFailed,
        429 => UpstreamError::RateLimited,
        _ => {
            let message = serde_json::from_str::<ApiErrorResponse>(body)
                .map(|parsed| parsed.error.message)
                .unwrap_or_else(|_| body.to_string());
            UpstreamError::Provider {
                message: format!("HTTP {status}: {message}"),
            }
        }
    }
}
