//! Wire types for the OpenAI chat-completions streaming protocol.
//!
//! Only the fields the relay needs are modelled; everything else in a
//! chunk is ignored by serde.

use serde::Deserialize;

/// One `data:` payload of a streamed chat completion.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Present when the service reports an error inside the stream.
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// Error object returned by the API, either as a whole response body
/// (`{"error": {...}}`) or inside a stream chunk.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
}

/// Non-2xx response body: `{"error": {...}}`.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}
