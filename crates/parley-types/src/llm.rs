//! Completion request/response types for Parley.
//!
//! These types model the data shapes exchanged with the upstream
//! chat-completion service: dialogue turns, the streaming request payload,
//! the fragments relayed to HTTP consumers, and upstream errors.

use serde::{Deserialize, Serialize};

/// Role of a turn in the dialogue history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single role-tagged message in the dialogue history.
///
/// Serializes to the `{"role": ..., "content": ...}` shape the
/// chat-completions API expects in its `messages` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub role: Role,
    pub content: String,
}

impl DialogueTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Streaming chat-completion request carrying the whole dialogue history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<DialogueTurn>,
    #[serde(default)]
    pub stream: bool,
}

/// One incremental piece of a streamed completion.
///
/// `EndOfStream` and `Failed` are terminal: the relay closes the channel
/// immediately after sending either of them.
#[derive(Debug)]
pub enum Fragment {
    /// Content produced by upstream. May be empty (role-only chunks).
    Delta(String),

    /// Upstream finished the stream cleanly.
    EndOfStream,

    /// Upstream failed mid-stream.
    Failed(UpstreamError),
}

/// Errors from the upstream completion service.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("rate limited")]
    RateLimited,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("upstream call timed out after {0:?}")]
    Timeout(std::time::Duration),
}
