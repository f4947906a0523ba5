//! CompletionSource trait definition.
//!
//! This is the port every upstream chat-completion backend implements.
//! Uses RPITIT for `open_stream`; the returned delta stream is boxed so it
//! can outlive the call and be moved into the relay task.

use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;

use parley_types::llm::{CompletionRequest, UpstreamError};

/// Stream of content deltas from an established upstream call.
///
/// `None` marks a clean end of stream; an `Err` item is a mid-stream failure.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send + 'static>>;

/// Trait for upstream chat-completion backends.
///
/// Opening is split from pulling so callers can tell an establishment
/// failure (nothing was produced) from a failure after some content
/// arrived.
///
/// Implementations live in parley-infra (e.g., `OpenAiChatSource`).
pub trait CompletionSource: Send + Sync {
    /// Human-readable source name (e.g., "openai").
    fn name(&self) -> &str;

    /// Open one streaming completion call.
    ///
    /// Resolves once upstream has accepted the request and the response
    /// body is ready to be pulled.
    fn open_stream(
        &self,
        request: CompletionRequest,
    ) -> impl Future<Output = Result<DeltaStream, UpstreamError>> + Send;
}
