//! OpenAI SSE stream to content-delta adapter.
//!
//! The chat-completions API streams Server-Sent Events whose `data:` field
//! is either a JSON chunk or the literal `[DONE]` terminator. Each chunk
//! carries the next piece of text in `choices[0].delta.content`. Chunks
//! without choices (usage reports) are skipped.

use std::pin::pin;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};

use parley_core::llm::source::DeltaStream;
use parley_types::llm::UpstreamError;

use super::types::ChatCompletionChunk;

/// Terminator sent as the last `data:` payload.
const DONE_MARKER: &str = "[DONE]";

/// What a single SSE `data:` payload means for the relay.
#[derive(Debug, PartialEq, Eq)]
pub enum SseData {
    /// Next content delta (possibly empty).
    Delta(String),
    /// A chunk with nothing to relay.
    Skip,
    /// End of stream.
    Done,
}

/// Interpret one SSE `data:` payload.
pub fn parse_data(data: &str) -> Result<SseData, UpstreamError> {
    let data = data.trim();
    if data == DONE_MARKER {
        return Ok(SseData::Done);
    }
    if data.is_empty() {
        return Ok(SseData::Skip);
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| UpstreamError::Deserialization(format!("stream chunk: {e}")))?;

    if let Some(err) = chunk.error {
        return Err(UpstreamError::Stream(err.message));
    }

    match chunk.choices.into_iter().next() {
        Some(choice) => Ok(SseData::Delta(choice.delta.content.unwrap_or_default())),
        None => Ok(SseData::Skip),
    }
}

/// Map a raw response body stream to a [`DeltaStream`].
///
/// The returned stream ends at `[DONE]` or when the body ends, whichever
/// comes first.
pub fn map_sse_stream<S, B, E>(body: S) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut events = pin!(body.eventsource());

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| UpstreamError::Stream(e.to_string()))?;
            match parse_data(&event.data)? {
                SseData::Delta(text) => yield text,
                SseData::Skip => {}
                SseData::Done => break,
            }
        }
    })
}
