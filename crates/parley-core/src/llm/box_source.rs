//! BoxCompletionSource -- object-safe dynamic dispatch wrapper for CompletionSource.
//!
//! 1. Define an object-safe `CompletionSourceDyn` trait with boxed futures
//! 2. Blanket-impl `CompletionSourceDyn` for all `T: CompletionSource`
//! 3. `BoxCompletionSource` wraps `Box<dyn CompletionSourceDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use parley_types::llm::{CompletionRequest, UpstreamError};

use super::source::{CompletionSource, DeltaStream};

/// Object-safe version of [`CompletionSource`] with boxed futures.
pub trait CompletionSourceDyn: Send + Sync {
    fn name(&self) -> &str;

    fn open_stream_boxed<'a>(
        &'a self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream, UpstreamError>> + Send + 'a>>;
}

impl<T: CompletionSource> CompletionSourceDyn for T {
    fn name(&self) -> &str {
        CompletionSource::name(self)
    }

    fn open_stream_boxed<'a>(
        &'a self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream, UpstreamError>> + Send + 'a>> {
        Box::pin(self.open_stream(request))
    }
}

/// Type-erased completion source.
///
/// Lets the session hold whichever backend the binary wired up (or a stub
/// in tests) without becoming generic.
pub struct BoxCompletionSource {
    inner: Box<dyn CompletionSourceDyn + Send + Sync>,
}

impl BoxCompletionSource {
    /// Wrap a concrete `CompletionSource` in a type-erased box.
    pub fn new<T: CompletionSource + 'static>(source: T) -> Self {
        Self {
            inner: Box::new(source),
        }
    }

    /// Human-readable source name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Open one streaming completion call.
    pub async fn open_stream(&self, request: CompletionRequest) -> Result<DeltaStream, UpstreamError> {
        self.inner.open_stream_boxed(request).await
    }
}

impl std::fmt::Debug for BoxCompletionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxCompletionSource")
            .field("name", &self.name())
            .finish()
    }
}
