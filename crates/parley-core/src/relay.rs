//! Stream relay: upstream pull loop to bounded fragment channel.
//!
//! One [`StreamRelay::relay`] call opens one upstream stream and spawns one
//! task that pulls deltas and pushes them onto a channel for the consumer.
//! Each push waits at most the liveness timeout for the consumer to take the
//! previous fragment; past that the fragment is dropped so a stalled or
//! departed consumer never pins the task. The overall call deadline bounds
//! both establishing the stream and every pull.
//!
//! History policy: delivery is best-effort, history is not. A completed
//! stream commits the full text as one assistant turn even when some
//! fragments were dropped on the way to the consumer. A failed stream rolls
//! the whole exchange back.

use std::time::Duration;

use futures_util::StreamExt;
use metrics::gauge;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{Instrument, debug, error, info_span, warn};

use parley_types::llm::{CompletionRequest, DialogueTurn, Fragment, Role, UpstreamError};

use crate::llm::box_source::BoxCompletionSource;
use crate::llm::source::DeltaStream;
use crate::session::HISTORY_TURNS_GAUGE;

/// How long a push waits for the consumer before the fragment is dropped.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Fragments buffered between the relay task and the consumer.
const FRAGMENT_BUFFER: usize = 1;

/// One in-flight prompt cycle holding exclusive access to the history.
///
/// The user turn is already appended. Committing appends the assistant
/// turn; dropping an uncommitted exchange removes the user turn again, so a
/// prompt abandoned at any await point leaves only completed exchanges
/// behind. The history lock is released when the exchange is dropped.
pub struct Exchange {
    history: OwnedMutexGuard<Vec<DialogueTurn>>,
    committed: bool,
}

impl Exchange {
    pub(crate) fn begin(mut history: OwnedMutexGuard<Vec<DialogueTurn>>, question: &str) -> Self {
        history.push(DialogueTurn::user(question));
        Self {
            history,
            committed: false,
        }
    }

    /// Turns to send upstream, ending with the pending user turn.
    pub fn turns(&self) -> &[DialogueTurn] {
        &self.history
    }

    fn commit(mut self, answer: String) {
        self.history.push(DialogueTurn::assistant(answer));
        self.committed = true;
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if !self.committed && self.history.last().is_some_and(|turn| turn.role == Role::User) {
            self.history.pop();
        }
        gauge!(HISTORY_TURNS_GAUGE).set(self.history.len() as f64);
    }
}

/// How a relay task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream ended the stream cleanly; the answer was committed.
    Completed,
    /// Upstream failed mid-stream; the exchange was rolled back.
    Failed(String),
}

/// Summary returned by the relay task when it exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    /// Content deltas pulled from upstream.
    pub pulled: usize,
    /// Fragments (including the terminal one) the consumer never received.
    pub dropped: usize,
    pub outcome: RelayOutcome,
}

/// A started relay: the consumer's channel plus the background task.
///
/// Dropping `task` detaches it; the relay still runs to completion.
pub struct Relayed {
    pub fragments: mpsc::Receiver<Fragment>,
    pub task: JoinHandle<RelayReport>,
}

/// Relays one upstream completion stream onto a bounded channel.
#[derive(Debug, Clone)]
pub struct StreamRelay {
    call_timeout: Duration,
    liveness_timeout: Duration,
}

impl StreamRelay {
    /// Create a relay whose upstream calls are bounded by `call_timeout`.
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            liveness_timeout: LIVENESS_TIMEOUT,
        }
    }

    /// Open the upstream stream and start relaying it.
    ///
    /// Fails without producing a channel (and rolls the exchange back) when
    /// the stream cannot be established before the call deadline.
    pub async fn relay(
        &self,
        source: &BoxCompletionSource,
        request: CompletionRequest,
        exchange: Exchange,
    ) -> Result<Relayed, UpstreamError> {
        let deadline = Instant::now() + self.call_timeout;
        let span = info_span!("relay", source = source.name(), model = %request.model);

        let opened = timeout_at(deadline, source.open_stream(request))
            .instrument(span.clone())
            .await;
        let stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                error!(parent: &span, error = %err, "failed to create chat completion stream");
                drop(exchange);
                return Err(err);
            }
            Err(_) => {
                error!(parent: &span, timeout = ?self.call_timeout, "timed out creating chat completion stream");
                drop(exchange);
                return Err(UpstreamError::Timeout(self.call_timeout));
            }
        };

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let delivery = Delivery {
            tx,
            liveness_timeout: self.liveness_timeout,
            dropped: 0,
        };
        let task = tokio::spawn(
            pump(stream, delivery, exchange, deadline, self.call_timeout).instrument(span),
        );

        Ok(Relayed {
            fragments: rx,
            task,
        })
    }
}

/// Consumer side of the relay: timed pushes with drop accounting.
struct Delivery {
    tx: mpsc::Sender<Fragment>,
    liveness_timeout: Duration,
    dropped: usize,
}

impl Delivery {
    async fn push(&mut self, fragment: Fragment) {
        match timeout(self.liveness_timeout, self.tx.send(fragment)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                // Receiver gone: keep pulling so the answer still lands in history.
                self.dropped += 1;
            }
            Err(_) => {
                debug!(timeout = ?self.liveness_timeout, "consumer not ready, fragment dropped");
                self.dropped += 1;
            }
        }
    }
}

async fn pump(
    mut stream: DeltaStream,
    mut delivery: Delivery,
    exchange: Exchange,
    deadline: Instant,
    call_timeout: Duration,
) -> RelayReport {
    let mut answer = String::new();
    let mut pulled = 0usize;

    let outcome = loop {
        let next = match timeout_at(deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) => Some(Err(UpstreamError::Timeout(call_timeout))),
        };

        match next {
            Some(Ok(delta)) => {
                pulled += 1;
                answer.push_str(&delta);
                delivery.push(Fragment::Delta(delta)).await;
            }
            None => {
                delivery.push(Fragment::EndOfStream).await;
                break RelayOutcome::Completed;
            }
            Some(Err(err)) => {
                error!(error = %err, "stream error");
                let message = err.to_string();
                delivery.push(Fragment::Failed(err)).await;
                break RelayOutcome::Failed(message);
            }
        }
    };

    // Close the channel before touching history so the consumer is not held up.
    let dropped = delivery.dropped;
    drop(delivery);

    match &outcome {
        RelayOutcome::Completed => exchange.commit(answer),
        RelayOutcome::Failed(_) => drop(exchange),
    }

    if dropped > 0 {
        warn!(pulled, dropped, "consumer missed fragments; history holds the full answer");
    } else {
        debug!(pulled, "relay finished");
    }

    RelayReport {
        pulled,
        dropped,
        outcome,
    }
}
