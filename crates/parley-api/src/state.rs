//! Shared application state handed to the HTTP handlers.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use parley_core::session::ConversationSession;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<ConversationSession>,
    /// Renders the process-wide recorder on `/metrics`.
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub fn new(session: ConversationSession, metrics: PrometheusHandle) -> Self {
        Self {
            session: Arc::new(session),
            metrics,
        }
    }
}
