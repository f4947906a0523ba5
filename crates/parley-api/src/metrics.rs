//! Prometheus recorder and the prompt service's metric names.

use std::sync::{Mutex, PoisonError};

use metrics::{counter, describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use parley_core::relay::{RelayOutcome, RelayReport};
use parley_core::session::HISTORY_TURNS_GAUGE;

pub const PROMPTS_SERVED_TOTAL: &str = "parley_prompts_served_total";
pub const PROMPT_ESTABLISH_FAILURES_TOTAL: &str = "parley_prompt_establish_failures_total";
pub const PROMPT_STREAM_FAILURES_TOTAL: &str = "parley_prompt_stream_failures_total";
pub const FRAGMENTS_DROPPED_TOTAL: &str = "parley_fragments_dropped_total";

/// Install the process-wide Prometheus recorder and return a handle for
/// rendering it.
///
/// Only the first call installs; later calls return the same handle.
pub fn install() -> Result<PrometheusHandle, BuildError> {
    static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

    let mut slot = HANDLE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    *slot = Some(handle.clone());
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(PROMPTS_SERVED_TOTAL, "Prompts answered with status 200");
    describe_counter!(
        PROMPT_ESTABLISH_FAILURES_TOTAL,
        "Prompts whose upstream stream could not be opened"
    );
    describe_counter!(
        PROMPT_STREAM_FAILURES_TOTAL,
        "Prompts whose upstream stream failed after opening"
    );
    describe_counter!(
        FRAGMENTS_DROPPED_TOTAL,
        "Relayed fragments the consumer did not take in time"
    );
    describe_gauge!(HISTORY_TURNS_GAUGE, "Committed dialogue turns");
}

pub struct PromptMetrics;

impl PromptMetrics {
    pub fn record_served() {
        counter!(PROMPTS_SERVED_TOTAL).increment(1);
    }

    pub fn record_establish_failure() {
        counter!(PROMPT_ESTABLISH_FAILURES_TOTAL).increment(1);
    }

    /// Fold in what a finished relay task reported.
    pub fn record_relay(report: &RelayReport) {
        if matches!(report.outcome, RelayOutcome::Failed(_)) {
            counter!(PROMPT_STREAM_FAILURES_TOTAL).increment(1);
        }
        counter!(FRAGMENTS_DROPPED_TOTAL).increment(report.dropped as u64);
    }
}
