//! `POST /prompt`: relay one question and return the aggregated answer.
//!
//! The request body is the question as plain text. The answer is collected
//! from the relay channel until a terminal fragment arrives. If the upstream
//! fails mid-stream, whatever was received so far is returned with the error
//! text appended, still with status 200.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use tracing::{debug, error};

use parley_core::relay::Relayed;
use parley_types::llm::Fragment;

use crate::http::error::AppError;
use crate::metrics::PromptMetrics;
use crate::state::AppState;

pub async fn prompt(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let question = String::from_utf8_lossy(&body);

    let Relayed {
        mut fragments,
        task,
    } = state.session.prompt(&question).await.map_err(|e| {
        PromptMetrics::record_establish_failure();
        AppError::from(e)
    })?;

    // The relay finishes on its own; only its report is of interest.
    tokio::spawn(async move {
        match task.await {
            Ok(report) => PromptMetrics::record_relay(&report),
            Err(e) => error!(error = %e, "relay task failed"),
        }
    });

    let mut answer = String::new();
    while let Some(fragment) = fragments.recv().await {
        match fragment {
            Fragment::Delta(text) => answer.push_str(&text),
            Fragment::EndOfStream => break,
            Fragment::Failed(e) => {
                error!(error = %e, "completion stream failed");
                answer.push_str(&e.to_string());
                break;
            }
        }
    }

    PromptMetrics::record_served();
    debug!(answer_chars = answer.chars().count(), "prompt answered");

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], answer))
}
