//! `/metrics` in the Prometheus text exposition format.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::state::AppState;

pub async fn render(State(state): State<AppState>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/plain; version=0.0.4"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        state.metrics.render(),
    )
}
