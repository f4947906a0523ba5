//! Built-in health responders and runtime diagnostics.

use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::json;

pub const PPROF_INDEX_PATH: &str = "/debug/pprof/";
pub const PPROF_CMDLINE_PATH: &str = "/debug/pprof/cmdline";
pub const PPROF_RUNTIME_PATH: &str = "/debug/pprof/runtime";
/// CPU profile. Served on unix only.
pub const PPROF_PROFILE_PATH: &str = "/debug/pprof/profile";

/// Default responder for health, readiness and metrics: an empty 200.
pub async fn ok() -> impl IntoResponse {
    (StatusCode::OK, [(header::X_CONTENT_TYPE_OPTIONS, "nosniff")])
}

/// Diagnostic routes under `/debug/pprof/`.
pub fn diagnostics_router() -> Router {
    let router = Router::new()
        .route(PPROF_INDEX_PATH, get(index))
        .route(PPROF_CMDLINE_PATH, get(cmdline))
        .route(PPROF_RUNTIME_PATH, get(runtime));

    #[cfg(unix)]
    let router = router.route(PPROF_PROFILE_PATH, get(cpu::profile));

    router
}

async fn index() -> impl IntoResponse {
    let profile = if cfg!(unix) {
        format!("{PPROF_PROFILE_PATH}\tCPU profile (pprof protobuf), ?seconds=N, default 30\n")
    } else {
        String::new()
    };
    let body = format!(
        "Available profiles:\n\n\
         {PPROF_CMDLINE_PATH}\tcommand line of the running process\n\
         {PPROF_RUNTIME_PATH}\tasync runtime statistics (JSON)\n\
         {profile}"
    );
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        body,
    )
}

/// NUL-separated process arguments.
async fn cmdline() -> impl IntoResponse {
    let args: Vec<String> = std::env::args().collect();
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        args.join("\0"),
    )
}

async fn runtime() -> impl IntoResponse {
    let metrics = tokio::runtime::Handle::current().metrics();
    axum::Json(json!({
        "pid": std::process::id(),
        "workers": metrics.num_workers(),
        "alive_tasks": metrics.num_alive_tasks(),
    }))
}

#[cfg(unix)]
mod cpu {
    use std::time::Duration;

    use axum::extract::Query;
    use axum::http::{StatusCode, header};
    use axum::response::{IntoResponse, Response};
    use pprof::protos::Message;
    use serde::Deserialize;
    use tracing::{error, info};

    const DEFAULT_PROFILE_SECONDS: u64 = 30;
    const SAMPLE_FREQUENCY_HZ: i32 = 100;

    #[derive(Debug, Deserialize)]
    pub struct ProfileParams {
        pub seconds: Option<u64>,
    }

    /// Sample the whole process for `seconds` and return an uncompressed
    /// pprof protobuf, readable with `go tool pprof`.
    pub async fn profile(Query(params): Query<ProfileParams>) -> Response {
        let seconds = match params.seconds {
            Some(0) | None => DEFAULT_PROFILE_SECONDS,
            Some(n) => n,
        };
        info!(seconds, "cpu profile requested");

        let sampled = tokio::task::spawn_blocking(move || sample(Duration::from_secs(seconds))).await;
        match sampled {
            Ok(Ok(body)) => (
                [
                    (header::CONTENT_TYPE, "application/octet-stream"),
                    (header::CONTENT_DISPOSITION, "attachment; filename=\"profile\""),
                    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
                ],
                body,
            )
                .into_response(),
            Ok(Err(message)) => {
                error!(error = %message, "cpu profile failed");
                failure(message)
            }
            Err(e) => {
                error!(error = %e, "cpu profile task failed");
                failure(e.to_string())
            }
        }
    }

    fn sample(duration: Duration) -> Result<Vec<u8>, String> {
        let guard = pprof::ProfilerGuardBuilder::default()
            .frequency(SAMPLE_FREQUENCY_HZ)
            .blocklist(&["libc", "libgcc", "pthread", "vdso"])
            .build()
            .map_err(|e| format!("could not enable CPU profiling: {e}"))?;

        std::thread::sleep(duration);

        let report = guard
            .report()
            .build()
            .map_err(|e| format!("could not build CPU profile: {e}"))?;
        let profile = report
            .pprof()
            .map_err(|e| format!("could not convert CPU profile: {e}"))?;

        let mut body = Vec::new();
        profile
            .encode(&mut body)
            .map_err(|e| format!("could not encode CPU profile: {e}"))?;
        Ok(body)
    }

    fn failure(message: String) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            ],
            message,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::http::server::HttpServer;
    use crate::http::testing::{local_options, spawn_server};

    #[tokio::test]
    async fn test_diagnostics_endpoints() {
        let server = Arc::new(HttpServer::new(local_options()));
        let stop = CancellationToken::new();
        let (addr, handle) = spawn_server(server, stop.clone()).await;

        let index = reqwest::get(format!("http://{addr}{PPROF_INDEX_PATH}"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(index.contains(PPROF_CMDLINE_PATH));

        let cmdline = reqwest::get(format!("http://{addr}{PPROF_CMDLINE_PATH}"))
            .await
            .unwrap();
        assert_eq!(cmdline.status(), StatusCode::OK);
        assert!(!cmdline.text().await.unwrap().is_empty());

        let runtime: serde_json::Value = reqwest::get(format!("http://{addr}{PPROF_RUNTIME_PATH}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(runtime["pid"], std::process::id());
        assert!(runtime["workers"].as_u64().unwrap() >= 1);

        stop.cancel();
        handle.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cpu_profile_returns_pprof_payload() {
        let server = Arc::new(HttpServer::new(local_options()));
        let stop = CancellationToken::new();
        let (addr, handle) = spawn_server(server, stop.clone()).await;

        let index = reqwest::get(format!("http://{addr}{PPROF_INDEX_PATH}"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(index.contains(PPROF_PROFILE_PATH));

        let resp = reqwest::get(format!("http://{addr}{PPROF_PROFILE_PATH}?seconds=1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/octet-stream");
        assert!(!resp.bytes().await.unwrap().is_empty());

        stop.cancel();
        handle.await.unwrap().unwrap();
    }
}
