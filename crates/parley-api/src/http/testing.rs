//! Helpers shared by the HTTP tests.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::server::{HttpServer, ServerError, ServerOptions, StopReport};

/// Loopback, ephemeral port, short shutdown timeout.
pub fn local_options() -> ServerOptions {
    ServerOptions {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        shutdown_timeout: Duration::from_secs(5),
        ..ServerOptions::default()
    }
}

/// Start `server` in the background and wait until it is listening.
pub async fn spawn_server(
    server: Arc<HttpServer>,
    stop: CancellationToken,
) -> (SocketAddr, JoinHandle<Result<StopReport, ServerError>>) {
    let handle = tokio::spawn({
        let server = server.clone();
        async move { server.start(stop).await }
    });

    let addr = loop {
        if let Some(addr) = server.local_addr() {
            break addr;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    (addr, handle)
}

/// An upstream chat-completions stub answering every POST with `status`
/// and `body` as an event stream. Returns its completions URL.
pub async fn stub_upstream(status: u16, body: &'static str) -> String {
    use axum::body::Body;
    use axum::http::{StatusCode, header};
    use axum::response::Response;
    use axum::routing::post;

    let app = axum::Router::new().route(
        "/v1/chat/completions",
        post(move || async move {
            Response::builder()
                .status(StatusCode::from_u16(status).unwrap())
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from(body))
                .unwrap()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1/chat/completions")
}

/// Application state whose session talks to `endpoint`.
pub fn app_state(endpoint: String) -> crate::state::AppState {
    use parley_core::llm::box_source::BoxCompletionSource;
    use parley_core::session::{ConversationSession, SessionSettings};
    use parley_infra::llm::openai_compat::OpenAiChatSource;
    use secrecy::SecretString;

    let metrics = crate::metrics::install().unwrap();
    let source = OpenAiChatSource::new(SecretString::from("sk-test"), endpoint).unwrap();
    let session = ConversationSession::new(
        BoxCompletionSource::new(source),
        SessionSettings {
            instruction_text: Some("answer tersely".to_string()),
            ..SessionSettings::default()
        },
    )
    .unwrap();
    crate::state::AppState::new(session, metrics)
}

/// Start the full prompt service for `state` on a loopback port.
pub async fn spawn_app(
    state: crate::state::AppState,
) -> (SocketAddr, CancellationToken, JoinHandle<Result<StopReport, ServerError>>) {
    let server = Arc::new(super::prompt_server(local_options(), state).unwrap());
    let stop = CancellationToken::new();
    let (addr, handle) = spawn_server(server, stop.clone()).await;
    (addr, stop, handle)
}
