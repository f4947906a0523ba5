//! Parley prompt relay service.
//!
//! Binary name: `parley`
//!
//! Loads configuration, builds the conversation session against the
//! configured chat-completions endpoint, then serves `/prompt` until Ctrl+C
//! or SIGTERM.

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use parley_core::llm::box_source::BoxCompletionSource;
use parley_core::session::ConversationSession;
use parley_infra::llm::openai_compat::OpenAiChatSource;
use parley_observe::tracing_setup::{init_tracing, shutdown_tracing};

use parley_api::config::{Cli, Config};
use parley_api::http;
use parley_api::http::server::StopReport;
use parley_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse()
        .into_config()
        .context("invalid configuration")?;

    init_tracing(&config.tracing)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(config).await;
    if let Err(e) = &result {
        error!("parley exited with an error: {e:#}");
    }
    shutdown_tracing();
    result
}

async fn run(config: Config) -> anyhow::Result<()> {
    let options = config.server_options();
    let metrics = parley_api::metrics::install().context("failed to install metrics recorder")?;
    let source = OpenAiChatSource::new(config.api_key, config.api_url)
        .context("failed to build upstream client")?;
    let session = ConversationSession::new(BoxCompletionSource::new(source), config.session)
        .context("failed to create conversation session")?;

    let server = http::prompt_server(options, AppState::new(session, metrics))?;

    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            shutdown_signal().await;
            stop.cancel();
        }
    });

    match server.start(stop).await? {
        StopReport::Forced => info!("stopped after closing lingering connections"),
        report => info!(?report, "stopped"),
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed the error is logged and that signal is
/// never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
