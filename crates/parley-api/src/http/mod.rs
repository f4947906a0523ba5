pub mod diagnostics;
pub mod error;
pub mod handlers;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

use axum::routing::{get, post};

use crate::state::AppState;

use self::server::{HttpServer, ServerError, ServerOptions};

pub const PROMPT_PATH: &str = "/prompt";

/// Build the service: `/prompt` plus a metrics responder backed by `state`.
pub fn prompt_server(options: ServerOptions, state: AppState) -> Result<HttpServer, ServerError> {
    let options = options.with_metrics(get(handlers::metrics::render).with_state(state.clone()));
    let server = HttpServer::new(options);
    server.register_route(
        PROMPT_PATH,
        post(handlers::prompt::prompt).with_state(state),
    )?;
    Ok(server)
}
