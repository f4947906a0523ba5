//! HTTP service lifecycle: route registration, serving, and shutdown.
//!
//! [`HttpServer`] is started at most once. After the stop token fires it
//! stops accepting, asks every open connection to finish its in-flight
//! request, and waits up to [`ServerOptions::shutdown_timeout`]. Connections
//! still open after that are closed forcibly.
//!
//! Connections are driven by hand with `hyper-util` rather than
//! `axum::serve`, since the forced phase needs to drop individual
//! connections.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::pin;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use axum::Router;
use axum::routing::{MethodRouter, get};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use parley_types::config::DEFAULT_PORT;

use super::diagnostics;

/// Grace period for in-flight requests once shutdown begins.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request API timeout. Reserved, see [`ServerOptions::http_api_timeout`].
pub const DEFAULT_HTTP_API_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed `accept` (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub const HEALTH_PATH: &str = "/health";
pub const READY_PATH: &str = "/ready";
pub const METRICS_PATH: &str = "/metrics";

/// Patterns the server always serves. Registering one of them is a conflict.
const BUILTIN_ROUTES: [&str; 7] = [
    HEALTH_PATH,
    READY_PATH,
    METRICS_PATH,
    diagnostics::PPROF_INDEX_PATH,
    diagnostics::PPROF_CMDLINE_PATH,
    diagnostics::PPROF_RUNTIME_PATH,
    diagnostics::PPROF_PROFILE_PATH,
];

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("route '{0}' is already registered")]
    RouteConflict(String),

    #[error("invalid route pattern '{0}': must start with '/'")]
    InvalidPattern(String),

    #[error("routes cannot be registered once the server has started")]
    AlreadyStarted,

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("http server stopped unexpectedly: {0}")]
    Serve(String),

    #[error("failed to shut down http server: {0}")]
    Shutdown(String),
}

/// How a call to [`HttpServer::start`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReport {
    /// Another call already started this server; nothing was done.
    AlreadyStarted,
    /// Every connection finished within the shutdown timeout.
    Graceful,
    /// The shutdown timeout elapsed and remaining connections were closed.
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unstarted,
    Running,
    Stopped,
}

impl ServerState {
    const fn as_u8(self) -> u8 {
        match self {
            ServerState::Unstarted => 0,
            ServerState::Running => 1,
            ServerState::Stopped => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Unstarted,
            1 => ServerState::Running,
            _ => ServerState::Stopped,
        }
    }
}

/// Listener address, timeouts, and the built-in responders.
#[derive(Clone)]
pub struct ServerOptions {
    pub host: IpAddr,
    pub port: u16,
    /// Reserved per-request timeout. Not applied to routes: a relayed
    /// completion may legitimately stream for longer.
    pub http_api_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub health: MethodRouter,
    pub ready: MethodRouter,
    pub metrics: MethodRouter,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            http_api_timeout: DEFAULT_HTTP_API_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            health: get(diagnostics::ok),
            ready: get(diagnostics::ok),
            metrics: get(diagnostics::ok),
        }
    }
}

impl ServerOptions {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn with_health(mut self, responder: MethodRouter) -> Self {
        self.health = responder;
        self
    }

    pub fn with_ready(mut self, responder: MethodRouter) -> Self {
        self.ready = responder;
        self
    }

    pub fn with_metrics(mut self, responder: MethodRouter) -> Self {
        self.metrics = responder;
        self
    }
}

/// A start-once HTTP server.
pub struct HttpServer {
    options: ServerOptions,
    state: AtomicU8,
    routes: DashMap<String, MethodRouter>,
    /// Held while registering and while leaving `Unstarted`, so a route
    /// is either in the served router or rejected.
    registration: Mutex<()>,
    local_addr: OnceLock<SocketAddr>,
}

impl HttpServer {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            state: AtomicU8::new(ServerState::Unstarted.as_u8()),
            routes: DashMap::new(),
            registration: Mutex::new(()),
            local_addr: OnceLock::new(),
        }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Address actually bound, once listening. Differs from the configured
    /// address when port 0 was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Attach `handler` to `pattern`.
    ///
    /// The first registration for a pattern wins; later ones are rejected
    /// and leave the existing handler in place.
    pub fn register_route(&self, pattern: &str, handler: MethodRouter) -> Result<(), ServerError> {
        let _gate = self.registration.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state() != ServerState::Unstarted {
            return Err(ServerError::AlreadyStarted);
        }
        if !pattern.starts_with('/') {
            return Err(ServerError::InvalidPattern(pattern.to_string()));
        }
        if BUILTIN_ROUTES.contains(&pattern) {
            warn!(pattern, "route collides with a built-in route");
            return Err(ServerError::RouteConflict(pattern.to_string()));
        }

        match self.routes.entry(pattern.to_string()) {
            Entry::Occupied(_) => {
                warn!(pattern, "route already registered");
                Err(ServerError::RouteConflict(pattern.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(handler);
                debug!(pattern, "route registered");
                Ok(())
            }
        }
    }

    /// Serve until `stop` is cancelled, then shut down.
    ///
    /// Only the first call does anything; concurrent or later calls return
    /// [`StopReport::AlreadyStarted`] immediately. A bind failure returns
    /// the server to the unstarted state.
    pub async fn start(&self, stop: CancellationToken) -> Result<StopReport, ServerError> {
        let claimed = {
            let _gate = self.registration.lock().unwrap_or_else(PoisonError::into_inner);
            self.state
                .compare_exchange(
                    ServerState::Unstarted.as_u8(),
                    ServerState::Running.as_u8(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        };
        if !claimed {
            debug!("http server already started");
            return Ok(StopReport::AlreadyStarted);
        }

        let addr = self.options.addr();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                error!(%addr, error = %source, "failed to bind http listener");
                self.state
                    .store(ServerState::Unstarted.as_u8(), Ordering::Release);
                return Err(ServerError::Listen { addr, source });
            }
        };
        let bound = listener.local_addr().unwrap_or(addr);
        let _ = self.local_addr.set(bound);

        let router = self.build_router();
        let draining = CancellationToken::new();
        let closing = CancellationToken::new();
        let connections = TaskTracker::new();

        let mut acceptor = tokio::spawn(accept_loop(
            listener,
            router,
            draining.clone(),
            closing.clone(),
            connections.clone(),
        ));
        info!(addr = %bound, "http server listening");

        let result = tokio::select! {
            _ = stop.cancelled() => {
                info!("stop requested, shutting down http server");
                self.shutdown(acceptor, draining, closing, connections).await
            }
            joined = &mut acceptor => {
                // The accept loop only returns after draining begins, so this is a panic.
                let reason = match joined {
                    Ok(()) => "accept loop exited".to_string(),
                    Err(e) => e.to_string(),
                };
                error!(%reason, "http server stopped unexpectedly");
                closing.cancel();
                connections.close();
                connections.wait().await;
                Err(ServerError::Serve(reason))
            }
        };

        self.state
            .store(ServerState::Stopped.as_u8(), Ordering::Release);
        result
    }

    fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route(HEALTH_PATH, self.options.health.clone())
            .route(READY_PATH, self.options.ready.clone())
            .route(METRICS_PATH, self.options.metrics.clone())
            .merge(diagnostics::diagnostics_router());

        for entry in self.routes.iter() {
            router = router.route(entry.key(), entry.value().clone());
        }

        router.layer(TraceLayer::new_for_http())
    }

    async fn shutdown(
        &self,
        acceptor: JoinHandle<()>,
        draining: CancellationToken,
        closing: CancellationToken,
        connections: TaskTracker,
    ) -> Result<StopReport, ServerError> {
        draining.cancel();
        // Only the deadline escalates to forced closure. Connections already
        // accepted are left to finish on their own.
        if let Err(e) = acceptor.await {
            error!(error = %e, "accept loop failed during shutdown");
            connections.close();
            return Err(ServerError::Shutdown(e.to_string()));
        }

        connections.close();
        let timeout = self.options.shutdown_timeout;
        match tokio::time::timeout(timeout, connections.wait()).await {
            Ok(()) => {
                info!("http server shut down");
                Ok(StopReport::Graceful)
            }
            Err(_) => {
                warn!(
                    ?timeout,
                    open_connections = connections.len(),
                    "shutdown timeout exceeded, closing http server"
                );
                closing.cancel();
                connections.wait().await;
                Ok(StopReport::Forced)
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    draining: CancellationToken,
    closing: CancellationToken,
    connections: TaskTracker,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = draining.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };

        connections.spawn(serve_connection(
            stream,
            peer,
            router.clone(),
            draining.clone(),
            closing.clone(),
        ));
    }
    debug!("http listener closed");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    draining: CancellationToken,
    closing: CancellationToken,
) {
    let builder = auto::Builder::new(TokioExecutor::new());
    let service = TowerToHyperService::new(router);
    let mut conn = pin!(builder.serve_connection_with_upgrades(TokioIo::new(stream), service));
    let mut drain_requested = false;

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(%peer, error = %e, "connection ended with error");
                }
                break;
            }
            _ = draining.cancelled(), if !drain_requested => {
                drain_requested = true;
                conn.as_mut().graceful_shutdown();
            }
            _ = closing.cancelled() => {
                debug!(%peer, "closing connection");
                break;
            }
        }
    }
}
