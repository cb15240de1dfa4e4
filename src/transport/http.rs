//! Streamable HTTP transport.
//!
//! Every HTTP session gets its own `DbService`, but all of them share the
//! one connection session of the process.

use crate::db::PgConnector;
use crate::error::{DbError, DbResult};
use crate::mcp::DbService;
use crate::session::SessionManager;
use crate::transport::{Transport, wait_for_signal};
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// How long open streams may keep the server alive after a shutdown signal.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTransport {
    session: Arc<SessionManager<PgConnector>>,
    host: String,
    port: u16,
    /// MCP endpoint path
    endpoint: String,
}

impl HttpTransport {
    pub fn new(
        session: Arc<SessionManager<PgConnector>>,
        host: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            session,
            host: host.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Router serving MCP at the configured endpoint.
    pub fn router(&self) -> axum::Router {
        let session = self.session.clone();
        let service = StreamableHttpService::new(
            move || Ok(DbService::new(session.clone())),
            LocalSessionManager::default().into(),
            Default::default(),
        );

        // nest_service rejects "/"
        match self.endpoint.as_str() {
            "/" => axum::Router::new().fallback_service(service),
            path => axum::Router::new().nest_service(path, service),
        }
    }
}

/// Resolves once a shutdown was requested and then either the grace period
/// ran out or a second signal arrived.
async fn forced_shutdown(requested: Arc<Notify>) {
    requested.notified().await;
    info!(
        timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
        "Waiting for connections to close (send signal again to force exit)..."
    );
    tokio::select! {
        _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => warn!("Graceful shutdown timeout, forcing exit"),
        _ = wait_for_signal() => warn!("Received second signal, forcing immediate exit"),
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!(bind = %bind_addr, "Starting MCP server with HTTP transport");

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::internal(format!(
                "Failed to bind to {}: {}. Check that the port is available.",
                bind_addr, e
            ))
        })?;
        info!(endpoint = %self.endpoint, "MCP endpoint ready");

        let requested = Arc::new(Notify::new());
        let signal_requested = requested.clone();
        let server = axum::serve(listener, self.router()).with_graceful_shutdown(async move {
            wait_for_signal().await;
            signal_requested.notify_one();
        });

        let outcome = tokio::select! {
            result = server => result.map_err(|e| {
                error!(error = %e, "HTTP server error");
                DbError::internal(format!("HTTP server error: {}", e))
            }),
            _ = forced_shutdown(requested) => Ok(()),
        };

        info!("Closing database connections");
        self.session.close_all().await;
        if outcome.is_ok() {
            info!("HTTP server stopped");
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
