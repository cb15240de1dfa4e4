//! Session database MCP server - main entry point.

use clap::Parser;
use session_db_mcp::config::{Config, TransportMode};
use session_db_mcp::db::{PgConnector, TLS_SUPPORT};
use session_db_mcp::session::SessionManager;
use session_db_mcp::transport::{HttpTransport, StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber. Logs go to stderr so they never mix
/// with the stdio protocol stream.
fn init_tracing(config: &Config) {
    if !config.enable_logs {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!(
        transport = %config.transport,
        "Starting session database MCP server v{}",
        env!("CARGO_PKG_VERSION")
    );
    if TLS_SUPPORT {
        warn!("TLS certificates of database servers are not verified");
    } else {
        warn!("Built without a TLS backend; servers that require TLS will refuse connections");
    }

    let defaults = config.connection_parameters();
    info!(defaults = %defaults.redacted(), "Connection defaults");

    let session = Arc::new(SessionManager::new(PgConnector::new(), defaults));
    info!("One connection session is shared by every client of this process");

    if config.connect_on_start {
        match session.establish(None, None).await {
            Ok(summary) => info!("{}", summary),
            Err(e) => warn!(error = %e, "Initial connection failed; use the connect tool"),
        }
    }

    let result = match config.transport {
        TransportMode::Stdio => {
            info!("Using stdio transport");
            StdioTransport::new(session).run().await
        }
        TransportMode::Http => {
            info!(
                bind = %config.http_bind_addr(),
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            HttpTransport::new(
                session,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            )
            .run()
            .await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
