//! Connection parameters and the resolved target of a connection attempt.

use crate::error::{DbError, DbResult};
use url::Url;

/// Database name used when a connect request does not name one.
pub const DEFAULT_DATABASE: &str = "main";

/// Where new connections go: a DSN, or a named instance.
///
/// Empty strings are treated as absent. When both are present the DSN wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub dsn: Option<String>,
    pub instance: Option<String>,
}

impl ConnectionParameters {
    pub fn new(dsn: Option<String>, instance: Option<String>) -> Self {
        Self {
            dsn: non_empty(dsn),
            instance: non_empty(instance),
        }
    }

    /// True when neither field is set.
    pub fn is_empty(&self) -> bool {
        self.dsn.is_none() && self.instance.is_none()
    }

    /// Overlay `self` on `previous`: fields set here win, absent fields keep
    /// the previous value.
    pub fn merged_over(&self, previous: &ConnectionParameters) -> ConnectionParameters {
        ConnectionParameters {
            dsn: non_empty(self.dsn.clone()).or_else(|| previous.dsn.clone()),
            instance: non_empty(self.instance.clone()).or_else(|| previous.instance.clone()),
        }
    }

    /// Build the target for connecting to `database` with these parameters.
    pub fn resolve(&self, database: &str) -> DbResult<ConnectTarget> {
        let endpoint = if let Some(dsn) = &self.dsn {
            let url = rewrite_dsn_database(dsn, database)?;
            let tls_requested = url.query_pairs().any(|(key, value)| {
                key == "sslmode" && matches!(value.as_ref(), "require" | "verify-ca" | "verify-full")
            });
            Endpoint::Dsn { url, tls_requested }
        } else if let Some(instance) = &self.instance {
            let (host, port) = parse_instance(instance)?;
            Endpoint::Instance { host, port }
        } else {
            Endpoint::Environment
        };

        Ok(ConnectTarget {
            endpoint,
            database: database.to_string(),
            accept_invalid_certs: true,
        })
    }

    /// Parameters safe to show in logs and status output.
    pub fn redacted(&self) -> String {
        match (&self.dsn, &self.instance) {
            (Some(dsn), _) => redact_dsn(dsn),
            (None, Some(instance)) => format!("instance {}", instance),
            (None, None) => "environment defaults".to_string(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Where a resolved connection attempt goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A `postgres://` style URL whose path already names the target database.
    Dsn { url: Url, tls_requested: bool },
    /// A server reached as `host[:port]`.
    Instance { host: String, port: Option<u16> },
    /// Nothing configured: the driver reads its standard environment
    /// variables (`PGHOST`, `PGPORT`, `PGUSER`, ...).
    Environment,
}

/// Everything a [`crate::db::Connector`] needs to open one handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub endpoint: Endpoint,
    /// Always passed to the driver explicitly, whatever the endpoint says.
    pub database: String,
    /// Server certificates are not verified. Kept as a field so the policy
    /// is visible where connections are opened.
    pub accept_invalid_certs: bool,
}

/// Replace the database component (the last path segment) of a DSN.
///
/// A DSN without a path gets `/<database>`.
pub fn rewrite_dsn_database(dsn: &str, database: &str) -> DbResult<Url> {
    let mut url = Url::parse(dsn)
        .map_err(|e| DbError::connection_failed(format!("invalid DSN: {}", e)))?;

    if url.cannot_be_a_base() {
        return Err(DbError::connection_failed(
            "invalid DSN: expected scheme://[user[:password]@]host[:port][/database]",
        ));
    }

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(&format!("/{}", database));
    } else {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| DbError::connection_failed("invalid DSN: path cannot be modified"))?;
        segments.pop_if_empty().pop().push(database);
    }

    Ok(url)
}

/// Interpret an instance name as `host[:port]`.
fn parse_instance(instance: &str) -> DbResult<(String, Option<u16>)> {
    let instance = instance.trim();
    match instance.rsplit_once(':') {
        // Bracketed IPv6 literal, optionally with a port
        _ if instance.starts_with('[') => match instance.rsplit_once("]:") {
            Some((host, port)) => Ok((host.trim_start_matches('[').to_string(), Some(parse_port(port)?))),
            None => Ok((instance.trim_matches(|c| c == '[' || c == ']').to_string(), None)),
        },
        Some((host, port)) if !host.contains(':') => Ok((host.to_string(), Some(parse_port(port)?))),
        _ => Ok((instance.to_string(), None)),
    }
}

fn parse_port(port: &str) -> DbResult<u16> {
    port.parse::<u16>()
        .map_err(|_| DbError::connection_failed(format!("invalid port in instance name: '{}'", port)))
}

/// Replace the password in a DSN with `***`.
pub fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable DSN>".to_string(),
    }
}
