//! PostgreSQL implementation of the driver seam.
//!
//! Each [`PgHandle`] wraps a sqlx pool capped at a single connection, so a
//! handle is one sticky server session that can be cloned freely.

use crate::db::handle::{Connector, DatabaseHandle, JsonRow};
use crate::db::params::QueryParam;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::session::{ConnectTarget, Endpoint};
use futures_util::TryStreamExt;
use sqlx::PgPool;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgSslMode};
use std::str::FromStr;
use tracing::{debug, info};

/// Whether a TLS backend is compiled in. Without one, servers that require
/// TLS refuse every connection.
pub const TLS_SUPPORT: bool = cfg!(any(feature = "tls-rustls", feature = "tls-native"));

/// PostgreSQL's limit on identifier length, in bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Canary: which database does the server think this session is on.
const CURRENT_DATABASE_SQL: &str = "SELECT current_database()";
const DATABASE_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)";
const LIST_DATABASES_SQL: &str =
    "SELECT datname FROM pg_database WHERE NOT datistemplate ORDER BY datname";

/// Opens [`PgHandle`]s.
#[derive(Debug, Clone, Default)]
pub struct PgConnector;

impl PgConnector {
    pub fn new() -> Self {
        Self
    }

    /// Translate a resolved target into sqlx connect options.
    pub fn connect_options(target: &ConnectTarget) -> DbResult<PgConnectOptions> {
        let options = match &target.endpoint {
            Endpoint::Dsn { url, tls_requested } => {
                let options = PgConnectOptions::from_str(url.as_str())?;
                if !target.accept_invalid_certs {
                    options
                } else if *tls_requested {
                    options.ssl_mode(PgSslMode::Require)
                } else {
                    options.ssl_mode(PgSslMode::Prefer)
                }
            }
            Endpoint::Instance { host, port } => {
                let options = PgConnectOptions::new().host(host);
                let options = match port {
                    Some(port) => options.port(*port),
                    None => options,
                };
                options.ssl_mode(PgSslMode::Prefer)
            }
            Endpoint::Environment => PgConnectOptions::new().ssl_mode(PgSslMode::Prefer),
        };

        Ok(options.database(&target.database))
    }

    /// One backend connection that is never reaped or recycled, so session
    /// state (`SET`, temp tables) lives as long as the handle. A dropped
    /// connection is left for the canary to report.
    pub fn pool_options() -> PgPoolOptions {
        PgPoolOptions::new()
            .min_connections(0)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .test_before_acquire(false)
    }
}

impl Connector for PgConnector {
    type Handle = PgHandle;

    async fn connect(&self, target: &ConnectTarget) -> DbResult<PgHandle> {
        if !TLS_SUPPORT && matches!(target.endpoint, Endpoint::Dsn { tls_requested: true, .. }) {
            return Err(DbError::connection_failed(
                "the DSN requires TLS but this build has no TLS backend (enable the tls-rustls or tls-native feature)",
            ));
        }
        let options = Self::connect_options(target)?;
        debug!(
            host = %options.get_host(),
            port = options.get_port(),
            database = %target.database,
            "Opening connection"
        );

        let pool = Self::pool_options()
            .connect_with(options)
            .await
            .map_err(|e| DbError::connection_failed(e.to_string()))?;

        info!(database = %target.database, "Connection opened");
        Ok(PgHandle { pool })
    }
}

/// A single-connection session bound to one database.
#[derive(Debug, Clone)]
pub struct PgHandle {
    pool: PgPool,
}

impl DatabaseHandle for PgHandle {
    async fn current_database(&self) -> DbResult<String> {
        let name: String = sqlx::query_scalar(CURRENT_DATABASE_SQL)
            .fetch_one(&self.pool)
            .await?;
        Ok(name)
    }

    async fn database_exists(&self, name: &str) -> DbResult<bool> {
        let exists: bool = sqlx::query_scalar(DATABASE_EXISTS_SQL)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn list_databases(&self) -> DbResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(LIST_DATABASES_SQL)
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn create_database(&self, name: &str) -> DbResult<()> {
        use sqlx::Executor;
        let sql = format!("CREATE DATABASE {}", quote_identifier(name)?);
        (&self.pool).execute(sql.as_str()).await?;
        Ok(())
    }

    async fn query(&self, sql: &str) -> DbResult<Vec<JsonRow>> {
        // Unparameterized SQL goes through the simple query protocol, which
        // also allows several statements in one call.
        use sqlx::Executor;
        let rows: Vec<_> = (&self.pool).fetch(sql).try_collect().await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    async fn query_with_params(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        if params.is_empty() {
            return self.query(sql).await;
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    async fn close(&self) -> DbResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(sqlx::types::Json(v)),
    }
}

/// Quote `name` as a PostgreSQL identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> DbResult<String> {
    if name.is_empty() {
        return Err(DbError::invalid_input("Identifier cannot be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(DbError::invalid_input(format!(
            "Identifier '{}' is longer than {} bytes",
            name, MAX_IDENTIFIER_LEN
        )));
    }
    if name.contains('\0') {
        return Err(DbError::invalid_input("Identifier cannot contain NUL characters"));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a possibly schema-qualified name (`schema.table`).
pub fn quote_qualified(name: &str) -> DbResult<String> {
    match name.split_once('.') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => Ok(format!(
            "{}.{}",
            quote_identifier(schema)?,
            quote_identifier(table)?
        )),
        _ => quote_identifier(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionParameters;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("reports").unwrap(), "\"reports\"");
        assert_eq!(quote_identifier("we\"ird").unwrap(), "\"we\"\"ird\"");
        assert!(quote_identifier("").is_err());
        assert!(quote_identifier(&"x".repeat(64)).is_err());
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(quote_qualified("public.users").unwrap(), "\"public\".\"users\"");
        assert_eq!(quote_qualified("users").unwrap(), "\"users\"");
    }

    #[test]
    fn test_connect_options_from_dsn() {
        let params = ConnectionParameters::new(
            Some("postgres://alice:pw@db.internal:6543/main".into()),
            None,
        );
        let target = params.resolve("reports").unwrap();
        let options = PgConnector::connect_options(&target).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("reports"));
        assert_eq!(options.get_username(), "alice");
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Prefer));
    }

    #[test]
    fn test_connect_options_keep_tls_but_skip_verification() {
        let params = ConnectionParameters::new(
            Some("postgres://db.internal/main?sslmode=verify-full".into()),
            None,
        );
        let target = params.resolve("main").unwrap();
        let options = PgConnector::connect_options(&target).unwrap();
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Require));
    }

    #[cfg(feature = "tls-rustls")]
    #[test]
    fn test_default_build_has_tls() {
        assert!(TLS_SUPPORT);
    }

    #[cfg(not(any(feature = "tls-rustls", feature = "tls-native")))]
    #[tokio::test]
    async fn test_tls_dsn_fails_fast_without_backend() {
        let params = ConnectionParameters::new(
            Some("postgres://db.internal/main?sslmode=require".into()),
            None,
        );
        let target = params.resolve("main").unwrap();
        let err = PgConnector::new().connect(&target).await.unwrap_err();
        assert!(err.to_string().contains("no TLS backend"));
    }

    #[test]
    fn test_pool_keeps_one_connection_for_life() {
        let options = PgConnector::pool_options();
        assert_eq!(options.get_max_connections(), 1);
        assert_eq!(options.get_idle_timeout(), None);
        assert_eq!(options.get_max_lifetime(), None);
        assert!(!options.get_test_before_acquire());
    }

    #[test]
    fn test_connect_options_from_instance() {
        let params = ConnectionParameters::new(None, Some("db.local:5433".into()));
        let target = params.resolve("main").unwrap();
        let options = PgConnector::connect_options(&target).unwrap();
        assert_eq!(options.get_host(), "db.local");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("main"));
    }
}
