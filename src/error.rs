//! Error types for the session DB MCP server.
//!
//! This module defines all error types using `thiserror`. The variants mirror
//! the failure modes of the connection session: no handle for the current
//! database, unknown database, failed connect/verify, failed switch, and the
//! catch-all driver error that the hint table in [`crate::hints`] decorates.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error(
        "Not connected to database '{database}'. Use the connect tool to establish a connection first."
    )]
    NotConnected { database: String },

    #[error("Database '{database}' does not exist or is not connected")]
    UnknownDatabase { database: String },

    #[error("Failed to connect to database: {message}")]
    ConnectionFailed { message: String },

    #[error("Failed to switch to database '{expected}', current database is still '{actual}'")]
    SwitchFailed { expected: String, actual: String },

    #[error("Database '{database}' was created, but switching to it failed: {reason}")]
    CreatedButNotSwitched { database: String, reason: String },

    #[error("{message}")]
    Driver {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a not-connected error for the given database name.
    pub fn not_connected(database: impl Into<String>) -> Self {
        Self::NotConnected {
            database: database.into(),
        }
    }

    /// Create an unknown database error.
    pub fn unknown_database(database: impl Into<String>) -> Self {
        Self::UnknownDatabase {
            database: database.into(),
        }
    }

    /// Create a connection failure carrying the underlying cause.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    /// Create a switch failure: the post-condition `current == expected` did not hold.
    pub fn switch_failed(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::SwitchFailed {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn created_but_not_switched(database: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CreatedButNotSwitched {
            database: database.into(),
            reason: reason.into(),
        }
    }

    /// Create a driver error with optional SQL state.
    pub fn driver(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Driver {
            message: message.into(),
            sql_state,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// SQLSTATE reported by the server, if this is a driver error that carried one.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Driver { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// True for errors that mean the caller has to (re)connect before retrying.
    pub fn requires_connect(&self) -> bool {
        matches!(
            self,
            Self::NotConnected { .. } | Self::ConnectionFailed { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::driver(db_err.message(), code)
            }
            sqlx::Error::Configuration(msg) => {
                DbError::connection_failed(format!("invalid connection configuration: {}", msg))
            }
            sqlx::Error::Io(io_err) => DbError::connection_failed(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => {
                DbError::connection_failed(format!("TLS error: {}", tls_err))
            }
            sqlx::Error::Protocol(msg) => {
                DbError::connection_failed(format!("protocol error: {}", msg))
            }
            sqlx::Error::PoolTimedOut => {
                DbError::connection_failed("timed out waiting for the database connection")
            }
            sqlx::Error::PoolClosed => DbError::connection_failed("the connection is closed"),
            sqlx::Error::RowNotFound => DbError::driver("No rows returned", None),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::driver(format!("Type not found: {}", type_name), None)
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::driver(format!("Column '{}' does not exist in the result", col), None)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            other => DbError::internal(format!("Unknown database error: {}", other)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Convert DbError to MCP ErrorData for the few paths that fail at protocol level
/// (resource reads, argument validation).
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        match &err {
            DbError::InvalidInput { .. } => rmcp::ErrorData::invalid_params(err.to_string(), None),
            DbError::NotConnected { .. } | DbError::UnknownDatabase { .. } => {
                rmcp::ErrorData::resource_not_found(err.to_string(), None)
            }
            DbError::Driver { sql_state, .. } => {
                let data = sql_state
                    .as_ref()
                    .map(|code| serde_json::json!({ "sql_state": code }));
                rmcp::ErrorData::internal_error(err.to_string(), data)
            }
            _ => rmcp::ErrorData::internal_error(err.to_string(), None),
        }
    }
}
