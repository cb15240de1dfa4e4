//! The seam between the session core and the database driver.
//!
//! The session registry and lifecycle controller only see these two traits.
//! [`crate::db::postgres`] implements them on top of sqlx; tests implement
//! them in memory.

use crate::db::params::QueryParam;
use crate::error::DbResult;
use crate::session::ConnectTarget;
use serde_json::{Map, Value as JsonValue};
use std::future::Future;

/// One result row, keyed by column name in column order.
pub type JsonRow = Map<String, JsonValue>;

/// A live connection bound to exactly one database.
///
/// Handles are cheap to clone; clones share the same underlying connection.
/// The registry entry owns the connection and is the only place that calls
/// [`DatabaseHandle::close`].
pub trait DatabaseHandle: Clone + Send + Sync + 'static {
    /// Ask the server which database this handle is connected to.
    ///
    /// Doubles as the liveness canary: a handle whose canary fails is stale.
    fn current_database(&self) -> impl Future<Output = DbResult<String>> + Send;

    /// Check whether a database with this exact name exists on the server.
    fn database_exists(&self, name: &str) -> impl Future<Output = DbResult<bool>> + Send;

    /// Names of all non-template databases, sorted.
    fn list_databases(&self) -> impl Future<Output = DbResult<Vec<String>>> + Send;

    fn create_database(&self, name: &str) -> impl Future<Output = DbResult<()>> + Send;

    /// Run a query without parameters and collect every row.
    fn query(&self, sql: &str) -> impl Future<Output = DbResult<Vec<JsonRow>>> + Send;

    /// Run a query with positional parameters and collect every row.
    fn query_with_params(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = DbResult<Vec<JsonRow>>> + Send;

    /// Close the underlying connection. Clones become unusable.
    fn close(&self) -> impl Future<Output = DbResult<()>> + Send;
}

/// Opens handles.
pub trait Connector: Send + Sync + 'static {
    type Handle: DatabaseHandle;

    /// Open a connection to `target`. Does not run the canary.
    fn connect(&self, target: &ConnectTarget) -> impl Future<Output = DbResult<Self::Handle>> + Send;
}
