//! Registry of live connections keyed by database name.
//!
//! Holds at most one handle per name, the name of the current database and
//! the default connection parameters. The registry itself does no I/O except
//! in [`ConnectionRegistry::close_all`]; establishing and replacing handles is
//! the lifecycle controller's job.

use crate::db::DatabaseHandle;
use crate::error::{DbError, DbResult};
use crate::session::params::{ConnectionParameters, DEFAULT_DATABASE};
use futures_util::future::join_all;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug)]
pub struct ConnectionRegistry<H> {
    connections: HashMap<String, H>,
    current: String,
    defaults: ConnectionParameters,
}

impl<H: DatabaseHandle> ConnectionRegistry<H> {
    pub fn new(defaults: ConnectionParameters) -> Self {
        Self {
            connections: HashMap::new(),
            current: DEFAULT_DATABASE.to_string(),
            defaults,
        }
    }

    /// Handle for the current database.
    pub fn get_current(&self) -> DbResult<H> {
        self.connections
            .get(&self.current)
            .cloned()
            .ok_or_else(|| DbError::not_connected(&self.current))
    }

    pub fn get_by_name(&self, name: &str) -> Option<H> {
        self.connections.get(name).cloned()
    }

    /// Make `name` the current database. It must already have a handle.
    pub fn set_current(&mut self, name: &str) -> DbResult<()> {
        if !self.connections.contains_key(name) {
            return Err(DbError::unknown_database(name));
        }
        self.current = name.to_string();
        Ok(())
    }

    pub fn current_name(&self) -> &str {
        &self.current
    }

    pub fn defaults(&self) -> &ConnectionParameters {
        &self.defaults
    }

    pub fn set_defaults(&mut self, defaults: ConnectionParameters) {
        self.defaults = defaults;
    }

    /// Names with a registered handle, sorted.
    pub fn connected_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Register `handle` under `name`, returning the handle it replaces.
    ///
    /// The caller closes the returned handle.
    pub fn insert(&mut self, name: &str, handle: H) -> Option<H> {
        self.connections.insert(name.to_string(), handle)
    }

    /// Remove and return the handle for `name`. Does not close it.
    pub fn remove(&mut self, name: &str) -> Option<H> {
        self.connections.remove(name)
    }

    /// Close every handle concurrently and empty the registry.
    ///
    /// Individual close failures are logged and do not stop the others.
    /// The current name is left unchanged.
    pub async fn close_all(&mut self) {
        if self.is_empty() {
            return;
        }
        let drained: Vec<(String, H)> = self.connections.drain().collect();
        let count = drained.len();

        let results = join_all(drained.into_iter().map(|(name, handle)| async move {
            let result = handle.close().await;
            (name, result)
        }))
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                warn!(database = %name, error = %e, "Failed to close connection");
            }
        }
        info!(count, "Closed all connections");
    }
}
