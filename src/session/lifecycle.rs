//! Connection lifecycle: establishing, switching and closing connections.
//!
//! [`SessionManager`] owns the [`ConnectionRegistry`] behind one async mutex.
//! Every state change (`establish`, `switch_to`, `create_database`,
//! `close_all`) holds that lock for its whole check → evict → connect →
//! commit sequence, so two overlapping tool calls can never leave two
//! handles for one name. Queries only take the lock long enough to clone
//! the current handle.

use crate::db::{Connector, DatabaseHandle};
use crate::error::{DbError, DbResult};
use crate::session::params::{ConnectionParameters, DEFAULT_DATABASE};
use crate::session::registry::ConnectionRegistry;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Health of an existing registry entry, judged by the canary query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleHealth {
    Live,
    /// A handle is registered but its canary failed.
    Stale,
    Absent,
}

/// How `switch_to` reached its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The target already was the current database.
    AlreadyCurrent,
    /// A live handle for the target was already registered.
    Reused,
    /// The registered handle was stale and has been replaced.
    Reconnected,
    /// No handle was registered; a new connection was opened.
    Connected,
}

/// What `create_database` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    CreatedAndSwitched,
}

/// Snapshot of the session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub current_database: String,
    pub current_connected: bool,
    pub connected_databases: Vec<String>,
    pub connection_defaults: String,
}

pub struct SessionManager<C: Connector> {
    connector: C,
    registry: Mutex<ConnectionRegistry<C::Handle>>,
}

impl<C: Connector> SessionManager<C> {
    pub fn new(connector: C, defaults: ConnectionParameters) -> Self {
        Self {
            connector,
            registry: Mutex::new(ConnectionRegistry::new(defaults)),
        }
    }

    /// Connect to `database` (or the default database), replacing any
    /// existing handle for that name and making it current.
    ///
    /// Non-empty `overrides` become the new defaults for this and every
    /// later connection attempt. Returns a summary naming the database the
    /// server reports.
    pub async fn establish(
        &self,
        overrides: Option<ConnectionParameters>,
        database: Option<&str>,
    ) -> DbResult<String> {
        let mut registry = self.registry.lock().await;
        self.establish_locked(&mut registry, overrides, database).await
    }

    async fn establish_locked(
        &self,
        registry: &mut ConnectionRegistry<C::Handle>,
        overrides: Option<ConnectionParameters>,
        database: Option<&str>,
    ) -> DbResult<String> {
        if let Some(overrides) = overrides.filter(|o| !o.is_empty()) {
            let merged = overrides.merged_over(registry.defaults());
            info!(defaults = %merged.redacted(), "Updated default connection parameters");
            registry.set_defaults(merged);
        }

        let database = database
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(DEFAULT_DATABASE)
            .to_string();

        if let Some(previous) = registry.remove(&database) {
            debug!(database = %database, "Closing existing connection before reconnecting");
            if let Err(e) = previous.close().await {
                warn!(database = %database, error = %e, "Failed to close superseded connection");
            }
        }

        let defaults = registry.defaults().clone();
        if defaults.dsn.is_some() && defaults.instance.is_some() {
            warn!("Both a DSN and an instance are configured; the DSN takes precedence");
        }

        let target = defaults.resolve(&database).map_err(into_connection_failed)?;

        let handle = self
            .connector
            .connect(&target)
            .await
            .map_err(into_connection_failed)?;

        let reported = match handle.current_database().await {
            Ok(name) => name,
            Err(e) => {
                if let Err(close_err) = handle.close().await {
                    warn!(database = %database, error = %close_err, "Failed to close connection after failed verification");
                }
                return Err(into_connection_failed(e));
            }
        };

        if reported != database {
            warn!(
                requested = %database,
                reported = %reported,
                "Server reports a different database than requested"
            );
        }

        if let Some(superseded) = registry.insert(&database, handle) {
            if let Err(e) = superseded.close().await {
                warn!(database = %database, error = %e, "Failed to close superseded connection");
            }
        }
        registry.set_current(&database)?;

        info!(database = %database, server_database = %reported, "Connected");
        Ok(format!("Successfully connected to database: {}", reported))
    }

    /// Make `name` the current database, reusing, repairing or opening its
    /// connection as needed.
    pub async fn switch_to(&self, name: &str) -> DbResult<SwitchOutcome> {
        let mut registry = self.registry.lock().await;

        // Fails with NotConnected before the first connect and after close_all
        let current = registry.get_current()?;
        if name == registry.current_name() {
            return Ok(SwitchOutcome::AlreadyCurrent);
        }

        if !current.database_exists(name).await? {
            return Err(DbError::unknown_database(name));
        }

        let outcome = match self.check_health(&registry, name).await {
            HandleHealth::Live => {
                registry.set_current(name)?;
                SwitchOutcome::Reused
            }
            HandleHealth::Stale => {
                info!(database = %name, "Connection is stale, reconnecting");
                self.establish_locked(&mut registry, None, Some(name)).await?;
                SwitchOutcome::Reconnected
            }
            HandleHealth::Absent => {
                self.establish_locked(&mut registry, None, Some(name)).await?;
                SwitchOutcome::Connected
            }
        };

        if registry.current_name() != name {
            return Err(DbError::switch_failed(name, registry.current_name()));
        }

        info!(database = %name, outcome = ?outcome, "Switched database");
        Ok(outcome)
    }

    async fn check_health(&self, registry: &ConnectionRegistry<C::Handle>, name: &str) -> HandleHealth {
        match registry.get_by_name(name) {
            None => HandleHealth::Absent,
            Some(handle) => match handle.current_database().await {
                Ok(_) => HandleHealth::Live,
                Err(e) => {
                    debug!(database = %name, error = %e, "Canary query failed");
                    HandleHealth::Stale
                }
            },
        }
    }

    /// Create database `name` through the current connection, optionally
    /// switching to it.
    ///
    /// A failed switch after a successful create is reported as
    /// [`DbError::CreatedButNotSwitched`].
    pub async fn create_database(&self, name: &str, switch: bool) -> DbResult<CreateOutcome> {
        let handle = self.current_handle().await?;
        handle.create_database(name).await?;
        info!(database = %name, "Created database");

        if !switch {
            return Ok(CreateOutcome::Created);
        }
        match self.switch_to(name).await {
            Ok(_) => Ok(CreateOutcome::CreatedAndSwitched),
            Err(e) => Err(DbError::created_but_not_switched(name, e.to_string())),
        }
    }

    /// Clone of the current database's handle.
    pub async fn current_handle(&self) -> DbResult<C::Handle> {
        self.registry.lock().await.get_current()
    }

    pub async fn current_name(&self) -> String {
        self.registry.lock().await.current_name().to_string()
    }

    pub async fn status(&self) -> SessionStatus {
        let registry = self.registry.lock().await;
        SessionStatus {
            current_database: registry.current_name().to_string(),
            current_connected: registry.get_current().is_ok(),
            connected_databases: registry.connected_names(),
            connection_defaults: registry.defaults().redacted(),
        }
    }

    /// Close every connection. The session can reconnect afterwards.
    pub async fn close_all(&self) {
        self.registry.lock().await.close_all().await;
    }
}

fn into_connection_failed(err: DbError) -> DbError {
    match err {
        DbError::ConnectionFailed { .. } => err,
        other => DbError::connection_failed(other.to_string()),
    }
}
