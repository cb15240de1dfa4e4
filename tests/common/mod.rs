//! In-memory connector shared by the integration tests.
//!
//! Every handle records what it was asked to do in a shared [`MockState`],
//! so tests can count network calls, connects and closes.

#![allow(dead_code)]

use serde_json::{Map, Value};
use session_db_mcp::db::{Connector, DatabaseHandle, JsonRow, QueryParam};
use session_db_mcp::error::{DbError, DbResult};
use session_db_mcp::session::{ConnectTarget, ConnectionParameters, SessionManager};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A canned reply for queries whose SQL contains `fragment` and whose first
/// parameter (when `first_param` is set) equals that string.
#[derive(Debug, Clone)]
pub struct Canned {
    pub fragment: String,
    pub first_param: Option<String>,
    pub rows: Vec<JsonRow>,
}

#[derive(Debug, Default)]
pub struct MockState {
    /// Databases that exist on the fake server.
    pub databases: BTreeSet<String>,
    /// Databases whose connect attempts fail even though they exist.
    pub unreachable: HashSet<String>,
    /// Names the server reports instead of the requested one.
    pub reported_as: HashMap<String, String>,
    /// Handle ids whose canary query fails.
    pub stale: HashSet<u64>,
    /// Handle ids whose close fails (the close is still counted).
    pub close_fails: HashSet<u64>,
    /// Close attempts per handle id.
    pub closes: HashMap<u64, usize>,
    /// Every connect attempt, in order.
    pub connects: Vec<ConnectTarget>,
    /// `(id, database)` of every handle opened, in order.
    pub handles: Vec<(u64, String)>,
    /// Calls made through handles (canary, exists, list, create, query).
    pub calls: usize,
    /// Every query run, with its parameters.
    pub queries: Vec<(String, Vec<QueryParam>)>,
    pub canned: Vec<Canned>,
    /// Rows returned when no canned reply matches.
    pub default_rows: Vec<JsonRow>,
    /// When set, every query fails with this driver message.
    pub query_error: Option<String>,
    next_id: u64,
}

impl MockState {
    fn reply(&self, sql: &str, params: &[QueryParam]) -> Vec<JsonRow> {
        self.canned
            .iter()
            .find(|c| {
                sql.contains(&c.fragment)
                    && match &c.first_param {
                        None => true,
                        Some(p) => matches!(params.first(), Some(QueryParam::String(s)) if s == p),
                    }
            })
            .map(|c| c.rows.clone())
            .unwrap_or_else(|| self.default_rows.clone())
    }
}

#[derive(Clone)]
pub struct MockConnector {
    pub state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new(databases: &[&str]) -> Self {
        let state = MockState {
            databases: databases.iter().map(|d| d.to_string()).collect(),
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Id of the most recently opened handle for `database`.
    pub fn latest_handle(&self, database: &str) -> Option<u64> {
        self.state()
            .handles
            .iter()
            .rev()
            .find(|(_, db)| db == database)
            .map(|(id, _)| *id)
    }

    pub fn close_count(&self, id: u64) -> usize {
        self.state().closes.get(&id).copied().unwrap_or(0)
    }

    /// Make the latest handle for `database` fail its canary.
    pub fn mark_stale(&self, database: &str) {
        if let Some(id) = self.latest_handle(database) {
            self.state().stale.insert(id);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects.len()
    }

    pub fn last_target(&self) -> Option<ConnectTarget> {
        self.state().connects.last().cloned()
    }

    pub fn calls(&self) -> usize {
        self.state().calls
    }

    pub fn canned(&self, fragment: &str, first_param: Option<&str>, rows: Vec<JsonRow>) {
        self.state().canned.push(Canned {
            fragment: fragment.to_string(),
            first_param: first_param.map(str::to_string),
            rows,
        });
    }
}

impl Connector for MockConnector {
    type Handle = MockHandle;

    async fn connect(&self, target: &ConnectTarget) -> DbResult<MockHandle> {
        let mut state = self.state();
        state.connects.push(target.clone());

        if !state.databases.contains(&target.database) {
            return Err(DbError::driver(
                format!("database \"{}\" does not exist", target.database),
                Some("3D000".to_string()),
            ));
        }
        if state.unreachable.contains(&target.database) {
            return Err(DbError::connection_failed("connection refused"));
        }

        state.next_id += 1;
        let id = state.next_id;
        state.handles.push((id, target.database.clone()));
        Ok(MockHandle {
            id,
            database: target.database.clone(),
            state: self.state.clone(),
        })
    }
}

#[derive(Clone)]
pub struct MockHandle {
    pub id: u64,
    pub database: String,
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Count a call and fail if this handle is closed or stale.
    fn begin(&self) -> DbResult<MutexGuard<'_, MockState>> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.closes.contains_key(&self.id) {
            return Err(DbError::driver("connection is closed", None));
        }
        if state.stale.contains(&self.id) {
            return Err(DbError::driver("server closed the connection unexpectedly", None));
        }
        Ok(state)
    }
}

impl DatabaseHandle for MockHandle {
    async fn current_database(&self) -> DbResult<String> {
        let state = self.begin()?;
        Ok(state
            .reported_as
            .get(&self.database)
            .cloned()
            .unwrap_or_else(|| self.database.clone()))
    }

    async fn database_exists(&self, name: &str) -> DbResult<bool> {
        let state = self.begin()?;
        Ok(state.databases.contains(name))
    }

    async fn list_databases(&self) -> DbResult<Vec<String>> {
        let state = self.begin()?;
        Ok(state.databases.iter().cloned().collect())
    }

    async fn create_database(&self, name: &str) -> DbResult<()> {
        let mut state = self.begin()?;
        if !state.databases.insert(name.to_string()) {
            return Err(DbError::driver(
                format!("database \"{}\" already exists", name),
                Some("42P04".to_string()),
            ));
        }
        Ok(())
    }

    async fn query(&self, sql: &str) -> DbResult<Vec<JsonRow>> {
        self.query_with_params(sql, &[]).await
    }

    async fn query_with_params(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        let mut state = self.begin()?;
        state.queries.push((sql.to_string(), params.to_vec()));
        if let Some(message) = &state.query_error {
            return Err(DbError::driver(message.clone(), None));
        }
        Ok(state.reply(sql, params))
    }

    async fn close(&self) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        *state.closes.entry(self.id).or_insert(0) += 1;
        if state.close_fails.contains(&self.id) {
            return Err(DbError::driver("close failed", None));
        }
        Ok(())
    }
}

pub fn session(connector: &MockConnector) -> Arc<SessionManager<MockConnector>> {
    Arc::new(SessionManager::new(
        connector.clone(),
        ConnectionParameters::default(),
    ))
}

pub fn row(pairs: &[(&str, Value)]) -> JsonRow {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), v.clone());
    }
    map
}
