//! MCP tool implementations.
//!
//! Handlers are generic over the [`Connector`](crate::db::Connector) so they
//! can run against the real driver or an in-memory one:
//! - `database`: connect, list/create/switch databases
//! - `query`: raw and parameterized queries, find_one / find_many
//! - `schema`: list, describe and compare tables
//!
//! Every handler method returns `DbResult<String>`. [`ToolContext::respond`]
//! turns that into the tool result: the text on success, or the failure
//! description from [`crate::hints`] with `is_error` set.

pub mod database;
pub mod query;
pub mod schema;

pub use database::{
    ConnectInput, CreateDatabaseInput, DatabaseToolHandler, UseDatabaseInput,
};
pub use query::{
    ExecuteQueryInput, ExecuteQueryWithParamsInput, FindManyInput, FindOneInput, QueryToolHandler,
};
pub use schema::{CompareTablesInput, DescribeTableInput, ListTablesInput, SchemaToolHandler};

use crate::error::{DbError, DbResult};
use crate::hints::describe_failure;
use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use tracing::warn;

/// Operation name and remediation hint used when a tool fails.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext {
    pub operation: &'static str,
    pub hint: &'static str,
}

impl ToolContext {
    pub const fn new(operation: &'static str, hint: &'static str) -> Self {
        Self { operation, hint }
    }

    /// Wrap a handler result in a single-text tool result.
    pub fn respond(&self, result: DbResult<String>) -> CallToolResult {
        match result {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(err) => {
                warn!(
                    operation = self.operation,
                    error = %err,
                    sql_state = err.sql_state(),
                    reconnect = err.requires_connect(),
                    "Tool call failed"
                );
                CallToolResult::error(vec![Content::text(describe_failure(
                    self.operation,
                    &err,
                    Some(self.hint),
                ))])
            }
        }
    }
}

pub const CONNECT: ToolContext = ToolContext::new(
    "Connect to database",
    "Check the connection parameters and network connectivity.",
);
pub const LIST_DATABASES: ToolContext = ToolContext::new(
    "List databases",
    "Check network connectivity and database permissions.",
);
pub const CURRENT_DATABASE: ToolContext = ToolContext::new(
    "Get current database",
    "Check network connectivity.",
);
pub const CREATE_DATABASE: ToolContext = ToolContext::new(
    "Create database",
    "Make sure the current user is allowed to create databases.",
);
pub const USE_DATABASE: ToolContext = ToolContext::new(
    "Switch database",
    "Make sure the database exists and the current user can connect to it.",
);
pub const EXECUTE_QUERY: ToolContext = ToolContext::new(
    "Execute query",
    "Check the query syntax and that the referenced tables and columns exist.",
);
pub const EXECUTE_QUERY_WITH_PARAMS: ToolContext = ToolContext::new(
    "Execute parameterized query",
    "Check the query syntax and that every $name placeholder has a value in params.",
);
pub const FIND_ONE: ToolContext = ToolContext::new(
    "Find one record",
    "Check the table name and filter. The generated query has the form: SELECT <fields> FROM <table> WHERE <filter> LIMIT 1",
);
pub const FIND_MANY: ToolContext = ToolContext::new(
    "Find records",
    "Check the table name and conditions. The generated query has the form: SELECT <fields> FROM <table> [WHERE <filter>] [ORDER BY <order_by>] [LIMIT n] [OFFSET n]",
);
pub const LIST_TABLES: ToolContext = ToolContext::new(
    "List tables",
    "Check the database connection and permissions.",
);
pub const DESCRIBE_TABLE: ToolContext = ToolContext::new(
    "Describe table",
    "Check that the table name is correct. Use schema.table for tables outside the public schema.",
);
pub const COMPARE_TABLES: ToolContext = ToolContext::new(
    "Compare tables",
    "Check that both table names are correct.",
);

/// Render a value as indented JSON.
pub(crate) fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> DbResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| DbError::internal(format!("Failed to serialize result: {}", e)))
}

/// Reject empty or whitespace-only text arguments.
pub(crate) fn require_non_empty<'a>(value: &'a str, field: &str) -> DbResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DbError::invalid_input(format!("{} cannot be empty", field)));
    }
    Ok(trimmed)
}
