//! Schema tools: list, describe and compare tables.

use crate::db::Connector;
use crate::db::schema;
use crate::error::DbResult;
use crate::session::SessionManager;
use crate::tools::{require_non_empty, to_pretty_json};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

/// Input for the list_tables tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListTablesInput {
    /// Only list tables in this schema. Default: all user schemas
    #[serde(default)]
    pub schema: Option<String>,
    /// Include pg_catalog and information_schema. Default: false
    #[serde(default)]
    pub include_system: Option<bool>,
}

/// Input for the describe_table tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescribeTableInput {
    /// Table name, optionally schema-qualified (schema.table)
    pub table: String,
    /// Schema of the table when not qualified. Default: public
    #[serde(default)]
    pub schema: Option<String>,
}

/// Input for the compare_tables tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CompareTablesInput {
    /// Source table name, optionally schema-qualified
    pub source: String,
    /// Target table name, optionally schema-qualified
    pub target: String,
    /// Schema for unqualified names. Default: public
    #[serde(default)]
    pub schema: Option<String>,
}

/// Handler for schema tools.
pub struct SchemaToolHandler<C: Connector> {
    session: Arc<SessionManager<C>>,
}

impl<C: Connector> SchemaToolHandler<C> {
    pub fn new(session: Arc<SessionManager<C>>) -> Self {
        Self { session }
    }

    pub async fn list_tables(&self, input: ListTablesInput) -> DbResult<String> {
        let handle = self.session.current_handle().await?;
        let tables = schema::list_tables(
            &handle,
            input.schema.as_deref(),
            input.include_system.unwrap_or(false),
        )
        .await?;
        to_pretty_json(&tables)
    }

    pub async fn describe_table(&self, input: DescribeTableInput) -> DbResult<String> {
        let table = require_non_empty(&input.table, "table")?;
        let handle = self.session.current_handle().await?;
        let description = schema::describe_table(&handle, table, input.schema.as_deref()).await?;
        to_pretty_json(&description)
    }

    pub async fn compare_tables(&self, input: CompareTablesInput) -> DbResult<String> {
        let source = require_non_empty(&input.source, "source")?;
        let target = require_non_empty(&input.target, "target")?;
        let handle = self.session.current_handle().await?;

        let comparison =
            schema::compare_tables(&handle, source, target, input.schema.as_deref()).await?;
        if comparison.is_identical() {
            return Ok(format!(
                "Tables {} and {} have identical columns and foreign keys.",
                comparison.source, comparison.target
            ));
        }
        to_pretty_json(&comparison)
    }
}
