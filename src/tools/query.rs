//! Query tools.
//!
//! `execute_query` runs SQL as given. `execute_query_with_params` rewrites
//! `$name` placeholders and binds values from a JSON object. `find_one` and
//! `find_many` assemble a SELECT from a table name and clauses.

use crate::db::{
    Connector, DatabaseHandle, JsonRow, NamedQuery, ParamsInput, quote_identifier, quote_qualified,
};
use crate::error::{DbError, DbResult};
use crate::session::SessionManager;
use crate::tools::{require_non_empty, to_pretty_json};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Map;
use std::sync::Arc;
use tracing::{debug, info};

/// Input for the execute_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteQueryInput {
    /// SQL to execute. Several statements separated by `;` are allowed.
    pub query: String,
}

/// Input for the execute_query_with_params tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteQueryWithParamsInput {
    /// SQL with named placeholders, e.g. SELECT * FROM users WHERE name = $name
    pub query: String,
    /// Parameter values as a JSON object (or a string containing one), e.g. {"name": "John"}
    pub params: ParamsInput,
}

/// Input for the find_one tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FindOneInput {
    /// Table name, optionally schema-qualified, e.g. public.users
    pub table: String,
    /// WHERE condition, e.g. name = 'John' or id = $id
    pub filter: String,
    /// Columns to return, e.g. "name, email". Default: all columns
    #[serde(default)]
    pub fields: Option<String>,
    /// Values for $name placeholders used in the filter
    #[serde(default)]
    pub params: Option<ParamsInput>,
}

/// Input for the find_many tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FindManyInput {
    /// Table name, optionally schema-qualified, e.g. public.users
    pub table: String,
    /// WHERE condition, e.g. name LIKE '%John%'
    #[serde(default)]
    pub filter: Option<String>,
    /// Columns to return, e.g. "name, email". Default: all columns
    #[serde(default)]
    pub fields: Option<String>,
    /// ORDER BY clause, e.g. "name ASC"
    #[serde(default)]
    pub order_by: Option<String>,
    /// Maximum number of rows to return
    #[serde(default)]
    pub limit: Option<u64>,
    /// Number of rows to skip
    #[serde(default)]
    pub offset: Option<u64>,
    /// Values for $name placeholders used in the filter or order
    #[serde(default)]
    pub params: Option<ParamsInput>,
}

/// Handler for query tools.
pub struct QueryToolHandler<C: Connector> {
    session: Arc<SessionManager<C>>,
}

impl<C: Connector> QueryToolHandler<C> {
    pub fn new(session: Arc<SessionManager<C>>) -> Self {
        Self { session }
    }

    pub async fn execute_query(&self, input: ExecuteQueryInput) -> DbResult<String> {
        let sql = require_non_empty(&input.query, "query")?;
        let handle = self.session.current_handle().await?;

        let rows = handle.query(sql).await?;
        info!(rows = rows.len(), "Query executed");
        to_pretty_json(&rows)
    }

    pub async fn execute_query_with_params(
        &self,
        input: ExecuteQueryWithParamsInput,
    ) -> DbResult<String> {
        let sql = require_non_empty(&input.query, "query")?;
        let values = input.params.into_map()?;
        let rows = self.run_named(sql, &values).await?;
        info!(rows = rows.len(), "Parameterized query executed");
        to_pretty_json(&rows)
    }

    pub async fn find_one(&self, input: FindOneInput) -> DbResult<String> {
        let filter = require_non_empty(&input.filter, "filter")?;
        let sql = SelectBuilder::new(&input.table, input.fields.as_deref())?
            .filter(Some(filter))
            .limit(Some(1))
            .build();
        debug!(sql = %sql, "find_one");

        let values = input.params.map(ParamsInput::into_map).transpose()?.unwrap_or_default();
        let rows = self.run_named(&sql, &values).await?;
        match rows.first() {
            Some(row) => to_pretty_json(row),
            None => Ok("No matching record found".to_string()),
        }
    }

    pub async fn find_many(&self, input: FindManyInput) -> DbResult<String> {
        let sql = SelectBuilder::new(&input.table, input.fields.as_deref())?
            .filter(input.filter.as_deref())
            .order_by(input.order_by.as_deref())
            .limit(input.limit)
            .offset(input.offset)
            .build();
        debug!(sql = %sql, "find_many");

        let values = input.params.map(ParamsInput::into_map).transpose()?.unwrap_or_default();
        let rows = self.run_named(&sql, &values).await?;
        to_pretty_json(&rows)
    }

    async fn run_named(&self, sql: &str, values: &Map<String, serde_json::Value>) -> DbResult<Vec<JsonRow>> {
        let named = NamedQuery::parse(sql)?;
        let params = named.bind(values)?;
        let handle = self.session.current_handle().await?;
        if params.is_empty() {
            handle.query(&named.sql).await
        } else {
            handle.query_with_params(&named.sql, &params).await
        }
    }
}

/// Assembles `SELECT <fields> FROM <table> [WHERE] [ORDER BY] [LIMIT] [OFFSET]`.
///
/// Plain identifiers in the table and field list are quoted. Anything else
/// (expressions, already-quoted names) is used as written, as are the filter
/// and order clauses.
#[derive(Debug, Clone)]
pub(crate) struct SelectBuilder {
    table: String,
    fields: String,
    filter: Option<String>,
    order_by: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl SelectBuilder {
    pub(crate) fn new(table: &str, fields: Option<&str>) -> DbResult<Self> {
        let table = require_non_empty(table, "table")?;
        Ok(Self {
            table: render_table(table)?,
            fields: render_fields(fields)?,
            filter: None,
            order_by: None,
            limit: None,
            offset: None,
        })
    }

    pub(crate) fn filter(mut self, filter: Option<&str>) -> Self {
        self.filter = non_blank(filter);
        self
    }

    pub(crate) fn order_by(mut self, order_by: Option<&str>) -> Self {
        self.order_by = non_blank(order_by);
        self
    }

    pub(crate) fn limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub(crate) fn offset(mut self, offset: Option<u64>) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn build(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.fields, self.table);
        if let Some(filter) = &self.filter {
            sql.push_str(&format!(" WHERE {}", filter));
        }
        if let Some(order_by) = &self.order_by {
            sql.push_str(&format!(" ORDER BY {}", order_by));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn render_table(table: &str) -> DbResult<String> {
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() <= 2 && parts.iter().all(|p| is_plain_identifier(p)) {
        return quote_qualified(table);
    }
    if table.contains(';') {
        return Err(DbError::invalid_input(format!("Invalid table name: {}", table)));
    }
    Ok(table.to_string())
}

/// Field list: `*` by default. Surrounding braces are accepted and dropped.
fn render_fields(fields: Option<&str>) -> DbResult<String> {
    let fields = fields
        .map(|f| f.trim().trim_start_matches('{').trim_end_matches('}').trim())
        .filter(|f| !f.is_empty() && *f != "*");
    let Some(fields) = fields else {
        return Ok("*".to_string());
    };

    fields
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| {
            if is_plain_identifier(f) {
                quote_identifier(f)
            } else {
                Ok(f.to_string())
            }
        })
        .collect::<DbResult<Vec<_>>>()
        .map(|parts| parts.join(", "))
}
