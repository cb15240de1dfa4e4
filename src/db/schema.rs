//! Catalog introspection: tables, columns, constraints and indexes.
//!
//! Queries go through [`DatabaseHandle::query_with_params`] and every
//! selected value is cast to a plain type so rows decode the same way over
//! both query protocols.

use crate::db::handle::{DatabaseHandle, JsonRow};
use crate::db::params::QueryParam;
use crate::error::{DbError, DbResult};
use serde::Serialize;
use serde_json::Value as JsonValue;

pub const DEFAULT_SCHEMA: &str = "public";

mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT
            n.nspname::text AS schema,
            c.relname::text AS name,
            CASE c.relkind
                WHEN 'r' THEN 'table'
                WHEN 'p' THEN 'partitioned table'
                WHEN 'v' THEN 'view'
                WHEN 'm' THEN 'materialized view'
                WHEN 'f' THEN 'foreign table'
            END AS table_type,
            obj_description(c.oid, 'pg_class') AS comment
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind IN ('r', 'p', 'v', 'm', 'f')
        AND ($1::text IS NULL OR n.nspname = $1::text)
        AND ($2::bool OR (
            n.nspname NOT IN ('pg_catalog', 'information_schema')
            AND n.nspname NOT LIKE 'pg_toast%'
            AND n.nspname NOT LIKE 'pg_temp%'
        ))
        ORDER BY n.nspname, c.relname
        "#;

    pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            a.attname::text AS name,
            format_type(a.atttypid, a.atttypmod) AS data_type,
            NOT a.attnotnull AS nullable,
            pg_get_expr(d.adbin, d.adrelid) AS default_value,
            EXISTS (
                SELECT 1 FROM pg_index ix
                WHERE ix.indrelid = c.oid AND ix.indisprimary AND a.attnum = ANY(ix.indkey)
            ) AS is_primary_key,
            col_description(c.oid, a.attnum) AS comment
        FROM pg_attribute a
        JOIN pg_class c ON c.oid = a.attrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
        WHERE c.relname = $1::text AND n.nspname = $2::text
        AND a.attnum > 0 AND NOT a.attisdropped
        ORDER BY a.attnum
        "#;

    pub const DESCRIBE_CONSTRAINTS: &str = r#"
        SELECT
            con.conname::text AS name,
            CASE con.contype
                WHEN 'p' THEN 'primary key'
                WHEN 'f' THEN 'foreign key'
                WHEN 'u' THEN 'unique'
                WHEN 'c' THEN 'check'
                WHEN 'x' THEN 'exclusion'
                ELSE con.contype::text
            END AS constraint_type,
            pg_get_constraintdef(con.oid) AS definition
        FROM pg_constraint con
        JOIN pg_class c ON c.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relname = $1::text AND n.nspname = $2::text
        ORDER BY con.conname
        "#;

    /// Key columns are joined with commas in key order.
    pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT
            con.conname::text AS name,
            array_to_string(ARRAY(
                SELECT att.attname::text
                FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                JOIN pg_attribute att ON att.attrelid = con.conrelid AND att.attnum = k.attnum
                ORDER BY k.ord
            ), ',') AS columns,
            con.confrelid::regclass::text AS referenced_table,
            array_to_string(ARRAY(
                SELECT att.attname::text
                FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                JOIN pg_attribute att ON att.attrelid = con.confrelid AND att.attnum = k.attnum
                ORDER BY k.ord
            ), ',') AS referenced_columns,
            CASE con.confupdtype
                WHEN 'r' THEN 'RESTRICT' WHEN 'c' THEN 'CASCADE'
                WHEN 'n' THEN 'SET NULL' WHEN 'd' THEN 'SET DEFAULT'
                ELSE 'NO ACTION'
            END AS on_update,
            CASE con.confdeltype
                WHEN 'r' THEN 'RESTRICT' WHEN 'c' THEN 'CASCADE'
                WHEN 'n' THEN 'SET NULL' WHEN 'd' THEN 'SET DEFAULT'
                ELSE 'NO ACTION'
            END AS on_delete
        FROM pg_constraint con
        JOIN pg_class c ON c.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE con.contype = 'f' AND c.relname = $1::text AND n.nspname = $2::text
        ORDER BY con.conname
        "#;

    pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            i.relname::text AS name,
            ix.indisunique AS is_unique,
            ix.indisprimary AS is_primary,
            am.amname::text AS method,
            pg_get_indexdef(ix.indexrelid) AS definition
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class c ON c.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_am am ON am.oid = i.relam
        WHERE c.relname = $1::text AND n.nspname = $2::text
        ORDER BY i.relname
        "#;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableEntry {
    pub schema: String,
    pub name: String,
    pub table_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub is_primary_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintInfo {
    pub name: String,
    pub constraint_type: String,
    pub definition: String,
}

/// A foreign key, identified across tables by its local columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKeyInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_update: String,
    pub on_delete: String,
}

impl ForeignKeyInfo {
    fn same_reference(&self, other: &Self) -> bool {
        self.referenced_table == other.referenced_table
            && self.referenced_columns == other.referenced_columns
            && self.on_update == other.on_update
            && self.on_delete == other.on_delete
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub is_unique: bool,
    pub is_primary: bool,
    pub method: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescription {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Vec<String>,
    pub constraints: Vec<ConstraintInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    pub indexes: Vec<IndexInfo>,
}

/// A column present in both tables whose definition differs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDifference {
    pub name: String,
    pub source: ColumnInfo,
    pub target: ColumnInfo,
}

/// Foreign keys on the same local columns that reference different things.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKeyDifference {
    pub columns: Vec<String>,
    pub source: ForeignKeyInfo,
    pub target: ForeignKeyInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableComparison {
    pub source: String,
    pub target: String,
    pub column_differences: Vec<ColumnDifference>,
    pub source_only_columns: Vec<ColumnInfo>,
    pub target_only_columns: Vec<ColumnInfo>,
    pub foreign_key_differences: Vec<ForeignKeyDifference>,
    pub source_only_foreign_keys: Vec<ForeignKeyInfo>,
    pub target_only_foreign_keys: Vec<ForeignKeyInfo>,
}

impl TableComparison {
    pub fn is_identical(&self) -> bool {
        self.column_differences.is_empty()
            && self.source_only_columns.is_empty()
            && self.target_only_columns.is_empty()
            && self.foreign_key_differences.is_empty()
            && self.source_only_foreign_keys.is_empty()
            && self.target_only_foreign_keys.is_empty()
    }
}

/// Split `schema.table` into its parts; a bare name uses `schema` or `public`.
pub fn split_table_name<'a>(table: &'a str, schema: Option<&'a str>) -> (&'a str, &'a str) {
    match table.split_once('.') {
        Some((s, t)) if !s.is_empty() && !t.is_empty() => (s, t),
        _ => (
            schema.filter(|s| !s.trim().is_empty()).unwrap_or(DEFAULT_SCHEMA),
            table,
        ),
    }
}

pub async fn list_tables<H: DatabaseHandle>(
    handle: &H,
    schema: Option<&str>,
    include_system: bool,
) -> DbResult<Vec<TableEntry>> {
    let schema_param = schema
        .filter(|s| !s.trim().is_empty())
        .map(|s| QueryParam::String(s.to_string()))
        .unwrap_or(QueryParam::Null);
    let rows = handle
        .query_with_params(
            queries::LIST_TABLES,
            &[schema_param, QueryParam::Bool(include_system)],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| TableEntry {
            schema: get_string(row, "schema"),
            name: get_string(row, "name"),
            table_type: get_string(row, "table_type"),
            comment: get_opt_string(row, "comment"),
        })
        .collect())
}

pub async fn describe_table<H: DatabaseHandle>(
    handle: &H,
    table: &str,
    schema: Option<&str>,
) -> DbResult<TableDescription> {
    let (schema, table) = split_table_name(table, schema);
    let params = [
        QueryParam::String(table.to_string()),
        QueryParam::String(schema.to_string()),
    ];

    let columns = fetch_columns(handle, &params).await?;
    if columns.is_empty() {
        return Err(DbError::driver(
            format!("Table '{}.{}' does not exist", schema, table),
            Some("42P01".to_string()),
        ));
    }

    let constraints = handle
        .query_with_params(queries::DESCRIBE_CONSTRAINTS, &params)
        .await?
        .iter()
        .map(|row| ConstraintInfo {
            name: get_string(row, "name"),
            constraint_type: get_string(row, "constraint_type"),
            definition: get_string(row, "definition"),
        })
        .collect();

    let foreign_keys = handle
        .query_with_params(queries::DESCRIBE_FOREIGN_KEYS, &params)
        .await?
        .iter()
        .map(|row| ForeignKeyInfo {
            name: get_string(row, "name"),
            columns: get_list(row, "columns"),
            referenced_table: get_string(row, "referenced_table"),
            referenced_columns: get_list(row, "referenced_columns"),
            on_update: get_string(row, "on_update"),
            on_delete: get_string(row, "on_delete"),
        })
        .collect();

    let indexes = handle
        .query_with_params(queries::DESCRIBE_INDEXES, &params)
        .await?
        .iter()
        .map(|row| IndexInfo {
            name: get_string(row, "name"),
            is_unique: get_bool(row, "is_unique"),
            is_primary: get_bool(row, "is_primary"),
            method: get_string(row, "method"),
            definition: get_string(row, "definition"),
        })
        .collect();

    let primary_key = columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| c.name.clone())
        .collect();

    Ok(TableDescription {
        schema: schema.to_string(),
        name: table.to_string(),
        columns,
        primary_key,
        constraints,
        foreign_keys,
        indexes,
    })
}

pub async fn compare_tables<H: DatabaseHandle>(
    handle: &H,
    source: &str,
    target: &str,
    schema: Option<&str>,
) -> DbResult<TableComparison> {
    let source_desc = describe_table(handle, source, schema)
        .await
        .map_err(|e| relabel_missing(e, "Source"))?;
    let target_desc = describe_table(handle, target, schema)
        .await
        .map_err(|e| relabel_missing(e, "Target"))?;

    let mut comparison = compare_columns(
        &format!("{}.{}", source_desc.schema, source_desc.name),
        &source_desc.columns,
        &format!("{}.{}", target_desc.schema, target_desc.name),
        &target_desc.columns,
    );
    compare_foreign_keys(
        &mut comparison,
        &source_desc.foreign_keys,
        &target_desc.foreign_keys,
    );
    Ok(comparison)
}

fn relabel_missing(err: DbError, side: &str) -> DbError {
    match err {
        DbError::Driver { message, sql_state } if sql_state.as_deref() == Some("42P01") => {
            DbError::driver(format!("{} {}", side, lowercase_first(&message)), sql_state)
        }
        other => other,
    }
}

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Compare two column lists by name. Columns differ when their type or
/// nullability differ; defaults and comments are not compared.
pub fn compare_columns(
    source_name: &str,
    source: &[ColumnInfo],
    target_name: &str,
    target: &[ColumnInfo],
) -> TableComparison {
    let mut column_differences = Vec::new();
    let mut source_only_columns = Vec::new();

    for src in source {
        match target.iter().find(|t| t.name == src.name) {
            Some(tgt) if tgt.data_type != src.data_type || tgt.nullable != src.nullable => {
                column_differences.push(ColumnDifference {
                    name: src.name.clone(),
                    source: src.clone(),
                    target: tgt.clone(),
                });
            }
            Some(_) => {}
            None => source_only_columns.push(src.clone()),
        }
    }

    let target_only_columns = target
        .iter()
        .filter(|t| !source.iter().any(|s| s.name == t.name))
        .cloned()
        .collect();

    TableComparison {
        source: source_name.to_string(),
        target: target_name.to_string(),
        column_differences,
        source_only_columns,
        target_only_columns,
        foreign_key_differences: Vec::new(),
        source_only_foreign_keys: Vec::new(),
        target_only_foreign_keys: Vec::new(),
    }
}

/// Match foreign keys by their local columns; constraint names are ignored
/// since they usually embed the table name.
pub fn compare_foreign_keys(
    comparison: &mut TableComparison,
    source: &[ForeignKeyInfo],
    target: &[ForeignKeyInfo],
) {
    for src in source {
        match target.iter().find(|t| t.columns == src.columns) {
            Some(tgt) if !tgt.same_reference(src) => {
                comparison.foreign_key_differences.push(ForeignKeyDifference {
                    columns: src.columns.clone(),
                    source: src.clone(),
                    target: tgt.clone(),
                });
            }
            Some(_) => {}
            None => comparison.source_only_foreign_keys.push(src.clone()),
        }
    }

    comparison.target_only_foreign_keys = target
        .iter()
        .filter(|t| !source.iter().any(|s| s.columns == t.columns))
        .cloned()
        .collect();
}

async fn fetch_columns<H: DatabaseHandle>(handle: &H, params: &[QueryParam]) -> DbResult<Vec<ColumnInfo>> {
    let rows = handle
        .query_with_params(queries::DESCRIBE_COLUMNS, params)
        .await?;
    Ok(rows
        .iter()
        .map(|row| ColumnInfo {
            name: get_string(row, "name"),
            data_type: get_string(row, "data_type"),
            nullable: get_bool(row, "nullable"),
            default_value: get_opt_string(row, "default_value"),
            is_primary_key: get_bool(row, "is_primary_key"),
            comment: get_opt_string(row, "comment").filter(|c| !c.is_empty()),
        })
        .collect())
}

fn get_opt_string(row: &JsonRow, key: &str) -> Option<String> {
    match row.get(key) {
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(JsonValue::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn get_string(row: &JsonRow, key: &str) -> String {
    get_opt_string(row, key).unwrap_or_default()
}

fn get_list(row: &JsonRow, key: &str) -> Vec<String> {
    get_string(row, key)
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn get_bool(row: &JsonRow, key: &str) -> bool {
    row.get(key).and_then(JsonValue::as_bool).unwrap_or(false)
}
