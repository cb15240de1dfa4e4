//! PostgreSQL row to JSON conversion.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the column type name into a logical category
//! 2. A decoder per category extracts the value
//!
//! Values that cannot be represented losslessly as JSON numbers (NUMERIC,
//! non-finite floats) are rendered as strings.

use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgHasArrayType, PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

/// Logical category for PostgreSQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Interval,
    /// One-dimensional arrays, named `_elem` by the server.
    Array,
    Unknown,
}

/// Classify a column type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();
    if lower.starts_with('_') || lower.ends_with("[]") {
        return TypeCategory::Array;
    }

    match lower.as_str() {
        "numeric" | "decimal" => TypeCategory::Decimal,
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "smallserial"
        | "serial" | "bigserial" | "oid" => TypeCategory::Integer,
        "bool" | "boolean" => TypeCategory::Boolean,
        "float4" | "float8" | "real" | "double precision" => TypeCategory::Float,
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "bytea" => TypeCategory::Binary,
        "timestamp" => TypeCategory::Timestamp,
        "timestamptz" => TypeCategory::TimestampTz,
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        "interval" => TypeCategory::Interval,
        "text" | "varchar" | "bpchar" | "char" | "name" | "citext" | "character varying"
        | "character" => TypeCategory::Text,
        _ => TypeCategory::Unknown,
    }
}

/// Raw NUMERIC value, preserving the server's textual representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("numeric")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        // Binary NUMERIC is decoded by sqlx into BigDecimal only with that
        // feature; the f64 path loses precision, so fall back to text.
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => {
                let bytes = value.as_bytes()?;
                Ok(RawDecimal(decode_binary_numeric(bytes)?))
            }
        }
    }
}

/// Decode PostgreSQL's binary NUMERIC wire format into its decimal text.
fn decode_binary_numeric(bytes: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    const NUMERIC_NEG: u16 = 0x4000;
    const NUMERIC_NAN: u16 = 0xC000;

    if bytes.len() < 8 {
        return Err("numeric value too short".into());
    }
    let read = |i: usize| u16::from_be_bytes([bytes[i], bytes[i + 1]]);
    let ndigits = read(0) as usize;
    let weight = read(2) as i16 as i32;
    let sign = read(4);
    let dscale = read(6) as usize;

    if sign == NUMERIC_NAN {
        return Ok("NaN".to_string());
    }
    if bytes.len() < 8 + ndigits * 2 {
        return Err("numeric value truncated".into());
    }
    let digits: Vec<u16> = (0..ndigits).map(|i| read(8 + i * 2)).collect();

    let mut int_part = String::new();
    for pos in 0..=weight.max(0) {
        if weight < 0 {
            break;
        }
        let d = digits.get(pos as usize).copied().unwrap_or(0);
        if int_part.is_empty() {
            int_part.push_str(&d.to_string());
        } else {
            int_part.push_str(&format!("{:04}", d));
        }
    }
    if int_part.is_empty() {
        int_part.push('0');
    }

    let mut frac_part = String::new();
    let mut group = weight + 1;
    while frac_part.len() < dscale {
        let d = if group < 0 {
            0
        } else {
            digits.get(group as usize).copied().unwrap_or(0)
        };
        frac_part.push_str(&format!("{:04}", d));
        group += 1;
    }
    frac_part.truncate(dscale);

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    out.push_str(&int_part);
    if dscale > 0 {
        out.push('.');
        out.push_str(&frac_part);
    }
    Ok(out)
}

/// Encode binary data as base64, or as text when it is valid UTF-8 and
/// `decode_utf8` is set.
pub fn decode_binary_value(bytes: &[u8], decode_utf8: bool) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    if decode_utf8 {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return JsonValue::String(s.to_string());
        }
    }
    JsonValue::String(STANDARD.encode(bytes))
}

/// Converts result rows into JSON objects keyed by column name.
pub trait RowToJson {
    fn to_json_map(&self) -> Map<String, JsonValue>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let value = decode_column(self, idx, type_name, categorize_type(type_name));
                (col.name().to_string(), value)
            })
            .collect()
    }
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str, category: TypeCategory) -> JsonValue {
    if row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(false) {
        return JsonValue::Null;
    }
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_as::<bool>(row, idx).map(JsonValue::Bool).unwrap_or(JsonValue::Null),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_as::<Vec<u8>>(row, idx)
            .map(|v| decode_binary_value(&v, false))
            .unwrap_or(JsonValue::Null),
        TypeCategory::Json => decode_as::<JsonValue>(row, idx).unwrap_or(JsonValue::Null),
        TypeCategory::Uuid => decode_as::<sqlx::types::Uuid>(row, idx)
            .map(|u| JsonValue::String(u.to_string()))
            .unwrap_or(JsonValue::Null),
        TypeCategory::Timestamp => decode_as::<chrono::NaiveDateTime>(row, idx)
            .map(|t| JsonValue::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            .unwrap_or(JsonValue::Null),
        TypeCategory::TimestampTz => decode_as::<chrono::DateTime<chrono::Utc>>(row, idx)
            .map(|t| JsonValue::String(t.to_rfc3339()))
            .unwrap_or(JsonValue::Null),
        TypeCategory::Date => decode_as::<chrono::NaiveDate>(row, idx)
            .map(|d| JsonValue::String(d.to_string()))
            .unwrap_or(JsonValue::Null),
        TypeCategory::Time => decode_as::<chrono::NaiveTime>(row, idx)
            .map(|t| JsonValue::String(t.to_string()))
            .unwrap_or(JsonValue::Null),
        TypeCategory::Interval => decode_interval(row, idx, type_name),
        TypeCategory::Array => decode_array(row, idx, type_name),
        TypeCategory::Text | TypeCategory::Unknown => decode_text(row, idx, type_name),
    }
}

/// Decodes as a list of `T`, with SQL NULL elements as JSON null.
fn array_of<T>(row: &PgRow, idx: usize, to_json: fn(T) -> JsonValue) -> Option<JsonValue>
where
    T: for<'r> Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres> + PgHasArrayType,
{
    let values = row.try_get::<Option<Vec<Option<T>>>, _>(idx).ok()??;
    Some(JsonValue::Array(
        values
            .into_iter()
            .map(|v| v.map(to_json).unwrap_or(JsonValue::Null))
            .collect(),
    ))
}

/// Arrays of common element types become JSON arrays over both query
/// protocols; other element types fall back to the text decoder.
fn decode_array(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
    fn float(v: f64) -> JsonValue {
        serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()))
    }

    array_of::<i16>(row, idx, |v| v.into())
        .or_else(|| array_of::<i32>(row, idx, |v| v.into()))
        .or_else(|| array_of::<i64>(row, idx, |v| v.into()))
        .or_else(|| array_of::<f32>(row, idx, |v| float(v as f64)))
        .or_else(|| array_of::<f64>(row, idx, float))
        .or_else(|| array_of::<bool>(row, idx, JsonValue::Bool))
        .or_else(|| array_of::<String>(row, idx, JsonValue::String))
        .or_else(|| array_of::<sqlx::types::Uuid>(row, idx, |u| JsonValue::String(u.to_string())))
        .unwrap_or_else(|| decode_text(row, idx, type_name))
}

/// sqlx only decodes binary intervals; text ones are already in the
/// server's output style.
fn decode_interval(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
    match row.try_get::<Option<PgInterval>, _>(idx) {
        Ok(Some(v)) => JsonValue::String(format_interval(v.months, v.days, v.microseconds)),
        _ => decode_text(row, idx, type_name),
    }
}

/// Render an interval the way PostgreSQL's default `IntervalStyle` does,
/// e.g. `1 year 2 mons 3 days 04:05:06.5`.
pub fn format_interval(months: i32, days: i32, microseconds: i64) -> String {
    fn unit(n: i64, singular: &str, plural: &str) -> String {
        format!("{} {}", n, if n == 1 { singular } else { plural })
    }

    let mut parts = Vec::new();
    let (years, mons) = (months / 12, months % 12);
    if years != 0 {
        parts.push(unit(years.into(), "year", "years"));
    }
    if mons != 0 {
        parts.push(unit(mons.into(), "mon", "mons"));
    }
    if days != 0 {
        parts.push(unit(days.into(), "day", "days"));
    }

    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 { "-" } else { "" };
        let total = microseconds.unsigned_abs();
        let secs = total / 1_000_000;
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
        let frac = total % 1_000_000;
        if frac != 0 {
            let digits = format!("{:06}", frac);
            time.push('.');
            time.push_str(digits.trim_end_matches('0'));
        }
        parts.push(time);
    }

    parts.join(" ")
}

fn decode_as<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
where
    T: Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(column = idx, error = %e, "Failed to decode column");
            None
        }
    }
}

fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        Ok(Some(v)) => JsonValue::String(v.0),
        Ok(None) => JsonValue::Null,
        Err(e) => {
            tracing::error!("Failed to decode NUMERIC: {:?}", e);
            JsonValue::Null
        }
    }
}

fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<sqlx::postgres::types::Oid>, _>(idx) {
        return JsonValue::Number(v.0.into());
    }
    JsonValue::Null
}

fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
    let value = match row.try_get::<Option<f64>, _>(idx) {
        Ok(Some(v)) => v,
        _ => match row.try_get::<Option<f32>, _>(idx) {
            Ok(Some(v)) => v as f64,
            _ => return JsonValue::Null,
        },
    };
    serde_json::Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(value.to_string()))
}

/// Text columns, and any type without a dedicated decoder. Enum and domain
/// types are accepted as text. Other text-format values are the server's
/// own rendering; binary ones are reported by type name.
fn decode_text(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
        return JsonValue::String(v);
    }
    let text_format = row
        .try_get_raw(idx)
        .map(|v| matches!(v.format(), PgValueFormat::Text))
        .unwrap_or(false);
    if text_format {
        if let Ok(Some(v)) = row.try_get_unchecked::<Option<String>, _>(idx) {
            return JsonValue::String(v);
        }
    }
    JsonValue::String(format!("<{}>", type_name.to_lowercase()))
}

/// Normalize a PostgreSQL type name for display in schema output.
pub fn normalize_type_name(type_name: &str) -> String {
    let lower = type_name.to_lowercase();

    match lower.as_str() {
        "int4" | "integer" | "int" => "integer".to_string(),
        "int8" | "bigint" => "bigint".to_string(),
        "int2" | "smallint" => "smallint".to_string(),
        "varchar" | "character varying" => "varchar".to_string(),
        "bpchar" | "character" => "char".to_string(),
        "bool" | "boolean" => "boolean".to_string(),
        "float4" | "real" => "real".to_string(),
        "float8" | "double precision" => "double precision".to_string(),
        "timestamp without time zone" => "timestamp".to_string(),
        "timestamp with time zone" => "timestamptz".to_string(),
        _ => lower,
    }
}
