//! Query parameters and named placeholder rewriting.
//!
//! Tools accept queries with `$name` placeholders and a JSON object of values.
//! PostgreSQL only understands positional `$1, $2, ...`, so the query text is
//! rewritten before execution and the values are ordered to match.

use crate::error::{DbError, DbResult};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

/// A parameter value bound to a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Arrays and objects, bound as `jsonb`.
    Json(JsonValue),
}

impl QueryParam {
    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int8",
            Self::Float(_) => "float8",
            Self::String(_) => "text",
            Self::Json(_) => "jsonb",
        }
    }
}

impl From<&JsonValue> for QueryParam {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => QueryParam::Null,
            JsonValue::Bool(b) => QueryParam::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => QueryParam::Int(i),
                None => QueryParam::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => QueryParam::String(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => QueryParam::Json(value.clone()),
        }
    }
}

/// Parameters as supplied by a tool call: either a JSON object or a string
/// containing one (older clients send the object pre-serialized).
#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
#[serde(untagged)]
pub enum ParamsInput {
    Object(Map<String, JsonValue>),
    Text(String),
}

impl ParamsInput {
    /// Resolve to a JSON object, parsing the string form if needed.
    pub fn into_map(self) -> DbResult<Map<String, JsonValue>> {
        match self {
            ParamsInput::Object(map) => Ok(map),
            ParamsInput::Text(text) if text.trim().is_empty() => Ok(Map::new()),
            ParamsInput::Text(text) => match serde_json::from_str::<JsonValue>(&text) {
                Ok(JsonValue::Object(map)) => Ok(map),
                Ok(other) => Err(DbError::invalid_input(format!(
                    "Parameters must be a JSON object, got {}",
                    json_kind(&other)
                ))),
                Err(e) => Err(DbError::invalid_input(format!(
                    "Parameters must be valid JSON: {}",
                    e
                ))),
            },
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// A query whose named placeholders were rewritten to positional ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedQuery {
    /// SQL with `$1..$n` placeholders.
    pub sql: String,
    /// Placeholder names in positional order (`names[0]` is `$1`).
    pub names: Vec<String>,
}

impl NamedQuery {
    /// Rewrite `$name` placeholders in `sql`.
    ///
    /// Placeholders inside string literals, quoted identifiers, comments and
    /// dollar-quoted bodies are left alone. A name used twice maps to the same
    /// position. Mixing named and positional (`$1`) placeholders is rejected.
    pub fn parse(sql: &str) -> DbResult<Self> {
        let chars: Vec<char> = sql.chars().collect();
        let mut out = String::with_capacity(sql.len());
        let mut names: Vec<String> = Vec::new();
        let mut saw_positional = false;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();
            match c {
                '\'' => {
                    let backslash_escapes =
                        i > 0 && matches!(chars[i - 1], 'E' | 'e') && !is_ident_char_before(&chars, i - 1);
                    let end = skip_quoted(&chars, i, '\'', backslash_escapes);
                    out.extend(&chars[i..end]);
                    i = end;
                }
                '"' => {
                    let end = skip_quoted(&chars, i, '"', false);
                    out.extend(&chars[i..end]);
                    i = end;
                }
                '-' if next == Some('-') => {
                    let end = chars[i..]
                        .iter()
                        .position(|&ch| ch == '\n')
                        .map(|p| i + p)
                        .unwrap_or(chars.len());
                    out.extend(&chars[i..end]);
                    i = end;
                }
                '/' if next == Some('*') => {
                    let end = find_seq(&chars, i + 2, &['*', '/'])
                        .map(|p| p + 2)
                        .unwrap_or(chars.len());
                    out.extend(&chars[i..end]);
                    i = end;
                }
                '$' => {
                    if let Some(tag_end) = dollar_tag_end(&chars, i) {
                        let tag: Vec<char> = chars[i..tag_end].to_vec();
                        let end = find_seq(&chars, tag_end, &tag)
                            .map(|p| p + tag.len())
                            .unwrap_or(chars.len());
                        out.extend(&chars[i..end]);
                        i = end;
                    } else if next.is_some_and(is_ident_start) {
                        let start = i + 1;
                        let mut end = start;
                        while end < chars.len() && is_ident_char(chars[end]) {
                            end += 1;
                        }
                        let name: String = chars[start..end].iter().collect();
                        let position = match names.iter().position(|n| n == &name) {
                            Some(p) => p,
                            None => {
                                names.push(name);
                                names.len() - 1
                            }
                        };
                        out.push_str(&format!("${}", position + 1));
                        i = end;
                    } else {
                        if next.is_some_and(|ch| ch.is_ascii_digit()) {
                            saw_positional = true;
                        }
                        out.push(c);
                        i += 1;
                    }
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            }
        }

        if saw_positional && !names.is_empty() {
            return Err(DbError::invalid_input(
                "Cannot mix named ($name) and positional ($1) placeholders in one query",
            ));
        }

        Ok(Self { sql: out, names })
    }

    /// Order the supplied values to match the positional placeholders.
    ///
    /// Every placeholder needs a value. Extra values are ignored.
    pub fn bind(&self, values: &Map<String, JsonValue>) -> DbResult<Vec<QueryParam>> {
        let params = self
            .names
            .iter()
            .map(|name| {
                values.get(name).map(QueryParam::from).ok_or_else(|| {
                    DbError::invalid_input(format!(
                        "Missing value for parameter ${}. Provided parameters: [{}]",
                        name,
                        values.keys().cloned().collect::<Vec<_>>().join(", ")
                    ))
                })
            })
            .collect::<DbResult<Vec<_>>>()?;

        let unused: Vec<&String> = values
            .keys()
            .filter(|key| !self.names.contains(key))
            .collect();
        if !unused.is_empty() {
            debug!(unused = ?unused, "Ignoring parameters not referenced by the query");
        }

        Ok(params)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// True when the character before `idx` continues an identifier, so that a
/// trailing `E` belongs to a word rather than starting an escape string.
fn is_ident_char_before(chars: &[char], idx: usize) -> bool {
    idx > 0 && is_ident_char(chars[idx - 1])
}

/// Index just past the closing quote. Doubled quotes are escapes.
fn skip_quoted(chars: &[char], start: usize, quote: char, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if backslash_escapes && c == '\\' {
            i += 2;
            continue;
        }
        if c == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// If a dollar-quote opening tag (`$$` or `$tag$`) starts at `start`,
/// return the index just past it.
fn dollar_tag_end(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    match chars.get(i) {
        Some('$') => return Some(i + 1),
        Some(&c) if is_ident_start(c) => {}
        _ => return None,
    }
    while i < chars.len() && is_ident_char(chars[i]) {
        i += 1;
    }
    (chars.get(i) == Some(&'$')).then_some(i + 1)
}

fn find_seq(chars: &[char], from: usize, needle: &[char]) -> Option<usize> {
    if needle.is_empty() || from >= chars.len() {
        return None;
    }
    chars[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}
