//! Error translation for tool results.
//!
//! A failed tool call is reported as readable text: the operation that
//! failed, the underlying message, and, when the message matches a known
//! pattern, a remediation hint. Patterns live in two ordered tables matched
//! against the lower-cased message; the first match in each table wins.
//!
//! - [`CATEGORY_RULES`]: broad failure categories (type mismatch, missing
//!   object, permission, syntax, connection).
//! - [`EXAMPLE_RULES`]: query-shape mistakes that are easier to fix from a
//!   worked example than from prose.

use crate::error::DbError;

/// A message predicate and the hint attached when it matches.
#[derive(Debug, Clone, Copy)]
pub struct HintRule {
    pub name: &'static str,
    /// Lower-cased substrings; the rule matches if any is present.
    pub patterns: &'static [&'static str],
    pub hint: &'static str,
}

impl HintRule {
    pub fn matches(&self, lowered: &str) -> bool {
        self.patterns.iter().any(|p| lowered.contains(p))
    }
}

pub const CATEGORY_RULES: &[HintRule] = &[
    // Ahead of missing_object: "operator does not exist" is a type problem
    HintRule {
        name: "type_mismatch",
        patterns: &[
            "operator does not exist",
            "could not determine data type",
            "inconsistent types deduced",
            "invalid input syntax for type",
        ],
        hint: "A value does not match the type the query expects. Cast the value or parameter to the column's type.",
    },
    HintRule {
        name: "missing_object",
        patterns: &["does not exist"],
        hint: "Check that the table, column or database exists and that its name is spelled correctly.",
    },
    HintRule {
        name: "permission_denied",
        patterns: &["permission denied", "must be owner", "must be superuser"],
        hint: "The current user may not have sufficient privileges for this operation.",
    },
    HintRule {
        name: "syntax_error",
        patterns: &["syntax error"],
        hint: "The query has a syntax error. Check the SQL syntax near the reported position.",
    },
    HintRule {
        name: "connection",
        patterns: &["connection", "connect tool"],
        hint: "There is a connection problem. Check that the database connection is still valid, or call the connect tool again.",
    },
];

pub const EXAMPLE_RULES: &[HintRule] = &[
    HintRule {
        name: "grouping",
        patterns: &[
            "must appear in the group by clause",
            "aggregate functions are not allowed in where",
        ],
        hint: "Every selected column must either be aggregated or listed in GROUP BY, and aggregates are filtered with HAVING, for example:\n\
SELECT department, count(*) FROM employees GROUP BY department HAVING count(*) > 5\n\
instead of:\n\
SELECT department, name, count(*) FROM employees WHERE count(*) > 5",
    },
    HintRule {
        name: "parameter_type",
        patterns: &[
            "could not determine data type of parameter",
            "operator does not exist",
            "inconsistent types deduced for parameter",
        ],
        hint: "Parameters may need an explicit type cast, for example:\n\
SELECT * FROM users WHERE id = $id::uuid AND created_at > $since::timestamptz\n\
instead of:\n\
SELECT * FROM users WHERE id = $id AND created_at > $since",
    },
];

/// First rule in `rules` whose predicate matches `message`.
pub fn first_match<'a>(rules: &'a [HintRule], message: &str) -> Option<&'a HintRule> {
    let lowered = message.to_lowercase();
    rules.iter().find(|rule| rule.matches(&lowered))
}

/// Render a failed operation as user-facing text.
///
/// ```text
/// <operation> failed: <message>
///
/// Hint: <category hint>
///
/// <tool hint>
///
/// <example hint>
/// ```
/// Sections without content are omitted.
pub fn describe_failure(operation: &str, err: &DbError, tool_hint: Option<&str>) -> String {
    let message = err.to_string();
    let mut text = format!("{} failed: {}", operation, message);

    if let Some(rule) = first_match(CATEGORY_RULES, &message) {
        text.push_str("\n\nHint: ");
        text.push_str(rule.hint);
    }
    if let Some(hint) = tool_hint.filter(|h| !h.is_empty()) {
        text.push_str("\n\n");
        text.push_str(hint);
    }
    if let Some(rule) = first_match(EXAMPLE_RULES, &message) {
        text.push_str("\n\n");
        text.push_str(rule.hint);
    }

    text
}
