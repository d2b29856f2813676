//! Typed tabular results and connector failures.

use super::BackendRole;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single scalar cell.
///
/// Serializes untagged so results render as plain JSON arrays.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numerics are kept in their textual form to avoid precision loss.
    Decimal(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Column-tagged rows returned by a backend.
///
/// Every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Result of a statement that returns no columns (DDL, DML without RETURNING).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Cell lookup by row number and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Iterate rows as `(column, value)` pairs.
    pub fn records(&self) -> impl Iterator<Item = Vec<(&str, &Value)>> + '_ {
        self.rows.iter().map(move |row| {
            self.columns
                .iter()
                .map(String::as_str)
                .zip(row.iter())
                .collect()
        })
    }
}

/// Why a backend could not serve a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ConnectionUnavailable,
    QueryExecutionFailed,
    TimedOut,
    /// The statement uses warehouse syntax with no fallback rewrite.
    UnsupportedOnFallback,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ConnectionUnavailable => "connection_unavailable",
            FailureKind::QueryExecutionFailed => "query_execution_failed",
            FailureKind::TimedOut => "timed_out",
            FailureKind::UnsupportedOnFallback => "unsupported_on_fallback",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single failure signal a connector hands back to the router.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{backend} {operation} failed ({kind}): {message}")]
pub struct Failure {
    pub backend: BackendRole,
    pub operation: String,
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(
        backend: BackendRole,
        operation: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            operation: operation.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn timed_out(backend: BackendRole, operation: &str, after: std::time::Duration) -> Self {
        Self::new(
            backend,
            operation,
            FailureKind::TimedOut,
            format!("no response within {}ms", after.as_millis()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QueryResult {
        QueryResult::new(
            vec!["series".into(), "value".into()],
            vec![
                vec![Value::Text("CPI".into()), Value::Float(2.9)],
                vec![Value::Text("GDP".into()), Value::Null],
            ],
        )
    }

    #[test]
    fn test_cell_lookup_is_case_insensitive() {
        let result = sample();
        assert_eq!(result.get(0, "VALUE"), Some(&Value::Float(2.9)));
        assert!(result.get(1, "value").map(Value::is_null).unwrap_or(false));
        assert_eq!(result.get(2, "value"), None);
        assert_eq!(result.get(0, "missing"), None);
    }

    #[test]
    fn test_records_pair_columns_with_cells() {
        let result = sample();
        let records: Vec<_> = result.records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0][0], ("series", &Value::Text("CPI".into())));
    }

    #[test]
    fn test_values_serialize_as_plain_json() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["rows"][0][0], "CPI");
        assert_eq!(json["rows"][0][1], 2.9);
        assert!(json["rows"][1][1].is_null());
    }

    #[test]
    fn test_failure_display_names_backend_and_kind() {
        let failure = Failure::new(
            BackendRole::Fallback,
            "execute",
            FailureKind::UnsupportedOnFallback,
            "OPTIMIZE has no relational equivalent",
        );
        let msg = failure.to_string();
        assert!(msg.starts_with("fallback execute failed (unsupported_on_fallback)"));
    }
}
