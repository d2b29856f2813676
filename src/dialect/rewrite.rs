//! Best-effort rewriting of warehouse SQL for the relational fallback.
//!
//! This is a fixed list of regex substitutions, not a parser. Statements using
//! warehouse syntax without a rule here are refused with
//! [`FailureKind::UnsupportedOnFallback`] when they match one of the known
//! patterns; anything else passes through untouched and may still fail on the
//! fallback. Patterns are matched anywhere in the text, string literals
//! included.

use super::Dialect;
use crate::backend::{BackendRole, Failure, FailureKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

struct Unsupported {
    pattern: Regex,
    feature: &'static str,
}

static UNSUPPORTED: Lazy<Vec<Unsupported>> = Lazy::new(|| {
    [
        (r"(?i)^\s*OPTIMIZE\b", "OPTIMIZE"),
        (r"(?i)\bZORDER\s+BY\b", "ZORDER BY"),
        (r"(?i)^\s*VACUUM\b[^;]*\bRETAIN\b", "VACUUM ... RETAIN"),
        (r"(?i)\bTBLPROPERTIES\b", "TBLPROPERTIES"),
        (r"(?i)\b(?:VERSION|TIMESTAMP)\s+AS\s+OF\b", "time travel (AS OF)"),
        (r"(?i)^\s*(?:UN)?CACHE\s+TABLE\b", "CACHE TABLE"),
        (r"(?i)^\s*REFRESH\s+TABLE\b", "REFRESH TABLE"),
        (r"(?i)\b(?:SHALLOW|DEEP)\s+CLONE\b", "CLONE"),
    ]
    .into_iter()
    .map(|(p, feature)| Unsupported {
        pattern: Regex::new(p).unwrap(),
        feature,
    })
    .collect()
});

static USING_DELTA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*\bUSING\s+DELTA\b").unwrap());

static DESCRIBE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*DESC(?:RIBE)?\s+(?:EXTENDED\s+|TABLE\s+)?([A-Za-z_]\w*(?:\.[A-Za-z_]\w*){0,2})\s*;?\s*$")
        .unwrap()
});

static SHOW_TABLES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*SHOW\s+TABLES\s*;?\s*$").unwrap());

/// Prepare `sql`, written for `from`, to run on `to`.
///
/// Same-dialect calls return the input unchanged.
pub fn rewrite_for_fallback<'a>(
    sql: &'a str,
    from: Dialect,
    to: Dialect,
) -> std::result::Result<Cow<'a, str>, Failure> {
    if from == to || to != Dialect::Relational {
        return Ok(Cow::Borrowed(sql));
    }

    if let Some(rule) = UNSUPPORTED.iter().find(|r| r.pattern.is_match(sql)) {
        return Err(Failure::new(
            BackendRole::Fallback,
            "rewrite",
            FailureKind::UnsupportedOnFallback,
            format!("{} has no {} equivalent", rule.feature, to),
        ));
    }

    if let Some(caps) = DESCRIBE.captures(sql) {
        return Ok(Cow::Owned(describe_as_information_schema(&caps[1])));
    }

    if SHOW_TABLES.is_match(sql) {
        return Ok(Cow::Borrowed(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = current_schema() ORDER BY table_name",
        ));
    }

    Ok(USING_DELTA.replace_all(sql, ""))
}

fn describe_as_information_schema(qualified: &str) -> String {
    let parts: Vec<&str> = qualified.split('.').collect();
    let table = parts[parts.len() - 1];
    let mut sql = format!(
        "SELECT column_name, data_type FROM information_schema.columns WHERE table_name = '{}'",
        table
    );
    if parts.len() >= 2 {
        sql.push_str(&format!(" AND table_schema = '{}'", parts[parts.len() - 2]));
    }
    sql.push_str(" ORDER BY ordinal_position");
    sql
}
