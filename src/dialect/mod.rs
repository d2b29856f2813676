//! 方言转换模块：抽象列类型到各后端原生类型的映射，以及回退时的 SQL 片段改写。
//!
//! # Dialect Translation
//!
//! Pure, stateless helpers shared by the connectors (type translation and DDL
//! rendering) and the router (SQL-fragment rewriting on fallback).
//!
//! | Abstract type | Warehouse | Relational |
//! |---------------|-----------|------------|
//! | `text` | `STRING` | `TEXT` |
//! | `integer64` | `BIGINT` | `BIGINT` |
//! | `integer32` | `INT` | `INTEGER` |
//! | `double` | `DOUBLE` | `DOUBLE PRECISION` |
//! | `float32` | `FLOAT` | `REAL` |
//! | `boolean` | `BOOLEAN` | `BOOLEAN` |
//! | `timestamp` | `TIMESTAMP` | `TIMESTAMP` |
//! | `date` | `DATE` | `DATE` |
//! | `decimal` | `DECIMAL` | `DECIMAL` |
//!
//! Unknown types map to the backend's generic text type and produce a
//! [`SchemaWarning`] for the caller to log.

mod rewrite;
mod types;

pub use rewrite::rewrite_for_fallback;
pub use types::{AbstractType, ColumnSchema, ColumnType};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL dialect spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Databricks SQL (Delta tables).
    Warehouse,
    /// PostgreSQL.
    Relational,
}

impl Dialect {
    /// The type substituted for unknown abstract types.
    pub fn generic_text_type(&self) -> &'static str {
        match self {
            Dialect::Warehouse => "STRING",
            Dialect::Relational => "TEXT",
        }
    }

    pub fn native_for(&self, ty: AbstractType) -> &'static str {
        match (self, ty) {
            (Dialect::Warehouse, AbstractType::Text) => "STRING",
            (Dialect::Warehouse, AbstractType::Integer64) => "BIGINT",
            (Dialect::Warehouse, AbstractType::Integer32) => "INT",
            (Dialect::Warehouse, AbstractType::Double) => "DOUBLE",
            (Dialect::Warehouse, AbstractType::Float32) => "FLOAT",
            (Dialect::Relational, AbstractType::Text) => "TEXT",
            (Dialect::Relational, AbstractType::Integer64) => "BIGINT",
            (Dialect::Relational, AbstractType::Integer32) => "INTEGER",
            (Dialect::Relational, AbstractType::Double) => "DOUBLE PRECISION",
            (Dialect::Relational, AbstractType::Float32) => "REAL",
            (_, AbstractType::Boolean) => "BOOLEAN",
            (_, AbstractType::Timestamp) => "TIMESTAMP",
            (_, AbstractType::Date) => "DATE",
            (_, AbstractType::Decimal) => "DECIMAL",
        }
    }

    /// Translate a caller-supplied column type.
    ///
    /// Never fails: unknown types come back as the generic text type together
    /// with a warning describing the substitution.
    pub fn native_type(&self, column: &str, ty: &ColumnType) -> (&'static str, Option<SchemaWarning>) {
        match ty {
            ColumnType::Known(t) => (self.native_for(*t), None),
            ColumnType::Unknown(raw) => {
                let substituted = self.generic_text_type();
                let warning = SchemaWarning {
                    column: column.to_string(),
                    requested: raw.clone(),
                    substituted,
                    dialect: *self,
                };
                (substituted, Some(warning))
            }
        }
    }

    /// Render `CREATE TABLE IF NOT EXISTS` for this dialect.
    ///
    /// Identifiers are validated first since they are interpolated verbatim.
    pub fn create_table_ddl(
        &self,
        table: &str,
        schema: &ColumnSchema,
    ) -> std::result::Result<TableDdl, InvalidIdentifier> {
        validate_table_name(table)?;
        if schema.is_empty() {
            return Err(InvalidIdentifier {
                identifier: table.to_string(),
                reason: "schema has no columns",
            });
        }

        let mut warnings = Vec::new();
        let mut columns = Vec::with_capacity(schema.len());
        for (name, ty) in schema.columns() {
            validate_column_name(name)?;
            let (native, warning) = self.native_type(name, ty);
            warnings.extend(warning);
            columns.push(format!("{} {}", name, native));
        }

        let mut sql = format!("CREATE TABLE IF NOT EXISTS {} ({})", table, columns.join(", "));
        if *self == Dialect::Warehouse {
            sql.push_str(" USING DELTA");
        }
        Ok(TableDdl { sql, warnings })
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Warehouse => f.write_str("warehouse"),
            Dialect::Relational => f.write_str("relational"),
        }
    }
}

/// Non-fatal notice that a column type was not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaWarning {
    pub column: String,
    pub requested: String,
    pub substituted: &'static str,
    pub dialect: Dialect,
}

impl fmt::Display for SchemaWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown type '{}' for column '{}', using {} on {}",
            self.requested, self.column, self.substituted, self.dialect
        )
    }
}

/// Rendered DDL plus any type substitutions made while rendering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDdl {
    pub sql: String,
    pub warnings: Vec<SchemaWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier '{identifier}': {reason}")]
pub struct InvalidIdentifier {
    pub identifier: String,
    pub reason: &'static str,
}

static IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// `table`, `schema.table` or `catalog.schema.table`.
pub fn validate_table_name(name: &str) -> std::result::Result<(), InvalidIdentifier> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 3 || parts.iter().any(|p| !IDENT.is_match(p)) {
        return Err(InvalidIdentifier {
            identifier: name.to_string(),
            reason: "expected [catalog.][schema.]name made of letters, digits and underscores",
        });
    }
    Ok(())
}

pub fn validate_column_name(name: &str) -> std::result::Result<(), InvalidIdentifier> {
    if !IDENT.is_match(name) {
        return Err(InvalidIdentifier {
            identifier: name.to_string(),
            reason: "column names must be letters, digits and underscores",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicators() -> ColumnSchema {
        ColumnSchema::new()
            .with_column("series_id", AbstractType::Text)
            .with_column("observed_on", AbstractType::Date)
            .with_column("value", AbstractType::Double)
            .with_column("revision", AbstractType::Integer32)
    }

    #[test]
    fn test_every_known_type_has_a_native_name() {
        for dialect in [Dialect::Warehouse, Dialect::Relational] {
            for t in AbstractType::ALL {
                let (native, warning) = dialect.native_type("c", &ColumnType::Known(t));
                assert!(!native.is_empty());
                assert!(warning.is_none());
            }
        }
    }

    #[test]
    fn test_unknown_type_falls_back_to_text() {
        let ty = ColumnType::parse("exotic_type");
        let (native, warning) = Dialect::Relational.native_type("payload", &ty);
        assert_eq!(native, "TEXT");
        let warning = warning.expect("substitution should be reported");
        assert_eq!(warning.requested, "exotic_type");
        assert_eq!(warning.substituted, "TEXT");

        let (native, _) = Dialect::Warehouse.native_type("payload", &ty);
        assert_eq!(native, "STRING");
    }

    #[test]
    fn test_relational_ddl() {
        let ddl = Dialect::Relational
            .create_table_ddl("economic_indicators", &indicators())
            .unwrap();
        assert_eq!(
            ddl.sql,
            "CREATE TABLE IF NOT EXISTS economic_indicators (series_id TEXT, observed_on DATE, value DOUBLE PRECISION, revision INTEGER)"
        );
        assert!(ddl.warnings.is_empty());
    }

    #[test]
    fn test_warehouse_ddl_uses_delta() {
        let ddl = Dialect::Warehouse
            .create_table_ddl("main.econ.indicators", &indicators())
            .unwrap();
        assert!(ddl.sql.starts_with("CREATE TABLE IF NOT EXISTS main.econ.indicators (series_id STRING"));
        assert!(ddl.sql.ends_with(" USING DELTA"));
    }

    #[test]
    fn test_ddl_collects_warnings() {
        let schema = indicators().with_column("blob", "exotic_type");
        let ddl = Dialect::Relational.create_table_ddl("t", &schema).unwrap();
        assert!(ddl.sql.contains("blob TEXT"));
        assert_eq!(ddl.warnings.len(), 1);
    }

    #[test]
    fn test_identifiers_are_validated() {
        assert!(validate_table_name("econ.indicators").is_ok());
        assert!(validate_table_name("a.b.c.d").is_err());
        assert!(validate_table_name("t; DROP TABLE users").is_err());
        assert!(validate_column_name("value").is_ok());
        assert!(validate_column_name("1value").is_err());

        let schema = ColumnSchema::new().with_column("bad name", AbstractType::Text);
        assert!(Dialect::Relational.create_table_ddl("t", &schema).is_err());
        assert!(Dialect::Relational
            .create_table_ddl("t", &ColumnSchema::new())
            .is_err());
    }
}
