//! 后端连接器模块：分析型数据仓库（主）与关系型存储（回退）的统一执行接口。
//!
//! # Backend Connectors
//!
//! Both backends implement [`Backend`]: execute a statement and return typed
//! rows or a [`Failure`], and create a table from a [`ColumnSchema`].
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`WarehouseBackend`] | Databricks SQL over the Statement Execution REST API |
//! | [`PostgresBackend`] | PostgreSQL through a lazily connected `sqlx` pool |
//! | [`QueryResult`] | Column names plus rows of [`Value`] |
//! | [`Failure`] | The single failure signal handed back to the router |
//!
//! Connectors never let transport or driver errors escape: every problem is
//! logged with the backend identity and operation, then folded into a
//! [`Failure`] (or `false` for table creation).

mod postgres;
pub mod result;
mod warehouse;

pub use postgres::PostgresBackend;
pub use result::{Failure, FailureKind, QueryResult, Value};
pub use warehouse::{WarehouseBackend, WarehouseCredentials};

use crate::dialect::{ColumnSchema, Dialect};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Position of a backend in the routing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendRole {
    Primary,
    Fallback,
}

impl BackendRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendRole::Primary => "primary",
            BackendRole::Fallback => "fallback",
        }
    }
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn role(&self) -> BackendRole;

    /// Short engine name, e.g. `"databricks"` or `"postgresql"`.
    fn engine(&self) -> &'static str;

    /// Host for remote backends, `"local"` for the relational store.
    fn identity(&self) -> String;

    fn dialect(&self) -> Dialect;

    /// Cached availability; not a live health probe.
    fn is_available(&self) -> bool;

    /// Establish the connection ahead of the first call.
    async fn connect(&self) -> bool {
        true
    }

    async fn execute(&self, sql: &str) -> std::result::Result<QueryResult, Failure>;

    /// Idempotent; `false` on any error other than "already exists".
    async fn create_table_if_not_exists(&self, name: &str, schema: &ColumnSchema) -> bool;

    async fn close(&self) {}
}

/// Run a connector future under a deadline, turning expiry into a [`Failure`].
pub(crate) async fn with_deadline<T, F>(
    role: BackendRole,
    operation: &str,
    deadline: Duration,
    fut: F,
) -> std::result::Result<T, Failure>
where
    F: Future<Output = std::result::Result<T, Failure>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Failure::timed_out(role, operation, deadline)),
    }
}

/// Render DDL for `dialect`, logging every type substitution.
pub(crate) fn render_ddl(
    role: BackendRole,
    dialect: Dialect,
    name: &str,
    schema: &ColumnSchema,
) -> Option<String> {
    match dialect.create_table_ddl(name, schema) {
        Ok(ddl) => {
            for warning in &ddl.warnings {
                tracing::warn!(backend = role.as_str(), table = name, "{}", warning);
            }
            Some(ddl.sql)
        }
        Err(e) => {
            tracing::error!(
                backend = role.as_str(),
                operation = "create_table",
                table = name,
                "Refusing to create table: {}",
                e
            );
            None
        }
    }
}
