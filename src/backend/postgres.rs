//! PostgreSQL fallback connector.

use super::{render_ddl, with_deadline, Backend, BackendRole, Failure, FailureKind, QueryResult, Value};
use crate::dialect::{ColumnSchema, Dialect};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::postgres::types::{PgInterval, PgTimeTz};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const ROLE: BackendRole = BackendRole::Fallback;

/// The relational store is assumed reachable; the pool connects lazily so
/// construction never blocks or fails on a down database.
pub struct PostgresBackend {
    pool: PgPool,
    timeout: Duration,
}

impl PostgresBackend {
    pub fn connect_lazy(database_url: &str, max_connections: u32, timeout: Duration) -> crate::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(timeout)
            .connect_lazy(database_url)
            .map_err(|e| {
                crate::Error::configuration_with_context(
                    format!("Invalid relational database URL: {}", e),
                    crate::ErrorContext::new()
                        .with_field_path("relational.database_url")
                        .with_source("postgres_backend"),
                )
            })?;
        Ok(Self { pool, timeout })
    }

    pub fn from_config(cfg: &crate::config::RelationalConfig) -> crate::Result<Self> {
        Self::connect_lazy(&cfg.database_url, cfg.max_connections, cfg.timeout())
    }

    /// Wrap an existing pool (shared with the rest of the application).
    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn run_query(&self, sql: &str) -> std::result::Result<QueryResult, Failure> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| driver_failure("execute", e))?;

        // Prepared first so an empty result still reports its columns.
        let columns: Vec<String> = {
            let statement = (&mut *conn)
                .prepare(sql)
                .await
                .map_err(|e| driver_failure("execute", e))?;
            statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect()
        };

        let rows = sqlx::query(sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| driver_failure("execute", e))?;

        let decoded = rows.iter().map(decode_row).collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(QueryResult::new(columns, decoded))
    }

    async fn run_ddl(&self, ddl: &str) -> std::result::Result<(), Failure> {
        match sqlx::query(ddl).execute(&self.pool).await {
            Ok(_) => Ok(()),
            // Concurrent IF NOT EXISTS creates can still collide in the catalog.
            Err(sqlx::Error::Database(db)) if is_already_exists(db.code().as_deref()) => {
                let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
                info!(backend = ROLE.as_str(), code = code.as_str(), "Table already exists");
                Ok(())
            }
            Err(e) => Err(driver_failure("create_table", e)),
        }
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn role(&self) -> BackendRole {
        ROLE
    }

    fn engine(&self) -> &'static str {
        "postgresql"
    }

    fn identity(&self) -> String {
        "local".to_string()
    }

    fn dialect(&self) -> Dialect {
        Dialect::Relational
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn execute(&self, sql: &str) -> std::result::Result<QueryResult, Failure> {
        let start = Instant::now();
        let outcome = with_deadline(ROLE, "execute", self.timeout, self.run_query(sql)).await;
        match &outcome {
            Ok(result) => debug!(
                backend = ROLE.as_str(),
                rows = result.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "relational query succeeded"
            ),
            Err(failure) => error!(
                backend = ROLE.as_str(),
                operation = failure.operation.as_str(),
                kind = failure.kind.as_str(),
                duration_ms = start.elapsed().as_millis() as u64,
                "PostgreSQL query failed: {}",
                failure.message
            ),
        }
        outcome
    }

    async fn create_table_if_not_exists(&self, name: &str, schema: &ColumnSchema) -> bool {
        let Some(ddl) = render_ddl(ROLE, Dialect::Relational, name, schema) else {
            return false;
        };
        match with_deadline(ROLE, "create_table", self.timeout, self.run_ddl(&ddl)).await {
            Ok(()) => {
                info!(backend = ROLE.as_str(), table = name, "PostgreSQL table created successfully");
                true
            }
            Err(failure) => {
                error!(
                    backend = ROLE.as_str(),
                    operation = "create_table",
                    table = name,
                    "Failed to create PostgreSQL table: {}",
                    failure
                );
                false
            }
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        info!(backend = ROLE.as_str(), "Closed PostgreSQL pool");
    }
}

fn driver_failure(operation: &str, e: sqlx::Error) -> Failure {
    let kind = match &e {
        sqlx::Error::PoolTimedOut => FailureKind::TimedOut,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed => {
            FailureKind::ConnectionUnavailable
        }
        _ => FailureKind::QueryExecutionFailed,
    };
    Failure::new(ROLE, operation, kind, e.to_string())
}

/// `42P07` is duplicate_table; `23505` is the unique violation on
/// `pg_type_typname_nsp_index` raised when two creates race.
fn is_already_exists(code: Option<&str>) -> bool {
    matches!(code, Some("42P07") | Some("23505"))
}

fn decode_row(row: &PgRow) -> std::result::Result<Vec<Value>, Failure> {
    (0..row.len()).map(|i| decode_cell(row, i)).collect()
}

/// Decode by Postgres type name. Types without a mapping are read as text;
/// a non-null value that cannot be read at all fails the query.
fn decode_cell(row: &PgRow, i: usize) -> std::result::Result<Value, Failure> {
    let column = row.column(i);
    let type_name = column.type_info().name().to_ascii_uppercase();
    let undecodable = |e: sqlx::Error| {
        Failure::new(
            ROLE,
            "execute",
            FailureKind::QueryExecutionFailed,
            format!(
                "column '{}' of type {} could not be decoded: {}",
                column.name(),
                type_name,
                e
            ),
        )
    };

    if row.try_get_raw(i).map_err(undecodable)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name.as_str() {
        "BOOL" => Value::Bool(row.try_get(i).map_err(undecodable)?),
        "INT2" => Value::Int(row.try_get::<i16, _>(i).map_err(undecodable)? as i64),
        "INT4" => Value::Int(row.try_get::<i32, _>(i).map_err(undecodable)? as i64),
        "INT8" => Value::Int(row.try_get(i).map_err(undecodable)?),
        "OID" => Value::Int(row.try_get::<sqlx::postgres::types::Oid, _>(i).map_err(undecodable)?.0 as i64),
        "FLOAT4" => Value::Float(row.try_get::<f32, _>(i).map_err(undecodable)? as f64),
        "FLOAT8" => Value::Float(row.try_get(i).map_err(undecodable)?),
        "NUMERIC" => Value::Decimal(
            row.try_get::<sqlx::types::Decimal, _>(i)
                .map_err(undecodable)?
                .to_string(),
        ),
        "DATE" => Value::Date(row.try_get(i).map_err(undecodable)?),
        "TIMESTAMP" => Value::Timestamp(row.try_get(i).map_err(undecodable)?),
        "TIMESTAMPTZ" => Value::Timestamp(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(i)
                .map_err(undecodable)?
                .naive_utc(),
        ),
        "TIME" => Value::Text(
            row.try_get::<chrono::NaiveTime, _>(i)
                .map_err(undecodable)?
                .to_string(),
        ),
        "TIMETZ" => {
            let t: PgTimeTz<chrono::NaiveTime, chrono::FixedOffset> =
                row.try_get(i).map_err(undecodable)?;
            Value::Text(format!("{}{}", t.time, t.offset))
        }
        "INTERVAL" => Value::Text(format_interval(&row.try_get::<PgInterval, _>(i).map_err(undecodable)?)),
        "BYTEA" => Value::Text(format_bytea(&row.try_get::<Vec<u8>, _>(i).map_err(undecodable)?)),
        "UUID" => Value::Text(
            row.try_get::<sqlx::types::Uuid, _>(i)
                .map_err(undecodable)?
                .to_string(),
        ),
        "JSON" | "JSONB" => Value::Text(
            row.try_get::<sqlx::types::JsonValue, _>(i)
                .map_err(undecodable)?
                .to_string(),
        ),
        _ => Value::Text(row.try_get::<String, _>(i).map_err(undecodable)?),
    };
    Ok(value)
}

/// Render an interval the way PostgreSQL's default `IntervalStyle` does,
/// e.g. `1 year 2 mons 3 days 04:05:06.5`.
fn format_interval(interval: &PgInterval) -> String {
    let mut parts = Vec::new();
    let years = interval.months / 12;
    let months = interval.months % 12;
    let unit = |n: i64, singular: &str, plural: &str| {
        format!("{} {}", n, if n.abs() == 1 { singular } else { plural })
    };
    if years != 0 {
        parts.push(unit(years as i64, "year", "years"));
    }
    if months != 0 {
        parts.push(unit(months as i64, "mon", "mons"));
    }
    if interval.days != 0 {
        parts.push(unit(interval.days as i64, "day", "days"));
    }
    if interval.microseconds != 0 || parts.is_empty() {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let micros = interval.microseconds.unsigned_abs();
        let secs = micros / 1_000_000;
        let frac = micros % 1_000_000;
        let mut clock = format!("{}{:02}:{:02}:{:02}", sign, secs / 3600, secs / 60 % 60, secs % 60);
        if frac != 0 {
            let digits = format!("{:06}", frac);
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

/// Hex output format, as `bytea_output = 'hex'` prints it.
fn format_bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
