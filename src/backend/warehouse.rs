//! Databricks SQL warehouse connector.
//!
//! Statements are submitted to the Statement Execution API
//! (`POST /api/2.0/sql/statements`) and results are requested inline as JSON
//! arrays, then decoded using the column types from the result manifest.

use super::{render_ddl, with_deadline, Backend, BackendRole, Failure, FailureKind, QueryResult, Value};
use crate::dialect::{ColumnSchema, Dialect};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const ROLE: BackendRole = BackendRole::Primary;

/// Connection settings for the warehouse. Any missing field makes the
/// backend unavailable instead of failing construction.
#[derive(Clone, Default)]
pub struct WarehouseCredentials {
    pub host: Option<String>,
    pub token: Option<String>,
    pub warehouse_id: Option<String>,
}

impl WarehouseCredentials {
    pub fn new(
        host: impl Into<String>,
        token: impl Into<String>,
        warehouse_id: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            token: Some(token.into()),
            warehouse_id: Some(warehouse_id.into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        [&self.host, &self.token, &self.warehouse_id]
            .iter()
            .all(|v| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false))
    }

    /// Workspace base URL. Bare hosts get `https://`.
    pub fn base_url(&self) -> Option<String> {
        let host = self.host.as_deref()?.trim().trim_end_matches('/');
        let candidate = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        url::Url::parse(&candidate).ok()?;
        Some(candidate)
    }
}

impl fmt::Debug for WarehouseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseCredentials")
            .field("host", &self.host)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("warehouse_id", &self.warehouse_id)
            .finish()
    }
}

struct Connection {
    client: reqwest::Client,
    base_url: String,
    token: String,
    warehouse_id: String,
}

pub struct WarehouseBackend {
    credentials: WarehouseCredentials,
    timeout: Duration,
    wait_timeout_secs: u64,
    pool_max_idle_per_host: usize,
    connection: Mutex<Option<Arc<Connection>>>,
    last_connect_failed: AtomicBool,
}

impl WarehouseBackend {
    pub fn new(credentials: WarehouseCredentials, timeout: Duration) -> Self {
        Self {
            credentials,
            timeout,
            wait_timeout_secs: Self::server_wait_for(timeout),
            pool_max_idle_per_host: 8,
            connection: Mutex::new(None),
            last_connect_failed: AtomicBool::new(false),
        }
    }

    pub fn from_config(cfg: &crate::config::WarehouseConfig) -> Self {
        let mut backend = Self::new(cfg.credentials(), cfg.timeout());
        backend.pool_max_idle_per_host = cfg.pool_max_idle_per_host.max(1);
        backend
    }

    /// The statement API accepts 0 or 5..=50 seconds of server-side waiting.
    fn server_wait_for(timeout: Duration) -> u64 {
        timeout.as_secs().clamp(5, 50)
    }

    pub fn credentials(&self) -> &WarehouseCredentials {
        &self.credentials
    }

    async fn establish(&self) -> Option<Arc<Connection>> {
        let (Some(base_url), Some(token), Some(warehouse_id)) = (
            self.credentials.base_url(),
            self.credentials.token.clone(),
            self.credentials.warehouse_id.clone(),
        ) else {
            warn!(backend = ROLE.as_str(), "No Databricks credentials configured - using fallback mode");
            return None;
        };
        if !self.credentials.is_complete() {
            warn!(backend = ROLE.as_str(), "Incomplete Databricks credentials - using fallback mode");
            return None;
        }

        let client = match reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                error!(backend = ROLE.as_str(), operation = "connect", "Failed to build HTTP client: {}", e);
                return None;
            }
        };

        let conn = Connection {
            client,
            base_url,
            token,
            warehouse_id,
        };

        let probe = with_deadline(ROLE, "connect", self.timeout, probe_warehouse(&conn)).await;
        match probe {
            Ok(state) => {
                info!(
                    backend = ROLE.as_str(),
                    host = %self.identity(),
                    warehouse_state = state.as_str(),
                    "Successfully connected to Databricks"
                );
                Some(Arc::new(conn))
            }
            Err(failure) => {
                error!(
                    backend = ROLE.as_str(),
                    operation = "connect",
                    kind = failure.kind.as_str(),
                    "Failed to connect to Databricks: {}",
                    failure.message
                );
                None
            }
        }
    }

    /// Current connection, connecting once if there is none yet.
    async fn connection(&self) -> std::result::Result<Arc<Connection>, Failure> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let established = self.establish().await;
        self.last_connect_failed
            .store(established.is_none(), Ordering::SeqCst);
        match established {
            Some(conn) => {
                *guard = Some(conn.clone());
                Ok(conn)
            }
            None => Err(Failure::new(
                ROLE,
                "connect",
                FailureKind::ConnectionUnavailable,
                "warehouse connection could not be established",
            )),
        }
    }

    async fn run_statement(&self, sql: &str) -> std::result::Result<QueryResult, Failure> {
        let conn = self.connection().await?;
        let url = format!("{}/api/2.0/sql/statements", conn.base_url);
        let body = serde_json::json!({
            "statement": sql,
            "warehouse_id": conn.warehouse_id,
            "wait_timeout": format!("{}s", self.wait_timeout_secs),
            "on_wait_timeout": "CANCEL",
            "format": "JSON_ARRAY",
            "disposition": "INLINE",
        });

        let resp = conn
            .client
            .post(&url)
            .bearer_auth(&conn.token)
            .header("x-request-id", Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_failure("execute", e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| transport_failure("execute", e))?;
        if !status.is_success() {
            return Err(http_failure("execute", status.as_u16(), &text));
        }

        let parsed: StatementResponse = serde_json::from_str(&text).map_err(|e| {
            Failure::new(
                ROLE,
                "execute",
                FailureKind::QueryExecutionFailed,
                format!("unreadable statement response: {}", e),
            )
        })?;

        let (columns, (mut data, mut next)) = parsed.into_parts()?;
        while let Some(link) = next.take() {
            let chunk = fetch_chunk(&conn, &link).await?;
            data.extend(chunk.data_array.unwrap_or_default());
            next = chunk.next_chunk_internal_link;
        }

        let decoded = data
            .into_iter()
            .map(|raw| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| decode_cell(col.type_name.as_deref(), raw.get(i).cloned().flatten()))
                    .collect()
            })
            .collect();
        Ok(QueryResult::new(
            columns.into_iter().map(|c| c.name).collect(),
            decoded,
        ))
    }
}

#[async_trait]
impl Backend for WarehouseBackend {
    fn role(&self) -> BackendRole {
        ROLE
    }

    fn engine(&self) -> &'static str {
        "databricks"
    }

    fn identity(&self) -> String {
        self.credentials
            .host
            .clone()
            .unwrap_or_else(|| "unconfigured".to_string())
    }

    fn dialect(&self) -> Dialect {
        Dialect::Warehouse
    }

    fn is_available(&self) -> bool {
        self.credentials.is_complete() && !self.last_connect_failed.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> bool {
        let mut guard = self.connection.lock().await;
        let established = self.establish().await;
        self.last_connect_failed
            .store(established.is_none(), Ordering::SeqCst);
        let ok = established.is_some();
        *guard = established;
        ok
    }

    async fn execute(&self, sql: &str) -> std::result::Result<QueryResult, Failure> {
        let start = Instant::now();
        let outcome = with_deadline(ROLE, "execute", self.timeout, self.run_statement(sql)).await;
        match &outcome {
            Ok(result) => debug!(
                backend = ROLE.as_str(),
                rows = result.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "warehouse statement succeeded"
            ),
            Err(failure) => error!(
                backend = ROLE.as_str(),
                host = %self.identity(),
                operation = failure.operation.as_str(),
                kind = failure.kind.as_str(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Query execution failed: {}",
                failure.message
            ),
        }
        outcome
    }

    async fn create_table_if_not_exists(&self, name: &str, schema: &ColumnSchema) -> bool {
        let Some(ddl) = render_ddl(ROLE, Dialect::Warehouse, name, schema) else {
            return false;
        };
        match self.execute(&ddl).await {
            Ok(_) => {
                info!(backend = ROLE.as_str(), table = name, "Table ready");
                true
            }
            Err(failure) if failure.message.contains("ALREADY_EXISTS") => {
                info!(backend = ROLE.as_str(), table = name, "Table already exists");
                true
            }
            Err(failure) => {
                error!(
                    backend = ROLE.as_str(),
                    operation = "create_table",
                    table = name,
                    "Failed to create table: {}",
                    failure
                );
                false
            }
        }
    }

    async fn close(&self) {
        let mut guard = self.connection.lock().await;
        if guard.take().is_some() {
            info!(backend = ROLE.as_str(), "Closed Databricks connection");
        }
    }
}

async fn probe_warehouse(conn: &Connection) -> std::result::Result<String, Failure> {
    let url = format!("{}/api/2.0/sql/warehouses/{}", conn.base_url, conn.warehouse_id);
    let resp = conn
        .client
        .get(&url)
        .bearer_auth(&conn.token)
        .send()
        .await
        .map_err(|e| transport_failure("connect", e))?;
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| transport_failure("connect", e))?;
    if !status.is_success() {
        return Err(http_failure("connect", status.as_u16(), &text));
    }
    let info: WarehouseInfo = serde_json::from_str(&text).unwrap_or_default();
    let state = info.state.unwrap_or_else(|| "UNKNOWN".to_string());
    if matches!(state.as_str(), "DELETED" | "DELETING") {
        return Err(Failure::new(
            ROLE,
            "connect",
            FailureKind::ConnectionUnavailable,
            format!("warehouse is {}", state),
        ));
    }
    Ok(state)
}

async fn fetch_chunk(conn: &Connection, link: &str) -> std::result::Result<ResultData, Failure> {
    let url = format!("{}{}", conn.base_url, link);
    let resp = conn
        .client
        .get(&url)
        .bearer_auth(&conn.token)
        .send()
        .await
        .map_err(|e| transport_failure("fetch_chunk", e))?;
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| transport_failure("fetch_chunk", e))?;
    if !status.is_success() {
        return Err(http_failure("fetch_chunk", status.as_u16(), &text));
    }
    serde_json::from_str(&text).map_err(|e| {
        Failure::new(
            ROLE,
            "fetch_chunk",
            FailureKind::QueryExecutionFailed,
            format!("unreadable result chunk: {}", e),
        )
    })
}

fn transport_failure(operation: &str, e: reqwest::Error) -> Failure {
    let kind = if e.is_timeout() {
        FailureKind::TimedOut
    } else if e.is_connect() {
        FailureKind::ConnectionUnavailable
    } else {
        FailureKind::QueryExecutionFailed
    };
    Failure::new(ROLE, operation, kind, e.to_string())
}

fn http_failure(operation: &str, status: u16, body: &str) -> Failure {
    let detail = serde_json::from_str::<ServiceError>(body)
        .ok()
        .and_then(|e| e.describe())
        .unwrap_or_else(|| body.chars().take(200).collect());
    let kind = match status {
        401 | 403 | 404 => FailureKind::ConnectionUnavailable,
        _ => FailureKind::QueryExecutionFailed,
    };
    Failure::new(ROLE, operation, kind, format!("HTTP {}: {}", status, detail))
}

#[derive(Debug, Default, Deserialize)]
struct WarehouseInfo {
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: Option<String>,
    status: StatementStatus,
    manifest: Option<ResultManifest>,
    result: Option<ResultData>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    error_code: Option<String>,
    message: Option<String>,
}

impl ServiceError {
    fn describe(&self) -> Option<String> {
        match (&self.error_code, &self.message) {
            (Some(code), Some(msg)) => Some(format!("[{}] {}", code, msg)),
            (None, Some(msg)) => Some(msg.clone()),
            (Some(code), None) => Some(code.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResultManifest {
    schema: Option<ResultSchema>,
}

#[derive(Debug, Deserialize)]
struct ResultSchema {
    #[serde(default)]
    columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct ColumnInfo {
    name: String,
    type_name: Option<String>,
    position: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultData {
    data_array: Option<Vec<Vec<Option<String>>>>,
    next_chunk_internal_link: Option<String>,
}

type RawRows = (Vec<Vec<Option<String>>>, Option<String>);

impl StatementResponse {
    fn into_parts(self) -> std::result::Result<(Vec<ColumnInfo>, RawRows), Failure> {
        if self.status.state != "SUCCEEDED" {
            let detail = self
                .status
                .error
                .as_ref()
                .and_then(ServiceError::describe)
                .unwrap_or_else(|| "no error detail".to_string());
            return Err(Failure::new(
                ROLE,
                "execute",
                FailureKind::QueryExecutionFailed,
                format!(
                    "statement {} ended in state {}: {}",
                    self.statement_id.as_deref().unwrap_or("?"),
                    self.status.state,
                    detail
                ),
            ));
        }

        let mut columns = self
            .manifest
            .and_then(|m| m.schema)
            .map(|s| s.columns)
            .unwrap_or_default();
        columns.sort_by_key(|c| c.position.unwrap_or(usize::MAX));

        let result = self.result.unwrap_or_default();
        Ok((
            columns,
            (
                result.data_array.unwrap_or_default(),
                result.next_chunk_internal_link,
            ),
        ))
    }
}

/// Decode one JSON_ARRAY cell using the manifest type name.
fn decode_cell(type_name: Option<&str>, raw: Option<String>) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    let ty = type_name.unwrap_or("STRING").to_ascii_uppercase();
    match ty.as_str() {
        "BOOLEAN" => match raw.as_str() {
            "true" | "TRUE" => Value::Bool(true),
            "false" | "FALSE" => Value::Bool(false),
            _ => Value::Text(raw),
        },
        "BYTE" | "SHORT" | "INT" | "LONG" => raw.parse().map(Value::Int).unwrap_or(Value::Text(raw)),
        "FLOAT" | "DOUBLE" => raw.parse().map(Value::Float).unwrap_or(Value::Text(raw)),
        "DECIMAL" => Value::Decimal(raw),
        "DATE" => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map(Value::Date)
            .unwrap_or(Value::Text(raw)),
        "TIMESTAMP" | "TIMESTAMP_NTZ" => parse_timestamp(&raw)
            .map(Value::Timestamp)
            .unwrap_or(Value::Text(raw)),
        _ => Value::Text(raw),
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}
