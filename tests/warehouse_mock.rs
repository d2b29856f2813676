//! Warehouse connector against a mocked Statement Execution API.

mod support;

use hybrid_db_router::backend::{WarehouseBackend, WarehouseCredentials};
use hybrid_db_router::{
    AbstractType, Backend, BackendRole, ColumnSchema, FailureKind, HybridRouter, RouteReason, Value,
};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::FakeBackend;

const WAREHOUSE: &str = "wh-test";

fn backend_for(server: &ServerGuard) -> WarehouseBackend {
    WarehouseBackend::new(
        WarehouseCredentials::new(server.url(), "dapi-test-token", WAREHOUSE),
        Duration::from_secs(5),
    )
}

async fn mock_running_warehouse(server: &mut ServerGuard) -> mockito::Mock {
    server
        .mock("GET", format!("/api/2.0/sql/warehouses/{}", WAREHOUSE).as_str())
        .match_header("authorization", "Bearer dapi-test-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": WAREHOUSE, "state": "RUNNING"}).to_string())
        .create_async()
        .await
}

#[tokio::test]
async fn test_connect_and_query_typed_rows() {
    let mut server = Server::new_async().await;
    let probe = mock_running_warehouse(&mut server).await;
    let statement = server
        .mock("POST", "/api/2.0/sql/statements")
        .match_body(Matcher::PartialJson(json!({
            "statement": "SELECT series_id, value, observed FROM indicators",
            "warehouse_id": WAREHOUSE,
            "format": "JSON_ARRAY",
            "disposition": "INLINE",
        })))
        .with_status(200)
        .with_body(
            json!({
                "statement_id": "01ef",
                "status": {"state": "SUCCEEDED"},
                "manifest": {"schema": {"columns": [
                    {"name": "series_id", "type_name": "STRING", "position": 0},
                    {"name": "value", "type_name": "DOUBLE", "position": 1},
                    {"name": "observed", "type_name": "DATE", "position": 2}
                ]}},
                "result": {"data_array": [
                    ["CPI", "3.1", "2024-01-01"],
                    ["GDP", null, "2024-01-01"]
                ]}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let backend = backend_for(&server);
    assert!(backend.connect().await);
    assert!(backend.is_available());

    let result = backend
        .execute("SELECT series_id, value, observed FROM indicators")
        .await
        .unwrap();
    assert_eq!(result.columns, vec!["series_id", "value", "observed"]);
    assert_eq!(result.len(), 2);
    assert_eq!(result.get(0, "value"), Some(&Value::Float(3.1)));
    assert!(result.get(1, "VALUE").unwrap().is_null());
    assert!(matches!(result.get(0, "observed"), Some(Value::Date(_))));

    probe.assert_async().await;
    statement.assert_async().await;
}

#[tokio::test]
async fn test_result_chunks_are_followed() {
    let mut server = Server::new_async().await;
    mock_running_warehouse(&mut server).await;
    server
        .mock("POST", "/api/2.0/sql/statements")
        .with_status(200)
        .with_body(
            json!({
                "statement_id": "01f0",
                "status": {"state": "SUCCEEDED"},
                "manifest": {"schema": {"columns": [{"name": "n", "type_name": "LONG", "position": 0}]}},
                "result": {
                    "data_array": [["1"]],
                    "next_chunk_internal_link": "/api/2.0/sql/statements/01f0/result/chunks/1"
                }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let chunk = server
        .mock("GET", "/api/2.0/sql/statements/01f0/result/chunks/1")
        .with_status(200)
        .with_body(json!({"data_array": [["2"], ["3"]]}).to_string())
        .create_async()
        .await;

    let result = backend_for(&server).execute("SELECT n FROM t").await.unwrap();
    let values: Vec<_> = (0..result.len())
        .filter_map(|i| result.get(i, "n").and_then(Value::as_i64))
        .collect();
    assert_eq!(values, vec![1, 2, 3]);
    chunk.assert_async().await;
}

#[tokio::test]
async fn test_failed_statement_is_query_execution_failure() {
    let mut server = Server::new_async().await;
    mock_running_warehouse(&mut server).await;
    server
        .mock("POST", "/api/2.0/sql/statements")
        .with_status(200)
        .with_body(
            json!({
                "statement_id": "01f1",
                "status": {"state": "FAILED", "error": {
                    "error_code": "BAD_REQUEST",
                    "message": "[TABLE_OR_VIEW_NOT_FOUND] missing"
                }}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let failure = backend_for(&server).execute("SELECT * FROM missing").await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::QueryExecutionFailed);
    assert!(failure.message.contains("TABLE_OR_VIEW_NOT_FOUND"));
}

#[tokio::test]
async fn test_rejected_token_marks_backend_unavailable() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", format!("/api/2.0/sql/warehouses/{}", WAREHOUSE).as_str())
        .with_status(403)
        .with_body(json!({"error_code": "PERMISSION_DENIED", "message": "Invalid access token"}).to_string())
        .create_async()
        .await;

    let backend = backend_for(&server);
    assert!(backend.is_available());
    assert!(!backend.connect().await);
    assert!(!backend.is_available());

    let failure = backend.execute("SELECT 1").await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::ConnectionUnavailable);
}

#[tokio::test]
async fn test_create_table_sends_delta_ddl_and_accepts_existing() {
    let mut server = Server::new_async().await;
    mock_running_warehouse(&mut server).await;
    let ddl = server
        .mock("POST", "/api/2.0/sql/statements")
        .match_body(Matcher::Regex(
            r"CREATE TABLE IF NOT EXISTS indicators \(series_id STRING, value DOUBLE, extra STRING\) USING DELTA".into(),
        ))
        .with_status(200)
        .with_body(
            json!({
                "statement_id": "01f2",
                "status": {"state": "FAILED", "error": {
                    "error_code": "BAD_REQUEST",
                    "message": "[TABLE_OR_VIEW_ALREADY_EXISTS] indicators"
                }}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let schema = ColumnSchema::new()
        .with_column("series_id", AbstractType::Text)
        .with_column("value", AbstractType::Double)
        .with_column("extra", "GEOGRAPHY");
    assert!(backend_for(&server).create_table_if_not_exists("indicators", &schema).await);
    ddl.assert_async().await;
}

/// A warehouse whose statement endpoint answers only after three seconds,
/// behind a one second connector deadline.
async fn stalled_warehouse(server: &mut ServerGuard) -> WarehouseBackend {
    mock_running_warehouse(server).await;
    server
        .mock("POST", "/api/2.0/sql/statements")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_secs(3));
            w.write_all(b"{}")
        })
        .create_async()
        .await;
    WarehouseBackend::new(
        WarehouseCredentials::new(server.url(), "dapi-test-token", WAREHOUSE),
        Duration::from_secs(1),
    )
}

#[tokio::test]
async fn test_slow_warehouse_times_out() {
    let mut server = Server::new_async().await;
    let backend = stalled_warehouse(&mut server).await;
    let failure = backend.execute("SELECT 1").await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::TimedOut);
}

#[tokio::test]
async fn test_router_falls_back_when_warehouse_deadline_expires() {
    let mut server = Server::new_async().await;
    let warehouse = stalled_warehouse(&mut server).await;
    let fallback = FakeBackend::fallback();
    let router = HybridRouter::builder()
        .primary(Arc::new(warehouse))
        .fallback(fallback.clone())
        .build()
        .expect("router");

    let routed = router.execute("SELECT 1", true).await.unwrap();
    assert_eq!(routed.decision.reason, RouteReason::PreferredAndHealthy);
    assert_eq!(routed.backend, BackendRole::Fallback);
    assert!(routed.fell_back);
    assert_eq!(fallback.statements(), vec!["SELECT 1"]);
}

#[tokio::test]
async fn test_router_reports_warehouse_timeout_when_both_fail() {
    let mut server = Server::new_async().await;
    let warehouse = stalled_warehouse(&mut server).await;
    let fallback = FakeBackend::fallback();
    fallback.set_failing(true);
    let router = HybridRouter::builder()
        .primary(Arc::new(warehouse))
        .fallback(fallback.clone())
        .build()
        .expect("router");

    let err = router.execute("SELECT 1", true).await.unwrap_err();
    let failures = err.failures();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].backend, BackendRole::Primary);
    assert_eq!(failures[0].kind, FailureKind::TimedOut);
    assert_eq!(failures[1].backend, BackendRole::Fallback);
}
