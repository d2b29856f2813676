//! In-memory backends for router integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use hybrid_db_router::backend::{Backend, BackendRole, Failure, FailureKind, QueryResult, Value};
use hybrid_db_router::dialect::{ColumnSchema, Dialect, SchemaWarning};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every statement and table it receives; can be told to fail or
/// report itself unavailable.
pub struct FakeBackend {
    role: BackendRole,
    dialect: Dialect,
    available: AtomicBool,
    failing: AtomicBool,
    statements: Mutex<Vec<String>>,
    tables: Mutex<Vec<(String, Vec<SchemaWarning>)>>,
    closes: AtomicUsize,
}

impl FakeBackend {
    pub fn primary() -> Arc<Self> {
        Arc::new(Self::new(BackendRole::Primary, Dialect::Warehouse))
    }

    pub fn fallback() -> Arc<Self> {
        Arc::new(Self::new(BackendRole::Fallback, Dialect::Relational))
    }

    fn new(role: BackendRole, dialect: Dialect) -> Self {
        Self {
            role,
            dialect,
            available: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            statements: Mutex::new(Vec::new()),
            tables: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn tables(&self) -> Vec<String> {
        self.tables.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn warnings_for(&self, table: &str) -> Vec<SchemaWarning> {
        self.tables
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == table)
            .map(|(_, w)| w.clone())
            .unwrap_or_default()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn role(&self) -> BackendRole {
        self.role
    }

    fn engine(&self) -> &'static str {
        match self.role {
            BackendRole::Primary => "fake-warehouse",
            BackendRole::Fallback => "fake-relational",
        }
    }

    fn identity(&self) -> String {
        match self.role {
            BackendRole::Primary => "adb-fake.azuredatabricks.net".to_string(),
            BackendRole::Fallback => "local".to_string(),
        }
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult, Failure> {
        self.statements.lock().unwrap().push(sql.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(Failure::new(
                self.role,
                "execute",
                FailureKind::ConnectionUnavailable,
                "backend is down",
            ));
        }
        Ok(QueryResult::new(
            vec!["served_by".to_string()],
            vec![vec![Value::Text(self.role.to_string())]],
        ))
    }

    async fn create_table_if_not_exists(&self, name: &str, schema: &ColumnSchema) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return false;
        }
        match self.dialect.create_table_ddl(name, schema) {
            Ok(ddl) => {
                let mut tables = self.tables.lock().unwrap();
                if !tables.iter().any(|(n, _)| n == name) {
                    tables.push((name.to_string(), ddl.warnings));
                }
                true
            }
            Err(_) => false,
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
