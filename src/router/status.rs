//! Operator-facing status views. Rebuilt on every request, never cached.

use crate::backend::{Backend, BackendRole, Failure};
use crate::budget::CreditSnapshot;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendStatus {
    pub role: BackendRole,
    pub engine: &'static str,
    pub available: bool,
    pub fallback_active: bool,
    /// Warehouse host, or `"local"` for the relational store.
    pub identity: String,
}

impl BackendStatus {
    pub(crate) fn of(backend: &dyn Backend, fallback_active: bool) -> Self {
        Self {
            role: backend.role(),
            engine: backend.engine(),
            available: backend.is_available(),
            fallback_active,
            identity: backend.identity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub primary: BackendStatus,
    pub fallback: BackendStatus,
    pub credit_usage: CreditSnapshot,
    /// Where a default call would go right now.
    pub active_database: BackendRole,
    pub recommendations: Vec<String>,
}

/// Outcome of a `SELECT 1` probe against one backend.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub role: BackendRole,
    pub ok: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub primary: ConnectionCheck,
    pub fallback: ConnectionCheck,
}

impl ConnectionReport {
    pub fn all_ok(&self) -> bool {
        self.primary.ok && self.fallback.ok
    }
}
