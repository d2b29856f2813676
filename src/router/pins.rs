//! Table placement memory.
//!
//! Records the backend a table was created on so later statements against it
//! do not silently read an empty or stale copy from the other side.

use crate::backend::BackendRole;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct TablePins {
    pins: RwLock<HashMap<String, BackendRole>>,
}

impl TablePins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table names compare case-insensitively, as in both SQL dialects.
    fn key(table: &str) -> String {
        table.trim().to_ascii_lowercase()
    }

    pub fn pin(&self, table: &str, role: BackendRole) {
        self.pins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::key(table), role);
    }

    pub fn get(&self, table: &str) -> Option<BackendRole> {
        self.pins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::key(table))
            .copied()
    }

    pub fn unpin(&self, table: &str) -> Option<BackendRole> {
        self.pins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&Self::key(table))
    }

    pub fn len(&self) -> usize {
        self.pins.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted `(table, role)` pairs.
    pub fn snapshot(&self) -> Vec<(String, BackendRole)> {
        let mut all: Vec<_> = self
            .pins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
