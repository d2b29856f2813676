use super::{HybridRouter, TablePins};
use crate::backend::{Backend, BackendRole};
use crate::budget::{BudgetMonitor, UsageProbe};
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;

/// Builder for a [`HybridRouter`] with injected backends.
///
/// Both backends are required; the budget monitor defaults to an 80% threshold
/// on a 100-credit month, and table pinning is on.
pub struct HybridRouterBuilder {
    primary: Option<Arc<dyn Backend>>,
    fallback: Option<Arc<dyn Backend>>,
    budget: Option<Arc<BudgetMonitor>>,
    usage_probe: Option<Arc<dyn UsageProbe>>,
    pin_tables: bool,
}

impl HybridRouterBuilder {
    pub fn new() -> Self {
        Self {
            primary: None,
            fallback: None,
            budget: None,
            usage_probe: None,
            pin_tables: true,
        }
    }

    pub fn primary(mut self, backend: Arc<dyn Backend>) -> Self {
        self.primary = Some(backend);
        self
    }

    pub fn fallback(mut self, backend: Arc<dyn Backend>) -> Self {
        self.fallback = Some(backend);
        self
    }

    /// Share a monitor with other components (e.g. a billing poller).
    pub fn budget(mut self, monitor: Arc<BudgetMonitor>) -> Self {
        self.budget = Some(monitor);
        self
    }

    /// Source of real usage figures, consulted by `initialize` and
    /// `refresh_usage`. Without one, usage only changes through simulation.
    pub fn usage_probe(mut self, probe: Arc<dyn UsageProbe>) -> Self {
        self.usage_probe = Some(probe);
        self
    }

    pub fn pin_tables(mut self, enable: bool) -> Self {
        self.pin_tables = enable;
        self
    }

    pub fn build(self) -> Result<HybridRouter> {
        let primary = require(self.primary, "primary")?;
        let fallback = require(self.fallback, "fallback")?;
        check_role(primary.as_ref(), BackendRole::Primary)?;
        check_role(fallback.as_ref(), BackendRole::Fallback)?;

        Ok(HybridRouter {
            primary,
            fallback,
            budget: self.budget.unwrap_or_default(),
            usage_probe: self.usage_probe,
            pins: self.pin_tables.then(TablePins::new),
        })
    }
}

impl Default for HybridRouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn require(backend: Option<Arc<dyn Backend>>, slot: &str) -> Result<Arc<dyn Backend>> {
    backend.ok_or_else(|| {
        Error::configuration_with_context(
            format!("{} backend is required", slot),
            ErrorContext::new()
                .with_field_path(slot)
                .with_source("router_builder"),
        )
    })
}

fn check_role(backend: &dyn Backend, expected: BackendRole) -> Result<()> {
    if backend.role() == expected {
        return Ok(());
    }
    Err(Error::configuration_with_context(
        format!(
            "{} backend reports role {}",
            expected,
            backend.role()
        ),
        ErrorContext::new()
            .with_field_path(expected.as_str())
            .with_details(format!("engine: {}", backend.engine()))
            .with_source("router_builder"),
    ))
}
