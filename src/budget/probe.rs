//! Usage sources for [`BudgetMonitor::refresh`](super::BudgetMonitor::refresh).

use async_trait::async_trait;

/// A source of live credit usage, e.g. a billing API client.
///
/// Implementations report a percentage of the monthly limit. Errors are not
/// retried by the monitor; they are read as full usage.
#[async_trait]
pub trait UsageProbe: Send + Sync {
    async fn usage_percent(&self) -> crate::Result<f64>;

    fn name(&self) -> &'static str {
        "probe"
    }
}

/// Probe that always reports the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedUsage(pub f64);

#[async_trait]
impl UsageProbe for FixedUsage {
    async fn usage_percent(&self) -> crate::Result<f64> {
        Ok(self.0)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}
