//! 额度监控模块：跟踪数据仓库的额度使用率，并在越过阈值时以边沿触发方式切换回退模式。
//!
//! # Budget Monitor
//!
//! Tracks a credit-usage percentage against a configured threshold and keeps a
//! persisted `fallback_mode` flag that only flips when usage crosses the
//! threshold:
//!
//! - usage ≥ threshold while the flag is off → flag on, warning event
//! - usage < threshold while the flag is on → flag off, info event
//!
//! Repeated evaluations on the same side of the threshold emit nothing.
//!
//! ```rust
//! use hybrid_db_router::budget::BudgetMonitor;
//!
//! let monitor = BudgetMonitor::new(80.0, 100.0);
//! monitor.simulate_usage(85.0);
//! assert!(monitor.is_fallback_active());
//! assert_eq!(monitor.check_usage().credits_used, 85.0);
//! ```
//!
//! All state sits behind one mutex and every read-modify-write happens inside
//! a single lock scope, so snapshots are never torn.

mod probe;

pub use probe::{FixedUsage, UsageProbe};

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Monitoring,
}

/// Point-in-time read of the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditSnapshot {
    pub usage_percent: f64,
    pub credits_used: f64,
    pub monthly_limit: f64,
    pub fallback_mode: bool,
    pub threshold: f64,
    pub status: MonitorStatus,
}

/// Severity tier derived from usage; evaluated top-down, first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageTier {
    Critical,
    Warning,
    Monitor,
    Normal,
}

impl UsageTier {
    pub fn for_usage(usage_percent: f64) -> Self {
        if usage_percent > 90.0 {
            UsageTier::Critical
        } else if usage_percent > 75.0 {
            UsageTier::Warning
        } else if usage_percent > 50.0 {
            UsageTier::Monitor
        } else {
            UsageTier::Normal
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            UsageTier::Critical => "Critical: Consider pausing non-essential workloads",
            UsageTier::Warning => "Warning: Approaching credit limit - optimize queries",
            UsageTier::Monitor => "Monitor: Track usage more frequently",
            UsageTier::Normal => "Normal: Usage within expected range",
        }
    }
}

#[derive(Debug)]
struct State {
    usage_percent: f64,
    fallback_mode: bool,
    transitions: u64,
}

pub struct BudgetMonitor {
    threshold: f64,
    monthly_limit: f64,
    state: Mutex<State>,
}

impl BudgetMonitor {
    pub fn new(threshold: f64, monthly_limit: f64) -> Self {
        Self {
            threshold,
            monthly_limit,
            state: Mutex::new(State {
                usage_percent: 0.0,
                fallback_mode: false,
                transitions: 0,
            }),
        }
    }

    pub fn from_config(cfg: &crate::config::BudgetConfig) -> Self {
        Self::new(cfg.threshold, cfg.monthly_limit)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn monthly_limit(&self) -> f64 {
        self.monthly_limit
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // No writer can panic mid-update, so a poisoned state is still whole.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-evaluate the flag against the threshold and return the result.
    pub fn check_usage(&self) -> CreditSnapshot {
        let mut st = self.lock();
        self.evaluate(&mut st);
        self.snapshot_of(&st)
    }

    /// Overwrite usage (clamped to 0..=100) and re-evaluate immediately.
    ///
    /// Intended for operational drills. Non-finite input counts as 100.
    pub fn simulate_usage(&self, usage_percent: f64) -> CreditSnapshot {
        let clamped = clamp_usage(usage_percent);
        let mut st = self.lock();
        st.usage_percent = clamped;
        self.evaluate(&mut st);
        info!(usage_percent = clamped, "Simulated credit usage set");
        self.snapshot_of(&st)
    }

    /// Persisted flag; does not re-evaluate.
    pub fn is_fallback_active(&self) -> bool {
        self.lock().fallback_mode
    }

    /// Administrative override: usage 0, flag off, no transition event.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.usage_percent = 0.0;
        st.fallback_mode = false;
        info!("Fallback mode reset");
    }

    /// Exactly one recommendation for the current usage tier.
    pub fn recommendations(&self) -> Vec<String> {
        vec![self.tier().recommendation().to_string()]
    }

    pub fn tier(&self) -> UsageTier {
        UsageTier::for_usage(self.lock().usage_percent)
    }

    /// Number of fallback-mode flips since construction.
    pub fn transition_count(&self) -> u64 {
        self.lock().transitions
    }

    /// Pull usage from a billing probe and re-evaluate.
    ///
    /// A probe error is treated as 100% usage.
    pub async fn refresh(&self, probe: &dyn UsageProbe) -> CreditSnapshot {
        let measured = match probe.usage_percent().await {
            Ok(pct) => clamp_usage(pct),
            Err(e) => {
                error!(probe = probe.name(), "Credit monitoring failed, assuming full usage: {}", e);
                100.0
            }
        };
        let mut st = self.lock();
        st.usage_percent = measured;
        self.evaluate(&mut st);
        self.snapshot_of(&st)
    }

    fn evaluate(&self, st: &mut State) {
        if st.usage_percent >= self.threshold {
            if !st.fallback_mode {
                st.fallback_mode = true;
                st.transitions += 1;
                warn!(
                    usage_percent = st.usage_percent,
                    threshold = self.threshold,
                    "Credit usage exceeds threshold. Activating fallback mode."
                );
            }
        } else if st.fallback_mode {
            st.fallback_mode = false;
            st.transitions += 1;
            info!(
                usage_percent = st.usage_percent,
                threshold = self.threshold,
                "Credit usage below threshold. Deactivating fallback mode."
            );
        }
    }

    fn snapshot_of(&self, st: &State) -> CreditSnapshot {
        CreditSnapshot {
            usage_percent: st.usage_percent,
            credits_used: st.usage_percent / 100.0 * self.monthly_limit,
            monthly_limit: self.monthly_limit,
            fallback_mode: st.fallback_mode,
            threshold: self.threshold,
            status: MonitorStatus::Monitoring,
        }
    }
}

impl Default for BudgetMonitor {
    fn default() -> Self {
        Self::new(80.0, 100.0)
    }
}

fn clamp_usage(pct: f64) -> f64 {
    if pct.is_nan() {
        100.0
    } else {
        pct.clamp(0.0, 100.0)
    }
}
