//! The routing rule as a pure function of its inputs.

use crate::backend::BackendRole;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    PreferredAndHealthy,
    BudgetExhausted,
    PrimaryUnavailable,
    CallerForcedSecondary,
    /// The table was created on the fallback and must be read from there.
    PinnedToFallback,
}

impl RouteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteReason::PreferredAndHealthy => "preferred_and_healthy",
            RouteReason::BudgetExhausted => "budget_exhausted",
            RouteReason::PrimaryUnavailable => "primary_unavailable",
            RouteReason::CallerForcedSecondary => "caller_forced_secondary",
            RouteReason::PinnedToFallback => "pinned_to_fallback",
        }
    }
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub use_primary: bool,
    pub reason: RouteReason,
}

impl RoutingDecision {
    pub fn primary() -> Self {
        Self {
            use_primary: true,
            reason: RouteReason::PreferredAndHealthy,
        }
    }

    pub fn fallback(reason: RouteReason) -> Self {
        Self {
            use_primary: false,
            reason,
        }
    }

    pub fn role(&self) -> BackendRole {
        if self.use_primary {
            BackendRole::Primary
        } else {
            BackendRole::Fallback
        }
    }
}

/// Inputs to one routing decision, gathered by the router per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteInputs {
    pub prefer_primary: bool,
    pub primary_available: bool,
    pub fallback_mode: bool,
    pub pinned_to_fallback: bool,
}

/// First matching rule wins; caller preference outranks health, health
/// outranks budget.
pub fn decide(inputs: RouteInputs) -> RoutingDecision {
    if !inputs.prefer_primary {
        RoutingDecision::fallback(RouteReason::CallerForcedSecondary)
    } else if inputs.pinned_to_fallback {
        RoutingDecision::fallback(RouteReason::PinnedToFallback)
    } else if !inputs.primary_available {
        RoutingDecision::fallback(RouteReason::PrimaryUnavailable)
    } else if inputs.fallback_mode {
        RoutingDecision::fallback(RouteReason::BudgetExhausted)
    } else {
        RoutingDecision::primary()
    }
}
