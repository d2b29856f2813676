//! Router configuration.
//!
//! Sources, later wins: built-in defaults, an optional YAML file (path in
//! `HYBRID_ROUTER_CONFIG`), then environment variables:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `DATABRICKS_HOST` | `warehouse.host` | unset |
//! | `DATABRICKS_TOKEN` | `warehouse.token` | unset (keyring first) |
//! | `DATABRICKS_SQL_WAREHOUSE_ID` | `warehouse.warehouse_id` | unset |
//! | `DATABRICKS_CREDIT_THRESHOLD` | `budget.threshold` | 80 |
//! | `DATABRICKS_MONTHLY_LIMIT` | `budget.monthly_limit` | 100 |
//! | `DATABASE_URL` | `relational.database_url` | local postgres |
//! | `HYBRID_QUERY_TIMEOUT_SECS` | both `timeout_secs` | 30 |
//! | `HYBRID_PG_MAX_CONNECTIONS` | `relational.max_connections` | 10 |
//! | `HYBRID_PIN_TABLES` | `routing.pin_tables` | true |

use crate::backend::WarehouseCredentials;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "HYBRID_ROUTER_CONFIG";
const KEYRING_SERVICE: &str = "hybrid-db-router";
const KEYRING_USER: &str = "databricks";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub warehouse: WarehouseConfig,
    pub relational: RelationalConfig,
    pub budget: BudgetConfig,
    pub routing: RoutingConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub host: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub warehouse_id: Option<String>,
    pub timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    /// Look the token up in the OS keyring before the environment.
    pub use_keyring: bool,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            host: None,
            token: None,
            warehouse_id: None,
            timeout_secs: 30,
            pool_max_idle_per_host: 8,
            use_keyring: true,
        }
    }
}

impl std::fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("credentials", &self.credentials())
            .field("timeout_secs", &self.timeout_secs)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("use_keyring", &self.use_keyring)
            .finish()
    }
}

impl WarehouseConfig {
    pub fn credentials(&self) -> WarehouseCredentials {
        WarehouseCredentials {
            host: self.host.clone(),
            token: self.token.clone(),
            warehouse_id: self.warehouse_id.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost:5432/postgres".to_string(),
            max_connections: 10,
            timeout_secs: 30,
        }
    }
}

impl RelationalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Usage percentage at which fallback mode activates.
    pub threshold: f64,
    pub monthly_limit: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            threshold: 80.0,
            monthly_limit: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Remember which backend each table was created on.
    pub pin_tables: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { pin_tables: true }
    }
}

impl RouterConfig {
    /// Defaults, then the YAML file named by `HYBRID_ROUTER_CONFIG` if set,
    /// then the process environment.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(path.trim())?,
            _ => Self::default(),
        };
        cfg.apply_env_from(|key| std::env::var(key).ok());
        cfg.resolve_token(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("Failed to read config: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// Overlay values from an environment-like lookup. Unparseable numbers are
    /// ignored and the previous value kept.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = non_empty("DATABRICKS_HOST") {
            self.warehouse.host = Some(host);
        }
        if let Some(id) = non_empty("DATABRICKS_SQL_WAREHOUSE_ID") {
            self.warehouse.warehouse_id = Some(id);
        }
        if let Some(t) = non_empty("DATABRICKS_CREDIT_THRESHOLD").and_then(|s| s.trim().parse().ok()) {
            self.budget.threshold = t;
        }
        if let Some(l) = non_empty("DATABRICKS_MONTHLY_LIMIT").and_then(|s| s.trim().parse().ok()) {
            self.budget.monthly_limit = l;
        }
        if let Some(url) = non_empty("DATABASE_URL") {
            self.relational.database_url = url;
        }
        if let Some(secs) = non_empty("HYBRID_QUERY_TIMEOUT_SECS").and_then(|s| s.trim().parse().ok()) {
            self.warehouse.timeout_secs = secs;
            self.relational.timeout_secs = secs;
        }
        if let Some(n) = non_empty("HYBRID_PG_MAX_CONNECTIONS").and_then(|s| s.trim().parse().ok()) {
            self.relational.max_connections = n;
        }
        if let Some(pin) = non_empty("HYBRID_PIN_TABLES") {
            self.routing.pin_tables = !matches!(pin.trim(), "0" | "false" | "no" | "off");
        }
    }

    /// Token precedence: OS keyring (when enabled), `DATABRICKS_TOKEN`, then
    /// whatever the file provided.
    pub fn resolve_token(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.warehouse.use_keyring {
            if let Some(token) = token_from_keyring() {
                self.warehouse.token = Some(token);
                return;
            }
        }
        if let Some(token) = lookup("DATABRICKS_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.warehouse.token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let b = &self.budget;
        if !(b.threshold > 0.0 && b.threshold <= 100.0) {
            return Err(Error::configuration_with_context(
                "credit threshold must be within (0, 100]",
                ErrorContext::new()
                    .with_field_path("budget.threshold")
                    .with_details(format!("got {}", b.threshold))
                    .with_source("config_loader"),
            ));
        }
        if !(b.monthly_limit > 0.0 && b.monthly_limit.is_finite()) {
            return Err(Error::configuration_with_context(
                "monthly credit limit must be positive",
                ErrorContext::new()
                    .with_field_path("budget.monthly_limit")
                    .with_details(format!("got {}", b.monthly_limit))
                    .with_source("config_loader"),
            ));
        }
        for (field, secs) in [
            ("warehouse.timeout_secs", self.warehouse.timeout_secs),
            ("relational.timeout_secs", self.relational.timeout_secs),
        ] {
            if secs == 0 {
                return Err(Error::configuration_with_context(
                    "timeouts must be at least one second",
                    ErrorContext::new()
                        .with_field_path(field)
                        .with_source("config_loader"),
                ));
            }
        }
        if self.relational.database_url.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "relational database URL is required",
                ErrorContext::new()
                    .with_field_path("relational.database_url")
                    .with_source("config_loader"),
            ));
        }
        Ok(())
    }
}

fn token_from_keyring() -> Option<String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER).ok()?;
    entry.get_password().ok().filter(|t| !t.trim().is_empty())
}
