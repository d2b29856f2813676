//! 混合路由模块：根据调用偏好、主后端健康状况与额度状态，为每次调用选择后端。
//!
//! # Hybrid Router
//!
//! Per call, the first matching rule wins:
//!
//! 1. caller does not prefer the primary → fallback
//! 2. primary unavailable → fallback
//! 3. budget monitor in fallback mode → fallback
//! 4. otherwise → primary
//!
//! A query routed to the primary that fails at call time is retried exactly
//! once on the fallback. Table creation follows the same rule but is never
//! retried, so a table is created on one side only.
//!
//! Statements sent to the fallback pass through
//! [`rewrite_for_fallback`](crate::dialect::rewrite_for_fallback) first.

mod builder;
mod decision;
mod pins;
mod status;

pub use builder::HybridRouterBuilder;
pub use decision::{decide, RouteInputs, RouteReason, RoutingDecision};
pub use pins::TablePins;
pub use status::{BackendStatus, ConnectionCheck, ConnectionReport, SystemStatus};

use crate::backend::{Backend, BackendRole, Failure, PostgresBackend, QueryResult, WarehouseBackend};
use crate::budget::{BudgetMonitor, CreditSnapshot, UsageProbe, UsageTier};
use crate::config::RouterConfig;
use crate::dialect::{rewrite_for_fallback, ColumnSchema};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A successful routed query.
#[derive(Debug, Clone, Serialize)]
pub struct RoutedQuery {
    pub result: QueryResult,
    /// Backend that actually produced `result`.
    pub backend: BackendRole,
    pub decision: RoutingDecision,
    /// The primary was chosen, failed, and the fallback answered instead.
    pub fell_back: bool,
}

pub struct HybridRouter {
    primary: Arc<dyn Backend>,
    fallback: Arc<dyn Backend>,
    budget: Arc<BudgetMonitor>,
    usage_probe: Option<Arc<dyn UsageProbe>>,
    pins: Option<TablePins>,
}

impl HybridRouter {
    pub fn builder() -> HybridRouterBuilder {
        HybridRouterBuilder::new()
    }

    /// Build both connectors from configuration.
    ///
    /// Must be called inside a Tokio runtime: the relational pool is created
    /// lazily but registers with the runtime.
    pub fn from_config(cfg: &RouterConfig) -> Result<Self> {
        cfg.validate()?;
        HybridRouterBuilder::new()
            .primary(Arc::new(WarehouseBackend::from_config(&cfg.warehouse)))
            .fallback(Arc::new(PostgresBackend::from_config(&cfg.relational)?))
            .budget(Arc::new(BudgetMonitor::from_config(&cfg.budget)))
            .pin_tables(cfg.routing.pin_tables)
            .build()
    }

    pub fn budget(&self) -> &Arc<BudgetMonitor> {
        &self.budget
    }

    pub fn pins(&self) -> Option<&TablePins> {
        self.pins.as_ref()
    }

    /// Connect the primary and prime the budget monitor.
    ///
    /// Never fails: an unreachable warehouse just leaves the primary
    /// unavailable.
    pub async fn initialize(&self) -> SystemStatus {
        let connected = self.primary.connect().await;
        self.refresh_usage().await;
        info!(
            primary_available = connected,
            host = %self.primary.identity(),
            "Hybrid router initialized"
        );
        self.status()
    }

    /// Re-read usage from the probe when one is configured, otherwise
    /// re-evaluate the current figure.
    pub async fn refresh_usage(&self) -> CreditSnapshot {
        match &self.usage_probe {
            Some(probe) => self.budget.refresh(probe.as_ref()).await,
            None => self.budget.check_usage(),
        }
    }

    /// Compute where a call would go right now, without executing anything.
    pub fn decide(&self, prefer_primary: bool) -> RoutingDecision {
        self.decide_with_pin(prefer_primary, None)
    }

    fn decide_with_pin(&self, prefer_primary: bool, pin: Option<BackendRole>) -> RoutingDecision {
        decide(RouteInputs {
            prefer_primary,
            primary_available: self.primary.is_available(),
            fallback_mode: self.budget.is_fallback_active(),
            pinned_to_fallback: pin == Some(BackendRole::Fallback),
        })
    }

    pub async fn execute(&self, sql: &str, prefer_primary: bool) -> Result<RoutedQuery> {
        let decision = self.decide(prefer_primary);
        self.run(sql, decision).await
    }

    /// Like [`execute`](Self::execute), honoring where `table` was created.
    pub async fn execute_for_table(
        &self,
        table: &str,
        sql: &str,
        prefer_primary: bool,
    ) -> Result<RoutedQuery> {
        let pin = self.pins.as_ref().and_then(|p| p.get(table));
        let decision = self.decide_with_pin(prefer_primary, pin);
        if pin == Some(BackendRole::Primary) && !decision.use_primary {
            warn!(
                table,
                reason = decision.reason.as_str(),
                "Table lives on the primary but the call is routed to the fallback"
            );
        }
        self.run(sql, decision).await
    }

    async fn run(&self, sql: &str, decision: RoutingDecision) -> Result<RoutedQuery> {
        if !decision.use_primary {
            info!(backend = "fallback", reason = decision.reason.as_str(), "Executing query on fallback");
            return match self.run_on_fallback(sql).await {
                Ok(result) => Ok(RoutedQuery {
                    result,
                    backend: BackendRole::Fallback,
                    decision,
                    fell_back: false,
                }),
                Err(failure) => Err(Error::NoResult {
                    failures: vec![failure],
                }),
            };
        }

        info!(backend = "primary", reason = decision.reason.as_str(), "Executing query on primary");
        let primary_failure = match self.primary.execute(sql).await {
            Ok(result) => {
                return Ok(RoutedQuery {
                    result,
                    backend: BackendRole::Primary,
                    decision,
                    fell_back: false,
                })
            }
            Err(failure) => failure,
        };

        warn!(
            backend = "primary",
            kind = primary_failure.kind.as_str(),
            "Primary query failed, falling back: {}",
            primary_failure.message
        );
        match self.run_on_fallback(sql).await {
            Ok(result) => Ok(RoutedQuery {
                result,
                backend: BackendRole::Fallback,
                decision,
                fell_back: true,
            }),
            Err(fallback_failure) => Err(Error::NoResult {
                failures: vec![primary_failure, fallback_failure],
            }),
        }
    }

    async fn run_on_fallback(&self, sql: &str) -> std::result::Result<QueryResult, Failure> {
        let rewritten = rewrite_for_fallback(sql, self.primary.dialect(), self.fallback.dialect())
            .map_err(|failure| {
                warn!(
                    backend = "fallback",
                    operation = failure.operation.as_str(),
                    "{}",
                    failure.message
                );
                failure
            })?;
        self.fallback.execute(&rewritten).await
    }

    /// Create `name` on the backend the routing rule selects.
    ///
    /// No runtime retry: a failed create on the primary returns `false`.
    pub async fn create_table(&self, name: &str, schema: &ColumnSchema, prefer_primary: bool) -> bool {
        let decision = self.decide(prefer_primary);
        let backend = if decision.use_primary {
            &self.primary
        } else {
            &self.fallback
        };
        info!(
            backend = decision.role().as_str(),
            reason = decision.reason.as_str(),
            table = name,
            "Creating table"
        );
        let created = backend.create_table_if_not_exists(name, schema).await;
        if created {
            if let Some(pins) = &self.pins {
                pins.pin(name, decision.role());
            }
        }
        created
    }

    /// Fresh status; re-evaluates the budget flag. Every field is derived
    /// from a single budget snapshot.
    pub fn status(&self) -> SystemStatus {
        let credit_usage = self.budget.check_usage();
        let fallback_active = credit_usage.fallback_mode;
        let active = decide(RouteInputs {
            prefer_primary: true,
            primary_available: self.primary.is_available(),
            fallback_mode: fallback_active,
            pinned_to_fallback: false,
        });
        SystemStatus {
            primary: BackendStatus::of(self.primary.as_ref(), fallback_active),
            fallback: BackendStatus::of(self.fallback.as_ref(), fallback_active),
            active_database: active.role(),
            recommendations: vec![UsageTier::for_usage(credit_usage.usage_percent)
                .recommendation()
                .to_string()],
            credit_usage,
        }
    }

    pub fn simulate_usage(&self, usage_percent: f64) -> SystemStatus {
        self.budget.simulate_usage(usage_percent);
        self.status()
    }

    pub fn reset(&self) -> SystemStatus {
        self.budget.reset();
        self.status()
    }

    /// Run `SELECT 1` on each backend directly, bypassing routing.
    pub async fn test_connections(&self) -> ConnectionReport {
        let (primary, fallback) = futures::join!(
            probe(self.primary.as_ref()),
            probe(self.fallback.as_ref())
        );
        ConnectionReport { primary, fallback }
    }

    pub async fn close(&self) {
        futures::join!(self.primary.close(), self.fallback.close());
        info!("Hybrid router closed");
    }
}

async fn probe(backend: &dyn Backend) -> ConnectionCheck {
    let start = Instant::now();
    let outcome = backend.execute("SELECT 1").await;
    ConnectionCheck {
        role: backend.role(),
        ok: outcome.is_ok(),
        duration_ms: start.elapsed().as_millis() as u64,
        failure: outcome.err(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FailureKind, Value};
    use crate::dialect::{AbstractType, Dialect};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        role: BackendRole,
        available: AtomicBool,
        fail: AtomicBool,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(role: BackendRole) -> Arc<Self> {
            Arc::new(Self {
                role,
                available: AtomicBool::new(true),
                fail: AtomicBool::new(false),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for Scripted {
        fn role(&self) -> BackendRole {
            self.role
        }
        fn engine(&self) -> &'static str {
            "scripted"
        }
        fn identity(&self) -> String {
            self.role.to_string()
        }
        fn dialect(&self) -> Dialect {
            match self.role {
                BackendRole::Primary => Dialect::Warehouse,
                BackendRole::Fallback => Dialect::Relational,
            }
        }
        fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }
        async fn execute(&self, sql: &str) -> std::result::Result<QueryResult, Failure> {
            self.seen.lock().unwrap().push(sql.to_string());
            if self.fail.load(Ordering::SeqCst) {
                return Err(Failure::new(
                    self.role,
                    "execute",
                    FailureKind::QueryExecutionFailed,
                    "scripted failure",
                ));
            }
            Ok(QueryResult::new(
                vec!["source".into()],
                vec![vec![Value::Text(self.role.to_string())]],
            ))
        }
        async fn create_table_if_not_exists(&self, name: &str, _schema: &ColumnSchema) -> bool {
            self.seen.lock().unwrap().push(format!("CREATE {}", name));
            !self.fail.load(Ordering::SeqCst)
        }
    }

    fn router(primary: &Arc<Scripted>, fallback: &Arc<Scripted>) -> HybridRouter {
        HybridRouter::builder()
            .primary(primary.clone())
            .fallback(fallback.clone())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthy_primary_serves() {
        let (p, f) = (Scripted::new(BackendRole::Primary), Scripted::new(BackendRole::Fallback));
        let r = router(&p, &f);
        let routed = r.execute("SELECT 1", true).await.unwrap();
        assert_eq!(routed.backend, BackendRole::Primary);
        assert_eq!(routed.decision.reason, RouteReason::PreferredAndHealthy);
        assert!(!routed.fell_back);
        assert!(f.seen().is_empty());
    }

    #[tokio::test]
    async fn test_primary_failure_retries_once_on_fallback() {
        let (p, f) = (Scripted::new(BackendRole::Primary), Scripted::new(BackendRole::Fallback));
        p.fail.store(true, Ordering::SeqCst);
        let r = router(&p, &f);
        let routed = r.execute("SELECT * FROM t USING DELTA", true).await.unwrap();
        assert_eq!(routed.backend, BackendRole::Fallback);
        assert!(routed.fell_back);
        assert_eq!(p.seen().len(), 1);
        assert_eq!(f.seen(), vec!["SELECT * FROM t".to_string()]);
    }

    #[tokio::test]
    async fn test_both_failing_reports_both_failures() {
        let (p, f) = (Scripted::new(BackendRole::Primary), Scripted::new(BackendRole::Fallback));
        p.fail.store(true, Ordering::SeqCst);
        f.fail.store(true, Ordering::SeqCst);
        let err = router(&p, &f).execute("SELECT 1", true).await.unwrap_err();
        let roles: Vec<_> = err.failures().iter().map(|f| f.backend).collect();
        assert_eq!(roles, vec![BackendRole::Primary, BackendRole::Fallback]);
    }

    #[tokio::test]
    async fn test_unsupported_syntax_never_reaches_fallback() {
        let (p, f) = (Scripted::new(BackendRole::Primary), Scripted::new(BackendRole::Fallback));
        let err = router(&p, &f)
            .execute("OPTIMIZE events ZORDER BY (ts)", false)
            .await
            .unwrap_err();
        assert_eq!(err.failures()[0].kind, FailureKind::UnsupportedOnFallback);
        assert!(f.seen().is_empty());
    }

    #[tokio::test]
    async fn test_create_table_is_not_retried() {
        let (p, f) = (Scripted::new(BackendRole::Primary), Scripted::new(BackendRole::Fallback));
        p.fail.store(true, Ordering::SeqCst);
        let r = router(&p, &f);
        let schema = ColumnSchema::new().with_column("id", AbstractType::Integer64);
        assert!(!r.create_table("t", &schema, true).await);
        assert!(f.seen().is_empty());
        assert!(r.pins().unwrap().get("t").is_none());
    }

    #[tokio::test]
    async fn test_pinned_table_follows_its_backend() {
        let (p, f) = (Scripted::new(BackendRole::Primary), Scripted::new(BackendRole::Fallback));
        let r = router(&p, &f);
        r.simulate_usage(95.0);
        let schema = ColumnSchema::new().with_column("id", AbstractType::Integer64);
        assert!(r.create_table("staging", &schema, true).await);
        r.reset();

        let routed = r.execute_for_table("staging", "SELECT * FROM staging", true).await.unwrap();
        assert_eq!(routed.backend, BackendRole::Fallback);
        assert_eq!(routed.decision.reason, RouteReason::PinnedToFallback);

        let routed = r.execute_for_table("other", "SELECT 1", true).await.unwrap();
        assert_eq!(routed.backend, BackendRole::Primary);
    }

    #[tokio::test]
    async fn test_status_reports_active_database() {
        let (p, f) = (Scripted::new(BackendRole::Primary), Scripted::new(BackendRole::Fallback));
        let r = router(&p, &f);
        assert_eq!(r.status().active_database, BackendRole::Primary);
        let status = r.simulate_usage(85.0);
        assert_eq!(status.active_database, BackendRole::Fallback);
        assert!(status.primary.fallback_active);
        assert!(status.credit_usage.fallback_mode);
        p.available.store(false, Ordering::SeqCst);
        let status = r.reset();
        assert_eq!(status.active_database, BackendRole::Fallback);
        assert!(!status.primary.available);
    }

    #[test]
    fn test_status_fields_agree_under_concurrent_usage_updates() {
        let (p, f) = (Scripted::new(BackendRole::Primary), Scripted::new(BackendRole::Fallback));
        let r = Arc::new(router(&p, &f));
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        r.budget().simulate_usage(((i * 7 + w * 13) % 101) as f64);
                    }
                })
            })
            .collect();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let status = r.status();
                        let tier = UsageTier::for_usage(status.credit_usage.usage_percent);
                        assert_eq!(status.recommendations, vec![tier.recommendation().to_string()]);
                        let expected = if status.credit_usage.fallback_mode {
                            BackendRole::Fallback
                        } else {
                            BackendRole::Primary
                        };
                        assert_eq!(status.active_database, expected);
                        assert_eq!(status.primary.fallback_active, status.credit_usage.fallback_mode);
                    }
                })
            })
            .collect();
        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }
    }

    #[tokio::test]
    async fn test_builder_rejects_swapped_roles() {
        let (p, f) = (Scripted::new(BackendRole::Primary), Scripted::new(BackendRole::Fallback));
        let err = HybridRouter::builder()
            .primary(f.clone())
            .fallback(p.clone())
            .build()
            .err()
            .expect("swapped roles should be rejected");
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(HybridRouter::builder().primary(p).build().is_err());
    }
}
