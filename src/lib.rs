//! # hybrid-db-router
//!
//! 混合数据后端路由：按额度、健康状况与调用偏好，在计费数据仓库与关系型存储之间透明切换。
//!
//! Hybrid data-backend router. SQL-style operations go to a usage-billed
//! analytical warehouse (Databricks SQL, the *primary*) or to an always-on
//! relational store (PostgreSQL, the *fallback*), depending on a live credit
//! budget, primary health and a per-call preference.
//!
//! ## Key Features
//!
//! - **Budget Monitor**: edge-triggered fallback mode driven by credit usage, via [`budget`]
//! - **Connectors**: one [`backend::Backend`] trait over both engines, typed rows or a [`backend::Failure`]
//! - **Dialect Translator**: abstract column types to native DDL, plus best-effort SQL rewriting in [`dialect`]
//! - **Hybrid Router**: per-call decision, one runtime retry on the fallback, optional table pins in [`router`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hybrid_db_router::{HybridRouter, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() -> hybrid_db_router::Result<()> {
//!     let config = RouterConfig::load()?;
//!     let router = HybridRouter::from_config(&config)?;
//!     router.initialize().await;
//!
//!     let routed = router.execute("SELECT * FROM economic_indicators", true).await?;
//!     println!("{} rows from {}", routed.result.len(), routed.backend);
//!
//!     router.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`budget`] | Credit usage tracking and fallback mode |
//! | [`backend`] | Warehouse and relational connectors, result and failure types |
//! | [`dialect`] | Abstract types, native DDL, fallback SQL rewriting |
//! | [`router`] | Routing decision, execution, status |
//! | [`config`] | YAML and environment configuration |

pub mod backend;
pub mod budget;
pub mod config;
pub mod dialect;
pub mod router;

// Re-export main types for convenience
pub use backend::{Backend, BackendRole, Failure, FailureKind, QueryResult, Value};
pub use budget::{BudgetMonitor, CreditSnapshot, UsageProbe};
pub use config::RouterConfig;
pub use dialect::{AbstractType, ColumnSchema, ColumnType, Dialect};
pub use router::{HybridRouter, HybridRouterBuilder, RouteReason, RoutedQuery, RoutingDecision, SystemStatus};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
