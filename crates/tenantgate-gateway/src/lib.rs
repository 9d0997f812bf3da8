//! # tenantgate-gateway
//!
//! The serving side of tenantgate: routes authenticated requests to backend
//! clusters and relays the responses.
//!
//! ## Request pipeline
//!
//! ```text
//! client ──► /health /ready /metrics ──► answered directly
//!    │
//!    └──► authenticate (tenantgate-auth) ──► route ──► identity header ──► forward ──► cluster
//!              401 / 503                      404                          502 / 503 / 504
//! ```
//!
//! ## Modules
//!
//! - [`config`] - file plus environment configuration
//! - [`routing`] - longest-prefix route table with atomic reload
//! - [`cluster`] - endpoint selection, passive and active health checks
//! - [`proxy`] - upstream forwarding with connect-failure retry
//! - [`server`] - axum application, graceful shutdown, route reload
//! - [`cli`] - the `tenantgate` command line

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod routing;
pub mod server;

pub use cluster::{BackendCluster, ClusterRegistry};
pub use config::{BalanceMode, ClusterConfig, FailMode, GatewayConfig, RouteRuleConfig};
pub use error::{GatewayError, GatewayResult};
pub use metrics::{AtomicMetrics, MetricsSnapshot};
pub use routing::{RequestRouter, RouteDecision, RouteTable};
pub use server::Gateway;
