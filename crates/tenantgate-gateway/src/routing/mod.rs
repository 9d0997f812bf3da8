//! Request routing
//!
//! Maps `(method, path)` to a backend cluster. The most specific matching
//! prefix wins (segment count, then literal segment count), ties go to the
//! rule declared first, and a rule whose method list excludes the request
//! method is skipped. The table is immutable once built; [`RequestRouter`]
//! publishes replacements with an atomic pointer swap so in-flight lookups
//! never see a half-updated table.
//!
//! Paths with `.` or `..` segments (plain or percent-encoded) or backslashes
//! are rejected: the upstream URL would be normalized after routing, landing
//! on a path another rule owns.

pub mod rule;

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::Method;
use serde::Serialize;
use tracing::info;

use crate::config::{RouteRuleConfig, validate_routes};
use crate::error::{GatewayError, GatewayResult};

pub use rule::{RouteRule, Segment};

/// Where one request goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    /// Target cluster
    pub backend_cluster_name: String,
    /// Path (and query, if any) to send upstream
    pub rewritten_path: String,
}

/// An immutable, pre-sorted set of rules
#[derive(Debug, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Compile rules in declaration order
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] for the first invalid rule.
    pub fn compile(configs: &[RouteRuleConfig]) -> GatewayResult<Self> {
        let mut rules = configs
            .iter()
            .enumerate()
            .map(|(order, config)| RouteRule::compile(config, order))
            .collect::<GatewayResult<Vec<_>>>()?;

        rules.sort_by(|a, b| {
            b.specificity()
                .cmp(&a.specificity())
                .then(a.order().cmp(&b.order()))
        });
        Ok(Self { rules })
    }

    /// Rules in match order
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table has no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Route a request
    ///
    /// `path_and_query` is the request target; the query string is carried
    /// through to the decision unchanged.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::BadRequest`] for dot segments or backslashes
    /// - [`GatewayError::NoRoute`] when no rule matches
    pub fn route(&self, method: &Method, path_and_query: &str) -> GatewayResult<RouteDecision> {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };
        if !is_canonical(path) {
            return Err(GatewayError::bad_request(format!(
                "non-canonical request path: {path}"
            )));
        }

        self.rules
            .iter()
            .filter(|rule| rule.allows(method))
            .find_map(|rule| rule.match_path(path).map(|end| (rule, end)))
            .map(|(rule, end)| {
                let mut rewritten_path = rule.rewrite(path, end);
                if let Some(query) = query {
                    rewritten_path.push('?');
                    rewritten_path.push_str(query);
                }
                RouteDecision {
                    backend_cluster_name: rule.backend_cluster().to_string(),
                    rewritten_path,
                }
            })
            .ok_or_else(|| GatewayError::no_route(method.as_str(), path))
    }
}

/// Whether `path` survives URL normalization unchanged
fn is_canonical(path: &str) -> bool {
    if path.contains('\\') || path.to_ascii_lowercase().contains("%5c") {
        return false;
    }
    path.split('/').all(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded != "." && decoded != ".."
    })
}

/// Hot-swappable route table
#[derive(Debug)]
pub struct RequestRouter {
    table: ArcSwap<RouteTable>,
}

impl RequestRouter {
    /// Wrap a compiled table
    pub fn new(table: RouteTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    /// Validate and compile rules against the known clusters
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] for invalid rules or unknown clusters.
    pub fn from_config(rules: &[RouteRuleConfig], clusters: &HashSet<&str>) -> GatewayResult<Self> {
        validate_routes(rules, clusters)?;
        Ok(Self::new(RouteTable::compile(rules)?))
    }

    /// Route against the currently published table
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NoRoute`] when no rule matches.
    pub fn route(&self, method: &Method, path_and_query: &str) -> GatewayResult<RouteDecision> {
        self.table.load().route(method, path_and_query)
    }

    /// Currently published table
    pub fn table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Replace the table
    ///
    /// Nothing is published unless every rule is valid.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] for invalid rules or unknown
    /// clusters; the previous table stays in effect.
    pub fn reload(&self, rules: &[RouteRuleConfig], clusters: &HashSet<&str>) -> GatewayResult<()> {
        validate_routes(rules, clusters)?;
        let table = RouteTable::compile(rules)?;
        let count = table.len();
        self.table.store(Arc::new(table));
        info!(rules = count, "Route table reloaded");
        Ok(())
    }
}

impl Default for RequestRouter {
    fn default() -> Self {
        Self::new(RouteTable::default())
    }
}
