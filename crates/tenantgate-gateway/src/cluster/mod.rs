//! Backend clusters
//!
//! A cluster is a named list of upstream endpoints sharing one HTTP client.
//! Selection skips ejected endpoints; what happens when every endpoint is
//! ejected depends on the gateway-wide [`FailMode`].
//!
//! ```text
//! candidates() ──► healthy endpoints, rotated (round_robin) or declared order (primary)
//!       │
//!       └── none healthy ──► closed: NoHealthyEndpoint (503)
//!                            open:   endpoint whose cooldown ends soonest
//! ```

pub mod health;
pub mod prober;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::config::{BalanceMode, ClusterConfig, FailMode};
use crate::error::{GatewayError, GatewayErrorExt, GatewayResult};

pub use health::{EndpointHealth, FailureOutcome, HealthStatus};
pub use prober::spawn_health_checks;

/// Parse a configured endpoint into a base URL
///
/// Bare `host:port` values are treated as plain HTTP.
///
/// # Errors
///
/// Returns [`GatewayError::Configuration`] for unparsable values, schemes
/// other than http/https, or values carrying a query or fragment.
pub fn parse_endpoint(endpoint: &str) -> GatewayResult<Url> {
    let endpoint = endpoint.trim();
    let candidate = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    };

    let url = Url::parse(&candidate).config_context(format!("endpoint '{endpoint}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::configuration_with_key(
            format!("unsupported endpoint scheme '{}'", url.scheme()),
            endpoint,
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(GatewayError::configuration_with_key("endpoint has no host", endpoint));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(GatewayError::configuration_with_key(
            "endpoint must not carry a query or fragment",
            endpoint,
        ));
    }
    Ok(url)
}

/// One upstream endpoint
#[derive(Debug)]
pub struct Endpoint {
    base: String,
    health: EndpointHealth,
}

impl Endpoint {
    fn new(url: &Url) -> Self {
        Self {
            base: url.as_str().trim_end_matches('/').to_string(),
            health: EndpointHealth::new(),
        }
    }

    /// Base URL without a trailing slash
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Absolute URL for a forwarded path and query
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base, path_and_query)
    }

    /// Health state
    pub fn health(&self) -> &EndpointHealth {
        &self.health
    }
}

/// A named set of interchangeable upstream endpoints
#[derive(Debug)]
pub struct BackendCluster {
    name: String,
    endpoints: Vec<Endpoint>,
    balance: BalanceMode,
    fail_mode: FailMode,
    next: AtomicUsize,
    unhealthy_threshold: u32,
    cooldown: Duration,
    connect_timeout: Duration,
    health_check_path: Option<String>,
    health_check_interval: Duration,
    client: reqwest::Client,
}

impl BackendCluster {
    /// Build a cluster and its HTTP client
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] for invalid endpoints or if the
    /// HTTP client cannot be built.
    pub fn from_config(config: &ClusterConfig, fail_mode: FailMode) -> GatewayResult<Self> {
        if config.endpoints.is_empty() {
            return Err(GatewayError::configuration_with_key(
                "cluster must list at least one endpoint",
                format!("backend_clusters.{}", config.name),
            ));
        }
        let endpoints = config
            .endpoints
            .iter()
            .map(|endpoint| parse_endpoint(endpoint).map(|url| Endpoint::new(&url)))
            .collect::<GatewayResult<Vec<_>>>()?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .config_context(format!("backend_clusters.{}", config.name))?;

        Ok(Self {
            name: config.name.clone(),
            endpoints,
            balance: config.balance,
            fail_mode,
            next: AtomicUsize::new(0),
            unhealthy_threshold: config.unhealthy_threshold.max(1),
            cooldown: config.cooldown(),
            connect_timeout: config.connect_timeout(),
            health_check_path: config.health_check_path.clone(),
            health_check_interval: config.health_check_interval(),
            client,
        })
    }

    /// Cluster name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoints in declared order
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Endpoint by index
    pub fn endpoint(&self, index: usize) -> Option<&Endpoint> {
        self.endpoints.get(index)
    }

    /// Shared upstream client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Per-attempt connect timeout
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Active probe path, if configured
    pub fn health_check_path(&self) -> Option<&str> {
        self.health_check_path.as_deref()
    }

    /// Active probe interval
    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    /// Number of endpoints selectable now
    pub fn healthy_count(&self) -> usize {
        let now = Instant::now();
        self.endpoints
            .iter()
            .filter(|e| e.health.is_available(now))
            .count()
    }

    /// Endpoint indices to try for one request, in attempt order
    ///
    /// Ejected endpoints are never included while a healthy one exists.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NoHealthyEndpoint`] when every endpoint is
    /// ejected and the fail mode is closed.
    pub fn candidates(&self) -> GatewayResult<Vec<usize>> {
        let now = Instant::now();
        let len = self.endpoints.len();
        let start = match self.balance {
            BalanceMode::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % len.max(1),
            BalanceMode::Primary => 0,
        };

        let healthy: Vec<usize> = (0..len)
            .map(|offset| (start + offset) % len)
            .filter(|&index| self.endpoints[index].health.is_available(now))
            .collect();
        if !healthy.is_empty() {
            return Ok(healthy);
        }

        match self.fail_mode {
            FailMode::Closed => Err(GatewayError::no_healthy_endpoint(&self.name)),
            FailMode::Open => {
                let soonest = self
                    .endpoints
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, e)| e.health.ejected_until(now))
                    .map(|(index, _)| index)
                    .ok_or_else(|| GatewayError::no_healthy_endpoint(&self.name))?;
                warn!(
                    cluster = %self.name,
                    endpoint = %self.endpoints[soonest].base,
                    "Every endpoint ejected, failing open"
                );
                Ok(vec![soonest])
            }
        }
    }

    /// Record a successful exchange with an endpoint
    pub fn record_success(&self, index: usize) {
        if let Some(endpoint) = self.endpoints.get(index) {
            endpoint.health.record_success();
        }
    }

    /// Record a failed exchange with an endpoint
    pub fn record_failure(&self, index: usize) {
        let Some(endpoint) = self.endpoints.get(index) else {
            return;
        };
        match endpoint
            .health
            .record_failure(self.unhealthy_threshold, self.cooldown, Instant::now())
        {
            FailureOutcome::Ejected => warn!(
                cluster = %self.name,
                endpoint = %endpoint.base,
                cooldown_secs = self.cooldown.as_secs(),
                "Endpoint ejected"
            ),
            FailureOutcome::Counted(failures) => debug!(
                cluster = %self.name,
                endpoint = %endpoint.base,
                failures,
                "Endpoint failure recorded"
            ),
            FailureOutcome::AlreadyEjected => {}
        }
    }

    /// Point-in-time status
    pub fn status(&self) -> ClusterStatus {
        let now = Instant::now();
        let endpoints: Vec<EndpointStatus> = self
            .endpoints
            .iter()
            .map(|e| EndpointStatus {
                endpoint: e.base.clone(),
                health: e.health.status(now),
            })
            .collect();
        ClusterStatus {
            name: self.name.clone(),
            healthy_endpoints: endpoints.iter().filter(|e| e.health.healthy).count(),
            endpoints,
        }
    }
}

/// Serializable cluster view for `/ready`
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    /// Cluster name
    pub name: String,
    /// Number of selectable endpoints
    pub healthy_endpoints: usize,
    /// Per-endpoint detail
    pub endpoints: Vec<EndpointStatus>,
}

/// Serializable endpoint view
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    /// Base URL
    pub endpoint: String,
    /// Health detail
    #[serde(flatten)]
    pub health: HealthStatus,
}

/// All clusters by name
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    clusters: HashMap<String, Arc<BackendCluster>>,
}

impl ClusterRegistry {
    /// Build every configured cluster
    ///
    /// # Errors
    ///
    /// Returns the first cluster construction error.
    pub fn from_config(configs: &[ClusterConfig], fail_mode: FailMode) -> GatewayResult<Self> {
        let clusters = configs
            .iter()
            .map(|config| {
                BackendCluster::from_config(config, fail_mode)
                    .map(|cluster| (config.name.clone(), Arc::new(cluster)))
            })
            .collect::<GatewayResult<HashMap<_, _>>>()?;
        Ok(Self { clusters })
    }

    /// Cluster by name
    pub fn get(&self, name: &str) -> Option<&Arc<BackendCluster>> {
        self.clusters.get(name)
    }

    /// Whether a cluster exists
    pub fn contains(&self, name: &str) -> bool {
        self.clusters.contains_key(name)
    }

    /// Cluster names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clusters.keys().map(String::as_str)
    }

    /// All clusters
    pub fn iter(&self) -> impl Iterator<Item = &Arc<BackendCluster>> {
        self.clusters.values()
    }

    /// Number of clusters
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Whether no cluster is configured
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Status of every cluster, sorted by name
    pub fn status(&self) -> Vec<ClusterStatus> {
        let mut status: Vec<_> = self.clusters.values().map(|c| c.status()).collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }
}
