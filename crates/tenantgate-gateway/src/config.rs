//! Gateway configuration
//!
//! Loaded from a TOML, YAML or JSON file, with `TENANTGATE__`-prefixed
//! environment variables overriding file settings (`__` separates nesting
//! levels, e.g. `TENANTGATE__AUTH__ISSUER_URL`).
//!
//! The common identity options are also accepted as top-level keys
//! (`issuer_url`, `jwks_uri`, `audiences`, `jwks_cache_ttl_seconds`,
//! `default_org_id`, `enable_client_id_org_derivation`). When present they
//! override the matching `auth` or `claims` entry.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tenantgate_auth::{AuthConfig, ClaimsConfig, IdentityConfig};

use crate::error::{GatewayError, GatewayResult};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TENANTGATE";

/// Behavior when every endpoint of a cluster is ejected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Answer 503
    #[default]
    Closed,
    /// Forward to the endpoint whose cooldown ends soonest
    Open,
}

/// Endpoint selection strategy within a cluster
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceMode {
    /// Rotate across healthy endpoints
    #[default]
    RoundRobin,
    /// First healthy endpoint in declared order
    Primary,
}

/// One routing rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteRuleConfig {
    /// Segment-aware prefix; `*` matches exactly one segment
    pub path_prefix: String,
    /// Allowed methods; empty means any
    #[serde(default)]
    pub methods: Vec<String>,
    /// Target cluster name
    pub backend_cluster: String,
    /// Replacement for the matched prefix in the forwarded path
    #[serde(default)]
    pub rewrite_prefix: Option<String>,
}

/// One upstream cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Unique cluster name
    pub name: String,
    /// `host:port` or full `http(s)://host:port` base URLs
    pub endpoints: Vec<String>,
    /// Connect timeout per attempt
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Path probed by the active health checker, if any
    #[serde(default)]
    pub health_check_path: Option<String>,
    /// Probe interval
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,
    /// Consecutive failures before ejection
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    /// Ejection length
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    /// Endpoint selection strategy
    #[serde(default)]
    pub balance: BalanceMode,
}

fn default_connect_timeout() -> u64 {
    60
}

fn default_health_check_interval() -> u64 {
    10
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    30
}

impl ClusterConfig {
    /// Cluster with default tuning
    pub fn new(name: impl Into<String>, endpoints: Vec<String>) -> Self {
        Self {
            name: name.into(),
            endpoints,
            connect_timeout_seconds: default_connect_timeout(),
            health_check_path: None,
            health_check_interval_seconds: default_health_check_interval(),
            unhealthy_threshold: default_unhealthy_threshold(),
            cooldown_seconds: default_cooldown(),
            balance: BalanceMode::default(),
        }
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Ejection length
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    /// Probe interval
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawGatewayConfig")]
pub struct GatewayConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Deadline for one upstream exchange, retries included
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Behavior for fully ejected clusters
    #[serde(default)]
    pub fail_mode: FailMode,
    /// Token validation
    pub auth: AuthConfig,
    /// Claim extraction
    #[serde(default)]
    pub claims: ClaimsConfig,
    /// Identity header
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Routing rules, in declaration order
    #[serde(default)]
    pub route_table: Vec<RouteRuleConfig>,
    /// Upstream clusters
    #[serde(default)]
    pub backend_clusters: Vec<ClusterConfig>,
}

/// Deserialized form: sections plus the top-level shorthand keys
#[derive(Deserialize)]
struct RawGatewayConfig {
    #[serde(default = "default_listen")]
    listen: String,
    #[serde(default = "default_request_timeout")]
    request_timeout_seconds: u64,
    #[serde(default = "default_max_body_bytes")]
    max_body_bytes: usize,
    #[serde(default)]
    fail_mode: FailMode,
    #[serde(default)]
    auth: Option<AuthConfig>,
    #[serde(default)]
    claims: ClaimsConfig,
    #[serde(default)]
    identity: IdentityConfig,
    #[serde(default)]
    route_table: Vec<RouteRuleConfig>,
    #[serde(default)]
    backend_clusters: Vec<ClusterConfig>,
    #[serde(default)]
    issuer_url: Option<String>,
    #[serde(default)]
    jwks_uri: Option<String>,
    #[serde(default)]
    audiences: Option<Vec<String>>,
    #[serde(default)]
    jwks_cache_ttl_seconds: Option<u64>,
    #[serde(default)]
    default_org_id: Option<String>,
    #[serde(default)]
    enable_client_id_org_derivation: Option<bool>,
}

impl From<RawGatewayConfig> for GatewayConfig {
    fn from(raw: RawGatewayConfig) -> Self {
        // A missing issuer is left empty for validate() to report
        let mut auth = raw.auth.unwrap_or_else(|| AuthConfig::new(String::new()));
        if let Some(issuer_url) = raw.issuer_url {
            auth.issuer_url = issuer_url;
        }
        if raw.jwks_uri.is_some() {
            auth.jwks_uri = raw.jwks_uri;
        }
        if let Some(audiences) = raw.audiences {
            auth.audiences = audiences;
        }
        if let Some(ttl) = raw.jwks_cache_ttl_seconds {
            auth.jwks_cache_ttl_seconds = ttl;
        }

        let mut claims = raw.claims;
        if let Some(default_org_id) = raw.default_org_id {
            claims.default_org_id = default_org_id;
        }
        if let Some(enabled) = raw.enable_client_id_org_derivation {
            claims.enable_client_id_org_derivation = enabled;
        }

        Self {
            listen: raw.listen,
            request_timeout_seconds: raw.request_timeout_seconds,
            max_body_bytes: raw.max_body_bytes,
            fail_mode: raw.fail_mode,
            auth,
            claims,
            identity: raw.identity,
            route_table: raw.route_table,
            backend_clusters: raw.backend_clusters,
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl GatewayConfig {
    /// Minimal configuration around an auth section
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            listen: default_listen(),
            request_timeout_seconds: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
            fail_mode: FailMode::default(),
            auth,
            claims: ClaimsConfig::default(),
            identity: IdentityConfig::default(),
            route_table: Vec::new(),
            backend_clusters: Vec::new(),
        }
    }

    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// The format is picked from the extension. Environment variables with
    /// the `TENANTGATE__` prefix override file settings. The result is
    /// validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, has an unsupported
    /// extension, cannot be parsed, or fails [`GatewayConfig::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> GatewayResult<Self> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(GatewayError::configuration(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => {
                return Err(GatewayError::configuration(
                    "unsupported configuration file format, use .toml, .yaml, .yml or .json",
                ));
            }
        };

        let name = path.to_str().ok_or_else(|| {
            GatewayError::configuration(format!(
                "configuration path is not valid UTF-8: {}",
                path.display()
            ))
        })?;

        // Environment variables override file settings
        let config = Config::builder()
            .add_source(File::new(name, format))
            .add_source(environment())
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document, without environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed or is invalid.
    pub fn from_yaml_str(document: &str) -> GatewayResult<Self> {
        use config::{Config, File, FileFormat};

        let config: Self = Config::builder()
            .add_source(File::from_str(document, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Upstream deadline
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Check the configuration for values that can never work
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] (or the wrapped auth error) for
    /// the first problem found.
    pub fn validate(&self) -> GatewayResult<()> {
        self.auth.validate()?;
        self.claims.validate()?;
        self.identity.validate()?;

        self.listen
            .parse::<std::net::SocketAddr>()
            .map_err(|e| {
                GatewayError::configuration_with_key(
                    format!("invalid listen address '{}': {e}", self.listen),
                    "listen",
                )
            })?;
        if self.request_timeout_seconds == 0 {
            return Err(GatewayError::configuration_with_key(
                "request_timeout_seconds must be greater than zero",
                "request_timeout_seconds",
            ));
        }

        let mut names = HashSet::new();
        for cluster in &self.backend_clusters {
            validate_cluster(cluster)?;
            if !names.insert(cluster.name.as_str()) {
                return Err(GatewayError::configuration_with_key(
                    format!("duplicate cluster name '{}'", cluster.name),
                    "backend_clusters",
                ));
            }
        }

        validate_routes(&self.route_table, &names)
    }
}

/// Check route rules against a set of known cluster names
///
/// Shared by startup validation and route table reloads.
///
/// # Errors
///
/// Returns [`GatewayError::Configuration`] for the first invalid rule.
pub fn validate_routes(rules: &[RouteRuleConfig], clusters: &HashSet<&str>) -> GatewayResult<()> {
    for (index, rule) in rules.iter().enumerate() {
        let key = format!("route_table[{index}]");
        if !rule.path_prefix.starts_with('/') {
            return Err(GatewayError::configuration_with_key(
                format!("path_prefix '{}' must start with '/'", rule.path_prefix),
                key,
            ));
        }
        if let Some(rewrite) = &rule.rewrite_prefix
            && !rewrite.starts_with('/')
        {
            return Err(GatewayError::configuration_with_key(
                format!("rewrite_prefix '{rewrite}' must start with '/'"),
                key,
            ));
        }
        if !clusters.contains(rule.backend_cluster.as_str()) {
            return Err(GatewayError::configuration_with_key(
                format!("unknown backend cluster '{}'", rule.backend_cluster),
                key,
            ));
        }
        for method in &rule.methods {
            http::Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| {
                GatewayError::configuration_with_key(format!("invalid method '{method}'"), key.clone())
            })?;
        }
    }
    Ok(())
}

fn validate_cluster(cluster: &ClusterConfig) -> GatewayResult<()> {
    let key = format!("backend_clusters.{}", cluster.name);
    if cluster.name.trim().is_empty() {
        return Err(GatewayError::configuration_with_key(
            "cluster name must not be empty",
            "backend_clusters",
        ));
    }
    if cluster.endpoints.is_empty() {
        return Err(GatewayError::configuration_with_key(
            "cluster must list at least one endpoint",
            key,
        ));
    }
    for endpoint in &cluster.endpoints {
        crate::cluster::parse_endpoint(endpoint)?;
    }
    if cluster.unhealthy_threshold == 0 {
        return Err(GatewayError::configuration_with_key(
            "unhealthy_threshold must be greater than zero",
            key,
        ));
    }
    if cluster.connect_timeout_seconds == 0 {
        return Err(GatewayError::configuration_with_key(
            "connect_timeout_seconds must be greater than zero",
            key,
        ));
    }
    if let Some(path) = &cluster.health_check_path {
        if !path.starts_with('/') {
            return Err(GatewayError::configuration_with_key(
                format!("health_check_path '{path}' must start with '/'"),
                key,
            ));
        }
        if cluster.health_check_interval_seconds == 0 {
            return Err(GatewayError::configuration_with_key(
                "health_check_interval_seconds must be greater than zero",
                key,
            ));
        }
    }
    Ok(())
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("auth.audiences")
        .with_list_parse_key("audiences")
        .with_list_parse_key("identity.internal_headers")
}
