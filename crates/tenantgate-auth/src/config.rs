//! Authentication Configuration Types
//!
//! Three groups, matching the sections of the gateway config file:
//! - [`AuthConfig`]: issuer, audiences, JWKS fetching and caching
//! - [`ClaimsConfig`]: org/account fallbacks and the opt-in client-id strategy
//! - [`IdentityConfig`]: the synthesized header and which headers never leave the gateway

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Token validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Expected `iss` claim, also the base for the default JWKS URI
    pub issuer_url: String,
    /// Explicit JWKS URI (default: `<issuer_url>/protocol/openid-connect/certs`)
    #[serde(default)]
    pub jwks_uri: Option<String>,
    /// Accepted audiences; a token must carry at least one of them
    #[serde(default)]
    pub audiences: Vec<String>,
    /// How long fetched keys stay valid
    #[serde(default = "default_jwks_cache_ttl")]
    pub jwks_cache_ttl_seconds: u64,
    /// Timeout for one JWKS fetch
    #[serde(default = "default_jwks_fetch_timeout")]
    pub jwks_fetch_timeout_seconds: u64,
    /// Minimum spacing between key-miss refreshes
    #[serde(default = "default_min_refresh_interval")]
    pub jwks_min_refresh_interval_seconds: u64,
    /// Leeway applied to `exp`/`nbf`
    #[serde(default)]
    pub clock_skew_seconds: u64,
    /// PEM bundle of additional trusted CAs for the JWKS endpoint
    #[serde(default)]
    pub ca_bundle_path: Option<PathBuf>,
    /// Provider label used in `internal.auth_type`
    #[serde(default = "default_provider_name")]
    pub provider_name: String,
}

fn default_jwks_cache_ttl() -> u64 {
    300
}

fn default_jwks_fetch_timeout() -> u64 {
    5
}

fn default_min_refresh_interval() -> u64 {
    5
}

fn default_provider_name() -> String {
    "jwt".to_string()
}

impl AuthConfig {
    /// Create a config with defaults for everything but the issuer
    pub fn new(issuer_url: impl Into<String>) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            jwks_uri: None,
            audiences: Vec::new(),
            jwks_cache_ttl_seconds: default_jwks_cache_ttl(),
            jwks_fetch_timeout_seconds: default_jwks_fetch_timeout(),
            jwks_min_refresh_interval_seconds: default_min_refresh_interval(),
            clock_skew_seconds: 0,
            ca_bundle_path: None,
            provider_name: default_provider_name(),
        }
    }

    /// Set the accepted audiences
    #[must_use]
    pub fn with_audiences(mut self, audiences: Vec<String>) -> Self {
        self.audiences = audiences;
        self
    }

    /// Set an explicit JWKS URI
    #[must_use]
    pub fn with_jwks_uri(mut self, jwks_uri: impl Into<String>) -> Self {
        self.jwks_uri = Some(jwks_uri.into());
        self
    }

    /// Resolved JWKS URI
    pub fn jwks_uri(&self) -> String {
        match &self.jwks_uri {
            Some(uri) => uri.clone(),
            None => format!(
                "{}/protocol/openid-connect/certs",
                self.issuer_url.trim_end_matches('/')
            ),
        }
    }

    /// Key cache TTL
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_ttl_seconds)
    }

    /// JWKS fetch timeout
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.jwks_fetch_timeout_seconds)
    }

    /// Minimum interval between forced refreshes
    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.jwks_min_refresh_interval_seconds)
    }

    /// Value for `internal.auth_type` in the identity document
    pub fn auth_method(&self) -> String {
        format!("{}-tokenreview", self.provider_name)
    }

    /// Check the configuration for values that can never work
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] naming the offending key.
    pub fn validate(&self) -> AuthResult<()> {
        if self.issuer_url.trim().is_empty() {
            return Err(AuthError::configuration_with_key(
                "issuer_url must not be empty",
                "auth.issuer_url",
            ));
        }
        let jwks_uri = self.jwks_uri();
        let parsed = url::Url::parse(&jwks_uri).map_err(|e| {
            AuthError::configuration_with_key(format!("invalid JWKS URI: {e}"), "auth.jwks_uri")
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AuthError::configuration_with_key(
                format!("JWKS URI must be http(s), got {}", parsed.scheme()),
                "auth.jwks_uri",
            ));
        }
        if self.jwks_cache_ttl_seconds == 0 {
            return Err(AuthError::configuration_with_key(
                "jwks_cache_ttl_seconds must be greater than zero",
                "auth.jwks_cache_ttl_seconds",
            ));
        }
        if self.jwks_fetch_timeout_seconds == 0 {
            return Err(AuthError::configuration_with_key(
                "jwks_fetch_timeout_seconds must be greater than zero",
                "auth.jwks_fetch_timeout_seconds",
            ));
        }
        Ok(())
    }
}

/// What to do when no org id signal exists in a token
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissingOrgPolicy {
    /// Use the configured default org id and log a warning
    #[default]
    Default,
    /// Reject the request with 401
    Reject,
}

/// Claim extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimsConfig {
    /// Org id used when nothing in the token identifies one
    #[serde(default = "default_org_id")]
    pub default_org_id: String,
    /// Whether the default may be used at all
    #[serde(default)]
    pub missing_org_policy: MissingOrgPolicy,
    /// Derive an org id from the client id claim (trusts a naming convention)
    #[serde(default)]
    pub enable_client_id_org_derivation: bool,
    /// Claim holding the identity-provider client id
    #[serde(default = "default_client_id_claim")]
    pub client_id_claim: String,
    /// Separator before the org suffix in the client id
    #[serde(default = "default_client_id_separator")]
    pub client_id_separator: String,
    /// Request header that selects among several org candidates in `groups`
    #[serde(default = "default_org_override_header")]
    pub org_override_header: String,
}

fn default_org_id() -> String {
    "1".to_string()
}

fn default_client_id_claim() -> String {
    "clientId".to_string()
}

fn default_client_id_separator() -> String {
    "-".to_string()
}

fn default_org_override_header() -> String {
    "x-gateway-org-id".to_string()
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            default_org_id: default_org_id(),
            missing_org_policy: MissingOrgPolicy::default(),
            enable_client_id_org_derivation: false,
            client_id_claim: default_client_id_claim(),
            client_id_separator: default_client_id_separator(),
            org_override_header: default_org_override_header(),
        }
    }
}

impl ClaimsConfig {
    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] when the default org id is empty
    /// or a header name is not a valid HTTP header name.
    pub fn validate(&self) -> AuthResult<()> {
        if self.default_org_id.trim().is_empty() {
            return Err(AuthError::configuration_with_key(
                "default_org_id must not be empty",
                "claims.default_org_id",
            ));
        }
        if self.enable_client_id_org_derivation && self.client_id_separator.is_empty() {
            return Err(AuthError::configuration_with_key(
                "client_id_separator must not be empty when derivation is enabled",
                "claims.client_id_separator",
            ));
        }
        validate_header_name(&self.org_override_header, "claims.org_override_header")
    }
}

/// Identity header configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Name of the synthesized header
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    /// Forward the validated bearer token under this header
    #[serde(default)]
    pub forward_token_header: Option<String>,
    /// Extra headers that are always removed before forwarding
    #[serde(default)]
    pub internal_headers: Vec<String>,
}

fn default_identity_header() -> String {
    "x-rh-identity".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            identity_header: default_identity_header(),
            forward_token_header: None,
            internal_headers: Vec::new(),
        }
    }
}

impl IdentityConfig {
    /// Check that every configured header name is valid
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] for the first invalid header name.
    pub fn validate(&self) -> AuthResult<()> {
        validate_header_name(&self.identity_header, "identity.identity_header")?;
        if let Some(name) = &self.forward_token_header {
            validate_header_name(name, "identity.forward_token_header")?;
            if name.eq_ignore_ascii_case(&self.identity_header) {
                return Err(AuthError::configuration_with_key(
                    "forward_token_header must differ from identity_header",
                    "identity.forward_token_header",
                ));
            }
        }
        for name in &self.internal_headers {
            validate_header_name(name, "identity.internal_headers")?;
        }
        Ok(())
    }
}

fn validate_header_name(name: &str, key: &str) -> AuthResult<()> {
    http::HeaderName::from_bytes(name.as_bytes())
        .map(|_| ())
        .map_err(|_| AuthError::configuration_with_key(format!("invalid header name '{name}'"), key))
}
