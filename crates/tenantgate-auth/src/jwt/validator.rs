//! JWT validation against the shared key cache
//!
//! Checks, in order:
//! - Header parses, algorithm is on the asymmetric allowlist, `kid` is present
//! - Signature verifies with the JWKS key for `kid`
//! - `exp` and `nbf` hold (with configured leeway, default none)
//! - `iss` equals the configured issuer
//! - `aud` (string or array) intersects the configured audiences
//!
//! A signature failure is terminal. Key rotation is handled by the cache's
//! forced refresh on an unknown `kid`, never by re-validating.

use super::{JwksCache, VerifiedToken};
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use http::HeaderMap;
use http::header::AUTHORIZATION;
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Asymmetric algorithms accepted by default
pub const DEFAULT_ALGORITHMS: [Algorithm; 8] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// JWT validator backed by a [`JwksCache`]
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use tenantgate_auth::{AuthConfig, jwt::{JwksCache, TokenValidator}};
/// # tokio_test::block_on(async {
/// let config = AuthConfig::new("https://sso.example.com/auth/realms/external")
///     .with_audiences(vec!["cost-management".to_string()]);
/// let keys = Arc::new(JwksCache::from_config(&config)?);
/// let validator = TokenValidator::new(&config, keys);
///
/// let verified = validator.validate("eyJ0eXAiOiJKV1QiLCJhbGc...").await?;
/// println!("subject: {:?}", verified.subject);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
pub struct TokenValidator {
    /// Expected issuer (iss claim)
    expected_issuer: String,
    /// Accepted audiences; empty disables the audience check
    expected_audiences: Vec<String>,
    /// Shared key cache
    keys: Arc<JwksCache>,
    /// Leeway for exp/nbf
    clock_skew_leeway: Duration,
    allowed_algorithms: Vec<Algorithm>,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("expected_issuer", &self.expected_issuer)
            .field("expected_audiences", &self.expected_audiences)
            .field("clock_skew_leeway", &self.clock_skew_leeway)
            .field("allowed_algorithms", &self.allowed_algorithms)
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    /// Create a validator for the configured issuer and audiences
    pub fn new(config: &AuthConfig, keys: Arc<JwksCache>) -> Self {
        if config.audiences.is_empty() {
            warn!(
                issuer = %config.issuer_url,
                "No audiences configured, audience check disabled"
            );
        }
        Self {
            expected_issuer: config.issuer_url.clone(),
            expected_audiences: config.audiences.clone(),
            keys,
            clock_skew_leeway: Duration::from_secs(config.clock_skew_seconds),
            allowed_algorithms: DEFAULT_ALGORITHMS.to_vec(),
        }
    }

    /// Restrict the accepted algorithms
    ///
    /// Only asymmetric algorithms should ever be listed here.
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Shared key cache
    pub fn keys(&self) -> &Arc<JwksCache> {
        &self.keys
    }

    /// Expected issuer
    pub fn expected_issuer(&self) -> &str {
        &self.expected_issuer
    }

    /// Validate a compact-serialized JWT
    ///
    /// # Errors
    ///
    /// Every failure maps to one [`AuthError`] variant; see the module docs for
    /// the order of checks. Only [`AuthError::JwksUnreachable`] is not a 401.
    pub async fn validate(&self, token: &str) -> AuthResult<VerifiedToken> {
        let header = decode_header(token).map_err(|e| {
            debug!(error = %e, "Failed to decode JWT header");
            AuthError::malformed(format!("invalid JWT header: {e}"))
        })?;

        if !self.allowed_algorithms.contains(&header.alg) {
            warn!(
                algorithm = ?header.alg,
                allowed = ?self.allowed_algorithms,
                "JWT uses disallowed algorithm"
            );
            return Err(AuthError::signature(format!(
                "algorithm {:?} not allowed",
                header.alg
            )));
        }

        let kid = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| AuthError::malformed("JWT header has no kid"))?;

        let key = self.keys.decoding_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.clock_skew_leeway.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.expected_issuer]);
        if self.expected_audiences.is_empty() {
            validation.validate_aud = false;
            validation.set_required_spec_claims(&["exp", "iss"]);
        } else {
            validation.set_audience(&self.expected_audiences);
            validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        }

        let token_data = decode::<Map<String, Value>>(token, &key, &validation).map_err(|e| {
            let err = AuthError::from(e);
            debug!(kid = %kid, kind = err.kind(), "JWT validation failed");
            err
        })?;

        let verified = VerifiedToken::from_claims(kid, token_data.claims);
        debug!(
            kid = %verified.key_id,
            has_subject = verified.subject.is_some(),
            "JWT validated"
        );
        Ok(verified)
    }
}

/// Pull the bearer token out of the `Authorization` header
///
/// The scheme is matched case-insensitively. Multiple `Authorization` values
/// are rejected rather than guessed between.
///
/// # Errors
///
/// Returns [`AuthError::MissingToken`] when no usable bearer token exists.
pub fn bearer_token(headers: &HeaderMap) -> AuthResult<&str> {
    let mut values = headers.get_all(AUTHORIZATION).iter();
    let value = values.next().ok_or(AuthError::MissingToken)?;
    if values.next().is_some() {
        return Err(AuthError::MissingToken);
    }
    let value = value.to_str().map_err(|_| AuthError::MissingToken)?;
    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingToken)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}
