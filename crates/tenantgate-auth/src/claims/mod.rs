//! Tenant identity extraction from verified tokens
//!
//! Resolution order:
//!
//! | Field | Chain |
//! |-------|-------|
//! | org id | `org_id` → `organization_id` → `tenant_id` → numeric `groups` entry → client id (opt-in) → default |
//! | account number | `account_number` → `account_id` → `account` → `groups` entry `account_<digits>` → org id |
//! | username | `preferred_username` → `username` → `sub` |
//!
//! Only a missing username is fatal. Org and account fall back to defaults,
//! unless `missing_org_policy` is `reject`.

pub mod client_id;
pub mod lookup;

pub use client_id::{OrgIdDeriver, SuffixOrgIdDeriver};
pub use lookup::{
    ClaimLookup, ClientIdOrg, LookupChain, NamedClaim, NumericGroup, PrefixedGroup, Resolved,
};

use std::fmt;
use std::sync::Arc;

use http::{HeaderMap, HeaderName};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{AuthConfig, ClaimsConfig, MissingOrgPolicy};
use crate::error::{AuthError, AuthResult};
use crate::jwt::VerifiedToken;
use crate::mask::Masked;

/// Which strategy produced a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "claim", rename_all = "snake_case")]
pub enum ClaimSource {
    /// A named top-level claim
    Claim(String),
    /// An entry of the `groups` list
    Group,
    /// Derived from the client id
    ClientId,
    /// The configured default
    Default,
}

impl fmt::Display for ClaimSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claim(name) => write!(f, "claim:{name}"),
            Self::Group => f.write_str("groups"),
            Self::ClientId => f.write_str("client_id"),
            Self::Default => f.write_str("default"),
        }
    }
}

/// Tenant identity derived from one token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedIdentity {
    /// Organization id, never empty
    pub org_id: String,
    /// Account number, falls back to the org id
    pub account_number: String,
    /// Username
    pub username: String,
    /// Email, empty when the token has none
    pub email: String,
    /// `<provider>-tokenreview`
    pub auth_method: String,
    /// Where the org id came from
    pub org_source: ClaimSource,
}

/// Per-request inputs to extraction that are not claims
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionContext {
    /// Requested org id when the token lists several
    pub org_override: Option<String>,
}

impl ExtractionContext {
    /// Context requesting a specific org among several candidates
    pub fn with_org_override(org_id: impl Into<String>) -> Self {
        Self {
            org_override: Some(org_id.into()),
        }
    }

    /// Read the override from request headers
    ///
    /// Missing, non-UTF-8, blank or repeated values yield no override.
    pub fn from_headers(headers: &HeaderMap, override_header: &HeaderName) -> Self {
        let mut values = headers.get_all(override_header).iter();
        let org_override = match (values.next(), values.next()) {
            (Some(value), None) => value
                .to_str()
                .ok()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            _ => None,
        };
        Self { org_override }
    }
}

/// Resolves an [`ExtractedIdentity`] from a [`VerifiedToken`]
#[derive(Debug)]
pub struct ClaimExtractor {
    org_chain: LookupChain,
    account_chain: LookupChain,
    username_chain: LookupChain,
    default_org_id: String,
    missing_org_policy: MissingOrgPolicy,
    auth_method: String,
}

impl ClaimExtractor {
    /// Build the standard chains for the given configuration
    ///
    /// The client-id step uses [`SuffixOrgIdDeriver`]; see
    /// [`ClaimExtractor::with_org_deriver`] to supply another.
    pub fn new(claims: &ClaimsConfig, auth: &AuthConfig) -> Self {
        let deriver = Arc::new(SuffixOrgIdDeriver::new(claims.client_id_separator.clone()));
        Self::with_org_deriver(claims, auth, deriver)
    }

    /// Build the standard chains with a custom client-id strategy
    ///
    /// The deriver is only consulted when
    /// `enable_client_id_org_derivation` is set.
    pub fn with_org_deriver(
        claims: &ClaimsConfig,
        auth: &AuthConfig,
        deriver: Arc<dyn OrgIdDeriver>,
    ) -> Self {
        let mut org_chain = LookupChain::new()
            .then(NamedClaim::new("org_id"))
            .then(NamedClaim::new("organization_id"))
            .then(NamedClaim::new("tenant_id"))
            .then(NumericGroup::new("groups"));
        if claims.enable_client_id_org_derivation {
            org_chain = org_chain.then(ClientIdOrg::new(claims.client_id_claim.clone(), deriver));
        }

        let account_chain = LookupChain::new()
            .then(NamedClaim::new("account_number"))
            .then(NamedClaim::new("account_id"))
            .then(NamedClaim::new("account"))
            .then(PrefixedGroup::new("groups", "account_"));

        let username_chain = LookupChain::new()
            .then(NamedClaim::new("preferred_username"))
            .then(NamedClaim::new("username"))
            .then(NamedClaim::new("sub"));

        Self {
            org_chain,
            account_chain,
            username_chain,
            default_org_id: claims.default_org_id.clone(),
            missing_org_policy: claims.missing_org_policy,
            auth_method: auth.auth_method(),
        }
    }

    /// Extract with no per-request context
    ///
    /// # Errors
    ///
    /// See [`ClaimExtractor::extract_with`].
    pub fn extract(&self, token: &VerifiedToken) -> AuthResult<ExtractedIdentity> {
        self.extract_with(token, &ExtractionContext::default())
    }

    /// Extract the tenant identity
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoIdentity`] when no username or subject is present
    /// - [`AuthError::OrgUnresolved`] when no org signal exists and the
    ///   policy is `reject`
    pub fn extract_with(
        &self,
        token: &VerifiedToken,
        ctx: &ExtractionContext,
    ) -> AuthResult<ExtractedIdentity> {
        let username = self
            .username_chain
            .resolve(token, ctx)
            .ok_or(AuthError::NoIdentity)?
            .value;

        let org = match self.org_chain.resolve(token, ctx) {
            Some(found) => found,
            None => match self.missing_org_policy {
                MissingOrgPolicy::Default => {
                    warn!(
                        default_org_id = %Masked(&self.default_org_id),
                        user = %Masked(&username),
                        "No organization claim in token, using default org id"
                    );
                    Resolved {
                        value: self.default_org_id.clone(),
                        source: ClaimSource::Default,
                    }
                }
                MissingOrgPolicy::Reject => {
                    warn!(
                        user = %Masked(&username),
                        "No organization claim in token, rejecting"
                    );
                    return Err(AuthError::OrgUnresolved);
                }
            },
        };

        let account_number = match self.account_chain.resolve(token, ctx) {
            Some(found) => found.value,
            None => {
                debug!(
                    org_id = %Masked(&org.value),
                    "No account claim in token, using org id"
                );
                org.value.clone()
            }
        };

        let email = token.claim_str("email").unwrap_or_default();

        debug!(
            org_id = %Masked(&org.value),
            org_source = %org.source,
            "Extracted tenant identity"
        );

        Ok(ExtractedIdentity {
            org_id: org.value,
            account_number,
            username,
            email,
            auth_method: self.auth_method.clone(),
            org_source: org.source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde_json::{Value, json};

    fn token(claims: Value) -> VerifiedToken {
        let Value::Object(map) = claims else {
            panic!("claims must be an object")
        };
        VerifiedToken::from_claims("kid".to_string(), map)
    }

    fn extractor(claims: ClaimsConfig) -> ClaimExtractor {
        ClaimExtractor::new(&claims, &AuthConfig::new("https://sso.example.com"))
    }

    #[test]
    fn test_explicit_claims() {
        let identity = extractor(ClaimsConfig::default())
            .extract(&token(json!({
                "sub": "u1",
                "org_id": "1234567",
                "account_number": "9876543",
                "email": "u1@example.com",
            })))
            .unwrap();
        assert_eq!(identity.org_id, "1234567");
        assert_eq!(identity.account_number, "9876543");
        assert_eq!(identity.username, "u1");
        assert_eq!(identity.email, "u1@example.com");
        assert_eq!(identity.auth_method, "jwt-tokenreview");
        assert_eq!(identity.org_source, ClaimSource::Claim("org_id".to_string()));
    }

    #[test]
    fn test_org_fallback_order() {
        let ex = extractor(ClaimsConfig::default());
        let identity = ex
            .extract(&token(json!({
                "sub": "u1",
                "organization_id": "2",
                "tenant_id": "3",
                "groups": ["4"],
            })))
            .unwrap();
        assert_eq!(identity.org_id, "2");

        let identity = ex
            .extract(&token(json!({"sub": "u1", "tenant_id": 3, "groups": ["4"]})))
            .unwrap();
        assert_eq!(identity.org_id, "3");
    }

    #[test]
    fn test_account_falls_back_to_org() {
        let identity = extractor(ClaimsConfig::default())
            .extract(&token(json!({"sub": "u1", "org_id": "42"})))
            .unwrap();
        assert_eq!(identity.account_number, "42");
    }

    #[test]
    fn test_default_org_when_nothing_present() {
        let ex = extractor(ClaimsConfig::default());
        let t = token(json!({"sub": "u1", "groups": ["admins"]}));
        let first = ex.extract(&t).unwrap();
        let second = ex.extract(&t).unwrap();
        assert_eq!(first.org_id, "1");
        assert_eq!(first.org_source, ClaimSource::Default);
        assert_eq!(first, second);
    }

    #[test]
    fn test_reject_policy() {
        let ex = extractor(ClaimsConfig {
            missing_org_policy: MissingOrgPolicy::Reject,
            ..ClaimsConfig::default()
        });
        let err = ex.extract(&token(json!({"sub": "u1"}))).unwrap_err();
        assert_eq!(err, AuthError::OrgUnresolved);
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn test_no_identity() {
        let err = extractor(ClaimsConfig::default())
            .extract(&token(json!({"org_id": "1"})))
            .unwrap_err();
        assert_eq!(err, AuthError::NoIdentity);
    }

    #[test]
    fn test_username_prefers_preferred_username() {
        let identity = extractor(ClaimsConfig::default())
            .extract(&token(json!({
                "sub": "f81d4fae",
                "preferred_username": "alice",
                "username": "alice2",
            })))
            .unwrap();
        assert_eq!(identity.username, "alice");
    }

    #[test]
    fn test_client_id_derivation_is_opt_in() {
        let t = token(json!({"sub": "svc", "clientId": "cost-sa-4242"}));

        let off = extractor(ClaimsConfig::default()).extract(&t).unwrap();
        assert_eq!(off.org_id, "1");

        let on = extractor(ClaimsConfig {
            enable_client_id_org_derivation: true,
            ..ClaimsConfig::default()
        })
        .extract(&t)
        .unwrap();
        assert_eq!(on.org_id, "4242");
        assert_eq!(on.org_source, ClaimSource::ClientId);
    }

    #[test]
    fn test_client_id_after_groups() {
        let ex = extractor(ClaimsConfig {
            enable_client_id_org_derivation: true,
            ..ClaimsConfig::default()
        });
        let identity = ex
            .extract(&token(json!({
                "sub": "svc",
                "clientId": "cost-sa-4242",
                "groups": ["55512"],
            })))
            .unwrap();
        assert_eq!(identity.org_id, "55512");
    }

    #[derive(Debug)]
    struct FixedDeriver;

    impl OrgIdDeriver for FixedDeriver {
        fn derive_org_id(&self, _client_id: &str) -> Option<String> {
            Some("31337".to_string())
        }
    }

    #[test]
    fn test_custom_deriver() {
        let ex = ClaimExtractor::with_org_deriver(
            &ClaimsConfig {
                enable_client_id_org_derivation: true,
                ..ClaimsConfig::default()
            },
            &AuthConfig::new("https://sso.example.com"),
            Arc::new(FixedDeriver),
        );
        let identity = ex
            .extract(&token(json!({"sub": "svc", "clientId": "anything"})))
            .unwrap();
        assert_eq!(identity.org_id, "31337");
    }

    #[test]
    fn test_context_from_headers() {
        let name = HeaderName::from_static("x-gateway-org-id");
        let mut headers = HeaderMap::new();
        assert_eq!(
            ExtractionContext::from_headers(&headers, &name),
            ExtractionContext::default()
        );

        headers.insert(name.clone(), HeaderValue::from_static(" 222 "));
        assert_eq!(
            ExtractionContext::from_headers(&headers, &name),
            ExtractionContext::with_org_override("222")
        );

        headers.append(name.clone(), HeaderValue::from_static("333"));
        assert_eq!(ExtractionContext::from_headers(&headers, &name).org_override, None);
    }
}
