//! The identity stages of the request pipeline, run in order
//!
//! bearer token → [`TokenValidator`] → [`ClaimExtractor`] → [`IdentityTranslator`]
//!
//! Outbound headers are only touched once every stage has succeeded.

use std::sync::Arc;

use http::{HeaderMap, HeaderName};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::claims::{ClaimExtractor, ExtractedIdentity, ExtractionContext};
use crate::config::{AuthConfig, ClaimsConfig, IdentityConfig};
use crate::error::{AuthError, AuthResult};
use crate::identity::IdentityTranslator;
use crate::jwt::{JwksCache, TokenValidator, VerifiedToken};
use crate::jwt::validator::bearer_token;

/// Result of authenticating one request
#[derive(Debug)]
pub struct Authenticated {
    /// Tenant identity
    pub identity: ExtractedIdentity,
    /// The verified token
    pub token: VerifiedToken,
    /// Redacted in `Debug` output
    raw_token: SecretString,
}

impl Authenticated {
    /// The bearer token as presented
    pub fn raw_token(&self) -> &str {
        self.raw_token.expose_secret()
    }
}

/// Validator, extractor and translator wired together
#[derive(Debug)]
pub struct Authenticator {
    validator: TokenValidator,
    extractor: ClaimExtractor,
    translator: IdentityTranslator,
    org_override_header: HeaderName,
}

impl Authenticator {
    /// Assemble from already-built stages
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the override header name is invalid.
    pub fn new(
        validator: TokenValidator,
        extractor: ClaimExtractor,
        translator: IdentityTranslator,
        claims: &ClaimsConfig,
    ) -> AuthResult<Self> {
        let org_override_header = HeaderName::from_bytes(claims.org_override_header.as_bytes())
            .map_err(|_| {
                AuthError::configuration_with_key(
                    format!("invalid header name '{}'", claims.org_override_header),
                    "claims.org_override_header",
                )
            })?;
        Ok(Self {
            validator,
            extractor,
            translator,
            org_override_header,
        })
    }

    /// Build every stage from configuration around a shared key cache
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] for invalid configuration.
    pub fn from_config(
        auth: &AuthConfig,
        claims: &ClaimsConfig,
        identity: &IdentityConfig,
        keys: Arc<JwksCache>,
    ) -> AuthResult<Self> {
        auth.validate()?;
        claims.validate()?;
        identity.validate()?;

        Self::new(
            TokenValidator::new(auth, keys),
            ClaimExtractor::new(claims, auth),
            IdentityTranslator::new(identity, claims)?,
            claims,
        )
    }

    /// Shared key cache
    pub fn keys(&self) -> &Arc<JwksCache> {
        self.validator.keys()
    }

    /// Token validator stage
    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Identity translator stage
    pub fn translator(&self) -> &IdentityTranslator {
        &self.translator
    }

    /// Validate the bearer token in `headers` and extract the tenant identity
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] of the first stage that fails.
    pub async fn authenticate(&self, headers: &HeaderMap) -> AuthResult<Authenticated> {
        let raw_token = bearer_token(headers)?;
        let token = self.validator.validate(raw_token).await?;
        let ctx = ExtractionContext::from_headers(headers, &self.org_override_header);
        let identity = self.extractor.extract_with(&token, &ctx)?;
        debug!(org_source = %identity.org_source, "Request authenticated");
        Ok(Authenticated {
            identity,
            token,
            raw_token: SecretString::from(raw_token.to_string()),
        })
    }

    /// Rewrite outbound headers for an authenticated request
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Encoding`] if the identity cannot be encoded.
    pub fn apply(&self, headers: &mut HeaderMap, authenticated: &Authenticated) -> AuthResult<()> {
        self.translator.apply(
            headers,
            &authenticated.identity,
            Some(authenticated.raw_token()),
        )
    }
}
