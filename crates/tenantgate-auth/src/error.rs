//! Error types for tenantgate-auth
//!
//! Every failure on the identity path maps to exactly one HTTP status:
//! - Token problems (signature, expiry, issuer, audience, unknown key): 401
//! - Missing identity or a rejected default org: 401
//! - JWKS endpoint unreachable: 503 (the gateway never serves traffic on
//!   trust it cannot verify)
//! - Encoding failures: 500

use thiserror::Error;

/// Result type for authentication operations
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Errors produced while validating a token or deriving an identity from it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    /// Authorization header missing or not a bearer token
    #[error("Missing bearer token")]
    MissingToken,

    /// Token could not be parsed (bad header, missing kid, missing required claim)
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// Signature did not verify, or the algorithm is not allowed
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// `exp` is in the past or `nbf` is in the future
    #[error("Token expired or not yet valid")]
    Expired,

    /// `iss` does not equal the configured issuer
    #[error("Issuer mismatch")]
    IssuerMismatch,

    /// None of the configured audiences appear in `aud`
    #[error("Audience mismatch")]
    AudienceMismatch,

    /// Key id not present in the JWKS, even after a forced refresh
    #[error("Signing key '{kid}' not found in JWKS")]
    KeyNotFound {
        /// Key id from the token header
        kid: String,
    },

    /// JWKS endpoint could not be fetched or returned garbage
    #[error("JWKS unreachable: {0}")]
    JwksUnreachable(String),

    /// Neither a username nor a subject is present in the token
    #[error("Token carries no subject or username")]
    NoIdentity,

    /// No org id could be resolved and the policy forbids the default
    #[error("Organization id could not be resolved from token")]
    OrgUnresolved,

    /// Identity document could not be encoded
    #[error("Identity encoding failed: {0}")]
    Encoding(String),

    /// Invalid authentication configuration
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong
        message: String,
        /// Offending configuration key, if known
        key: Option<String>,
    },
}

impl AuthError {
    /// Create a malformed-token error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Create a signature error
    pub fn signature(message: impl Into<String>) -> Self {
        Self::SignatureInvalid(message.into())
    }

    /// Create a JWKS unreachable error
    pub fn jwks_unreachable(message: impl Into<String>) -> Self {
        Self::JwksUnreachable(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error with key context
    pub fn configuration_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// HTTP status code this error should surface as
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingToken
            | Self::Malformed(_)
            | Self::SignatureInvalid(_)
            | Self::Expired
            | Self::IssuerMismatch
            | Self::AudienceMismatch
            | Self::KeyNotFound { .. }
            | Self::NoIdentity
            | Self::OrgUnresolved => 401,
            Self::JwksUnreachable(_) => 503,
            Self::Encoding(_) | Self::Configuration { .. } => 500,
        }
    }

    /// Sanitize error message for client responses
    ///
    /// Never reveals which validation step failed.
    pub fn sanitize(&self) -> String {
        match self.status_code() {
            401 => "Unauthorized".to_string(),
            503 => "Service unavailable".to_string(),
            _ => "Internal error".to_string(),
        }
    }

    /// Short stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::Malformed(_) => "malformed",
            Self::SignatureInvalid(_) => "signature_invalid",
            Self::Expired => "expired",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::AudienceMismatch => "audience_mismatch",
            Self::KeyNotFound { .. } => "key_not_found",
            Self::JwksUnreachable(_) => "jwks_unreachable",
            Self::NoIdentity => "no_identity",
            Self::OrgUnresolved => "org_unresolved",
            Self::Encoding(_) => "encoding",
            Self::Configuration { .. } => "configuration",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => Self::Expired,
            ErrorKind::InvalidIssuer => Self::IssuerMismatch,
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
                "iss" => Self::IssuerMismatch,
                "aud" => Self::AudienceMismatch,
                other => Self::Malformed(format!("missing required claim '{other}'")),
            },
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm => Self::SignatureInvalid(err.to_string()),
            _ => Self::Malformed(err.to_string()),
        }
    }
}
