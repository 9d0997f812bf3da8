//! Identity header synthesis
//!
//! Downstream services read tenant identity from a single header holding a
//! base64 (standard alphabet) JSON document:
//!
//! ```json
//! {"identity":{"org_id":"1234567","account_number":"9876543","type":"User",
//!   "user":{"username":"u1","email":"","is_active":true,"is_org_admin":false,"is_internal":false},
//!   "internal":{"org_id":"1234567","auth_type":"jwt-tokenreview","auth_time":0}}}
//! ```
//!
//! The document is built from typed structs, so free-text claims cannot
//! alter its shape.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::claims::ExtractedIdentity;
use crate::config::{ClaimsConfig, IdentityConfig};
use crate::error::{AuthError, AuthResult};

/// Top-level identity document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDocument {
    /// The identity
    pub identity: Identity,
}

/// Tenant identity as downstream services expect it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Organization id
    pub org_id: String,
    /// Account number
    pub account_number: String,
    /// Principal type, always `User`
    #[serde(rename = "type")]
    pub kind: String,
    /// User details
    pub user: IdentityUser,
    /// Gateway-internal details
    pub internal: IdentityInternal,
}

/// User block of the identity document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUser {
    /// Username
    pub username: String,
    /// Email, possibly empty
    pub email: String,
    /// Always true
    pub is_active: bool,
    /// Always false
    pub is_org_admin: bool,
    /// Always false
    pub is_internal: bool,
}

/// Internal block of the identity document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInternal {
    /// Organization id (repeated)
    pub org_id: String,
    /// `<provider>-tokenreview`
    pub auth_type: String,
    /// Always 0
    pub auth_time: u64,
}

impl From<&ExtractedIdentity> for IdentityDocument {
    fn from(identity: &ExtractedIdentity) -> Self {
        Self {
            identity: Identity {
                org_id: identity.org_id.clone(),
                account_number: identity.account_number.clone(),
                kind: "User".to_string(),
                user: IdentityUser {
                    username: identity.username.clone(),
                    email: identity.email.clone(),
                    is_active: true,
                    is_org_admin: false,
                    is_internal: false,
                },
                internal: IdentityInternal {
                    org_id: identity.org_id.clone(),
                    auth_type: identity.auth_method.clone(),
                    auth_time: 0,
                },
            },
        }
    }
}

/// Builds the identity header and scrubs internal headers
#[derive(Debug, Clone)]
pub struct IdentityTranslator {
    header_name: HeaderName,
    forward_token_header: Option<HeaderName>,
    /// Removed from every forwarded request
    internal_headers: Vec<HeaderName>,
}

impl IdentityTranslator {
    /// Create a translator from configuration
    ///
    /// The org override header is always treated as internal.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if a header name is invalid.
    pub fn new(identity: &IdentityConfig, claims: &ClaimsConfig) -> AuthResult<Self> {
        let header_name = parse_header(&identity.identity_header, "identity.identity_header")?;
        let forward_token_header = identity
            .forward_token_header
            .as_deref()
            .map(|name| parse_header(name, "identity.forward_token_header"))
            .transpose()?;

        let mut internal_headers = vec![
            AUTHORIZATION,
            parse_header(&claims.org_override_header, "claims.org_override_header")?,
        ];
        if let Some(name) = &forward_token_header {
            internal_headers.push(name.clone());
        }
        for name in &identity.internal_headers {
            internal_headers.push(parse_header(name, "identity.internal_headers")?);
        }

        Ok(Self {
            header_name,
            forward_token_header,
            internal_headers,
        })
    }

    /// Name of the identity header
    pub fn header_name(&self) -> &HeaderName {
        &self.header_name
    }

    /// Encode an identity into a header value string
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Encoding`] if the org id is empty or
    /// serialization fails.
    pub fn translate(&self, identity: &ExtractedIdentity) -> AuthResult<String> {
        encode(&IdentityDocument::from(identity))
    }

    /// Decode a header value back into the document
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Encoding`] if the value is not base64 JSON of the
    /// expected shape.
    pub fn decode(value: &str) -> AuthResult<IdentityDocument> {
        let bytes = STANDARD
            .decode(value.trim())
            .map_err(|e| AuthError::Encoding(format!("identity header is not base64: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::Encoding(format!("identity header is not an identity: {e}")))
    }

    /// Remove every internal header and every existing identity header value
    pub fn strip_internal(&self, headers: &mut HeaderMap) {
        for name in &self.internal_headers {
            headers.remove(name);
        }
        headers.remove(&self.header_name);
    }

    /// Prepare outbound headers for an authenticated request
    ///
    /// Strips internal headers, then sets exactly one identity header and,
    /// when configured, the forwarded bearer token. Nothing is modified if
    /// encoding fails.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Encoding`] if the identity cannot be encoded.
    pub fn apply(
        &self,
        headers: &mut HeaderMap,
        identity: &ExtractedIdentity,
        bearer_token: Option<&str>,
    ) -> AuthResult<()> {
        let encoded = self.translate(identity)?;
        let value = HeaderValue::from_str(&encoded)
            .map_err(|e| AuthError::Encoding(format!("identity header value: {e}")))?;
        let forwarded = match (&self.forward_token_header, bearer_token) {
            (Some(name), Some(token)) => Some((
                name.clone(),
                HeaderValue::from_str(token)
                    .map_err(|e| AuthError::Encoding(format!("forwarded token value: {e}")))?,
            )),
            _ => None,
        };

        self.strip_internal(headers);
        headers.insert(self.header_name.clone(), value);
        if let Some((name, mut token)) = forwarded {
            token.set_sensitive(true);
            headers.insert(name, token);
        }
        debug!(header = %self.header_name, "Identity header attached");
        Ok(())
    }
}

/// Serialize and base64-encode a document
///
/// # Errors
///
/// Returns [`AuthError::Encoding`] if the org id is empty or serialization
/// fails.
pub fn encode(document: &IdentityDocument) -> AuthResult<String> {
    if document.identity.org_id.is_empty() {
        return Err(AuthError::Encoding("org_id is empty".to_string()));
    }
    let json = serde_json::to_vec(document)
        .map_err(|e| AuthError::Encoding(format!("identity serialization: {e}")))?;
    Ok(STANDARD.encode(json))
}

fn parse_header(name: &str, key: &str) -> AuthResult<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
        AuthError::configuration_with_key(format!("invalid header name '{name}'"), key)
    })
}
