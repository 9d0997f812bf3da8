//! JWT verification against a cached JWKS
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   kid    ┌──────────────┐  miss/stale  ┌──────────────┐
//! │  TokenValidator  │ ───────▶ │  JwksCache   │ ───────────▶ │  JwksSource  │
//! │ alg/iss/aud/exp  │ ◀─────── │ single-flight│ ◀─────────── │ (HTTP fetch) │
//! └──────────────────┘   key    └──────────────┘    JwkSet    └──────────────┘
//! ```
//!
//! - `validator` - signature and registered-claim checks, produces [`VerifiedToken`]
//! - `jwks` - key cache shared by every request, refreshed under one lock

pub mod jwks;
pub mod validator;

pub use jwks::{HttpJwksSource, JwksCache, JwksCacheEntry, JwksSource};
pub use validator::TokenValidator;

use serde_json::{Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A token whose signature and registered claims have been checked
///
/// Lives for one request. The raw claim map is what claim extraction reads;
/// nothing in here is ever forwarded upstream as-is.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// `sub` claim, when present
    pub subject: Option<String>,
    /// `iss` claim
    pub issuer: String,
    /// `aud` claim, normalized to a list
    pub audiences: Vec<String>,
    /// `exp` claim
    pub expiry: SystemTime,
    /// Key id the token was verified with
    pub key_id: String,
    /// Every claim in the payload
    pub claims: Map<String, Value>,
}

impl VerifiedToken {
    /// Build from a decoded claim map
    pub(crate) fn from_claims(key_id: String, claims: Map<String, Value>) -> Self {
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let issuer = claims
            .get("iss")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let audiences = match claims.get("aud") {
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        let expiry = claims
            .get("exp")
            .and_then(Value::as_u64)
            .map_or(UNIX_EPOCH, |exp| UNIX_EPOCH + Duration::from_secs(exp));

        Self {
            subject,
            issuer,
            audiences,
            expiry,
            key_id,
            claims,
        }
    }

    /// Look up a raw claim
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Look up a claim as a string (JSON integers are rendered in decimal)
    ///
    /// Strings are returned exactly as issued. Empty strings and any other
    /// JSON type count as absent.
    pub fn claim_str(&self, name: &str) -> Option<String> {
        match self.claims.get(name)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) if n.is_u64() || n.is_i64() => Some(n.to_string()),
            _ => None,
        }
    }

    /// String entries of a list claim, in claim order
    pub fn claim_list(&self, name: &str) -> Vec<&str> {
        match self.claims.get(name) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token(claims: Value) -> VerifiedToken {
        let Value::Object(map) = claims else {
            panic!("claims must be an object")
        };
        VerifiedToken::from_claims("kid-1".to_string(), map)
    }

    #[test]
    fn test_audience_string_and_array_forms() {
        let single = token(json!({"aud": "cost-management"}));
        assert_eq!(single.audiences, vec!["cost-management"]);

        let many = token(json!({"aud": ["account", "cost-management"]}));
        assert_eq!(many.audiences, vec!["account", "cost-management"]);
    }

    #[test]
    fn test_claim_str_accepts_integers() {
        let t = token(json!({"org_id": 1234567, "empty": "", "flag": true}));
        assert_eq!(t.claim_str("org_id").as_deref(), Some("1234567"));
        assert_eq!(t.claim_str("empty"), None);
        assert_eq!(t.claim_str("flag"), None);
        assert_eq!(t.claim_str("absent"), None);
    }

    #[test]
    fn test_claim_str_keeps_value_verbatim() {
        let t = token(json!({"org_id": " 1234567 ", "blank": "  "}));
        assert_eq!(t.claim_str("org_id").as_deref(), Some(" 1234567 "));
        assert_eq!(t.claim_str("blank").as_deref(), Some("  "));
    }

    #[test]
    fn test_claim_list_skips_non_strings() {
        let t = token(json!({"groups": ["a", 7, "b", null]}));
        assert_eq!(t.claim_list("groups"), vec!["a", "b"]);
        assert!(t.claim_list("missing").is_empty());
    }

    #[test]
    fn test_blank_subject_is_absent() {
        let t = token(json!({"sub": ""}));
        assert_eq!(t.subject, None);
    }
}
