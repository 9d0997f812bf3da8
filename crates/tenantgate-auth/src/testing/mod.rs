//! Fixed RSA keys and token helpers for tests
//!
//! Two 2048-bit key pairs are checked in: `primary` is what a freshly started
//! identity provider serves, `rotated` is the key it rotates to. Both are
//! test-only and must never be trusted anywhere else.

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::time::{SystemTime, UNIX_EPOCH};

/// Key id of the primary test key
pub const PRIMARY_KID: &str = "tenantgate-test-primary";
/// Key id of the rotated test key
pub const ROTATED_KID: &str = "tenantgate-test-rotated";
/// Issuer used by [`claims`]
pub const TEST_ISSUER: &str = "https://sso.example.com/auth/realms/external";
/// Audience used by [`claims`]
pub const TEST_AUDIENCE: &str = "cost-management";

const PRIMARY_PEM: &str = include_str!("primary_key.pem");
const PRIMARY_N: &str = "s5lPSj9vmjN0DDkT_1xHPinNC6Scr2Iu2jIwwdys0YiZ2upYqjiVZOVtRIJuRgVqV1YnUdA2uq5D1LykfeqAXMgZB4MGibsH13cYyGDbxkxcLbN1wCvNd0gRVwJwrjTUPipZBXMEJEsdMIhZk-cPjiDTJZhE8iiLCcUpOnPkpX_tW6kYHBMZegs95ALBGQ0jvxfv1_xOuzddsOW7_5LTPWcH4OBO9YPbaid1BGrnj1K0zwyETJqeppBpryBGEgS2IPSut1gOpODeEDCj5aRlVzhVHYcC5A-8JV3T8bXEuCxwfYjcM3iaBm6ohdseI_dlAnLSPJAm_hCRj4HuzJUaDQ";
const ROTATED_PEM: &str = include_str!("rotated_key.pem");
const ROTATED_N: &str = "vR8ah0feoEoQ8PC3vd0sHyE5ZY9b8PF7hXkIP7a6cLqc7bEeBvabc0Cy4XErqDCWOrqToGTk_qBEu_SbjQkeyrl_axRYEUZaIsOJwHhBmrswn5ugPFfV26suNkMktP7pm-SQBUwXueQcCtl4DW9DMCNAeJVlBWKZO1zx-505-KVzbzdlWAG0uzOsftmYxwsSg6HJAxK0ZGdg1c3dpVK4jTn02Xfxzh8oay-7U8Ae-tI_eiLPrEJB26VDKvkwuU2KiUqp1jbPKgcZqwKQiKdGlD4phDOMTt7urUSZ1wc3BI15qJqJSt28cPAC1Osv8aaphE0uVoHpKsXgAdc_vlWQRw";
const EXPONENT: &str = "AQAB";

/// RSA key pair that signs test tokens
#[derive(Debug, Clone, Copy)]
pub struct TestSigner {
    kid: &'static str,
    private_pem: &'static str,
    modulus: &'static str,
}

/// The key a fresh identity provider publishes
pub fn primary() -> TestSigner {
    TestSigner {
        kid: PRIMARY_KID,
        private_pem: PRIMARY_PEM,
        modulus: PRIMARY_N,
    }
}

/// The key the identity provider rotates to
pub fn rotated() -> TestSigner {
    TestSigner {
        kid: ROTATED_KID,
        private_pem: ROTATED_PEM,
        modulus: ROTATED_N,
    }
}

impl TestSigner {
    /// Key id placed in token headers and the JWK
    pub fn kid(&self) -> &'static str {
        self.kid
    }

    /// Sign `claims` with RS256 under this signer's kid
    ///
    /// # Panics
    ///
    /// Panics if the embedded key cannot be parsed, which is a broken fixture.
    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with_header(Header {
            kid: Some(self.kid.to_string()),
            ..Header::new(Algorithm::RS256)
        }, claims)
    }

    /// Sign with a caller-supplied header (to test missing kid, other algs)
    ///
    /// # Panics
    ///
    /// Panics if the embedded key cannot be parsed or signing fails.
    pub fn sign_with_header(&self, header: Header, claims: &Value) -> String {
        let key = EncodingKey::from_rsa_pem(self.private_pem.as_bytes())
            .expect("embedded test key is valid PEM");
        encode(&header, claims, &key).expect("signing test token")
    }

    /// Public half as a JWK
    pub fn jwk(&self) -> Value {
        json!({
            "kty": "RSA",
            "kid": self.kid,
            "use": "sig",
            "alg": "RS256",
            "n": self.modulus,
            "e": EXPONENT,
        })
    }
}

/// A JWKS document publishing the given signers
pub fn jwks(signers: &[&TestSigner]) -> Value {
    json!({ "keys": signers.iter().map(|s| s.jwk()).collect::<Vec<_>>() })
}

/// Seconds since the Unix epoch
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

/// Baseline claims that pass validation against [`TEST_ISSUER`]/[`TEST_AUDIENCE`]
///
/// Merge extra claims into the returned object with [`with_claims`].
pub fn claims(subject: &str) -> Value {
    let now = now();
    json!({
        "sub": subject,
        "iss": TEST_ISSUER,
        "aud": TEST_AUDIENCE,
        "iat": now,
        "exp": now + 300,
    })
}

/// Overlay `extra` onto `base`; a `null` in `extra` removes the claim
pub fn with_claims(mut base: Value, extra: Value) -> Value {
    if let (Value::Object(target), Value::Object(extra)) = (&mut base, extra) {
        for (name, value) in extra {
            if value.is_null() {
                target.remove(&name);
            } else {
                target.insert(name, value);
            }
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_token_carries_kid() {
        let token = primary().sign(&claims("alice"));
        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some(PRIMARY_KID));
        assert_eq!(header.alg, Algorithm::RS256);
    }

    #[test]
    fn test_jwks_parses_as_key_set() {
        let set: jsonwebtoken::jwk::JwkSet =
            serde_json::from_value(jwks(&[&primary(), &rotated()])).unwrap();
        assert_eq!(set.keys.len(), 2);
        assert!(set.find(ROTATED_KID).is_some());
    }

    #[test]
    fn test_with_claims_overlays_and_removes() {
        let merged = with_claims(claims("alice"), json!({"org_id": "42", "sub": null}));
        assert_eq!(merged["org_id"], "42");
        assert!(merged.get("sub").is_none());
    }
}
