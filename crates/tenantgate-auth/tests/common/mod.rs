//! Common test utilities for integration tests
//!
//! A wiremock identity provider serving the fixed test keys, plus builders
//! for validators and authenticators pointed at it.

#![allow(dead_code)]

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tenantgate_auth::testing::{self, TestSigner};
use tenantgate_auth::{
    AuthConfig, Authenticator, ClaimsConfig, IdentityConfig, JwksCache, TokenValidator,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// JWKS path under the issuer
pub const CERTS_PATH: &str = "/protocol/openid-connect/certs";

/// Audience every test token carries
pub const AUDIENCE: &str = "cost-management";

/// Mock identity provider
pub struct MockIdentityProvider {
    pub server: MockServer,
    pub issuer: String,
}

impl MockIdentityProvider {
    /// Start a provider with no mocks mounted
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let issuer = server.uri();
        Self { server, issuer }
    }

    /// Serve a JWKS publishing `signers`, expecting exactly `fetches` requests
    pub async fn mock_jwks(&self, signers: &[&TestSigner], fetches: u64) {
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(testing::jwks(signers)))
            .expect(fetches)
            .mount(&self.server)
            .await;
    }

    /// Serve a JWKS slowly, to hold concurrent requests in the refresh
    pub async fn mock_slow_jwks(&self, signers: &[&TestSigner], delay: Duration, fetches: u64) {
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(testing::jwks(signers))
                    .set_delay(delay),
            )
            .expect(fetches)
            .mount(&self.server)
            .await;
    }

    /// Make the JWKS endpoint fail
    pub async fn mock_jwks_error(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Make the JWKS endpoint fail after a delay
    pub async fn mock_slow_jwks_error(&self, status: u16, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(status).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Auth configuration pointing at this provider
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.issuer.clone()).with_audiences(vec![AUDIENCE.to_string()])
    }

    /// Key cache built from [`MockIdentityProvider::auth_config`]
    pub fn cache(&self) -> Arc<JwksCache> {
        Arc::new(JwksCache::from_config(&self.auth_config()).expect("cache"))
    }

    /// Validator with its own cache
    pub fn validator(&self) -> TokenValidator {
        TokenValidator::new(&self.auth_config(), self.cache())
    }

    /// Authenticator with default claim and identity settings
    pub fn authenticator(&self) -> Authenticator {
        Authenticator::from_config(
            &self.auth_config(),
            &ClaimsConfig::default(),
            &IdentityConfig::default(),
            self.cache(),
        )
        .expect("authenticator")
    }

    /// Valid claims for `subject` issued by this provider, merged with `extra`
    pub fn claims(&self, subject: &str, extra: Value) -> Value {
        let base = testing::with_claims(
            testing::claims(subject),
            json!({"iss": self.issuer, "aud": AUDIENCE}),
        );
        testing::with_claims(base, extra)
    }

    /// Token signed by the primary key
    pub fn token(&self, subject: &str, extra: Value) -> String {
        testing::primary().sign(&self.claims(subject, extra))
    }
}
