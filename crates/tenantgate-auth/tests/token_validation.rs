//! Token validation against a mock identity provider

mod common;

use common::{AUDIENCE, MockIdentityProvider};
use jsonwebtoken::{Algorithm, Header};
use serde_json::json;
use tenantgate_auth::AuthError;
use tenantgate_auth::testing::{self, ROTATED_KID};

#[tokio::test]
async fn test_valid_token_accepted() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_jwks(&[&testing::primary()], 1).await;
    let validator = idp.validator();

    let verified = validator
        .validate(&idp.token("u1", json!({"org_id": "1234567"})))
        .await
        .unwrap();

    assert_eq!(verified.subject.as_deref(), Some("u1"));
    assert_eq!(verified.issuer, idp.issuer);
    assert_eq!(verified.audiences, vec![AUDIENCE]);
    assert_eq!(verified.claim_str("org_id").as_deref(), Some("1234567"));
}

#[tokio::test]
async fn test_token_expired_by_one_second_rejected() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_jwks(&[&testing::primary()], 1).await;
    let validator = idp.validator();

    let token = idp.token(
        "u1",
        json!({"exp": testing::now() - 1, "org_id": "1234567", "account_number": "1"}),
    );
    let err = validator.validate(&token).await.unwrap_err();

    assert_eq!(err, AuthError::Expired);
    assert_eq!(err.status_code(), 401);
}

#[tokio::test]
async fn test_not_yet_valid_token_rejected() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_jwks(&[&testing::primary()], 1).await;

    let token = idp.token("u1", json!({"nbf": testing::now() + 120}));
    let err = idp.validator().validate(&token).await.unwrap_err();
    assert_eq!(err, AuthError::Expired);
}

#[tokio::test]
async fn test_issuer_mismatch() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_jwks(&[&testing::primary()], 1).await;

    let token = idp.token("u1", json!({"iss": "https://evil.example.com"}));
    let err = idp.validator().validate(&token).await.unwrap_err();
    assert_eq!(err, AuthError::IssuerMismatch);
}

#[tokio::test]
async fn test_audience_array_form_accepted() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_jwks(&[&testing::primary()], 1).await;

    let token = idp.token("u1", json!({"aud": ["account", AUDIENCE]}));
    let verified = idp.validator().validate(&token).await.unwrap();
    assert_eq!(verified.audiences, vec!["account", AUDIENCE]);
}

#[tokio::test]
async fn test_audience_mismatch() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_jwks(&[&testing::primary()], 1).await;
    let validator = idp.validator();

    let token = idp.token("u1", json!({"aud": ["account", "other-app"]}));
    assert_eq!(
        validator.validate(&token).await.unwrap_err(),
        AuthError::AudienceMismatch
    );

    let token = idp.token("u1", json!({"aud": null}));
    assert_eq!(
        validator.validate(&token).await.unwrap_err(),
        AuthError::AudienceMismatch
    );
}

#[tokio::test]
async fn test_signature_from_unpublished_key_rejected() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_jwks(&[&testing::primary()], 1).await;

    // Signed by the rotated key but claiming the primary kid
    let header = Header {
        kid: Some(testing::PRIMARY_KID.to_string()),
        ..Header::new(Algorithm::RS256)
    };
    let token = testing::rotated().sign_with_header(header, &idp.claims("u1", json!({})));

    let err = idp.validator().validate(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::SignatureInvalid(_)), "{err:?}");
}

#[tokio::test]
async fn test_missing_kid_is_malformed() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_jwks(&[&testing::primary()], 0).await;

    let token = testing::primary()
        .sign_with_header(Header::new(Algorithm::RS256), &idp.claims("u1", json!({})));
    let err = idp.validator().validate(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::Malformed(_)), "{err:?}");
}

#[tokio::test]
async fn test_symmetric_algorithm_rejected_before_key_lookup() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_jwks(&[&testing::primary()], 0).await;

    let header = Header {
        kid: Some(testing::PRIMARY_KID.to_string()),
        ..Header::new(Algorithm::HS256)
    };
    let token = jsonwebtoken::encode(
        &header,
        &idp.claims("u1", json!({})),
        &jsonwebtoken::EncodingKey::from_secret(b"shared-secret"),
    )
    .unwrap();

    let err = idp.validator().validate(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::SignatureInvalid(_)), "{err:?}");
}

#[tokio::test]
async fn test_garbage_token_is_malformed() {
    let idp = MockIdentityProvider::start().await;
    let err = idp.validator().validate("not-a-jwt").await.unwrap_err();
    assert!(matches!(err, AuthError::Malformed(_)));
    assert_eq!(err.status_code(), 401);
}

#[tokio::test]
async fn test_unknown_kid_after_forced_refresh() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_jwks(&[&testing::primary()], 1).await;
    let validator = idp.validator();

    // Cold cache: one fetch, kid still absent
    let token = testing::rotated().sign(&idp.claims("u1", json!({})));
    let err = validator.validate(&token).await.unwrap_err();
    assert_eq!(
        err,
        AuthError::KeyNotFound {
            kid: ROTATED_KID.to_string()
        }
    );
    assert_eq!(validator.keys().fetch_count(), 1);

    // Within the refresh interval no further fetch is made
    let err = validator.validate(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::KeyNotFound { .. }));
    assert_eq!(validator.keys().fetch_count(), 1);
}

#[tokio::test]
async fn test_jwks_unreachable_fails_closed() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_jwks_error(500).await;

    let err = idp
        .validator()
        .validate(&idp.token("u1", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::JwksUnreachable(_)));
    assert_eq!(err.status_code(), 503);
    assert_eq!(err.sanitize(), "Service unavailable");
}

#[tokio::test]
async fn test_jwks_connection_refused_fails_closed() {
    let idp = MockIdentityProvider::start().await;
    let validator = idp.validator();
    let token = idp.token("u1", json!({}));
    drop(idp);

    let err = validator.validate(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::JwksUnreachable(_)));
}
