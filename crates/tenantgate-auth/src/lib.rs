//! # tenantgate-auth
//!
//! Identity side of the tenantgate gateway: validates bearer JWTs against a
//! cached JWKS, resolves multi-tenant claims with ordered fallbacks, and
//! synthesizes the identity header downstream services trust.
//!
//! ## Components
//!
//! - [`jwt::TokenValidator`] - signature, expiry, issuer and audience checks
//! - [`jwt::JwksCache`] - shared key cache with single-flight refresh
//! - [`claims::ClaimExtractor`] - org id, account number and username resolution
//! - [`identity::IdentityTranslator`] - identity header encoding and header hygiene
//! - [`Authenticator`] - the three stages wired together
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenantgate_auth::{AuthConfig, Authenticator, ClaimsConfig, IdentityConfig, jwt::JwksCache};
//!
//! # tokio_test::block_on(async {
//! let auth = AuthConfig::new("https://sso.example.com/auth/realms/external")
//!     .with_audiences(vec!["cost-management".to_string()]);
//! let keys = Arc::new(JwksCache::from_config(&auth)?);
//! let authenticator = Authenticator::from_config(
//!     &auth,
//!     &ClaimsConfig::default(),
//!     &IdentityConfig::default(),
//!     keys,
//! )?;
//!
//! let mut headers = http::HeaderMap::new();
//! headers.insert("authorization", "Bearer eyJ...".parse()?);
//! let authenticated = authenticator.authenticate(&headers).await?;
//! authenticator.apply(&mut headers, &authenticated)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod authenticator;
pub mod claims;
pub mod config;
pub mod error;
pub mod identity;
pub mod jwt;
pub mod mask;

#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod testing;

pub use authenticator::{Authenticated, Authenticator};
pub use claims::{ClaimExtractor, ClaimSource, ExtractedIdentity, ExtractionContext};
pub use config::{AuthConfig, ClaimsConfig, IdentityConfig, MissingOrgPolicy};
pub use error::{AuthError, AuthResult};
pub use identity::{IdentityDocument, IdentityTranslator};
pub use jwt::{JwksCache, TokenValidator, VerifiedToken};
