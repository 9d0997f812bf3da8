//! JWKS fetching and caching
//!
//! One [`JwksCache`] is shared by every request. Keys are indexed by `kid` and
//! expire together after the configured TTL.
//!
//! - **Single-flight refresh**: concurrent misses trigger exactly one fetch;
//!   everyone else waits for that fetch and reuses its outcome
//! - **Forced refresh on unknown kid**: handles key rotation. Every kid gets
//!   one forced refresh; a kid still absent afterwards is not refetched for
//!   `min_refresh_interval`
//! - **One retry**: a failed fetch is retried once before the refresh fails
//! - **Fail closed**: a stale cache whose refresh fails yields
//!   [`AuthError::JwksUnreachable`], never the stale keys
//!
//! # Security Considerations
//!
//! - HTTPS required for JWKS endpoints except on loopback addresses
//! - Extra CA certificates can be trusted for in-cluster identity providers

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::JwkSet;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};

/// Where key sets come from
///
/// The cache only ever calls [`JwksSource::fetch`] while holding its refresh
/// lock, so implementations see at most one call in flight.
#[async_trait]
pub trait JwksSource: Send + Sync + fmt::Debug {
    /// Fetch the current key set
    async fn fetch(&self) -> AuthResult<JwkSet>;

    /// Location used in log lines
    fn location(&self) -> &str;
}

/// JWKS fetched over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpJwksSource {
    jwks_uri: String,
    http_client: reqwest::Client,
}

impl HttpJwksSource {
    /// Create a source with the given fetch timeout
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the URI is not HTTPS (plain
    /// HTTP is allowed for loopback hosts) or the HTTP client cannot be built.
    pub fn new(jwks_uri: impl Into<String>, timeout: Duration) -> AuthResult<Self> {
        Self::build(jwks_uri.into(), timeout, None)
    }

    /// Create a source from the auth configuration, loading the CA bundle if set
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the CA bundle cannot be read or
    /// parsed, or for the reasons listed on [`HttpJwksSource::new`].
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let ca_bundle = match &config.ca_bundle_path {
            Some(path) => Some(std::fs::read(path).map_err(|e| {
                AuthError::configuration_with_key(
                    format!("cannot read CA bundle {}: {e}", path.display()),
                    "auth.ca_bundle_path",
                )
            })?),
            None => None,
        };
        Self::build(config.jwks_uri(), config.fetch_timeout(), ca_bundle.as_deref())
    }

    fn build(jwks_uri: String, timeout: Duration, ca_bundle: Option<&[u8]>) -> AuthResult<Self> {
        let parsed = url::Url::parse(&jwks_uri).map_err(|e| {
            AuthError::configuration_with_key(format!("invalid JWKS URI: {e}"), "auth.jwks_uri")
        })?;
        let loopback = matches!(
            parsed.host_str(),
            Some("localhost" | "127.0.0.1" | "[::1]" | "::1")
        );
        if parsed.scheme() != "https" && !(parsed.scheme() == "http" && loopback) {
            return Err(AuthError::configuration_with_key(
                "JWKS endpoint must use HTTPS (HTTP only allowed for loopback hosts)",
                "auth.jwks_uri",
            ));
        }

        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(pem) = ca_bundle {
            let certificates = reqwest::Certificate::from_pem_bundle(pem).map_err(|e| {
                AuthError::configuration_with_key(
                    format!("invalid CA bundle: {e}"),
                    "auth.ca_bundle_path",
                )
            })?;
            if certificates.is_empty() {
                return Err(AuthError::configuration_with_key(
                    "CA bundle contains no certificates",
                    "auth.ca_bundle_path",
                ));
            }
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        }
        let http_client = builder.build().map_err(|e| {
            AuthError::configuration(format!("failed to build JWKS HTTP client: {e}"))
        })?;

        Ok(Self {
            jwks_uri,
            http_client,
        })
    }
}

#[async_trait]
impl JwksSource for HttpJwksSource {
    async fn fetch(&self) -> AuthResult<JwkSet> {
        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| {
                error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to fetch JWKS");
                AuthError::jwks_unreachable(format!("JWKS fetch failed: {e}"))
            })?;

        if !response.status().is_success() {
            error!(
                jwks_uri = %self.jwks_uri,
                status = %response.status(),
                "JWKS endpoint returned error status"
            );
            return Err(AuthError::jwks_unreachable(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        response.json::<JwkSet>().await.map_err(|e| {
            error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to parse JWKS JSON");
            AuthError::jwks_unreachable(format!("invalid JWKS document: {e}"))
        })
    }

    fn location(&self) -> &str {
        &self.jwks_uri
    }
}

/// One verification key
#[derive(Clone)]
pub struct JwksCacheEntry {
    /// Key id (`kid`)
    pub key_id: String,
    /// Key material ready for signature checks
    pub public_key: Arc<DecodingKey>,
    /// When the key set holding this key was fetched
    pub fetch_time: Instant,
    /// How long the entry may be used
    pub ttl: Duration,
}

impl JwksCacheEntry {
    /// Whether the entry may still be used at `now`
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetch_time) < self.ttl
    }
}

impl fmt::Debug for JwksCacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwksCacheEntry")
            .field("key_id", &self.key_id)
            .field("fetch_time", &self.fetch_time)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct KeyStore {
    keys: HashMap<String, JwksCacheEntry>,
    refreshed_at: Option<Instant>,
    /// Kids that were still absent after the refresh they forced
    missed: HashMap<String, Instant>,
}

enum Lookup {
    Fresh(Arc<DecodingKey>),
    Stale,
    Missing { rate_limited: bool },
}

/// Shared key cache with single-flight refresh
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use tenantgate_auth::jwt::{HttpJwksSource, JwksCache};
/// # tokio_test::block_on(async {
/// let source = HttpJwksSource::new(
///     "https://sso.example.com/protocol/openid-connect/certs",
///     Duration::from_secs(5),
/// )?;
/// let cache = JwksCache::new(Arc::new(source), Duration::from_secs(300));
///
/// let key = cache.decoding_key("key-id-123").await?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
pub struct JwksCache {
    source: Arc<dyn JwksSource>,
    ttl: Duration,
    min_refresh_interval: Duration,
    store: RwLock<KeyStore>,
    /// Held for the duration of one fetch
    refresh_lock: tokio::sync::Mutex<()>,
    /// Bumped after every completed fetch attempt
    generation: AtomicU64,
    /// Outcome of the most recent completed attempt
    last_failure: Mutex<Option<AuthError>>,
    fetch_count: AtomicU64,
}

impl fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwksCache")
            .field("source", &self.source.location())
            .field("ttl", &self.ttl)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .field("keys", &self.len())
            .field("fetch_count", &self.fetch_count())
            .finish()
    }
}

impl JwksCache {
    /// Create an empty cache
    pub fn new(source: Arc<dyn JwksSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            min_refresh_interval: Duration::from_secs(5),
            store: RwLock::new(KeyStore::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            last_failure: Mutex::new(None),
            fetch_count: AtomicU64::new(0),
        }
    }

    /// Set the minimum spacing between refreshes forced by an unknown kid
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Create a cache backed by [`HttpJwksSource`] from the auth configuration
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the HTTP source cannot be built.
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let source = HttpJwksSource::from_config(config)?;
        Ok(Self::new(Arc::new(source), config.cache_ttl())
            .with_min_refresh_interval(config.min_refresh_interval()))
    }

    /// Resolve the verification key for `kid`
    ///
    /// Returns a cached key when it is fresh. Otherwise refreshes the set
    /// (joining any refresh already in flight) and looks again.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeyNotFound`] if `kid` is absent after a refresh
    /// - [`AuthError::JwksUnreachable`] if a needed refresh failed
    pub async fn decoding_key(&self, kid: &str) -> AuthResult<Arc<DecodingKey>> {
        let observed = self.generation.load(Ordering::Acquire);

        match self.lookup(kid) {
            Lookup::Fresh(key) => return Ok(key),
            Lookup::Missing { rate_limited: true } => {
                warn!(
                    jwks_uri = %self.source.location(),
                    kid = %kid,
                    "Unknown key id, JWKS refresh rate limited"
                );
                return Err(AuthError::KeyNotFound {
                    kid: kid.to_string(),
                });
            }
            Lookup::Stale => {
                debug!(jwks_uri = %self.source.location(), "JWKS cache expired");
            }
            Lookup::Missing { .. } => {
                debug!(jwks_uri = %self.source.location(), kid = %kid, "Key id not cached");
            }
        }

        self.refresh_after(observed).await?;

        match self.lookup(kid) {
            Lookup::Fresh(key) => Ok(key),
            _ => {
                self.record_miss(kid);
                warn!(
                    jwks_uri = %self.source.location(),
                    kid = %kid,
                    "Key id not present in JWKS after refresh"
                );
                Err(AuthError::KeyNotFound {
                    kid: kid.to_string(),
                })
            }
        }
    }

    /// Force a refresh of the key set, joining one already in flight
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::JwksUnreachable`] if the fetch fails.
    pub async fn refresh(&self) -> AuthResult<()> {
        let observed = self.generation.load(Ordering::Acquire);
        self.refresh_after(observed).await
    }

    /// Number of fetches issued against the source
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Number of cached keys (fresh or not)
    pub fn len(&self) -> usize {
        self.store.read().keys.len()
    }

    /// Whether no keys are cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every cached key is still fresh and at least one exists
    pub fn is_warm(&self) -> bool {
        let now = Instant::now();
        let store = self.store.read();
        !store.keys.is_empty() && store.keys.values().all(|entry| entry.is_fresh(now))
    }

    /// Snapshot of the cached entries
    pub fn entries(&self) -> Vec<JwksCacheEntry> {
        self.store.read().keys.values().cloned().collect()
    }

    /// Drop every cached key
    pub fn clear(&self) {
        let mut store = self.store.write();
        store.keys.clear();
        store.refreshed_at = None;
        store.missed.clear();
        info!(jwks_uri = %self.source.location(), "JWKS cache cleared");
    }

    fn lookup(&self, kid: &str) -> Lookup {
        let now = Instant::now();
        let store = self.store.read();
        match store.keys.get(kid) {
            Some(entry) if entry.is_fresh(now) => Lookup::Fresh(Arc::clone(&entry.public_key)),
            Some(_) => Lookup::Stale,
            None => Lookup::Missing {
                rate_limited: store.missed.get(kid).is_some_and(|at| {
                    now.saturating_duration_since(*at) < self.min_refresh_interval
                }),
            },
        }
    }

    fn record_miss(&self, kid: &str) {
        let now = Instant::now();
        let interval = self.min_refresh_interval;
        let mut store = self.store.write();
        store
            .missed
            .retain(|_, at| now.saturating_duration_since(*at) < interval);
        store.missed.insert(kid.to_string(), now);
    }

    /// Refresh unless an attempt completed since `observed`
    ///
    /// A failed fetch is retried once before the attempt counts as failed.
    /// Waiters that queue behind an in-flight fetch take its outcome instead
    /// of issuing their own. A fetch abandoned by cancellation does not bump
    /// the generation, so the next waiter fetches.
    async fn refresh_after(&self, observed: u64) -> AuthResult<()> {
        let _guard = self.refresh_lock.lock().await;

        if self.generation.load(Ordering::Acquire) != observed {
            return match self.last_failure.lock().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            };
        }

        let outcome = match self.fetch_and_store().await {
            Err(e @ AuthError::JwksUnreachable(_)) => {
                warn!(
                    jwks_uri = %self.source.location(),
                    error = %e,
                    "JWKS fetch failed, retrying once"
                );
                self.fetch_and_store().await
            }
            outcome => outcome,
        };
        *self.last_failure.lock() = outcome.as_ref().err().cloned();
        self.generation.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn fetch_and_store(&self) -> AuthResult<()> {
        info!(jwks_uri = %self.source.location(), "Fetching JWKS from endpoint");
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        let jwks = self.source.fetch().await?;
        let fetch_time = Instant::now();

        let mut keys = HashMap::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                debug!(jwks_uri = %self.source.location(), "Skipping JWK without kid");
                continue;
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(
                        kid.clone(),
                        JwksCacheEntry {
                            key_id: kid,
                            public_key: Arc::new(key),
                            fetch_time,
                            ttl: self.ttl,
                        },
                    );
                }
                Err(e) => {
                    warn!(
                        jwks_uri = %self.source.location(),
                        kid = %kid,
                        error = %e,
                        "Skipping unusable JWK"
                    );
                }
            }
        }

        info!(
            jwks_uri = %self.source.location(),
            key_count = keys.len(),
            "Successfully fetched JWKS"
        );

        let mut store = self.store.write();
        store.keys = keys;
        store.refreshed_at = Some(fetch_time);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::sync::atomic::AtomicBool;

    /// In-memory source that counts fetches and can be switched to failing
    #[derive(Debug)]
    struct StaticSource {
        jwks: RwLock<serde_json::Value>,
        failing: AtomicBool,
        /// Fail this many fetches before answering normally
        failures_left: AtomicU64,
        fetches: AtomicU64,
    }

    impl StaticSource {
        fn new(jwks: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                jwks: RwLock::new(jwks),
                failing: AtomicBool::new(false),
                failures_left: AtomicU64::new(0),
                fetches: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl JwksSource for StaticSource {
        async fn fetch(&self) -> AuthResult<JwkSet> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let scheduled = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if scheduled || self.failing.load(Ordering::SeqCst) {
                return Err(AuthError::jwks_unreachable("connection refused"));
            }
            let value = self.jwks.read().clone();
            serde_json::from_value(value).map_err(|e| AuthError::jwks_unreachable(e.to_string()))
        }

        fn location(&self) -> &str {
            "memory://jwks"
        }
    }

    #[tokio::test]
    async fn test_cached_key_served_without_refetch() {
        let source = StaticSource::new(testing::jwks(&[&testing::primary()]));
        let cache = JwksCache::new(source.clone(), Duration::from_secs(300));

        cache.decoding_key(testing::PRIMARY_KID).await.unwrap();
        cache.decoding_key(testing::PRIMARY_KID).await.unwrap();

        assert_eq!(cache.fetch_count(), 1);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert!(cache.is_warm());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cache_refreshes_after_ttl() {
        let source = StaticSource::new(testing::jwks(&[&testing::primary()]));
        let cache = JwksCache::new(source.clone(), Duration::from_secs(60));

        cache.decoding_key(testing::PRIMARY_KID).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!cache.is_warm());

        cache.decoding_key(testing::PRIMARY_KID).await.unwrap();
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cache_fails_closed_when_refresh_fails() {
        let source = StaticSource::new(testing::jwks(&[&testing::primary()]));
        let cache = JwksCache::new(source.clone(), Duration::from_secs(60));

        cache.decoding_key(testing::PRIMARY_KID).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        source.failing.store(true, Ordering::SeqCst);

        let err = cache.decoding_key(testing::PRIMARY_KID).await.unwrap_err();
        assert!(matches!(err, AuthError::JwksUnreachable(_)));
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_kid_refresh_is_rate_limited() {
        let source = StaticSource::new(testing::jwks(&[&testing::primary()]));
        let cache = JwksCache::new(source.clone(), Duration::from_secs(300))
            .with_min_refresh_interval(Duration::from_secs(5));

        cache.decoding_key(testing::PRIMARY_KID).await.unwrap();

        // First miss for this kid: one forced refresh, then not found
        let err = cache.decoding_key("nobody").await.unwrap_err();
        assert_eq!(
            err,
            AuthError::KeyNotFound {
                kid: "nobody".to_string()
            }
        );
        assert_eq!(cache.fetch_count(), 2);

        // Same kid within the interval: no fetch at all
        let err = cache.decoding_key("nobody").await.unwrap_err();
        assert!(matches!(err, AuthError::KeyNotFound { .. }));
        assert_eq!(cache.fetch_count(), 2);

        // After the interval: refreshed again
        tokio::time::advance(Duration::from_secs(6)).await;
        let err = cache.decoding_key("nobody").await.unwrap_err();
        assert!(matches!(err, AuthError::KeyNotFound { .. }));
        assert_eq!(cache.fetch_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_rotated_right_after_fetch_is_found() {
        let source = StaticSource::new(testing::jwks(&[&testing::primary()]));
        let cache = JwksCache::new(source.clone(), Duration::from_secs(300))
            .with_min_refresh_interval(Duration::from_secs(5));

        cache.decoding_key(testing::PRIMARY_KID).await.unwrap();
        *source.jwks.write() = testing::jwks(&[&testing::primary(), &testing::rotated()]);
        tokio::time::advance(Duration::from_secs(1)).await;

        cache.decoding_key(testing::ROTATED_KID).await.unwrap();
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_retried_once() {
        let source = StaticSource::new(testing::jwks(&[&testing::primary()]));
        source.failures_left.store(1, Ordering::SeqCst);
        let cache = JwksCache::new(source.clone(), Duration::from_secs(300));

        cache.decoding_key(testing::PRIMARY_KID).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotated_key_picked_up_by_forced_refresh() {
        let source = StaticSource::new(testing::jwks(&[&testing::primary()]));
        let cache = JwksCache::new(source.clone(), Duration::from_secs(300));

        cache.decoding_key(testing::PRIMARY_KID).await.unwrap();
        *source.jwks.write() = testing::jwks(&[&testing::primary(), &testing::rotated()]);
        tokio::time::advance(Duration::from_secs(10)).await;

        cache.decoding_key(testing::ROTATED_KID).await.unwrap();
        assert_eq!(cache.fetch_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_shared_by_waiters_of_same_generation() {
        let source = StaticSource::new(testing::jwks(&[&testing::primary()]));
        source.failing.store(true, Ordering::SeqCst);
        let cache = JwksCache::new(source.clone(), Duration::from_secs(300));

        let observed = cache.generation.load(Ordering::Acquire);
        assert!(cache.refresh_after(observed).await.is_err());
        // A waiter that observed the same generation reuses the failure
        let err = cache.refresh_after(observed).await.unwrap_err();
        assert!(matches!(err, AuthError::JwksUnreachable(_)));
        // One fetch plus its retry
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_http_source_requires_https_off_loopback() {
        assert!(HttpJwksSource::new("http://sso.example.com/certs", Duration::from_secs(5)).is_err());
        assert!(HttpJwksSource::new("http://127.0.0.1:8080/certs", Duration::from_secs(5)).is_ok());
        assert!(HttpJwksSource::new("https://sso.example.com/certs", Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_http_source_rejects_garbage_ca_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.pem");
        std::fs::write(&path, "not a certificate").unwrap();

        let mut config = AuthConfig::new("https://sso.example.com");
        config.ca_bundle_path = Some(path);
        assert!(HttpJwksSource::from_config(&config).is_err());
    }
}
