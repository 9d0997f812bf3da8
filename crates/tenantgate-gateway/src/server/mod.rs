//! Gateway HTTP server
//!
//! [`Gateway`] owns every shared component: the authenticator (and through
//! it the JWKS cache), the route table, the backend clusters and the
//! metrics. [`app`] builds the axum router around it and [`serve`] runs it
//! until the shutdown future resolves.

pub mod handlers;

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::routing::get;
use http::Request;
use tenantgate_auth::{Authenticator, JwksCache};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::cluster::{ClusterRegistry, spawn_health_checks};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics::{AtomicMetrics, MetricsSnapshot};
use crate::proxy::{Forwarder, REQUEST_ID};
use crate::routing::RequestRouter;

/// Shared gateway state
#[derive(Debug)]
pub struct Gateway {
    authenticator: Authenticator,
    router: RequestRouter,
    clusters: Arc<ClusterRegistry>,
    forwarder: Forwarder,
    metrics: Arc<AtomicMetrics>,
    max_body_bytes: usize,
}

impl Gateway {
    /// Build every component from validated configuration
    ///
    /// # Errors
    ///
    /// Returns the first configuration or construction error.
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;

        let keys = Arc::new(JwksCache::from_config(&config.auth)?);
        let authenticator =
            Authenticator::from_config(&config.auth, &config.claims, &config.identity, keys)?;
        let clusters = Arc::new(ClusterRegistry::from_config(
            &config.backend_clusters,
            config.fail_mode,
        )?);
        let known: HashSet<&str> = clusters.names().collect();
        let router = RequestRouter::from_config(&config.route_table, &known)?;
        let metrics = Arc::new(AtomicMetrics::new());

        Ok(Self {
            authenticator,
            router,
            clusters,
            forwarder: Forwarder::new(config.request_timeout(), Arc::clone(&metrics)),
            metrics,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Identity pipeline
    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Route table holder
    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    /// Backend clusters
    pub fn clusters(&self) -> &Arc<ClusterRegistry> {
        &self.clusters
    }

    /// Upstream forwarder
    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// Metrics counters
    pub fn metrics(&self) -> &AtomicMetrics {
        &self.metrics
    }

    /// Current metrics, JWKS fetches included
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(self.authenticator.keys().fetch_count())
    }

    /// Largest accepted request body
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Replace the route table from a freshly loaded configuration
    ///
    /// Only routes are reloaded; cluster and auth changes need a restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the new rules are invalid; the current table stays.
    pub fn reload_routes(&self, config: &GatewayConfig) -> GatewayResult<()> {
        let known: HashSet<&str> = self.clusters.names().collect();
        let configured: HashSet<&str> = config
            .backend_clusters
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        if known != configured {
            warn!("Backend cluster changes are ignored until restart");
        }
        self.router.reload(&config.route_table, &known)
    }
}

/// Build the axum application
pub fn app(gateway: Arc<Gateway>) -> Router {
    let max_body_bytes = gateway.max_body_bytes();
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .fallback(handlers::gateway)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            tracing::info_span!(
                "request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id,
            )
        }))
        .layer(axum::middleware::from_fn(handlers::request_id))
        .with_state(gateway)
}

/// Serve until `shutdown` resolves, then drain in-flight requests
///
/// # Errors
///
/// Returns [`GatewayError::Io`] if the server fails.
pub async fn serve<F>(gateway: Arc<Gateway>, listener: TcpListener, shutdown: F) -> GatewayResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "Gateway listening");
    axum::serve(listener, app(gateway))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Gateway stopped");
    Ok(())
}

/// Bind, start background tasks and serve until Ctrl-C or SIGTERM
///
/// # Errors
///
/// Returns an error if the listen address cannot be bound or the server fails.
pub async fn run(config: GatewayConfig, config_path: Option<PathBuf>) -> GatewayResult<()> {
    let gateway = Arc::new(Gateway::from_config(&config)?);

    let listener = TcpListener::bind(&config.listen).await.map_err(|e| {
        GatewayError::configuration_with_key(
            format!("failed to bind {}: {e}", config.listen),
            "listen",
        )
    })?;

    let mut background = spawn_health_checks(gateway.clusters());
    if let Some(path) = config_path {
        background.push(spawn_reload_on_hangup(Arc::clone(&gateway), path));
    }

    let result = serve(gateway, listener, shutdown_signal()).await;
    for task in background {
        task.abort();
    }
    result
}

/// Resolves on Ctrl-C or, on unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received, draining connections");
}

#[cfg(unix)]
fn spawn_reload_on_hangup(gateway: Arc<Gateway>, path: PathBuf) -> JoinHandle<()> {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGHUP, route reload disabled");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            reload_from(&gateway, &path);
        }
    })
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_gateway: Arc<Gateway>, _path: PathBuf) -> JoinHandle<()> {
    tokio::spawn(async {})
}

#[cfg_attr(not(unix), allow(dead_code))]
fn reload_from(gateway: &Gateway, path: &Path) {
    let result = GatewayConfig::from_file(path).and_then(|config| gateway.reload_routes(&config));
    if let Err(e) = result {
        error!(error = %e, path = %path.display(), "Route reload failed, keeping current table");
    }
}
