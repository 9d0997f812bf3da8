//! Error types for tenantgate-gateway
//!
//! Every error maps to one HTTP status and one sanitized client message:
//! - Identity failures: whatever [`AuthError`] says (401, 503 or 500)
//! - No matching route: 404
//! - Request body over the limit: 413
//! - All upstream attempts failed: 502
//! - No healthy endpoint (fail closed): 503
//! - Upstream deadline exceeded: 504
//! - Everything else: 500

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::{HeaderValue, StatusCode, header};
use serde_json::json;
use tenantgate_auth::AuthError;
use thiserror::Error;
use tracing::error;

/// Result type for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Main error type for tenantgate-gateway
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// Token validation or identity extraction failed
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// No route matches the method and path
    #[error("No route for {method} {path}")]
    NoRoute {
        /// Request method
        method: String,
        /// Request path
        path: String,
    },

    /// Every endpoint of the cluster is ejected
    #[error("No healthy endpoint in cluster '{cluster}'")]
    NoHealthyEndpoint {
        /// Cluster name
        cluster: String,
    },

    /// Every attempt against the cluster failed
    #[error("Upstream error in cluster '{cluster}': {message}")]
    Upstream {
        /// Cluster name
        cluster: String,
        /// Last failure
        message: String,
    },

    /// The gateway deadline passed before the upstream answered
    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout {
        /// What timed out
        operation: String,
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// Request body exceeded the configured limit
    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge {
        /// Limit in bytes
        limit: usize,
    },

    /// Request could not be read
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Invalid gateway configuration
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong
        message: String,
        /// Offending configuration key, if known
        key: Option<String>,
    },

    /// Configuration source could not be parsed
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Create a no-route error
    pub fn no_route(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::NoRoute {
            method: method.into(),
            path: path.into(),
        }
    }

    /// Create a no-healthy-endpoint error
    pub fn no_healthy_endpoint(cluster: impl Into<String>) -> Self {
        Self::NoHealthyEndpoint {
            cluster: cluster.into(),
        }
    }

    /// Create an upstream error
    pub fn upstream(cluster: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            cluster: cluster.into(),
            message: message.into(),
        }
    }

    /// Create a bad-request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
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

    /// HTTP status this error surfaces as
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(err) => {
                StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::NoRoute { .. } => StatusCode::NOT_FOUND,
            Self::NoHealthyEndpoint { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration { .. }
            | Self::ConfigLoad(_)
            | Self::Serialization(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Sanitize error message for client responses
    ///
    /// Never names clusters, endpoints or validation steps.
    pub fn sanitize(&self) -> String {
        match self {
            Self::Auth(err) => err.sanitize(),
            Self::NoRoute { .. } => "Not found".to_string(),
            Self::NoHealthyEndpoint { .. } => "Service unavailable".to_string(),
            Self::Upstream { .. } => "Bad gateway".to_string(),
            Self::Timeout { .. } => "Gateway timeout".to_string(),
            Self::BodyTooLarge { .. } => "Payload too large".to_string(),
            Self::BadRequest(_) => "Bad request".to_string(),
            Self::Configuration { .. }
            | Self::ConfigLoad(_)
            | Self::Serialization(_)
            | Self::Io(_) => "Internal error".to_string(),
        }
    }

    /// Short stable label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(err) => err.kind(),
            Self::NoRoute { .. } => "no_route",
            Self::NoHealthyEndpoint { .. } => "no_healthy_endpoint",
            Self::Upstream { .. } => "upstream",
            Self::Timeout { .. } => "timeout",
            Self::BodyTooLarge { .. } => "body_too_large",
            Self::BadRequest(_) => "bad_request",
            Self::Configuration { .. } => "configuration",
            Self::ConfigLoad(_) => "config_load",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }

    /// Check if this is an identity failure
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Check if another endpoint might succeed where this attempt failed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Io(_))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "Request failed");
        }

        let mut response = (status, Json(json!({ "error": self.sanitize() }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Extension trait for Result types to add gateway error context
pub trait GatewayErrorExt<T> {
    /// Turn any error into a configuration error naming `key`
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] when `self` is an error.
    fn config_context(self, key: impl Into<String>) -> GatewayResult<T>;

    /// Turn any error into an upstream error for `cluster`
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Upstream`] when `self` is an error.
    fn upstream_context(self, cluster: impl Into<String>) -> GatewayResult<T>;
}

impl<T, E> GatewayErrorExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn config_context(self, key: impl Into<String>) -> GatewayResult<T> {
        self.map_err(|e| GatewayError::configuration_with_key(e.to_string(), key.into()))
    }

    fn upstream_context(self, cluster: impl Into<String>) -> GatewayResult<T> {
        self.map_err(|e| GatewayError::upstream(cluster.into(), e.to_string()))
    }
}
