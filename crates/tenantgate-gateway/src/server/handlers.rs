//! HTTP handlers
//!
//! `/health`, `/ready` and `/metrics` answer directly and never touch the
//! identity pipeline. Everything else goes through [`gateway`].

use std::sync::Arc;

use std::error::Error as StdError;

use axum::Json;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{HeaderValue, StatusCode};
use http_body_util::LengthLimitError;
use serde_json::json;
use tracing::{debug, info};

use super::Gateway;
use crate::error::GatewayError;
use crate::proxy::{REQUEST_ID, ensure_request_id, outbound_headers};

/// Liveness
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Readiness: every cluster has at least one selectable endpoint
pub async fn ready(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    let clusters = gateway.clusters().status();
    let ready = clusters.iter().all(|c| c.healthy_endpoints > 0);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "degraded" },
            "clusters": clusters,
        })),
    )
}

/// Metrics snapshot
pub async fn metrics(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.metrics_snapshot())
}

/// Authenticate, route, rewrite identity headers, forward
pub async fn gateway(State(gateway): State<Arc<Gateway>>, request: Request) -> Response {
    match proxy_request(&gateway, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn proxy_request(gateway: &Gateway, request: Request) -> Result<Response, GatewayError> {
    let (parts, body) = request.into_parts();

    let authenticated = match gateway.authenticator().authenticate(&parts.headers).await {
        Ok(authenticated) => authenticated,
        Err(err) => {
            gateway.metrics().inc_auth_rejected();
            info!(kind = err.kind(), "Request rejected");
            return Err(err.into());
        }
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path(), |pq| pq.as_str());
    let decision = match gateway.router().route(&parts.method, path_and_query) {
        Ok(decision) => decision,
        Err(err) => {
            if matches!(err, GatewayError::NoRoute { .. }) {
                gateway.metrics().inc_no_route();
            }
            return Err(err);
        }
    };
    let cluster = gateway.clusters().get(&decision.backend_cluster_name).ok_or_else(|| {
        GatewayError::configuration(format!(
            "route targets unknown cluster '{}'",
            decision.backend_cluster_name
        ))
    })?;

    let body = read_body(body, gateway.max_body_bytes()).await?;

    let mut headers = outbound_headers(parts.headers);
    gateway.authenticator().apply(&mut headers, &authenticated)?;

    debug!(
        cluster = %decision.backend_cluster_name,
        path = %decision.rewritten_path,
        org_source = %authenticated.identity.org_source,
        "Forwarding request"
    );
    gateway
        .forwarder()
        .forward(cluster, parts.method, &decision.rewritten_path, headers, body)
        .await
}

/// Buffer a request body of at most `limit` bytes
///
/// # Errors
///
/// - [`GatewayError::BodyTooLarge`] past the limit
/// - [`GatewayError::BadRequest`] if the body cannot be read
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, GatewayError> {
    axum::body::to_bytes(body, limit).await.map_err(|err| {
        if exceeds_limit(&err) {
            GatewayError::BodyTooLarge { limit }
        } else {
            debug!(error = %err, "Failed to read request body");
            GatewayError::bad_request(format!("failed to read request body: {err}"))
        }
    })
}

fn exceeds_limit(err: &axum::Error) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err as &(dyn StdError + 'static));
    while let Some(cause) = current {
        if cause.is::<LengthLimitError>() {
            return true;
        }
        current = cause.source();
    }
    false
}

/// Make sure the request carries an id and echo it on the response
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = ensure_request_id(request.headers_mut());
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn test_read_body_within_limit() {
        let body = read_body(Body::from("hello"), 16).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_read_body_over_limit_is_payload_too_large() {
        let err = read_body(Body::from("x".repeat(64)), 16).await.unwrap_err();
        assert!(matches!(err, GatewayError::BodyTooLarge { limit: 16 }));
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_read_body_stream_error_is_bad_request() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            )),
        ];
        let body = Body::from_stream(stream::iter(chunks));

        let err = read_body(body, 1024).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
