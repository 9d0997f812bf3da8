//! Upstream forwarding
//!
//! Sends one buffered request to a cluster, trying the next healthy
//! endpoint after a connect failure (at most once per endpoint), and
//! streams the upstream response back. The whole exchange, retries
//! included, runs under the gateway deadline.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http::header::{self, HeaderName};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cluster::BackendCluster;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics::AtomicMetrics;

/// Correlation header carried on every forwarded request and every response
pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const MAX_REQUEST_ID_LEN: usize = 128;

const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any named by `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Keep a usable client request id (trimmed) or generate one
///
/// Returns the id now present in `headers`; exactly one value remains.
pub fn ensure_request_id(headers: &mut HeaderMap) -> String {
    let id = headers
        .get(&REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);

    match HeaderValue::from_str(&id) {
        Ok(value) => {
            headers.insert(REQUEST_ID, value);
        }
        Err(_) => {
            headers.remove(REQUEST_ID);
        }
    }
    id
}

/// Headers sent upstream for an inbound request
///
/// `Host` and `Content-Length` are recomputed by the upstream client.
pub fn outbound_headers(mut headers: HeaderMap) -> HeaderMap {
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers
}

fn is_failure_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Sends requests to clusters under the gateway deadline
#[derive(Debug, Clone)]
pub struct Forwarder {
    request_timeout: Duration,
    metrics: Arc<AtomicMetrics>,
}

impl Forwarder {
    /// Create a forwarder
    pub fn new(request_timeout: Duration, metrics: Arc<AtomicMetrics>) -> Self {
        Self {
            request_timeout,
            metrics,
        }
    }

    /// Forward one request and relay the response
    ///
    /// # Errors
    ///
    /// - [`GatewayError::NoHealthyEndpoint`] if the cluster is fully ejected and fails closed
    /// - [`GatewayError::Upstream`] once every attempt has failed
    /// - [`GatewayError::Timeout`] if the deadline passes first
    pub async fn forward(
        &self,
        cluster: &BackendCluster,
        method: Method,
        path_and_query: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> GatewayResult<Response> {
        let result = tokio::time::timeout(
            self.request_timeout,
            self.attempt(cluster, &method, path_and_query, &headers, &body),
        )
        .await
        .unwrap_or_else(|_| {
            Err(GatewayError::timeout(
                format!("upstream request to cluster '{}'", cluster.name()),
                self.request_timeout.as_millis() as u64,
            ))
        });

        match &result {
            Ok(_) => self.metrics.inc_requests_forwarded(),
            Err(_) => self.metrics.inc_requests_failed(),
        }
        result
    }

    async fn attempt(
        &self,
        cluster: &BackendCluster,
        method: &Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> GatewayResult<Response> {
        let candidates = cluster.candidates()?;
        let mut last_error = String::from("no attempt made");

        for (attempt, index) in candidates.into_iter().enumerate() {
            let Some(endpoint) = cluster.endpoint(index) else {
                continue;
            };
            if attempt > 0 {
                self.metrics.inc_upstream_retries();
            }

            let url = endpoint.url_for(path_and_query);
            let started = Instant::now();
            let result = cluster
                .client()
                .request(method.clone(), &url)
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if is_failure_status(status) {
                        cluster.record_failure(index);
                    } else {
                        cluster.record_success(index);
                    }
                    self.metrics
                        .update_latency_us(started.elapsed().as_micros() as u64);
                    debug!(
                        cluster = %cluster.name(),
                        endpoint = %endpoint.base(),
                        status = status.as_u16(),
                        "Upstream responded"
                    );
                    return Ok(relay(response));
                }
                Err(e) if e.is_connect() => {
                    cluster.record_failure(index);
                    warn!(
                        cluster = %cluster.name(),
                        endpoint = %endpoint.base(),
                        error = %e,
                        "Upstream connect failed, trying next endpoint"
                    );
                    last_error = e.to_string();
                }
                Err(e) => {
                    // The request may have reached the backend; resending is unsafe.
                    cluster.record_failure(index);
                    return Err(GatewayError::upstream(cluster.name(), e.to_string()));
                }
            }
        }

        Err(GatewayError::upstream(cluster.name(), last_error))
    }
}

fn relay(response: reqwest::Response) -> Response {
    let status = response.status();
    let mut headers = response.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut relayed = Response::new(Body::from_stream(response.bytes_stream()));
    *relayed.status_mut() = status;
    *relayed.headers_mut() = headers;
    relayed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-drop-me"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-drop-me", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn test_outbound_headers_drop_host_and_length() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway.example.com"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv"));

        let headers = outbound_headers(headers);
        assert!(!headers.contains_key(header::HOST));
        assert!(!headers.contains_key(header::CONTENT_LENGTH));
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv");
    }

    #[test]
    fn test_request_id_preserved() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID, HeaderValue::from_static("client-supplied-42"));
        assert_eq!(ensure_request_id(&mut headers), "client-supplied-42");
        assert_eq!(headers[&REQUEST_ID], "client-supplied-42");
    }

    #[test]
    fn test_request_id_trimmed_in_place() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID, HeaderValue::from_static("  abc-123 \t"));
        headers.append(REQUEST_ID, HeaderValue::from_static("second"));

        let id = ensure_request_id(&mut headers);
        assert_eq!(id, "abc-123");
        assert_eq!(headers.get_all(&REQUEST_ID).iter().count(), 1);
        assert_eq!(headers[&REQUEST_ID], "abc-123");
    }

    #[test]
    fn test_request_id_generated_when_missing_or_oversized() {
        let mut headers = HeaderMap::new();
        let id = ensure_request_id(&mut headers);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_eq!(headers[&REQUEST_ID], id.as_str());

        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID, HeaderValue::from_str(&"x".repeat(500)).unwrap());
        let id = ensure_request_id(&mut headers);
        assert_eq!(id.len(), 36);
    }
}
