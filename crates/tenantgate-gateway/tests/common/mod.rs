//! Common test utilities for integration tests
//!
//! Starts a wiremock identity provider, one wiremock server per backend
//! cluster, and a real gateway on an ephemeral port in front of them.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{Value, json};
use tenantgate_auth::testing;
use tenantgate_auth::{AuthConfig, IdentityDocument, IdentityTranslator};
use tenantgate_gateway::{ClusterConfig, Gateway, GatewayConfig, RouteRuleConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// JWKS path under the issuer
pub const CERTS_PATH: &str = "/protocol/openid-connect/certs";

/// Audience every test token carries
pub const AUDIENCE: &str = "cost-management";

/// Identity header name
pub const IDENTITY_HEADER: &str = "x-rh-identity";

/// A running gateway with mocked surroundings
pub struct TestEnv {
    pub idp: MockServer,
    pub read: MockServer,
    pub write: MockServer,
    pub ingest: MockServer,
    pub gateway: Arc<Gateway>,
    pub addr: SocketAddr,
    pub client: reqwest::Client,
}

/// Backend mock answering every request with `body`
pub async fn backend(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    server
}

/// A loopback address nothing listens on
pub async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    addr.to_string()
}

fn rule(prefix: &str, methods: &[&str], cluster: &str) -> RouteRuleConfig {
    RouteRuleConfig {
        path_prefix: prefix.to_string(),
        methods: methods.iter().map(|m| (*m).to_string()).collect(),
        backend_cluster: cluster.to_string(),
        rewrite_prefix: None,
    }
}

/// Configuration routing the cost-management split and ingress
pub fn config(issuer: &str, read: &str, write: &str, ingest: &str) -> GatewayConfig {
    let mut config = GatewayConfig::new(
        AuthConfig::new(issuer).with_audiences(vec![AUDIENCE.to_string()]),
    );
    config.listen = "127.0.0.1:0".to_string();
    config.route_table = vec![
        rule("/api/ingress", &[], "ingestion"),
        rule("/api/cost-management", &["GET", "HEAD"], "cost-read"),
        rule(
            "/api/cost-management",
            &["POST", "PUT", "PATCH", "DELETE"],
            "cost-write",
        ),
    ];
    config.backend_clusters = vec![
        ClusterConfig::new("cost-read", vec![read.to_string()]),
        ClusterConfig::new("cost-write", vec![write.to_string()]),
        ClusterConfig::new("ingestion", vec![ingest.to_string()]),
    ];
    config
}

impl TestEnv {
    /// Start with a working JWKS endpoint and default configuration
    pub async fn start() -> Self {
        Self::start_with(true, |_| {}).await
    }

    /// Start, optionally without a JWKS mock, after adjusting the configuration
    pub async fn start_with(serve_jwks: bool, adjust: impl FnOnce(&mut GatewayConfig)) -> Self {
        let idp = MockServer::start().await;
        if serve_jwks {
            Mock::given(method("GET"))
                .and(path(CERTS_PATH))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(testing::jwks(&[&testing::primary()])),
                )
                .mount(&idp)
                .await;
        } else {
            Mock::given(method("GET"))
                .and(path(CERTS_PATH))
                .respond_with(ResponseTemplate::new(500))
                .mount(&idp)
                .await;
        }

        let read = backend("read").await;
        let write = backend("write").await;
        let ingest = backend("ingest").await;

        let mut config = config(&idp.uri(), &read.uri(), &write.uri(), &ingest.uri());
        adjust(&mut config);

        let gateway = Arc::new(Gateway::from_config(&config).expect("gateway"));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(tenantgate_gateway::server::serve(
            Arc::clone(&gateway),
            listener,
            std::future::pending(),
        ));

        Self {
            idp,
            read,
            write,
            ingest,
            gateway,
            addr,
            client: reqwest::Client::new(),
        }
    }

    /// Absolute gateway URL for `path`
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Token for `subject` signed by the primary key, merged with `extra`
    pub fn token(&self, subject: &str, extra: Value) -> String {
        let base = testing::with_claims(
            testing::claims(subject),
            json!({"iss": self.idp.uri(), "aud": AUDIENCE}),
        );
        testing::primary().sign(&testing::with_claims(base, extra))
    }

    /// Send `method target` verbatim over a raw connection and return the status
    ///
    /// HTTP clients normalize dot segments before sending; this does not.
    pub async fn raw_status(&self, method: &str, target: &str, token: &str) -> u16 {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect");
        let request = format!(
            "{method} {target} HTTP/1.1\r\nHost: {}\r\nAuthorization: Bearer {token}\r\n\
             Content-Length: 0\r\nConnection: close\r\n\r\n",
            self.addr
        );
        stream.write_all(request.as_bytes()).await.expect("write");

        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        response
            .split_whitespace()
            .nth(1)
            .and_then(|status| status.parse().ok())
            .expect("status line")
    }

    /// Authenticated GET
    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("request")
    }
}

/// Decode the identity header of a request a backend received
pub fn identity_of(request: &wiremock::Request) -> IdentityDocument {
    let value = request
        .headers
        .get(IDENTITY_HEADER)
        .expect("identity header")
        .to_str()
        .expect("ascii");
    IdentityTranslator::decode(value).expect("decodes")
}
