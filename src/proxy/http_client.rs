use std::time::Duration;

use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::http::response::Parts;
use hyper::{Body, Client, Request};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};

use crate::config::HttpClientConfig;
use crate::error::{DrouterError, DrouterResult};
use crate::tls::TlsConfig;

/// Shared hyper client with connection pooling (HTTP/HTTPS via rustls).
///
/// One instance is built at startup and passed into the pipeline, so every
/// proxied call reuses the same pool. Tuned pool settings reduce connection
/// churn under load; both http and https upstreams are supported.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HttpForwarder {
    pub fn new(
        config: Option<&HttpClientConfig>,
        tls: Option<&TlsConfig>,
    ) -> DrouterResult<Self> {
        // Base TCP connector; absolute-form URIs are what the proxy builds.
        // A connect timeout is not directly available on hyper 0.14's
        // connector; the per-call deadline in the pipeline bounds the whole
        // request instead.
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);

        let tls_config = tls.cloned().unwrap_or_default().client_config()?;
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let pool_idle_timeout_secs = config.and_then(|c| c.pool_idle_timeout_secs).unwrap_or(90);
        let pool_max_idle_per_host = config.and_then(|c| c.pool_max_idle_per_host).unwrap_or(32);

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(pool_idle_timeout_secs))
            .pool_max_idle_per_host(pool_max_idle_per_host)
            .build::<_, Body>(https);

        Ok(Self { client })
    }

    /// Issue a request and aggregate the response body. The caller owns the
    /// deadline; this future runs until the upstream finishes.
    pub async fn fetch(&self, req: Request<Body>) -> DrouterResult<(Parts, Bytes)> {
        let response = self.client.request(req).await.map_err(DrouterError::from)?;
        let (parts, body) = response.into_parts();
        let bytes = hyper::body::to_bytes(body)
            .await
            .map_err(DrouterError::from)?;
        Ok((parts, bytes))
    }
}

/// The standard hop-by-hop headers never forwarded by a proxy.
const HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

pub fn strip_hop_by_hop_headers(headers: &mut hyper::HeaderMap) {
    // If the Connection header lists additional hop-by-hop headers, those
    // go too.
    let extra: Vec<String> = headers
        .get("connection")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
    for name in extra {
        headers.remove(name.as_str());
    }
}
