use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use hyper::{Body, Method, Request, Uri, Version};
use tracing::{debug, warn};

use crate::balancer::LoadBalance;
use crate::circuit_breaker::BreakerRegistry;
use crate::errhandler::err_handler;
use crate::proxy::http_client::{strip_hop_by_hop_headers, HttpForwarder};
use crate::response_writer::ResponseWriter;
use crate::router::trie::Params;

/// Header announcing the chosen backend to the downstream server.
pub const X_DST_SERV: &str = "x-dst-serv";
pub const X_REAL_IP: &str = "x-real-ip";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// The decomposed request that flows through the pipeline.
///
/// The body is buffered up front so the retry stage can re-issue the same
/// request; stage-to-stage state (chosen backend, breaker verdict) travels
/// in explicit fields instead of stringly-keyed context values.
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: SocketAddr,
    /// Language prefix stripped from the path, when one was present.
    pub lang: Option<String>,
    /// Parameters captured by the trie match.
    pub params: Params,
    /// Backend chosen by the balance stage for the current attempt.
    pub backend: Option<String>,
    /// Set by the breaker stage when the backend should leave the balancer.
    pub backend_failed: bool,
}

impl ProxyRequest {
    pub fn new(
        parts: hyper::http::request::Parts,
        body: Bytes,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            remote_addr,
            lang: None,
            params: Params::new(),
            backend: None,
            backend_failed: false,
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// The path with any language prefix removed, used as the routing key.
    pub fn route_path(&self) -> &str {
        let path = self.uri.path();
        if let Some(lang) = &self.lang {
            let stripped = path
                .strip_prefix('/')
                .and_then(|p| p.strip_prefix(lang.as_str()))
                .unwrap_or(path);
            if stripped.is_empty() {
                "/"
            } else {
                stripped
            }
        } else {
            path
        }
    }

    /// Derive the caller IP: `X-Real-Ip`, then the first `X-Forwarded-For`
    /// entry, then the socket address.
    pub fn client_ip(&self) -> IpAddr {
        if let Some(ip) = self
            .headers
            .get(X_REAL_IP)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
        {
            return ip;
        }
        if let Some(ip) = self
            .headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok())
        {
            return ip;
        }
        self.remote_addr.ip()
    }

    #[cfg(test)]
    pub fn for_test(method: &str, uri: &str) -> Self {
        let (parts, _) = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
            .into_parts();
        Self::new(parts, Bytes::new(), ([127, 0, 0, 1], 9).into())
    }
}

/// One stage of the request chain, operating on the buffering writer.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, rw: &mut ResponseWriter, req: &mut ProxyRequest);
}

pub type SharedHandler = Arc<dyn Handler>;

/// A unary adapter wrapping the tail of the middleware chain.
pub type Middleware = Arc<dyn Fn(SharedHandler) -> SharedHandler + Send + Sync>;

/// Handler adapter for plain synchronous closures, handy for tests and for
/// applications embedding the client router.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut ResponseWriter, &mut ProxyRequest) + Send + Sync,
{
    async fn handle(&self, rw: &mut ResponseWriter, req: &mut ProxyRequest) {
        (self.0)(rw, req)
    }
}

fn is_server_error(code: u16) -> bool {
    (500..600).contains(&code)
}

/// Retry stage: re-run the inner stages while they answer with a server
/// error, up to the configured number of attempts. The buffered writer is
/// reset between attempts; a non-5xx answer ends the loop immediately.
pub struct Retry {
    attempts: u32,
    inner: SharedHandler,
}

impl Retry {
    pub fn new(attempts: u32, inner: SharedHandler) -> Self {
        Self { attempts, inner }
    }
}

#[async_trait]
impl Handler for Retry {
    async fn handle(&self, rw: &mut ResponseWriter, req: &mut ProxyRequest) {
        for attempt in 0..self.attempts {
            if attempt > 0 {
                rw.reset();
                debug!(attempt = attempt + 1, path = req.path(), "retrying request");
            }
            self.inner.handle(rw, req).await;
            if !is_server_error(rw.response_code()) {
                break;
            }
        }
    }
}

/// Balance stage: pick the backend for this attempt and evict it from the
/// rotation when the breaker below reports the backend gone.
pub struct Balance {
    lb: Arc<dyn LoadBalance>,
    inner: SharedHandler,
}

impl Balance {
    pub fn new(lb: Arc<dyn LoadBalance>, inner: SharedHandler) -> Self {
        Self { lb, inner }
    }
}

#[async_trait]
impl Handler for Balance {
    async fn handle(&self, rw: &mut ResponseWriter, req: &mut ProxyRequest) {
        let path = req.route_path().to_string();
        let method = req.method.as_str().to_string();

        let Some(dst) = self.lb.next(&method, &path) else {
            debug!(method = %method, path = %path, lang = ?req.lang, "no proxy ip");
            err_handler(rw, 500, "no proxy ip address");
            return;
        };
        debug!(method = %method, path = %path, backend = %dst, "proxy backend selected");

        req.backend = Some(dst.clone());
        req.backend_failed = false;
        self.inner.handle(rw, req).await;

        if req.backend_failed {
            debug!(backend = %dst, code = rw.response_code(), "removing failed backend");
            self.lb.remove(&method, &path, &dst);
        }
    }
}

/// Circuit breaker stage: classify upstream 5xx answers as failures and
/// shield a tripped backend from further calls.
///
/// A rejected call (open circuit, or a probe already in flight) answers 500
/// immediately, evicts the breaker from the registry and marks the backend
/// failed so the balance stage drops it; a later registration recreates the
/// breaker lazily from a clean state.
pub struct CircuitBrake {
    registry: Arc<BreakerRegistry>,
    inner: SharedHandler,
}

impl CircuitBrake {
    pub fn new(registry: Arc<BreakerRegistry>, inner: SharedHandler) -> Self {
        Self { registry, inner }
    }
}

#[async_trait]
impl Handler for CircuitBrake {
    async fn handle(&self, rw: &mut ResponseWriter, req: &mut ProxyRequest) {
        let Some(backend) = req.backend.clone() else {
            err_handler(rw, 500, "no destiny");
            return;
        };
        let breaker = self.registry.get_or_create(&backend);

        let probe = match breaker.try_acquire() {
            Ok(probe) => probe,
            Err(e) => {
                debug!(backend = %backend, "circuit breaker rejected call");
                self.registry.evict(&backend);
                req.backend_failed = true;
                err_handler(rw, 500, &e.to_string());
                return;
            }
        };

        self.inner.handle(rw, req).await;

        let code = rw.response_code();
        if is_server_error(code) {
            warn!(backend = %backend, code, "server fail");
            breaker.record_failure();
            if probe {
                // A failed probe sends the circuit straight back to open;
                // drop the backend instead of hammering it again.
                self.registry.evict(&backend);
                req.backend_failed = true;
            }
        } else {
            breaker.record_success();
        }
    }
}

/// Proxy stage: rebuild the request for the chosen backend, issue it with a
/// deadline and copy the answer into the buffered writer.
pub struct Proxy {
    forwarder: Arc<HttpForwarder>,
    /// Prefix removed from the forwarded path, usually empty.
    prefix: String,
    timeout: Duration,
}

impl Proxy {
    pub fn new(forwarder: Arc<HttpForwarder>, prefix: &str, timeout: Duration) -> Self {
        Self {
            forwarder,
            prefix: prefix.to_string(),
            timeout,
        }
    }

    fn build_outbound(&self, req: &ProxyRequest, dst: &str) -> Result<Request<Body>, String> {
        let base: Uri = dst.parse().map_err(|_| "invalid destiny url".to_string())?;
        let scheme = base.scheme_str().unwrap_or("http");
        let authority = base
            .authority()
            .ok_or_else(|| "invalid destiny url".to_string())?
            .clone();

        let path = req
            .uri
            .path()
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(req.uri.path());
        let path = if path.is_empty() { "/" } else { path };
        let uri = match req.uri.query() {
            Some(q) => format!("{}://{}{}?{}", scheme, authority, path, q),
            None => format!("{}://{}{}", scheme, authority, path),
        };
        let uri: Uri = uri.parse().map_err(|_| "invalid upstream uri".to_string())?;

        let mut builder = Request::builder()
            .method(req.method.clone())
            .uri(uri)
            .version(req.version);

        let headers = builder
            .headers_mut()
            .ok_or_else(|| "can't build upstream request".to_string())?;
        *headers = req.headers.clone();
        strip_hop_by_hop_headers(headers);
        headers.insert(
            HOST,
            HeaderValue::from_str(authority.as_str())
                .map_err(|_| "bad host header".to_string())?,
        );
        headers.insert(
            HeaderName::from_static(X_DST_SERV),
            HeaderValue::from_str(dst).map_err(|_| "bad destiny header".to_string())?,
        );

        builder
            .body(Body::from(req.body.clone()))
            .map_err(|_| "can't build upstream request".to_string())
    }
}

#[async_trait]
impl Handler for Proxy {
    async fn handle(&self, rw: &mut ResponseWriter, req: &mut ProxyRequest) {
        let Some(dst) = req.backend.clone() else {
            err_handler(rw, 500, "no destiny");
            return;
        };

        let outbound = match self.build_outbound(req, &dst) {
            Ok(outbound) => outbound,
            Err(message) => {
                warn!(backend = %dst, error = %message, "can't build upstream request");
                err_handler(rw, 500, &message);
                return;
            }
        };

        let forwarder = Arc::clone(&self.forwarder);
        let call = tokio::spawn(async move { forwarder.fetch(outbound).await });

        tokio::select! {
            joined = call => {
                match joined {
                    Ok(Ok((parts, body))) => {
                        for (name, value) in parts.headers.iter() {
                            if !crate::proxy::http_client::is_hop_by_hop_header(name.as_str()) {
                                rw.header_mut().append(name.clone(), value.clone());
                            }
                        }
                        rw.write_header(parts.status.as_u16());
                        let n = rw.write(&body);
                        debug!(
                            backend = %dst,
                            status = parts.status.as_u16(),
                            bytes = n,
                            method = %req.method,
                            "forwarded request"
                        );
                    }
                    Ok(Err(e)) => {
                        warn!(backend = %dst, error = %e, "can't forward the request");
                        err_handler(rw, 500, &format!("can't forward the request: {}", e));
                    }
                    Err(e) => {
                        warn!(backend = %dst, error = %e, "proxy task failed");
                        err_handler(rw, 500, "can't forward the request");
                    }
                }
            }
            _ = tokio::time::sleep(self.timeout) => {
                // The in-flight call is left to finish on its own; the
                // result is discarded.
                warn!(backend = %dst, timeout = ?self.timeout, "proxy request timeout");
                metrics::counter!("drouter_proxy_timeouts_total").increment(1);
                err_handler(rw, 408, "proxy request timeout");
            }
        }
    }
}

/// Assemble the pipeline tail installed for every registered route:
/// retry → balance → circuit breaker → proxy, with the configured
/// middleware chain wrapped around the retry stage.
pub struct PipelineConfig {
    pub retries: u32,
    pub proxy_timeout: Duration,
    pub strip_prefix: String,
}

pub fn pipeline_tail(
    config: &PipelineConfig,
    lb: Arc<dyn LoadBalance>,
    breakers: Arc<BreakerRegistry>,
    forwarder: Arc<HttpForwarder>,
    middlewares: Option<&Middleware>,
) -> SharedHandler {
    let proxy = Arc::new(Proxy::new(
        forwarder,
        &config.strip_prefix,
        config.proxy_timeout,
    ));
    let brake = Arc::new(CircuitBrake::new(breakers, proxy));
    let balance = Arc::new(Balance::new(lb, brake));
    let retry: SharedHandler = Arc::new(Retry::new(config.retries, balance));
    match middlewares {
        Some(chain) => chain(retry),
        None => retry,
    }
}
