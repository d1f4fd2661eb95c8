use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::balancer::{LoadBalance, RoundRobin};
use crate::circuit_breaker::{BreakerRegistry, CircuitBreakerConfig};
use crate::config::Config;
use crate::error::{DrouterError, DrouterResult};
use crate::proxy::bucket::{AdmissionBucket, BucketService, ServiceFuture};
use crate::proxy::http_client::HttpForwarder;
use crate::proxy::pipeline::{Middleware, PipelineConfig, ProxyRequest};
use crate::response_writer::ResponseWriter;
use crate::router::{
    HostDecision, HostSwitch, RouteRegistry, Routers, VirtualRouter,
};

/// Routing state the bucket workers drive a request through: host switch,
/// virtual router trie, then the installed handler on a buffered writer.
struct RouterCore {
    routers: Arc<Routers>,
    host_switch: Arc<HostSwitch>,
}

impl RouterCore {
    async fn route(self: Arc<Self>, req: Request<Body>, remote_addr: SocketAddr) -> Response<Body> {
        let request_id = Uuid::new_v4();

        let host = req
            .headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
            .unwrap_or_default();

        let router = match self.host_switch.resolve(&host) {
            HostDecision::Matched(router) => router,
            HostDecision::Invalid => {
                warn!(%request_id, host, "invalid host name");
                return plain_error(StatusCode::FORBIDDEN, "Invalid host name");
            }
            HostDecision::Unknown => {
                debug!(%request_id, host, "no router for host");
                return plain_error(StatusCode::FORBIDDEN, "Forbidden");
            }
        };

        let (parts, body) = req.into_parts();
        // Buffered up front so the retry stage can re-issue the request.
        let body = match hyper::body::to_bytes(body).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%request_id, error = %e, "failed to read request body");
                return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "can't read request body");
            }
        };

        let (lang, route_path) = router.split_lang(parts.uri.path());
        let method = parts.method.as_str();
        let Some((handler, params)) = router.lookup(method, route_path) else {
            debug!(%request_id, router = router.name(), method, path = route_path, "no route matched");
            return plain_error(StatusCode::NOT_FOUND, "404 page not found");
        };

        debug!(
            %request_id,
            router = router.name(),
            method,
            path = route_path,
            lang,
            "request dispatched"
        );

        let lang = lang.map(str::to_string);
        let mut preq = ProxyRequest::new(parts, body, remote_addr);
        preq.lang = lang;
        preq.params = params;

        let mut rw = ResponseWriter::new();
        handler.handle(&mut rw, &mut preq).await;
        rw.into_response()
    }
}

fn plain_error(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// The drouter front door.
///
/// Owns the routing table, host switch, balancer, breaker registry, shared
/// outbound client and admission bucket; [`run`](Self::run) serves hyper
/// connections through the admission bucket into the routing core.
pub struct ProxyServer {
    config: Config,
    core: Arc<RouterCore>,
    bucket: Arc<AdmissionBucket>,
    registry: Arc<RouteRegistry>,
    lb: Arc<RoundRobin>,
    breakers: Arc<BreakerRegistry>,
}

impl ProxyServer {
    pub fn new(config: Config) -> DrouterResult<Self> {
        let forwarder = Arc::new(HttpForwarder::new(
            config.http_client.as_ref(),
            config.tls.as_ref(),
        )?);

        let lb = Arc::new(RoundRobin::new());
        let breakers = Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default()));

        let default_router = Arc::new(VirtualRouter::new(
            &config.proxy.default_router,
            &config.proxy.default_lang,
            config.proxy.supported_langs.iter().cloned(),
        ));
        let routers = Arc::new(Routers::new(default_router));

        let host_switch = Arc::new(HostSwitch::new());
        for host in ["localhost", "127.0.0.1", "::1"] {
            host_switch.set(host, routers.default_router());
        }

        let registry = RouteRegistry::new(
            Arc::clone(&routers),
            Arc::clone(&lb) as Arc<dyn LoadBalance>,
            Arc::clone(&breakers),
            Arc::clone(&forwarder),
            PipelineConfig {
                retries: config.proxy.retries,
                proxy_timeout: config.proxy.timeout(),
                strip_prefix: String::new(),
            },
            config.proxy.body_limit_size,
        );
        registry.install_routes()?;

        let core = Arc::new(RouterCore {
            routers,
            host_switch,
        });
        let service: BucketService = {
            let core = Arc::clone(&core);
            Arc::new(move |req, remote_addr| {
                Box::pin(Arc::clone(&core).route(req, remote_addr)) as ServiceFuture
            })
        };
        let bucket = Arc::new(AdmissionBucket::new(
            config.bucket.size,
            config.bucket.timeout(),
            service,
        ));

        Ok(Self {
            config,
            core,
            bucket,
            registry,
            lb,
            breakers,
        })
    }

    /// Bind a domain to a named router.
    pub fn set_host(&self, domain: &str, router_name: &str) {
        let router = self.core.routers.get(router_name);
        self.core.host_switch.set(domain, router);
    }

    /// Register an additional named router.
    pub fn set_router(&self, router: Arc<VirtualRouter>) {
        self.core.routers.set(router);
    }

    /// Install the middleware chain wrapped around future route handlers.
    pub fn set_middlewares(&self, middlewares: Middleware) {
        self.registry.set_middlewares(middlewares);
    }

    pub fn routers(&self) -> Arc<Routers> {
        Arc::clone(&self.core.routers)
    }

    pub fn registry(&self) -> Arc<RouteRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn balancer(&self) -> Arc<RoundRobin> {
        Arc::clone(&self.lb)
    }

    pub fn breakers(&self) -> Arc<BreakerRegistry> {
        Arc::clone(&self.breakers)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind the listener and return the bound address plus the serving
    /// future, so callers can learn ephemeral ports before serving.
    pub fn bind(
        &self,
        addr: SocketAddr,
    ) -> DrouterResult<(
        SocketAddr,
        Pin<Box<dyn Future<Output = DrouterResult<()>> + Send>>,
    )> {
        let bucket = Arc::clone(&self.bucket);
        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let remote_addr = conn.remote_addr();
            let bucket = Arc::clone(&bucket);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let bucket = Arc::clone(&bucket);
                    async move { Ok::<_, Infallible>(bucket.dispatch(req, remote_addr).await) }
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .map_err(|e| DrouterError::network(format!("can't bind {}: {}", addr, e)))?
            .serve(make_svc);
        let local_addr = server.local_addr();
        info!(addr = %local_addr, "front door listening");

        let fut = async move { server.await.map_err(DrouterError::from) };
        Ok((local_addr, Box::pin(fut)))
    }

    /// Bind and serve until the future resolves.
    pub async fn run(&self, addr: SocketAddr) -> DrouterResult<()> {
        let (_, fut) = self.bind(addr)?;
        fut.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::DEFAULT_ROUTER;

    fn server() -> ProxyServer {
        ProxyServer::new(Config::default()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_host_forbidden() {
        let s = server();
        let req = Request::builder()
            .uri("/")
            .header(HOST, "nowhere.example")
            .body(Body::empty())
            .unwrap();
        let response = Arc::clone(&s.core)
            .route(req, ([127, 0, 0, 1], 9).into())
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"Forbidden");
    }

    #[tokio::test]
    async fn test_invalid_host_rejected() {
        let s = server();
        let req = Request::builder()
            .uri("/")
            .header(HOST, "xn--a.example")
            .body(Body::empty())
            .unwrap();
        let response = Arc::clone(&s.core)
            .route(req, ([127, 0, 0, 1], 9).into())
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"Invalid host name");
    }

    #[tokio::test]
    async fn test_unmatched_route_is_404() {
        let s = server();
        let req = Request::builder()
            .uri("/missing")
            .header(HOST, "localhost")
            .body(Body::empty())
            .unwrap();
        let response = Arc::clone(&s.core)
            .route(req, ([127, 0, 0, 1], 9).into())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_internal_routes_installed() {
        let s = server();
        let default = s.routers().get(DEFAULT_ROUTER);
        assert!(default.contains("POST", "/_router/add"));
        assert!(default.contains("GET", "/_router/get"));
    }

    #[tokio::test]
    async fn test_set_host_binds_named_router() {
        let s = server();
        let api = Arc::new(VirtualRouter::new("api", "en", ["en"]));
        s.set_router(Arc::clone(&api));
        s.set_host("api.example", "api");
        match s.core.host_switch.resolve("api.example") {
            HostDecision::Matched(r) => assert_eq!(r.name(), "api"),
            other => panic!("expected api router, got {:?}", other),
        }
    }
}
