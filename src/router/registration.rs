use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::Uri;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::balancer::LoadBalance;
use crate::circuit_breaker::BreakerRegistry;
use crate::errhandler::{err_handler, JSON_CONTENT_TYPE};
use crate::error::{DrouterError, DrouterResult};
use crate::proxy::http_client::HttpForwarder;
use crate::proxy::pipeline::{
    pipeline_tail, Handler, Middleware, PipelineConfig, ProxyRequest,
};
use crate::response_writer::ResponseWriter;
use crate::router::Routers;

/// One route in the registration protocol. Field spellings are part of the
/// wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "Methode")]
    pub methode: String,
    #[serde(rename = "Router")]
    pub router: String,
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "RedirTo")]
    pub redir_to: String,
}

/// An operation on the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteOp {
    Add,
    Delete,
    Get,
}

/// Reply sent for a single-route operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub methode: String,
    pub router: String,
    pub path: String,
    pub err: String,
    pub op: RouteOp,
}

/// Reply sent when an operation fails before reaching a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpErr {
    pub err: String,
    pub op: RouteOp,
}

/// Reply listing registered routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRoutes {
    pub routes: Vec<Route>,
    pub err: String,
    pub op: RouteOp,
}

/// Body accepted by the route listing endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterQuery {
    #[serde(rename = "Router", default)]
    pub router: String,
}

/// The registration controller: owns the route ledger and mutates the trie
/// and the balancer together under one lock.
///
/// Newly registered patterns get a handler whose body is the forwarding
/// pipeline tail (retry → balance → breaker → proxy), wrapped by the
/// middleware chain configured at startup. Registering an existing pattern
/// only extends its backend list, idempotently.
pub struct RouteRegistry {
    routers: Arc<Routers>,
    lb: Arc<dyn LoadBalance>,
    breakers: Arc<BreakerRegistry>,
    forwarder: Arc<HttpForwarder>,
    pipeline: PipelineConfig,
    body_limit: usize,
    middlewares: RwLock<Option<Middleware>>,
    routes: Mutex<Vec<Route>>,
}

impl RouteRegistry {
    pub fn new(
        routers: Arc<Routers>,
        lb: Arc<dyn LoadBalance>,
        breakers: Arc<BreakerRegistry>,
        forwarder: Arc<HttpForwarder>,
        pipeline: PipelineConfig,
        body_limit: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            routers,
            lb,
            breakers,
            forwarder,
            pipeline,
            body_limit,
            middlewares: RwLock::new(None),
            routes: Mutex::new(Vec::new()),
        })
    }

    /// Set the middleware chain wrapped around handlers installed from now
    /// on. The internal `_router` endpoints stay outside the chain.
    pub fn set_middlewares(&self, middlewares: Middleware) {
        *self
            .middlewares
            .write()
            .expect("middlewares lock poisoned") = Some(middlewares);
    }

    /// Install the reserved registration endpoints on the default router.
    pub fn install_routes(self: &Arc<Self>) -> DrouterResult<()> {
        let default = self.routers.default_router();
        default
            .insert(
                "POST",
                "/_router/add",
                Arc::new(Localhost(AddRoute {
                    registry: Arc::clone(self),
                })),
            )
            .map_err(|e| DrouterError::internal(e.to_string()))?;
        default
            .insert(
                "GET",
                "/_router/get",
                Arc::new(Localhost(GetRoutes {
                    registry: Arc::clone(self),
                })),
            )
            .map_err(|e| DrouterError::internal(e.to_string()))?;
        Ok(())
    }

    /// Add a backend for `(routerName, method, path)`, installing the
    /// forwarding handler when the pattern is new.
    pub fn add(
        &self,
        router_name: &str,
        method: &str,
        path: &str,
        redir_to: &str,
    ) -> DrouterResult<()> {
        let default_name = self.routers.default_router().name().to_string();
        if router_name != default_name && !check_letters_number(router_name, 2, 128) {
            return Err(DrouterError::validation("invalid route name"));
        }
        if !check_letters_number(method, 3, 20) {
            return Err(DrouterError::validation("invalid method name"));
        }
        let path = if path.is_empty() { "/" } else { path };
        if !check_path_name(path, 1, 128) {
            return Err(DrouterError::validation("invalid path name"));
        }
        let destiny: Uri = redir_to
            .parse()
            .map_err(|_| DrouterError::validation("invalid destiny host name"))?;
        if destiny.scheme().is_none() || destiny.authority().is_none() {
            return Err(DrouterError::validation("invalid destiny host name"));
        }

        let method = method.to_uppercase();
        let router = self.routers.get(router_name);

        // One lock covers ledger, trie and balancer so a partially applied
        // registration is never observable.
        let mut ledger = self.routes.lock().expect("route ledger poisoned");

        if !router.contains(&method, path) {
            let middlewares = self
                .middlewares
                .read()
                .expect("middlewares lock poisoned")
                .clone();
            let handler = pipeline_tail(
                &self.pipeline,
                Arc::clone(&self.lb),
                Arc::clone(&self.breakers),
                Arc::clone(&self.forwarder),
                middlewares.as_ref(),
            );
            router
                .insert(&method, path, handler)
                .map_err(|e| DrouterError::validation(e.to_string()))?;
            info!(router = router.name(), method = %method, path, "route installed");
        }

        self.lb.add_addrs(&method, path, redir_to);
        let route = Route {
            methode: method,
            router: router_name.to_string(),
            path: path.to_string(),
            redir_to: redir_to.to_string(),
        };
        if !ledger.iter().any(|r| r == &route) {
            debug!(backend = %route.redir_to, path = %route.path, "backend recorded");
            ledger.push(route);
        }
        Ok(())
    }

    /// The registered routes for one router name.
    pub fn routes_for(&self, router_name: &str) -> Vec<Route> {
        let name = if router_name.is_empty() {
            self.routers.default_router().name().to_string()
        } else {
            router_name.to_string()
        };
        self.routes
            .lock()
            .expect("route ledger poisoned")
            .iter()
            .filter(|r| r.router == name)
            .cloned()
            .collect()
    }
}

/// Guard rejecting callers that are not loopback.
struct Localhost<H>(H);

#[async_trait]
impl<H: Handler> Handler for Localhost<H> {
    async fn handle(&self, rw: &mut ResponseWriter, req: &mut ProxyRequest) {
        let ip = req.client_ip();
        if !ip.is_loopback() {
            warn!(%ip, path = req.path(), "rejected non-loopback registration call");
            err_handler(rw, 403, "ip isn't loopback");
            return;
        }
        self.0.handle(rw, req).await;
    }
}

struct AddRoute {
    registry: Arc<RouteRegistry>,
}

#[async_trait]
impl Handler for AddRoute {
    async fn handle(&self, rw: &mut ResponseWriter, req: &mut ProxyRequest) {
        let body = limited(&req.body, self.registry.body_limit);
        let route: Route = match serde_json::from_slice(body) {
            Ok(route) => route,
            Err(e) => {
                respond_op_err(rw, 500, &e.to_string(), RouteOp::Add);
                return;
            }
        };
        match self
            .registry
            .add(&route.router, &route.methode, &route.path, &route.redir_to)
        {
            Ok(()) => respond(rw, 201, &route, "", RouteOp::Add),
            Err(e) => respond(rw, 422, &route, &e.to_string(), RouteOp::Add),
        }
    }
}

struct GetRoutes {
    registry: Arc<RouteRegistry>,
}

#[async_trait]
impl Handler for GetRoutes {
    async fn handle(&self, rw: &mut ResponseWriter, req: &mut ProxyRequest) {
        let body = limited(&req.body, self.registry.body_limit);
        let query: RouterQuery = if body.is_empty() {
            RouterQuery::default()
        } else {
            match serde_json::from_slice(body) {
                Ok(query) => query,
                Err(e) => {
                    respond_op_err(rw, 500, &e.to_string(), RouteOp::Get);
                    return;
                }
            }
        };
        let routes = self.registry.routes_for(&query.router);
        respond_routes(rw, 302, routes, "", RouteOp::Get);
    }
}

fn limited(body: &[u8], limit: usize) -> &[u8] {
    &body[..body.len().min(limit)]
}

fn set_json_content_type(rw: &mut ResponseWriter) {
    rw.header_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
}

fn respond(rw: &mut ResponseWriter, code: u16, route: &Route, err: &str, op: RouteOp) {
    set_json_content_type(rw);
    rw.write_header(code);
    let reply = Response {
        methode: route.methode.clone(),
        router: route.router.clone(),
        path: route.path.clone(),
        err: err.to_string(),
        op,
    };
    if let Ok(body) = serde_json::to_vec(&reply) {
        rw.write(&body);
    }
}

fn respond_op_err(rw: &mut ResponseWriter, code: u16, err: &str, op: RouteOp) {
    set_json_content_type(rw);
    rw.write_header(code);
    let reply = OpErr {
        err: err.to_string(),
        op,
    };
    if let Ok(body) = serde_json::to_vec(&reply) {
        rw.write(&body);
    }
}

fn respond_routes(rw: &mut ResponseWriter, code: u16, routes: Vec<Route>, err: &str, op: RouteOp) {
    set_json_content_type(rw);
    rw.write_header(code);
    let reply = ResponseRoutes {
        routes,
        err: err.to_string(),
        op,
    };
    if let Ok(body) = serde_json::to_vec(&reply) {
        rw.write(&body);
    }
}

fn check_letters_number(s: &str, min: usize, max: usize) -> bool {
    let len = s.chars().count();
    if len < min || len > max {
        return false;
    }
    s.chars().all(|c| c.is_alphanumeric())
}

fn check_path_name(s: &str, min: usize, max: usize) -> bool {
    let len = s.chars().count();
    if len < min || len > max {
        return false;
    }
    s.chars()
        .all(|c| c.is_alphanumeric() || "/:*-_.~%".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::RoundRobin;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::router::{VirtualRouter, DEFAULT_ROUTER};
    use bytes::Bytes;
    use std::time::Duration;

    fn registry() -> Arc<RouteRegistry> {
        let routers = Arc::new(Routers::new(Arc::new(VirtualRouter::new(
            DEFAULT_ROUTER,
            "en",
            ["en", "pt"],
        ))));
        let lb = Arc::new(RoundRobin::new());
        let breakers = Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default()));
        let forwarder = Arc::new(HttpForwarder::new(None, None).unwrap());
        let registry = RouteRegistry::new(
            routers,
            lb,
            breakers,
            forwarder,
            PipelineConfig {
                retries: 3,
                proxy_timeout: Duration::from_secs(5),
                strip_prefix: String::new(),
            },
            1 << 20,
        );
        registry.install_routes().unwrap();
        registry
    }

    #[test]
    fn test_wire_format_field_names() {
        let route = Route {
            methode: "GET".into(),
            router: "_def_".into(),
            path: "/".into(),
            redir_to: "http://127.0.0.1:9000".into(),
        };
        let encoded = serde_json::to_value(&route).unwrap();
        assert_eq!(encoded["Methode"], "GET");
        assert_eq!(encoded["Router"], "_def_");
        assert_eq!(encoded["Path"], "/");
        assert_eq!(encoded["RedirTo"], "http://127.0.0.1:9000");

        let reply = Response {
            methode: "GET".into(),
            router: "_def_".into(),
            path: "/".into(),
            err: "".into(),
            op: RouteOp::Add,
        };
        let encoded = serde_json::to_value(&reply).unwrap();
        assert_eq!(encoded["methode"], "GET");
        assert_eq!(encoded["op"], "add");

        let op_err = OpErr {
            err: "boom".into(),
            op: RouteOp::Add,
        };
        assert_eq!(
            serde_json::to_string(&op_err).unwrap(),
            r#"{"err":"boom","op":"add"}"#
        );
    }

    #[test]
    fn test_add_validation_messages() {
        let registry = registry();
        let cases = [
            ("x", "GET", "/", "http://b", "invalid route name"),
            ("_def_", "aa", "/", "http://b", "invalid method name"),
            ("_def_", "GET", "/bad path", "http://b", "invalid path name"),
            ("_def_", "GET", "/", "not a url", "invalid destiny host name"),
            ("_def_", "GET", "/", "backend:9000", "invalid destiny host name"),
        ];
        for (router, method, path, dst, expected) in cases {
            let err = registry.add(router, method, path, dst).unwrap_err();
            assert_eq!(err.to_string(), expected, "case {:?}", (router, method));
        }
    }

    #[test]
    fn test_add_installs_once_and_extends_backends() {
        let registry = registry();
        registry
            .add(DEFAULT_ROUTER, "GET", "/", "http://b1:9000")
            .unwrap();
        registry
            .add(DEFAULT_ROUTER, "GET", "/", "http://b2:9000")
            .unwrap();
        // Re-registering the same backend is idempotent.
        registry
            .add(DEFAULT_ROUTER, "GET", "/", "http://b1:9000")
            .unwrap();

        let routes = registry.routes_for(DEFAULT_ROUTER);
        let backends: Vec<_> = routes
            .iter()
            .filter(|r| r.path == "/")
            .map(|r| r.redir_to.clone())
            .collect();
        assert_eq!(backends, vec!["http://b1:9000", "http://b2:9000"]);

        // The trie holds exactly one handler for the pattern.
        let router = registry.routers.get(DEFAULT_ROUTER);
        assert!(router.contains("GET", "/"));
        let err = router
            .insert("GET", "/", Arc::new(crate::proxy::pipeline::FnHandler(|_: &mut ResponseWriter, _: &mut ProxyRequest| {})))
            .unwrap_err();
        assert!(matches!(err, crate::router::RouteError::Conflict { .. }));
    }

    #[test]
    fn test_empty_path_defaults_to_root() {
        let registry = registry();
        registry
            .add(DEFAULT_ROUTER, "GET", "", "http://b1:9000")
            .unwrap();
        assert!(registry.routers.get(DEFAULT_ROUTER).contains("GET", "/"));
    }

    #[test]
    fn test_method_uppercased() {
        let registry = registry();
        registry
            .add(DEFAULT_ROUTER, "get", "/lower", "http://b1:9000")
            .unwrap();
        assert!(registry.routers.get(DEFAULT_ROUTER).contains("GET", "/lower"));
    }

    #[test]
    fn test_conflicting_pattern_surfaces_as_validation_error() {
        let registry = registry();
        registry
            .add(DEFAULT_ROUTER, "GET", "/users/:name", "http://b1:9000")
            .unwrap();
        let err = registry
            .add(DEFAULT_ROUTER, "GET", "/users/admin", "http://b2:9000")
            .unwrap_err();
        assert!(matches!(err, DrouterError::Validation { .. }));
        assert!(err.to_string().contains("ambiguous"));
    }

    #[tokio::test]
    async fn test_add_endpoint_rejects_non_loopback() {
        let registry = registry();
        let (handler, _) = registry
            .routers
            .default_router()
            .lookup("POST", "/_router/add")
            .unwrap();

        let mut rw = ResponseWriter::new();
        let mut req = ProxyRequest::for_test("POST", "http://localhost/_router/add");
        req.headers
            .insert("x-real-ip", "8.8.8.8".parse().unwrap());
        handler.handle(&mut rw, &mut req).await;

        assert_eq!(rw.response_code(), 403);
        let body: serde_json::Value = serde_json::from_slice(rw.bytes()).unwrap();
        assert_eq!(body["err"], "ip isn't loopback");
    }

    #[tokio::test]
    async fn test_add_endpoint_full_cycle() {
        let registry = registry();
        let default = registry.routers.default_router();
        let (handler, _) = default.lookup("POST", "/_router/add").unwrap();

        let route = Route {
            methode: "GET".into(),
            router: DEFAULT_ROUTER.into(),
            path: "/docs".into(),
            redir_to: "http://127.0.0.1:9001".into(),
        };
        let mut rw = ResponseWriter::new();
        let mut req = ProxyRequest::for_test("POST", "http://localhost/_router/add");
        req.body = Bytes::from(serde_json::to_vec(&route).unwrap());
        handler.handle(&mut rw, &mut req).await;

        assert_eq!(rw.response_code(), 201);
        let reply: Response = serde_json::from_slice(rw.bytes()).unwrap();
        assert_eq!(reply.methode, "GET");
        assert_eq!(reply.path, "/docs");
        assert_eq!(reply.err, "");
        assert_eq!(reply.op, RouteOp::Add);
        assert!(default.contains("GET", "/docs"));

        // Malformed JSON answers 500 with an OpErr body.
        let mut rw = ResponseWriter::new();
        let mut req = ProxyRequest::for_test("POST", "http://localhost/_router/add");
        req.body = Bytes::from_static(b"{nope");
        handler.handle(&mut rw, &mut req).await;
        assert_eq!(rw.response_code(), 500);
        let reply: OpErr = serde_json::from_slice(rw.bytes()).unwrap();
        assert_eq!(reply.op, RouteOp::Add);
        assert!(!reply.err.is_empty());

        // Bad method name answers 422 echoing the route.
        let bad = Route {
            methode: "aa".into(),
            router: DEFAULT_ROUTER.into(),
            path: "/docs".into(),
            redir_to: "http://127.0.0.1:9001".into(),
        };
        let mut rw = ResponseWriter::new();
        let mut req = ProxyRequest::for_test("POST", "http://localhost/_router/add");
        req.body = Bytes::from(serde_json::to_vec(&bad).unwrap());
        handler.handle(&mut rw, &mut req).await;
        assert_eq!(rw.response_code(), 422);
        let reply: Response = serde_json::from_slice(rw.bytes()).unwrap();
        assert!(reply.err.contains("invalid method name"));
        assert_eq!(reply.op, RouteOp::Add);
    }

    #[tokio::test]
    async fn test_get_endpoint_lists_routes() {
        let registry = registry();
        registry
            .add(DEFAULT_ROUTER, "GET", "/a", "http://b1:9000")
            .unwrap();
        registry
            .add(DEFAULT_ROUTER, "GET", "/b", "http://b1:9000")
            .unwrap();

        let (handler, _) = registry
            .routers
            .default_router()
            .lookup("GET", "/_router/get")
            .unwrap();
        let mut rw = ResponseWriter::new();
        let mut req = ProxyRequest::for_test("GET", "http://localhost/_router/get");
        handler.handle(&mut rw, &mut req).await;

        assert_eq!(rw.response_code(), 302);
        let reply: ResponseRoutes = serde_json::from_slice(rw.bytes()).unwrap();
        assert_eq!(reply.op, RouteOp::Get);
        let paths: Vec<_> = reply.routes.iter().map(|r| r.path.clone()).collect();
        assert_eq!(paths, vec!["/a", "/b"]);
    }

    #[test]
    fn test_body_limit_truncates() {
        assert_eq!(limited(b"0123456789", 4), b"0123");
        assert_eq!(limited(b"01", 4), b"01");
    }
}
