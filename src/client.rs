//! Client embedded by application servers to enlist their routes with a
//! front door and keep them enlisted.
//!
//! The application registers handlers locally and the client posts each
//! route to the front door's registration endpoint. A periodic re-register
//! loop re-posts every stored route, so a restarted front door converges
//! back to the correct table within one interval.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::{Body, Request, Response, StatusCode, Uri};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errhandler::JSON_CONTENT_TYPE;
use crate::error::{DrouterError, DrouterResult};
use crate::proxy::http_client::HttpForwarder;
use crate::proxy::pipeline::{ProxyRequest, SharedHandler};
use crate::response_writer::ResponseWriter;
use crate::router::registration::{OpErr, ResponseRoutes, RouterQuery};
use crate::router::{Response as RouteResponse, Route, VirtualRouter};
use crate::tls::TlsConfig;

/// Client for one named router on one front door.
pub struct RouterClient {
    router_name: String,
    base: Uri,
    addrs: String,
    default_lang: String,
    config: ClientConfig,
    forwarder: Arc<HttpForwarder>,
    local: Arc<VirtualRouter>,
    routes: Mutex<Vec<(Route, SharedHandler)>>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl std::fmt::Debug for RouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterClient")
            .field("router_name", &self.router_name)
            .field("base", &self.base)
            .field("addrs", &self.addrs)
            .field("default_lang", &self.default_lang)
            .finish_non_exhaustive()
    }
}

impl RouterClient {
    /// Create a client talking to the front door at `url`, advertising
    /// `addrs` as the backend for every registered route.
    pub fn new(
        router_name: &str,
        url: &str,
        addrs: &str,
        config: ClientConfig,
        tls: Option<&TlsConfig>,
    ) -> DrouterResult<Self> {
        let base: Uri = url.parse()?;
        if base.scheme().is_none() || base.authority().is_none() {
            return Err(DrouterError::config(format!(
                "front door url must be absolute: {}",
                url
            )));
        }
        let forwarder = Arc::new(HttpForwarder::new(None, tls)?);
        let default_lang = "en".to_string();
        let local = Arc::new(VirtualRouter::new(
            router_name,
            &default_lang,
            [default_lang.clone(), "pt".to_string()],
        ));
        Ok(Self {
            router_name: router_name.to_string(),
            base,
            addrs: addrs.to_string(),
            default_lang,
            config,
            forwarder,
            local,
            routes: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Register one route with the front door and store the handler in the
    /// local table.
    pub async fn handler_func(
        &self,
        method: &str,
        path: &str,
        handler: SharedHandler,
    ) -> DrouterResult<()> {
        let path = if path.is_empty() { "/" } else { path };
        let route = Route {
            methode: method.to_uppercase(),
            router: self.router_name.clone(),
            path: path.to_string(),
            redir_to: self.addrs.clone(),
        };

        self.post_route(&route).await?;

        self.local
            .insert(&route.methode, &route.path, Arc::clone(&handler))
            .map_err(|e| DrouterError::validation(e.to_string()))?;

        let mut routes = self.routes.lock().expect("client routes poisoned");
        if !routes.iter().any(|(r, _)| r == &route) {
            routes.push((route, handler));
        }
        Ok(())
    }

    pub async fn get(&self, path: &str, handler: SharedHandler) -> DrouterResult<()> {
        self.handler_func("GET", path, handler).await
    }

    pub async fn post(&self, path: &str, handler: SharedHandler) -> DrouterResult<()> {
        self.handler_func("POST", path, handler).await
    }

    pub async fn put(&self, path: &str, handler: SharedHandler) -> DrouterResult<()> {
        self.handler_func("PUT", path, handler).await
    }

    pub async fn delete(&self, path: &str, handler: SharedHandler) -> DrouterResult<()> {
        self.handler_func("DELETE", path, handler).await
    }

    pub async fn head(&self, path: &str, handler: SharedHandler) -> DrouterResult<()> {
        self.handler_func("HEAD", path, handler).await
    }

    pub async fn options(&self, path: &str, handler: SharedHandler) -> DrouterResult<()> {
        self.handler_func("OPTIONS", path, handler).await
    }

    pub async fn patch(&self, path: &str, handler: SharedHandler) -> DrouterResult<()> {
        self.handler_func("PATCH", path, handler).await
    }

    /// Start the periodic re-register loop. Idempotent; the loop runs until
    /// [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = Arc::clone(self);
        info!(
            router = %client.router_name,
            interval = ?client.config.reregister_interval(),
            "re-register loop started"
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(client.config.reregister_interval());
            // The immediate first tick; routes were just registered.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = client.cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let routes: Vec<Route> = {
                    let stored = client.routes.lock().expect("client routes poisoned");
                    stored.iter().map(|(r, _)| r.clone()).collect()
                };
                for route in routes {
                    match client.post_route(&route).await {
                        Ok(()) => debug!(
                            router = %route.router,
                            method = %route.methode,
                            path = %route.path,
                            "route re-added to proxy"
                        ),
                        Err(e) => warn!(
                            method = %route.methode,
                            path = %route.path,
                            error = %e,
                            "can't re-add route"
                        ),
                    }
                }
            }
            debug!(router = %client.router_name, "re-register loop stopped");
        });
    }

    /// Stop the re-register loop and abort in-flight registration retries.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Dispatch a request against the locally stored handlers, the server
    /// surface for the application embedding this client.
    pub async fn serve(&self, req: Request<Body>, remote_addr: SocketAddr) -> Response<Body> {
        let (parts, body) = req.into_parts();
        let body = match hyper::body::to_bytes(body).await {
            Ok(bytes) => bytes,
            Err(_) => {
                let mut response = Response::new(Body::from("can't read request body"));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                return response;
            }
        };

        let (lang, route_path) = self.local.split_lang(parts.uri.path());
        let Some((handler, params)) = self.local.lookup(parts.method.as_str(), route_path) else {
            let mut response = Response::new(Body::from("404 page not found"));
            *response.status_mut() = StatusCode::NOT_FOUND;
            return response;
        };

        let lang = lang.map(str::to_string);
        let mut preq = ProxyRequest::new(parts, body, remote_addr);
        preq.lang = lang;
        preq.params = params;

        let mut rw = ResponseWriter::new();
        handler.handle(&mut rw, &mut preq).await;
        rw.into_response()
    }

    /// Fetch the routes registered for this client's router name.
    pub async fn get_routes(&self) -> DrouterResult<Vec<Route>> {
        let query = RouterQuery {
            router: self.router_name.clone(),
        };
        let body = serde_json::to_vec(&query)?;
        let req = Request::builder()
            .method(hyper::Method::GET)
            .uri(self.endpoint("get"))
            .header(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))
            .header(HOST, self.host_header()?)
            .body(Body::from(body))?;

        let (parts, bytes) = self.forwarder.fetch(req).await?;
        match parts.status.as_u16() {
            302 => {
                let reply: ResponseRoutes = serde_json::from_slice(&bytes)?;
                Ok(reply.routes)
            }
            422 => {
                let reply: ResponseRoutes = serde_json::from_slice(&bytes)?;
                Err(DrouterError::validation(reply.err))
            }
            500 => {
                let reply: OpErr = serde_json::from_slice(&bytes)?;
                Err(DrouterError::internal(reply.err))
            }
            code => Err(DrouterError::internal(format!(
                "failed to get routes. (status code {})",
                code
            ))),
        }
    }

    /// The distinct registered paths, sorted. Errors collapse to an empty
    /// list so callers can probe without plumbing failures.
    pub async fn paths(&self) -> Vec<String> {
        let Ok(routes) = self.get_routes().await else {
            return Vec::new();
        };
        let mut paths: Vec<String> = routes.into_iter().map(|r| r.path).collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// True when the front door knows a route for `path`.
    pub async fn path_exist(&self, path: &str) -> bool {
        self.paths().await.iter().any(|p| p == path)
    }

    /// Post one route to the registration endpoint, retrying forever with a
    /// constant delay while the front door refuses connections.
    async fn post_route(&self, route: &Route) -> DrouterResult<()> {
        let body = serde_json::to_vec(route)?;
        let url = self.endpoint("add");

        loop {
            if self.cancel.is_cancelled() {
                return Err(DrouterError::internal("client shut down"));
            }
            let req = Request::builder()
                .method(hyper::Method::POST)
                .uri(url.as_str())
                .header(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))
                .header(HOST, self.host_header()?)
                .body(Body::from(body.clone()))?;

            match self.forwarder.fetch(req).await {
                Ok((parts, bytes)) => return decode_add_reply(parts.status.as_u16(), &bytes),
                Err(e) if e.is_connection_refused() => {
                    debug!(
                        method = %route.methode,
                        path = %route.path,
                        "front door refused connection, will retry"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            return Err(DrouterError::internal("client shut down"));
                        }
                        _ = tokio::time::sleep(self.config.retry_delay()) => {}
                    }
                }
                Err(e) => {
                    warn!(
                        method = %route.methode,
                        path = %route.path,
                        error = %e,
                        "can't add handler"
                    );
                    return Err(e);
                }
            }
        }
    }

    fn endpoint(&self, op: &str) -> String {
        let scheme = self.base.scheme_str().unwrap_or("http");
        let authority = self.base.authority().map(|a| a.as_str()).unwrap_or("");
        format!(
            "{}://{}/{}/_router/{}",
            scheme, authority, self.default_lang, op
        )
    }

    fn host_header(&self) -> DrouterResult<HeaderValue> {
        let authority = self
            .base
            .authority()
            .ok_or_else(|| DrouterError::config("front door url missing authority"))?;
        HeaderValue::from_str(authority.as_str())
            .map_err(|e| DrouterError::config(format!("bad front door host: {}", e)))
    }
}

fn decode_add_reply(status: u16, body: &[u8]) -> DrouterResult<()> {
    match status {
        201 => Ok(()),
        422 => {
            let reply: RouteResponse = serde_json::from_slice(body)?;
            Err(DrouterError::validation(reply.err))
        }
        500 => {
            let reply: OpErr = serde_json::from_slice(body)?;
            Err(DrouterError::internal(reply.err))
        }
        code => Err(DrouterError::internal(format!(
            "failed to add a function handler to the router. (status code {})",
            code
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_relative_front_door_url() {
        let err = RouterClient::new(
            "app",
            "/not-absolute",
            "http://127.0.0.1:9000",
            ClientConfig::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DrouterError::Config { .. }));
    }

    #[test]
    fn test_endpoint_paths_carry_language() {
        let client = RouterClient::new(
            "app",
            "http://127.0.0.1:7000",
            "http://127.0.0.1:9000",
            ClientConfig::default(),
            None,
        )
        .unwrap();
        assert_eq!(
            client.endpoint("add"),
            "http://127.0.0.1:7000/en/_router/add"
        );
        assert_eq!(
            client.endpoint("get"),
            "http://127.0.0.1:7000/en/_router/get"
        );
    }

    #[test]
    fn test_decode_add_reply() {
        assert!(decode_add_reply(201, b"{}").is_ok());

        let body = serde_json::to_vec(&RouteResponse {
            methode: "aa".into(),
            router: "_def_".into(),
            path: "/".into(),
            err: "invalid method name".into(),
            op: crate::router::RouteOp::Add,
        })
        .unwrap();
        let err = decode_add_reply(422, &body).unwrap_err();
        assert_eq!(err.to_string(), "invalid method name");

        let body = br#"{"err":"boom","op":"add"}"#;
        let err = decode_add_reply(500, body).unwrap_err();
        assert!(err.to_string().contains("boom"));

        let err = decode_add_reply(404, b"").unwrap_err();
        assert!(err.to_string().contains("status code 404"));
    }
}
