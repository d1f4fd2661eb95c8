#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drouter::{Config, ProxyServer, Route};
use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Request, Response, Server, StatusCode};
use tokio::task::JoinHandle;

/// A controllable upstream server: configurable status and delay, a hit
/// counter, and an echo of the `X-Dst-Serv` header it received.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub url: String,
    pub hits: Arc<AtomicUsize>,
    pub status: Arc<AtomicU16>,
    pub delay_ms: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl MockBackend {
    pub async fn spawn() -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let status = Arc::new(AtomicU16::new(200));
        let delay_ms = Arc::new(AtomicU64::new(0));

        let hits_svc = Arc::clone(&hits);
        let status_svc = Arc::clone(&status);
        let delay_svc = Arc::clone(&delay_ms);

        let make_svc = make_service_fn(move |_conn| {
            let hits = Arc::clone(&hits_svc);
            let status = Arc::clone(&status_svc);
            let delay = Arc::clone(&delay_svc);
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let hits = Arc::clone(&hits);
                    let status = Arc::clone(&status);
                    let delay = Arc::clone(&delay);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        let sleep_for = delay.load(Ordering::SeqCst);
                        if sleep_for > 0 {
                            tokio::time::sleep(Duration::from_millis(sleep_for)).await;
                        }
                        let dst = req
                            .headers()
                            .get("x-dst-serv")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        let code = StatusCode::from_u16(status.load(Ordering::SeqCst))
                            .unwrap_or(StatusCode::OK);
                        let mut response = Response::new(Body::from("hello from backend"));
                        *response.status_mut() = code;
                        if let Ok(value) = dst.parse() {
                            response.headers_mut().insert("x-echo-dst-serv", value);
                        }
                        Ok::<_, Infallible>(response)
                    }
                }))
            }
        });

        let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make_svc);
        let addr = server.local_addr();
        let handle = tokio::spawn(async move {
            let _ = server.await;
        });

        Self {
            addr,
            url: format!("http://{}", addr),
            hits,
            status,
            delay_ms,
            handle,
        }
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, code: u16) {
        self.status.store(code, Ordering::SeqCst);
    }

    pub fn set_delay_ms(&self, ms: u64) {
        self.delay_ms.store(ms, Ordering::SeqCst);
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A running front door bound to an ephemeral local port.
pub struct FrontDoor {
    pub addr: SocketAddr,
    pub server: ProxyServer,
    handle: JoinHandle<()>,
}

impl FrontDoor {
    pub async fn spawn(config: Config) -> Self {
        Self::spawn_on(config, ([127, 0, 0, 1], 0).into()).await
    }

    pub async fn spawn_on(config: Config, bind: SocketAddr) -> Self {
        let server = ProxyServer::new(config).expect("front door construction failed");
        let (addr, fut) = server.bind(bind).expect("front door bind failed");
        let handle = tokio::spawn(async move {
            let _ = fut.await;
        });
        Self {
            addr,
            server,
            handle,
        }
    }

    /// Stop serving, losing all routing state.
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for FrontDoor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Register a route through the public registration endpoint.
pub async fn register_route(
    front: &FrontDoor,
    method: &str,
    path: &str,
    redir_to: &str,
) -> (StatusCode, serde_json::Value) {
    let route = Route {
        methode: method.to_string(),
        router: "_def_".to_string(),
        path: path.to_string(),
        redir_to: redir_to.to_string(),
    };
    let req = Request::builder()
        .method("POST")
        .uri(front.url("/en/_router/add"))
        .header(CONTENT_TYPE, "application/json; charset=UTF-8")
        .body(Body::from(serde_json::to_vec(&route).unwrap()))
        .unwrap();
    let response = Client::new().request(req).await.expect("register call");
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

/// GET a path on the front door with an explicit Host header.
pub async fn front_get(front: &FrontDoor, path: &str, host: &str) -> Response<Body> {
    let req = Request::builder()
        .method("GET")
        .uri(front.url(path))
        .header("host", host)
        .body(Body::empty())
        .unwrap();
    Client::new().request(req).await.expect("front door call")
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8_lossy(&bytes).to_string()
}
