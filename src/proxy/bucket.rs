use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use hyper::header::CONTENT_TYPE;
use hyper::{Body, Request, Response, StatusCode};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

/// Minimal HTML answer sent when the bucket gives up on a request.
const TIMEOUT_BODY: &str =
    "<html><head><title>Timeout</title></head><body><h1>Timeout</h1></body></html>";

pub type ServiceFuture = Pin<Box<dyn Future<Output = Response<Body>> + Send>>;

/// The routing entry the bucket workers drain requests into.
pub type BucketService =
    Arc<dyn Fn(Request<Body>, SocketAddr) -> ServiceFuture + Send + Sync>;

struct Job {
    req: Request<Body>,
    remote_addr: SocketAddr,
    accepted: oneshot::Sender<()>,
    reply: oneshot::Sender<Response<Body>>,
}

/// Leaky-bucket admission stage.
///
/// A fixed pool of worker slots drains a bounded queue. The bucket deadline
/// covers the wait for a slot: a request nobody picks up in time answers
/// 503 with a minimal HTML body. Once a slot services a request it runs to
/// completion. Abandoned requests are still drained off the queue, so a
/// timed-out waiter never leaks a worker.
pub struct AdmissionBucket {
    queue: mpsc::Sender<Job>,
    timeout: Duration,
}

impl AdmissionBucket {
    pub fn new(size: usize, timeout: Duration, service: BucketService) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(1);
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..size.max(1) {
            let rx = Arc::clone(&rx);
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        debug!(worker, "bucket queue closed, worker exiting");
                        break;
                    };
                    // A failed send means the waiter already timed out;
                    // drain the job without running the handler.
                    if job.accepted.send(()).is_err() {
                        debug!(worker, "dropping request abandoned in the bucket queue");
                        continue;
                    }
                    let response = (service)(job.req, job.remote_addr).await;
                    let _ = job.reply.send(response);
                }
            });
        }
        Self { queue: tx, timeout }
    }

    /// Hand a request to the worker pool. Waiting for a slot is bounded by
    /// the bucket deadline; the serviced request itself is not.
    pub async fn dispatch(&self, req: Request<Body>, remote_addr: SocketAddr) -> Response<Body> {
        let (accepted_tx, accepted_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            req,
            remote_addr,
            accepted: accepted_tx,
            reply: reply_tx,
        };

        let admitted = async {
            if self.queue.send(job).await.is_err() {
                return false;
            }
            accepted_rx.await.is_ok()
        };

        let admitted = tokio::select! {
            admitted = admitted => admitted,
            _ = tokio::time::sleep(self.timeout) => {
                metrics::counter!("drouter_bucket_timeouts_total").increment(1);
                debug!(timeout = ?self.timeout, "request timed out in the admission bucket");
                return timeout_response();
            }
        };
        if !admitted {
            warn!("bucket worker pool is gone");
            return timeout_response();
        }

        match reply_rx.await {
            Ok(response) => response,
            Err(_) => {
                warn!("bucket worker dropped the request");
                timeout_response()
            }
        }
    }
}

fn timeout_response() -> Response<Body> {
    let mut response = Response::new(Body::from(TIMEOUT_BODY));
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response.headers_mut().insert(
        CONTENT_TYPE,
        "text/html; charset=utf-8".parse().expect("static header"),
    );
    response
}
