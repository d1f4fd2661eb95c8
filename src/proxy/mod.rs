//! The front-door request path: admission bucket, routing core, forwarding
//! pipeline and the shared outbound client.

pub mod bucket;
pub mod http_client;
pub mod pipeline;
pub mod server;

pub use bucket::AdmissionBucket;
pub use http_client::HttpForwarder;
pub use pipeline::{FnHandler, Handler, Middleware, ProxyRequest, SharedHandler};
pub use server::ProxyServer;
