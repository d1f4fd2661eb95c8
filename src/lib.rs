pub mod balancer;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod errhandler;
pub mod error;
pub mod proxy;
pub mod response_writer;
pub mod router;
pub mod tls;

// Re-export commonly used types
pub use circuit_breaker::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState,
};
pub use client::RouterClient;
pub use config::Config;
pub use error::{DrouterError, DrouterResult, ErrorSeverity};
pub use proxy::{FnHandler, Handler, Middleware, ProxyRequest, ProxyServer, SharedHandler};
pub use response_writer::ResponseWriter;
pub use router::{
    redirect_host_router, HostSwitch, Route, RouteError, Routers, VirtualRouter, DEFAULT_ROUTER,
};
pub use tls::TlsConfig;
