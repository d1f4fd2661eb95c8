//! Backend selection for registered routes.

pub mod round_robin;

pub use round_robin::RoundRobin;

/// Selection strategy for the backends registered under a `(method, path)`
/// pattern. Implementations are shared across requests and must serialize
/// their own state.
pub trait LoadBalance: Send + Sync {
    /// Record a backend for a pattern. Registering the same backend twice
    /// is a no-op.
    fn add_addrs(&self, method: &str, path: &str, addr: &str);

    /// Pick the backend for the next request, or `None` when the pattern
    /// has no backends left.
    fn next(&self, method: &str, path: &str) -> Option<String>;

    /// Remove one backend from a pattern. Removing an absent backend is a
    /// no-op; the remaining backends keep their order.
    fn remove(&self, method: &str, path: &str, addr: &str);
}

/// Balancer that always answers with the single configured backend.
#[derive(Debug, Clone)]
pub struct FixedRedirect {
    dst: String,
}

impl FixedRedirect {
    pub fn new(dst: &str) -> Self {
        Self {
            dst: dst.to_string(),
        }
    }
}

impl LoadBalance for FixedRedirect {
    fn add_addrs(&self, _method: &str, _path: &str, _addr: &str) {}

    fn next(&self, _method: &str, _path: &str) -> Option<String> {
        Some(self.dst.clone())
    }

    fn remove(&self, _method: &str, _path: &str, _addr: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_redirect_always_answers() {
        let lb = FixedRedirect::new("http://127.0.0.1:9000");
        lb.add_addrs("GET", "/", "http://ignored");
        assert_eq!(lb.next("GET", "/").as_deref(), Some("http://127.0.0.1:9000"));
        lb.remove("GET", "/", "http://127.0.0.1:9000");
        assert_eq!(
            lb.next("POST", "/other").as_deref(),
            Some("http://127.0.0.1:9000")
        );
    }
}
