use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use super::LoadBalance;

/// Ordered backend list for one `(method, path)` pattern with the cursor
/// for round-robin selection.
#[derive(Debug, Default)]
struct Backends {
    addrs: Vec<String>,
    cursor: usize,
}

/// Round-robin balancer over the backends of each registered pattern.
///
/// Selection and mutation share one mutex; the critical section is a map
/// lookup and a cursor bump, so a plain lock keeps cursor motion
/// linearizable without more machinery.
#[derive(Debug, Default)]
pub struct RoundRobin {
    // method -> path pattern -> backends
    inner: Mutex<HashMap<String, HashMap<String, Backends>>>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backends currently registered for a pattern.
    pub fn backend_count(&self, method: &str, path: &str) -> usize {
        let inner = self.inner.lock().expect("balancer lock poisoned");
        inner
            .get(method)
            .and_then(|paths| paths.get(normalize(path)))
            .map(|b| b.addrs.len())
            .unwrap_or(0)
    }

    /// Snapshot of the backends for a pattern, in registration order.
    pub fn backends(&self, method: &str, path: &str) -> Vec<String> {
        let inner = self.inner.lock().expect("balancer lock poisoned");
        inner
            .get(method)
            .and_then(|paths| paths.get(normalize(path)))
            .map(|b| b.addrs.clone())
            .unwrap_or_default()
    }
}

impl LoadBalance for RoundRobin {
    fn add_addrs(&self, method: &str, path: &str, addr: &str) {
        let path = normalize(path);
        let mut inner = self.inner.lock().expect("balancer lock poisoned");
        let backends = inner
            .entry(method.to_string())
            .or_default()
            .entry(path.to_string())
            .or_default();
        if backends.addrs.iter().any(|a| a == addr) {
            return;
        }
        backends.addrs.push(addr.to_string());
    }

    fn next(&self, method: &str, path: &str) -> Option<String> {
        let path = normalize(path);
        let mut inner = self.inner.lock().expect("balancer lock poisoned");
        let paths = inner.get_mut(method)?;
        let backends = find_pattern(paths, path)?;
        if backends.addrs.is_empty() {
            return None;
        }
        if backends.cursor >= backends.addrs.len() {
            backends.cursor = 0;
        }
        let picked = backends.addrs[backends.cursor].clone();
        backends.cursor += 1;
        Some(picked)
    }

    fn remove(&self, method: &str, path: &str, addr: &str) {
        let path = normalize(path);
        let mut inner = self.inner.lock().expect("balancer lock poisoned");
        let Some(paths) = inner.get_mut(method) else {
            return;
        };
        let Some(backends) = find_pattern(paths, path) else {
            return;
        };
        if let Some(i) = backends.addrs.iter().position(|a| a == addr) {
            backends.addrs.remove(i);
            debug!(method, path, backend = addr, "backend removed from balancer");
            metrics::counter!("drouter_balancer_removals_total").increment(1);
        }
    }
}

fn normalize(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

/// Reach the backend list for a request path: exact pattern first, then a
/// walk over the stored patterns matching `:param` and trailing `*rest`
/// segments the way the trie does.
fn find_pattern<'a>(
    paths: &'a mut HashMap<String, Backends>,
    path: &str,
) -> Option<&'a mut Backends> {
    if paths.contains_key(path) {
        return paths.get_mut(path);
    }
    let key = paths
        .iter()
        .find(|(pattern, _)| pattern_matches(pattern, path))
        .map(|(pattern, _)| pattern.clone())?;
    paths.get_mut(&key)
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    let mut pattern_segs = pattern.strip_prefix('/').unwrap_or(pattern).split('/');
    let mut path_segs = path.strip_prefix('/').unwrap_or(path).split('/');

    loop {
        match (pattern_segs.next(), path_segs.next()) {
            (None, None) => return true,
            (None, Some(_)) => return false,
            (Some(p), rest) => {
                if p.starts_with('*') {
                    return true;
                }
                match rest {
                    Some(seg) if p.starts_with(':') && !seg.is_empty() => {}
                    Some(seg) if p == seg => {}
                    _ => return false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_rotation() {
        let lb = RoundRobin::new();
        lb.add_addrs("GET", "/", "b1");
        lb.add_addrs("GET", "/", "b2");
        lb.add_addrs("GET", "/", "b3");

        let picks: Vec<_> = (0..6).map(|_| lb.next("GET", "/").unwrap()).collect();
        assert_eq!(picks, vec!["b1", "b2", "b3", "b1", "b2", "b3"]);
    }

    #[test]
    fn test_fairness_over_many_calls() {
        let lb = RoundRobin::new();
        for b in ["b1", "b2", "b3"] {
            lb.add_addrs("GET", "/api", b);
        }
        let mut counts: HashMap<String, usize> = HashMap::new();
        let n = 100;
        for _ in 0..n {
            *counts.entry(lb.next("GET", "/api").unwrap()).or_default() += 1;
        }
        for b in ["b1", "b2", "b3"] {
            let c = counts[b];
            assert!(c == n / 3 || c == n / 3 + 1, "{} picked {} times", b, c);
        }
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let lb = RoundRobin::new();
        lb.add_addrs("GET", "/", "b1");
        lb.add_addrs("GET", "/", "b1");
        assert_eq!(lb.backends("GET", "/"), vec!["b1"]);
    }

    #[test]
    fn test_empty_and_unknown() {
        let lb = RoundRobin::new();
        assert_eq!(lb.next("GET", "/none"), None);
        lb.add_addrs("GET", "/here", "b1");
        assert_eq!(lb.next("POST", "/here"), None);
        lb.remove("GET", "/absent", "b1");
        lb.remove("GET", "/here", "not-registered");
        assert_eq!(lb.backends("GET", "/here"), vec!["b1"]);
    }

    #[test]
    fn test_remove_boundaries_preserve_order() {
        let setup = || {
            let lb = RoundRobin::new();
            for b in ["b1", "b2", "b3", "b4"] {
                lb.add_addrs("GET", "/", b);
            }
            lb
        };

        let lb = setup();
        lb.remove("GET", "/", "b1");
        assert_eq!(lb.backends("GET", "/"), vec!["b2", "b3", "b4"]);

        let lb = setup();
        lb.remove("GET", "/", "b2");
        assert_eq!(lb.backends("GET", "/"), vec!["b1", "b3", "b4"]);

        let lb = setup();
        lb.remove("GET", "/", "b4");
        assert_eq!(lb.backends("GET", "/"), vec!["b1", "b2", "b3"]);

        let lb = RoundRobin::new();
        lb.add_addrs("GET", "/", "only");
        lb.remove("GET", "/", "only");
        assert!(lb.backends("GET", "/").is_empty());
        assert_eq!(lb.next("GET", "/"), None);
    }

    #[test]
    fn test_register_two_then_remove_one() {
        let lb = RoundRobin::new();
        lb.add_addrs("GET", "/", "b1");
        lb.add_addrs("GET", "/", "b2");
        assert_eq!(lb.next("GET", "/").as_deref(), Some("b1"));
        assert_eq!(lb.next("GET", "/").as_deref(), Some("b2"));
        lb.remove("GET", "/", "b1");
        assert_eq!(lb.backends("GET", "/"), vec!["b2"]);
        assert_eq!(lb.next("GET", "/").as_deref(), Some("b2"));
        assert_eq!(lb.next("GET", "/").as_deref(), Some("b2"));
    }

    #[test]
    fn test_pattern_fallback_param_and_catch_all() {
        let lb = RoundRobin::new();
        lb.add_addrs("GET", "/users/:name", "b1");
        lb.add_addrs("GET", "/static/*rest", "b2");

        assert_eq!(lb.next("GET", "/users/alice").as_deref(), Some("b1"));
        assert_eq!(lb.next("GET", "/static/css/app.css").as_deref(), Some("b2"));
        assert_eq!(lb.next("GET", "/static").as_deref(), Some("b2"));
        assert_eq!(lb.next("GET", "/users/alice/extra"), None);
        assert_eq!(lb.next("GET", "/users"), None);
    }

    #[test]
    fn test_pattern_matching_rules() {
        assert!(pattern_matches("/a/:x/c", "/a/b/c"));
        assert!(!pattern_matches("/a/:x/c", "/a/b"));
        assert!(!pattern_matches("/a/:x", "/a/b/c"));
        assert!(pattern_matches("/files/*rest", "/files/a/b/c"));
        assert!(pattern_matches("/files/*rest", "/files"));
        assert!(!pattern_matches("/files/*rest", "/file"));
        assert!(pattern_matches("/", "/"));
        assert!(!pattern_matches("/a", "/"));
    }
}
