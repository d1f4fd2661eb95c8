use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::router::VirtualRouter;

/// Outcome of mapping a host header to a virtual router.
#[derive(Debug, Clone)]
pub enum HostDecision {
    /// IDN normalization failed; reject with 403 "Invalid host name".
    Invalid,
    /// No router is bound to this host; reject with 403 "Forbidden".
    Unknown,
    Matched(Arc<VirtualRouter>),
}

/// Virtual-host dispatch table.
///
/// Host names are normalized to Unicode (IDN) before lookup, so `bücher.de`
/// and its punycode form select the same router. Ports are ignored: the
/// same entry serves `localhost` and `localhost:8080`.
#[derive(Debug, Default)]
pub struct HostSwitch {
    hosts: RwLock<HashMap<String, Arc<VirtualRouter>>>,
}

impl HostSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a router to a domain, replacing any previous binding.
    pub fn set(&self, domain: &str, router: Arc<VirtualRouter>) {
        let key = match normalize(domain) {
            Some(host) => host,
            None => {
                warn!(domain, "refusing host switch entry with invalid IDN name");
                return;
            }
        };
        debug!(host = %key, router = router.name(), "host switch entry set");
        self.hosts
            .write()
            .expect("host switch lock poisoned")
            .insert(key, router);
    }

    /// Remove the binding for a domain, if any.
    pub fn del(&self, domain: &str) {
        if let Some(host) = normalize(domain) {
            self.hosts
                .write()
                .expect("host switch lock poisoned")
                .remove(&host);
        }
    }

    /// Resolve a raw host header value to a router.
    pub fn resolve(&self, raw_host: &str) -> HostDecision {
        let Some(host) = normalize(raw_host) else {
            return HostDecision::Invalid;
        };
        let hosts = self.hosts.read().expect("host switch lock poisoned");
        match hosts.get(&host) {
            Some(router) => HostDecision::Matched(Arc::clone(router)),
            None => HostDecision::Unknown,
        }
    }
}

/// Strip any port suffix and IDN-normalize the remainder to Unicode.
fn normalize(raw: &str) -> Option<String> {
    let host = strip_port(raw.trim());
    if host.is_empty() {
        return None;
    }
    // IP literals pass through untouched.
    if host.parse::<std::net::IpAddr>().is_ok() {
        return Some(host.to_string());
    }
    let (unicode, result) = idna::domain_to_unicode(host);
    result.ok()?;
    Some(unicode)
}

fn strip_port(raw: &str) -> &str {
    // Bracketed IPv6 literal, possibly with a port.
    if let Some(stripped) = raw.strip_prefix('[') {
        return stripped.split(']').next().unwrap_or(stripped);
    }
    // More than one colon without brackets is a bare IPv6 literal.
    if raw.matches(':').count() > 1 {
        return raw;
    }
    match raw.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => raw,
    }
}
