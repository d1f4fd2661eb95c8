//! Hierarchical routing: per-virtual-host routers over per-method path
//! tries, plus the dynamic registration controller.

pub mod host_switch;
pub mod registration;
pub mod trie;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use hyper::header::{HeaderValue, LOCATION};
use tracing::debug;

use crate::errhandler::err_handler;
use crate::error::DrouterResult;
use crate::proxy::pipeline::{Handler, ProxyRequest, SharedHandler};
use crate::response_writer::ResponseWriter;

pub use host_switch::{HostDecision, HostSwitch};
pub use registration::{OpErr, Response, Route, RouteOp, RouteRegistry};
pub use trie::{Params, PathTrie, RouteError};

/// Name of the default router, always present in a [`Routers`] group.
pub const DEFAULT_ROUTER: &str = "_def_";

/// A named routing table bound to one or more virtual hosts.
///
/// Owns a path trie behind a single-writer/many-readers lock and the
/// language settings used to strip a leading `/<lang>` segment before
/// matching, so language prefixes never become part of the routing key.
pub struct VirtualRouter {
    name: String,
    default_lang: String,
    supported_langs: HashSet<String>,
    trie: RwLock<PathTrie<SharedHandler>>,
}

impl fmt::Debug for VirtualRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualRouter")
            .field("name", &self.name)
            .field("default_lang", &self.default_lang)
            .field("supported_langs", &self.supported_langs)
            .finish_non_exhaustive()
    }
}

impl VirtualRouter {
    pub fn new<I, S>(name: &str, default_lang: &str, supported_langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            default_lang: default_lang.to_string(),
            supported_langs: supported_langs.into_iter().map(Into::into).collect(),
            trie: RwLock::new(PathTrie::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_lang(&self) -> &str {
        &self.default_lang
    }

    /// Split a request path into its optional language prefix and the
    /// remainder used as the routing key. `/en/docs` becomes
    /// `(Some("en"), "/docs")`; an unsupported prefix is left untouched.
    pub fn split_lang<'a>(&self, path: &'a str) -> (Option<&'a str>, &'a str) {
        let Some(rest) = path.strip_prefix('/') else {
            return (None, path);
        };
        let lang = rest.split('/').next().unwrap_or("");
        if lang.is_empty() || !self.supported_langs.contains(lang) {
            return (None, path);
        }
        let stripped = &path[1 + lang.len()..];
        if stripped.is_empty() {
            (Some(lang), "/")
        } else {
            (Some(lang), stripped)
        }
    }

    pub fn insert(
        &self,
        method: &str,
        pattern: &str,
        handler: SharedHandler,
    ) -> Result<(), RouteError> {
        self.trie
            .write()
            .expect("router trie lock poisoned")
            .insert(method, pattern, handler)
    }

    pub fn remove(&self, method: &str, pattern: &str) -> Option<SharedHandler> {
        self.trie
            .write()
            .expect("router trie lock poisoned")
            .remove(method, pattern)
    }

    pub fn lookup(&self, method: &str, path: &str) -> Option<(SharedHandler, Params)> {
        self.trie
            .read()
            .expect("router trie lock poisoned")
            .lookup(method, path)
    }

    pub fn contains(&self, method: &str, pattern: &str) -> bool {
        self.trie
            .read()
            .expect("router trie lock poisoned")
            .contains(method, pattern)
    }

    pub fn patterns(&self) -> Vec<(String, String)> {
        self.trie
            .read()
            .expect("router trie lock poisoned")
            .patterns()
    }
}

/// The named routers available to the front door. The default router is
/// created up front and lookups for unknown names fall back to it.
#[derive(Debug)]
pub struct Routers {
    default: Arc<VirtualRouter>,
    inner: RwLock<HashMap<String, Arc<VirtualRouter>>>,
}

impl Routers {
    pub fn new(default: Arc<VirtualRouter>) -> Self {
        let mut map = HashMap::new();
        map.insert(default.name().to_string(), Arc::clone(&default));
        Self {
            default,
            inner: RwLock::new(map),
        }
    }

    /// Add a named router to the group, replacing any previous one.
    pub fn set(&self, router: Arc<VirtualRouter>) {
        self.inner
            .write()
            .expect("routers lock poisoned")
            .insert(router.name().to_string(), router);
    }

    pub fn del(&self, name: &str) {
        if name == self.default.name() {
            return;
        }
        self.inner
            .write()
            .expect("routers lock poisoned")
            .remove(name);
    }

    /// Get a named router, falling back to the default one.
    pub fn get(&self, name: &str) -> Arc<VirtualRouter> {
        self.inner
            .read()
            .expect("routers lock poisoned")
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }

    pub fn default_router(&self) -> Arc<VirtualRouter> {
        Arc::clone(&self.default)
    }
}

/// Handler that answers 303 pointing the same URL at another host.
struct RedirectHost {
    dst: String,
}

#[async_trait]
impl Handler for RedirectHost {
    async fn handle(&self, rw: &mut ResponseWriter, req: &mut ProxyRequest) {
        let scheme = req.uri.scheme_str().unwrap_or("http");
        let path_and_query = req
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let location = format!("{}://{}{}", scheme, self.dst, path_and_query);
        match HeaderValue::from_str(&location) {
            Ok(value) => {
                debug!(location = %location, "redirecting host");
                rw.header_mut().insert(LOCATION, value);
                rw.write_header(303);
            }
            Err(_) => err_handler(rw, 500, "invalid redirect location"),
        }
    }
}

/// Build a router that redirects every GET to the same URL on another host,
/// without touching the rest of the URL.
pub fn redirect_host_router<I, S>(
    name: &str,
    dst: &str,
    default_lang: &str,
    supported_langs: I,
) -> DrouterResult<Arc<VirtualRouter>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let router = Arc::new(VirtualRouter::new(name, default_lang, supported_langs));
    router.insert(
        "GET",
        "/*filename",
        Arc::new(RedirectHost {
            dst: dst.to_string(),
        }),
    )?;
    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> VirtualRouter {
        VirtualRouter::new(DEFAULT_ROUTER, "en", ["en", "pt"])
    }

    #[test]
    fn test_split_lang() {
        let r = router();
        assert_eq!(r.split_lang("/en/docs"), (Some("en"), "/docs"));
        assert_eq!(r.split_lang("/pt/docs/x"), (Some("pt"), "/docs/x"));
        assert_eq!(r.split_lang("/en"), (Some("en"), "/"));
        assert_eq!(r.split_lang("/docs"), (None, "/docs"));
        assert_eq!(r.split_lang("/de/docs"), (None, "/de/docs"));
        assert_eq!(r.split_lang("/"), (None, "/"));
    }

    #[test]
    fn test_routers_default_fallback() {
        let routers = Routers::new(Arc::new(router()));
        assert_eq!(routers.get("missing").name(), DEFAULT_ROUTER);

        let named = Arc::new(VirtualRouter::new("api", "en", ["en"]));
        routers.set(named);
        assert_eq!(routers.get("api").name(), "api");

        routers.del("api");
        assert_eq!(routers.get("api").name(), DEFAULT_ROUTER);

        // The default router cannot be deleted.
        routers.del(DEFAULT_ROUTER);
        assert_eq!(routers.get(DEFAULT_ROUTER).name(), DEFAULT_ROUTER);
    }

    #[tokio::test]
    async fn test_redirect_host_router() {
        let r = redirect_host_router("redir", "example.org", "en", ["en"]).unwrap();
        let (handler, _) = r.lookup("GET", "/a/b").unwrap();

        let mut rw = ResponseWriter::new();
        let mut req = ProxyRequest::for_test("GET", "http://old.example/a/b?q=1");
        handler.handle(&mut rw, &mut req).await;

        assert_eq!(rw.response_code(), 303);
        assert_eq!(
            rw.header().get(LOCATION).unwrap(),
            "http://example.org/a/b?q=1"
        );
    }
}
