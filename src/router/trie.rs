use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Typed insertion errors for the path trie. Registration surfaces these as
/// 422 responses instead of panicking inside the router.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("conflict: a handler is already registered for {pattern}")]
    Conflict { pattern: String },

    #[error("ambiguous: segment {segment:?} overlaps an existing wildcard in {pattern}")]
    Ambiguous { pattern: String, segment: String },

    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl From<RouteError> for crate::error::DrouterError {
    fn from(err: RouteError) -> Self {
        crate::error::DrouterError::validation(err.to_string())
    }
}

/// Parameters captured by a trie lookup, in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_name(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn push(&mut self, name: &str, value: &str) {
        self.0.push((name.to_string(), value.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug)]
struct Node<T> {
    literals: BTreeMap<String, Node<T>>,
    param: Option<(String, Box<Node<T>>)>,
    catch_all: Option<(String, T)>,
    handler: Option<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            literals: BTreeMap::new(),
            param: None,
            catch_all: None,
            handler: None,
        }
    }
}

/// Per-method path tree over slash-delimited segments.
///
/// Three segment kinds: literals (`/users`), named parameters (`:name`) and
/// a trailing catch-all (`*rest`). Separate trees per HTTP method keep
/// lookups free of cross-method ambiguity. At any node literals are tested
/// first, then the single parameter child, then the catch-all, so a lookup
/// is O(|path|) and independent of insertion order.
#[derive(Debug, Default)]
pub struct PathTrie<T> {
    methods: HashMap<String, Node<T>>,
}

impl<T: Clone> PathTrie<T> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Install a handler for `(method, pattern)`.
    pub fn insert(&mut self, method: &str, pattern: &str, handler: T) -> Result<(), RouteError> {
        let (segments, tail) = parse_pattern(pattern)?;
        let mut node = self.methods.entry(method.to_string()).or_default();

        for segment in &segments {
            match segment {
                Segment::Literal(lit) => {
                    if let Some((name, _)) = &node.param {
                        return Err(RouteError::Ambiguous {
                            pattern: pattern.to_string(),
                            segment: format!(":{}", name),
                        });
                    }
                    node = node.literals.entry(lit.clone()).or_default();
                }
                Segment::Param(name) => {
                    if !node.literals.is_empty() {
                        return Err(RouteError::Ambiguous {
                            pattern: pattern.to_string(),
                            segment: format!(":{}", name),
                        });
                    }
                    if let Some((existing, _)) = &node.param {
                        if existing != name {
                            return Err(RouteError::Ambiguous {
                                pattern: pattern.to_string(),
                                segment: format!(":{}", existing),
                            });
                        }
                    } else {
                        node.param = Some((name.clone(), Box::default()));
                    }
                    node = node.param.as_mut().map(|(_, n)| n.as_mut()).unwrap();
                }
            }
        }

        match tail {
            Some(name) => {
                if node.catch_all.is_some() {
                    return Err(RouteError::Conflict {
                        pattern: pattern.to_string(),
                    });
                }
                node.catch_all = Some((name, handler));
            }
            None => {
                if node.handler.is_some() {
                    return Err(RouteError::Conflict {
                        pattern: pattern.to_string(),
                    });
                }
                node.handler = Some(handler);
            }
        }
        Ok(())
    }

    /// Match a request path, returning the handler and captured parameters.
    /// Catch-all parameters receive the unmatched remainder including its
    /// leading slash; a catch-all reached with nothing left captures `/`.
    pub fn lookup(&self, method: &str, path: &str) -> Option<(T, Params)> {
        let root = self.methods.get(method)?;
        let segments = split_path(path);
        let mut node = root;
        let mut params = Params::new();

        for (i, segment) in segments.iter().enumerate() {
            if let Some(next) = node.literals.get(*segment) {
                node = next;
                continue;
            }
            if !segment.is_empty() {
                if let Some((name, next)) = &node.param {
                    params.push(name, segment);
                    node = next;
                    continue;
                }
            }
            if let Some((name, handler)) = &node.catch_all {
                params.push(name, &format!("/{}", segments[i..].join("/")));
                return Some((handler.clone(), params));
            }
            return None;
        }

        if let Some(handler) = &node.handler {
            return Some((handler.clone(), params));
        }
        if let Some((name, handler)) = &node.catch_all {
            params.push(name, "/");
            return Some((handler.clone(), params));
        }
        None
    }

    /// Uninstall the handler at exactly `(method, pattern)`.
    pub fn remove(&mut self, method: &str, pattern: &str) -> Option<T> {
        let (segments, tail) = parse_pattern(pattern).ok()?;
        let mut node = self.methods.get_mut(method)?;

        for segment in &segments {
            node = match segment {
                Segment::Literal(lit) => node.literals.get_mut(lit)?,
                Segment::Param(name) => match &mut node.param {
                    Some((existing, next)) if existing == name => next.as_mut(),
                    _ => return None,
                },
            };
        }

        match tail {
            Some(name) => {
                let found = matches!(&node.catch_all, Some((existing, _)) if *existing == name);
                if found {
                    node.catch_all.take().map(|(_, handler)| handler)
                } else {
                    None
                }
            }
            None => node.handler.take(),
        }
    }

    /// True if a handler is installed at exactly `(method, pattern)`.
    pub fn contains(&self, method: &str, pattern: &str) -> bool {
        let Ok((segments, tail)) = parse_pattern(pattern) else {
            return false;
        };
        let Some(mut node) = self.methods.get(method) else {
            return false;
        };
        for segment in &segments {
            node = match segment {
                Segment::Literal(lit) => match node.literals.get(lit) {
                    Some(next) => next,
                    None => return false,
                },
                Segment::Param(name) => match &node.param {
                    Some((existing, next)) if existing == name => next.as_ref(),
                    _ => return false,
                },
            };
        }
        match tail {
            Some(name) => matches!(&node.catch_all, Some((existing, _)) if *existing == name),
            None => node.handler.is_some(),
        }
    }

    /// Walk all installed `(method, pattern)` pairs.
    pub fn patterns(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (method, root) in &self.methods {
            collect_patterns(root, method, String::new(), &mut out);
        }
        out
    }
}

fn collect_patterns<T>(
    node: &Node<T>,
    method: &str,
    prefix: String,
    out: &mut Vec<(String, String)>,
) {
    if node.handler.is_some() {
        let pattern = if prefix.is_empty() { "/" } else { prefix.as_str() };
        out.push((method.to_string(), pattern.to_string()));
    }
    if let Some((name, _)) = &node.catch_all {
        out.push((method.to_string(), format!("{}/*{}", prefix, name)));
    }
    for (literal, child) in &node.literals {
        collect_patterns(child, method, format!("{}/{}", prefix, literal), out);
    }
    if let Some((name, child)) = &node.param {
        collect_patterns(child, method, format!("{}/:{}", prefix, name), out);
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

fn parse_pattern(pattern: &str) -> Result<(Vec<Segment>, Option<String>), RouteError> {
    let invalid = |reason: &str| RouteError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    if !pattern.starts_with('/') {
        return Err(invalid("pattern must begin with '/'"));
    }
    if pattern == "/" {
        return Ok((Vec::new(), None));
    }

    let raw: Vec<&str> = pattern[1..].split('/').collect();
    let mut segments = Vec::with_capacity(raw.len());
    let mut tail = None;

    for (i, seg) in raw.iter().enumerate() {
        if seg.is_empty() {
            return Err(invalid("empty segment"));
        }
        let wildcards = seg.matches(|c| c == ':' || c == '*').count();
        match seg.as_bytes()[0] {
            b':' => {
                if wildcards > 1 {
                    return Err(invalid("two param names on the same segment"));
                }
                let name = &seg[1..];
                if name.is_empty() {
                    return Err(invalid("parameter segment without a name"));
                }
                segments.push(Segment::Param(name.to_string()));
            }
            b'*' => {
                if wildcards > 1 {
                    return Err(invalid("two param names on the same segment"));
                }
                if i + 1 != raw.len() {
                    return Err(invalid("catch-all must be the last segment"));
                }
                let name = &seg[1..];
                if name.is_empty() {
                    return Err(invalid("catch-all segment without a name"));
                }
                tail = Some(name.to_string());
            }
            _ => {
                if wildcards > 0 {
                    return Err(invalid("two param names on the same segment"));
                }
                segments.push(Segment::Literal(seg.to_string()));
            }
        }
    }

    Ok((segments, tail))
}
