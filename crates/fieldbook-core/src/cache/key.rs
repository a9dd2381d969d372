//! Cache keys and invalidation patterns.
//!
//! A [`CacheKey`] is a `(collection, method, params)` tuple. The params are
//! stored as canonical JSON (object keys sorted at every depth), so two
//! parameter objects that differ only in insertion order yield the same key.
//! The rendered form `collection:method:params` is what the persistent tier
//! stores and what wildcard patterns are matched against.
//!
//! [`KeyPattern`] selects keys for invalidation. Collection and record
//! patterns match on the structured fields; wildcard templates use a plain
//! glob matcher where `*` matches any substring.

use std::fmt;

use serde_json::Value;

/// Separator between the parts of a rendered key.
const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    collection: String,
    method: String,
    params: String,
    record_id: Option<String>,
}

impl CacheKey {
    /// Build a key from a collection, a method discriminator and its parameters.
    pub fn new(collection: &str, method: &str, params: &Value) -> Self {
        Self {
            collection: collection.to_string(),
            method: method.to_string(),
            params: canonical_json(params),
            record_id: record_id_of(params),
        }
    }

    /// Parse a rendered key back into its parts.
    ///
    /// Returns `None` if the string lacks a collection or method segment.
    pub fn parse(rendered: &str) -> Option<Self> {
        let mut parts = rendered.splitn(3, SEPARATOR);
        let collection = parts.next().filter(|s| !s.is_empty())?;
        let method = parts.next().filter(|s| !s.is_empty())?;
        let params = parts.next().unwrap_or("");
        let record_id = serde_json::from_str::<Value>(params)
            .ok()
            .and_then(|v| record_id_of(&v));

        Some(Self {
            collection: collection.to_string(),
            method: method.to_string(),
            params: params.to_string(),
            record_id,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &str {
        &self.params
    }

    /// The record this key is scoped to, when its params carry a top-level `id`.
    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.collection, SEPARATOR, self.method, SEPARATOR, self.params
        )
    }
}

/// Render a record id the same way regardless of whether it is a JSON
/// string or number.
pub(crate) fn id_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn record_id_of(params: &Value) -> Option<String> {
    params.as_object()?.get("id").and_then(id_string)
}

/// Serialize a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Selects cache keys for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Every key of a collection (`collection:*`).
    Collection(String),
    /// Keys of a collection scoped to one record (`collection:*:id*`).
    Record { collection: String, id: String },
    /// A rendered-key template where `*` matches any substring.
    Wildcard(String),
}

impl KeyPattern {
    pub fn collection(collection: impl Into<String>) -> Self {
        KeyPattern::Collection(collection.into())
    }

    pub fn record(collection: impl Into<String>, id: impl Into<String>) -> Self {
        KeyPattern::Record {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Parse a template. `name:*` becomes a collection pattern and
    /// `name:*:id*` a record pattern, the forms [`Display`](fmt::Display)
    /// renders; anything else is matched as a wildcard template.
    pub fn parse(template: &str) -> Self {
        let plain = |s: &str| !s.is_empty() && !s.contains('*') && !s.contains(SEPARATOR);

        if let Some(collection) = template.strip_suffix(":*") {
            if plain(collection) {
                return KeyPattern::Collection(collection.to_string());
            }
        }
        if let Some((collection, rest)) = template.split_once(":*:") {
            if let Some(id) = rest.strip_suffix('*') {
                if plain(collection) && plain(id) {
                    return KeyPattern::record(collection, id);
                }
            }
        }
        KeyPattern::Wildcard(template.to_string())
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            KeyPattern::Collection(collection) => key.collection == *collection,
            KeyPattern::Record { collection, id } => {
                key.collection == *collection && key.record_id() == Some(id.as_str())
            }
            KeyPattern::Wildcard(template) => glob_match(template, &key.to_string()),
        }
    }

    /// Match against a rendered key string.
    ///
    /// Strings that do not parse as keys only match wildcard templates.
    pub fn matches_rendered(&self, rendered: &str) -> bool {
        match CacheKey::parse(rendered) {
            Some(key) => self.matches(&key),
            None => match self {
                KeyPattern::Wildcard(template) => glob_match(template, rendered),
                _ => false,
            },
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Collection(collection) => write!(f, "{}:*", collection),
            KeyPattern::Record { collection, id } => write!(f, "{}:*:{}*", collection, id),
            KeyPattern::Wildcard(template) => f.write_str(template),
        }
    }
}

/// Match `text` against `pattern`, where `*` matches any (possibly empty)
/// substring and every other character matches itself.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0, 0);
    // Position of the last `*` seen and the text index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == b'*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == b'*')
}
