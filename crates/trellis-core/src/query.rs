//! Query string and form body parser
//!
//! Turns `a=1&b[]=2&c[d]=3` into nested maps and arrays using the bracket
//! grammar shared by urlencoded and multipart bodies:
//!
//! - `name` stores a scalar (last occurrence wins)
//! - `name[]` appends to an array
//! - `name[key]` nests a map
//! - `name[][key]` builds an array of maps
//!
//! Depth, byte size and parameter count are bounded so adversarial input
//! cannot exhaust memory or stack.

use crate::multipart::UploadedFile;
use crate::utils::unescape;
use crate::{Error, Result};
use std::collections::btree_map::{self, BTreeMap};

/// Default maximum nesting depth
pub const DEFAULT_DEPTH_LIMIT: usize = 32;
/// Default maximum query size in bytes
pub const DEFAULT_BYTESIZE_LIMIT: usize = 4 * 1024 * 1024;
/// Default maximum number of parameters
pub const DEFAULT_PARAMS_LIMIT: usize = 4096;

/// One parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Key given without `=`
    Null,
    String(String),
    File(UploadedFile),
    Array(Vec<Param>),
    Map(Params),
}

impl Param {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Param::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Param]> {
        match self {
            Param::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Params> {
        match self {
            Param::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&UploadedFile> {
        match self {
            Param::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Param::Null)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Param::Null => "Null",
            Param::String(_) => "String",
            Param::File(_) => "File",
            Param::Array(_) => "Array",
            Param::Map(_) => "Map",
        }
    }
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::String(s.to_string())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::String(s)
    }
}

impl From<UploadedFile> for Param {
    fn from(f: UploadedFile) -> Self {
        Param::File(f)
    }
}

impl From<Params> for Param {
    fn from(m: Params) -> Self {
        Param::Map(m)
    }
}

/// Parameter map with deterministic (sorted) iteration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    inner: BTreeMap<String, Param>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Param> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Param> {
        self.inner.get_mut(key)
    }

    /// String value of a scalar param
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Param::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Param>) -> Option<Param> {
        self.inner.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Param> {
        self.inner.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Param> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Merge `other` into `self`; keys from `other` win
    pub fn merge(&mut self, other: &Params) {
        for (k, v) in other.iter() {
            self.inner.insert(k.clone(), v.clone());
        }
    }

    fn slot(&mut self, key: &str, default: impl FnOnce() -> Param) -> &mut Param {
        self.inner.entry(key.to_string()).or_insert_with(default)
    }

    /// Every uploaded file, depth first
    pub fn files(&self) -> Vec<UploadedFile> {
        fn collect(value: &Param, out: &mut Vec<UploadedFile>) {
            match value {
                Param::File(f) => out.push(f.clone()),
                Param::Array(items) => items.iter().for_each(|v| collect(v, out)),
                Param::Map(map) => map.iter().for_each(|(_, v)| collect(v, out)),
                _ => {}
            }
        }
        let mut out = Vec::new();
        self.iter().for_each(|(_, v)| collect(v, &mut out));
        out
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = (&'a String, &'a Param);
    type IntoIter = btree_map::Iter<'a, String, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

impl<K: Into<String>, V: Into<Param>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// Result of normalizing one name against a container
enum Normalized {
    Stored,
    /// `[]` leaf below the top level: the caller stores the array itself
    Leaf(Param),
    Skipped,
}

/// Query parser configuration
#[derive(Debug, Clone)]
pub struct QueryParser {
    /// Characters splitting key/value pairs
    pub separators: String,
    /// Maximum bracket nesting
    pub depth_limit: usize,
    /// Maximum query size in bytes
    pub bytesize_limit: usize,
    /// Maximum number of pairs
    pub params_limit: usize,
}

impl Default for QueryParser {
    fn default() -> Self {
        Self {
            separators: "&".to_string(),
            depth_limit: DEFAULT_DEPTH_LIMIT,
            bytesize_limit: DEFAULT_BYTESIZE_LIMIT,
            params_limit: DEFAULT_PARAMS_LIMIT,
        }
    }
}

impl QueryParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with `TRELLIS_PARAM_DEPTH_LIMIT` applied
    pub fn from_env() -> Self {
        let mut parser = Self::default();
        if let Ok(raw) = std::env::var("TRELLIS_PARAM_DEPTH_LIMIT") {
            match raw.trim().parse() {
                Ok(limit) => parser.depth_limit = limit,
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid TRELLIS_PARAM_DEPTH_LIMIT"),
            }
        }
        parser
    }

    pub fn separators(mut self, separators: impl Into<String>) -> Self {
        self.separators = separators.into();
        self
    }

    pub fn depth_limit(mut self, limit: usize) -> Self {
        self.depth_limit = limit;
        self
    }

    pub fn bytesize_limit(mut self, limit: usize) -> Self {
        self.bytesize_limit = limit;
        self
    }

    pub fn params_limit(mut self, limit: usize) -> Self {
        self.params_limit = limit;
        self
    }

    fn check_query(&self, qs: &str, separators: &str) -> Result<()> {
        if qs.len() > self.bytesize_limit {
            return Err(Error::QueryLimit(format!(
                "total query size ({}) exceeds limit ({})",
                qs.len(),
                self.bytesize_limit
            )));
        }
        let count = qs.chars().filter(|c| separators.contains(*c)).count();
        if count >= self.params_limit {
            return Err(Error::QueryLimit(format!(
                "total number of query parameters ({}) exceeds limit ({})",
                count + 1,
                self.params_limit
            )));
        }
        Ok(())
    }

    fn segments<'q>(&self, qs: &'q str, separators: &'q str) -> impl Iterator<Item = &'q str> {
        qs.split(move |c| separators.contains(c))
            .map(|s| s.trim_start_matches(' '))
            .filter(|s| !s.is_empty())
    }

    fn pair(segment: &str) -> Result<(String, Param)> {
        let (k, v) = match segment.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (segment, None),
        };
        let value = match v {
            Some(v) => Param::String(unescape(v)?),
            None => Param::Null,
        };
        Ok((unescape(k)?, value))
    }

    /// Parse into a flat map; repeated keys collect into arrays
    pub fn parse_query(&self, qs: &str) -> Result<Params> {
        self.parse_query_with(qs, &self.separators)
    }

    pub fn parse_query_with(&self, qs: &str, separators: &str) -> Result<Params> {
        let mut params = Params::new();
        if qs.is_empty() {
            return Ok(params);
        }
        self.check_query(qs, separators)?;

        for segment in self.segments(qs, separators) {
            let (k, v) = Self::pair(segment)?;
            match params.get_mut(&k) {
                Some(Param::Array(items)) => items.push(v),
                Some(existing) => {
                    let first = std::mem::replace(existing, Param::Null);
                    *existing = Param::Array(vec![first, v]);
                }
                None => {
                    params.insert(k, v);
                }
            }
        }
        Ok(params)
    }

    /// Parse using the bracket grammar
    pub fn parse_nested_query(&self, qs: &str) -> Result<Params> {
        self.parse_nested_query_with(qs, &self.separators)
    }

    pub fn parse_nested_query_with(&self, qs: &str, separators: &str) -> Result<Params> {
        let mut params = Params::new();
        if qs.is_empty() {
            return Ok(params);
        }
        self.check_query(qs, separators)?;

        for segment in self.segments(qs, separators) {
            let (k, v) = Self::pair(segment)?;
            self.normalize(&mut params, &k, v, 0)?;
        }
        Ok(params)
    }

    /// Store one decoded `name`/`value` pair into `params`
    pub fn normalize_params(&self, params: &mut Params, name: &str, value: Param) -> Result<()> {
        self.normalize(params, name, value, 0).map(|_| ())
    }

    fn normalize(&self, params: &mut Params, name: &str, v: Param, depth: usize) -> Result<Normalized> {
        if depth >= self.depth_limit {
            return Err(Error::ParamsTooDeep { limit: self.depth_limit });
        }

        let (k, after) = if depth == 0 {
            // A leading `[` is part of the key at the top level
            match name.char_indices().skip(1).find(|(_, c)| *c == '[') {
                Some((start, _)) => (&name[..start], &name[start..]),
                None => (name, ""),
            }
        } else if let Some(rest) = name.strip_prefix("[]") {
            ("[]", rest)
        } else if name.starts_with('[') {
            match name[1..].find(']') {
                Some(i) => (&name[1..i + 1], &name[i + 2..]),
                None => (name, ""),
            }
        } else {
            // Nested but not bracketed: keep the whole name as the key
            (name, "")
        };

        if k.is_empty() {
            return Ok(Normalized::Skipped);
        }

        if after.is_empty() {
            if k == "[]" && depth != 0 {
                return Ok(Normalized::Leaf(Param::Array(vec![v])));
            }
            params.insert(k, v);
            return Ok(Normalized::Stored);
        }

        if after == "[" {
            params.insert(name, v);
            return Ok(Normalized::Stored);
        }

        if after == "[]" {
            match params.slot(k, || Param::Array(Vec::new())) {
                Param::Array(items) => items.push(v),
                other => return Err(type_error("Array", other, k)),
            }
            return Ok(Normalized::Stored);
        }

        if let Some(rest) = after.strip_prefix("[]") {
            let child_key = match rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                Some(ck) if !ck.is_empty() && !ck.contains('[') && !ck.contains(']') => ck,
                _ => rest,
            };

            let items = match params.slot(k, || Param::Array(Vec::new())) {
                Param::Array(items) => items,
                other => return Err(type_error("Array", other, k)),
            };

            let reuse_last = matches!(items.last(), Some(Param::Map(last)) if !has_key(last, child_key));
            if reuse_last {
                if let Some(Param::Map(last)) = items.last_mut() {
                    self.normalize(last, child_key, v, depth + 1)?;
                }
            } else {
                let mut fresh = Params::new();
                match self.normalize(&mut fresh, child_key, v, depth + 1)? {
                    Normalized::Stored => items.push(Param::Map(fresh)),
                    Normalized::Leaf(value) => items.push(value),
                    Normalized::Skipped => items.push(Param::Null),
                }
            }
            return Ok(Normalized::Stored);
        }

        match params.slot(k, || Param::Map(Params::new())) {
            Param::Map(child) => {
                self.normalize(child, after, v, depth + 1)?;
            }
            other => return Err(type_error("Map", other, k)),
        }
        Ok(Normalized::Stored)
    }
}

fn type_error(expected: &str, got: &Param, key: &str) -> Error {
    Error::ParameterType(format!(
        "expected {} (got {}) for param `{}'",
        expected,
        got.type_name(),
        key
    ))
}

/// Whether a bracketed key path already exists in `map`
fn has_key(map: &Params, key: &str) -> bool {
    if key.contains("[]") {
        return false;
    }
    let mut current = map;
    let mut parts = key.split(|c| c == '[' || c == ']').filter(|p| !p.is_empty()).peekable();
    while let Some(part) = parts.next() {
        let Some(value) = current.get(part) else {
            return false;
        };
        if parts.peek().is_none() {
            return true;
        }
        match value {
            Param::Map(m) => current = m,
            _ => return false,
        }
    }
    true
}
