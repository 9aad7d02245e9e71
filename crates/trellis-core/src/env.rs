//! Request environment
//!
//! The per-request key/value bag built by the listener. Plain keys hold
//! strings; keys under the reserved `trellis.` namespace may hold the input
//! stream, the error stream, flags, or typed extension objects.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
pub const PATH_INFO: &str = "PATH_INFO";
pub const QUERY_STRING: &str = "QUERY_STRING";
pub const SERVER_NAME: &str = "SERVER_NAME";
pub const SERVER_PORT: &str = "SERVER_PORT";
pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";
pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
pub const HTTPS: &str = "HTTPS";

pub const HTTP_HOST: &str = "HTTP_HOST";
pub const HTTP_COOKIE: &str = "HTTP_COOKIE";
pub const HTTP_RANGE: &str = "HTTP_RANGE";
pub const HTTP_X_FORWARDED_SSL: &str = "HTTP_X_FORWARDED_SSL";
pub const HTTP_X_FORWARDED_SCHEME: &str = "HTTP_X_FORWARDED_SCHEME";
pub const HTTP_X_FORWARDED_PROTO: &str = "HTTP_X_FORWARDED_PROTO";
pub const HTTP_X_FORWARDED_HOST: &str = "HTTP_X_FORWARDED_HOST";
pub const HTTP_X_FORWARDED_PORT: &str = "HTTP_X_FORWARDED_PORT";
pub const HTTP_X_FORWARDED_FOR: &str = "HTTP_X_FORWARDED_FOR";
pub const HTTP_IF_NONE_MATCH: &str = "HTTP_IF_NONE_MATCH";
pub const HTTP_IF_MODIFIED_SINCE: &str = "HTTP_IF_MODIFIED_SINCE";

pub const TRELLIS_INPUT: &str = "trellis.input";
pub const TRELLIS_ERRORS: &str = "trellis.errors";
pub const TRELLIS_MULTITHREAD: &str = "trellis.multithread";
pub const TRELLIS_MULTIPROCESS: &str = "trellis.multiprocess";
pub const TRELLIS_RUN_ONCE: &str = "trellis.run_once";
pub const TRELLIS_URL_SCHEME: &str = "trellis.url_scheme";
pub const TRELLIS_SESSION: &str = "trellis.session";
pub const TRELLIS_TEMPFILES: &str = "trellis.tempfiles";
pub const TRELLIS_RECURSIVE_INCLUDE: &str = "trellis.recursive.include";
pub const TRELLIS_METHODOVERRIDE_ORIGINAL_METHOD: &str = "trellis.methodoverride.original_method";

pub const TRELLIS_REQUEST_QUERY_STRING: &str = "trellis.request.query_string";
pub const TRELLIS_REQUEST_QUERY_HASH: &str = "trellis.request.query_hash";
pub const TRELLIS_REQUEST_FORM_INPUT: &str = "trellis.request.form_input";
pub const TRELLIS_REQUEST_FORM_VARS: &str = "trellis.request.form_vars";
pub const TRELLIS_REQUEST_FORM_HASH: &str = "trellis.request.form_hash";
pub const TRELLIS_REQUEST_COOKIE_STRING: &str = "trellis.request.cookie_string";
pub const TRELLIS_REQUEST_COOKIE_HASH: &str = "trellis.request.cookie_hash";

/// Reserved key namespace for non-string resources
pub const RESERVED_PREFIX: &str = "trellis.";

static NEXT_INPUT_ID: AtomicU64 = AtomicU64::new(1);

/// Request body stream
pub struct Input {
    id: u64,
    reader: Box<dyn Read + Send>,
}

impl Input {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            id: NEXT_INPUT_ID.fetch_add(1, Ordering::Relaxed),
            reader: Box::new(reader),
        }
    }

    pub fn empty() -> Self {
        Self::new(io::empty())
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(io::Cursor::new(bytes.into()))
    }

    /// Identity of this stream, unique within the process
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Input").field("id", &self.id).finish()
    }
}

/// Shared diagnostics sink
#[derive(Clone)]
pub struct ErrorStream {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
    captured: Option<Arc<Mutex<Vec<u8>>>>,
}

struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ErrorStream {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
            captured: None,
        }
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// In-memory stream whose contents can be read back
    pub fn buffer() -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        Self {
            inner: Arc::new(Mutex::new(Box::new(Capture(Arc::clone(&buf))))),
            captured: Some(buf),
        }
    }

    /// Write a line, ignoring sink failures
    pub fn puts(&self, line: &str) {
        let mut w = self.inner.lock();
        let _ = w.write_all(line.as_bytes());
        if !line.ends_with('\n') {
            let _ = w.write_all(b"\n");
        }
        let _ = w.flush();
    }

    /// Captured text of a `buffer()` stream
    pub fn contents(&self) -> String {
        self.captured
            .as_ref()
            .map(|b| String::from_utf8_lossy(&b.lock()).into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Debug for ErrorStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorStream")
    }
}

/// Environment value
pub enum EnvValue {
    Str(String),
    Bool(bool),
    Input(Input),
    Errors(ErrorStream),
    Ext(Box<dyn Any + Send + Sync>),
}

impl fmt::Debug for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Str(s) => write!(f, "{:?}", s),
            EnvValue::Bool(b) => write!(f, "{}", b),
            EnvValue::Input(i) => write!(f, "{:?}", i),
            EnvValue::Errors(e) => write!(f, "{:?}", e),
            EnvValue::Ext(_) => f.write_str("<ext>"),
        }
    }
}

/// Per-request environment
#[derive(Debug, Default)]
pub struct Env {
    entries: HashMap<String, EnvValue>,
}

/// Map a header name to its environment key
pub fn header_key(name: &str) -> String {
    let upper = name.to_ascii_uppercase().replace('-', "_");
    match upper.as_str() {
        CONTENT_TYPE | CONTENT_LENGTH => upper,
        _ => format!("HTTP_{}", upper),
    }
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: EnvValue) -> Option<EnvValue> {
        self.entries.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<EnvValue> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// String value, `None` if absent or not a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(EnvValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), EnvValue::Str(value.into()));
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(EnvValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.entries.insert(key.into(), EnvValue::Bool(value));
    }

    /// Look up a request header by its HTTP name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.get_str(&header_key(name))
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.set_str(header_key(name), value);
    }

    pub fn input_mut(&mut self) -> Option<&mut Input> {
        match self.entries.get_mut(TRELLIS_INPUT) {
            Some(EnvValue::Input(i)) => Some(i),
            _ => None,
        }
    }

    pub fn set_input(&mut self, input: Input) {
        self.entries.insert(TRELLIS_INPUT.to_string(), EnvValue::Input(input));
    }

    /// Error stream, falling back to stderr when the listener set none
    pub fn errors(&self) -> ErrorStream {
        match self.entries.get(TRELLIS_ERRORS) {
            Some(EnvValue::Errors(e)) => e.clone(),
            _ => ErrorStream::stderr(),
        }
    }

    pub fn set_errors(&mut self, errors: ErrorStream) {
        self.entries.insert(TRELLIS_ERRORS.to_string(), EnvValue::Errors(errors));
    }

    pub fn ext<T: Any>(&self, key: &str) -> Option<&T> {
        match self.entries.get(key) {
            Some(EnvValue::Ext(b)) => b.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn ext_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        match self.entries.get_mut(key) {
            Some(EnvValue::Ext(b)) => b.downcast_mut::<T>(),
            _ => None,
        }
    }

    pub fn insert_ext<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), EnvValue::Ext(Box::new(value)));
    }

    /// Remove and return a typed extension
    pub fn take_ext<T: Any>(&mut self, key: &str) -> Option<T> {
        match self.entries.remove(key) {
            Some(EnvValue::Ext(b)) => match b.downcast::<T>() {
                Ok(v) => Some(*v),
                Err(b) => {
                    self.entries.insert(key.to_string(), EnvValue::Ext(b));
                    None
                }
            },
            Some(other) => {
                self.entries.insert(key.to_string(), other);
                None
            }
            None => None,
        }
    }
}
