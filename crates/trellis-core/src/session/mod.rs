//! Session Middleware
//!
//! Cookie-identified sessions with pluggable stores. The session is loaded
//! lazily on first access, and committed when the downstream app returns:
//! written back to the store and announced with a `Set-Cookie` header.
//!
//! Store failures never fail the request. A failed read yields an empty
//! session under a fresh id; a failed write drops the content. Both are
//! reported on the error stream.

mod cookie;
mod store;

pub use cookie::{CookieSigner, CookieStore, HmacSha256, MessageAuthenticator, MAX_COOKIE_SIZE, SESSION_ID_KEY};
pub use store::{MemoryStore, SessionData, SessionStore};

use crate::env::{self, Env, ErrorStream};
use crate::handler::{Handler, Middleware};
use crate::request::Request;
use crate::response::{Cookie, SameSite};
use crate::{Response, Result};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Default session id entropy
pub const DEFAULT_SID_BITS: usize = 128;

/// Default cookie name
pub const DEFAULT_KEY: &str = "trellis.session";

/// Generate an unpredictable session id: hex of `bits / 8` OS random bytes
pub fn generate_sid(bits: usize) -> String {
    let mut bytes = vec![0u8; (bits / 8).max(1)];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// Configuration
// ============================================================================

/// Per-request cookie and commit options
///
/// Each request starts from the middleware's defaults and may change its
/// own copy through [`Session::options_mut`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub path: String,
    pub domain: Option<String>,
    /// Lifetime of the stored session and of the cookie
    pub expire_after: Option<Duration>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
    /// Move the data to a new session id
    pub renew: bool,
    /// Leave store and cookie untouched
    pub skip: bool,
    /// Delete the session
    pub drop: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            expire_after: None,
            secure: false,
            http_only: true,
            same_site: None,
            renew: false,
            skip: false,
            drop: false,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cookie name (default: "trellis.session")
    pub key: String,
    /// Session id entropy in bits
    pub sid_bits: usize,
    pub options: SessionOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            sid_bits: DEFAULT_SID_BITS,
            options: SessionOptions::default(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.options.path = path.into();
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.options.domain = Some(domain.into());
        self
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.options.expire_after = Some(ttl);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.options.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.options.http_only = http_only;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.options.same_site = Some(same_site);
        self
    }

    pub fn sid_bits(mut self, bits: usize) -> Self {
        self.sid_bits = bits;
        self
    }

    pub fn renew(mut self, renew: bool) -> Self {
        self.options.renew = renew;
        self
    }

    pub fn skip(mut self, skip: bool) -> Self {
        self.options.skip = skip;
        self
    }

    pub fn drop(mut self, drop: bool) -> Self {
        self.options.drop = drop;
        self
    }
}

// ============================================================================
// Session handle
// ============================================================================

struct SessionState {
    store: Arc<dyn SessionStore>,
    cookie: Option<String>,
    sid_bits: usize,
    errors: ErrorStream,
    id: Option<String>,
    data: SessionData,
    loaded: bool,
    changed: bool,
    options: SessionOptions,
}

impl SessionState {
    fn load(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;
        let found = match self.cookie.as_deref() {
            Some(cookie) => self.store.find_session(cookie),
            None => Ok(None),
        };
        match found {
            Ok(Some((sid, data))) => {
                self.id = Some(sid);
                self.data = data;
            }
            Ok(None) => self.id = Some(generate_sid(self.sid_bits)),
            Err(e) => {
                report(&self.errors, "session store read failed, using empty session", &e);
                self.id = Some(generate_sid(self.sid_bits));
            }
        }
    }
}

fn report(errors: &ErrorStream, message: &str, error: &crate::Error) {
    tracing::warn!(error = %error, "{}", message);
    errors.puts(&format!("{}: {}", message, error));
}

/// Request-scoped session handle, installed in the env by [`SessionMiddleware`]
///
/// Clones share the same record.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

impl Session {
    fn new(
        store: Arc<dyn SessionStore>,
        cookie: Option<String>,
        sid_bits: usize,
        errors: ErrorStream,
        options: SessionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                store,
                cookie,
                sid_bits,
                errors,
                id: None,
                data: SessionData::new(),
                loaded: false,
                changed: false,
                options,
            })),
        }
    }

    fn loaded(&self) -> MutexGuard<'_, SessionState> {
        let mut state = self.inner.lock();
        state.load();
        state
    }

    /// Session id, loading the session if needed
    pub fn id(&self) -> String {
        self.loaded().id.clone().unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.loaded().data.get(key).cloned()
    }

    /// Typed read; `None` when absent or of another shape
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut state = self.loaded();
        state.data.insert(key.into(), value.into());
        state.changed = true;
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.loaded();
        state.changed = true;
        state.data.remove(key)
    }

    pub fn clear(&self) {
        let mut state = self.loaded();
        state.data.clear();
        state.changed = true;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.loaded().data.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.loaded().data.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded().data.is_empty()
    }

    /// Snapshot of the data
    pub fn to_data(&self) -> SessionData {
        self.loaded().data.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.lock().loaded
    }

    pub fn is_changed(&self) -> bool {
        self.inner.lock().changed
    }

    pub fn options(&self) -> SessionOptions {
        self.inner.lock().options.clone()
    }

    /// This request's options; set `renew`, `drop` or `skip` here
    pub fn options_mut(&self) -> MappedMutexGuard<'_, SessionOptions> {
        MutexGuard::map(self.inner.lock(), |state| &mut state.options)
    }

    /// Move the data to a fresh id at commit (after login, say)
    pub fn renew(&self) {
        self.options_mut().renew = true;
    }

    /// Delete the session at commit
    pub fn destroy(&self) {
        self.clear();
        self.options_mut().drop = true;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Session")
            .field("id", &state.id)
            .field("loaded", &state.loaded)
            .field("changed", &state.changed)
            .field("keys", &state.data.len())
            .finish()
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Session middleware
pub struct SessionMiddleware {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
}

impl SessionMiddleware {
    pub fn new(store: impl SessionStore + 'static, config: SessionConfig) -> Self {
        Self::with_store(Arc::new(store), config)
    }

    /// Share one store between pipelines
    pub fn with_store(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { config, store }
    }

    fn commit(&self, session: &Session, request_cookie: Option<&str>, is_ssl: bool, res: &mut Response) {
        let mut state = session.inner.lock();
        let options = state.options.clone();

        if options.drop || options.renew {
            state.load();
            if let Some(old) = state.id.take() {
                if let Err(e) = self.store.delete_session(&old) {
                    report(&state.errors, "session store delete failed", &e);
                }
            }
            if options.drop {
                return;
            }
            state.id = Some(generate_sid(state.sid_bits));
        }

        if options.skip {
            return;
        }
        let touched = state.loaded || state.changed;
        // A sliding expiry refreshes the cookie of any non-empty session
        let forced = options.expire_after.is_some() && {
            state.load();
            !state.data.is_empty()
        };
        if !(touched || forced) {
            return;
        }
        if options.secure && !is_ssl {
            tracing::debug!("secure session cookie withheld over plain http");
            return;
        }

        state.load();
        let Some(sid) = state.id.clone() else {
            return;
        };
        let data: SessionData = state
            .data
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let value = match self.store.write_session(&sid, &data, &options) {
            Ok(value) => value,
            Err(e) => {
                report(&state.errors, "failed to save session, content dropped", &e);
                return;
            }
        };

        let expires = options.expire_after.map(|ttl| SystemTime::now() + ttl);
        if request_cookie == Some(value.as_str()) && expires.is_none() {
            return;
        }
        let mut cookie = Cookie::new(self.config.key.clone(), value).path(options.path.clone());
        if let Some(domain) = &options.domain {
            cookie = cookie.domain(domain.clone());
        }
        if let Some(at) = expires {
            cookie = cookie.expires(at);
        }
        if options.secure {
            cookie = cookie.secure();
        }
        if options.http_only {
            cookie = cookie.http_only();
        }
        if let Some(same_site) = options.same_site {
            cookie = cookie.same_site(same_site);
        }
        res.headers.append("set-cookie", cookie.to_header_value());
    }
}

impl Middleware for SessionMiddleware {
    fn call(&self, env: &mut Env, next: &dyn Handler) -> Result<Response> {
        let (request_cookie, is_ssl) = {
            let mut req = Request::new(env);
            let cookie = req.cookies().get(&self.config.key).cloned();
            (cookie, req.is_ssl())
        };
        let session = Session::new(
            Arc::clone(&self.store),
            request_cookie.clone(),
            self.config.sid_bits,
            env.errors(),
            self.config.options.clone(),
        );
        env.insert_ext(env::TRELLIS_SESSION, session.clone());

        let mut res = next.call(env)?;
        self.commit(&session, request_cookie.as_deref(), is_ssl, &mut res);
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    fn session_env(cookie: Option<&str>) -> (Env, ErrorStream) {
        let errors = ErrorStream::buffer();
        let mut env = Env::new();
        env.set_str(env::REQUEST_METHOD, "GET");
        env.set_str(env::TRELLIS_URL_SCHEME, "http");
        if let Some(cookie) = cookie {
            env.set_str(env::HTTP_COOKIE, cookie);
        }
        env.set_errors(errors.clone());
        (env, errors)
    }

    fn counter(env: &mut Env) -> Result<Response> {
        let session = Request::new(env).session().ok_or_else(|| Error::Internal("no session".into()))?;
        let count = session.get_as::<i64>("count").unwrap_or(0) + 1;
        session.set("count", count);
        Ok(Response::text(count.to_string()))
    }

    fn session_cookie(res: &Response) -> String {
        let header = res.header("set-cookie").expect("set-cookie");
        let pair = header.split(';').next().unwrap();
        pair.split_once('=').unwrap().1.to_string()
    }

    #[test]
    fn test_generate_sid() {
        let a = generate_sid(128);
        let b = generate_sid(128);
        assert_eq!(a.len(), 32);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_memory_session_persists() {
        let store = Arc::new(MemoryStore::new());
        let middleware = SessionMiddleware::with_store(store.clone(), SessionConfig::new());

        let (mut env, _) = session_env(None);
        let mut res = middleware.call(&mut env, &counter).unwrap();
        assert_eq!(res.body_bytes().unwrap(), "1");
        let sid = session_cookie(&res);
        assert!(res.header("set-cookie").unwrap().contains("HttpOnly"));
        assert_eq!(store.len(), 1);

        let (mut env, _) = session_env(Some(&format!("trellis.session={}", sid)));
        let mut res = middleware.call(&mut env, &counter).unwrap();
        assert_eq!(res.body_bytes().unwrap(), "2");
        // Same id, no expiry: no need to resend the cookie
        assert_eq!(res.header("set-cookie"), None);
    }

    #[test]
    fn test_untouched_session_is_not_committed() {
        let store = Arc::new(MemoryStore::new());
        let middleware = SessionMiddleware::with_store(store.clone(), SessionConfig::new());
        let (mut env, _) = session_env(None);
        let res = middleware.call(&mut env, &|_: &mut Env| -> Result<Response> { Ok(Response::ok()) }).unwrap();
        assert_eq!(res.header("set-cookie"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_expiry_refreshed_on_untouched_request() {
        let store = Arc::new(MemoryStore::new());
        let config = SessionConfig::new().expire_after(Duration::from_secs(600));
        let middleware = SessionMiddleware::with_store(store.clone(), config);
        let untouched = |_: &mut Env| -> Result<Response> { Ok(Response::ok()) };

        let (mut env, _) = session_env(None);
        let res = middleware.call(&mut env, &counter).unwrap();
        let sid = session_cookie(&res);

        let (mut env, _) = session_env(Some(&format!("trellis.session={}", sid)));
        let res = middleware.call(&mut env, &untouched).unwrap();
        let header = res.header("set-cookie").expect("refreshed cookie");
        assert!(header.contains("Expires="));
        assert_eq!(session_cookie(&res), sid);
        assert_eq!(store.find_session(&sid).unwrap().unwrap().1.get("count"), Some(&json!(1)));

        // Nothing stored yet: no cookie is forced
        let (mut env, _) = session_env(None);
        let res = middleware.call(&mut env, &untouched).unwrap();
        assert_eq!(res.header("set-cookie"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_renew_and_drop() {
        let store = Arc::new(MemoryStore::new());
        let middleware = SessionMiddleware::with_store(store.clone(), SessionConfig::new());
        let (mut env, _) = session_env(None);
        let res = middleware.call(&mut env, &counter).unwrap();
        let sid = session_cookie(&res);
        let cookie = format!("trellis.session={}", sid);

        let renew = |env: &mut Env| -> Result<Response> {
            let session = Request::new(env).session().unwrap();
            session.renew();
            assert_eq!(session.get("count"), Some(json!(1)));
            Ok(Response::ok())
        };
        let (mut env, _) = session_env(Some(&cookie));
        let res = middleware.call(&mut env, &renew).unwrap();
        let renewed = session_cookie(&res);
        assert_ne!(renewed, sid);
        assert!(store.find_session(&sid).unwrap().is_none());
        assert!(store.find_session(&renewed).unwrap().is_some());

        let destroy = |env: &mut Env| -> Result<Response> {
            Request::new(env).session().unwrap().destroy();
            Ok(Response::ok())
        };
        let (mut env, _) = session_env(Some(&format!("trellis.session={}", renewed)));
        let res = middleware.call(&mut env, &destroy).unwrap();
        assert_eq!(res.header("set-cookie"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_secure_cookie_needs_https() {
        let middleware = SessionMiddleware::new(MemoryStore::new(), SessionConfig::new().secure(true));
        let (mut env, _) = session_env(None);
        let res = middleware.call(&mut env, &counter).unwrap();
        assert_eq!(res.header("set-cookie"), None);

        let (mut env, _) = session_env(None);
        env.set_str(env::TRELLIS_URL_SCHEME, "https");
        let res = middleware.call(&mut env, &counter).unwrap();
        assert!(res.header("set-cookie").unwrap().contains("Secure"));
    }

    #[test]
    fn test_cookie_store_session() {
        let secret = "a-very-long-secret-used-only-for-session-tests";
        let config = SessionConfig::new().expire_after(Duration::from_secs(3600));
        let middleware = SessionMiddleware::new(CookieStore::new(CookieSigner::new(secret)), config);

        let (mut env, _) = session_env(None);
        let res = middleware.call(&mut env, &counter).unwrap();
        let header = res.header("set-cookie").unwrap().to_string();
        assert!(header.contains("Expires="));

        let value = crate::utils::unescape(&session_cookie(&res)).unwrap();
        let (mut env, _) = session_env(Some(&format!("trellis.session={}", crate::utils::escape(&value))));
        let mut res = middleware.call(&mut env, &counter).unwrap();
        assert_eq!(res.body_bytes().unwrap(), "2");

        // A forged cookie starts over
        let (mut env, _) = session_env(Some("trellis.session=e30%3D--00"));
        let mut res = middleware.call(&mut env, &counter).unwrap();
        assert_eq!(res.body_bytes().unwrap(), "1");
    }

    struct BrokenStore;

    impl SessionStore for BrokenStore {
        fn find_session(&self, _cookie: &str) -> Result<Option<(String, SessionData)>> {
            Err(Error::SessionBackend("connection refused".into()))
        }

        fn write_session(&self, _sid: &str, _data: &SessionData, _options: &SessionOptions) -> Result<String> {
            Err(Error::SessionBackend("connection refused".into()))
        }

        fn delete_session(&self, _sid: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_backend_failure_degrades() {
        let middleware = SessionMiddleware::new(BrokenStore, SessionConfig::new());
        let (mut env, errors) = session_env(Some("trellis.session=abc"));
        let mut res = middleware.call(&mut env, &counter).unwrap();
        assert_eq!(res.body_bytes().unwrap(), "1");
        assert_eq!(res.header("set-cookie"), None);
        let log = errors.contents();
        assert!(log.contains("read failed"));
        assert!(log.contains("content dropped"));
    }
}
