//! Request context
//!
//! A borrowed view over one [`Env`] that derives scheme, authority, client
//! address, cookies and parameters. Parsed values are cached inside the env
//! under `trellis.request.*` keys, tagged with the raw value they came from,
//! so any other `Request` over the same env sees the same caches and a
//! rewritten query string or a replaced input stream invalidates them.

use crate::env::{self, Env, Input};
use crate::multipart::{parse_multipart, MultipartConfig, TempfileRegistry};
use crate::query::{Param, Params, QueryParser};
use crate::utils::parse_cookies;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::io::Read;
use std::net::IpAddr;

/// Separators for query strings (`;` accepted for legacy clients)
const QUERY_SEPARATORS: &str = "&;";
/// Separators for urlencoded bodies
const FORM_SEPARATORS: &str = "&";

const FORM_DATA_MEDIA_TYPES: [&str; 2] = ["application/x-www-form-urlencoded", "multipart/form-data"];
const PARSEABLE_DATA_MEDIA_TYPES: [&str; 2] = ["multipart/related", "multipart/mixed"];

static NO_COOKIES: BTreeMap<String, String> = BTreeMap::new();

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

/// Addresses skipped when looking for the client behind proxies
pub fn is_trusted_proxy(addr: &str) -> bool {
    let addr = addr.trim();
    if addr.eq_ignore_ascii_case("localhost") || addr.eq_ignore_ascii_case("unix") {
        return true;
    }
    if addr.len() >= 5 && addr[..5].eq_ignore_ascii_case("unix:") {
        return true;
    }
    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback() || v4.is_private(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
        Err(_) => false,
    }
}

fn split_addresses(header: Option<&str>) -> Vec<&str> {
    header
        .map(|h| h.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

/// Drop a port from `ip:port` or `[ipv6]:port`
fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.matches(':').count() {
        1 => addr.split(':').next().unwrap_or(addr),
        _ => addr,
    }
}

/// Split an authority into host and optional port, keeping IPv6 brackets
fn split_authority(authority: &str) -> (&str, Option<u16>) {
    if authority.starts_with('[') {
        if let Some(end) = authority.find(']') {
            let host = &authority[..=end];
            let port = authority[end + 1..].strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
        return (authority, None);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => (host, port.parse().ok()),
        _ => (authority, None),
    }
}

/// Request context over an environment
pub struct Request<'a> {
    env: &'a mut Env,
    parser: QueryParser,
    multipart: MultipartConfig,
    merged: Option<Params>,
}

impl<'a> Request<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self {
            env,
            parser: QueryParser::default(),
            multipart: MultipartConfig::default(),
            merged: None,
        }
    }

    pub fn with_parser(mut self, parser: QueryParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_multipart(mut self, config: MultipartConfig) -> Self {
        self.multipart = config;
        self
    }

    pub fn env(&self) -> &Env {
        &*self.env
    }

    pub fn env_mut(&mut self) -> &mut Env {
        &mut *self.env
    }

    fn str_or_empty(&self, key: &str) -> &str {
        self.env.get_str(key).unwrap_or("")
    }

    // ========================================================================
    // Request line
    // ========================================================================

    pub fn request_method(&self) -> &str {
        self.str_or_empty(env::REQUEST_METHOD)
    }

    pub fn script_name(&self) -> &str {
        self.str_or_empty(env::SCRIPT_NAME)
    }

    pub fn path_info(&self) -> &str {
        self.str_or_empty(env::PATH_INFO)
    }

    pub fn query_string(&self) -> &str {
        self.str_or_empty(env::QUERY_STRING)
    }

    pub fn is_get(&self) -> bool {
        self.request_method() == "GET"
    }

    pub fn is_post(&self) -> bool {
        self.request_method() == "POST"
    }

    pub fn is_head(&self) -> bool {
        self.request_method() == "HEAD"
    }

    pub fn is_put(&self) -> bool {
        self.request_method() == "PUT"
    }

    pub fn is_delete(&self) -> bool {
        self.request_method() == "DELETE"
    }

    /// `SCRIPT_NAME` + `PATH_INFO`
    pub fn path(&self) -> String {
        format!("{}{}", self.script_name(), self.path_info())
    }

    /// Path plus query string
    pub fn fullpath(&self) -> String {
        let qs = self.query_string();
        if qs.is_empty() {
            self.path()
        } else {
            format!("{}?{}", self.path(), qs)
        }
    }

    // ========================================================================
    // Content negotiation
    // ========================================================================

    pub fn content_type(&self) -> Option<&str> {
        self.env.get_str(env::CONTENT_TYPE).filter(|ct| !ct.is_empty())
    }

    /// Content type without parameters, lowercased
    pub fn media_type(&self) -> Option<String> {
        self.content_type()
            .and_then(|ct| ct.split(';').next())
            .map(|mt| mt.trim().to_ascii_lowercase())
            .filter(|mt| !mt.is_empty())
    }

    /// Content type parameters, keys lowercased
    pub fn media_type_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        if let Some(ct) = self.content_type() {
            for part in ct.split(';').skip(1) {
                if let Some((k, v)) = part.split_once('=') {
                    let v = v.trim();
                    let v = v.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(v);
                    params.insert(k.trim().to_ascii_lowercase(), v.to_string());
                }
            }
        }
        params
    }

    pub fn content_charset(&self) -> Option<String> {
        self.media_type_params().remove("charset")
    }

    pub fn content_length(&self) -> Option<u64> {
        self.env.get_str(env::CONTENT_LENGTH).and_then(|v| v.trim().parse().ok())
    }

    fn effective_method(&self) -> &str {
        self.env
            .get_str(env::TRELLIS_METHODOVERRIDE_ORIGINAL_METHOD)
            .unwrap_or_else(|| self.request_method())
    }

    /// Body carries form data: a form media type, or a POST without any type
    pub fn form_data(&self) -> bool {
        match self.media_type() {
            None => self.effective_method() == "POST",
            Some(mt) => FORM_DATA_MEDIA_TYPES.contains(&mt.as_str()),
        }
    }

    /// Body is a multipart type that is parsed too, though not a form
    pub fn parseable_data(&self) -> bool {
        self.media_type()
            .map_or(false, |mt| PARSEABLE_DATA_MEDIA_TYPES.contains(&mt.as_str()))
    }

    // ========================================================================
    // Scheme and authority
    // ========================================================================

    pub fn scheme(&self) -> String {
        if self.env.get_str(env::HTTPS) == Some("on") {
            return "https".into();
        }
        if self.env.get_str(env::HTTP_X_FORWARDED_SSL) == Some("on") {
            return "https".into();
        }
        if let Some(scheme) = self.env.get_str(env::HTTP_X_FORWARDED_SCHEME).filter(|s| !s.is_empty()) {
            return scheme.trim().to_ascii_lowercase();
        }
        if let Some(proto) = self.env.get_str(env::HTTP_X_FORWARDED_PROTO) {
            if let Some(first) = proto.split(',').map(str::trim).find(|s| !s.is_empty()) {
                return first.to_ascii_lowercase();
            }
        }
        self.env.get_str(env::TRELLIS_URL_SCHEME).unwrap_or("http").to_string()
    }

    pub fn is_ssl(&self) -> bool {
        self.scheme() == "https"
    }

    /// Raw `host[:port]` as seen by the client
    pub fn authority(&self) -> String {
        if let Some(forwarded) = self.env.get_str(env::HTTP_X_FORWARDED_HOST) {
            if let Some(last) = forwarded.split(',').map(str::trim).filter(|s| !s.is_empty()).last() {
                return last.to_string();
            }
        }
        if let Some(host) = self.env.get_str(env::HTTP_HOST).filter(|h| !h.is_empty()) {
            return host.to_string();
        }
        let name = self.str_or_empty(env::SERVER_NAME);
        match self.env.get_str(env::SERVER_PORT).filter(|p| !p.is_empty()) {
            Some(port) => format!("{}:{}", name, port),
            None => name.to_string(),
        }
    }

    pub fn host(&self) -> String {
        let authority = self.authority();
        split_authority(&authority).0.to_string()
    }

    pub fn port(&self) -> Option<u16> {
        let authority = self.authority();
        if let Some(port) = split_authority(&authority).1 {
            return Some(port);
        }
        if let Some(port) = self.env.get_str(env::HTTP_X_FORWARDED_PORT).and_then(|p| p.trim().parse().ok()) {
            return Some(port);
        }
        let forwarded =
            self.env.contains(env::HTTP_X_FORWARDED_HOST) || self.env.contains(env::HTTP_X_FORWARDED_PROTO);
        if !forwarded {
            if let Some(port) = self.env.get_str(env::SERVER_PORT).and_then(|p| p.trim().parse().ok()) {
                return Some(port);
            }
        }
        default_port(&self.scheme())
    }

    /// Host with the port appended unless it is the scheme default
    pub fn host_with_port(&self) -> String {
        let host = self.host();
        match self.port() {
            Some(port) if default_port(&self.scheme()) != Some(port) => format!("{}:{}", host, port),
            _ => host,
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.host_with_port())
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.base_url(), self.fullpath())
    }

    /// Client address, skipping trusted proxies
    pub fn ip(&self) -> Option<String> {
        let remote = self.env.get_str(env::REMOTE_ADDR);
        if let Some(addr) = split_addresses(remote).into_iter().find(|a| !is_trusted_proxy(a)) {
            return Some(addr.to_string());
        }
        let forwarded: Vec<&str> = split_addresses(self.env.get_str(env::HTTP_X_FORWARDED_FOR))
            .into_iter()
            .map(strip_port)
            .collect();
        if let Some(addr) = forwarded.iter().rev().find(|a| !is_trusted_proxy(a)) {
            return Some(addr.to_string());
        }
        remote.map(str::to_string)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.env.header("User-Agent")
    }

    pub fn referer(&self) -> Option<&str> {
        self.env.header("Referer")
    }

    pub fn is_xhr(&self) -> bool {
        self.env.header("X-Requested-With") == Some("XMLHttpRequest")
    }

    // ========================================================================
    // Cookies and parameters
    // ========================================================================

    /// Request cookies, first occurrence of a name winning
    pub fn cookies(&mut self) -> &BTreeMap<String, String> {
        let raw = self.env.get_str(env::HTTP_COOKIE).unwrap_or("").to_string();
        let fresh = self.env.get_str(env::TRELLIS_REQUEST_COOKIE_STRING) == Some(raw.as_str())
            && self.env.ext::<BTreeMap<String, String>>(env::TRELLIS_REQUEST_COOKIE_HASH).is_some();
        if !fresh {
            let cookies = parse_cookies(&raw);
            self.env.insert_ext(env::TRELLIS_REQUEST_COOKIE_HASH, cookies);
            self.env.set_str(env::TRELLIS_REQUEST_COOKIE_STRING, raw);
        }
        self.env
            .ext::<BTreeMap<String, String>>(env::TRELLIS_REQUEST_COOKIE_HASH)
            .unwrap_or(&NO_COOKIES)
    }

    fn load_get(&mut self) -> Result<()> {
        let qs = self.query_string().to_string();
        let fresh = self.env.get_str(env::TRELLIS_REQUEST_QUERY_STRING) == Some(qs.as_str())
            && self.env.ext::<Params>(env::TRELLIS_REQUEST_QUERY_HASH).is_some();
        if !fresh {
            let params = self.parser.parse_nested_query_with(&qs, QUERY_SEPARATORS)?;
            self.env.insert_ext(env::TRELLIS_REQUEST_QUERY_HASH, params);
            self.env.set_str(env::TRELLIS_REQUEST_QUERY_STRING, qs);
            self.merged = None;
        }
        Ok(())
    }

    /// Query string parameters
    pub fn get_params(&mut self) -> Result<&Params> {
        self.load_get()?;
        self.env
            .ext::<Params>(env::TRELLIS_REQUEST_QUERY_HASH)
            .ok_or_else(|| Error::Internal("query cache missing".into()))
    }

    fn form_cached(&mut self) -> bool {
        let cached_id = self.env.ext::<u64>(env::TRELLIS_REQUEST_FORM_INPUT).copied();
        let current_id = self.env.input_mut().map(|i| i.id());
        cached_id.is_some()
            && cached_id == current_id
            && self.env.ext::<Params>(env::TRELLIS_REQUEST_FORM_HASH).is_some()
    }

    fn load_post(&mut self) -> Result<()> {
        if self.env.input_mut().is_none() {
            return Err(Error::contract("missing trellis.input"));
        }
        if self.form_cached() {
            return Ok(());
        }
        self.merged = None;

        if !(self.form_data() || self.parseable_data()) {
            let id = self.env.input_mut().map(|i| i.id()).unwrap_or_default();
            self.env.insert_ext(env::TRELLIS_REQUEST_FORM_HASH, Params::new());
            self.env.insert_ext(env::TRELLIS_REQUEST_FORM_INPUT, id);
            return Ok(());
        }

        let content_type = self.content_type().unwrap_or("").to_string();
        let content_length = self.content_length();

        let multipart = {
            let config = &self.multipart;
            let input = self
                .env
                .input_mut()
                .ok_or_else(|| Error::contract("missing trellis.input"))?;
            parse_multipart(&mut *input, &content_type, content_length, config)?
        };

        let params = match multipart {
            Some(form) => {
                if !form.tempfiles.is_empty() {
                    self.tempfiles().extend(form.tempfiles);
                }
                form.params
            }
            None => {
                let input = self
                    .env
                    .input_mut()
                    .ok_or_else(|| Error::contract("missing trellis.input"))?;
                let mut raw = Vec::new();
                match content_length {
                    Some(len) => input.by_ref().take(len).read_to_end(&mut raw)?,
                    None => input.read_to_end(&mut raw)?,
                };
                if raw.last() == Some(&0) {
                    raw.pop();
                }
                let form_vars = String::from_utf8_lossy(&raw).into_owned();
                let params = self.parser.parse_nested_query_with(&form_vars, FORM_SEPARATORS)?;
                // Put the consumed bytes back for downstream readers
                self.env.set_input(Input::from_bytes(raw));
                self.env.set_str(env::TRELLIS_REQUEST_FORM_VARS, form_vars);
                params
            }
        };

        let id = self.env.input_mut().map(|i| i.id()).unwrap_or_default();
        self.env.insert_ext(env::TRELLIS_REQUEST_FORM_HASH, params);
        self.env.insert_ext(env::TRELLIS_REQUEST_FORM_INPUT, id);
        Ok(())
    }

    /// Body parameters (urlencoded or multipart)
    pub fn post_params(&mut self) -> Result<&Params> {
        self.load_post()?;
        self.env
            .ext::<Params>(env::TRELLIS_REQUEST_FORM_HASH)
            .ok_or_else(|| Error::Internal("form cache missing".into()))
    }

    /// Query and body parameters merged, body winning on collisions
    pub fn params(&mut self) -> Result<&Params> {
        self.load_get()?;
        let has_input = self.env.input_mut().is_some();
        if has_input {
            self.load_post()?;
        }
        if self.merged.is_none() {
            let mut merged = self
                .env
                .ext::<Params>(env::TRELLIS_REQUEST_QUERY_HASH)
                .cloned()
                .unwrap_or_default();
            if let Some(post) = self.env.ext::<Params>(env::TRELLIS_REQUEST_FORM_HASH) {
                merged.merge(post);
            }
            self.merged = Some(merged);
        }
        self.merged
            .as_ref()
            .ok_or_else(|| Error::Internal("params cache missing".into()))
    }

    /// Set `key` wherever it already lives (query and/or body), else in the query
    pub fn update_param(&mut self, key: &str, value: impl Into<Param>) -> Result<()> {
        let value = value.into();
        self.load_get()?;
        if self.env.input_mut().is_some() {
            self.load_post()?;
        }
        let mut found = false;
        if let Some(post) = self.env.ext_mut::<Params>(env::TRELLIS_REQUEST_FORM_HASH) {
            if post.contains_key(key) {
                post.insert(key, value.clone());
                found = true;
            }
        }
        if let Some(get) = self.env.ext_mut::<Params>(env::TRELLIS_REQUEST_QUERY_HASH) {
            if get.contains_key(key) || !found {
                get.insert(key, value);
            }
        }
        self.merged = None;
        Ok(())
    }

    /// Remove `key` from query and body, returning the body value if both had it
    pub fn delete_param(&mut self, key: &str) -> Result<Option<Param>> {
        self.load_get()?;
        if self.env.input_mut().is_some() {
            self.load_post()?;
        }
        let post = self
            .env
            .ext_mut::<Params>(env::TRELLIS_REQUEST_FORM_HASH)
            .and_then(|p| p.remove(key));
        let get = self
            .env
            .ext_mut::<Params>(env::TRELLIS_REQUEST_QUERY_HASH)
            .and_then(|p| p.remove(key));
        self.merged = None;
        Ok(post.or(get))
    }

    /// Registry of uploads opened for this request
    pub fn tempfiles(&mut self) -> TempfileRegistry {
        if let Some(registry) = self.env.ext::<TempfileRegistry>(env::TRELLIS_TEMPFILES) {
            return registry.clone();
        }
        let registry = TempfileRegistry::new();
        self.env.insert_ext(env::TRELLIS_TEMPFILES, registry.clone());
        registry
    }

    /// Session installed by the session middleware
    #[cfg(feature = "sessions")]
    pub fn session(&self) -> Option<crate::session::Session> {
        self.env.ext::<crate::session::Session>(env::TRELLIS_SESSION).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ErrorStream;
    use crate::multipart::{memory_tempfile_factory, UploadedFile};

    fn base_env() -> Env {
        let mut env = Env::new();
        env.set_str(env::REQUEST_METHOD, "GET");
        env.set_str(env::SCRIPT_NAME, "");
        env.set_str(env::PATH_INFO, "/");
        env.set_str(env::QUERY_STRING, "");
        env.set_str(env::SERVER_NAME, "example.org");
        env.set_str(env::SERVER_PORT, "80");
        env.set_str(env::TRELLIS_URL_SCHEME, "http");
        env.set_input(Input::empty());
        env.set_errors(ErrorStream::buffer());
        env
    }

    fn post_env(content_type: Option<&str>, body: &str) -> Env {
        let mut env = base_env();
        env.set_str(env::REQUEST_METHOD, "POST");
        if let Some(ct) = content_type {
            env.set_str(env::CONTENT_TYPE, ct);
        }
        env.set_str(env::CONTENT_LENGTH, body.len().to_string());
        env.set_input(Input::from_bytes(body.as_bytes().to_vec()));
        env
    }

    #[test]
    fn test_scheme_precedence() {
        let mut env = base_env();
        assert_eq!(Request::new(&mut env).scheme(), "http");

        env.set_str(env::HTTP_X_FORWARDED_PROTO, "https, http");
        assert_eq!(Request::new(&mut env).scheme(), "https");

        env.set_str(env::HTTP_X_FORWARDED_SCHEME, "wss");
        assert_eq!(Request::new(&mut env).scheme(), "wss");

        env.set_str(env::HTTP_X_FORWARDED_SSL, "on");
        assert_eq!(Request::new(&mut env).scheme(), "https");

        let mut env = base_env();
        env.set_str(env::HTTPS, "on");
        let req = Request::new(&mut env);
        assert!(req.is_ssl());
    }

    #[test]
    fn test_host_and_port() {
        let mut env = base_env();
        let req = Request::new(&mut env);
        assert_eq!(req.host(), "example.org");
        assert_eq!(req.port(), Some(80));
        assert_eq!(req.host_with_port(), "example.org");
        drop(req);

        env.set_str(env::HTTP_HOST, "example.com:8080");
        let req = Request::new(&mut env);
        assert_eq!(req.host(), "example.com");
        assert_eq!(req.port(), Some(8080));
        assert_eq!(req.url(), "http://example.com:8080/");
        drop(req);

        env.set_str(env::HTTP_X_FORWARDED_HOST, "proxy.a, app.example.net");
        env.set_str(env::HTTP_X_FORWARDED_PROTO, "https");
        let req = Request::new(&mut env);
        assert_eq!(req.host(), "app.example.net");
        assert_eq!(req.port(), Some(443));
        assert_eq!(req.base_url(), "https://app.example.net");
        drop(req);

        env.set_str(env::HTTP_X_FORWARDED_HOST, "[::1]:3000");
        let req = Request::new(&mut env);
        assert_eq!(req.host(), "[::1]");
        assert_eq!(req.port(), Some(3000));
    }

    #[test]
    fn test_ip() {
        let mut env = base_env();
        env.set_str(env::REMOTE_ADDR, "1.2.3.4");
        assert_eq!(Request::new(&mut env).ip().as_deref(), Some("1.2.3.4"));

        env.set_str(env::REMOTE_ADDR, "127.0.0.1");
        env.set_str(env::HTTP_X_FORWARDED_FOR, "3.4.5.6, 10.0.0.1, 2.3.4.5:8080, 192.168.0.7");
        assert_eq!(Request::new(&mut env).ip().as_deref(), Some("2.3.4.5"));

        env.set_str(env::HTTP_X_FORWARDED_FOR, "10.0.0.1, fd12::1");
        assert_eq!(Request::new(&mut env).ip().as_deref(), Some("127.0.0.1"));

        assert!(is_trusted_proxy("unix:/tmp/sock"));
        assert!(is_trusted_proxy("172.16.0.1"));
        assert!(!is_trusted_proxy("172.32.0.1"));
        assert!(is_trusted_proxy("::1"));
    }

    #[test]
    fn test_paths() {
        let mut env = base_env();
        env.set_str(env::SCRIPT_NAME, "/app");
        env.set_str(env::PATH_INFO, "/users");
        env.set_str(env::QUERY_STRING, "a=1");
        let req = Request::new(&mut env);
        assert_eq!(req.path(), "/app/users");
        assert_eq!(req.fullpath(), "/app/users?a=1");
    }

    #[test]
    fn test_media_type() {
        let mut env = post_env(Some("Text/HTML; Charset=\"UTF-8\"; q=1"), "");
        let req = Request::new(&mut env);
        assert_eq!(req.media_type().as_deref(), Some("text/html"));
        assert_eq!(req.content_charset().as_deref(), Some("UTF-8"));
        assert!(!req.form_data());
    }

    #[test]
    fn test_get_params_cached_by_query_string() {
        let mut env = base_env();
        env.set_str(env::QUERY_STRING, "a=1;b[]=2&b[]=3");
        {
            let mut req = Request::new(&mut env);
            let params = req.get_params().unwrap();
            assert_eq!(params.str("a"), Some("1"));
            assert_eq!(params.get("b").and_then(Param::as_array).map(|a| a.len()), Some(2));
        }
        env.set_str(env::QUERY_STRING, "a=9");
        let mut req = Request::new(&mut env);
        assert_eq!(req.get_params().unwrap().str("a"), Some("9"));
    }

    #[test]
    fn test_post_urlencoded() {
        let mut env = post_env(Some("application/x-www-form-urlencoded"), "a=1&c=x%20y\0");
        env.set_str(env::QUERY_STRING, "a=0&b=2");
        let mut req = Request::new(&mut env);
        assert_eq!(req.post_params().unwrap().str("c"), Some("x y"));
        let params = req.params().unwrap();
        assert_eq!(params.str("a"), Some("1"));
        assert_eq!(params.str("b"), Some("2"));

        // Body is still readable downstream
        let mut rest = String::new();
        req.env_mut().input_mut().unwrap().read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "a=1&c=x%20y");
    }

    #[test]
    fn test_post_without_content_type_is_form() {
        let mut env = post_env(None, "x=1");
        let mut req = Request::new(&mut env);
        assert_eq!(req.post_params().unwrap().str("x"), Some("1"));
    }

    #[test]
    fn test_post_other_media_type_is_empty() {
        let mut env = post_env(Some("application/json"), "{\"x\":1}");
        let mut req = Request::new(&mut env);
        assert!(req.post_params().unwrap().is_empty());
    }

    #[test]
    fn test_post_missing_input() {
        let mut env = post_env(None, "x=1");
        env.remove(env::TRELLIS_INPUT);
        let err = Request::new(&mut env).post_params().unwrap_err();
        assert!(matches!(err, Error::Contract(_)));
    }

    #[test]
    fn test_post_multipart_registers_tempfiles() {
        let body = "--AaB03x\r\nContent-Disposition: form-data; name=\"foo\"\r\n\r\nbar\r\n--AaB03x\r\nContent-Disposition: form-data; name=\"f\"; filename=\"x.txt\"\r\nContent-Type: text/plain\r\n\r\nhi\r\n--AaB03x--\r\n";
        let mut env = post_env(Some("multipart/form-data; boundary=AaB03x"), body);
        let config = MultipartConfig::default().tempfile_factory(memory_tempfile_factory());
        let mut req = Request::new(&mut env).with_multipart(config);
        let params = req.post_params().unwrap();
        assert_eq!(params.str("foo"), Some("bar"));
        let file: UploadedFile = params.get("f").and_then(Param::as_file).cloned().unwrap();
        assert_eq!(file.read_to_end().unwrap(), b"hi");

        let registry = req.tempfiles();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.close_all(), 1);
        assert!(file.is_closed());
    }

    #[test]
    fn test_update_and_delete_param() {
        let mut env = post_env(Some("application/x-www-form-urlencoded"), "p=1&both=post");
        env.set_str(env::QUERY_STRING, "g=1&both=get");
        let mut req = Request::new(&mut env);

        req.update_param("p", "2").unwrap();
        req.update_param("new", "n").unwrap();
        assert_eq!(req.post_params().unwrap().str("p"), Some("2"));
        assert_eq!(req.get_params().unwrap().str("new"), Some("n"));
        assert_eq!(req.params().unwrap().str("new"), Some("n"));

        let removed = req.delete_param("both").unwrap();
        assert_eq!(removed.as_ref().and_then(Param::as_str), Some("post"));
        assert!(!req.params().unwrap().contains_key("both"));
    }

    #[test]
    fn test_cookies() {
        let mut env = base_env();
        env.set_str(env::HTTP_COOKIE, "a=1; b=2; a=3");
        let mut req = Request::new(&mut env);
        assert_eq!(req.cookies().get("a").map(String::as_str), Some("1"));
        req.env_mut().set_str(env::HTTP_COOKIE, "a=4");
        assert_eq!(req.cookies().get("a").map(String::as_str), Some("4"));
    }
}
