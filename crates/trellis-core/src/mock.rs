//! In-process request driver for tests
//!
//! `MockRequest` builds a complete environment for a URI and runs an app
//! against it without any listener, returning the buffered response.
//!
//! ```ignore
//! let res = MockRequest::new(app).get("/search?q=rust")?;
//! assert_eq!(res.status, StatusCode::OK);
//! ```

use crate::env::{self, Env, ErrorStream, Input};
use crate::handler::{BoxHandler, Handler, Middleware};
use crate::headers::Headers;
use crate::middleware::Lint;
use crate::multipart::{build_multipart, MULTIPART_BOUNDARY};
use crate::query::{Params, QueryParser};
use crate::response::StatusCode;
use crate::utils::build_nested_query;
use crate::{Error, Result};
use std::sync::Arc;
use url::Url;

const DEFAULT_HOST: &str = "example.org";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Per-request options for [`MockRequest`]
#[derive(Debug, Default)]
pub struct MockOptions {
    /// Defaults to GET
    pub method: Option<String>,
    /// Raw request body
    pub input: Option<Vec<u8>>,
    /// Form params: merged into the query for GET, encoded as the body
    /// otherwise (multipart when a file is present)
    pub params: Option<Params>,
    pub script_name: Option<String>,
    /// Headers, as `name: value`
    pub headers: Vec<(String, String)>,
    /// Raw env entries, applied last
    pub env: Vec<(String, String)>,
    /// Validate env and response with [`Lint`]
    pub lint: bool,
    /// Fail when the app writes to the error stream
    pub fatal: bool,
}

impl MockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn script_name(mut self, script_name: impl Into<String>) -> Self {
        self.script_name = Some(script_name.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn lint(mut self) -> Self {
        self.lint = true;
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

/// Buffered response of a mock request
#[derive(Debug)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Everything the app wrote to the error stream
    pub errors: String,
}

impl MockResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }
}

/// Drives an app with synthetic requests
#[derive(Clone)]
pub struct MockRequest {
    app: BoxHandler,
}

impl MockRequest {
    pub fn new(app: impl Handler + 'static) -> Self {
        Self { app: Arc::new(app) }
    }

    pub fn get(&self, uri: &str) -> Result<MockResponse> {
        self.request("GET", uri, MockOptions::new())
    }

    pub fn post(&self, uri: &str, options: MockOptions) -> Result<MockResponse> {
        self.request("POST", uri, options)
    }

    pub fn put(&self, uri: &str, options: MockOptions) -> Result<MockResponse> {
        self.request("PUT", uri, options)
    }

    pub fn patch(&self, uri: &str, options: MockOptions) -> Result<MockResponse> {
        self.request("PATCH", uri, options)
    }

    pub fn delete(&self, uri: &str, options: MockOptions) -> Result<MockResponse> {
        self.request("DELETE", uri, options)
    }

    pub fn head(&self, uri: &str) -> Result<MockResponse> {
        self.request("HEAD", uri, MockOptions::new())
    }

    pub fn request(&self, method: &str, uri: &str, options: MockOptions) -> Result<MockResponse> {
        let lint = options.lint;
        let fatal = options.fatal;
        let mut env = Self::env_for(uri, options.method(method))?;
        let errors = env.errors();

        let mut res = if lint {
            Lint::new().call(&mut env, self.app.as_ref())?
        } else {
            self.app.call(&mut env)?
        };
        let body = res.body_bytes()?.to_vec();
        res.body.close();

        let errors = errors.contents();
        if fatal && !errors.is_empty() {
            return Err(Error::contract(format!("error stream written: {}", errors.trim_end())));
        }
        Ok(MockResponse {
            status: res.status,
            headers: res.headers,
            body,
            errors,
        })
    }

    /// Environment for `uri`; relative URIs are resolved against example.org
    pub fn env_for(uri: &str, options: MockOptions) -> Result<Env> {
        let url = match Url::parse(uri) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("http://{}", DEFAULT_HOST))
                .and_then(|base| base.join(uri))
                .map_err(|e| Error::InvalidParameter(format!("mock uri {:?}: {}", uri, e)))?,
            Err(e) => return Err(Error::InvalidParameter(format!("mock uri {:?}: {}", uri, e))),
        };

        let method = options.method.unwrap_or_else(|| "GET".to_string()).to_ascii_uppercase();
        let mut env = Env::new();
        env.set_str(env::REQUEST_METHOD, method.as_str());
        env.set_str(env::SERVER_NAME, url.host_str().unwrap_or(DEFAULT_HOST));
        env.set_str(env::SERVER_PORT, url.port_or_known_default().unwrap_or(80).to_string());
        env.set_str(env::SERVER_PROTOCOL, "HTTP/1.1");
        env.set_str(env::SCRIPT_NAME, options.script_name.unwrap_or_default());
        env.set_str(env::PATH_INFO, url.path());
        env.set_str(env::QUERY_STRING, url.query().unwrap_or(""));
        env.set_str(env::TRELLIS_URL_SCHEME, url.scheme());
        if url.scheme() == "https" {
            env.set_str(env::HTTPS, "on");
        }
        env.set_bool(env::TRELLIS_MULTITHREAD, true);
        env.set_bool(env::TRELLIS_MULTIPROCESS, true);
        env.set_bool(env::TRELLIS_RUN_ONCE, false);
        env.set_errors(ErrorStream::buffer());

        for (name, value) in &options.headers {
            env.set_header(name, value.clone());
        }

        let mut input = options.input;
        if let Some(params) = options.params {
            if method == "GET" {
                let mut merged = QueryParser::new().parse_nested_query(url.query().unwrap_or(""))?;
                merged.merge(&params);
                env.set_str(env::QUERY_STRING, build_nested_query(&merged));
            } else if input.is_none() {
                let content_type = env.get_str(env::CONTENT_TYPE).unwrap_or(FORM_CONTENT_TYPE).to_string();
                let force = content_type.starts_with("multipart/");
                match build_multipart(&params, force)? {
                    Some(data) => {
                        env.set_str(
                            env::CONTENT_TYPE,
                            format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY),
                        );
                        input = Some(data);
                    }
                    None => {
                        env.set_str(env::CONTENT_TYPE, content_type);
                        input = Some(build_nested_query(&params).into_bytes());
                    }
                }
            }
        }

        let input = input.unwrap_or_default();
        env.set_str(env::CONTENT_LENGTH, input.len().to_string());
        env.set_input(Input::from_bytes(input));

        for (key, value) in options.env {
            env.set_str(key, value);
        }
        Ok(env)
    }
}
