//! HTTP method override
//!
//! Browsers only submit forms with GET and POST. A POST carrying a `_method`
//! form field or an `X-HTTP-Method-Override` header is rewritten to the
//! named method before it reaches the app.

use super::Middleware;
use crate::env::{self, Env};
use crate::handler::Handler;
use crate::request::Request;
use crate::{Response, Result};

/// Methods an override may select
pub const HTTP_METHODS: &[&str] = &["GET", "HEAD", "PUT", "POST", "DELETE", "OPTIONS", "PATCH", "LINK", "UNLINK"];

/// Form field carrying the override
pub const METHOD_OVERRIDE_PARAM_KEY: &str = "_method";

const METHOD_OVERRIDE_HEADER: &str = "HTTP_X_HTTP_METHOD_OVERRIDE";

/// Rewrite `REQUEST_METHOD` for overridden POSTs
#[derive(Debug, Clone)]
pub struct MethodOverride {
    allowed_methods: Vec<String>,
}

impl Default for MethodOverride {
    fn default() -> Self {
        Self {
            allowed_methods: vec!["POST".to_string()],
        }
    }
}

impl MethodOverride {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request methods that may be overridden
    pub fn allowed_methods(mut self, methods: &[&str]) -> Self {
        self.allowed_methods = methods.iter().map(|m| m.to_ascii_uppercase()).collect();
        self
    }

    fn method_override(env: &mut Env) -> Result<Option<String>> {
        let parsed = Request::new(env)
            .post_params()
            .map(|params| params.str(METHOD_OVERRIDE_PARAM_KEY).map(str::to_string));
        let from_param = match parsed {
            Ok(method) => method,
            Err(e) if e.is_client_error() => {
                env_diagnostic(env, "Invalid or incomplete POST params", &e);
                None
            }
            Err(crate::Error::Io(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(from_param
            .or_else(|| env.get_str(METHOD_OVERRIDE_HEADER).map(str::to_string))
            .map(|m| m.to_ascii_uppercase()))
    }
}

fn env_diagnostic(env: &Env, message: &str, error: &crate::Error) {
    tracing::warn!(error = %error, "{}", message);
    env.errors().puts(message);
}

impl Middleware for MethodOverride {
    fn call(&self, env: &mut Env, next: &dyn Handler) -> Result<Response> {
        let method = env.get_str(env::REQUEST_METHOD).unwrap_or("").to_string();
        if self.allowed_methods.iter().any(|m| *m == method) {
            if let Some(target) = Self::method_override(env)? {
                if HTTP_METHODS.contains(&target.as_str()) {
                    tracing::debug!(from = %method, to = %target, "method override");
                    env.set_str(env::TRELLIS_METHODOVERRIDE_ORIGINAL_METHOD, method);
                    env.set_str(env::REQUEST_METHOD, target);
                }
            }
        }
        next.call(env)
    }
}
