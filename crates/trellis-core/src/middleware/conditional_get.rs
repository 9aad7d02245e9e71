//! Conditional GET
//!
//! Turns `200 OK` answers to GET/HEAD into `304 Not Modified` when the
//! client's `If-None-Match` or `If-Modified-Since` shows its cached copy is
//! still fresh. `If-None-Match` takes priority.

use super::Middleware;
use crate::env::{self, Env};
use crate::handler::Handler;
use crate::headers::Headers;
use crate::response::StatusCode;
use crate::utils::parse_http_date;
use crate::{Response, Result};
use std::sync::Arc;

/// Validators known before the app runs
#[derive(Debug, Clone, Default)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

type ValidatorFn = Arc<dyn Fn(&Env) -> Option<Validators> + Send + Sync>;

/// Conditional GET middleware
#[derive(Clone, Default)]
pub struct ConditionalGet {
    validator: Option<ValidatorFn>,
}

impl ConditionalGet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve validators up front; a fresh match answers 304 without
    /// calling downstream
    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Env) -> Option<Validators> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }
}

/// Whether the response described by `headers` is fresh for this request
pub fn is_fresh(env: &Env, headers: &Headers) -> bool {
    if let Some(none_match) = env.get_str(env::HTTP_IF_NONE_MATCH) {
        return etag_matches(none_match, headers.get("etag"));
    }
    match env.get_str(env::HTTP_IF_MODIFIED_SINCE).and_then(parse_http_date) {
        Some(since) => headers
            .get("last-modified")
            .and_then(parse_http_date)
            .map_or(false, |modified| since >= modified),
        None => false,
    }
}

fn etag_matches(none_match: &str, etag: Option<&str>) -> bool {
    let Some(etag) = etag else {
        return false;
    };
    none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == etag)
}

fn not_modified(mut res: Response) -> Response {
    res.status = StatusCode::NOT_MODIFIED;
    res.headers.delete("content-type");
    res.headers.delete("content-length");
    // Drop the content but keep release hooks until the listener closes
    res.body = std::mem::take(&mut res.body).wrap(|_| std::iter::empty());
    res
}

impl Middleware for ConditionalGet {
    fn call(&self, env: &mut Env, next: &dyn Handler) -> Result<Response> {
        let method = env.get_str(env::REQUEST_METHOD).unwrap_or("");
        if method != "GET" && method != "HEAD" {
            return next.call(env);
        }

        if let Some(validators) = self.validator.as_ref().and_then(|f| f(env)) {
            let mut headers = Headers::new();
            if let Some(etag) = validators.etag {
                headers.set("etag", etag);
            }
            if let Some(last_modified) = validators.last_modified {
                headers.set("last-modified", last_modified);
            }
            if is_fresh(env, &headers) {
                tracing::debug!("fresh before dispatch");
                let mut res = Response::new(StatusCode::NOT_MODIFIED);
                res.headers = headers;
                return Ok(res);
            }
        }

        let res = next.call(env)?;
        if res.status == StatusCode::OK && is_fresh(env, &res.headers) {
            return Ok(not_modified(res));
        }
        Ok(res)
    }
}
