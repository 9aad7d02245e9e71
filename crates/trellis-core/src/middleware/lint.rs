//! Contract validation
//!
//! Development-time checker placed between a listener and an app (or
//! between two middlewares). Every violation fails with
//! [`Error::Contract`]; body problems surface as `InvalidData` IO errors
//! from the body iterator because they are only visible while streaming.

use super::Middleware;
use crate::body::BodyChunks;
use crate::env::{self, Env, EnvValue};
use crate::handler::Handler;
use crate::headers::Headers;
use crate::response::StatusCode;
use crate::{Error, Response, Result};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::Method;
use std::io;

const REQUIRED_KEYS: &[&str] = &[
    env::REQUEST_METHOD,
    env::SERVER_NAME,
    env::SERVER_PORT,
    env::QUERY_STRING,
    env::TRELLIS_INPUT,
    env::TRELLIS_ERRORS,
    env::TRELLIS_MULTITHREAD,
    env::TRELLIS_MULTIPROCESS,
    env::TRELLIS_RUN_ONCE,
    env::TRELLIS_URL_SCHEME,
];

const BOOL_KEYS: &[&str] = &[env::TRELLIS_MULTITHREAD, env::TRELLIS_MULTIPROCESS, env::TRELLIS_RUN_ONCE];

fn assert_that(cond: bool, message: impl FnOnce() -> String) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(Error::contract(message()))
    }
}

/// Lint middleware
#[derive(Debug, Clone, Copy, Default)]
pub struct Lint;

impl Lint {
    pub fn new() -> Self {
        Self
    }
}

// ============================================================================
// Environment
// ============================================================================

pub fn check_env(env: &Env) -> Result<()> {
    for key in REQUIRED_KEYS {
        assert_that(env.contains(key), || format!("env missing required key {}", key))?;
    }

    for key in env.keys() {
        if key.starts_with(env::RESERVED_PREFIX) {
            continue;
        }
        assert_that(matches!(env.get(key), Some(EnvValue::Str(_))), || {
            format!("env variable {} has non-string value", key)
        })?;
    }

    for key in ["HTTP_CONTENT_TYPE", "HTTP_CONTENT_LENGTH"] {
        assert_that(!env.contains(key), || {
            format!("env contains {}, use {}", key, key.trim_start_matches("HTTP_"))
        })?;
    }

    for key in BOOL_KEYS {
        assert_that(env.get_bool(key).is_some(), || format!("{} must be a boolean", key))?;
    }

    assert_that(matches!(env.get(env::TRELLIS_INPUT), Some(EnvValue::Input(_))), || {
        format!("{} must be an input stream", env::TRELLIS_INPUT)
    })?;
    assert_that(matches!(env.get(env::TRELLIS_ERRORS), Some(EnvValue::Errors(_))), || {
        format!("{} must be an error stream", env::TRELLIS_ERRORS)
    })?;

    let scheme = env.get_str(env::TRELLIS_URL_SCHEME).unwrap_or("");
    assert_that(scheme == "http" || scheme == "https", || {
        format!("{} unknown: {:?}", env::TRELLIS_URL_SCHEME, scheme)
    })?;

    let method = env.get_str(env::REQUEST_METHOD).unwrap_or("");
    assert_that(!method.is_empty() && Method::from_bytes(method.as_bytes()).is_ok(), || {
        format!("REQUEST_METHOD unknown: {:?}", method)
    })?;

    let script_name = env.get_str(env::SCRIPT_NAME);
    let path_info = env.get_str(env::PATH_INFO);
    if let Some(script_name) = script_name.filter(|s| !s.is_empty()) {
        assert_that(script_name.starts_with('/'), || {
            format!("SCRIPT_NAME must start with /: {:?}", script_name)
        })?;
        assert_that(script_name != "/", || {
            "SCRIPT_NAME cannot be \"/\", make it \"\" and PATH_INFO \"/\"".to_string()
        })?;
    }
    if let Some(path_info) = path_info.filter(|p| !p.is_empty()) {
        assert_that(path_info.starts_with('/') || (path_info == "*" && method == "OPTIONS"), || {
            format!("PATH_INFO must start with /: {:?}", path_info)
        })?;
    }
    assert_that(script_name.is_some() || path_info.is_some(), || {
        "one of SCRIPT_NAME or PATH_INFO must be set".to_string()
    })?;

    if let Some(length) = env.get_str(env::CONTENT_LENGTH) {
        assert_that(!length.is_empty() && length.bytes().all(|b| b.is_ascii_digit()), || {
            format!("invalid CONTENT_LENGTH: {:?}", length)
        })?;
    }

    Ok(())
}

// ============================================================================
// Response
// ============================================================================

pub fn check_status(status: StatusCode) -> Result<()> {
    assert_that(status.0 >= 100, || format!("status must be >= 100, got {}", status.0))
}

pub fn check_headers(headers: &Headers) -> Result<()> {
    for (name, value) in headers.iter() {
        assert_that(name != "status", || "header must not contain status".to_string())?;
        assert_that(
            HeaderName::from_bytes(name.as_bytes()).is_ok() && name.bytes().all(|b| !b.is_ascii_uppercase()),
            || format!("invalid header name: {:?}", name),
        )?;
        for line in value.split('\n') {
            assert_that(
                !line.contains('\0') && !line.contains('\r') && HeaderValue::from_str(line).is_ok(),
                || format!("invalid header value {}: {:?}", name, line),
            )?;
        }
    }
    Ok(())
}

fn forbids_content_type(status: StatusCode) -> bool {
    status.is_informational() || matches!(status.0, 201 | 204 | 304)
}

fn forbids_content_length(status: StatusCode) -> bool {
    status.is_informational() || matches!(status.0, 204 | 304)
}

pub fn check_content_headers(status: StatusCode, headers: &Headers) -> Result<()> {
    if forbids_content_type(status) {
        assert_that(!headers.contains("content-type"), || {
            format!("content-type header found in {} response, not allowed", status.0)
        })?;
    }
    if forbids_content_length(status) {
        assert_that(!headers.contains("content-length"), || {
            format!("content-length header found in {} response, not allowed", status.0)
        })?;
    }
    Ok(())
}

// ============================================================================
// Body
// ============================================================================

fn violation(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, Error::Contract(message).to_string())
}

struct LengthCheck {
    inner: BodyChunks,
    declared: Option<u64>,
    head: bool,
    seen: u64,
    done: bool,
}

impl Iterator for LengthCheck {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(chunk)) => {
                self.seen += chunk.len() as u64;
                Some(Ok(chunk))
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            None => {
                self.done = true;
                if self.head && self.seen > 0 {
                    return Some(Err(violation(
                        "response body was given for HEAD request, but should be empty".to_string(),
                    )));
                }
                match self.declared {
                    Some(declared) if !self.head && declared != self.seen => Some(Err(violation(format!(
                        "content-length header was {}, but should be {}",
                        declared, self.seen
                    )))),
                    _ => None,
                }
            }
        }
    }
}

impl Middleware for Lint {
    fn call(&self, env: &mut Env, next: &dyn Handler) -> Result<Response> {
        check_env(env)?;
        let head = env.get_str(env::REQUEST_METHOD) == Some("HEAD");

        let mut res = next.call(env)?;
        check_status(res.status)?;
        check_headers(&res.headers)?;
        check_content_headers(res.status, &res.headers)?;

        let declared = match res.headers.get("content-length") {
            Some(v) => Some(
                v.parse::<u64>()
                    .map_err(|_| Error::contract(format!("invalid content-length: {:?}", v)))?,
            ),
            None => None,
        };
        res.body = std::mem::take(&mut res.body).wrap(|inner| LengthCheck {
            inner,
            declared,
            head,
            seen: 0,
            done: false,
        });
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::env::{ErrorStream, Input};

    fn valid_env() -> Env {
        let mut env = Env::new();
        env.set_str(env::REQUEST_METHOD, "GET");
        env.set_str(env::SERVER_NAME, "example.org");
        env.set_str(env::SERVER_PORT, "80");
        env.set_str(env::QUERY_STRING, "");
        env.set_str(env::SCRIPT_NAME, "");
        env.set_str(env::PATH_INFO, "/");
        env.set_input(Input::empty());
        env.set_errors(ErrorStream::buffer());
        env.set_bool(env::TRELLIS_MULTITHREAD, true);
        env.set_bool(env::TRELLIS_MULTIPROCESS, false);
        env.set_bool(env::TRELLIS_RUN_ONCE, false);
        env.set_str(env::TRELLIS_URL_SCHEME, "http");
        env
    }

    fn contract_message(result: Result<()>) -> String {
        match result {
            Err(Error::Contract(msg)) => msg,
            other => panic!("expected contract violation, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_env() {
        assert!(check_env(&valid_env()).is_ok());
    }

    #[test]
    fn test_env_violations() {
        let mut env = valid_env();
        env.remove(env::SERVER_NAME);
        assert!(contract_message(check_env(&env)).contains("SERVER_NAME"));

        let mut env = valid_env();
        env.set_str(env::TRELLIS_URL_SCHEME, "ftp");
        assert!(contract_message(check_env(&env)).contains("url_scheme"));

        let mut env = valid_env();
        env.set_str("HTTP_CONTENT_TYPE", "text/plain");
        assert!(check_env(&env).is_err());

        let mut env = valid_env();
        env.set_str(env::SCRIPT_NAME, "/");
        assert!(check_env(&env).is_err());

        let mut env = valid_env();
        env.set_str(env::PATH_INFO, "foo");
        assert!(check_env(&env).is_err());

        let mut env = valid_env();
        env.set_str(env::CONTENT_LENGTH, "12a");
        assert!(check_env(&env).is_err());

        let mut env = valid_env();
        env.set_str(env::REQUEST_METHOD, "GE T");
        assert!(check_env(&env).is_err());

        let mut env = valid_env();
        env.set_bool("SOME_CGI_KEY", true);
        assert!(contract_message(check_env(&env)).contains("non-string"));

        let mut env = valid_env();
        env.set_str(env::TRELLIS_RUN_ONCE, "false");
        assert!(check_env(&env).is_err());
    }

    #[test]
    fn test_header_violations() {
        let headers: Headers = [("status", "200")].into_iter().collect();
        assert!(check_headers(&headers).is_err());

        let headers: Headers = [("bad name", "x")].into_iter().collect();
        assert!(check_headers(&headers).is_err());

        let headers: Headers = [("x-evil", "a\rb")].into_iter().collect();
        assert!(check_headers(&headers).is_err());

        let mut headers = Headers::new();
        headers.append("set-cookie", "a=1");
        headers.append("set-cookie", "b=2");
        assert!(check_headers(&headers).is_ok());
    }

    #[test]
    fn test_no_entity_headers() {
        let headers: Headers = [("content-type", "text/plain")].into_iter().collect();
        assert!(check_content_headers(StatusCode::NO_CONTENT, &headers).is_err());
        assert!(check_content_headers(StatusCode::CREATED, &headers).is_err());
        assert!(check_content_headers(StatusCode::OK, &headers).is_ok());

        let headers: Headers = [("content-length", "0")].into_iter().collect();
        assert!(check_content_headers(StatusCode::NOT_MODIFIED, &headers).is_err());
        assert!(check_content_headers(StatusCode::CREATED, &headers).is_ok());
        assert!(check_status(StatusCode(99)).is_err());
    }

    #[test]
    fn test_body_length_mismatch() {
        let app = |_: &mut Env| -> Result<Response> {
            Ok(Response::ok()
                .with_header("content-length", "10")
                .with_body(Body::from("short")))
        };
        let res = Lint.call(&mut valid_env(), &app).unwrap();
        let err = res.body.into_bytes().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let ok = |_: &mut Env| -> Result<Response> {
            Ok(Response::ok().with_header("content-length", "5").with_body(Body::from("exact")))
        };
        let res = Lint.call(&mut valid_env(), &ok).unwrap();
        assert_eq!(res.body.into_bytes().unwrap(), "exact");
    }

    #[test]
    fn test_rejects_bad_env_before_calling_app() {
        let app = |_: &mut Env| -> Result<Response> { panic!("app must not run") };
        let mut env = valid_env();
        env.remove(env::QUERY_STRING);
        assert!(matches!(Lint.call(&mut env, &app), Err(Error::Contract(_))));
    }
}
