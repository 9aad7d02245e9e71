//! Content-Length for buffered bodies

use super::Middleware;
use crate::env::Env;
use crate::handler::Handler;
use crate::{Response, Result};

/// Set Content-Length when the body size is known up front
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentLength;

impl ContentLength {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for ContentLength {
    fn call(&self, env: &mut Env, next: &dyn Handler) -> Result<Response> {
        let mut res = next.call(env)?;
        if !res.status.no_entity_body()
            && !res.headers.contains("content-length")
            && !res.headers.contains("transfer-encoding")
        {
            if let Some(len) = res.body.buffered_len() {
                res.headers.set("content-length", len.to_string());
            }
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::response::StatusCode;
    use bytes::Bytes;

    fn run(res: fn() -> Response) -> Response {
        let app = move |_: &mut Env| -> Result<Response> { Ok(res()) };
        ContentLength.call(&mut Env::new(), &app).unwrap()
    }

    #[test]
    fn test_sets_length_for_buffered_body() {
        let res = run(|| Response::ok().with_body(Body::chunks(["ab", "cde"])));
        assert_eq!(res.header("content-length"), Some("5"));
    }

    #[test]
    fn test_leaves_streams_and_no_entity_statuses() {
        let res = run(|| {
            Response::ok().with_body(Body::stream(vec![Ok(Bytes::from("x"))].into_iter()))
        });
        assert_eq!(res.header("content-length"), None);

        let res = run(|| Response::new(StatusCode::NO_CONTENT));
        assert_eq!(res.header("content-length"), None);

        let res = run(|| Response::text("abc").with_header("transfer-encoding", "chunked"));
        assert_eq!(res.header("content-length"), None);
    }
}
