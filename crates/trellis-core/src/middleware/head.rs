//! HEAD request handling
//!
//! Downstream apps answer HEAD like GET; the body is released and dropped.

use super::Middleware;
use crate::body::Body;
use crate::env::{self, Env};
use crate::handler::Handler;
use crate::{Response, Result};

/// Strip response bodies for HEAD requests
#[derive(Debug, Clone, Copy, Default)]
pub struct Head;

impl Head {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for Head {
    fn call(&self, env: &mut Env, next: &dyn Handler) -> Result<Response> {
        let mut res = next.call(env)?;
        if env.get_str(env::REQUEST_METHOD) == Some("HEAD") {
            res.body.close();
            res.body = Body::empty();
        }
        Ok(res)
    }
}
