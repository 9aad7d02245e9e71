//! Upload cleanup
//!
//! Installs the per-request upload registry and closes every file in it
//! once the response body is released. When downstream fails the files are
//! closed before the error propagates.

use super::Middleware;
use crate::env::{self, Env};
use crate::handler::Handler;
use crate::multipart::TempfileRegistry;
use crate::{Response, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct TempfileReaper;

impl TempfileReaper {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for TempfileReaper {
    fn call(&self, env: &mut Env, next: &dyn Handler) -> Result<Response> {
        let registry = match env.ext::<TempfileRegistry>(env::TRELLIS_TEMPFILES) {
            Some(registry) => registry.clone(),
            None => {
                let registry = TempfileRegistry::new();
                env.insert_ext(env::TRELLIS_TEMPFILES, registry.clone());
                registry
            }
        };

        match next.call(env) {
            Ok(mut res) => {
                res.body.on_close(move || {
                    let closed = registry.close_all();
                    if closed > 0 {
                        tracing::debug!(closed, "reaped uploads");
                    }
                });
                Ok(res)
            }
            Err(e) => {
                registry.close_all();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::UploadedFile;
    use crate::request::Request;
    use crate::Error;

    fn upload_app(fail: bool) -> impl Handler {
        move |env: &mut Env| -> Result<Response> {
            let registry = Request::new(env).tempfiles();
            registry.register(UploadedFile::from_bytes("a.txt", "text/plain", "data"));
            if fail {
                Err(Error::Internal("boom".into()))
            } else {
                Ok(Response::text("ok"))
            }
        }
    }

    fn registered(env: &Env) -> TempfileRegistry {
        env.ext::<TempfileRegistry>(env::TRELLIS_TEMPFILES).unwrap().clone()
    }

    #[test]
    fn test_closes_on_body_release() {
        let mut env = Env::new();
        let mut res = TempfileReaper.call(&mut env, &upload_app(false)).unwrap();
        let registry = registered(&env);
        assert_eq!(registry.len(), 1);

        res.body.close();
        assert_eq!(registry.close_all(), 0);
    }

    #[test]
    fn test_closes_on_error() {
        let mut env = Env::new();
        assert!(TempfileReaper.call(&mut env, &upload_app(true)).is_err());
        assert_eq!(registered(&env).close_all(), 0);
    }
}
