//! Error translation
//!
//! Client input failures become plain-text 400/413 responses. Contract
//! violations propagate untouched. Anything else is logged and answered
//! with a 500.

use super::Middleware;
use crate::env::Env;
use crate::error::ErrorKind;
use crate::handler::Handler;
use crate::response::StatusCode;
use crate::{Response, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct Recover {
    expose_errors: bool,
}

impl Recover {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include the error message in 500 bodies
    pub fn expose_errors(mut self, expose: bool) -> Self {
        self.expose_errors = expose;
        self
    }
}

impl Middleware for Recover {
    fn call(&self, env: &mut Env, next: &dyn Handler) -> Result<Response> {
        let error = match next.call(env) {
            Ok(res) => return Ok(res),
            Err(e) => e,
        };

        match error.kind() {
            ErrorKind::Contract => Err(error),
            ErrorKind::MalformedInput | ErrorKind::ResourceLimit => {
                let status = error.status_hint().unwrap_or(StatusCode::BAD_REQUEST);
                tracing::warn!(error = %error, status = status.0, "rejected request");
                Ok(Response::plain(status, error.to_string()))
            }
            _ => {
                tracing::error!(error = %error, "request failed");
                env.errors().puts(&error.to_string());
                let message = if self.expose_errors {
                    error.to_string()
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR.reason_phrase().to_string()
                };
                Ok(Response::internal_error(&message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ErrorStream;
    use crate::Error;

    fn failing(error: fn() -> Error) -> impl Handler {
        move |_: &mut Env| -> Result<Response> { Err(error()) }
    }

    #[test]
    fn test_client_errors() {
        let mut env = Env::new();
        let res = Recover::new()
            .call(&mut env, &failing(|| Error::InvalidParameter("bad %".into())))
            .unwrap();
        assert_eq!(res.status, StatusCode::BAD_REQUEST);

        let res = Recover::new()
            .call(&mut env, &failing(|| Error::PartLimit { what: "files", limit: 2 }))
            .unwrap();
        assert_eq!(res.status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_contract_propagates() {
        let result = Recover::new().call(&mut Env::new(), &failing(|| Error::Contract("lint".into())));
        assert!(matches!(result, Err(Error::Contract(_))));
    }

    #[test]
    fn test_internal_errors() {
        let errors = ErrorStream::buffer();
        let mut env = Env::new();
        env.set_errors(errors.clone());
        let mut res = Recover::new()
            .call(&mut env, &failing(|| Error::Internal("db down".into())))
            .unwrap();
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body_bytes().unwrap(), "Internal Server Error");
        assert!(errors.contents().contains("db down"));
    }
}
