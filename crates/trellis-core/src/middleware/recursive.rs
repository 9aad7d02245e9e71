//! Internal forwarding and sub-request includes
//!
//! An app wrapped in [`Recursive`] may answer [`Outcome::ForwardTo`] to have
//! the same request re-dispatched to another URL, or call [`include`] to
//! render another path of the same app as a GET sub-request. Forward
//! targets are paths below the current `SCRIPT_NAME`.

use crate::env::{self, Env, EnvValue, Input};
use crate::handler::Handler;
use crate::multipart::TempfileRegistry;
use crate::{Error, Response, Result};
use std::sync::Arc;
use url::Url;

/// Forward chain length after which dispatch gives up
pub const DEFAULT_MAX_FORWARDS: usize = 16;

const PLACEHOLDER_ORIGIN: &str = "http://forward.invalid";

/// Result of one dispatch through a recursive app
#[derive(Debug)]
pub enum Outcome {
    Handled(Response),
    /// Re-dispatch to `url` after applying the `env` overrides
    ForwardTo { url: String, env: Vec<(String, String)> },
}

impl Outcome {
    pub fn forward(url: impl Into<String>) -> Self {
        Outcome::ForwardTo {
            url: url.into(),
            env: Vec::new(),
        }
    }
}

impl From<Response> for Outcome {
    fn from(res: Response) -> Self {
        Outcome::Handled(res)
    }
}

/// App that may forward instead of answering
pub trait RecursiveApp: Send + Sync {
    fn call(&self, env: &mut Env) -> Result<Outcome>;
}

impl<F> RecursiveApp for F
where
    F: Fn(&mut Env) -> Result<Outcome> + Send + Sync,
{
    fn call(&self, env: &mut Env) -> Result<Outcome> {
        self(env)
    }
}

#[derive(Clone)]
struct Includer {
    app: Arc<dyn RecursiveApp>,
    script_name: String,
    max_forwards: usize,
}

/// Dispatch loop around a [`RecursiveApp`]
#[derive(Clone)]
pub struct Recursive {
    app: Arc<dyn RecursiveApp>,
    max_forwards: usize,
}

impl Recursive {
    pub fn new(app: impl RecursiveApp + 'static) -> Self {
        Self {
            app: Arc::new(app),
            max_forwards: DEFAULT_MAX_FORWARDS,
        }
    }

    pub fn max_forwards(mut self, max: usize) -> Self {
        self.max_forwards = max;
        self
    }
}

impl Handler for Recursive {
    fn call(&self, env: &mut Env) -> Result<Response> {
        let includer = Includer {
            app: Arc::clone(&self.app),
            script_name: env.get_str(env::SCRIPT_NAME).unwrap_or("").to_string(),
            max_forwards: self.max_forwards,
        };
        env.insert_ext(env::TRELLIS_RECURSIVE_INCLUDE, includer);
        dispatch(self.app.as_ref(), env, self.max_forwards)
    }
}

fn dispatch(app: &dyn RecursiveApp, env: &mut Env, max_forwards: usize) -> Result<Response> {
    let mut hops = 0;
    loop {
        match app.call(env)? {
            Outcome::Handled(res) => return Ok(res),
            Outcome::ForwardTo { url, env: overrides } => {
                hops += 1;
                if hops > max_forwards {
                    return Err(Error::Internal(format!("more than {} internal forwards", max_forwards)));
                }
                tracing::debug!(target_url = %url, hops, "forwarding request");
                apply_forward(env, &url, overrides)?;
            }
        }
    }
}

fn apply_forward(env: &mut Env, target: &str, overrides: Vec<(String, String)>) -> Result<()> {
    let bad_target = |e: url::ParseError| Error::InvalidParameter(format!("forward target {:?}: {}", target, e));
    let (url, absolute) = match Url::parse(target) {
        Ok(url) => (url, true),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            // Relative targets resolve against the current PATH_INFO
            let current = format!("{}{}", PLACEHOLDER_ORIGIN, env.get_str(env::PATH_INFO).unwrap_or("/"));
            let url = Url::parse(&current).and_then(|base| base.join(target)).map_err(bad_target)?;
            (url, false)
        }
        Err(e) => return Err(bad_target(e)),
    };

    env.set_str(env::PATH_INFO, url.path());
    env.set_str(env::QUERY_STRING, url.query().unwrap_or(""));

    if absolute {
        if let Some(host) = url.host_str() {
            let http_host = match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            env.set_str(env::HTTP_HOST, http_host);
            env.set_str(env::SERVER_NAME, host);
        }
        if let Some(port) = url.port_or_known_default() {
            env.set_str(env::SERVER_PORT, port.to_string());
        }
        env.set_str(env::TRELLIS_URL_SCHEME, url.scheme());
    }

    for (key, value) in overrides {
        env.set_str(key, value);
    }
    Ok(())
}

/// Copy the request-independent parts of `env` for a sub-request
fn sub_env(env: &Env) -> Env {
    let mut sub = Env::new();
    for key in env.keys() {
        match env.get(key) {
            Some(EnvValue::Str(s)) => sub.set_str(key, s.clone()),
            Some(EnvValue::Bool(b)) => sub.set_bool(key, *b),
            Some(EnvValue::Errors(e)) => sub.set_errors(e.clone()),
            _ => {}
        }
    }
    if let Some(registry) = env.ext::<TempfileRegistry>(env::TRELLIS_TEMPFILES) {
        sub.insert_ext(env::TRELLIS_TEMPFILES, registry.clone());
    }
    #[cfg(feature = "sessions")]
    {
        if let Some(session) = env.ext::<crate::session::Session>(env::TRELLIS_SESSION) {
            sub.insert_ext(env::TRELLIS_SESSION, session.clone());
        }
    }
    sub
}

/// Render `path` of the enclosing [`Recursive`] app as a GET sub-request
///
/// `path` must lie below the script name the app was mounted at.
pub fn include(env: &Env, path: &str) -> Result<Response> {
    let includer = env
        .ext::<Includer>(env::TRELLIS_RECURSIVE_INCLUDE)
        .cloned()
        .ok_or_else(|| Error::contract("include called outside a Recursive app"))?;

    let (path, query) = path.split_once('?').unwrap_or((path, ""));
    let rest = path
        .strip_prefix(includer.script_name.as_str())
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        .ok_or_else(|| {
            Error::contract(format!("can only include below {:?}, not {:?}", includer.script_name, path))
        })?;

    let mut sub = sub_env(env);
    sub.set_str(env::PATH_INFO, rest);
    sub.set_str(env::SCRIPT_NAME, includer.script_name.clone());
    sub.set_str(env::QUERY_STRING, query);
    sub.set_str(env::REQUEST_METHOD, "GET");
    sub.set_str(env::CONTENT_LENGTH, "0");
    sub.set_str(env::CONTENT_TYPE, "");
    sub.set_input(Input::empty());
    sub.insert_ext(env::TRELLIS_RECURSIVE_INCLUDE, includer.clone());

    dispatch(includer.app.as_ref(), &mut sub, includer.max_forwards)
}
