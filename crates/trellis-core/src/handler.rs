//! Handler contract and composition
//!
//! A [`Handler`] maps an environment to a response. A [`Middleware`] wraps
//! the rest of the pipeline, passed to it as `next`; it may rewrite the env
//! before delegating, transform the response afterwards, or answer without
//! delegating at all. Middlewares added earlier wrap those added later.

use crate::env::{self, Env};
use crate::response::{Response, StatusCode};
use crate::{Error, Result};
use std::sync::Arc;

/// Application contract: one env in, one response out
pub trait Handler: Send + Sync {
    fn call(&self, env: &mut Env) -> Result<Response>;
}

impl<F> Handler for F
where
    F: Fn(&mut Env) -> Result<Response> + Send + Sync,
{
    fn call(&self, env: &mut Env) -> Result<Response> {
        self(env)
    }
}

/// Shared handler
pub type BoxHandler = Arc<dyn Handler>;

/// Middleware trait - wraps the rest of the pipeline
pub trait Middleware: Send + Sync {
    fn call(&self, env: &mut Env, next: &dyn Handler) -> Result<Response>;
}

impl<F> Middleware for F
where
    F: Fn(&mut Env, &dyn Handler) -> Result<Response> + Send + Sync,
{
    fn call(&self, env: &mut Env, next: &dyn Handler) -> Result<Response> {
        self(env, next)
    }
}

/// The remainder of a chain, handed to each middleware as `next`
struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    app: &'a dyn Handler,
}

impl Handler for Next<'_> {
    fn call(&self, env: &mut Env) -> Result<Response> {
        match self.rest.split_first() {
            Some((first, rest)) => first.call(env, &Next { rest, app: self.app }),
            None => self.app.call(env),
        }
    }
}

/// Middleware chain around a terminal application
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
    app: BoxHandler,
}

impl MiddlewareChain {
    pub fn new(app: impl Handler + 'static) -> Self {
        Self {
            middlewares: Vec::new(),
            app: Arc::new(app),
        }
    }

    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Arc::new(middleware));
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl Handler for MiddlewareChain {
    fn call(&self, env: &mut Env) -> Result<Response> {
        Next {
            rest: &self.middlewares,
            app: self.app.as_ref(),
        }
        .call(env)
    }
}

/// Pipeline builder
///
/// ```ignore
/// let app = Builder::new()
///     .with(CommonLogger::new())
///     .with(Head)
///     .run(my_app)
///     .build()?;
/// ```
#[derive(Default)]
pub struct Builder {
    middlewares: Vec<Arc<dyn Middleware>>,
    run: Option<BoxHandler>,
    maps: Vec<(String, BoxHandler)>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware inside the ones already added
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Set the terminal application
    pub fn run(mut self, app: impl Handler + 'static) -> Self {
        self.run = Some(Arc::new(app));
        self
    }

    /// Mount `app` under a path (or `http://host/path`) prefix
    pub fn map(mut self, location: impl Into<String>, app: impl Handler + 'static) -> Self {
        self.maps.push((location.into(), Arc::new(app)));
        self
    }

    pub fn build(self) -> Result<MiddlewareChain> {
        let app: BoxHandler = if self.maps.is_empty() {
            self.run
                .ok_or_else(|| Error::contract("missing run or map statement"))?
        } else {
            let mut maps = self.maps;
            if let Some(run) = self.run {
                maps.push(("/".to_string(), run));
            }
            Arc::new(UrlMap::new(maps)?)
        };
        tracing::debug!(middlewares = self.middlewares.len(), "built pipeline");
        Ok(MiddlewareChain {
            middlewares: self.middlewares,
            app,
        })
    }
}

// ============================================================================
// URL mapping
// ============================================================================

struct Mount {
    host: Option<String>,
    location: String,
    app: BoxHandler,
}

/// Dispatch by host and longest path prefix
///
/// The matched prefix moves from `PATH_INFO` onto `SCRIPT_NAME` for the
/// mounted app; both are restored afterwards.
pub struct UrlMap {
    mounts: Vec<Mount>,
}

impl UrlMap {
    pub fn new<I, S>(mapping: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, BoxHandler)>,
        S: Into<String>,
    {
        let mut mounts = Vec::new();
        for (location, app) in mapping {
            let location = location.into();
            let (host, path) = match location
                .strip_prefix("http://")
                .or_else(|| location.strip_prefix("https://"))
            {
                Some(rest) => match rest.find('/') {
                    Some(i) => (Some(rest[..i].to_ascii_lowercase()), rest[i..].to_string()),
                    None => (Some(rest.to_ascii_lowercase()), "/".to_string()),
                },
                None => (None, location.clone()),
            };
            if !path.starts_with('/') {
                return Err(Error::contract(format!("paths need to start with /: {}", location)));
            }
            mounts.push(Mount {
                host,
                location: path.trim_end_matches('/').to_string(),
                app,
            });
        }
        // Host-specific mounts first, then the longest location
        mounts.sort_by(|a, b| {
            let host_len = |m: &Mount| m.host.as_ref().map_or(0, |h| h.len());
            host_len(b)
                .cmp(&host_len(a))
                .then_with(|| b.location.len().cmp(&a.location.len()))
        });
        Ok(Self { mounts })
    }

    fn host_matches(mount: &Mount, http_host: Option<&str>, server_name: Option<&str>) -> bool {
        match &mount.host {
            None => true,
            Some(host) => {
                let bare = |h: &str| h.split(':').next().unwrap_or(h).to_string();
                http_host.map_or(false, |h| bare(h).eq_ignore_ascii_case(host))
                    || server_name.map_or(false, |s| s.eq_ignore_ascii_case(host))
            }
        }
    }
}

impl Handler for UrlMap {
    fn call(&self, env: &mut Env) -> Result<Response> {
        let path = env.get_str(env::PATH_INFO).unwrap_or("").to_string();
        let script_name = env.get_str(env::SCRIPT_NAME).unwrap_or("").to_string();
        let http_host = env.get_str(env::HTTP_HOST).map(str::to_string);
        let server_name = env.get_str(env::SERVER_NAME).map(str::to_string);

        for mount in &self.mounts {
            if !Self::host_matches(mount, http_host.as_deref(), server_name.as_deref()) {
                continue;
            }
            let Some(rest) = path.strip_prefix(mount.location.as_str()) else {
                continue;
            };
            if !(rest.is_empty() || rest.starts_with('/')) {
                continue;
            }

            env.set_str(env::SCRIPT_NAME, format!("{}{}", script_name, mount.location));
            env.set_str(env::PATH_INFO, rest);
            let result = mount.app.call(env);
            env.set_str(env::PATH_INFO, path);
            env.set_str(env::SCRIPT_NAME, script_name);
            return result;
        }

        Ok(Response::plain(StatusCode::NOT_FOUND, format!("Not Found: {}", path)).with_header("x-cascade", "pass"))
    }
}

// ============================================================================
// Cascade
// ============================================================================

/// Try apps in order until one answers with a status outside the cascade set
pub struct Cascade {
    apps: Vec<BoxHandler>,
    cascade_for: Vec<StatusCode>,
}

impl Cascade {
    pub fn new(apps: Vec<BoxHandler>) -> Self {
        Self {
            apps,
            cascade_for: vec![StatusCode::NOT_FOUND, StatusCode::METHOD_NOT_ALLOWED],
        }
    }

    pub fn cascade_for(mut self, statuses: Vec<StatusCode>) -> Self {
        self.cascade_for = statuses;
        self
    }

    pub fn add(&mut self, app: impl Handler + 'static) {
        self.apps.push(Arc::new(app));
    }
}

impl Handler for Cascade {
    fn call(&self, env: &mut Env) -> Result<Response> {
        let mut last: Option<Response> = None;
        for app in &self.apps {
            if let Some(mut skipped) = last.take() {
                skipped.body.close();
            }
            let response = app.call(env)?;
            let pass = response.header("x-cascade") == Some("pass");
            if !pass && !self.cascade_for.contains(&response.status) {
                return Ok(response);
            }
            last = Some(response);
        }
        Ok(last.unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND).with_header("content-type", "text/plain")))
    }
}
