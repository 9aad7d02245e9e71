//! Server adapter registry
//!
//! Listeners live outside this crate. An adapter turns an app into a running
//! server; the registry maps names to adapter factories so a launcher can
//! pick one by preference.

use crate::handler::BoxHandler;
use crate::{Error, Result};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Options handed to an adapter when it starts
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub hostname: String,
    pub port: u16,
    /// Adapter-specific settings
    pub extra: BTreeMap<String, String>,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".to_string(),
            port: 3000,
            extra: BTreeMap::new(),
        }
    }
}

impl AdapterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A listener that drives an app
pub trait ServerAdapter: Send + Sync {
    /// Serve `app` until shutdown
    fn run(&self, app: BoxHandler, options: &AdapterOptions) -> Result<()>;
}

/// Builds an adapter; fails when the adapter cannot be used here
pub type AdapterFactory = Arc<dyn Fn() -> Result<Arc<dyn ServerAdapter>> + Send + Sync>;

/// Name to adapter-factory map, in registration order
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<Vec<(String, AdapterFactory)>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an adapter factory
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn ServerAdapter>> + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: AdapterFactory = Arc::new(factory);
        let mut adapters = self.adapters.write();
        match adapters.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = factory,
            None => adapters.push((name, factory)),
        }
    }

    /// Build the adapter registered as `name`
    pub fn get(&self, name: &str) -> Result<Arc<dyn ServerAdapter>> {
        let factory = self
            .adapters
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| Arc::clone(f))
            .ok_or_else(|| Error::InvalidParameter(format!("unknown server adapter {:?}", name)))?;
        factory()
    }

    /// First of `names` that is registered and builds
    pub fn pick(&self, names: &[&str]) -> Result<(String, Arc<dyn ServerAdapter>)> {
        for name in names {
            match self.get(name) {
                Ok(adapter) => return Ok((name.to_string(), adapter)),
                Err(e) => tracing::debug!(adapter = %name, error = %e, "server adapter unavailable"),
            }
        }
        Err(Error::InvalidParameter(format!(
            "couldn't find a server adapter for {}",
            names.join(", ")
        )))
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.read().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.read().iter().any(|(n, _)| n == name)
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry").field("names", &self.names()).finish()
    }
}

static GLOBAL: OnceCell<AdapterRegistry> = OnceCell::new();

/// Install the process-wide registry; only the first install succeeds
pub fn install_global(registry: AdapterRegistry) -> Result<()> {
    GLOBAL
        .set(registry)
        .map_err(|_| Error::contract("global adapter registry already installed"))
}

/// The process-wide registry, an empty one unless installed first
pub fn global() -> &'static AdapterRegistry {
    GLOBAL.get_or_init(AdapterRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recording(Arc<AtomicUsize>);

    impl ServerAdapter for Recording {
        fn run(&self, _app: BoxHandler, options: &AdapterOptions) -> Result<()> {
            self.0.store(options.port as usize, Ordering::SeqCst);
            Ok(())
        }
    }

    fn app() -> BoxHandler {
        Arc::new(|_: &mut crate::Env| -> Result<crate::Response> { Ok(crate::Response::ok()) })
    }

    #[test]
    fn test_register_and_run() {
        let registry = AdapterRegistry::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ran);
        registry.register("recording", move || -> Result<Arc<dyn ServerAdapter>> {
            Ok(Arc::new(Recording(Arc::clone(&seen))))
        });

        assert!(registry.contains("recording"));
        let adapter = registry.get("recording").unwrap();
        adapter.run(app(), &AdapterOptions::new().port(9292)).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 9292);

        assert!(matches!(registry.get("missing"), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_pick_skips_unavailable() {
        let registry = AdapterRegistry::new();
        registry.register("broken", || -> Result<Arc<dyn ServerAdapter>> {
            Err(Error::Internal("native library missing".into()))
        });
        registry.register("plain", || -> Result<Arc<dyn ServerAdapter>> {
            Ok(Arc::new(Recording(Arc::new(AtomicUsize::new(0)))))
        });

        let (name, _) = registry.pick(&["absent", "broken", "plain"]).unwrap();
        assert_eq!(name, "plain");
        assert!(registry.pick(&["absent", "broken"]).is_err());
        assert_eq!(registry.names(), vec!["broken".to_string(), "plain".to_string()]);
    }

    #[test]
    fn test_global_install_once() {
        let _ = install_global(AdapterRegistry::new());
        assert!(matches!(install_global(AdapterRegistry::new()), Err(Error::Contract(_))));
        global().register("noop", || -> Result<Arc<dyn ServerAdapter>> {
            Ok(Arc::new(Recording(Arc::new(AtomicUsize::new(0)))))
        });
        assert!(global().contains("noop"));
    }
}
