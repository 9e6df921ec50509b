//! The discovery engine.
//!
//! An [`Engine`] is built once at startup from a [`Config`] and wires the
//! scanner, loader, registry and monitor together. Consumers receive it by
//! reference; there is no process-wide instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::capability::{CapabilityRecord, CapabilityResult};
use crate::core::Config;
use crate::loader::{
    ActivationStrategy, CapabilityLoader, LoadSummary, Monitor, ReconcileReport,
};
use crate::registry::{CapabilityRegistry, CatalogEntry};
use crate::scanner::CapabilityScanner;

/// Scanner, loader, registry and monitor for one capability root.
pub struct Engine {
    config: Config,
    loader: Arc<CapabilityLoader>,
    monitor: Mutex<Option<Monitor>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.config.engine.root)
            .field("loader", &self.loader)
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}

impl Engine {
    /// Build an engine with an explicit activation strategy.
    pub fn new(config: Config, strategy: Arc<dyn ActivationStrategy>) -> CapabilityResult<Self> {
        let scanner = CapabilityScanner::new(config.engine.root.clone())
            .with_ignore_dirs(config.engine.ignore_dirs.clone());
        let registry = CapabilityRegistry::new(config.registry_settings())?;
        let loader = CapabilityLoader::new(scanner, registry, strategy, config.loader_settings());

        tracing::debug!(
            root = %config.engine.root.display(),
            registry = %config.registry.dir.display(),
            "Engine created"
        );

        Ok(Self { config, loader: Arc::new(loader), monitor: Mutex::new(None) })
    }

    /// Build an engine with the default activation strategy.
    pub fn from_config(config: Config) -> CapabilityResult<Self> {
        Self::new(config, default_strategy())
    }

    /// The configuration this engine was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The loader.
    pub fn loader(&self) -> &Arc<CapabilityLoader> {
        &self.loader
    }

    /// Run a discovery pass, then start the monitor if it is enabled.
    pub fn bootstrap(&self) -> CapabilityResult<BTreeMap<String, bool>> {
        let outcomes = self.loader.bootstrap()?;
        if self.config.monitor.enabled {
            self.start_monitor()?;
        }
        Ok(outcomes)
    }

    /// Reconcile once, outside the monitor.
    pub fn reconcile(&self) -> CapabilityResult<ReconcileReport> {
        self.loader.reconcile()
    }

    /// Start the reconciliation loop. Does nothing if it is already running.
    pub fn start_monitor(&self) -> CapabilityResult<()> {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().is_some_and(Monitor::is_running) {
            return Ok(());
        }
        *monitor = Some(Monitor::start(Arc::clone(&self.loader), self.config.monitor_settings())?);
        Ok(())
    }

    /// Whether the reconciliation loop is running.
    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().as_ref().is_some_and(Monitor::is_running)
    }

    /// Stop the reconciliation loop. Loaded capabilities stay loaded.
    ///
    /// Returns whether the loop exited within the stop timeout.
    pub fn stop(&self) -> bool {
        match self.monitor.lock().take() {
            Some(mut monitor) => monitor.stop(),
            None => true,
        }
    }

    /// Subscribe to capability loads.
    pub fn on_load<F>(&self, callback: F)
    where
        F: Fn(&str, &CapabilityRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.loader.on_load(callback);
    }

    /// Subscribe to capability unloads.
    pub fn on_unload<F>(&self, callback: F)
    where
        F: Fn(&str, &CapabilityRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.loader.on_unload(callback);
    }

    /// Latest per-capability availability.
    pub fn summary(&self) -> LoadSummary {
        self.loader.summary()
    }

    /// Registered catalog entries, by name.
    pub fn catalog(&self) -> BTreeMap<String, CatalogEntry> {
        self.loader.with_registry(|r| r.entries().clone())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The activation strategy used when none is given.
///
/// With the `wasm` feature capabilities ship `.wasm` entry modules; otherwise
/// only built-in modules are available and none are registered.
pub fn default_strategy() -> Arc<dyn ActivationStrategy> {
    #[cfg(feature = "wasm")]
    {
        Arc::new(crate::loader::WasmActivation::new())
    }
    #[cfg(not(feature = "wasm"))]
    {
        Arc::new(crate::loader::BuiltinActivation::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::BuiltinActivation;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.engine.root = temp.path().join("features");
        config.registry.dir = temp.path().join("registry");
        config.monitor.poll_interval_ms = 20;
        config.monitor.stop_timeout_ms = 2_000;
        config
    }

    fn write(root: &Path, dir: &str, content: &str) {
        let dir = root.join(dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("capability.yaml"), content).unwrap();
    }

    #[test]
    fn test_bootstrap_without_monitor() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        write(&config.engine.root, "alpha", "name: alpha\ndescription: A\nagents_can_use: []\n");

        let engine = Engine::new(config, Arc::new(BuiltinActivation::new())).unwrap();
        let outcomes = engine.bootstrap().unwrap();

        assert_eq!(outcomes.get("alpha"), Some(&true));
        assert!(!engine.is_monitoring());
        assert!(engine.catalog().contains_key("alpha"));
        assert_eq!(engine.summary().headline(), "1 of 1 capabilities available");
    }

    #[test]
    fn test_bootstrap_starts_monitor_when_enabled() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        config.monitor.enabled = true;

        let engine = Engine::new(config, Arc::new(BuiltinActivation::new())).unwrap();
        engine.bootstrap().unwrap();
        assert!(engine.is_monitoring());

        engine.start_monitor().unwrap();
        assert!(engine.stop());
        assert!(!engine.is_monitoring());
        assert!(engine.stop());
    }

    #[test]
    fn test_callbacks_are_forwarded() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        write(&config.engine.root, "alpha", "name: alpha\ndescription: A\nagents_can_use: []\n");

        let engine = Engine::from_config(config).unwrap();
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        engine.on_load(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        engine.bootstrap().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
