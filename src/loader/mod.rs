//! Capability loader.
//!
//! Drives one discovery pass end to end: scan, validate, order, activate and
//! publish. The loader owns the set of currently loaded capabilities and
//! reconciles it against the filesystem on demand or from the background
//! [`Monitor`].

pub mod activation;
mod fingerprint;
mod monitor;
mod order;
#[cfg(feature = "wasm")]
mod wasm;

pub use activation::{
    ActivationStrategy, BuiltinActivation, CapabilityModule, ModuleFactory,
};
pub use fingerprint::TreeFingerprint;
pub use monitor::{Monitor, MonitorSettings, MIN_POLL_INTERVAL};
pub use order::load_order;
#[cfg(feature = "wasm")]
pub use wasm::WasmActivation;

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::capability::{CapabilityError, CapabilityRecord, CapabilityResult, LoadResult};
use crate::registry::CapabilityRegistry;
use crate::scanner::{self, CapabilityScanner, ScanStats};

/// Callback invoked with `(name, record)` when a capability is loaded or unloaded.
pub type LifecycleCallback = Box<dyn Fn(&str, &CapabilityRecord) -> anyhow::Result<()> + Send + Sync>;

/// Ordering hints for the loader.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    /// Name of the discovery engine's own capability, always loaded first.
    pub self_name: String,
    /// Capabilities loaded right after the engine itself.
    pub meta_capabilities: Vec<String>,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self { self_name: crate::SELF_CAPABILITY.to_string(), meta_capabilities: Vec::new() }
    }
}

/// A capability that is currently active.
pub struct LoadedCapability {
    pub record: CapabilityRecord,
    pub result: LoadResult,
    /// Whether the last publish of this capability succeeded.
    pub registered: bool,
    module: Option<Box<dyn CapabilityModule>>,
}

impl LoadedCapability {
    /// Whether an entry module is running, as opposed to a descriptor-only capability.
    pub fn has_module(&self) -> bool {
        self.module.is_some()
    }
}

impl std::fmt::Debug for LoadedCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedCapability")
            .field("name", &self.record.name)
            .field("registered", &self.registered)
            .field("has_module", &self.module.is_some())
            .finish()
    }
}

/// Capabilities added and removed by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Names that were discovered but could not be loaded, with the reason.
    pub failed: BTreeMap<String, String>,
}

impl ReconcileReport {
    /// Whether the reconciliation changed nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.failed.is_empty()
    }
}

/// Per-capability status for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityStatus {
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Outcome of the last bootstrap or reconciliation, for display.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadSummary {
    pub capabilities: Vec<CapabilityStatus>,
}

impl LoadSummary {
    /// Number of available capabilities.
    pub fn available(&self) -> usize {
        self.capabilities.iter().filter(|c| c.available).count()
    }

    /// Number of capabilities discovered.
    pub fn total(&self) -> usize {
        self.capabilities.len()
    }

    /// Capabilities that failed, with their reason.
    pub fn failures(&self) -> impl Iterator<Item = &CapabilityStatus> {
        self.capabilities.iter().filter(|c| !c.available)
    }

    /// One-line summary.
    pub fn headline(&self) -> String {
        format!("{} of {} capabilities available", self.available(), self.total())
    }
}

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    Load,
    Unload,
}

#[derive(Default)]
struct LifecycleHooks {
    on_load: Vec<LifecycleCallback>,
    on_unload: Vec<LifecycleCallback>,
}

#[derive(Default)]
struct LoaderState {
    loaded: BTreeMap<String, LoadedCapability>,
    /// Latest outcome per discovered name.
    outcomes: BTreeMap<String, bool>,
    /// Latest failure reason per name.
    failures: BTreeMap<String, String>,
    /// Latest load result per processed name.
    results: BTreeMap<String, LoadResult>,
}

/// Validates, orders and activates capabilities, then hands them to the registry.
pub struct CapabilityLoader {
    scanner: CapabilityScanner,
    registry: Mutex<CapabilityRegistry>,
    strategy: Arc<dyn ActivationStrategy>,
    settings: LoaderSettings,
    /// Serializes bootstrap, reconcile, reload and unload.
    operation: Mutex<()>,
    state: Mutex<LoaderState>,
    hooks: RwLock<LifecycleHooks>,
}

impl std::fmt::Debug for CapabilityLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityLoader")
            .field("root", &self.scanner.root())
            .field("strategy", &self.strategy.name())
            .field("loaded", &self.state.lock().loaded.len())
            .finish()
    }
}

impl CapabilityLoader {
    /// Create a loader.
    pub fn new(
        scanner: CapabilityScanner,
        registry: CapabilityRegistry,
        strategy: Arc<dyn ActivationStrategy>,
        settings: LoaderSettings,
    ) -> Self {
        Self {
            scanner,
            registry: Mutex::new(registry),
            strategy,
            settings,
            operation: Mutex::new(()),
            state: Mutex::new(LoaderState::default()),
            hooks: RwLock::new(LifecycleHooks::default()),
        }
    }

    /// The scanner feeding this loader.
    pub fn scanner(&self) -> &CapabilityScanner {
        &self.scanner
    }

    /// Run a closure against the registry.
    pub fn with_registry<T>(&self, f: impl FnOnce(&CapabilityRegistry) -> T) -> T {
        f(&self.registry.lock())
    }

    /// Subscribe to capability loads.
    pub fn on_load<F>(&self, callback: F)
    where
        F: Fn(&str, &CapabilityRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.write().on_load.push(Box::new(callback));
    }

    /// Subscribe to capability unloads.
    pub fn on_unload<F>(&self, callback: F)
    where
        F: Fn(&str, &CapabilityRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.write().on_unload.push(Box::new(callback));
    }

    /// Run one full discovery pass.
    ///
    /// Returns, for every discovered capability, whether it was validated,
    /// activated and registered. Per-capability failures are reported in the
    /// result; only an unreadable capability root is an error.
    pub fn bootstrap(&self) -> CapabilityResult<BTreeMap<String, bool>> {
        let _guard = self.operation.lock();

        let records = self.scanner.scan_all()?;
        let stats = self.scanner.last_stats().unwrap_or_default();

        let mut outcomes = BTreeMap::new();
        let mut failures = BTreeMap::new();
        let mut valid = Vec::new();

        for record in records.values() {
            let errors = self.check(record, &stats);
            if errors.is_empty() {
                valid.push(record);
            } else {
                let reason = errors.join("; ");
                tracing::warn!(capability = %record.name, errors = %reason, "Invalid capability");
                self.record_result(&record.name, LoadResult::begin().fail(reason.clone()));
                outcomes.insert(record.name.clone(), false);
                failures.insert(record.name.clone(), reason);
            }
        }

        // Drop anything no longer discoverable or no longer valid
        let keep: std::collections::HashSet<&str> = valid.iter().map(|r| r.name.as_str()).collect();
        let stale: Vec<String> = self
            .state
            .lock()
            .loaded
            .keys()
            .filter(|name| !keep.contains(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            self.unload_locked(&name);
        }

        let mut activated = Vec::new();
        for record in load_order(valid, &self.settings.self_name, &self.settings.meta_capabilities)
        {
            if self.is_loaded(&record.name) {
                activated.push(record.clone());
                continue;
            }
            match self.activate_record(record) {
                Ok(()) => activated.push(record.clone()),
                Err(reason) => {
                    outcomes.insert(record.name.clone(), false);
                    failures.insert(record.name.clone(), reason);
                }
            }
        }

        let registered = self.publish(&activated);
        for (name, result) in registered {
            if !result.0 {
                failures.insert(name.clone(), result.1);
            }
            outcomes.insert(name, result.0);
        }

        {
            let mut state = self.state.lock();
            state.outcomes = outcomes.clone();
            state.failures = failures;
        }

        let available = outcomes.values().filter(|ok| **ok).count();
        tracing::info!("{} of {} capabilities available", available, outcomes.len());

        Ok(outcomes)
    }

    /// Apply additions and removals since the last pass.
    ///
    /// New names go through validation, activation and registration one at a
    /// time; vanished names are unregistered before they are dropped.
    pub fn reconcile(&self) -> CapabilityResult<ReconcileReport> {
        let _guard = self.operation.lock();

        let records = self.scanner.scan_all()?;
        let stats = self.scanner.last_stats().unwrap_or_default();
        let mut report = ReconcileReport::default();

        let loaded: Vec<String> = self.state.lock().loaded.keys().cloned().collect();
        for name in loaded {
            if !records.contains_key(&name) {
                self.unload_locked(&name);
                self.forget(&name);
                report.removed.push(name);
            }
        }

        let vanished: Vec<String> = self
            .state
            .lock()
            .outcomes
            .keys()
            .filter(|name| !records.contains_key(*name))
            .cloned()
            .collect();
        for name in vanished {
            self.forget(&name);
        }

        // A loaded name now declared twice fails like any other collision
        let contested: Vec<String> = stats
            .colliding_names()
            .filter(|name| self.is_loaded(name))
            .map(str::to_string)
            .collect();
        for name in contested {
            tracing::warn!(capability = %name, "Loaded capability name is now declared twice");
            self.unload_locked(&name);
        }

        let additions: Vec<&CapabilityRecord> =
            records.values().filter(|r| !self.is_loaded(&r.name)).collect();
        for record in load_order(additions, &self.settings.self_name, &self.settings.meta_capabilities)
        {
            let errors = self.check(record, &stats);
            let outcome = if errors.is_empty() {
                self.add_one(record)
            } else {
                let reason = errors.join("; ");
                self.record_result(&record.name, LoadResult::begin().fail(reason.clone()));
                Err(reason)
            };

            match outcome {
                Ok(()) => report.added.push(record.name.clone()),
                Err(reason) => {
                    let mut state = self.state.lock();
                    // Report each failing name once, not on every cycle
                    if state.failures.get(&record.name) != Some(&reason) {
                        report.failed.insert(record.name.clone(), reason.clone());
                    }
                    state.outcomes.insert(record.name.clone(), false);
                    state.failures.insert(record.name.clone(), reason);
                }
            }
        }

        if !report.is_empty() {
            tracing::info!(
                added = report.added.len(),
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Reconciled capabilities"
            );
        }
        Ok(report)
    }

    /// Unload and load a capability again from its directory.
    ///
    /// Returns whether the capability is loaded and registered afterwards.
    pub fn reload_capability(&self, name: &str) -> CapabilityResult<bool> {
        let _guard = self.operation.lock();

        let dir = match self.state.lock().loaded.get(name) {
            Some(loaded) => Some(loaded.record.source.feature_directory.clone()),
            None => None,
        };
        let dir = match dir {
            Some(dir) => dir,
            None => self
                .scanner
                .get_by_name(name)?
                .map(|r| r.source.feature_directory)
                .ok_or_else(|| CapabilityError::NotFound(name.to_string()))?,
        };

        self.unload_locked(name);
        self.scanner.invalidate();

        if !dir.is_dir() {
            tracing::warn!(capability = %name, "Capability directory vanished during reload");
            self.forget(name);
            return Ok(false);
        }

        let record = self.scanner.scan_directory(&dir)?;
        if record.name != name {
            tracing::info!(capability = %name, renamed_to = %record.name, "Capability renamed");
            self.forget(name);
        }

        let taken = self
            .state
            .lock()
            .loaded
            .get(&record.name)
            .map(|loaded| loaded.record.directory().to_path_buf());
        if let Some(other) = taken {
            let reason = format!(
                "capability name '{}' is already loaded from {}",
                record.name,
                other.display()
            );
            tracing::warn!(capability = %name, error = %reason, "Reload failed");
            self.record_result(name, LoadResult::begin().fail(reason.clone()));
            let mut state = self.state.lock();
            state.outcomes.insert(name.to_string(), false);
            state.failures.insert(name.to_string(), reason);
            return Ok(false);
        }

        let errors = scanner::validate(&record);
        let outcome = if errors.is_empty() {
            self.add_one(&record)
        } else {
            Err(errors.join("; "))
        };

        let mut state = self.state.lock();
        match outcome {
            Ok(()) => {
                state.outcomes.insert(record.name.clone(), true);
                state.failures.remove(&record.name);
                Ok(true)
            }
            Err(reason) => {
                tracing::warn!(capability = %record.name, error = %reason, "Reload failed");
                state.outcomes.insert(record.name.clone(), false);
                state.failures.insert(record.name, reason);
                Ok(false)
            }
        }
    }

    /// Unregister and drop a loaded capability.
    pub fn unload_capability(&self, name: &str) -> CapabilityResult<()> {
        let _guard = self.operation.lock();
        if !self.is_loaded(name) {
            return Err(CapabilityError::NotFound(name.to_string()));
        }
        self.unload_locked(name);
        self.forget(name);
        Ok(())
    }

    /// Whether a capability is currently loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.state.lock().loaded.contains_key(name)
    }

    /// Names of loaded capabilities.
    pub fn loaded_names(&self) -> Vec<String> {
        self.state.lock().loaded.keys().cloned().collect()
    }

    /// Records of loaded capabilities.
    pub fn loaded_records(&self) -> Vec<CapabilityRecord> {
        self.state.lock().loaded.values().map(|l| l.record.clone()).collect()
    }

    /// Inspect the currently loaded capabilities.
    pub fn with_loaded<T>(&self, f: impl FnOnce(&BTreeMap<String, LoadedCapability>) -> T) -> T {
        f(&self.state.lock().loaded)
    }

    /// Latest load result per capability.
    pub fn load_results(&self) -> BTreeMap<String, LoadResult> {
        self.state.lock().results.clone()
    }

    /// Latest availability of every discovered capability, with failure reasons.
    pub fn summary(&self) -> LoadSummary {
        let state = self.state.lock();
        LoadSummary {
            capabilities: state
                .outcomes
                .iter()
                .map(|(name, ok)| CapabilityStatus {
                    name: name.clone(),
                    available: *ok,
                    reason: if *ok { None } else { state.failures.get(name).cloned() },
                })
                .collect(),
        }
    }

    /// Validation plus the checks that need scan context.
    fn check(&self, record: &CapabilityRecord, stats: &ScanStats) -> Vec<String> {
        let mut errors = self.scanner.validate(record);
        for collision in stats.collisions.iter().filter(|c| c.name == record.name) {
            errors.push(format!(
                "duplicate capability name also declared in {}",
                collision.ignored.display()
            ));
        }
        if !record.directory().is_dir() {
            errors.push(format!(
                "source directory {} no longer exists",
                record.directory().display()
            ));
        }
        errors
    }

    /// Activate, then register a single capability.
    fn add_one(&self, record: &CapabilityRecord) -> Result<(), String> {
        self.activate_record(record)?;
        let mut published = self.publish(std::slice::from_ref(record));
        match published.remove(&record.name) {
            Some((true, _)) => {
                let mut state = self.state.lock();
                state.outcomes.insert(record.name.clone(), true);
                state.failures.remove(&record.name);
                Ok(())
            }
            Some((false, reason)) => Err(reason),
            None => Err("registration produced no result".to_string()),
        }
    }

    /// Activate a record and add it to the loaded set.
    fn activate_record(&self, record: &CapabilityRecord) -> Result<(), String> {
        let result = LoadResult::begin();
        if self.is_loaded(&record.name) {
            let reason = format!("capability '{}' is already loaded", record.name);
            self.record_result(&record.name, result.fail(reason.clone()));
            return Err(reason);
        }

        match activation::activate(self.strategy.as_ref(), record) {
            Ok(activation) => {
                let result = result.succeed();
                self.record_result(&record.name, result.clone());
                self.state.lock().loaded.insert(
                    record.name.clone(),
                    LoadedCapability {
                        record: record.clone(),
                        result,
                        registered: false,
                        module: activation.module,
                    },
                );
                tracing::debug!(capability = %record.name, "Activated capability");
                self.notify(Lifecycle::Load, record);
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(capability = %record.name, error = %reason, "Activation failed");
                self.record_result(&record.name, result.fail(reason.clone()));
                Err(reason)
            }
        }
    }

    /// Register activated records, returning `(registered, reason)` per name.
    ///
    /// An empty slice still rewrites the catalog and records the pass.
    fn publish(&self, records: &[CapabilityRecord]) -> HashMap<String, (bool, String)> {
        let results = self.registry.lock().register_all(records);

        let mut state = self.state.lock();
        results
            .into_iter()
            .map(|(name, result)| {
                if let Some(loaded) = state.loaded.get_mut(&name) {
                    loaded.registered = result.registered;
                }
                (name, (result.registered, result.errors.join("; ")))
            })
            .collect()
    }

    /// Unregister, shut down and drop a capability. Caller holds the operation lock.
    fn unload_locked(&self, name: &str) {
        let registered = self.registry.lock().is_registered(name);
        if registered {
            if let Err(e) = self.registry.lock().unregister(name) {
                tracing::warn!(capability = %name, error = %e, "Failed to unregister capability");
            }
        }

        let Some(mut loaded) = self.state.lock().loaded.remove(name) else {
            return;
        };

        if let Some(module) = loaded.module.as_mut() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| module.shutdown())) {
                tracing::warn!(
                    capability = %name,
                    error = %activation::panic_message(&payload),
                    "Capability shutdown panicked"
                );
            }
        }

        tracing::info!(capability = %name, "Unloaded capability");
        self.notify(Lifecycle::Unload, &loaded.record);
    }

    fn forget(&self, name: &str) {
        let mut state = self.state.lock();
        state.outcomes.remove(name);
        state.failures.remove(name);
        state.results.remove(name);
    }

    fn record_result(&self, name: &str, result: LoadResult) {
        self.state.lock().results.insert(name.to_string(), result);
    }

    /// Invoke lifecycle callbacks; their failures are logged, never propagated.
    fn notify(&self, event: Lifecycle, record: &CapabilityRecord) {
        let hooks = self.hooks.read();
        let callbacks = match event {
            Lifecycle::Load => &hooks.on_load,
            Lifecycle::Unload => &hooks.on_unload,
        };
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(&record.name, record))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(capability = %record.name, error = %e, "Lifecycle callback failed");
                }
                Err(payload) => {
                    tracing::warn!(
                        capability = %record.name,
                        error = %activation::panic_message(&payload),
                        "Lifecycle callback panicked"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Noop;

    impl CapabilityModule for Noop {}

    struct Panicking;

    impl CapabilityModule for Panicking {
        fn init(&mut self, _record: &CapabilityRecord) -> anyhow::Result<()> {
            panic!("init exploded")
        }
    }

    /// Records the order in which capabilities are activated.
    #[derive(Default)]
    struct Recording {
        order: Arc<Mutex<Vec<String>>>,
    }

    impl ActivationStrategy for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn extension(&self) -> &str {
            "rs"
        }

        fn activate(
            &self,
            record: &CapabilityRecord,
            _entry: &Path,
        ) -> CapabilityResult<Box<dyn CapabilityModule>> {
            self.order.lock().push(record.name.clone());
            Ok(Box::new(Noop))
        }
    }

    struct Fixture {
        temp: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            std::fs::create_dir_all(temp.path().join("features")).unwrap();
            Self { temp }
        }

        fn root(&self) -> PathBuf {
            self.temp.path().join("features")
        }

        fn write(&self, dir: &str, manifest: &str) -> PathBuf {
            let dir = self.root().join(dir);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("capability.yaml"), manifest).unwrap();
            dir
        }

        fn valid(&self, name: &str, extra: &str) -> PathBuf {
            self.write(
                name,
                &format!("name: {name}\ndescription: {name} capability\nagents_can_use: []\n{extra}"),
            )
        }

        fn loader(&self, strategy: Arc<dyn ActivationStrategy>) -> CapabilityLoader {
            let registry =
                CapabilityRegistry::new(crate::registry::RegistrySettings::new(self.registry_dir()))
                    .unwrap();
            CapabilityLoader::new(
                CapabilityScanner::new(self.root()),
                registry,
                strategy,
                LoaderSettings {
                    self_name: crate::SELF_CAPABILITY.to_string(),
                    meta_capabilities: vec!["catalog-browser".to_string()],
                },
            )
        }

        fn registry_dir(&self) -> PathBuf {
            self.temp.path().join("registry")
        }

        fn catalog_names(&self) -> Vec<String> {
            CapabilityRegistry::read_catalog(&self.registry_dir()).unwrap().into_keys().collect()
        }
    }

    #[test]
    fn test_alpha_beta_scenario() {
        let fixture = Fixture::new();
        fixture.write(
            "alpha",
            "name: alpha\ndescription: A\nagents_can_use: [x]\npriority: critical\nis_core: true\n",
        );
        fixture.write("beta", "name: beta\nagents_can_use: []\n");

        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        let outcomes = loader.bootstrap().unwrap();

        assert_eq!(outcomes.get("alpha"), Some(&true));
        assert_eq!(outcomes.get("beta"), Some(&false));
        assert_eq!(outcomes.len(), 2);
        assert_eq!(fixture.catalog_names(), vec!["alpha"]);

        let summary = loader.summary();
        assert_eq!(summary.headline(), "1 of 2 capabilities available");
        let beta = summary.failures().next().unwrap();
        assert_eq!(beta.name, "beta");
        assert_eq!(beta.reason.as_deref(), Some("missing required field: description"));

        let results = loader.load_results();
        assert!(results["alpha"].loaded);
        assert!(!results["beta"].loaded);
    }

    #[test]
    fn test_bootstrap_is_idempotent() {
        let fixture = Fixture::new();
        fixture.valid("alpha", "");
        fixture.valid("gamma", "");

        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        loader.on_load(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let first = loader.bootstrap().unwrap();
        let second = loader.bootstrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(loader.loaded_names(), vec!["alpha", "gamma"]);
        assert_eq!(fixture.catalog_names(), vec!["alpha", "gamma"]);
    }

    #[test]
    fn test_activation_order() {
        let fixture = Fixture::new();
        for (name, extra) in [
            ("urgent", "priority: critical\n"),
            ("steady", "is_core: true\n"),
            ("catalog-browser", ""),
            ("capability-discovery", ""),
            ("helper", "is_core: true\npriority: high\n"),
        ] {
            let dir = fixture.valid(name, extra);
            std::fs::write(dir.join("main.rs"), "pub fn init() {}").unwrap();
        }

        let strategy = Arc::new(Recording::default());
        let order = Arc::clone(&strategy.order);
        let loader = fixture.loader(strategy);
        loader.bootstrap().unwrap();

        assert_eq!(
            *order.lock(),
            vec!["capability-discovery", "catalog-browser", "helper", "steady", "urgent"]
        );
    }

    #[test]
    fn test_activation_failures_are_isolated() {
        let fixture = Fixture::new();
        fixture.valid("alpha", "");
        let missing = fixture.valid("missing", "");
        std::fs::write(missing.join("main.rs"), "pub fn init() {}").unwrap();
        let boom = fixture.valid("boom", "");
        std::fs::write(boom.join("boom.rs"), "pub fn init() {}").unwrap();

        let strategy = BuiltinActivation::new().with_module("boom", || Panicking);
        let loader = fixture.loader(Arc::new(strategy));
        let outcomes = loader.bootstrap().unwrap();

        assert_eq!(outcomes.get("alpha"), Some(&true));
        assert_eq!(outcomes.get("missing"), Some(&false));
        assert_eq!(outcomes.get("boom"), Some(&false));
        assert_eq!(loader.loaded_names(), vec!["alpha"]);
        assert_eq!(fixture.catalog_names(), vec!["alpha"]);

        let summary = loader.summary();
        let reasons: BTreeMap<_, _> =
            summary.failures().map(|s| (s.name.clone(), s.reason.clone().unwrap())).collect();
        assert!(reasons["boom"].contains("init exploded"));
        assert!(reasons["missing"].contains("no built-in module"));
    }

    #[test]
    fn test_callback_failures_do_not_propagate() {
        let fixture = Fixture::new();
        fixture.valid("alpha", "");

        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        loader.on_load(|_, _| anyhow::bail!("listener offline"));
        loader.on_load(|_, _| panic!("listener crashed"));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        loader.on_load(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let outcomes = loader.bootstrap().unwrap();
        assert_eq!(outcomes.get("alpha"), Some(&true));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_name_collision_fails_validation() {
        let fixture = Fixture::new();
        fixture.write("first", "name: dup\ndescription: one\nagents_can_use: []\n");
        fixture.write("second", "name: dup\ndescription: two\nagents_can_use: []\n");
        fixture.valid("alpha", "");

        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        let outcomes = loader.bootstrap().unwrap();

        assert_eq!(outcomes.get("dup"), Some(&false));
        assert_eq!(outcomes.get("alpha"), Some(&true));
        assert!(!loader.is_loaded("dup"));
    }

    #[test]
    fn test_missing_root_bootstraps_empty() {
        let temp = TempDir::new().unwrap();
        let registry =
            CapabilityRegistry::new(crate::registry::RegistrySettings::new(temp.path().join("reg")))
                .unwrap();
        let loader = CapabilityLoader::new(
            CapabilityScanner::new(temp.path().join("absent")),
            registry,
            Arc::new(BuiltinActivation::new()),
            LoaderSettings::default(),
        );

        assert!(loader.bootstrap().unwrap().is_empty());
        assert_eq!(loader.summary().headline(), "0 of 0 capabilities available");
    }

    #[test]
    fn test_reconcile_adds_and_removes() {
        let fixture = Fixture::new();
        fixture.valid("alpha", "");

        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        let unloads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&unloads);
        loader.on_unload(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        loader.bootstrap().unwrap();
        assert!(loader.reconcile().unwrap().is_empty());

        fixture.valid("gamma", "");
        let report = loader.reconcile().unwrap();
        assert_eq!(report.added, vec!["gamma"]);
        assert!(loader.with_registry(|r| r.is_registered("gamma")));

        std::fs::remove_dir_all(fixture.root().join("alpha")).unwrap();
        let report = loader.reconcile().unwrap();
        assert_eq!(report.removed, vec!["alpha"]);
        assert!(!loader.is_loaded("alpha"));
        assert_eq!(fixture.catalog_names(), vec!["gamma"]);
        assert_eq!(unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reconcile_reports_failure_once() {
        let fixture = Fixture::new();
        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        loader.bootstrap().unwrap();

        fixture.write("broken", "name: broken\nagents_can_use: []\n");
        let first = loader.reconcile().unwrap();
        assert!(first.failed.contains_key("broken"));

        let second = loader.reconcile().unwrap();
        assert!(second.is_empty());
        assert_eq!(loader.summary().failures().count(), 1);
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let fixture = Fixture::new();
        fixture.valid("alpha", "");

        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        loader.bootstrap().unwrap();

        fixture.write("alpha", "name: alpha\ndescription: Rewritten\nagents_can_use: []\n");
        assert!(loader.reload_capability("alpha").unwrap());
        let description =
            loader.with_registry(|r| r.get("alpha").map(|e| e.description.clone()));
        assert_eq!(description.as_deref(), Some("Rewritten"));

        fixture.write("alpha", "name: alpha\nagents_can_use: []\n");
        assert!(!loader.reload_capability("alpha").unwrap());
        assert!(!loader.with_registry(|r| r.is_registered("alpha")));

        assert!(matches!(
            loader.reload_capability("ghost"),
            Err(CapabilityError::NotFound(_))
        ));
    }

    #[test]
    fn test_reload_cannot_take_a_loaded_name() {
        let fixture = Fixture::new();
        fixture.valid("alpha", "");
        fixture.valid("beta", "");

        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        let unloaded = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&unloaded);
        loader.on_unload(move |name, _| {
            seen.lock().push(name.to_string());
            Ok(())
        });
        loader.bootstrap().unwrap();

        fixture.write("alpha", "name: beta
description: Impostor
agents_can_use: []
");
        assert!(!loader.reload_capability("alpha").unwrap());

        assert_eq!(loader.loaded_names(), vec!["beta"]);
        let beta_dir = loader.with_loaded(|loaded| loaded["beta"].record.directory().to_path_buf());
        assert!(beta_dir.ends_with("beta"));
        let description = loader.with_registry(|r| r.get("beta").map(|e| e.description.clone()));
        assert_eq!(description.as_deref(), Some("beta capability"));
        assert_eq!(*unloaded.lock(), vec!["alpha"]);

        let summary = loader.summary();
        assert_eq!(summary.headline(), "1 of 2 capabilities available");
        let alpha = summary.failures().next().unwrap();
        assert_eq!(alpha.name, "alpha");
        assert!(alpha.reason.as_deref().unwrap().contains("already loaded"));
    }

    #[test]
    fn test_reload_rename_forgets_old_name() {
        let fixture = Fixture::new();
        fixture.valid("alpha", "");

        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        loader.bootstrap().unwrap();

        fixture.write("alpha", "name: omega
description: Renamed
agents_can_use: []
");
        assert!(loader.reload_capability("alpha").unwrap());

        assert_eq!(loader.loaded_names(), vec!["omega"]);
        assert!(!loader.load_results().contains_key("alpha"));
        let summary = loader.summary();
        assert_eq!(summary.headline(), "1 of 1 capabilities available");
        assert_eq!(summary.capabilities[0].name, "omega");
        assert_eq!(fixture.catalog_names(), vec!["omega"]);
    }

    #[test]
    fn test_reconcile_fails_loaded_name_declared_twice() {
        let fixture = Fixture::new();
        fixture.valid("alpha", "");

        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        loader.bootstrap().unwrap();
        assert!(loader.is_loaded("alpha"));

        fixture.write("a0", "name: alpha
description: Shadow
agents_can_use: []
");
        let report = loader.reconcile().unwrap();

        let reason = report.failed.get("alpha").unwrap();
        assert!(reason.contains("duplicate capability name"), "{reason}");
        assert!(!loader.is_loaded("alpha"));
        assert!(!loader.with_registry(|r| r.is_registered("alpha")));
        assert!(fixture.catalog_names().is_empty());

        assert!(loader.reconcile().unwrap().is_empty());
    }

    #[test]
    fn test_empty_bootstrap_clears_stale_catalog() {
        let fixture = Fixture::new();
        fixture.valid("alpha", "");
        fixture.loader(Arc::new(BuiltinActivation::new())).bootstrap().unwrap();
        assert_eq!(fixture.catalog_names(), vec!["alpha"]);

        fixture.write("alpha", "name: alpha
agents_can_use: []
");
        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        let outcomes = loader.bootstrap().unwrap();

        assert_eq!(outcomes.get("alpha"), Some(&false));
        assert!(fixture.catalog_names().is_empty());
        let log = crate::registry::RegistrationLog::open(
            fixture.registry_dir().join(crate::registry::LOG_FILE),
        );
        assert_eq!(log.passes().len(), 2);
        assert_eq!(log.last().unwrap().total_capabilities, 0);
    }

    #[test]
    fn test_path_like_name_stays_inside_registry() {
        let fixture = Fixture::new();
        fixture.write("sneaky", "name: ../../escaped
description: S
agents_can_use: []
");

        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        let outcomes = loader.bootstrap().unwrap();

        assert_eq!(outcomes.get("../../escaped"), Some(&false));
        assert!(!fixture.temp.path().join("escaped.json").exists());
        assert!(!fixture.registry_dir().join("escaped.json").exists());
        assert!(fixture.catalog_names().is_empty());
    }

    #[test]
    fn test_unload_capability() {
        let fixture = Fixture::new();
        fixture.valid("alpha", "");

        let loader = fixture.loader(Arc::new(BuiltinActivation::new()));
        loader.bootstrap().unwrap();

        loader.unload_capability("alpha").unwrap();
        assert!(!loader.is_loaded("alpha"));
        assert!(fixture.catalog_names().is_empty());
        assert!(matches!(loader.unload_capability("alpha"), Err(CapabilityError::NotFound(_))));
    }
}
