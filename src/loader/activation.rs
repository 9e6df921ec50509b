//! Capability activation strategies.
//!
//! Activation turns a validated record into running in-process code. Each
//! supported runtime provides an [`ActivationStrategy`]; the loader only sees
//! the trait, so tests can substitute a fake strategy.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::capability::{CapabilityError, CapabilityRecord, CapabilityResult};

/// A running capability.
pub trait CapabilityModule: Send {
    /// Initialization hook, invoked once right after activation.
    fn init(&mut self, _record: &CapabilityRecord) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked when the capability is unloaded.
    fn shutdown(&mut self) {}
}

/// Loads capability entry modules for one runtime.
pub trait ActivationStrategy: Send + Sync {
    /// Strategy name for logging.
    fn name(&self) -> &str;

    /// File extension of entry modules handled by this strategy.
    fn extension(&self) -> &str;

    /// Entry module file names to try, in order.
    fn entry_candidates(&self, record: &CapabilityRecord) -> Vec<String> {
        let ext = self.extension();
        let mut candidates = vec![
            format!("{}.{ext}", record.name),
            format!("{}.{ext}", record.name.replace('-', "_")),
            format!("main.{ext}"),
            format!("lib.{ext}"),
        ];
        candidates.dedup();
        candidates
    }

    /// Locate the entry module inside the record's directory.
    fn locate_entry(&self, record: &CapabilityRecord) -> Option<PathBuf> {
        self.entry_candidates(record)
            .into_iter()
            .map(|file| record.directory().join(file))
            .find(|path| path.is_file())
    }

    /// Load the entry module in-process.
    fn activate(
        &self,
        record: &CapabilityRecord,
        entry: &Path,
    ) -> CapabilityResult<Box<dyn CapabilityModule>>;
}

/// Outcome of activating one record.
pub struct Activation {
    /// Loaded module, absent for descriptor-only capabilities.
    pub module: Option<Box<dyn CapabilityModule>>,
    /// Entry module that was loaded.
    pub entry: Option<PathBuf>,
}

impl std::fmt::Debug for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activation")
            .field("has_module", &self.module.is_some())
            .field("entry", &self.entry)
            .finish()
    }
}

/// Locate, load and initialize a record's entry module.
///
/// Errors and panics from the strategy or the init hook are reported as an
/// activation error for this record only.
pub fn activate(
    strategy: &dyn ActivationStrategy,
    record: &CapabilityRecord,
) -> CapabilityResult<Activation> {
    let Some(entry) = strategy.locate_entry(record) else {
        tracing::debug!(capability = %record.name, "No entry module, descriptor-only");
        return Ok(Activation { module: None, entry: None });
    };

    tracing::debug!(
        capability = %record.name,
        strategy = strategy.name(),
        entry = %entry.display(),
        "Activating entry module"
    );

    let mut module = guarded(&record.name, || strategy.activate(record, &entry))?;

    guarded(&record.name, || {
        module.init(record).map_err(|e| CapabilityError::activation(&record.name, e))
    })?;

    Ok(Activation { module: Some(module), entry: Some(entry) })
}

fn guarded<T>(
    name: &str,
    f: impl FnOnce() -> CapabilityResult<T>,
) -> CapabilityResult<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(CapabilityError::activation(name, format!("panicked: {}", panic_message(&payload))))
    })
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Factory producing a fresh module instance.
pub type ModuleFactory = Box<dyn Fn() -> Box<dyn CapabilityModule> + Send + Sync>;

/// In-process Rust capabilities compiled into the host.
///
/// A capability directory ships its Rust source as the entry module
/// (`<name>.rs`, `main.rs` or `lib.rs`); the compiled module is registered
/// here under the capability name.
#[derive(Default)]
pub struct BuiltinActivation {
    factories: HashMap<String, ModuleFactory>,
}

impl std::fmt::Debug for BuiltinActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("BuiltinActivation").field("modules", &names).finish()
    }
}

impl BuiltinActivation {
    /// Create an empty strategy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the module for a capability.
    pub fn register<F, M>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: CapabilityModule + 'static,
    {
        self.factories.insert(name.into(), Box::new(move || Box::new(factory())));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_module<F, M>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: CapabilityModule + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Whether a module is registered for the capability.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl ActivationStrategy for BuiltinActivation {
    fn name(&self) -> &str {
        "builtin"
    }

    fn extension(&self) -> &str {
        "rs"
    }

    fn activate(
        &self,
        record: &CapabilityRecord,
        entry: &Path,
    ) -> CapabilityResult<Box<dyn CapabilityModule>> {
        let factory = self.factories.get(&record.name).ok_or_else(|| {
            CapabilityError::activation(
                &record.name,
                format!("no built-in module registered for {}", entry.display()),
            )
        })?;
        Ok(factory())
    }
}
