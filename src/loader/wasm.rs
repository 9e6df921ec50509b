//! WebAssembly capability modules (feature `wasm`).
//!
//! Entry modules are `.wasm` files instantiated with wasmtime. A module may
//! export `capability_init: () -> i32`; a non-zero return fails activation.
//! `capability_shutdown: () -> ()` is called on unload when exported.

use std::path::Path;

use wasmtime::{Engine, Instance, Linker, Module, Store};

use super::activation::{ActivationStrategy, CapabilityModule};
use crate::capability::{CapabilityError, CapabilityRecord, CapabilityResult};

const INIT_EXPORT: &str = "capability_init";
const SHUTDOWN_EXPORT: &str = "capability_shutdown";

/// Activates capabilities compiled to WebAssembly.
pub struct WasmActivation {
    engine: Engine,
}

impl std::fmt::Debug for WasmActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmActivation").finish()
    }
}

impl Default for WasmActivation {
    fn default() -> Self {
        Self::new()
    }
}

impl WasmActivation {
    /// Create a strategy with a default wasmtime engine.
    pub fn new() -> Self {
        Self { engine: Engine::default() }
    }
}

struct WasmModule {
    store: Store<()>,
    instance: Instance,
}

impl CapabilityModule for WasmModule {
    fn init(&mut self, record: &CapabilityRecord) -> anyhow::Result<()> {
        let Ok(init) = self.instance.get_typed_func::<(), i32>(&mut self.store, INIT_EXPORT)
        else {
            return Ok(());
        };

        let code = init.call(&mut self.store, ())?;
        if code != 0 {
            anyhow::bail!("{} returned {code} for '{}'", INIT_EXPORT, record.name);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Ok(shutdown) = self.instance.get_typed_func::<(), ()>(&mut self.store, SHUTDOWN_EXPORT)
        {
            if let Err(e) = shutdown.call(&mut self.store, ()) {
                tracing::warn!(error = %e, "capability_shutdown failed");
            }
        }
    }
}

impl ActivationStrategy for WasmActivation {
    fn name(&self) -> &str {
        "wasm"
    }

    fn extension(&self) -> &str {
        "wasm"
    }

    fn activate(
        &self,
        record: &CapabilityRecord,
        entry: &Path,
    ) -> CapabilityResult<Box<dyn CapabilityModule>> {
        let module = Module::from_file(&self.engine, entry)
            .map_err(|e| CapabilityError::activation(&record.name, e))?;

        let mut store = Store::new(&self.engine, ());
        let linker: Linker<()> = Linker::new(&self.engine);
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| CapabilityError::activation(&record.name, e))?;

        Ok(Box::new(WasmModule { store, instance }))
    }
}
