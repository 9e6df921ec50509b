//! Capability registry.
//!
//! Publishes loaded capabilities to external consumers: a consolidated
//! catalog file keyed by name, one integration stub per capability, and
//! optionally a description section appended to each consumer's document.
//! Every publish pass is recorded in a durable registration log.

mod catalog;
mod consumer;
mod log;

pub use catalog::{CatalogEntry, IntegrationStub, CATALOG_FILE, INTEGRATIONS_DIR};
pub use consumer::{section_marker, ConsumerDocuments};
pub use log::{PassSummary, RegistrationLog, LOG_FILE};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::capability::{CapabilityError, CapabilityRecord, CapabilityResult};

/// Registry settings.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Directory holding the catalog, stubs and log.
    pub dir: PathBuf,
    /// Append capability sections to consumer documents.
    pub inject_consumer_docs: bool,
    /// Root for consumer document lookup.
    pub consumer_root: PathBuf,
    /// Subdirectories of `consumer_root` tried in order.
    pub consumer_subdirs: Vec<String>,
}

impl RegistrySettings {
    /// Settings with consumer injection disabled.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            inject_consumer_docs: false,
            consumer_root: PathBuf::from("."),
            consumer_subdirs: vec![
                "agents".to_string(),
                ".agents".to_string(),
                "docs/agents".to_string(),
            ],
        }
    }

    /// Enable consumer document injection under `root`.
    pub fn with_consumer_docs(mut self, root: impl Into<PathBuf>) -> Self {
        self.inject_consumer_docs = true;
        self.consumer_root = root.into();
        self
    }
}

/// Outcome of registering one capability.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    pub registered: bool,
    /// Catalog entry written for the capability.
    pub entry: CatalogEntry,
    /// Consumer documents a section was appended to.
    pub documents: Vec<PathBuf>,
    /// Reasons the registration failed.
    pub errors: Vec<String>,
}

/// Publishes capabilities and owns the catalog file and registration log.
#[derive(Debug)]
pub struct CapabilityRegistry {
    settings: RegistrySettings,
    consumers: ConsumerDocuments,
    index: BTreeMap<String, CatalogEntry>,
    log: RegistrationLog,
}

impl CapabilityRegistry {
    /// Create a registry rooted at `settings.dir`.
    ///
    /// The in-memory index starts empty, so the first publish pass drops
    /// catalog entries left over from a previous process.
    pub fn new(settings: RegistrySettings) -> CapabilityResult<Self> {
        std::fs::create_dir_all(&settings.dir)?;
        let consumers =
            ConsumerDocuments::new(settings.consumer_root.clone(), settings.consumer_subdirs.clone());
        let log = RegistrationLog::open(settings.dir.join(LOG_FILE));
        Ok(Self { settings, consumers, index: BTreeMap::new(), log })
    }

    /// Path of the catalog file.
    pub fn catalog_path(&self) -> PathBuf {
        self.settings.dir.join(CATALOG_FILE)
    }

    /// Read the catalog file last written to `dir`, without touching it.
    pub fn read_catalog(dir: &Path) -> CapabilityResult<BTreeMap<String, CatalogEntry>> {
        catalog::load(&dir.join(CATALOG_FILE))
    }

    /// Registry directory.
    pub fn dir(&self) -> &Path {
        &self.settings.dir
    }

    /// Publish records in the given order.
    ///
    /// A capability is registered only when its consumer documents, catalog
    /// entry and stub were all written and read back. Failures affect that
    /// capability alone. The pass is always recorded in the log.
    pub fn register_all(
        &mut self,
        records: &[CapabilityRecord],
    ) -> BTreeMap<String, RegistrationResult> {
        let now = Utc::now();
        let mut results: BTreeMap<String, RegistrationResult> = BTreeMap::new();

        for record in records {
            let entry = CatalogEntry::from_record(record, now);
            let mut errors = Vec::new();
            let mut documents = Vec::new();

            if self.settings.inject_consumer_docs {
                for consumer in &record.agents_can_use {
                    match self.consumers.resolve(consumer) {
                        Some(path) => match consumer::append_section(&path, record) {
                            Ok(()) => documents.push(path),
                            Err(e) => errors.push(format!(
                                "failed to update consumer document {}: {e}",
                                path.display()
                            )),
                        },
                        None => errors
                            .push(format!("consumer document for '{consumer}' not found")),
                    }
                }
            }

            if errors.is_empty() {
                if let Err(e) =
                    catalog::write_stub(&self.settings.dir, &IntegrationStub::from_record(record, now))
                {
                    errors.push(format!("failed to write integration stub: {e}"));
                }
            }

            if errors.is_empty() {
                self.index.insert(record.name.clone(), entry.clone());
            }

            results.insert(
                record.name.clone(),
                RegistrationResult { registered: false, entry, documents, errors },
            );
        }

        self.publish_and_verify(&mut results);

        for (name, result) in &results {
            if result.registered {
                tracing::info!(capability = %name, "Registered capability");
            } else {
                tracing::warn!(capability = %name, errors = ?result.errors, "Registration failed");
            }
        }

        let summary = PassSummary::from_outcomes(
            results.iter().map(|(name, r)| (name.clone(), r.registered)).collect(),
        );
        if let Err(e) = self.log.append(summary) {
            tracing::warn!(error = %e, "Failed to persist registration log");
        }

        results
    }

    /// Write the catalog, then read it and the touched documents back.
    fn publish_and_verify(&mut self, results: &mut BTreeMap<String, RegistrationResult>) {
        let catalog_path = self.catalog_path();

        if let Err(e) = catalog::save(&catalog_path, &self.index) {
            for result in results.values_mut() {
                result.errors.push(format!("failed to write catalog: {e}"));
            }
        }

        let written = catalog::load(&catalog_path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to re-read catalog");
            BTreeMap::new()
        });

        let mut rejected = Vec::new();
        for (name, result) in results.iter_mut() {
            if result.errors.is_empty() {
                if !written.contains_key(name) {
                    result.errors.push("catalog entry missing after write".to_string());
                }
                for doc in &result.documents {
                    if !consumer::contains_section(doc, name) {
                        result
                            .errors
                            .push(format!("section missing from {} after write", doc.display()));
                    }
                }
            }

            result.registered = result.errors.is_empty();
            if !result.registered && self.index.remove(name).is_some() {
                rejected.push(name.clone());
            }
        }

        if !rejected.is_empty() {
            for name in &rejected {
                let _ = catalog::remove_stub(&self.settings.dir, name);
            }
            if let Err(e) = catalog::save(&catalog_path, &self.index) {
                tracing::warn!(error = %e, "Failed to rewrite catalog");
            }
        }
    }

    /// Remove a capability from the index and the catalog file.
    ///
    /// Sections already appended to consumer documents are left in place.
    pub fn unregister(&mut self, name: &str) -> CapabilityResult<()> {
        if self.index.remove(name).is_none() {
            return Err(CapabilityError::NotFound(name.to_string()));
        }
        catalog::save(&self.catalog_path(), &self.index)?;
        catalog::remove_stub(&self.settings.dir, name)?;
        tracing::info!(capability = %name, "Unregistered capability");
        Ok(())
    }

    /// Catalog entry for a capability.
    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.index.get(name)
    }

    /// Whether a capability is currently registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All registered entries, by name.
    pub fn entries(&self) -> &BTreeMap<String, CatalogEntry> {
        &self.index
    }

    /// The registration log.
    pub fn log(&self) -> &RegistrationLog {
        &self.log
    }
}
