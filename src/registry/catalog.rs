//! Consolidated catalog file and integration stubs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::{
    CapabilityError, CapabilityRecord, CapabilityResult, ManifestKind, Priority,
};
use crate::scanner::is_safe_name;

/// Catalog file name inside the registry directory.
pub const CATALOG_FILE: &str = "catalog.json";

/// Directory holding integration stubs.
pub const INTEGRATIONS_DIR: &str = "integrations";

/// One capability's entry in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub version: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    pub is_core: bool,
    pub agents_can_use: Vec<String>,
    /// Function names only.
    pub functions: Vec<String>,
    pub integration_points: Vec<String>,
    pub registered_at: DateTime<Utc>,
}

impl CatalogEntry {
    /// Summarize a record for the catalog.
    pub fn from_record(record: &CapabilityRecord, registered_at: DateTime<Utc>) -> Self {
        Self {
            name: record.name.clone(),
            version: record.version.clone(),
            description: record.description.clone(),
            category: record.category.clone(),
            priority: record.priority,
            is_core: record.is_core,
            agents_can_use: record.agents_can_use.clone(),
            functions: record.functions.keys().cloned().collect(),
            integration_points: record.integration_points.clone(),
            registered_at,
        }
    }
}

/// Read a catalog file. A missing file is an empty catalog.
pub fn load(path: &Path) -> CapabilityResult<BTreeMap<String, CatalogEntry>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Rewrite the catalog file in full.
pub fn save(path: &Path, entries: &BTreeMap<String, CatalogEntry>) -> CapabilityResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Minimal machine-readable pointer for integrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationStub {
    pub name: String,
    pub version: String,
    pub feature_directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    pub format: ManifestKind,
    pub agents_can_use: Vec<String>,
    pub integration_points: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl IntegrationStub {
    /// Build the stub for a record.
    pub fn from_record(record: &CapabilityRecord, generated_at: DateTime<Utc>) -> Self {
        Self {
            name: record.name.clone(),
            version: record.version.clone(),
            feature_directory: record.source.feature_directory.clone(),
            manifest: record.source.manifest_file.clone(),
            format: record.source.format,
            agents_can_use: record.agents_can_use.clone(),
            integration_points: record.integration_points.clone(),
            generated_at,
        }
    }
}

/// Path of the stub for a capability.
pub fn stub_path(registry_dir: &Path, name: &str) -> PathBuf {
    registry_dir.join(INTEGRATIONS_DIR).join(format!("{name}.json"))
}

/// Write the integration stub for a record.
pub fn write_stub(registry_dir: &Path, stub: &IntegrationStub) -> CapabilityResult<PathBuf> {
    if !is_safe_name(&stub.name) {
        return Err(CapabilityError::registration(&stub.name, "name is not a plain identifier"));
    }
    let path = stub_path(registry_dir, &stub.name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(stub)?)?;
    Ok(path)
}

/// Remove a capability's stub, ignoring a missing file.
pub fn remove_stub(registry_dir: &Path, name: &str) -> CapabilityResult<()> {
    if !is_safe_name(name) {
        return Ok(());
    }
    match std::fs::remove_file(stub_path(registry_dir, name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
