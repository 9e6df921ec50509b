//! Capability manifest parsing.
//!
//! Every plugin directory may carry one manifest describing the capability it
//! provides. Several encodings are accepted behind the [`ManifestFormat`]
//! trait; the first file found in [`MANIFEST_FORMATS`] order wins.
//!
//! # Example
//!
//! ```yaml
//! name: alpha
//! description: Routes requests to the right handler
//! priority: critical
//! is_core: true
//! agents_can_use: [orchestrator]
//! functions:
//!   route: Pick a handler for a request
//! ```

mod data;
mod embedded;

pub use data::{JsonManifest, TomlManifest, YamlManifest};
pub use embedded::{extract_literal, EmbeddedManifest, EMBEDDED_SOURCE_FILE};

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::capability::{
    CapabilityError, CapabilityRecord, CapabilityResult, ManifestKind, Priority, SourceLocation,
    DEFAULT_CATEGORY, DEFAULT_VERSION,
};

/// A manifest encoding.
pub trait ManifestFormat: Send + Sync {
    /// File name this encoding is looked up under.
    fn file_name(&self) -> &'static str;

    /// Encoding reported in the record's source location.
    fn kind(&self) -> ManifestKind;

    /// Parse the file content into a generic document.
    fn parse_document(&self, content: &str) -> Result<Value, String>;
}

/// Manifest lookup order, first match wins.
pub static MANIFEST_FORMATS: &[&dyn ManifestFormat] = &[
    &EmbeddedManifest,
    &TomlManifest,
    &YamlManifest { file_name: "capability.yaml" },
    &YamlManifest { file_name: "capability.yml" },
    &JsonManifest,
];

/// All file names that can hold a manifest.
pub fn manifest_file_names() -> impl Iterator<Item = &'static str> {
    MANIFEST_FORMATS.iter().map(|f| f.file_name())
}

/// Find the manifest for a plugin directory.
pub fn locate(dir: &Path) -> Option<(&'static dyn ManifestFormat, std::path::PathBuf)> {
    MANIFEST_FORMATS.iter().find_map(|format| {
        let path = dir.join(format.file_name());
        path.is_file().then_some((*format, path))
    })
}

/// Parse the manifest at `path` with the given encoding.
pub fn parse_file(
    format: &dyn ManifestFormat,
    path: &Path,
    dir: &Path,
) -> CapabilityResult<CapabilityRecord> {
    let content =
        std::fs::read_to_string(path).map_err(|e| CapabilityError::manifest(path, e))?;
    let document =
        format.parse_document(&content).map_err(|e| CapabilityError::manifest(path, e))?;

    if !document.is_object() {
        return Err(CapabilityError::manifest(path, "manifest must be a mapping"));
    }

    let source = SourceLocation {
        feature_directory: dir.to_path_buf(),
        manifest_file: Some(path.to_path_buf()),
        format: format.kind(),
    };

    Ok(normalize(document, source))
}

/// Build a record from a parsed manifest document, applying field defaults.
///
/// Normalization is lenient: malformed fields fall back to their defaults and
/// are reported later by validation, which inspects the raw document.
pub fn normalize(document: Value, source: SourceLocation) -> CapabilityRecord {
    let empty = Map::new();
    let fields = document.as_object().unwrap_or(&empty);

    let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);

    let name = text("name")
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| directory_name(&source.feature_directory));

    CapabilityRecord {
        name,
        version: text("version").unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        description: text("description").unwrap_or_default(),
        category: text("category").unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        priority: fields
            .get("priority")
            .and_then(Value::as_str)
            .and_then(Priority::parse)
            .unwrap_or_default(),
        is_core: fields.get("is_core").and_then(Value::as_bool).unwrap_or(false),
        agents_can_use: string_list(fields.get("agents_can_use")),
        functions: function_map(fields.get("functions")),
        integration_points: dedup(string_list(fields.get("integration_points"))),
        source,
        auto_generated: false,
        manifest: document,
    }
}

/// Synthesize a placeholder record for a directory without a manifest.
pub fn synthesize(dir: &Path) -> CapabilityRecord {
    let name = directory_name(dir);
    let description = format!("Auto-discovered capability: {name}");
    let document = json!({
        "name": name,
        "description": description,
        "agents_can_use": [],
        "category": DEFAULT_CATEGORY,
        "priority": Priority::Low.as_str(),
        "is_core": false,
        "auto_generated": true,
    });

    CapabilityRecord {
        name,
        version: DEFAULT_VERSION.to_string(),
        description,
        category: DEFAULT_CATEGORY.to_string(),
        priority: Priority::Low,
        is_core: false,
        agents_can_use: Vec::new(),
        functions: BTreeMap::new(),
        integration_points: Vec::new(),
        source: SourceLocation {
            feature_directory: dir.to_path_buf(),
            manifest_file: None,
            format: ManifestKind::Synthesized,
        },
        auto_generated: true,
        manifest: document,
    }
}

fn directory_name(dir: &Path) -> String {
    dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => {
            items.iter().filter_map(Value::as_str).map(str::to_string).collect()
        }
        _ => Vec::new(),
    }
}

fn function_map(value: Option<&Value>) -> BTreeMap<String, String> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, desc)| {
                let desc = desc.as_str().map_or_else(|| desc.to_string(), str::to_string);
                (name.clone(), desc)
            })
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|name| (name.to_string(), String::new()))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}
