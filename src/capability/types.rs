//! Core capability types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Load priority of a capability.
///
/// Variants are declared from most to least urgent so the derived `Ord`
/// sorts critical capabilities first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Must be active before anything else.
    Critical,
    /// Important capability.
    High,
    /// Regular capability.
    Medium,
    /// Informational or optional capability.
    Low,
}

impl Priority {
    /// Parse a priority from its manifest spelling.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    /// Ordinal used for load ordering, lower loads first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    /// Manifest spelling of this priority.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Low
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding a manifest was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    /// `CAPABILITY` literal embedded in a Rust source file.
    Embedded,
    /// TOML document.
    Toml,
    /// YAML document.
    Yaml,
    /// JSON document.
    Json,
    /// No manifest; the record was synthesized from the directory.
    Synthesized,
}

impl ManifestKind {
    /// Human readable name for this encoding.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::Toml => "toml",
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Synthesized => "synthesized",
        }
    }
}

impl std::fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Where a record was discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// The plugin directory.
    pub feature_directory: PathBuf,
    /// The manifest file, absent for synthesized records.
    pub manifest_file: Option<PathBuf>,
    /// Encoding of the manifest.
    pub format: ManifestKind,
}

/// The unit of discovery: one capability described by one manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub name: String,
    pub version: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    pub is_core: bool,
    /// Consumers allowed to reference this capability, in declaration order.
    pub agents_can_use: Vec<String>,
    /// Function name to human readable description.
    pub functions: BTreeMap<String, String>,
    /// Lifecycle moments at which the capability should be considered.
    pub integration_points: Vec<String>,
    pub source: SourceLocation,
    pub auto_generated: bool,
    /// The manifest document as declared, used for shape validation.
    #[serde(skip)]
    pub manifest: serde_json::Value,
}

impl CapabilityRecord {
    /// Whether this record came from a real manifest.
    pub fn has_manifest(&self) -> bool {
        !self.auto_generated
    }

    /// The plugin directory this record was discovered in.
    pub fn directory(&self) -> &std::path::Path {
        &self.source.feature_directory
    }
}

/// Outcome of activating one capability during a loader pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl LoadResult {
    /// Start tracking a capability.
    pub fn begin() -> Self {
        Self { loaded: false, error: None, started_at: Utc::now(), finished_at: None }
    }

    /// Finalize as successful.
    pub fn succeed(mut self) -> Self {
        self.loaded = true;
        self.error = None;
        self.finished_at = Some(Utc::now());
        self
    }

    /// Finalize as failed with the given reason.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.loaded = false;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        self
    }

    /// Whether the result has been finalized.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Manifest field defaults.
pub const DEFAULT_VERSION: &str = "1.0.0";
pub const DEFAULT_CATEGORY: &str = "unknown";
