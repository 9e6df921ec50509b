//! Capability scanner.
//!
//! Walks the immediate subdirectories of the capability root, parses one
//! manifest per directory and keeps the last scan cached for point queries.

mod validate;

pub use validate::{is_safe_name, validate, REQUIRED_FIELDS};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;

use crate::capability::{CapabilityError, CapabilityRecord, CapabilityResult};
use crate::manifest;

/// Directories that never hold capabilities.
pub const CACHE_DIRS: &[&str] =
    &["__pycache__", "node_modules", "target", "dist", "build", "coverage", "venv"];

/// Two directories declared the same capability name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCollision {
    pub name: String,
    /// Directory whose record was kept.
    pub kept: PathBuf,
    /// Directory whose record was dropped.
    pub ignored: PathBuf,
}

/// Aggregate statistics for one scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    /// Plugin directories visited.
    pub directories: usize,
    /// Records parsed from a manifest, by encoding.
    pub by_format: BTreeMap<String, usize>,
    /// Records synthesized for directories without a manifest.
    pub auto_generated: usize,
    /// Manifests that failed to parse.
    pub failed: Vec<(PathBuf, String)>,
    /// Duplicate capability names.
    pub collisions: Vec<NameCollision>,
}

impl ScanStats {
    /// Total number of records produced.
    pub fn discovered(&self) -> usize {
        self.by_format.values().sum::<usize>() + self.auto_generated
    }

    /// Names declared by more than one directory.
    pub fn colliding_names(&self) -> impl Iterator<Item = &str> {
        self.collisions.iter().map(|c| c.name.as_str())
    }
}

#[derive(Debug, Clone, Default)]
struct ScanSnapshot {
    records: BTreeMap<String, CapabilityRecord>,
    stats: ScanStats,
}

/// Discovers capabilities under a root directory.
pub struct CapabilityScanner {
    root: PathBuf,
    ignore_dirs: Vec<String>,
    cache: Mutex<Option<ScanSnapshot>>,
}

impl std::fmt::Debug for CapabilityScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.cache.lock().as_ref().map(|s| s.records.len());
        f.debug_struct("CapabilityScanner")
            .field("root", &self.root)
            .field("cached", &cached)
            .finish()
    }
}

impl CapabilityScanner {
    /// Create a scanner for the given capability root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), ignore_dirs: Vec::new(), cache: Mutex::new(None) }
    }

    /// Additional directory names to skip.
    pub fn with_ignore_dirs(mut self, dirs: Vec<String>) -> Self {
        self.ignore_dirs = dirs;
        self
    }

    /// The capability root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan every plugin directory under the root.
    ///
    /// A missing root yields an empty mapping. Per-plugin failures are logged
    /// and skipped; only an unreadable root is an error.
    pub fn scan_all(&self) -> CapabilityResult<BTreeMap<String, CapabilityRecord>> {
        let snapshot = self.scan_root()?;
        let records = snapshot.records.clone();
        *self.cache.lock() = Some(snapshot);
        Ok(records)
    }

    fn scan_root(&self) -> CapabilityResult<ScanSnapshot> {
        let mut snapshot = ScanSnapshot::default();

        if !self.root.is_dir() {
            tracing::warn!(root = %self.root.display(), "Capability root does not exist");
            return Ok(snapshot);
        }

        for dir in self.plugin_dirs()? {
            snapshot.stats.directories += 1;

            let record = match self.scan_directory(&dir) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Skipping capability");
                    snapshot.stats.failed.push((dir, e.to_string()));
                    continue;
                }
            };

            if let Some(existing) = snapshot.records.get(&record.name) {
                tracing::error!(
                    capability = %record.name,
                    kept = %existing.source.feature_directory.display(),
                    ignored = %dir.display(),
                    "Duplicate capability name"
                );
                snapshot.stats.collisions.push(NameCollision {
                    name: record.name.clone(),
                    kept: existing.source.feature_directory.clone(),
                    ignored: dir,
                });
                continue;
            }

            if record.auto_generated {
                snapshot.stats.auto_generated += 1;
            } else {
                *snapshot.stats.by_format.entry(record.source.format.to_string()).or_insert(0) +=
                    1;
            }

            tracing::debug!(
                capability = %record.name,
                format = %record.source.format,
                "Discovered capability"
            );
            snapshot.records.insert(record.name.clone(), record);
        }

        if snapshot.records.is_empty() {
            tracing::warn!(root = %self.root.display(), "No capabilities discovered");
        } else {
            tracing::info!(
                count = snapshot.records.len(),
                failed = snapshot.stats.failed.len(),
                "Capability scan complete"
            );
        }

        Ok(snapshot)
    }

    /// Plugin directories under the root, sorted by name.
    pub fn plugin_dirs(&self) -> CapabilityResult<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| CapabilityError::Scan {
            path: self.root.clone(),
            message: e.to_string(),
        })?;

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter(|path| {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                !self.should_skip_dir(name)
            })
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    /// Parse a single plugin directory.
    ///
    /// Directories without a manifest yield a synthesized record.
    pub fn scan_directory(&self, dir: &Path) -> CapabilityResult<CapabilityRecord> {
        match manifest::locate(dir) {
            Some((format, path)) => manifest::parse_file(format, &path, dir),
            None => {
                tracing::debug!(dir = %dir.display(), "No manifest, synthesizing record");
                Ok(manifest::synthesize(dir))
            }
        }
    }

    /// Whether a directory name is skipped during scanning.
    pub fn should_skip_dir(&self, name: &str) -> bool {
        is_ignored_dir(name) || self.ignore_dirs.iter().any(|d| d == name)
    }

    /// Validate a record; see [`validate`].
    pub fn validate(&self, record: &CapabilityRecord) -> Vec<String> {
        validate(record)
    }

    fn cached<T>(&self, f: impl FnOnce(&ScanSnapshot) -> T) -> CapabilityResult<T> {
        let mut cache = self.cache.lock();
        if cache.is_none() {
            *cache = Some(self.scan_root()?);
        }
        let snapshot = cache.get_or_insert_with(ScanSnapshot::default);
        Ok(f(snapshot))
    }

    /// Look up a capability from the last scan.
    pub fn get_by_name(&self, name: &str) -> CapabilityResult<Option<CapabilityRecord>> {
        self.cached(|s| s.records.get(name).cloned())
    }

    /// Capabilities in the given category from the last scan.
    pub fn get_by_category(&self, category: &str) -> CapabilityResult<Vec<CapabilityRecord>> {
        self.cached(|s| s.records.values().filter(|r| r.category == category).cloned().collect())
    }

    /// Core capabilities from the last scan.
    pub fn get_core_capabilities(&self) -> CapabilityResult<Vec<CapabilityRecord>> {
        self.cached(|s| s.records.values().filter(|r| r.is_core).cloned().collect())
    }

    /// Statistics of the last scan, if any.
    pub fn last_stats(&self) -> Option<ScanStats> {
        self.cache.lock().as_ref().map(|s| s.stats.clone())
    }

    /// Drop the cached scan.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }
}

/// Hidden and cache directories are never scanned.
pub fn is_ignored_dir(name: &str) -> bool {
    name.starts_with('.') || CACHE_DIRS.contains(&name)
}
