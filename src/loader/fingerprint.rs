//! Change detection for the capability tree.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::capability::{CapabilityError, CapabilityResult};
use crate::manifest::manifest_file_names;
use crate::scanner::CapabilityScanner;

/// Summary of the manifest-eligible files under the capability root.
///
/// Two fingerprints differ when a manifest was touched, or when plugin
/// directories or manifests were added or removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeFingerprint {
    /// Latest modification time across manifest files.
    pub latest: Option<SystemTime>,
    /// Number of manifest files.
    pub manifests: usize,
    /// Plugin directory names.
    pub directories: BTreeSet<String>,
}

impl TreeFingerprint {
    /// Capture the current state of the scanner's root.
    pub fn capture(scanner: &CapabilityScanner) -> CapabilityResult<Self> {
        let root = scanner.root();
        let mut fingerprint = Self::default();

        if !root.is_dir() {
            return Ok(fingerprint);
        }
        std::fs::read_dir(root).map_err(|e| {
            CapabilityError::Monitor(format!("cannot read {}: {e}", root.display()))
        })?;

        let eligible: BTreeSet<&str> = manifest_file_names().collect();

        for entry in WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !(e.file_type().is_dir()
                        && scanner.should_skip_dir(&e.file_name().to_string_lossy()))
            })
            .filter_map(Result::ok)
        {
            if entry.depth() == 1 && entry.file_type().is_dir() {
                fingerprint.directories.insert(entry.file_name().to_string_lossy().into_owned());
                continue;
            }

            if !entry.file_type().is_file()
                || !eligible.contains(entry.file_name().to_string_lossy().as_ref())
            {
                continue;
            }

            fingerprint.manifests += 1;
            if let Some(modified) = modified(entry.path()) {
                fingerprint.latest = fingerprint.latest.max(Some(modified));
            }
        }

        Ok(fingerprint)
    }

    /// Whether anything changed since `previous`.
    pub fn changed_since(&self, previous: &Self) -> bool {
        self != previous
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
