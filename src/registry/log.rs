//! Durable registration log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::CapabilityResult;

/// Log file name inside the registry directory.
pub const LOG_FILE: &str = "registration_log.json";

/// Summary of one publish pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    pub pass_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub total_capabilities: usize,
    pub successful: usize,
    pub failed: usize,
    pub details: BTreeMap<String, bool>,
}

impl PassSummary {
    /// Summarize per-capability outcomes.
    pub fn from_outcomes(details: BTreeMap<String, bool>) -> Self {
        let successful = details.values().filter(|ok| **ok).count();
        Self {
            pass_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            total_capabilities: details.len(),
            successful,
            failed: details.len() - successful,
            details,
        }
    }
}

/// Append-only sequence of pass summaries, rewritten in full on every append.
#[derive(Debug)]
pub struct RegistrationLog {
    path: PathBuf,
    passes: Vec<PassSummary>,
}

impl RegistrationLog {
    /// Open the log at `path`, keeping any passes already recorded there.
    ///
    /// An unreadable log is moved aside to `<file>.corrupt` and a fresh one
    /// is started.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let passes = match read(&path) {
            Ok(passes) => passes,
            Err(e) => {
                let aside = corrupt_path(&path);
                tracing::warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "Unreadable registration log, starting a new one"
                );
                if let Err(e) = std::fs::rename(&path, &aside) {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to move registration log aside"
                    );
                }
                Vec::new()
            }
        };
        Self { path, passes }
    }

    /// Record a pass and persist the log.
    pub fn append(&mut self, summary: PassSummary) -> CapabilityResult<()> {
        self.passes.push(summary);
        self.persist()
    }

    fn persist(&self) -> CapabilityResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.passes)?)?;
        Ok(())
    }

    /// Recorded passes, oldest first.
    pub fn passes(&self) -> &[PassSummary] {
        &self.passes
    }

    /// The most recent pass.
    pub fn last(&self) -> Option<&PassSummary> {
        self.passes.last()
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Where an unreadable log is kept.
pub fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}

fn read(path: &Path) -> CapabilityResult<Vec<PassSummary>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
