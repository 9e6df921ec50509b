//! Consumer documents.
//!
//! Downstream agents read markdown files for capability context. Each
//! registration appends a delimited section; earlier sections are never
//! rewritten, so a document accumulates an audit trail of registrations.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::capability::CapabilityRecord;
use crate::scanner::is_safe_name;

/// Resolves consumer names to their documents.
#[derive(Debug, Clone)]
pub struct ConsumerDocuments {
    root: PathBuf,
    subdirs: Vec<String>,
}

impl ConsumerDocuments {
    /// Look up `<root>/<subdir>/<consumer>.md` for each subdir in order.
    pub fn new(root: impl Into<PathBuf>, subdirs: Vec<String>) -> Self {
        Self { root: root.into(), subdirs }
    }

    /// Find the document for a consumer.
    ///
    /// Names that are not a single path component never resolve.
    pub fn resolve(&self, consumer: &str) -> Option<PathBuf> {
        if !is_safe_name(consumer) {
            return None;
        }
        self.subdirs
            .iter()
            .map(|subdir| self.root.join(subdir).join(format!("{consumer}.md")))
            .find(|path| path.is_file())
    }
}

/// Marker opening a capability's section.
pub fn section_marker(name: &str) -> String {
    format!("<!-- capstan:capability:{name} -->")
}

/// Render the section appended for a capability.
pub fn render_section(record: &CapabilityRecord) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&section_marker(&record.name));
    out.push('\n');
    out.push_str(&format!("## Capability: {}\n\n", record.name));
    out.push_str(&format!("{}\n\n", record.description));
    out.push_str(&format!(
        "- Category: {}\n- Priority: {}\n- Core: {}\n",
        record.category,
        record.priority,
        if record.is_core { "yes" } else { "no" }
    ));

    if !record.functions.is_empty() {
        out.push_str("\n### Functions\n\n");
        for (name, description) in &record.functions {
            if description.is_empty() {
                out.push_str(&format!("- `{name}`\n"));
            } else {
                out.push_str(&format!("- `{name}`: {description}\n"));
            }
        }
    }

    if !record.integration_points.is_empty() {
        out.push_str(&format!(
            "\n### Integration points\n\n{}\n",
            record.integration_points.join(", ")
        ));
    }

    out.push_str(&format!("\n_Registered {}_\n", Utc::now().to_rfc3339()));
    out.push_str(&format!("<!-- /capstan:capability:{} -->\n", record.name));
    out
}

/// Append a capability section to an existing document.
pub fn append_section(path: &Path, record: &CapabilityRecord) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
    file.write_all(render_section(record).as_bytes())
}

/// Whether a document already carries a section for the capability.
pub fn contains_section(path: &Path, name: &str) -> bool {
    std::fs::read_to_string(path).is_ok_and(|content| content.contains(&section_marker(name)))
}
