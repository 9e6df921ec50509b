//! Manifests embedded in a Rust source file.
//!
//! The capability's `capability.rs` declares its metadata as a raw string
//! constant holding a JSON or TOML document:
//!
//! ```text
//! pub const CAPABILITY: &str = r#"
//! name = "alpha"
//! description = "Routing"
//! agents_can_use = ["orchestrator"]
//! "#;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::ManifestFormat;
use crate::capability::ManifestKind;

/// Source file carrying the embedded literal.
pub const EMBEDDED_SOURCE_FILE: &str = "capability.rs";

static LITERAL_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bCAPABILITY\s*(?::\s*&\s*(?:'static\s+)?str\s*)?=\s*r(#*)""#)
        .expect("valid regex")
});

/// `CAPABILITY` literal inside `capability.rs`.
pub struct EmbeddedManifest;

impl ManifestFormat for EmbeddedManifest {
    fn file_name(&self) -> &'static str {
        EMBEDDED_SOURCE_FILE
    }

    fn kind(&self) -> ManifestKind {
        ManifestKind::Embedded
    }

    fn parse_document(&self, content: &str) -> Result<Value, String> {
        let literal = extract_literal(content)
            .ok_or_else(|| "no CAPABILITY raw string literal found".to_string())?;

        if literal.trim_start().starts_with('{') {
            serde_json::from_str(literal).map_err(|e| e.to_string())
        } else {
            toml::from_str(literal).map_err(|e| e.to_string())
        }
    }
}

/// Extract the body of the `CAPABILITY` raw string literal.
pub fn extract_literal(source: &str) -> Option<&str> {
    let captures = LITERAL_START.captures(source)?;
    let hashes = captures.get(1).map_or("", |m| m.as_str());
    let body_start = captures.get(0)?.end();

    let terminator = format!("\"{hashes}");
    let body_len = source[body_start..].find(&terminator)?;
    Some(&source[body_start..body_start + body_len])
}
