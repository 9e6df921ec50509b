//! Serialized-data manifest encodings.

use serde_json::Value;

use super::ManifestFormat;
use crate::capability::ManifestKind;

/// `capability.toml`
pub struct TomlManifest;

impl ManifestFormat for TomlManifest {
    fn file_name(&self) -> &'static str {
        "capability.toml"
    }

    fn kind(&self) -> ManifestKind {
        ManifestKind::Toml
    }

    fn parse_document(&self, content: &str) -> Result<Value, String> {
        toml::from_str::<Value>(content).map_err(|e| e.to_string())
    }
}

/// `capability.yaml` / `capability.yml`
pub struct YamlManifest {
    pub file_name: &'static str,
}

impl ManifestFormat for YamlManifest {
    fn file_name(&self) -> &'static str {
        self.file_name
    }

    fn kind(&self) -> ManifestKind {
        ManifestKind::Yaml
    }

    fn parse_document(&self, content: &str) -> Result<Value, String> {
        serde_yaml::from_str::<Value>(content).map_err(|e| e.to_string())
    }
}

/// `capability.json`
pub struct JsonManifest;

impl ManifestFormat for JsonManifest {
    fn file_name(&self) -> &'static str {
        "capability.json"
    }

    fn kind(&self) -> ManifestKind {
        ManifestKind::Json
    }

    fn parse_document(&self, content: &str) -> Result<Value, String> {
        serde_json::from_str::<Value>(content).map_err(|e| e.to_string())
    }
}
