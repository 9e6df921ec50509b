//! Capability record validation.

use serde_json::{Map, Value};

use crate::capability::{CapabilityRecord, Priority};

/// Fields every manifest must declare.
pub const REQUIRED_FIELDS: &[&str] = &["name", "description", "agents_can_use"];

/// Expected shape of a manifest field.
#[derive(Debug, Clone, Copy)]
enum Shape {
    String,
    StringList,
    Boolean,
    Mapping,
}

impl Shape {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::StringList => {
                value.as_array().is_some_and(|items| items.iter().all(Value::is_string))
            }
            Self::Boolean => value.is_boolean(),
            Self::Mapping => value.is_object(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::StringList => "a list of strings",
            Self::Boolean => "a boolean",
            Self::Mapping => "a mapping",
        }
    }
}

const FIELD_SHAPES: &[(&str, Shape)] = &[
    ("name", Shape::String),
    ("description", Shape::String),
    ("agents_can_use", Shape::StringList),
    ("version", Shape::String),
    ("category", Shape::String),
    ("priority", Shape::String),
    ("is_core", Shape::Boolean),
    ("functions", Shape::Mapping),
    ("integration_points", Shape::StringList),
];

/// Whether a name can be used as a single path component.
///
/// Capability and consumer names become file names under the registry and
/// consumer directories, so separators, `..` and control characters are
/// rejected.
pub fn is_safe_name(name: &str) -> bool {
    !name.trim().is_empty()
        && !name.contains(['/', '\\'])
        && !name.contains("..")
        && !name.chars().any(char::is_control)
}

/// Validate a record, returning human readable errors.
///
/// An empty list means the record is valid. Validation has no side effects.
pub fn validate(record: &CapabilityRecord) -> Vec<String> {
    match record.manifest.as_object() {
        Some(fields) => validate_document(fields),
        None => validate_fields(record),
    }
}

fn validate_document(fields: &Map<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();

    for field in REQUIRED_FIELDS {
        if fields.get(*field).map_or(true, Value::is_null) {
            errors.push(format!("missing required field: {field}"));
        }
    }

    for (field, shape) in FIELD_SHAPES {
        match fields.get(*field) {
            None | Some(Value::Null) => {}
            Some(value) if !shape.matches(value) => {
                errors.push(format!("field '{field}' must be {}", shape.describe()));
            }
            Some(_) => {}
        }
    }

    if let Some(name) = fields.get("name").and_then(Value::as_str) {
        if name.trim().is_empty() {
            errors.push("field 'name' must not be empty".to_string());
        } else if !is_safe_name(name) {
            errors.push(format!("field 'name' must be a plain identifier, got '{name}'"));
        }
    }

    if let Some(consumers) = fields.get("agents_can_use").and_then(Value::as_array) {
        for consumer in consumers.iter().filter_map(Value::as_str) {
            if !is_safe_name(consumer) {
                errors.push(format!(
                    "field 'agents_can_use' must hold plain identifiers, got '{consumer}'"
                ));
            }
        }
    }

    if let Some(priority) = fields.get("priority").and_then(Value::as_str) {
        if Priority::parse(priority).is_none() {
            errors.push(format!("invalid priority '{priority}'"));
        }
    }

    errors
}

/// Fallback for records built in code without a manifest document.
fn validate_fields(record: &CapabilityRecord) -> Vec<String> {
    let mut errors = Vec::new();
    if record.name.trim().is_empty() {
        errors.push("missing required field: name".to_string());
    } else if !is_safe_name(&record.name) {
        errors.push(format!("field 'name' must be a plain identifier, got '{}'", record.name));
    }
    if record.description.trim().is_empty() {
        errors.push("missing required field: description".to_string());
    }
    errors
}
