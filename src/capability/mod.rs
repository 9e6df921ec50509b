//! Capability records and the errors shared by every stage of the engine.

mod error;
mod types;

pub use error::{CapabilityError, CapabilityResult};
pub use types::{
    CapabilityRecord, LoadResult, ManifestKind, Priority, SourceLocation, DEFAULT_CATEGORY,
    DEFAULT_VERSION,
};
