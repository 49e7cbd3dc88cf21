//! Version inference for unversioned cache documents
//!
//! Files written before version tagging carry no `schema_version`. The
//! heuristic stamps each known version into a copy of the document, oldest
//! first, and keeps the first one whose schema accepts it. A document valid
//! against several versions is assigned the oldest.

use crate::error::{CacheError, CacheResult};
use crate::schema::SchemaValidator;
use crate::version::{SchemaVersion, VersionRegistry};
use serde_json::Value;

/// Infer the oldest version an unversioned document conforms to
///
/// Returns the version together with the document stamped with it.
///
/// # Errors
/// - [`CacheError::NoMatchingVersion`] if no schema accepts the document
/// - [`CacheError::MalformedDocument`] if the document is not an object
/// - [`CacheError::SchemaLoad`] if a schema cannot be loaded
pub fn infer_version(
    document: &Value,
    registry: &VersionRegistry,
    validator: &SchemaValidator,
) -> CacheResult<(SchemaVersion, Value)> {
    if !document.is_object() {
        return Err(CacheError::MalformedDocument(
            "cache document must be an object".to_string(),
        ));
    }

    for version in registry.iter() {
        let mut candidate = document.clone();
        candidate["schema_version"] = Value::String(version.to_string());
        if validator.is_valid(&candidate, version)? {
            return Ok((version.clone(), candidate));
        }
        tracing::debug!(version = %version, "unversioned document does not match");
    }
    Err(CacheError::NoMatchingVersion)
}
