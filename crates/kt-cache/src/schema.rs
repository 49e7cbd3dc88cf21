//! Schema stores and the schema validator
//!
//! Cache schemas are addressed by version as `<root>/<version>/schema.json`;
//! the T4 results schema lives at a separate fixed path. A [`SchemaStore`]
//! hands out parsed schema documents and [`SchemaValidator`] compiles them
//! (once per schema) and checks documents against them.

use crate::error::{CacheError, CacheResult, SchemaViolation};
use crate::version::SchemaVersion;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Version of the T4 results format this crate exports
pub const T4_SCHEMA_VERSION: &str = "1.0.0";

/// File name of a cache schema inside its version directory
pub const CACHE_SCHEMA_FILE: &str = "schema.json";

/// Built-in cache schemas, keyed by version
const EMBEDDED_CACHE_SCHEMAS: &[(&str, &str)] = &[(
    "1.0.0",
    include_str!("../schemas/cache/1.0.0/schema.json"),
)];

const EMBEDDED_T4_SCHEMA: &str = include_str!("../schemas/T4/1.0.0/results-schema.json");

/// Source of schema documents
///
/// Implement this trait to serve schemas from somewhere other than the
/// filesystem or the built-in set.
pub trait SchemaStore: Send + Sync + fmt::Debug {
    /// Load the cache schema for a version
    ///
    /// # Errors
    /// Returns [`CacheError::SchemaLoad`] if the schema is missing or not JSON.
    fn cache_schema(&self, version: &SchemaVersion) -> CacheResult<Value>;

    /// Load the T4 results schema
    ///
    /// # Errors
    /// Returns [`CacheError::SchemaLoad`] if the schema is missing or not JSON.
    fn t4_schema(&self) -> CacheResult<Value>;
}

/// Schemas compiled into the crate
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedSchemaStore;

impl EmbeddedSchemaStore {
    /// Create embedded store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Versions with an embedded schema
    #[must_use]
    pub fn versions(&self) -> Vec<&'static str> {
        EMBEDDED_CACHE_SCHEMAS.iter().map(|(v, _)| *v).collect()
    }
}

impl SchemaStore for EmbeddedSchemaStore {
    fn cache_schema(&self, version: &SchemaVersion) -> CacheResult<Value> {
        let wanted = version.to_string();
        let (_, text) = EMBEDDED_CACHE_SCHEMAS
            .iter()
            .find(|(v, _)| *v == wanted)
            .ok_or_else(|| CacheError::schema_load(&wanted, "no embedded schema"))?;
        serde_json::from_str(text).map_err(|e| CacheError::schema_load(wanted, e.to_string()))
    }

    fn t4_schema(&self) -> CacheResult<Value> {
        serde_json::from_str(EMBEDDED_T4_SCHEMA)
            .map_err(|e| CacheError::schema_load(t4_schema_id(), e.to_string()))
    }
}

/// Schemas read from a directory tree
#[derive(Debug, Clone)]
pub struct FsSchemaStore {
    cache_root: PathBuf,
    t4_path: PathBuf,
}

impl FsSchemaStore {
    /// Create store over a directory of `<version>/schema.json` entries
    ///
    /// The T4 schema defaults to `<root>/../T4/<version>/results-schema.json`.
    #[must_use]
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        let cache_root = cache_root.into();
        let base = cache_root.parent().map_or_else(PathBuf::new, Path::to_path_buf);
        Self {
            t4_path: default_t4_path(&base),
            cache_root,
        }
    }

    /// Create store over a schema directory laid out like the built-in one
    ///
    /// Expects `<dir>/cache/<version>/schema.json` and
    /// `<dir>/T4/<version>/results-schema.json`.
    #[must_use]
    pub fn from_schema_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            cache_root: dir.join("cache"),
            t4_path: default_t4_path(dir),
        }
    }

    /// Override the T4 schema location
    #[inline]
    #[must_use]
    pub fn with_t4_schema(mut self, path: impl Into<PathBuf>) -> Self {
        self.t4_path = path.into();
        self
    }

    /// Path of the cache schema for a version
    #[inline]
    #[must_use]
    pub fn cache_schema_path(&self, version: &SchemaVersion) -> PathBuf {
        self.cache_root
            .join(version.to_string())
            .join(CACHE_SCHEMA_FILE)
    }

    /// Path of the T4 schema
    #[inline]
    #[must_use]
    pub fn t4_schema_path(&self) -> &Path {
        &self.t4_path
    }
}

fn default_t4_path(base: &Path) -> PathBuf {
    base.join("T4")
        .join(T4_SCHEMA_VERSION)
        .join("results-schema.json")
}

fn load_json_file(schema: &str, path: &Path) -> CacheResult<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CacheError::schema_load(schema, format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| CacheError::schema_load(schema, format!("{}: {e}", path.display())))
}

impl SchemaStore for FsSchemaStore {
    fn cache_schema(&self, version: &SchemaVersion) -> CacheResult<Value> {
        load_json_file(&version.to_string(), &self.cache_schema_path(version))
    }

    fn t4_schema(&self) -> CacheResult<Value> {
        load_json_file(&t4_schema_id(), &self.t4_path)
    }
}

fn t4_schema_id() -> String {
    format!("T4/{T4_SCHEMA_VERSION}")
}

/// Compiles schemas from a store and validates documents against them
///
/// Compiled validators are memoized per schema, so repeated validation
/// against the same version (one per migration hop, one per candidate
/// during recovery) compiles each schema once.
pub struct SchemaValidator {
    store: Box<dyn SchemaStore>,
    compiled: Mutex<HashMap<String, Arc<jsonschema::Validator>>>,
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("store", &self.store)
            .field("compiled", &self.compiled.lock().len())
            .finish()
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::embedded()
    }
}

impl SchemaValidator {
    /// Create validator over a store
    #[must_use]
    pub fn new(store: impl SchemaStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            compiled: Mutex::new(HashMap::new()),
        }
    }

    /// Validator over the built-in schemas
    #[inline]
    #[must_use]
    pub fn embedded() -> Self {
        Self::new(EmbeddedSchemaStore)
    }

    /// Underlying store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &dyn SchemaStore {
        self.store.as_ref()
    }

    /// Validate a cache document against a version's schema
    ///
    /// # Errors
    /// - [`CacheError::SchemaViolation`] if the document does not conform
    /// - [`CacheError::SchemaLoad`] if the schema is unavailable
    pub fn validate(&self, document: &Value, version: &SchemaVersion) -> CacheResult<()> {
        let id = version.to_string();
        let validator = self.compiled_for(&id, || self.store.cache_schema(version))?;
        check(&validator, &id, document)
    }

    /// Check whether a document conforms, treating load failures as errors
    ///
    /// # Errors
    /// Returns [`CacheError::SchemaLoad`] if the schema is unavailable.
    pub fn is_valid(&self, document: &Value, version: &SchemaVersion) -> CacheResult<bool> {
        match self.validate(document, version) {
            Ok(()) => Ok(true),
            Err(CacheError::SchemaViolation(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Validate a T4 document against the T4 results schema
    ///
    /// # Errors
    /// Same as [`SchemaValidator::validate`].
    pub fn validate_t4(&self, document: &Value) -> CacheResult<()> {
        let id = t4_schema_id();
        let validator = self.compiled_for(&id, || self.store.t4_schema())?;
        check(&validator, &id, document)
    }

    fn compiled_for(
        &self,
        id: &str,
        load: impl FnOnce() -> CacheResult<Value>,
    ) -> CacheResult<Arc<jsonschema::Validator>> {
        if let Some(v) = self.compiled.lock().get(id) {
            return Ok(Arc::clone(v));
        }

        let schema = load()?;
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| CacheError::schema_load(id, e.to_string()))?;
        tracing::debug!(schema = id, "compiled schema");

        let validator = Arc::new(validator);
        self.compiled
            .lock()
            .insert(id.to_string(), Arc::clone(&validator));
        Ok(validator)
    }
}

fn check(validator: &jsonschema::Validator, id: &str, document: &Value) -> CacheResult<()> {
    let mut errors = validator.iter_errors(document);
    let Some(first) = errors.next() else {
        return Ok(());
    };
    let violation = SchemaViolation {
        version: id.to_string(),
        path: first.instance_path.to_string(),
        message: first.to_string(),
        error_count: 1 + errors.count(),
    };
    Err(violation.into())
}
