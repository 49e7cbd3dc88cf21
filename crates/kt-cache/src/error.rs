//! Error types for cache file handling
//!
//! Every failure the library can produce is a distinct [`CacheError`]
//! variant so callers can match on the kind:
//! - Version resolution (missing, unknown, downgrade, no step)
//! - Schema conformance ([`SchemaViolation`])
//! - Data-model invariants on headers and lines
//! - File and JSON I/O

use crate::version::SchemaVersion;
use std::fmt;
use std::path::PathBuf;

/// A document failed validation against a schema
///
/// Carries the version whose schema rejected the document and the JSON
/// pointer of the first offending field (empty for the document root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Schema identifier that failed (a cache version or `T4/<version>`)
    pub version: String,
    /// JSON pointer of the offending field
    pub path: String,
    /// Validator message for the first error
    pub message: String,
    /// Number of errors reported by the validator
    pub error_count: usize,
}

impl SchemaViolation {
    /// Create a violation with a single error
    pub fn new(
        version: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            path: path.into(),
            message: message.into(),
            error_count: 1,
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(
            f,
            "document violates schema {} at '{}': {}",
            self.version, path, self.message
        )?;
        if self.error_count > 1 {
            write!(f, " (and {} more)", self.error_count - 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for SchemaViolation {}

/// Main error type for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Document has no `schema_version` field
    #[error("cache document has no schema_version field")]
    MissingVersion,

    /// Declared or requested version is not in the registry
    #[error("unknown schema version: '{0}'")]
    UnknownVersion(String),

    /// Target version is older than the document's version
    #[error("cannot convert from {from} down to {to}: downgrades are not supported")]
    DowngradeNotSupported {
        /// Version of the document
        from: SchemaVersion,
        /// Requested target
        to: SchemaVersion,
    },

    /// No migration step registered for a version on the path
    #[error("no migration step registered from version {0}")]
    NoMigrationPath(SchemaVersion),

    /// Document does not conform to a schema
    #[error(transparent)]
    SchemaViolation(#[from] SchemaViolation),

    /// Unversioned document matches no known schema
    #[error("document does not validate against any known schema version")]
    NoMatchingVersion,

    /// Files cannot be merged
    #[error("cannot merge cache files: {0}")]
    MergeIncompatible(String),

    /// Composite key already present in the cache
    #[error("duplicate key: '{0}'")]
    DuplicateKey(String),

    /// Tune parameter uses a reserved line-field name
    #[error("reserved field name used as tune parameter: '{0}'")]
    ReservedFieldName(String),

    /// Line violates the data model
    #[error("invalid line: {0}")]
    InvalidLine(String),

    /// Line query names a parameter that is not tuned
    #[error("unknown tune parameter: '{0}'")]
    UnknownParameter(String),

    /// No line stored under the key
    #[error("no line with key '{0}'")]
    LineNotFound(String),

    /// Header metadata violates the data model
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Cache must be migrated before it can be modified
    #[error("cache file has version {found}, latest is {latest}; convert it first")]
    OutdatedVersion {
        /// Version found in the file
        found: SchemaVersion,
        /// Latest known version
        latest: SchemaVersion,
    },

    /// Document shape does not match what an operation expects
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// Schema could not be loaded or compiled
    #[error("cannot load schema {schema}: {message}")]
    SchemaLoad {
        /// Schema identifier
        schema: String,
        /// Underlying failure
        message: String,
    },

    /// IO error on a cache or schema file
    #[error("io error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Write failure on a stream with no file path
    #[error("write error: {0}")]
    Write(#[source] std::io::Error),

    /// JSON syntax or data error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create schema load error
    pub fn schema_load(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaLoad {
            schema: schema.into(),
            message: message.into(),
        }
    }

    /// Check if the error stems from version resolution
    #[inline]
    #[must_use]
    pub fn is_version_error(&self) -> bool {
        matches!(
            self,
            Self::MissingVersion
                | Self::UnknownVersion(_)
                | Self::DowngradeNotSupported { .. }
                | Self::NoMigrationPath(_)
                | Self::NoMatchingVersion
                | Self::OutdatedVersion { .. }
        )
    }

    /// Check if the error is a data-model invariant violation
    #[inline]
    #[must_use]
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateKey(_)
                | Self::ReservedFieldName(_)
                | Self::InvalidLine(_)
                | Self::UnknownParameter(_)
                | Self::InvalidHeader(_)
        )
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
