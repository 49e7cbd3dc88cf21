//! kt-cache - versioned auto-tuning cache files
//!
//! Reads, writes and upgrades the JSON cache files an auto-tuner produces:
//! - Walks documents forward through a chain of schema versions, validating
//!   after every hop
//! - Infers the version of files written before version tagging
//! - Exports the latest format to the T4 results interchange format
//! - Keeps files appendable through the open file form
//! - Merges compatible cache files
//!
//! # Example
//!
//! ```rust,no_run
//! use kt_cache::prelude::*;
//!
//! # fn example() -> kt_cache::CacheResult<()> {
//! let chain = CacheConfig::from_env().migration_chain()?;
//! let document = read_cache_file("old_cache.json")?;
//! let latest = chain.convert_to_latest(document)?;
//! write_cache_file(&latest, "old_cache.json", WriteMode::Closed)?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod file;
pub mod merge;
pub mod migration;
pub mod recovery;
pub mod schema;
pub mod t4;
pub mod version;

pub use cache::Cache;
pub use config::{CacheConfig, SchemaSource, SCHEMAS_DIR_ENV};
pub use document::{
    composite_key, FailureKind, Header, Line, NewLine, Objective, Runtime, RESERVED_FIELDS,
};
pub use error::{CacheError, CacheResult, SchemaViolation};
pub use file::{read_cache_file, write_cache_file, CacheFileWriter, WriteMode};
pub use merge::{merge_documents, merge_files, DuplicatePolicy};
pub use migration::{ConvertOptions, MigrationChain, MigrationStep, Transform};
pub use recovery::infer_version;
pub use schema::{EmbeddedSchemaStore, FsSchemaStore, SchemaStore, SchemaValidator};
pub use t4::{to_t4, to_t4_validated, T4Document};
pub use version::{SchemaVersion, VersionRegistry};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with cache files
    pub use crate::{
        read_cache_file, write_cache_file, Cache, CacheConfig, CacheError, CacheResult,
        ConvertOptions, Header, MigrationChain, NewLine, SchemaValidator, SchemaVersion,
        WriteMode,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
