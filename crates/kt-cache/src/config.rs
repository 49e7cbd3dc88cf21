//! Library configuration

use crate::error::CacheResult;
use crate::file::WriteMode;
use crate::merge::DuplicatePolicy;
use crate::migration::MigrationChain;
use crate::schema::{FsSchemaStore, SchemaValidator};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming a schema directory
pub const SCHEMAS_DIR_ENV: &str = "KTCACHE_SCHEMAS_DIR";

/// Where schemas are loaded from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaSource {
    /// Schemas compiled into the crate
    #[default]
    Embedded,
    /// Directory holding `cache/<version>/schema.json` and
    /// `T4/1.0.0/results-schema.json`
    Directory(PathBuf),
}

/// Cache configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Schema source
    pub schemas: SchemaSource,
    /// Form used when writing whole files
    pub write_mode: WriteMode,
    /// Duplicate-key handling during merge
    pub duplicate_policy: DuplicatePolicy,
}

impl CacheConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with the schema directory taken from `KTCACHE_SCHEMAS_DIR`
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var_os(SCHEMAS_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::new().with_schemas_dir(dir),
            _ => Self::new(),
        }
    }

    /// With schemas loaded from a directory
    #[inline]
    #[must_use]
    pub fn with_schemas_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schemas = SchemaSource::Directory(dir.into());
        self
    }

    /// With write mode
    #[inline]
    #[must_use]
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// With merge duplicate policy
    #[inline]
    #[must_use]
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Validator over the configured schema source
    #[must_use]
    pub fn validator(&self) -> SchemaValidator {
        match &self.schemas {
            SchemaSource::Embedded => SchemaValidator::embedded(),
            SchemaSource::Directory(dir) => SchemaValidator::new(FsSchemaStore::from_schema_dir(dir)),
        }
    }

    /// Built-in migration chain over the configured schemas
    ///
    /// # Errors
    /// Fails only if the built-in step table is inconsistent.
    pub fn migration_chain(&self) -> CacheResult<MigrationChain> {
        MigrationChain::builtin(self.validator())
    }
}
