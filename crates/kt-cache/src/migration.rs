//! Migration chain engine
//!
//! Upgrades a cache document one schema version at a time. Each hop applies
//! the [`MigrationStep`] registered for the current version and validates
//! the result against the destination schema before the next hop runs.
//!
//! # Architecture
//!
//! ```text
//! v1.0.0 ──step──▶ validate(1.1.0) ──step──▶ validate(1.2.0) ──▶ done
//!   │                                   ✗ SchemaViolation aborts the call
//!   └── no schema_version? ──▶ infer_version (oldest matching schema)
//! ```
//!
//! Steps are registered once when the chain is built and never change.
//! The chain only moves forward; there are no inverse transforms.

use crate::error::{CacheError, CacheResult};
use crate::recovery::infer_version;
use crate::schema::SchemaValidator;
use crate::version::{SchemaVersion, VersionRegistry};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Pure document transform
pub type TransformFn = fn(Value) -> CacheResult<Value>;

/// How a step reshapes a document
#[derive(Clone, Copy)]
pub enum Transform {
    /// Hand-written transform
    Function(TransformFn),
    /// Rebuild from the destination schema's top-level properties
    ///
    /// Fields the schema lists are copied when present and taken from the
    /// property's `default` otherwise; fields the schema does not list are
    /// dropped.
    SchemaDefaults,
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function"),
            Self::SchemaDefaults => f.write_str("SchemaDefaults"),
        }
    }
}

/// One hop of the chain: upgrades `from` to its registry successor `to`
#[derive(Debug, Clone)]
pub struct MigrationStep {
    from: SchemaVersion,
    to: SchemaVersion,
    transform: Transform,
}

impl MigrationStep {
    /// Source version
    #[inline]
    #[must_use]
    pub fn from_version(&self) -> &SchemaVersion {
        &self.from
    }

    /// Destination version
    #[inline]
    #[must_use]
    pub fn to_version(&self) -> &SchemaVersion {
        &self.to
    }

    /// Transform kind
    #[inline]
    #[must_use]
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Apply the transform and stamp the destination version
    ///
    /// Does not validate; [`MigrationChain::convert`] does that per hop.
    ///
    /// # Errors
    /// Propagates transform failures; [`CacheError::MalformedDocument`] if
    /// the output is not an object.
    pub fn apply(&self, document: Value, validator: &SchemaValidator) -> CacheResult<Value> {
        let out = match self.transform {
            Transform::Function(f) => f(document)?,
            Transform::SchemaDefaults => {
                let schema = validator.store().cache_schema(&self.to)?;
                fill_from_schema(document, &schema)?
            }
        };
        let Value::Object(mut map) = out else {
            return Err(CacheError::MalformedDocument(format!(
                "migration {} -> {} did not produce an object",
                self.from, self.to
            )));
        };
        map.insert(
            "schema_version".to_string(),
            Value::String(self.to.to_string()),
        );
        Ok(Value::Object(map))
    }
}

fn fill_from_schema(document: Value, schema: &Value) -> CacheResult<Value> {
    let Value::Object(mut old) = document else {
        return Err(CacheError::MalformedDocument(
            "cache document must be an object".to_string(),
        ));
    };
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            CacheError::MalformedDocument("schema has no top-level properties".to_string())
        })?;

    let mut new = Map::new();
    for (name, property) in properties {
        if let Some(value) = old.remove(name) {
            new.insert(name.clone(), value);
        } else if let Some(default) = property.get("default") {
            new.insert(name.clone(), default.clone());
        }
    }
    Ok(Value::Object(new))
}

/// Options for [`MigrationChain::convert`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Target version; latest when `None`
    pub target: Option<SchemaVersion>,
    /// Infer the version of documents without `schema_version`
    pub allow_unversioned: bool,
}

impl ConvertOptions {
    /// Convert to latest, versioned documents only
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With explicit target version
    #[inline]
    #[must_use]
    pub fn with_target(mut self, target: SchemaVersion) -> Self {
        self.target = Some(target);
        self
    }

    /// Allow unversioned documents
    #[inline]
    #[must_use]
    pub fn allow_unversioned(mut self, allow: bool) -> Self {
        self.allow_unversioned = allow;
        self
    }
}

/// Builder registering one step per version transition
#[derive(Debug)]
pub struct MigrationChainBuilder {
    registry: VersionRegistry,
    steps: BTreeMap<SchemaVersion, MigrationStep>,
}

impl MigrationChainBuilder {
    /// Register the step upgrading `from` to its successor
    ///
    /// # Errors
    /// - [`CacheError::UnknownVersion`] if `from` is not registered
    /// - [`CacheError::NoMigrationPath`] if `from` is the latest version
    /// - [`CacheError::DuplicateKey`] if a step for `from` already exists
    pub fn step(mut self, from: &SchemaVersion, transform: Transform) -> CacheResult<Self> {
        if !self.registry.is_known(from) {
            return Err(CacheError::UnknownVersion(from.to_string()));
        }
        let to = self
            .registry
            .successor(from)
            .cloned()
            .ok_or_else(|| CacheError::NoMigrationPath(from.clone()))?;
        if self.steps.contains_key(from) {
            return Err(CacheError::DuplicateKey(from.to_string()));
        }
        self.steps.insert(
            from.clone(),
            MigrationStep {
                from: from.clone(),
                to,
                transform,
            },
        );
        Ok(self)
    }

    /// Register a hand-written transform
    ///
    /// # Errors
    /// Same as [`MigrationChainBuilder::step`].
    pub fn function(self, from: &SchemaVersion, f: TransformFn) -> CacheResult<Self> {
        self.step(from, Transform::Function(f))
    }

    /// Finish with the validator used by every hop
    #[must_use]
    pub fn build(self, validator: SchemaValidator) -> MigrationChain {
        MigrationChain {
            registry: self.registry,
            steps: self.steps,
            validator,
        }
    }
}

/// Forward-only chain of migration steps over a version registry
#[derive(Debug)]
pub struct MigrationChain {
    registry: VersionRegistry,
    steps: BTreeMap<SchemaVersion, MigrationStep>,
    validator: SchemaValidator,
}

impl MigrationChain {
    /// Start building a chain over a registry
    #[inline]
    #[must_use]
    pub fn builder(registry: VersionRegistry) -> MigrationChainBuilder {
        MigrationChainBuilder {
            registry,
            steps: BTreeMap::new(),
        }
    }

    /// Chain of the built-in versions and steps
    ///
    /// # Errors
    /// Fails only if the built-in step table is inconsistent with the
    /// built-in registry.
    pub fn builtin(validator: SchemaValidator) -> CacheResult<Self> {
        let builder = Self::builder(VersionRegistry::builtin().clone());
        Ok(builtin_steps(builder)?.build(validator))
    }

    /// Registry the chain walks
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    /// Validator used after every hop
    #[inline]
    #[must_use]
    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// Step registered for a source version
    #[inline]
    #[must_use]
    pub fn step_for(&self, from: &SchemaVersion) -> Option<&MigrationStep> {
        self.steps.get(from)
    }

    /// Declared version of a document
    ///
    /// Returns `None` when the field is absent.
    ///
    /// # Errors
    /// [`CacheError::UnknownVersion`] for a non-string or non-semver value.
    pub fn declared_version(document: &Value) -> CacheResult<Option<SchemaVersion>> {
        match document.get("schema_version") {
            None => Ok(None),
            Some(Value::String(s)) => SchemaVersion::from_str(s).map(Some),
            Some(other) => Err(CacheError::UnknownVersion(other.to_string())),
        }
    }

    /// Convert a document to the latest version
    ///
    /// # Errors
    /// See [`MigrationChain::convert`].
    pub fn convert_to_latest(&self, document: Value) -> CacheResult<Value> {
        self.convert(document, &ConvertOptions::new())
    }

    /// Convert a document to a target version
    ///
    /// All or nothing: on error the caller gets no partial document.
    ///
    /// # Errors
    /// - [`CacheError::MissingVersion`] if unversioned and not allowed
    /// - [`CacheError::NoMatchingVersion`] if unversioned and nothing matches
    /// - [`CacheError::UnknownVersion`] for an unregistered current or target
    /// - [`CacheError::DowngradeNotSupported`] if target is older
    /// - [`CacheError::NoMigrationPath`] if a hop has no step
    /// - [`CacheError::SchemaViolation`] if a hop's output fails validation
    pub fn convert(&self, document: Value, options: &ConvertOptions) -> CacheResult<Value> {
        let (current, mut document) = match Self::declared_version(&document)? {
            Some(v) => (v, document),
            None if options.allow_unversioned => {
                let (v, doc) = infer_version(&document, &self.registry, &self.validator)?;
                tracing::info!(version = %v, "inferred version of unversioned cache");
                (v, doc)
            }
            None => return Err(CacheError::MissingVersion),
        };

        let target = options.target.as_ref().unwrap_or_else(|| self.registry.latest());
        let target_index = self
            .registry
            .index_of(target)
            .ok_or_else(|| CacheError::UnknownVersion(target.to_string()))?;

        let current_index = self
            .registry
            .index_of(&current)
            .ok_or_else(|| CacheError::UnknownVersion(current.to_string()))?;

        if current_index > target_index {
            return Err(CacheError::DowngradeNotSupported {
                from: current,
                to: target.clone(),
            });
        }
        if current_index == target_index {
            return Ok(document);
        }

        for version in &self.registry.ordered_versions()[current_index..target_index] {
            let step = self
                .steps
                .get(version)
                .ok_or_else(|| CacheError::NoMigrationPath(version.clone()))?;
            document = step.apply(document, &self.validator)?;
            self.validator.validate(&document, &step.to)?;
            tracing::debug!(from = %step.from, to = %step.to, transform = ?step.transform, "migrated");
        }

        tracing::info!(from = %current, to = %target, "converted cache document");
        Ok(document)
    }
}

/// Steps between the built-in versions
///
/// Register a step here together with each new schema in
/// [`crate::version::KNOWN_VERSIONS`].
fn builtin_steps(builder: MigrationChainBuilder) -> CacheResult<MigrationChainBuilder> {
    Ok(builder)
}
