//! Schema versions and the version registry
//!
//! Provides [`SchemaVersion`] and [`VersionRegistry`], the ordered list of
//! every cache schema version this build understands.

use crate::error::{CacheError, CacheResult};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Cache schema versions known to this build, oldest first
pub const KNOWN_VERSIONS: &[&str] = &["1.0.0"];

static BUILTIN: Lazy<VersionRegistry> = Lazy::new(|| {
    let versions = KNOWN_VERSIONS
        .iter()
        .map(|v| SchemaVersion::from_str(v))
        .collect::<CacheResult<Vec<_>>>()
        .and_then(VersionRegistry::new);
    match versions {
        Ok(registry) => registry,
        Err(e) => panic!("built-in version list is invalid: {e}"),
    }
});

/// Semantic version of a cache schema
///
/// Ordered by major, then minor, then patch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(semver::Version);

impl SchemaVersion {
    /// Create version from components
    #[inline]
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Underlying semver value
    #[inline]
    #[must_use]
    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl FromStr for SchemaVersion {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let version =
            semver::Version::parse(s).map_err(|_| CacheError::UnknownVersion(s.to_string()))?;
        if !version.pre.is_empty() || !version.build.is_empty() {
            return Err(CacheError::UnknownVersion(s.to_string()));
        }
        Ok(Self(version))
    }
}

impl Display for SchemaVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Ordered registry of known schema versions
///
/// Strictly increasing, never empty, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRegistry {
    versions: Vec<SchemaVersion>,
}

impl VersionRegistry {
    /// Create registry from an ascending version list
    ///
    /// # Errors
    /// Returns [`CacheError::MalformedDocument`] if the list is empty or not
    /// strictly increasing.
    pub fn new(versions: Vec<SchemaVersion>) -> CacheResult<Self> {
        if versions.is_empty() {
            return Err(CacheError::MalformedDocument(
                "version registry cannot be empty".to_string(),
            ));
        }
        if let Some(pair) = versions.windows(2).find(|w| w[0] >= w[1]) {
            return Err(CacheError::MalformedDocument(format!(
                "version registry is not strictly increasing at {} -> {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self { versions })
    }

    /// Parse registry from version strings
    ///
    /// # Errors
    /// Fails on an unparseable version or a non-increasing list.
    pub fn parse<S: AsRef<str>>(versions: &[S]) -> CacheResult<Self> {
        let parsed = versions
            .iter()
            .map(|v| SchemaVersion::from_str(v.as_ref()))
            .collect::<CacheResult<Vec<_>>>()?;
        Self::new(parsed)
    }

    /// Registry of versions shipped with this build
    #[inline]
    #[must_use]
    pub fn builtin() -> &'static Self {
        &BUILTIN
    }

    /// All versions, ascending
    #[inline]
    #[must_use]
    pub fn ordered_versions(&self) -> &[SchemaVersion] {
        &self.versions
    }

    /// Check if version is registered
    #[inline]
    #[must_use]
    pub fn is_known(&self, version: &SchemaVersion) -> bool {
        self.index_of(version).is_some()
    }

    /// Position of version in the registry
    #[inline]
    #[must_use]
    pub fn index_of(&self, version: &SchemaVersion) -> Option<usize> {
        self.versions.binary_search(version).ok()
    }

    /// Version following the given one
    #[must_use]
    pub fn successor(&self, version: &SchemaVersion) -> Option<&SchemaVersion> {
        self.index_of(version)
            .and_then(|i| self.versions.get(i + 1))
    }

    /// Oldest version
    #[inline]
    #[must_use]
    pub fn oldest(&self) -> &SchemaVersion {
        &self.versions[0]
    }

    /// Newest version
    #[inline]
    #[must_use]
    pub fn latest(&self) -> &SchemaVersion {
        &self.versions[self.versions.len() - 1]
    }

    /// Number of versions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Always false; kept for API symmetry with `len`
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Iterate versions, ascending
    pub fn iter(&self) -> impl Iterator<Item = &SchemaVersion> {
        self.versions.iter()
    }
}
