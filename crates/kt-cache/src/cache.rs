//! Cache file handle
//!
//! [`Cache`] owns the header and lines of one cache file. Handles come in
//! two flavors:
//! - writable ([`Cache::create`], [`Cache::open`]): the file is kept in
//!   open form and every append is a plain byte append
//! - read-only ([`Cache::read`]): outdated files are converted in memory;
//!   appends and deletes never touch the file

use crate::document::{Header, Line, NewLine};
use crate::error::{CacheError, CacheResult};
use crate::file::{self, WriteMode};
use crate::migration::{ConvertOptions, MigrationChain};
use crate::version::SchemaVersion;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Handle on a cache file
#[derive(Debug, Clone)]
pub struct Cache {
    path: PathBuf,
    version: SchemaVersion,
    header: Header,
    fields: Map<String, Value>,
    lines: Map<String, Value>,
    writable: bool,
}

impl Cache {
    /// Create a new, empty cache file at the latest version
    ///
    /// Overwrites an existing file.
    ///
    /// # Errors
    /// - [`CacheError::ReservedFieldName`], [`CacheError::DuplicateKey`] or
    ///   [`CacheError::InvalidHeader`] for a bad header
    /// - [`CacheError::SchemaViolation`] if the header fails the schema
    /// - [`CacheError::Io`] if the file cannot be written
    pub fn create(
        path: impl Into<PathBuf>,
        header: Header,
        chain: &MigrationChain,
    ) -> CacheResult<Self> {
        header.validate()?;
        let version = chain.registry().latest().clone();
        let document = header.to_document(&version)?;
        chain.validator().validate(&document, &version)?;

        let path = path.into();
        file::write_cache_file(&document, &path, WriteMode::Open)?;
        tracing::info!(path = %path.display(), version = %version, "created cache file");
        Self::from_document(path, document, true)
    }

    /// Open an existing latest-version cache file for appending
    ///
    /// The file is rewritten in open form.
    ///
    /// # Errors
    /// - [`CacheError::OutdatedVersion`] if the file needs converting first
    /// - [`CacheError::MissingVersion`] or [`CacheError::UnknownVersion`]
    /// - [`CacheError::SchemaViolation`] or a data-model error for bad content
    pub fn open(path: impl Into<PathBuf>, chain: &MigrationChain) -> CacheResult<Self> {
        let path = path.into();
        let (document, mode) = file::read_cache_file_with_mode(&path)?;
        let latest = chain.registry().latest();
        let found = MigrationChain::declared_version(&document)?.ok_or(CacheError::MissingVersion)?;
        if !chain.registry().is_known(&found) {
            return Err(CacheError::UnknownVersion(found.to_string()));
        }
        if &found != latest {
            return Err(CacheError::OutdatedVersion {
                found,
                latest: latest.clone(),
            });
        }
        chain.validator().validate(&document, latest)?;

        let cache = Self::from_document(path, document, true)?;
        file::write_cache_file(&cache.to_document(), &cache.path, WriteMode::Open)?;
        tracing::debug!(path = %cache.path.display(), was = ?mode, lines = cache.len(), "opened cache file");
        Ok(cache)
    }

    /// Read a cache file without modifying it
    ///
    /// Outdated files are converted to the latest version in memory.
    ///
    /// # Errors
    /// Any conversion error of [`MigrationChain::convert`], plus schema and
    /// data-model errors for bad content.
    pub fn read(
        path: impl Into<PathBuf>,
        chain: &MigrationChain,
        options: &ConvertOptions,
    ) -> CacheResult<Self> {
        let path = path.into();
        let document = file::read_cache_file(&path)?;
        let options = ConvertOptions {
            target: None,
            ..options.clone()
        };
        let document = chain.convert(document, &options)?;
        chain
            .validator()
            .validate(&document, chain.registry().latest())?;
        Self::from_document(path, document, false)
    }

    /// Wrap an in-memory latest-version document as a read-only handle
    ///
    /// # Errors
    /// Data-model errors for bad content.
    pub fn from_value(path: impl Into<PathBuf>, document: Value) -> CacheResult<Self> {
        Self::from_document(path.into(), document, false)
    }

    fn from_document(path: PathBuf, document: Value, writable: bool) -> CacheResult<Self> {
        let version = MigrationChain::declared_version(&document)?.ok_or(CacheError::MissingVersion)?;
        let header = Header::from_document(&document)?;
        header.validate()?;

        let Value::Object(mut fields) = document else {
            return Err(CacheError::MalformedDocument(
                "cache document must be an object".to_string(),
            ));
        };
        let lines = match fields.remove("cache") {
            Some(Value::Object(lines)) => lines,
            _ => {
                return Err(CacheError::MalformedDocument(
                    "'cache' must be an object".to_string(),
                ))
            }
        };

        header.validate_lines(&lines)?;

        Ok(Self {
            path,
            version,
            header,
            fields,
            lines,
            writable,
        })
    }

    /// File the handle was created from
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema version of the in-memory document
    #[inline]
    #[must_use]
    pub fn version(&self) -> &SchemaVersion {
        &self.version
    }

    /// Header metadata
    #[inline]
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Check if appends go to the file
    #[inline]
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Number of lines
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check if the cache holds no lines
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Check if a key is present
    #[inline]
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.lines.contains_key(key)
    }

    /// Line by composite key
    #[must_use]
    pub fn get<'a>(&'a self, key: &'a str) -> Option<Line<'a>> {
        self.lines
            .get(key)
            .and_then(Value::as_object)
            .map(|entry| Line::new(key, entry))
    }

    /// Lines in file order
    pub fn iter(&self) -> impl Iterator<Item = Line<'_>> {
        self.lines
            .iter()
            .filter_map(|(k, v)| v.as_object().map(|entry| Line::new(k, entry)))
    }

    /// Composite keys in file order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lines.keys().map(String::as_str)
    }

    /// Lines matching every given parameter value
    ///
    /// An empty query matches every line.
    ///
    /// # Errors
    /// [`CacheError::UnknownParameter`] if a name is not a tune parameter.
    pub fn query(&self, params: &[(&str, Value)]) -> CacheResult<Vec<Line<'_>>> {
        if let Some((name, _)) = params.iter().find(|(name, _)| !self.header.is_param(name)) {
            return Err(CacheError::UnknownParameter((*name).to_string()));
        }
        Ok(self.iter().filter(|line| line.matches(params)).collect())
    }

    /// First line matching every given parameter value
    ///
    /// # Errors
    /// Same as [`Cache::query`].
    pub fn find(&self, params: &[(&str, Value)]) -> CacheResult<Option<Line<'_>>> {
        Ok(self.query(params)?.into_iter().next())
    }

    /// Append a typed line
    ///
    /// Returns the line's composite key.
    ///
    /// # Errors
    /// Same as [`Cache::append_entry`], plus conversion errors of
    /// [`NewLine::into_entry`].
    pub fn append(&mut self, line: NewLine) -> CacheResult<String> {
        let entry = line.into_entry(&self.header)?;
        self.append_entry(entry)
    }

    /// Append a raw line entry
    ///
    /// # Errors
    /// - [`CacheError::InvalidLine`] if the entry violates the data model
    /// - [`CacheError::DuplicateKey`] if its key is already present
    /// - [`CacheError::Io`] if a writable handle cannot append
    pub fn append_entry(&mut self, entry: Map<String, Value>) -> CacheResult<String> {
        self.header.validate_line(&entry)?;
        let key = self.header.key_of(&entry)?;
        if self.lines.contains_key(&key) {
            return Err(CacheError::DuplicateKey(key));
        }

        let entry = Value::Object(entry);
        if self.writable {
            file::append_line(&self.path, self.lines.len(), &key, &entry)?;
        }
        self.lines.insert(key.clone(), entry);
        tracing::debug!(key = %key, lines = self.lines.len(), "appended line");
        Ok(key)
    }

    /// Remove a line, returning its entry
    ///
    /// A writable handle rewrites its file first; if that fails the handle
    /// keeps the line.
    ///
    /// # Errors
    /// [`CacheError::LineNotFound`] if the key is absent;
    /// [`CacheError::Io`] if the rewrite fails.
    pub fn delete(&mut self, key: &str) -> CacheResult<Map<String, Value>> {
        let mut lines = self.lines.clone();
        let entry = lines
            .shift_remove(key)
            .ok_or_else(|| CacheError::LineNotFound(key.to_string()))?;
        if self.writable {
            file::write_cache_file(&self.document_with(&lines), &self.path, WriteMode::Open)?;
        }
        self.lines = lines;
        match entry {
            Value::Object(map) => Ok(map),
            _ => Err(CacheError::InvalidLine(format!("line '{key}' is not an object"))),
        }
    }

    /// Whole document, header fields first and `cache` last
    #[must_use]
    pub fn to_document(&self) -> Value {
        self.document_with(&self.lines)
    }

    fn document_with(&self, lines: &Map<String, Value>) -> Value {
        let mut map = self.fields.clone();
        map.insert("cache".to_string(), Value::Object(lines.clone()));
        Value::Object(map)
    }

    /// Write the document to another file
    ///
    /// # Errors
    /// [`CacheError::Io`] if the file cannot be written.
    pub fn save_as(&self, path: impl AsRef<Path>, mode: WriteMode) -> CacheResult<()> {
        file::write_cache_file(&self.to_document(), path, mode)
    }

    /// Finish a writable file in closed form
    ///
    /// Read-only handles are dropped without touching the file.
    ///
    /// # Errors
    /// [`CacheError::Io`] if the closing characters cannot be written.
    pub fn close(self) -> CacheResult<()> {
        if self.writable {
            file::close_open_file(&self.path)?;
            tracing::debug!(path = %self.path.display(), lines = self.lines.len(), "closed cache file");
        }
        Ok(())
    }
}
