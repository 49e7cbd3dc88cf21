//! Cache-file reading and writing
//!
//! A cache file is written in one of two forms:
//! - closed: a complete JSON document
//! - open: the closed form without its trailing `CLOSING` characters, so
//!   new lines can be appended with plain byte writes
//!
//! The writer lays the document out one header field per line and one
//! cache line per line:
//!
//! ```text
//! {
//!   "schema_version": "1.0.0",
//!   "device_name": "A100",
//!   ...
//!   "cache": {
//!     "0,0": {"a":0,"b":0,...},
//!     "0,1": {"a":0,"b":1,...}
//!   }
//! }
//! ```

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Characters that turn an open file into a closed one
pub const CLOSING: &str = "\n  }\n}\n";

/// Terminal form of a written cache file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Complete JSON document
    #[default]
    Closed,
    /// Appendable document missing its closing characters
    Open,
}

fn io(e: std::io::Error) -> CacheError {
    CacheError::Write(e)
}

fn json(e: serde_json::Error) -> CacheError {
    if e.is_io() {
        CacheError::Write(e.into())
    } else {
        CacheError::Json(e)
    }
}

fn at(path: &Path) -> impl FnOnce(CacheError) -> CacheError + '_ {
    move |e| match e {
        CacheError::Write(source) => CacheError::io_error(path, source),
        other => other,
    }
}

/// Streaming cache-file writer
///
/// Writes the header on construction, then one line per
/// [`write_line`](Self::write_line), and ends with either
/// [`finalize`](Self::finalize) or [`leave_open`](Self::leave_open).
#[derive(Debug)]
pub struct CacheFileWriter<W: Write> {
    out: W,
    lines: usize,
}

impl<W: Write> CacheFileWriter<W> {
    /// Write the header fields and open the `cache` object
    ///
    /// A `cache` entry in `header` is ignored.
    ///
    /// # Errors
    /// Returns [`CacheError::Write`] on write failure.
    pub fn new(mut out: W, header: &Map<String, Value>) -> CacheResult<Self> {
        out.write_all(b"{\n").map_err(io)?;
        for (name, value) in header.iter().filter(|(name, _)| *name != "cache") {
            write!(out, "  {}: ", serde_json::to_string(name)?).map_err(io)?;
            serde_json::to_writer(&mut out, value).map_err(json)?;
            out.write_all(b",\n").map_err(io)?;
        }
        out.write_all(b"  \"cache\": {").map_err(io)?;
        Ok(Self { out, lines: 0 })
    }

    /// Resume writing after `lines` existing lines of an open file
    #[inline]
    #[must_use]
    pub fn resume(out: W, lines: usize) -> Self {
        Self { out, lines }
    }

    /// Number of lines written so far, including resumed ones
    #[inline]
    #[must_use]
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Write one cache line
    ///
    /// # Errors
    /// Returns [`CacheError::Write`] on write failure.
    pub fn write_line(&mut self, key: &str, entry: &Value) -> CacheResult<()> {
        if self.lines > 0 {
            self.out.write_all(b",").map_err(io)?;
        }
        write!(self.out, "\n    {}: ", serde_json::to_string(key)?).map_err(io)?;
        serde_json::to_writer(&mut self.out, entry).map_err(json)?;
        self.lines += 1;
        Ok(())
    }

    /// Close the document and flush
    ///
    /// # Errors
    /// Returns [`CacheError::Write`] on write failure.
    pub fn finalize(mut self) -> CacheResult<W> {
        self.out.write_all(CLOSING.as_bytes()).map_err(io)?;
        self.leave_open()
    }

    /// Flush without closing, leaving the file appendable
    ///
    /// # Errors
    /// Returns [`CacheError::Write`] on write failure.
    pub fn leave_open(mut self) -> CacheResult<W> {
        self.out.flush().map_err(io)?;
        Ok(self.out)
    }

    /// Finish in the given form
    ///
    /// # Errors
    /// Returns [`CacheError::Write`] on write failure.
    pub fn finish(self, mode: WriteMode) -> CacheResult<W> {
        match mode {
            WriteMode::Closed => self.finalize(),
            WriteMode::Open => self.leave_open(),
        }
    }
}

/// Write a whole document to a stream
///
/// # Errors
/// [`CacheError::MalformedDocument`] if the document is not an object with
/// an object `cache`; [`CacheError::Write`] on write failure.
pub fn write_document<W: Write>(document: &Value, out: W, mode: WriteMode) -> CacheResult<W> {
    let map = document.as_object().ok_or_else(|| {
        CacheError::MalformedDocument("cache document must be an object".to_string())
    })?;
    let cache = map
        .get("cache")
        .and_then(Value::as_object)
        .ok_or_else(|| CacheError::MalformedDocument("'cache' must be an object".to_string()))?;

    let mut writer = CacheFileWriter::new(out, map)?;
    for (key, entry) in cache {
        writer.write_line(key, entry)?;
    }
    writer.finish(mode)
}

/// Render a document to a string
///
/// # Errors
/// Same as [`write_document`].
pub fn document_to_string(document: &Value, mode: WriteMode) -> CacheResult<String> {
    let bytes = write_document(document, Vec::new(), mode)?;
    String::from_utf8(bytes).map_err(|e| CacheError::MalformedDocument(e.to_string()))
}

/// Write a document to a file, replacing it atomically
///
/// An existing file keeps its permissions.
///
/// # Errors
/// [`CacheError::Io`] on file failure; see [`write_document`].
pub fn write_cache_file(document: &Value, path: impl AsRef<Path>, mode: WriteMode) -> CacheResult<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CacheError::io_error(path, e))?;
    let tmp = write_document(document, BufWriter::new(tmp), mode)
        .map_err(at(path))?
        .into_inner()
        .map_err(|e| CacheError::io_error(path, e.into_error()))?;
    if let Ok(existing) = fs::metadata(path) {
        tmp.as_file()
            .set_permissions(existing.permissions())
            .map_err(|e| CacheError::io_error(path, e))?;
    }
    tmp.persist(path)
        .map_err(|e| CacheError::io_error(path, e.error))?;
    tracing::debug!(path = %path.display(), ?mode, "wrote cache file");
    Ok(())
}

/// Parse cache text in either form
///
/// # Errors
/// [`CacheError::Json`] for invalid JSON;
/// [`CacheError::MalformedDocument`] if the top level is not an object.
pub fn parse_cache_text(text: &str) -> CacheResult<(Value, WriteMode)> {
    let (document, mode) = match serde_json::from_str::<Value>(text) {
        Ok(v) => (v, WriteMode::Closed),
        Err(e) if e.is_eof() => {
            let body = text.trim_end();
            let body = body.strip_suffix(',').unwrap_or(body);
            let closed = format!("{body}{CLOSING}");
            (serde_json::from_str(&closed)?, WriteMode::Open)
        }
        Err(e) => return Err(e.into()),
    };
    if !document.is_object() {
        return Err(CacheError::MalformedDocument(
            "cache document must be an object".to_string(),
        ));
    }
    Ok((document, mode))
}

/// Read a cache file and report its form
///
/// # Errors
/// [`CacheError::Io`] on read failure; see [`parse_cache_text`].
pub fn read_cache_file_with_mode(path: impl AsRef<Path>) -> CacheResult<(Value, WriteMode)> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| CacheError::io_error(path, e))?;
    parse_cache_text(&text)
}

/// Read a cache file in either form
///
/// # Errors
/// Same as [`read_cache_file_with_mode`].
pub fn read_cache_file(path: impl AsRef<Path>) -> CacheResult<Value> {
    read_cache_file_with_mode(path).map(|(document, _)| document)
}

/// Append one line to an open file that already holds `existing` lines
///
/// The file must end exactly where [`CacheFileWriter::leave_open`] left it.
///
/// # Errors
/// [`CacheError::Io`] on file failure.
pub fn append_line(
    path: impl AsRef<Path>,
    existing: usize,
    key: &str,
    entry: &Value,
) -> CacheResult<()> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| CacheError::io_error(path, e))?;
    let mut writer = CacheFileWriter::resume(file, existing);
    writer.write_line(key, entry).map_err(at(path))?;
    writer.leave_open().map_err(at(path))?;
    Ok(())
}

/// Append the closing characters to an open file
///
/// # Errors
/// [`CacheError::Io`] on file failure.
pub fn close_open_file(path: impl AsRef<Path>) -> CacheResult<()> {
    let path = path.as_ref();
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| CacheError::io_error(path, e))?;
    file.write_all(CLOSING.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| CacheError::io_error(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "schema_version": "1.0.0",
            "device_name": "dev",
            "cache": {
                "0": {"x": 0, "time": 1.5},
                "1": {"x": 1, "time": "InvalidConfig"}
            }
        })
    }

    #[test]
    fn closed_is_open_plus_closing() {
        let open = document_to_string(&doc(), WriteMode::Open).unwrap();
        let closed = document_to_string(&doc(), WriteMode::Closed).unwrap();
        assert_eq!(closed, format!("{open}{CLOSING}"));
        assert!(!open.ends_with(','));
    }

    #[test]
    fn layout_is_one_entry_per_line() {
        let closed = document_to_string(&doc(), WriteMode::Closed).unwrap();
        let expected = concat!(
            "{\n",
            "  \"schema_version\": \"1.0.0\",\n",
            "  \"device_name\": \"dev\",\n",
            "  \"cache\": {\n",
            "    \"0\": {\"x\":0,\"time\":1.5},\n",
            "    \"1\": {\"x\":1,\"time\":\"InvalidConfig\"}\n",
            "  }\n",
            "}\n"
        );
        assert_eq!(closed, expected);
    }

    #[test]
    fn parse_detects_form() {
        let open = document_to_string(&doc(), WriteMode::Open).unwrap();
        let (parsed, mode) = parse_cache_text(&open).unwrap();
        assert_eq!(parsed, doc());
        assert_eq!(mode, WriteMode::Open);

        let (parsed, mode) = parse_cache_text(&format!("{open},\n")).unwrap();
        assert_eq!(parsed, doc());
        assert_eq!(mode, WriteMode::Open);

        let closed = document_to_string(&doc(), WriteMode::Closed).unwrap();
        assert_eq!(parse_cache_text(&closed).unwrap().1, WriteMode::Closed);
    }

    #[test]
    fn empty_open_cache_parses() {
        let mut d = doc();
        d["cache"] = json!({});
        let open = document_to_string(&d, WriteMode::Open).unwrap();
        assert!(open.ends_with("\"cache\": {"));
        assert_eq!(parse_cache_text(&open).unwrap().0, d);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            parse_cache_text("{\"a\": ]"),
            Err(CacheError::Json(_))
        ));
        assert!(matches!(
            parse_cache_text("[1, 2]"),
            Err(CacheError::MalformedDocument(_))
        ));
    }

    #[test]
    fn write_document_requires_cache_object() {
        let bad = json!({"schema_version": "1.0.0", "cache": []});
        assert!(matches!(
            write_document(&bad, Vec::new(), WriteMode::Closed),
            Err(CacheError::MalformedDocument(_))
        ));
    }

    #[test]
    fn append_then_close_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut d = doc();
        d["cache"].as_object_mut().unwrap().remove("1");
        write_cache_file(&d, &path, WriteMode::Open).unwrap();

        append_line(&path, 1, "1", &json!({"x": 1, "time": "InvalidConfig"})).unwrap();
        assert_eq!(read_cache_file(&path).unwrap(), doc());

        close_open_file(&path).unwrap();
        let (parsed, mode) = read_cache_file_with_mode(&path).unwrap();
        assert_eq!(parsed, doc());
        assert_eq!(mode, WriteMode::Closed);
    }

    #[derive(Debug)]
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stream_failure_is_write_error() {
        let err = write_document(&doc(), FullDisk, WriteMode::Closed).unwrap_err();
        assert!(matches!(err, CacheError::Write(_)), "unexpected error: {err}");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn append_failure_names_the_file() {
        let err = append_line("/dev/full", 1, "1", &json!({"x": 1})).unwrap_err();
        assert!(
            matches!(&err, CacheError::Io { path, .. } if path == Path::new("/dev/full")),
            "unexpected error: {err}"
        );
    }

    #[cfg(unix)]
    #[test]
    fn rewrite_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        write_cache_file(&doc(), &path, WriteMode::Closed).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        write_cache_file(&doc(), &path, WriteMode::Open).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_cache_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
    }
}
