//! Typed views over cache documents
//!
//! A cache document stays a `serde_json::Value` end to end so migrations can
//! reshape it freely; this module layers typed access on top:
//! - [`Header`]: the metadata fields shared by every line
//! - [`Line`]: a borrowed view of one measurement record
//! - [`NewLine`]: a typed record to append
//! - [`Runtime`]: the `time` field as numeric or failed

use crate::error::{CacheError, CacheResult};
use crate::version::SchemaVersion;
use chrono::{DateTime, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::fmt;

/// Line fields that may never be used as tune parameter names
pub const RESERVED_FIELDS: &[&str] = &[
    "time",
    "times",
    "compile_time",
    "verification_time",
    "benchmark_time",
    "strategy_time",
    "framework_time",
    "timestamp",
    "GFLOP/s",
];

/// Numeric measurement fields every line carries
pub const MEASUREMENT_FIELDS: &[&str] = &[
    "compile_time",
    "verification_time",
    "benchmark_time",
    "strategy_time",
    "framework_time",
];

/// Timestamp layout written for new lines
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Check if name is a reserved line field
#[inline]
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name)
}

/// Direction of the tuning objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    /// Higher is better
    Maximize,
    /// Lower is better
    Minimize,
}

/// Why a configuration produced no runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Configuration violates the tuning constraints
    InvalidConfig,
    /// Kernel failed to compile
    CompilationFailedConfig,
    /// Kernel failed at runtime
    RuntimeFailedConfig,
}

impl FailureKind {
    /// On-disk marker string
    #[inline]
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::InvalidConfig => "InvalidConfig",
            Self::CompilationFailedConfig => "CompilationFailedConfig",
            Self::RuntimeFailedConfig => "RuntimeFailedConfig",
        }
    }

    /// Parse an on-disk marker
    #[must_use]
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "InvalidConfig" => Some(Self::InvalidConfig),
            "CompilationFailedConfig" => Some(Self::CompilationFailedConfig),
            "RuntimeFailedConfig" => Some(Self::RuntimeFailedConfig),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Value of a line's `time` field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Runtime {
    /// Measured runtime
    Measured(f64),
    /// Run did not produce a runtime
    Failed(FailureKind),
}

impl Runtime {
    /// Measured value, if any
    #[inline]
    #[must_use]
    pub fn measured(self) -> Option<f64> {
        match self {
            Self::Measured(t) => Some(t),
            Self::Failed(_) => None,
        }
    }

    /// Check if the run failed
    #[inline]
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed(_))
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(Self::Measured),
            Value::String(s) => FailureKind::from_marker(s).map(Self::Failed),
            _ => None,
        }
    }

    fn to_value(self) -> CacheResult<Value> {
        match self {
            Self::Measured(t) => number(t, "time").map(Value::Number),
            Self::Failed(kind) => Ok(Value::String(kind.marker().to_string())),
        }
    }
}

impl From<f64> for Runtime {
    fn from(t: f64) -> Self {
        Self::Measured(t)
    }
}

impl From<FailureKind> for Runtime {
    fn from(kind: FailureKind) -> Self {
        Self::Failed(kind)
    }
}

/// Header metadata of a cache file
///
/// Everything except `schema_version` and `cache`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Device the kernel was tuned on
    pub device_name: String,
    /// Tuned kernel
    pub kernel_name: String,
    /// Problem dimensions
    pub problem_size: Vec<Number>,
    /// Tune parameter names, in key order
    pub tune_params_keys: Vec<String>,
    /// Allowed values per tune parameter
    pub tune_params: IndexMap<String, Vec<Value>>,
    /// Tuning objective
    pub objective: Objective,
}

impl Header {
    /// Extract header from a cache document
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidHeader`] if a field is missing or mistyped.
    pub fn from_document(document: &Value) -> CacheResult<Self> {
        Self::deserialize(document).map_err(|e| CacheError::InvalidHeader(e.to_string()))
    }

    /// Check data-model invariants
    ///
    /// # Errors
    /// - [`CacheError::ReservedFieldName`] for a reserved parameter name
    /// - [`CacheError::DuplicateKey`] for a repeated parameter name
    /// - [`CacheError::InvalidHeader`] if `tune_params` does not match the keys
    pub fn validate(&self) -> CacheResult<()> {
        let mut seen = HashSet::new();
        for key in &self.tune_params_keys {
            if is_reserved(key) {
                return Err(CacheError::ReservedFieldName(key.clone()));
            }
            if !seen.insert(key.as_str()) {
                return Err(CacheError::DuplicateKey(key.clone()));
            }
            if !self.tune_params.contains_key(key) {
                return Err(CacheError::InvalidHeader(format!(
                    "tune parameter '{key}' has no allowed values"
                )));
            }
        }
        if let Some(extra) = self.tune_params.keys().find(|k| !seen.contains(k.as_str())) {
            return Err(CacheError::InvalidHeader(format!(
                "'{extra}' in tune_params is not listed in tune_params_keys"
            )));
        }
        Ok(())
    }

    /// Allowed values of a tune parameter
    #[inline]
    #[must_use]
    pub fn allowed_values(&self, param: &str) -> Option<&[Value]> {
        self.tune_params.get(param).map(Vec::as_slice)
    }

    /// Check if name is a tune parameter
    #[inline]
    #[must_use]
    pub fn is_param(&self, name: &str) -> bool {
        self.tune_params_keys.iter().any(|k| k == name)
    }

    /// Build an empty cache document at a version
    ///
    /// # Errors
    /// Fails only if the header cannot be serialized.
    pub fn to_document(&self, version: &SchemaVersion) -> CacheResult<Value> {
        let mut map = Map::new();
        map.insert(
            "schema_version".to_string(),
            Value::String(version.to_string()),
        );
        if let Value::Object(fields) = serde_json::to_value(self)? {
            map.extend(fields);
        }
        map.insert("cache".to_string(), Value::Object(Map::new()));
        Ok(Value::Object(map))
    }

    /// Check that a line satisfies the data model for this header
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidLine`] describing the first problem found.
    pub fn validate_line(&self, entry: &Map<String, Value>) -> CacheResult<()> {
        for key in &self.tune_params_keys {
            let value = entry
                .get(key)
                .ok_or_else(|| CacheError::InvalidLine(format!("missing tune parameter '{key}'")))?;
            let allowed = self.allowed_values(key).unwrap_or_default();
            if !allowed.iter().any(|a| values_equal(a, value)) {
                return Err(CacheError::InvalidLine(format!(
                    "value {value} of '{key}' is not among its allowed values"
                )));
            }
        }

        if let Some(field) = entry
            .keys()
            .find(|k| !is_reserved(k) && !self.is_param(k))
        {
            return Err(CacheError::InvalidLine(format!("unexpected field '{field}'")));
        }

        match entry.get("time") {
            Some(v) if Runtime::from_value(v).is_some() => {}
            Some(v) => {
                return Err(CacheError::InvalidLine(format!(
                    "time must be a number or a failure marker, got {v}"
                )))
            }
            None => return Err(CacheError::InvalidLine("missing field 'time'".to_string())),
        }

        match entry.get("times") {
            Some(Value::Array(items)) if items.iter().all(Value::is_number) => {}
            _ => {
                return Err(CacheError::InvalidLine(
                    "times must be a list of numbers".to_string(),
                ))
            }
        }

        for field in MEASUREMENT_FIELDS {
            if !entry.get(*field).is_some_and(Value::is_number) {
                return Err(CacheError::InvalidLine(format!("{field} must be a number")));
            }
        }

        if entry.get("GFLOP/s").is_some_and(|v| !v.is_number()) {
            return Err(CacheError::InvalidLine("GFLOP/s must be a number".to_string()));
        }

        match entry.get("timestamp") {
            Some(Value::String(s)) if parse_timestamp(s).is_some() => Ok(()),
            _ => Err(CacheError::InvalidLine(
                "timestamp must be an ISO-8601 string".to_string(),
            )),
        }
    }

    /// Composite key of a line: parameter values in key order, comma joined
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidLine`] if a parameter is missing.
    pub fn key_of(&self, entry: &Map<String, Value>) -> CacheResult<String> {
        let values = self
            .tune_params_keys
            .iter()
            .map(|k| {
                entry
                    .get(k)
                    .ok_or_else(|| CacheError::InvalidLine(format!("missing tune parameter '{k}'")))
            })
            .collect::<CacheResult<Vec<_>>>()?;
        Ok(composite_key(values))
    }

    /// Check every line of a `cache` object and that each key matches its
    /// line's values
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidLine`] for the first bad line.
    pub fn validate_lines(&self, lines: &Map<String, Value>) -> CacheResult<()> {
        for (key, entry) in lines {
            let entry = entry
                .as_object()
                .ok_or_else(|| CacheError::InvalidLine(format!("line '{key}' is not an object")))?;
            self.validate_line(entry)?;
            let expected = self.key_of(entry)?;
            if &expected != key {
                return Err(CacheError::InvalidLine(format!(
                    "key '{key}' does not match the line's values ('{expected}')"
                )));
            }
        }
        Ok(())
    }
}

/// Join parameter values into a composite key
///
/// Strings are written raw, everything else as compact JSON.
#[must_use]
pub fn composite_key<'a>(values: impl IntoIterator<Item = &'a Value>) -> String {
    values
        .into_iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Compare JSON values, treating `1` and `1.0` as equal
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Parse a line timestamp
///
/// Accepts RFC 3339 as well as naive `YYYY-MM-DD[T ]HH:MM:SS[.ffffff]`.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn number(value: f64, field: &str) -> CacheResult<Number> {
    Number::from_f64(value)
        .ok_or_else(|| CacheError::InvalidLine(format!("{field} must be finite, got {value}")))
}

/// Borrowed view of one cache line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line<'a> {
    key: &'a str,
    entry: &'a Map<String, Value>,
}

impl<'a> Line<'a> {
    /// Wrap a line entry
    #[inline]
    #[must_use]
    pub fn new(key: &'a str, entry: &'a Map<String, Value>) -> Self {
        Self { key, entry }
    }

    /// Composite key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &'a str {
        self.key
    }

    /// Raw field lookup
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&'a Value> {
        self.entry.get(field)
    }

    /// Raw entry
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> &'a Map<String, Value> {
        self.entry
    }

    /// Check if the line has a field
    #[inline]
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.entry.contains_key(field)
    }

    /// Parsed `time`
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidLine`] if absent or not a runtime.
    pub fn time(&self) -> CacheResult<Runtime> {
        self.get("time")
            .and_then(Runtime::from_value)
            .ok_or_else(|| self.bad_field("time"))
    }

    /// Individual benchmark runtimes
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidLine`] if absent or not numeric.
    pub fn times(&self) -> CacheResult<Vec<f64>> {
        self.get("times")
            .and_then(Value::as_array)
            .and_then(|items| items.iter().map(Value::as_f64).collect())
            .ok_or_else(|| self.bad_field("times"))
    }

    /// Compile time
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidLine`] if absent or not numeric.
    pub fn compile_time(&self) -> CacheResult<f64> {
        self.float("compile_time")
    }

    /// Verification time
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidLine`] if absent or not numeric.
    pub fn verification_time(&self) -> CacheResult<f64> {
        self.float("verification_time")
    }

    /// Benchmark time
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidLine`] if absent or not numeric.
    pub fn benchmark_time(&self) -> CacheResult<f64> {
        self.float("benchmark_time")
    }

    /// Strategy time
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidLine`] if absent or not numeric.
    pub fn strategy_time(&self) -> CacheResult<f64> {
        self.float("strategy_time")
    }

    /// Framework time
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidLine`] if absent or not numeric.
    pub fn framework_time(&self) -> CacheResult<f64> {
        self.float("framework_time")
    }

    /// Throughput, when recorded
    #[inline]
    #[must_use]
    pub fn gflops(&self) -> Option<f64> {
        self.get("GFLOP/s").and_then(Value::as_f64)
    }

    /// Raw timestamp string
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidLine`] if absent or not a string.
    pub fn timestamp_str(&self) -> CacheResult<&'a str> {
        self.get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| self.bad_field("timestamp"))
    }

    /// Parsed timestamp
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidLine`] if absent or unparseable.
    pub fn timestamp(&self) -> CacheResult<NaiveDateTime> {
        parse_timestamp(self.timestamp_str()?).ok_or_else(|| self.bad_field("timestamp"))
    }

    /// Value of a tune parameter
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&'a Value> {
        if is_reserved(name) {
            None
        } else {
            self.entry.get(name)
        }
    }

    /// Check if the line matches every given parameter value
    #[must_use]
    pub fn matches(&self, params: &[(&str, Value)]) -> bool {
        params
            .iter()
            .all(|(name, value)| self.param(name).is_some_and(|v| values_equal(v, value)))
    }

    fn float(&self, field: &str) -> CacheResult<f64> {
        self.get(field)
            .and_then(Value::as_f64)
            .ok_or_else(|| self.bad_field(field))
    }

    fn bad_field(&self, field: &str) -> CacheError {
        CacheError::InvalidLine(format!("line '{}' has no valid '{field}'", self.key))
    }
}

/// Typed line to append to a cache
#[derive(Debug, Clone, PartialEq)]
pub struct NewLine {
    /// Tune parameter values
    pub params: IndexMap<String, Value>,
    /// Runtime or failure
    pub time: Runtime,
    /// Individual runtimes
    pub times: Vec<f64>,
    /// Compile time
    pub compile_time: f64,
    /// Verification time
    pub verification_time: f64,
    /// Benchmark time
    pub benchmark_time: f64,
    /// Strategy time
    pub strategy_time: f64,
    /// Framework time
    pub framework_time: f64,
    /// Optional throughput
    pub gflops: Option<f64>,
    /// Measurement time
    pub timestamp: NaiveDateTime,
}

impl NewLine {
    /// Create line with zeroed timings
    #[must_use]
    pub fn new(time: impl Into<Runtime>, timestamp: NaiveDateTime) -> Self {
        Self {
            params: IndexMap::new(),
            time: time.into(),
            times: Vec::new(),
            compile_time: 0.0,
            verification_time: 0.0,
            benchmark_time: 0.0,
            strategy_time: 0.0,
            framework_time: 0.0,
            gflops: None,
            timestamp,
        }
    }

    /// Set a tune parameter value
    #[inline]
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Set individual runtimes
    #[inline]
    #[must_use]
    pub fn with_times(mut self, times: Vec<f64>) -> Self {
        self.times = times;
        self
    }

    /// Convert into a line entry, parameters first in header key order
    ///
    /// # Errors
    /// - [`CacheError::ReservedFieldName`] if a parameter uses a reserved name
    /// - [`CacheError::InvalidLine`] for non-finite numbers
    pub fn into_entry(self, header: &Header) -> CacheResult<Map<String, Value>> {
        let mut entry = Map::new();
        let mut params = self.params;
        for key in &header.tune_params_keys {
            if let Some(v) = params.shift_remove(key) {
                entry.insert(key.clone(), v);
            }
        }
        for (name, value) in params {
            if is_reserved(&name) {
                return Err(CacheError::ReservedFieldName(name));
            }
            entry.insert(name, value);
        }

        entry.insert("time".to_string(), self.time.to_value()?);
        let times = self
            .times
            .iter()
            .map(|t| number(*t, "times").map(Value::Number))
            .collect::<CacheResult<Vec<_>>>()?;
        entry.insert("times".to_string(), Value::Array(times));
        for (field, value) in [
            ("compile_time", self.compile_time),
            ("verification_time", self.verification_time),
            ("benchmark_time", self.benchmark_time),
            ("strategy_time", self.strategy_time),
            ("framework_time", self.framework_time),
        ] {
            entry.insert(field.to_string(), Value::Number(number(value, field)?));
        }
        if let Some(g) = self.gflops {
            entry.insert("GFLOP/s".to_string(), Value::Number(number(g, "GFLOP/s")?));
        }
        entry.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp.format(TIMESTAMP_FORMAT).to_string()),
        );
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header() -> Header {
        Header {
            device_name: "Test device".to_string(),
            kernel_name: "Test kernel".to_string(),
            problem_size: vec![256.into(), 256.into()],
            tune_params_keys: vec!["a".into(), "b".into(), "c".into()],
            tune_params: [
                ("a".to_string(), vec![json!(0), json!(1)]),
                ("b".to_string(), vec![json!(0), json!(1)]),
                ("c".to_string(), vec![json!(0), json!(1)]),
            ]
            .into_iter()
            .collect(),
            objective: Objective::Maximize,
        }
    }

    fn entry(a: i64, b: i64, c: i64) -> Map<String, Value> {
        let v = json!({
            "a": a, "b": b, "c": c,
            "time": 0.0,
            "times": [1.0],
            "compile_time": 2.0,
            "verification_time": 3,
            "benchmark_time": 4.0,
            "strategy_time": 6,
            "framework_time": 7.0,
            "timestamp": "2024-05-01 12:00:00.000001"
        });
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    fn now() -> NaiveDateTime {
        parse_timestamp("2024-05-01T12:00:00.5").unwrap()
    }

    #[test]
    fn header_validate_accepts_consistent_header() {
        assert!(header().validate().is_ok());
    }

    #[test]
    fn header_validate_rejects_reserved_names() {
        for name in RESERVED_FIELDS {
            let mut h = header();
            h.tune_params_keys.push((*name).to_string());
            h.tune_params.insert((*name).to_string(), vec![json!(1)]);
            assert!(matches!(h.validate(), Err(CacheError::ReservedFieldName(n)) if n == *name));
        }
    }

    #[test]
    fn header_validate_rejects_mismatched_params() {
        let mut h = header();
        h.tune_params_keys.pop();
        assert!(matches!(h.validate(), Err(CacheError::InvalidHeader(_))));

        let mut h = header();
        h.tune_params_keys.push("a".into());
        assert!(matches!(h.validate(), Err(CacheError::DuplicateKey(_))));
    }

    #[test]
    fn header_from_document_rejects_bad_types() {
        let h = header();
        let mut doc = h.to_document(&SchemaVersion::new(1, 0, 0)).unwrap();
        assert_eq!(Header::from_document(&doc).unwrap(), h);

        doc["device_name"] = json!(3);
        assert!(matches!(
            Header::from_document(&doc),
            Err(CacheError::InvalidHeader(_))
        ));
    }

    #[test]
    fn to_document_starts_with_version_and_ends_with_cache() {
        let doc = header().to_document(&SchemaVersion::new(1, 0, 0)).unwrap();
        let keys: Vec<_> = doc.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.first().map(String::as_str), Some("schema_version"));
        assert_eq!(keys.last().map(String::as_str), Some("cache"));
        assert_eq!(doc["cache"], json!({}));
    }

    #[test]
    fn composite_key_joins_in_order() {
        let h = header();
        assert_eq!(h.key_of(&entry(0, 1, 0)).unwrap(), "0,1,0");
        assert_eq!(
            composite_key([&json!("x"), &json!(1.5), &json!(true)]),
            "x,1.5,true"
        );
    }

    #[test]
    fn validate_line_accepts_template() {
        assert!(header().validate_line(&entry(1, 0, 1)).is_ok());
    }

    #[test]
    fn validate_line_rejects_out_of_range_param() {
        let err = header().validate_line(&entry(2, 0, 0)).unwrap_err();
        assert!(matches!(err, CacheError::InvalidLine(m) if m.contains("'a'")));
    }

    #[test]
    fn validate_line_rejects_bad_measurements() {
        let h = header();
        let cases = [
            ("time", json!("999")),
            ("compile_time", json!(true)),
            ("verification_time", Value::Null),
            ("benchmark_time", json!([])),
            ("strategy_time", json!({})),
            ("framework_time", json!(false)),
            ("timestamp", json!(88)),
            ("times", json!(["Hello"])),
        ];
        for (field, value) in cases {
            let mut e = entry(0, 0, 0);
            e.insert(field.to_string(), value);
            assert!(h.validate_line(&e).is_err(), "{field} should be rejected");
        }
    }

    #[test]
    fn validate_line_rejects_partial_params() {
        let mut e = entry(0, 0, 0);
        e.remove("b");
        assert!(header().validate_line(&e).is_err());
    }

    #[test]
    fn line_accessors() {
        let e = entry(0, 0, 0);
        let line = Line::new("0,0,0", &e);
        assert_eq!(line.time().unwrap(), Runtime::Measured(0.0));
        assert_eq!(line.times().unwrap(), vec![1.0]);
        assert_eq!(line.compile_time().unwrap(), 2.0);
        assert_eq!(line.verification_time().unwrap(), 3.0);
        assert_eq!(line.benchmark_time().unwrap(), 4.0);
        assert_eq!(line.strategy_time().unwrap(), 6.0);
        assert_eq!(line.framework_time().unwrap(), 7.0);
        assert_eq!(line.gflops(), None);
        assert!(!line.contains("GFLOP/s"));
        assert_eq!(
            line.timestamp().unwrap(),
            parse_timestamp("2024-05-01T12:00:00.000001").unwrap()
        );
        assert_eq!(line.param("a"), Some(&json!(0)));
        assert_eq!(line.param("time"), None);
    }

    #[test]
    fn line_matches_partial_params() {
        let e = entry(0, 1, 0);
        let line = Line::new("0,1,0", &e);
        assert!(line.matches(&[("a", json!(0))]));
        assert!(line.matches(&[("a", json!(0.0)), ("b", json!(1))]));
        assert!(!line.matches(&[("c", json!(1))]));
    }

    #[test]
    fn runtime_serde_uses_markers() {
        assert_eq!(
            serde_json::to_value(Runtime::Failed(FailureKind::RuntimeFailedConfig)).unwrap(),
            json!("RuntimeFailedConfig")
        );
        assert_eq!(
            serde_json::from_value::<Runtime>(json!("InvalidConfig")).unwrap(),
            Runtime::Failed(FailureKind::InvalidConfig)
        );
        assert_eq!(
            serde_json::from_value::<Runtime>(json!(3)).unwrap(),
            Runtime::Measured(3.0)
        );
        assert!(serde_json::from_value::<Runtime>(json!("999")).is_err());
    }

    #[test]
    fn new_line_into_entry_orders_params_first() {
        let line = NewLine::new(99.9, now())
            .with_param("c", 1)
            .with_param("a", 1)
            .with_param("b", 1);
        let entry = line.into_entry(&header()).unwrap();
        let keys: Vec<_> = entry.keys().map(String::as_str).take(4).collect();
        assert_eq!(keys, ["a", "b", "c", "time"]);
        assert_eq!(entry["timestamp"], json!("2024-05-01T12:00:00.500000"));
        assert!(header().validate_line(&entry).is_ok());
    }

    #[test]
    fn new_line_failure_marker_round_trips() {
        let entry = NewLine::new(FailureKind::CompilationFailedConfig, now())
            .with_param("a", 0)
            .with_param("b", 0)
            .with_param("c", 0)
            .into_entry(&header())
            .unwrap();
        assert_eq!(entry["time"], json!("CompilationFailedConfig"));
        let line = Line::new("0,0,0", &entry);
        assert!(line.time().unwrap().is_failure());
    }

    #[test]
    fn new_line_rejects_reserved_param_and_nan() {
        let line = NewLine::new(1.0, now()).with_param("timestamp", 1);
        assert!(matches!(
            line.into_entry(&header()),
            Err(CacheError::ReservedFieldName(_))
        ));

        let line = NewLine::new(f64::NAN, now());
        assert!(matches!(
            line.into_entry(&header()),
            Err(CacheError::InvalidLine(_))
        ));
    }

    #[test]
    fn parse_timestamp_formats() {
        assert!(parse_timestamp("2024-05-01 12:00:00").is_some());
        assert!(parse_timestamp("2024-05-01T12:00:00.123456").is_some());
        assert!(parse_timestamp("2024-05-01T12:00:00+02:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
