//! Testing utilities for the kt-cache workspace
//!
//! Shared fixtures: sample headers and lines, the four-version mock
//! migration chain, fixture paths and tracing setup.

#![allow(missing_docs)]

use chrono::NaiveDateTime;
use kt_cache::{
    CacheError, CacheResult, FsSchemaStore, Header, MigrationChain, NewLine, Objective,
    SchemaValidator, SchemaVersion, Transform, VersionRegistry,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Versions of the mock chain, oldest first
pub const MOCK_VERSIONS: &[&str] = &["1.0.0", "1.1.0", "1.1.1", "1.2.0"];

/// Install a test-writer subscriber once per process
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .try_init();
}

pub fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../kt-cache/tests/fixtures")
}

pub fn fixture(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

pub fn read_fixture(name: &str) -> Value {
    let text = std::fs::read_to_string(fixture(name)).unwrap();
    serde_json::from_str(&text).unwrap()
}

pub fn builtin_schemas_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../kt-cache/schemas")
}

/// Copy a fixture into a directory, returning the copy's path
pub fn copy_fixture(name: &str, dir: &Path) -> PathBuf {
    let target = dir.join(name);
    std::fs::copy(fixture(name), &target).unwrap();
    target
}

pub fn temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

pub fn version(s: &str) -> SchemaVersion {
    s.parse().unwrap()
}

pub fn fixed_timestamp() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("2024-05-01T12:00:00", "%Y-%m-%dT%H:%M:%S").unwrap()
}

/// Header with parameters `a`, `b`, `c`, each in `[0, 1]`
pub fn sample_header() -> Header {
    Header {
        device_name: "Test device".to_string(),
        kernel_name: "vector_add".to_string(),
        problem_size: vec![1024.into()],
        tune_params_keys: vec!["a".into(), "b".into(), "c".into()],
        tune_params: ["a", "b", "c"]
            .into_iter()
            .map(|k| (k.to_string(), vec![json!(0), json!(1)]))
            .collect(),
        objective: Objective::Minimize,
    }
}

pub fn sample_line(a: i64, b: i64, c: i64, time: f64) -> NewLine {
    NewLine::new(time, fixed_timestamp())
        .with_param("a", a)
        .with_param("b", b)
        .with_param("c", c)
        .with_times(vec![time, time])
}

pub fn builtin_chain() -> MigrationChain {
    MigrationChain::builtin(SchemaValidator::embedded()).unwrap()
}

pub fn mock_registry() -> VersionRegistry {
    VersionRegistry::parse(MOCK_VERSIONS).unwrap()
}

pub fn mock_validator() -> SchemaValidator {
    let store = FsSchemaStore::from_schema_dir(fixtures_dir().join("mock_schemas"))
        .with_t4_schema(builtin_schemas_dir().join("T4/1.0.0/results-schema.json"));
    SchemaValidator::new(store)
}

fn add_field2(mut document: Value) -> CacheResult<Value> {
    document
        .as_object_mut()
        .ok_or_else(|| CacheError::MalformedDocument("not an object".into()))?
        .insert("field2".into(), json!({}));
    Ok(document)
}

fn add_field1(mut document: Value) -> CacheResult<Value> {
    document
        .as_object_mut()
        .ok_or_else(|| CacheError::MalformedDocument("not an object".into()))?
        .insert("field1".into(), json!({}));
    Ok(document)
}

/// Four-version chain: `1.0.0` adds `field2`, `1.1.0` is rebuilt from
/// schema defaults, `1.1.1` adds `field1`
pub fn mock_chain() -> MigrationChain {
    MigrationChain::builder(mock_registry())
        .function(&version("1.0.0"), add_field2)
        .unwrap()
        .step(&version("1.1.0"), Transform::SchemaDefaults)
        .unwrap()
        .function(&version("1.1.1"), add_field1)
        .unwrap()
        .build(mock_validator())
}

/// Minimal document at a mock version
pub fn mock_document(version: &str) -> Value {
    let mut document = json!({
        "schema_version": version,
        "device_name": "Test device",
        "kernel_name": "vector_add",
        "problem_size": [1024],
        "tune_params_keys": ["a", "b", "c"],
        "tune_params": {"a": [0, 1], "b": [0, 1], "c": [0, 1]},
        "objective": "minimize",
        "cache": {}
    });
    let index = MOCK_VERSIONS.iter().position(|v| *v == version).unwrap();
    if index >= 1 {
        document["field2"] = json!({});
    }
    if index >= 3 {
        document["field1"] = json!({});
    }
    document
}
