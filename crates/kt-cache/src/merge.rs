//! Merging cache files
//!
//! A merge folds two or more documents with the same version and header
//! into one, in argument order. Lines under the same composite key are
//! resolved by a [`DuplicatePolicy`].

use crate::document::Header;
use crate::error::{CacheError, CacheResult};
use crate::file;
use crate::migration::MigrationChain;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// What to do when two inputs hold a line with the same key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Later input wins
    #[default]
    KeepLast,
    /// Earlier input wins
    KeepFirst,
    /// Fail with [`CacheError::DuplicateKey`]
    Reject,
}

/// Merge documents of the same version and header
///
/// The result carries the first document's header fields and the union of
/// all lines, first-seen key order.
///
/// # Errors
/// - [`CacheError::MergeIncompatible`] for fewer than two inputs, differing
///   versions or differing headers
/// - [`CacheError::MissingVersion`] if an input has no version
/// - [`CacheError::InvalidLine`] if a line breaks the header's data model
/// - [`CacheError::DuplicateKey`] under [`DuplicatePolicy::Reject`]
pub fn merge_documents(documents: &[Value], policy: DuplicatePolicy) -> CacheResult<Value> {
    let [first, rest @ ..] = documents else {
        return Err(too_few());
    };
    if rest.is_empty() {
        return Err(too_few());
    }

    let version = MigrationChain::declared_version(first)?.ok_or(CacheError::MissingVersion)?;
    let header = Header::from_document(first)?;
    let mut merged = first
        .as_object()
        .cloned()
        .ok_or_else(|| CacheError::MalformedDocument("cache document must be an object".to_string()))?;
    let mut lines = take_lines(&mut merged)?;
    header.validate_lines(&lines)?;

    for (index, document) in rest.iter().enumerate() {
        let other = MigrationChain::declared_version(document)?.ok_or(CacheError::MissingVersion)?;
        if other != version {
            return Err(CacheError::MergeIncompatible(format!(
                "input {} has version {other}, input 1 has {version}",
                index + 2
            )));
        }
        if Header::from_document(document)? != header {
            return Err(CacheError::MergeIncompatible(format!(
                "header of input {} differs from input 1",
                index + 2
            )));
        }

        let mut document = document.as_object().cloned().unwrap_or_default();
        let incoming = take_lines(&mut document)?;
        header.validate_lines(&incoming)?;
        for (key, entry) in incoming {
            if !lines.contains_key(&key) {
                lines.insert(key, entry);
                continue;
            }
            match policy {
                DuplicatePolicy::KeepLast => {
                    tracing::warn!(key = %key, input = index + 2, "duplicate line replaced by later input");
                    lines.insert(key, entry);
                }
                DuplicatePolicy::KeepFirst => {
                    tracing::warn!(key = %key, input = index + 2, "duplicate line ignored");
                }
                DuplicatePolicy::Reject => return Err(CacheError::DuplicateKey(key)),
            }
        }
    }

    tracing::info!(inputs = documents.len(), lines = lines.len(), "merged cache documents");
    merged.insert("cache".to_string(), Value::Object(lines));
    Ok(Value::Object(merged))
}

/// Read, convert to latest and merge cache files
///
/// Every input and the merged result are validated against the latest
/// schema.
///
/// # Errors
/// File, conversion and schema errors of each input, then those of
/// [`merge_documents`].
pub fn merge_files<P: AsRef<Path>>(
    paths: &[P],
    chain: &MigrationChain,
    policy: DuplicatePolicy,
) -> CacheResult<Value> {
    if paths.len() < 2 {
        return Err(too_few());
    }
    let latest = chain.registry().latest();
    let documents = paths
        .iter()
        .map(|p| {
            let document = chain.convert_to_latest(file::read_cache_file(p)?)?;
            chain.validator().validate(&document, latest)?;
            Ok(document)
        })
        .collect::<CacheResult<Vec<_>>>()?;
    let merged = merge_documents(&documents, policy)?;
    chain.validator().validate(&merged, latest)?;
    Ok(merged)
}

fn take_lines(document: &mut Map<String, Value>) -> CacheResult<Map<String, Value>> {
    match document.remove("cache") {
        Some(Value::Object(lines)) => Ok(lines),
        _ => Err(CacheError::MalformedDocument(
            "'cache' must be an object".to_string(),
        )),
    }
}

fn too_few() -> CacheError {
    CacheError::MergeIncompatible("at least two cache files are required".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn line(x: i64, time: f64) -> Value {
        json!({
            "x": x,
            "time": time,
            "times": [time],
            "compile_time": 1.0,
            "verification_time": 0,
            "benchmark_time": 1.0,
            "strategy_time": 0,
            "framework_time": 0,
            "timestamp": "2024-05-01T12:00:00"
        })
    }

    fn doc(lines: Value) -> Value {
        json!({
            "schema_version": "1.0.0",
            "device_name": "dev",
            "kernel_name": "k",
            "problem_size": [8],
            "tune_params_keys": ["x"],
            "tune_params": {"x": [1, 2, 3]},
            "objective": "minimize",
            "cache": lines
        })
    }

    #[test]
    fn merge_unions_lines_in_order() {
        let a = doc(json!({"1": line(1, 1.0), "2": line(2, 2.0)}));
        let b = doc(json!({"3": line(3, 3.0)}));
        let merged = merge_documents(&[a, b], DuplicatePolicy::default()).unwrap();
        let keys: Vec<_> = merged["cache"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["1", "2", "3"]);
        assert_eq!(merged["device_name"], json!("dev"));
    }

    #[test]
    fn duplicate_policies() {
        let a = doc(json!({"1": line(1, 1.0)}));
        let b = doc(json!({"1": line(1, 9.0)}));
        let inputs = [a, b];

        let last = merge_documents(&inputs, DuplicatePolicy::KeepLast).unwrap();
        assert_eq!(last["cache"]["1"]["time"], json!(9.0));
        let first = merge_documents(&inputs, DuplicatePolicy::KeepFirst).unwrap();
        assert_eq!(first["cache"]["1"]["time"], json!(1.0));
        assert!(matches!(
            merge_documents(&inputs, DuplicatePolicy::Reject),
            Err(CacheError::DuplicateKey(k)) if k == "1"
        ));
    }

    #[test]
    fn incompatible_inputs_are_rejected() {
        let a = doc(json!({}));
        assert!(matches!(
            merge_documents(std::slice::from_ref(&a), DuplicatePolicy::KeepLast),
            Err(CacheError::MergeIncompatible(_))
        ));

        let mut other_device = doc(json!({}));
        other_device["device_name"] = json!("other");
        assert!(matches!(
            merge_documents(&[a.clone(), other_device], DuplicatePolicy::KeepLast),
            Err(CacheError::MergeIncompatible(_))
        ));

        let mut other_version = doc(json!({}));
        other_version["schema_version"] = json!("1.1.0");
        assert!(matches!(
            merge_documents(&[a, other_version], DuplicatePolicy::KeepLast),
            Err(CacheError::MergeIncompatible(_))
        ));
    }

    #[test]
    fn lines_breaking_the_header_are_rejected() {
        let a = doc(json!({"1": line(1, 1.0)}));

        let out_of_range = doc(json!({"7": line(7, 1.0)}));
        assert!(matches!(
            merge_documents(&[a.clone(), out_of_range], DuplicatePolicy::KeepLast),
            Err(CacheError::InvalidLine(_))
        ));

        let wrong_key = doc(json!({"zzz": line(2, 1.0)}));
        assert!(matches!(
            merge_documents(&[a.clone(), wrong_key], DuplicatePolicy::KeepLast),
            Err(CacheError::InvalidLine(_))
        ));

        let mut bad_time = line(2, 1.0);
        bad_time["time"] = json!("oops");
        assert!(matches!(
            merge_documents(&[doc(json!({"2": bad_time})), a], DuplicatePolicy::KeepLast),
            Err(CacheError::InvalidLine(_))
        ));
    }
}
