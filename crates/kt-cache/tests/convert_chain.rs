//! Migration chain integration tests against the four-version mock chain

use kt_cache::{infer_version, CacheError, ConvertOptions, MigrationChain};
use kt_cache_test_utils::{
    builtin_chain, init_test_tracing, mock_chain, mock_document, mock_registry, read_fixture,
    version, MOCK_VERSIONS,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

#[test]
fn oldest_converts_to_latest() {
    init_test_tracing();
    let chain = mock_chain();
    let out = chain.convert_to_latest(mock_document("1.0.0")).unwrap();
    assert_eq!(out, mock_document("1.2.0"));
    chain.validator().validate(&out, &version("1.2.0")).unwrap();
}

#[test]
fn every_hop_output_validates() {
    let chain = mock_chain();
    for (i, from) in MOCK_VERSIONS.iter().enumerate() {
        for to in &MOCK_VERSIONS[i..] {
            let out = chain
                .convert(
                    mock_document(from),
                    &ConvertOptions::new().with_target(version(to)),
                )
                .unwrap();
            assert_eq!(out["schema_version"], json!(to));
            chain.validator().validate(&out, &version(to)).unwrap();
        }
    }
}

#[test]
fn lines_survive_conversion() {
    let chain = mock_chain();
    let mut doc = mock_document("1.0.0");
    doc["cache"] = json!({"0,0,0": {"a": 0, "b": 0, "c": 0, "time": 1.0}});
    let out = chain.convert_to_latest(doc.clone()).unwrap();
    assert_eq!(out["cache"], doc["cache"]);
}

#[test]
fn unknown_versions_fail() {
    let chain = builtin_chain();
    for name in ["too_high_version.json", "not_real_version.json"] {
        let err = chain.convert_to_latest(read_fixture(name)).unwrap_err();
        assert!(matches!(err, CacheError::UnknownVersion(_)), "{name}: {err}");
    }
}

#[test]
fn unversioned_fixture_needs_permission() {
    let chain = builtin_chain();
    let doc = read_fixture("no_version_field.json");
    assert!(matches!(
        chain.convert_to_latest(doc.clone()),
        Err(CacheError::MissingVersion)
    ));

    let out = chain
        .convert(doc, &ConvertOptions::new().allow_unversioned(true))
        .unwrap();
    assert_eq!(out["schema_version"], json!("1.0.0"));
}

#[test]
fn missing_version_is_reported_before_unknown_target() {
    let chain = mock_chain();
    let mut doc = mock_document("1.0.0");
    doc.as_object_mut().unwrap().remove("schema_version");
    let options = ConvertOptions::new().with_target(version("9.0.0"));
    assert!(matches!(
        chain.convert(doc.clone(), &options),
        Err(CacheError::MissingVersion)
    ));

    assert!(matches!(
        chain.convert(doc, &options.allow_unversioned(true)),
        Err(CacheError::UnknownVersion(v)) if v == "9.0.0"
    ));
}

#[test]
fn unversioned_document_gets_oldest_matching_version() {
    let chain = mock_chain();
    let mut doc = mock_document("1.1.0");
    doc.as_object_mut().unwrap().remove("schema_version");

    // Valid against both 1.1.0 and 1.1.1
    let (found, stamped) = infer_version(&doc, &mock_registry(), chain.validator()).unwrap();
    assert_eq!(found, version("1.1.0"));
    assert_eq!(stamped, mock_document("1.1.0"));

    let mut doc = mock_document("1.0.0");
    doc["surplus"] = json!(true);
    doc.as_object_mut().unwrap().remove("schema_version");
    assert!(matches!(
        infer_version(&doc, &mock_registry(), chain.validator()),
        Err(CacheError::NoMatchingVersion)
    ));
}

#[test]
fn declared_version_is_read_without_validation() {
    assert_eq!(
        MigrationChain::declared_version(&mock_document("1.1.1")).unwrap(),
        Some(version("1.1.1"))
    );
    assert_eq!(MigrationChain::declared_version(&json!({})).unwrap(), None);
}

proptest! {
    #[test]
    fn downgrades_always_fail(from in 0usize..4, to in 0usize..4) {
        prop_assume!(to < from);
        let chain = mock_chain();
        let result = chain.convert(
            mock_document(MOCK_VERSIONS[from]),
            &ConvertOptions::new().with_target(version(MOCK_VERSIONS[to])),
        );
        let is_downgrade = matches!(result, Err(CacheError::DowngradeNotSupported { .. }));
        prop_assert!(is_downgrade);
    }

    #[test]
    fn same_version_is_identity(index in 0usize..4, device in "[a-zA-Z0-9 ]{1,16}") {
        let v = MOCK_VERSIONS[index];
        let mut doc = mock_document(v);
        doc["device_name"] = json!(device);
        let out = mock_chain()
            .convert(doc.clone(), &ConvertOptions::new().with_target(version(v)))
            .unwrap();
        prop_assert_eq!(out, doc);
    }
}
