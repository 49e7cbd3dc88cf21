//! Cache handle: line access, append and reopen

use kt_cache::file::read_cache_file_with_mode;
use kt_cache::{Cache, CacheError, ConvertOptions, FailureKind, Runtime, WriteMode};
use kt_cache_test_utils::{
    builtin_chain, copy_fixture, fixed_timestamp, init_test_tracing, sample_header, sample_line,
    temp_dir,
};
use serde_json::json;

#[test]
fn get_line_by_key_and_params() {
    let dir = temp_dir();
    let path = copy_fixture("small_cache.json", dir.path());
    let cache = Cache::read(&path, &builtin_chain(), &ConvertOptions::new()).unwrap();

    let line = cache.get("0,1,0").unwrap();
    assert_eq!(line.time().unwrap(), Runtime::Measured(8.25));
    assert_eq!(line.param("b"), Some(&json!(1)));

    let failed = cache
        .find(&[("a", json!(1)), ("b", json!(1)), ("c", json!(1))])
        .unwrap()
        .unwrap();
    assert_eq!(
        failed.time().unwrap(),
        Runtime::Failed(FailureKind::CompilationFailedConfig)
    );

    assert_eq!(cache.query(&[("a", json!(0))]).unwrap().len(), 2);
    assert!(cache.get("1,0,0").is_none());
    assert!(matches!(
        cache.query(&[("z", json!(0))]),
        Err(CacheError::UnknownParameter(_))
    ));
}

#[test]
fn open_converts_file_to_open_form() {
    init_test_tracing();
    let dir = temp_dir();
    let path = copy_fixture("small_cache.json", dir.path());
    let chain = builtin_chain();

    let mut cache = Cache::open(&path, &chain).unwrap();
    assert_eq!(read_cache_file_with_mode(&path).unwrap().1, WriteMode::Open);

    cache.append(sample_line(1, 0, 0, 3.5)).unwrap();
    assert_eq!(cache.len(), 4);
    cache.close().unwrap();

    let (doc, mode) = read_cache_file_with_mode(&path).unwrap();
    assert_eq!(mode, WriteMode::Closed);
    assert_eq!(doc["cache"]["1,0,0"]["time"], json!(3.5));
}

#[test]
fn open_accepts_trailing_comma_files() {
    let dir = temp_dir();
    let path = copy_fixture("small_cache_open_comma.json", dir.path());
    let chain = builtin_chain();

    let mut cache = Cache::open(&path, &chain).unwrap();
    cache.append(sample_line(1, 0, 1, 2.0)).unwrap();
    drop(cache);

    let cache = Cache::read(&path, &chain, &ConvertOptions::new()).unwrap();
    assert_eq!(cache.len(), 4);
}

#[test]
fn append_out_of_range_fails_and_valid_append_persists() {
    let dir = temp_dir();
    let path = dir.path().join("new.json");
    let chain = builtin_chain();

    let mut cache = Cache::create(&path, sample_header(), &chain).unwrap();
    assert!(matches!(
        cache.append(sample_line(0, 0, 2, 1.0)),
        Err(CacheError::InvalidLine(_))
    ));
    assert!(cache.is_empty());

    let key = cache.append(sample_line(0, 0, 1, 1.0)).unwrap();
    assert_eq!(key, "0,0,1");
    assert_eq!(cache.len(), 1);
    cache.close().unwrap();

    let reopened = Cache::open(&path, &chain).unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.get("0,0,1").unwrap().timestamp().unwrap(), fixed_timestamp());
}

#[test]
fn open_refuses_unversioned_file() {
    let dir = temp_dir();
    let path = copy_fixture("no_version_field.json", dir.path());
    assert!(matches!(
        Cache::open(&path, &builtin_chain()),
        Err(CacheError::MissingVersion)
    ));

    let cache = Cache::read(
        &path,
        &builtin_chain(),
        &ConvertOptions::new().allow_unversioned(true),
    )
    .unwrap();
    assert_eq!(cache.version().to_string(), "1.0.0");
}

#[test]
fn read_handle_can_be_saved_elsewhere() {
    let dir = temp_dir();
    let path = copy_fixture("small_cache.json", dir.path());
    let mut cache = Cache::read(&path, &builtin_chain(), &ConvertOptions::new()).unwrap();
    cache.delete("0,0,0").unwrap();

    let out = dir.path().join("out.json");
    cache.save_as(&out, WriteMode::Closed).unwrap();
    let saved = Cache::read(&out, &builtin_chain(), &ConvertOptions::new()).unwrap();
    assert_eq!(saved.keys().collect::<Vec<_>>(), ["0,1,0", "1,1,1"]);

    let original = Cache::read(&path, &builtin_chain(), &ConvertOptions::new()).unwrap();
    assert_eq!(original.len(), 3);
}
