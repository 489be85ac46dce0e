//! Unit tests for per-entity metric extraction

use crate::fixtures::write_file_sync;
use eventwatch::PatternMode;
use eventwatch::models::EntityKind;
use eventwatch::services::extract::{
    ExtractOptions, ExtractionError, HashPolicy, PatternMatcher, extract,
};
use tempfile::TempDir;

#[test]
fn test_file_hashes_are_deterministic() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("hello.txt");
    write_file_sync(&path, b"hello").unwrap();

    let record = extract(&path, &ExtractOptions::default()).unwrap();
    let metrics = record.as_file().unwrap();

    assert_eq!(record.kind(), EntityKind::File);
    assert_eq!(metrics.size, 5);
    assert_eq!(
        metrics.content_md5.as_deref(),
        Some("5d41402abc4b2a76b9719d911017c592")
    );
    assert_eq!(
        metrics.content_sha256.as_deref(),
        Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
    );
    assert_eq!(metrics.pattern_found, None);

    let again = extract(&path, &ExtractOptions::default()).unwrap();
    assert_eq!(again.as_file(), record.as_file());
}

#[test]
fn test_hash_policy_skips_large_files() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("big.bin");
    write_file_sync(&path, &[0u8; 2048]).unwrap();

    let opts = ExtractOptions {
        hash: HashPolicy::BelowSize(1024),
        ..ExtractOptions::default()
    };
    let record = extract(&path, &opts).unwrap();
    let metrics = record.as_file().unwrap();
    assert_eq!(metrics.size, 2048);
    assert!(metrics.content_md5.is_none());
    assert!(metrics.content_sha256.is_none());
}

#[test]
fn test_substring_pattern_across_chunk_boundary() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("log.txt");
    let mut contents = vec![b'x'; 64 * 1024 - 3];
    contents.extend_from_slice(b"NEEDLE");
    write_file_sync(&path, &contents).unwrap();

    let opts = ExtractOptions {
        hash: HashPolicy::Disabled,
        pattern: Some(PatternMatcher::new("NEEDLE", PatternMode::Substring).unwrap()),
        ..ExtractOptions::default()
    };
    let record = extract(&path, &opts).unwrap();
    assert_eq!(record.as_file().unwrap().pattern_found, Some(true));

    let limited = ExtractOptions {
        max_pattern_scan: 1024,
        ..opts
    };
    let record = extract(&path, &limited).unwrap();
    assert_eq!(record.as_file().unwrap().pattern_found, Some(false));
}

#[test]
fn test_regex_pattern() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("app.log");
    write_file_sync(&path, b"INFO ok\nERROR code=42\n").unwrap();

    let opts = ExtractOptions {
        pattern: Some(PatternMatcher::new(r"ERROR code=\d+", PatternMode::Regex).unwrap()),
        ..ExtractOptions::default()
    };
    let record = extract(&path, &opts).unwrap();
    assert_eq!(record.as_file().unwrap().pattern_found, Some(true));
}

#[test]
fn test_missing_path_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let err = extract(&temp_dir.path().join("nope"), &ExtractOptions::default()).unwrap_err();

    assert!(matches!(err, ExtractionError::NotFound { .. }));
    assert_eq!(err.code(), "ENOENT");
    let diagnostic = err.to_diagnostic();
    assert!(diagnostic.subject.ends_with("nope"));
}

#[test]
fn test_directory_extracts_with_zero_aggregates() {
    let temp_dir = TempDir::new().unwrap();
    let record = extract(temp_dir.path(), &ExtractOptions::default()).unwrap();

    assert!(record.is_dir());
    assert_eq!(record.as_directory().unwrap().file_count, 0);
}
