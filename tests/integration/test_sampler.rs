//! Integration tests for sampling real directory trees

use crate::fixtures::{T0, create_nested_fixture, group, path_str, write_file_sync};
use eventwatch::services::sampler::walk::{WalkPolicy, walk_directory};
use eventwatch::services::sampler::{Sampler, sample};
use eventwatch::{CancelToken, DiagnosticKind, Error};
use std::fs;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[test]
fn test_aggregated_directory_respects_depth() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_nested_fixture(temp_dir.path()).unwrap();

    let mut config = group("depth", &[&root]);
    config.max_depth = Some(1);
    config.explode_directories = Some(false);

    let outcome = sample(&config, None, T0).unwrap();
    let s = &outcome.sample;

    assert_eq!(s.len(), 1, "only the aggregate record is expected");
    let record = s.get(&path_str(&root)).unwrap();
    let metrics = record.as_directory().unwrap();
    assert_eq!(metrics.file_count, 1);
    assert_eq!(metrics.dir_count, 1);
    assert_eq!(metrics.total_size, 100);
    assert!(!s.contains(&path_str(&root.join("sub/b.txt"))));

    let children = metrics.children.as_ref().unwrap();
    assert!(children.contains(&path_str(&root.join("a.txt"))));
    assert!(children.contains(&path_str(&root.join("sub"))));
    assert!(outcome.diagnostics.is_empty());
}

#[test]
fn test_deeper_walk_counts_nested_files() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_nested_fixture(temp_dir.path()).unwrap();

    let mut config = group("deep", &[&root]);
    config.max_depth = Some(5);

    let outcome = sample(&config, None, T0).unwrap();
    let metrics = outcome.sample.get(&path_str(&root)).unwrap().as_directory().unwrap().clone();
    assert_eq!(metrics.file_count, 2);
    assert_eq!(metrics.total_size, 150);
}

#[test]
fn test_exploded_directory_records_each_file() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_nested_fixture(temp_dir.path()).unwrap();

    let mut config = group("explode", &[&root]);
    config.explode_directories = Some(true);
    config.max_depth = Some(1);

    let outcome = sample(&config, None, T0).unwrap();
    let s = &outcome.sample;

    assert!(s.contains(&path_str(&root)));
    assert!(s.contains(&path_str(&root.join("a.txt"))));
    assert!(s.contains(&path_str(&root.join("sub"))), "boundary directory is still recorded");
    assert!(!s.contains(&path_str(&root.join("sub/b.txt"))));

    let a = s.get(&path_str(&root.join("a.txt"))).unwrap().as_file().unwrap().clone();
    assert_eq!(a.size, 100);
    assert!(a.content_sha256.is_some());
    assert!(s.get(&path_str(&root)).unwrap().as_directory().unwrap().children.is_none());

    config.max_depth = Some(2);
    let deeper = sample(&config, None, T0).unwrap();
    assert!(deeper.sample.contains(&path_str(&root.join("sub/b.txt"))));
}

#[test]
fn test_glob_watch_items_and_pattern() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_file_sync(root.join("app.log"), b"all good").unwrap();
    write_file_sync(root.join("db.log"), b"ERROR: disk full").unwrap();
    write_file_sync(root.join("notes.txt"), b"ERROR elsewhere").unwrap();

    let glob_item = root.join("*.log");
    let mut config = group("globbed", &[&glob_item]);
    config.pattern = Some("ERROR".to_string());

    let outcome = sample(&config, None, T0).unwrap();
    let s = &outcome.sample;

    assert_eq!(s.len(), 2);
    let app = s.get(&path_str(&root.join("app.log"))).unwrap();
    let db = s.get(&path_str(&root.join("db.log"))).unwrap();
    assert_eq!(app.as_file().unwrap().pattern_found, Some(false));
    assert_eq!(db.as_file().unwrap().pattern_found, Some(true));
}

#[test]
fn test_missing_items_become_diagnostics() {
    let temp_dir = TempDir::new().unwrap();
    let present = temp_dir.path().join("present.txt");
    write_file_sync(&present, b"x").unwrap();
    let missing = temp_dir.path().join("missing.txt");

    let config = group("partial", &[&present, &missing]);
    let outcome = sample(&config, None, T0).unwrap();

    assert_eq!(outcome.sample.len(), 1);
    assert_eq!(outcome.diagnostics.len(), 1);
    let diagnostic = &outcome.diagnostics[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::Traversal);
    assert_eq!(diagnostic.code, "ENOENT");
    assert_eq!(diagnostic.subject, path_str(&missing));
}

#[test]
fn test_sample_carries_epoch_and_group() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("f");
    write_file_sync(&file, b"x").unwrap();

    let outcome = sample(&group("meta", &[&file]), None, T0 + 5).unwrap();
    assert_eq!(outcome.sample.epoch(), T0 + 5);
    assert_eq!(outcome.sample.watch_group(), "meta");
}

#[test]
fn test_cancelled_sample_returns_error() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_nested_fixture(temp_dir.path()).unwrap();
    let sampler = Sampler::new(&group("cancel", &[&root])).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(matches!(sampler.sample(T0, None, &cancel), Err(Error::Cancelled)));
}

#[cfg(unix)]
#[test]
fn test_symlinks_are_skipped_unless_followed() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("tree");
    fs::create_dir_all(&root).unwrap();
    let target = temp_dir.path().join("outside.txt");
    write_file_sync(&target, &[b'z'; 40]).unwrap();
    std::os::unix::fs::symlink(&target, root.join("link.txt")).unwrap();

    let mut config = group("links", &[&root]);
    let plain = sample(&config, None, T0).unwrap();
    let metrics = plain.sample.get(&path_str(&root)).unwrap().as_directory().unwrap().clone();
    assert_eq!(metrics.file_count, 0);

    config.follow_symlinks = true;
    let followed = sample(&config, None, T0).unwrap();
    let metrics = followed.sample.get(&path_str(&root)).unwrap().as_directory().unwrap().clone();
    assert_eq!(metrics.file_count, 1);
    assert_eq!(metrics.total_size, 40);
}

#[test]
fn test_literal_item_with_glob_characters() {
    let temp_dir = TempDir::new().unwrap();
    let named = temp_dir.path().join("a[1].txt");
    let lookalike = temp_dir.path().join("a1.txt");
    write_file_sync(&named, &[b'n'; 7]).unwrap();
    write_file_sync(&lookalike, &[b'l'; 3]).unwrap();

    let outcome = sample(&group("brackets", &[&named]), None, T0).unwrap();

    assert_eq!(outcome.sample.len(), 1);
    let record = outcome.sample.get(&path_str(&named)).unwrap();
    assert_eq!(record.as_file().unwrap().size, 7);
    assert!(outcome.diagnostics.is_empty());
}

#[test]
fn test_glob_matching_nothing_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let pattern = temp_dir.path().join("*.log");

    let outcome = sample(&group("empty-glob", &[&pattern]), None, T0).unwrap();

    assert!(outcome.sample.is_empty());
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].code, "NOMATCH");
    assert_eq!(outcome.diagnostics[0].subject, path_str(&pattern));
}

#[test]
fn test_huge_scan_timeout_means_no_deadline() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_nested_fixture(temp_dir.path()).unwrap();

    let mut config = group("patient", &[&root]);
    config.scan_timeout_secs = u64::MAX;
    config.validate().unwrap();

    let outcome = sample(&config, None, T0).unwrap();
    assert_eq!(outcome.sample.len(), 1);
    assert!(outcome.diagnostics.is_empty());
}

#[test]
fn test_walk_past_deadline_times_out() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_nested_fixture(temp_dir.path()).unwrap();
    let policy = WalkPolicy {
        max_depth: 5,
        explode: false,
        follow_symlinks: false,
        cross_filesystem: true,
        deadline: Some(Instant::now()),
    };

    let output = walk_directory(&root, fs::metadata(&root).unwrap(), &policy, &CancelToken::new())
        .unwrap();

    assert!(output.timed_out);
    assert_eq!(output.diagnostics.len(), 1);
    assert_eq!(output.diagnostics[0].code, "TIMEOUT");
    assert_eq!(output.diagnostics[0].kind, DiagnosticKind::Traversal);
    assert_eq!(output.diagnostics[0].subject, path_str(&root));
}

#[test]
fn test_timed_out_walk_carries_previous_records_forward() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_nested_fixture(temp_dir.path()).unwrap();
    let mut config = group("slow", &[&root]);
    config.explode_directories = Some(true);

    let previous = sample(&config, None, T0).unwrap().sample;
    assert_eq!(previous.len(), 3);

    write_file_sync(root.join("a.txt"), &[b'a'; 200]).unwrap();
    write_file_sync(root.join("new.txt"), b"new").unwrap();

    let sampler = Sampler::new(&config).unwrap().with_scan_timeout(Duration::ZERO);
    let outcome = sampler.sample(T0 + 60, Some(&previous), &CancelToken::new()).unwrap();

    assert_eq!(outcome.sample.epoch(), T0 + 60);
    assert_eq!(outcome.sample.entries(), previous.entries());
    let a = outcome.sample.get(&path_str(&root.join("a.txt"))).unwrap();
    assert_eq!(a.as_file().unwrap().size, 100);
    assert!(!outcome.sample.contains(&path_str(&root.join("new.txt"))));
    assert!(outcome.diagnostics.iter().any(|d| d.code == "TIMEOUT"));

    let fresh = sampler.sample(T0 + 60, None, &CancelToken::new()).unwrap();
    assert!(fresh.sample.contains(&path_str(&root)), "partial records are kept without history");
    assert!(fresh.diagnostics.iter().any(|d| d.code == "TIMEOUT"));
}
