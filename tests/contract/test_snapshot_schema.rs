//! Contract tests for the snapshot schema and the JSON report format

use crate::fixtures::{T0, group, write_file_sync};
use eventwatch::cli::output::format_json;
use eventwatch::io::snapshot::snapshot_schema;
use eventwatch::{FixedClock, LogDiagnostics, MemoryStore, Monitor};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_snapshot_column_names() {
    let schema = snapshot_schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();

    assert_eq!(
        names,
        vec![
            "path",
            "kind",
            "size",
            "last_modified",
            "creation_time",
            "owner_uid",
            "owner_gid",
            "mode",
            "content_md5",
            "content_sha256",
            "pattern_found",
            "file_count",
            "dir_count",
            "children_json",
            "meta_watch_group",
            "meta_epoch",
            "error_subject",
            "error_kind",
            "error_code",
            "error_message",
        ]
    );
    assert!(schema.fields().iter().all(|f| f.is_nullable()));
}

#[test]
fn test_json_report_shape() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("f.txt");
    write_file_sync(&file, b"hello").unwrap();

    let mut monitor = Monitor::new(group("report", &[&file]), Arc::new(FixedClock::new(T0))).unwrap();
    let report = monitor.run_once(&MemoryStore::new(), &LogDiagnostics).unwrap();

    let value: serde_json::Value = serde_json::from_str(&format_json(&[report])).unwrap();
    let groups = value["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 1);

    let group = &groups[0];
    assert_eq!(group["watch_group"], "report");
    assert_eq!(group["sample_epoch"], T0);
    assert_eq!(group["entry_count"], 1);
    assert_eq!(group["baseline"], true);
    assert_eq!(group["created"], 1);
    assert_eq!(group["removed"], 0);
    assert_eq!(group["modified"], 0);
    assert!(group["events"].as_array().unwrap().is_empty());
    assert!(group["diagnostics"].as_array().unwrap().is_empty());
}
