//! Integration tests for full monitoring cycles over real files

use crate::fixtures::{T0, group, path_str, rule, write_file_sync};
use eventwatch::models::FieldValue;
use eventwatch::{
    CycleRecord, Diagnostic, DiagnosticKind, DiagnosticSink, Error, EventType, FixedClock,
    MemoryStore, Monitor, ParquetStore, Result, Sample, SampleStore, WatchGroupConfig, run_groups,
};
use std::fs::{self, File};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

/// Sink that keeps every reported diagnostic.
#[derive(Default)]
struct CollectingSink {
    seen: Mutex<Vec<(String, Diagnostic)>>,
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, watch_group: &str, diagnostic: &Diagnostic) {
        self.seen
            .lock()
            .unwrap()
            .push((watch_group.to_string(), diagnostic.clone()));
    }
}

/// Store that rejects writes while `fail` is set.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail: AtomicBool,
}

impl SampleStore for FlakyStore {
    fn persist(&self, record: &CycleRecord<'_>) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Persistence("disk full".to_string()));
        }
        self.inner.persist(record)
    }

    fn load_last_sample(&self, watch_group: &str) -> Result<Option<Sample>> {
        self.inner.load_last_sample(watch_group)
    }
}

fn monitor(config: WatchGroupConfig, clock: &Arc<FixedClock>) -> Monitor {
    Monitor::new(config, clock.clone()).unwrap()
}

fn set_mtime(path: &Path, secs: u64) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
}

#[test]
fn test_growing_file_emits_size_changed() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("data.bin");
    write_file_sync(&file, &[b'a'; 10]).unwrap();

    let mut config = group("growth", &[&file]);
    config.rules = vec![rule("grew", "file.get('size',0) > prev_file.get('size',0)")];
    let clock = Arc::new(FixedClock::new(T0));
    let mut m = monitor(config, &clock);
    let store = MemoryStore::new();
    let sink = CollectingSink::default();

    let baseline = m.run_once(&store, &sink).unwrap();
    assert!(baseline.baseline);
    assert!(baseline.events.is_empty());

    write_file_sync(&file, &[b'a'; 20]).unwrap();
    clock.advance(60);
    let report = m.run_once(&store, &sink).unwrap();

    assert!(!report.baseline);
    assert_eq!(report.sample_epoch, T0 + 60);
    assert_eq!(report.modified, 1);
    assert_eq!(report.events.len(), 1);

    let event = &report.events[0];
    let path = path_str(&file);
    assert_eq!(event.event_type, EventType::SizeChanged);
    assert_eq!(event.rule_name, "grew");
    assert_eq!(event.watch_group, "growth");
    assert_eq!(event.sample_epoch, T0 + 60);
    assert_eq!(event.affected_paths.iter().collect::<Vec<_>>(), vec![&path]);
    let size = &event.change_details[&path]["size"];
    assert_eq!(size.old, FieldValue::Int(10));
    assert_eq!(size.new, FieldValue::Int(20));

    assert_eq!(store.events("growth").unwrap().len(), 1);
    assert_eq!(store.samples("growth").unwrap().len(), 2);
}

#[test]
fn test_deleted_file_emits_removed() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("watched");
    write_file_sync(dir.join("keep.txt"), b"keep").unwrap();
    write_file_sync(dir.join("gone.txt"), b"gone").unwrap();

    let mut config = group("removal", &[&dir]);
    config.explode_directories = Some(true);
    config.rules = vec![rule("removed", "event_type == 'removed'")];
    let clock = Arc::new(FixedClock::new(T0));
    let mut m = monitor(config, &clock);
    let store = MemoryStore::new();
    let sink = CollectingSink::default();

    m.run_once(&store, &sink).unwrap();
    fs::remove_file(dir.join("gone.txt")).unwrap();
    clock.advance(60);
    let report = m.run_once(&store, &sink).unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.events.len(), 1);
    let event = &report.events[0];
    assert_eq!(event.event_type, EventType::Removed);
    assert_eq!(
        event.affected_paths.iter().collect::<Vec<_>>(),
        vec![&path_str(&dir.join("gone.txt"))]
    );
    assert!(event.change_details.is_empty());
}

#[test]
fn test_aggregate_recency_rule_uses_now() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("logs");
    write_file_sync(dir.join("a.log"), b"a").unwrap();
    write_file_sync(dir.join("b.log"), b"b").unwrap();
    write_file_sync(dir.join("c.txt"), b"c").unwrap();

    let t1 = 1_600_000_000u64;
    let t2 = t1 + 3_600;
    set_mtime(&dir.join("a.log"), t1);
    set_mtime(&dir.join("b.log"), t2);
    set_mtime(&dir.join("c.txt"), t2 + 10_000);

    let mut config = group("recency", &[&dir]);
    config.explode_directories = Some(true);
    config.rules = vec![rule(
        "recent_log",
        "now - aggregate(data, '*.log', 'last_modified', max) < 600",
    )];
    let clock = Arc::new(FixedClock::new(T0));
    let mut m = monitor(config, &clock);
    let store = MemoryStore::new();
    let sink = CollectingSink::default();

    m.run_once(&store, &sink).unwrap();

    let t2 = i64::try_from(t2).unwrap();
    clock.set(t2 + 1_200);
    let stale = m.run_once(&store, &sink).unwrap();
    assert!(stale.events.is_empty());

    clock.set(t2 + 300);
    let fresh = m.run_once(&store, &sink).unwrap();
    assert_eq!(fresh.events.len(), 1);
    let affected = &fresh.events[0].affected_paths;
    assert!(affected.contains(&path_str(&dir.join("a.log"))));
    assert!(affected.contains(&path_str(&dir.join("b.log"))));
    assert!(!affected.contains(&path_str(&dir.join("c.txt"))));
}

#[test]
fn test_malformed_rule_reports_diagnostic_each_cycle() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("f.txt");
    write_file_sync(&file, b"one").unwrap();

    let mut config = group("malformed", &[&file]);
    config.rules = vec![rule("broken", "file.size >>> 3")];
    let clock = Arc::new(FixedClock::new(T0));
    let mut m = monitor(config, &clock);
    let store = MemoryStore::new();
    let sink = CollectingSink::default();

    for round in 0..2 {
        write_file_sync(&file, &vec![b'x'; 10 + round]).unwrap();
        clock.advance(60);
        let report = m.run_once(&store, &sink).unwrap();
        assert!(report.events.is_empty());
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].code, "RULE_COMPILE");
        assert_eq!(report.diagnostics[0].subject, "broken");
    }

    let seen = sink.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|(group, _)| group == "malformed"));
}

#[test]
fn test_baseline_policy() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("new.txt");
    write_file_sync(&file, b"fresh").unwrap();

    let mut config = group("baseline", &[&file]);
    config.rules = vec![rule("created", "event_type == 'created'")];
    let clock = Arc::new(FixedClock::new(T0));
    let sink = CollectingSink::default();

    let mut quiet = monitor(config.clone(), &clock);
    let report = quiet.run_once(&MemoryStore::new(), &sink).unwrap();
    assert!(report.baseline);
    assert_eq!(report.created, 1);
    assert!(report.events.is_empty());

    config.alert_on_baseline = true;
    let mut loud = monitor(config, &clock);
    let report = loud.run_once(&MemoryStore::new(), &sink).unwrap();
    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].event_type, EventType::Created);
}

#[test]
fn test_failed_persist_keeps_previous_sample() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("f.txt");
    write_file_sync(&file, &[b'a'; 10]).unwrap();

    let mut config = group("flaky", &[&file]);
    config.rules = vec![rule("grew", "file.size > prev_file.size")];
    let clock = Arc::new(FixedClock::new(T0));
    let mut m = monitor(config, &clock);
    let store = FlakyStore::default();
    let sink = CollectingSink::default();

    m.run_once(&store, &sink).unwrap();
    assert_eq!(m.previous().map(Sample::epoch), Some(T0));

    write_file_sync(&file, &[b'a'; 20]).unwrap();
    clock.advance(60);
    store.fail.store(true, Ordering::SeqCst);
    let err = m.run_once(&store, &sink).unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
    assert_eq!(m.previous().map(Sample::epoch), Some(T0));
    assert!(
        sink.seen
            .lock()
            .unwrap()
            .iter()
            .any(|(_, d)| d.kind == DiagnosticKind::Persistence)
    );

    store.fail.store(false, Ordering::SeqCst);
    clock.advance(60);
    let report = m.run_once(&store, &sink).unwrap();
    assert_eq!(report.events.len(), 1, "growth is still seen against the retained sample");
    assert_eq!(m.previous().map(Sample::epoch), Some(T0 + 120));
}

#[test]
fn test_cancelled_monitor_does_not_run() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("f.txt");
    write_file_sync(&file, b"x").unwrap();

    let clock = Arc::new(FixedClock::new(T0));
    let mut m = monitor(group("cancel", &[&file]), &clock);
    m.cancel_token().cancel();

    let store = MemoryStore::new();
    assert!(matches!(
        m.run_once(&store, &CollectingSink::default()),
        Err(Error::Cancelled)
    ));
    assert!(store.samples("cancel").unwrap().is_empty());
}

#[test]
fn test_run_groups_keeps_monitor_order() {
    let temp_dir = TempDir::new().unwrap();
    let first = temp_dir.path().join("first.txt");
    let second = temp_dir.path().join("second.txt");
    write_file_sync(&first, b"1").unwrap();
    write_file_sync(&second, b"22").unwrap();

    let clock = Arc::new(FixedClock::new(T0));
    let mut monitors = vec![
        monitor(group("first", &[&first]), &clock),
        monitor(group("second", &[&second]), &clock),
    ];
    let store = MemoryStore::new();

    let results = run_groups(&mut monitors, &store, &CollectingSink::default());

    let names: Vec<String> = results
        .into_iter()
        .map(|r| r.unwrap().watch_group)
        .collect();
    assert_eq!(names, vec!["first", "second"]);
    assert_eq!(store.samples("first").unwrap().len(), 1);
    assert_eq!(store.samples("second").unwrap().len(), 1);
}

#[test]
fn test_restore_resumes_from_store() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("f.txt");
    write_file_sync(&file, &[b'a'; 10]).unwrap();

    let mut config = group("resume", &[&file]);
    config.rules = vec![rule("grew", "file.size > prev_file.size")];
    let clock = Arc::new(FixedClock::new(T0));
    let store = MemoryStore::new();
    let sink = CollectingSink::default();

    monitor(config.clone(), &clock).run_once(&store, &sink).unwrap();

    let mut resumed = monitor(config, &clock);
    assert!(resumed.restore(&store).unwrap());
    write_file_sync(&file, &[b'a'; 30]).unwrap();
    clock.advance(60);
    let report = resumed.run_once(&store, &sink).unwrap();
    assert!(!report.baseline);
    assert_eq!(report.events.len(), 1);
}

#[test]
fn test_interval_floor() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = group("interval", &[temp_dir.path()]);
    config.sample_rate = 3_600;
    let clock = Arc::new(FixedClock::new(T0));
    assert_eq!(monitor(config, &clock).interval(), Duration::from_secs(3_600));
}

#[test]
fn test_restore_from_parquet_skips_baseline() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("watched/f.txt");
    write_file_sync(&file, &[b'a'; 10]).unwrap();
    let store = ParquetStore::new(temp_dir.path().join("store"));

    let mut config = group("persisted", &[&file]);
    config.rules = vec![rule("grew", "file.size > prev_file.size")];
    assert!(!config.alert_on_baseline);
    let clock = Arc::new(FixedClock::new(T0));
    let sink = CollectingSink::default();

    let first = monitor(config.clone(), &clock).run_once(&store, &sink).unwrap();
    assert!(first.baseline);
    assert!(first.events.is_empty());

    let mut resumed = monitor(config, &clock);
    assert!(resumed.restore(&store).unwrap());
    assert_eq!(resumed.previous().map(Sample::epoch), Some(T0));

    write_file_sync(&file, &[b'a'; 25]).unwrap();
    clock.advance(60);
    let report = resumed.run_once(&store, &sink).unwrap();

    assert!(!report.baseline);
    assert_eq!(report.created, 0);
    assert_eq!(report.modified, 1);
    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].event_type, EventType::SizeChanged);
    assert_eq!(store.events("persisted").unwrap(), report.events);
}
