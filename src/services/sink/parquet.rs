//! Parquet-backed store: one snapshot file per cycle per watch group.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<group-slug>/sample-<epoch>.parquet
//! <root>/<group-slug>/events-<epoch>.jsonl
//! ```
//!
//! Events files share their snapshot's retention: pruning a snapshot also
//! removes the events of that cycle.

use super::{CycleRecord, SampleStore, group_slug};
use crate::io::snapshot::{read_snapshot, write_snapshot};
use crate::{Error, Result};
use crate::models::{Event, Sample};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const SAMPLE_PREFIX: &str = "sample-";
const SAMPLE_SUFFIX: &str = ".parquet";

pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    /// Create a store rooted at `root`; directories are created on first write.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn group_dir(&self, watch_group: &str) -> PathBuf {
        self.root.join(group_slug(watch_group))
    }

    /// Snapshot files for a group, oldest epoch first.
    pub fn snapshots(&self, watch_group: &str) -> Result<Vec<(i64, PathBuf)>> {
        let dir = self.group_dir(watch_group);
        let read_dir = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots: Vec<(i64, PathBuf)> = read_dir
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let epoch = name
                    .to_str()?
                    .strip_prefix(SAMPLE_PREFIX)?
                    .strip_suffix(SAMPLE_SUFFIX)?
                    .parse::<i64>()
                    .ok()?;
                Some((epoch, entry.path()))
            })
            .collect();
        snapshots.sort_by_key(|(epoch, _)| *epoch);
        Ok(snapshots)
    }

    /// Events written for a group, oldest cycle first.
    pub fn events(&self, watch_group: &str) -> Result<Vec<Event>> {
        let dir = self.group_dir(watch_group);
        let mut files: Vec<(i64, PathBuf)> = match fs::read_dir(&dir) {
            Ok(rd) => rd
                .filter_map(std::result::Result::ok)
                .filter_map(|entry| {
                    let name = entry.file_name();
                    let epoch = name
                        .to_str()?
                        .strip_prefix("events-")?
                        .strip_suffix(".jsonl")?
                        .parse::<i64>()
                        .ok()?;
                    Some((epoch, entry.path()))
                })
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        files.sort_by_key(|(epoch, _)| *epoch);

        let mut events = Vec::new();
        for (_, path) in files {
            let text = fs::read_to_string(&path)?;
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                let event: Event = serde_json::from_str(line).map_err(|e| {
                    Error::Persistence(format!("{}: {e}", path.display()))
                })?;
                events.push(event);
            }
        }
        Ok(events)
    }

    fn write_events(path: &Path, events: &[Event]) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for event in events {
            serde_json::to_writer(&mut writer, event)
                .map_err(|e| Error::Persistence(format!("cannot encode event: {e}")))?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Drop the oldest snapshots beyond `keep`, together with the events
    /// written in the same cycles.
    fn prune(&self, watch_group: &str, keep: usize) -> Result<()> {
        let dir = self.group_dir(watch_group);
        let snapshots = self.snapshots(watch_group)?;
        let excess = snapshots.len().saturating_sub(keep.max(1));
        for (epoch, path) in snapshots.into_iter().take(excess) {
            log::debug!("Pruning snapshot {} for {watch_group}", epoch);
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("Cannot prune {}: {e}", path.display());
            }
            let events = dir.join(events_file_name(epoch));
            match fs::remove_file(&events) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Cannot prune {}: {e}", events.display()),
            }
        }
        Ok(())
    }
}

fn events_file_name(epoch: i64) -> String {
    format!("events-{epoch}.jsonl")
}

fn remove_quietly(paths: &[&Path]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

impl SampleStore for ParquetStore {
    fn persist(&self, record: &CycleRecord<'_>) -> Result<()> {
        let sample = record.sample;
        let dir = self.group_dir(sample.watch_group());
        fs::create_dir_all(&dir)?;

        let epoch = sample.epoch();
        let target = dir.join(format!("{SAMPLE_PREFIX}{epoch}{SAMPLE_SUFFIX}"));
        let tmp = dir.join(format!(".{SAMPLE_PREFIX}{epoch}{SAMPLE_SUFFIX}.tmp"));

        if let Err(e) = write_snapshot(&tmp, sample, record.diagnostics) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Persistence(format!(
                "cannot write snapshot {}: {e}",
                target.display()
            )));
        }

        let events_target = dir.join(events_file_name(epoch));
        let events_tmp = dir.join(format!(".{}.tmp", events_file_name(epoch)));
        let has_events = !record.events.is_empty();

        if has_events && let Err(e) = Self::write_events(&events_tmp, record.events) {
            remove_quietly(&[&tmp, &events_tmp]);
            return Err(e);
        }

        // The snapshot lands first; if its events cannot follow, it is rolled
        // back so the group's last sample stays the previous one.
        if let Err(e) = fs::rename(&tmp, &target) {
            remove_quietly(&[&tmp, &events_tmp]);
            return Err(e.into());
        }
        if has_events && let Err(e) = fs::rename(&events_tmp, &events_target) {
            remove_quietly(&[&target, &events_tmp]);
            return Err(e.into());
        }
        log::info!(
            "Snapshot saved to: {} ({} entries, {} events)",
            target.display(),
            sample.len(),
            record.events.len()
        );

        self.prune(sample.watch_group(), record.max_samples)
    }

    fn load_last_sample(&self, watch_group: &str) -> Result<Option<Sample>> {
        let Some((_, path)) = self.snapshots(watch_group)?.pop() else {
            return Ok(None);
        };

        let (sample, _diagnostics) = read_snapshot(&path)
            .map_err(|e| Error::Persistence(format!("cannot read {}: {e}", path.display())))?;
        log::debug!(
            "Restored sample {} for {watch_group} from {}",
            sample.epoch(),
            path.display()
        );
        Ok(Some(sample))
    }
}
