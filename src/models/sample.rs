//! Sample snapshots and the diff types computed between them

use super::record::{FieldValue, MetricRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One cycle's complete metrics snapshot for a watch group.
///
/// Entries are keyed by path, so a sample can never hold two records for the
/// same path. Samples are built once and only handed out by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    epoch: i64,
    watch_group: String,
    entries: BTreeMap<String, MetricRecord>,
}

impl Sample {
    /// Build a sample from records. When two records share a path the first
    /// one is kept.
    pub fn new<I>(epoch: i64, watch_group: impl Into<String>, records: I) -> Self
    where
        I: IntoIterator<Item = MetricRecord>,
    {
        let watch_group = watch_group.into();
        let mut entries = BTreeMap::new();
        for record in records {
            if entries.contains_key(&record.path) {
                log::debug!("Duplicate record for {} dropped from {watch_group}", record.path);
                continue;
            }
            entries.insert(record.path.clone(), record);
        }

        Self {
            epoch,
            watch_group,
            entries,
        }
    }

    #[must_use]
    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    #[must_use]
    pub fn watch_group(&self) -> &str {
        &self.watch_group
    }

    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, MetricRecord> {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&MetricRecord> {
        self.entries.get(path)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn records(&self) -> impl Iterator<Item = &MetricRecord> {
        self.entries.values()
    }
}

/// Old/new pair for one changed field. Numeric fields also carry the signed
/// difference `new - old`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDelta {
    pub old: FieldValue,
    pub new: FieldValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

impl FieldDelta {
    #[must_use]
    pub fn new(old: FieldValue, new: FieldValue) -> Self {
        let delta = match (old.as_f64(), new.as_f64()) {
            (Some(o), Some(n)) => Some(n - o),
            _ => None,
        };
        Self { old, new, delta }
    }
}

/// Field name to delta, restricted to the fields that actually changed.
pub type FieldChanges = BTreeMap<String, FieldDelta>;

/// Child-set change of an aggregated directory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChildDelta {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ChildDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Coarse classification of a diff entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Removed,
    Modified,
    Unchanged,
}

impl ChangeKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Removed => "removed",
            ChangeKind::Modified => "modified",
            ChangeKind::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one path between two samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffEntry {
    Created {
        record: MetricRecord,
    },
    Removed {
        record: MetricRecord,
    },
    Modified {
        changes: FieldChanges,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        children: Option<ChildDelta>,
    },
    Unchanged,
}

impl DiffEntry {
    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        match self {
            DiffEntry::Created { .. } => ChangeKind::Created,
            DiffEntry::Removed { .. } => ChangeKind::Removed,
            DiffEntry::Modified { .. } => ChangeKind::Modified,
            DiffEntry::Unchanged => ChangeKind::Unchanged,
        }
    }

    #[must_use]
    pub fn changes(&self) -> Option<&FieldChanges> {
        match self {
            DiffEntry::Modified { changes, .. } => Some(changes),
            _ => None,
        }
    }

    #[must_use]
    pub fn children(&self) -> Option<&ChildDelta> {
        match self {
            DiffEntry::Modified { children, .. } => children.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, DiffEntry::Unchanged)
    }
}

/// Per-path classification over the union of two samples' paths.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Diff {
    entries: BTreeMap<String, DiffEntry>,
}

impl Diff {
    #[must_use]
    pub fn from_entries(entries: BTreeMap<String, DiffEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, DiffEntry> {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&DiffEntry> {
        self.entries.get(path)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths with the given classification, in path order.
    pub fn paths_of(&self, kind: ChangeKind) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |(_, entry)| entry.kind() == kind)
            .map(|(path, _)| path.as_str())
    }

    /// Entries other than `Unchanged`.
    pub fn changed(&self) -> impl Iterator<Item = (&str, &DiffEntry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_change())
            .map(|(path, entry)| (path.as_str(), entry))
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.entries.values().any(DiffEntry::is_change)
    }

    #[must_use]
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.paths_of(kind).count()
    }
}
