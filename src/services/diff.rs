//! Differential engine: classifies every path between two samples

use crate::models::{
    ChangeKind, ChildDelta, Diff, DiffEntry, FieldChanges, FieldDelta, MetricRecord, Sample,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Compare `current` against `previous`.
///
/// The result is keyed over the union of both samples' paths. Without a
/// previous sample every current path is `Created`.
#[must_use]
pub fn diff(previous: Option<&Sample>, current: &Sample) -> Diff {
    let mut entries = BTreeMap::new();

    for (path, record) in current.entries() {
        let entry = match previous.and_then(|p| p.get(path)) {
            None => DiffEntry::Created {
                record: record.clone(),
            },
            Some(old) => compare_records(old, record),
        };
        entries.insert(path.clone(), entry);
    }

    if let Some(previous) = previous {
        for (path, record) in previous.entries() {
            if !current.contains(path) {
                entries.insert(
                    path.clone(),
                    DiffEntry::Removed {
                        record: record.clone(),
                    },
                );
            }
        }
    }

    let diff = Diff::from_entries(entries);
    log::debug!(
        "Diff: {} created, {} removed, {} modified, {} unchanged",
        diff.count(ChangeKind::Created),
        diff.count(ChangeKind::Removed),
        diff.count(ChangeKind::Modified),
        diff.count(ChangeKind::Unchanged)
    );
    diff
}

/// Compare two records for the same path field by field.
#[must_use]
pub fn compare_records(old: &MetricRecord, new: &MetricRecord) -> DiffEntry {
    let mut fields: Vec<&str> = old.diff_fields().to_vec();
    for field in new.diff_fields() {
        if !fields.contains(field) {
            fields.push(field);
        }
    }

    let mut changes = FieldChanges::new();
    for field in fields {
        let before = old.field(field);
        let after = new.field(field);
        if before != after {
            changes.insert(field.to_string(), FieldDelta::new(before, after));
        }
    }

    let children = match (
        old.as_directory().and_then(|d| d.children.as_ref()),
        new.as_directory().and_then(|d| d.children.as_ref()),
    ) {
        (Some(before), Some(after)) => {
            let delta = ChildDelta {
                added: after.difference(before).cloned().collect(),
                removed: before.difference(after).cloned().collect(),
            };
            (!delta.is_empty()).then_some(delta)
        }
        _ => None,
    };

    if changes.is_empty() && children.is_none() {
        DiffEntry::Unchanged
    } else {
        DiffEntry::Modified { changes, children }
    }
}

/// Structural change beneath a directory, derived from per-path entries.
///
/// Exploded directories have no child set of their own; their children are
/// ordinary sample entries, so the change view is recovered from the diff.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SubtreeChanges {
    pub created: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub modified: BTreeSet<String>,
}

impl SubtreeChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Changes to paths strictly beneath `dir`. With `immediate_only`, only
/// direct children are considered.
#[must_use]
pub fn subtree_changes(diff: &Diff, dir: &str, immediate_only: bool) -> SubtreeChanges {
    let prefix = format!("{}/", dir.trim_end_matches('/'));
    let mut view = SubtreeChanges::default();

    for (path, entry) in diff.entries() {
        let Some(rest) = path.strip_prefix(&prefix) else {
            continue;
        };
        if rest.is_empty() || (immediate_only && rest.contains('/')) {
            continue;
        }

        let bucket = match entry.kind() {
            ChangeKind::Created => &mut view.created,
            ChangeKind::Removed => &mut view.removed,
            ChangeKind::Modified => &mut view.modified,
            ChangeKind::Unchanged => continue,
        };
        bucket.insert(path.clone());
    }

    view
}
