//! Persistence collaborators that receive each completed cycle.

use crate::Result;
use crate::models::{Diagnostic, Event, Sample};

/// Everything one successful cycle hands to persistence.
#[derive(Debug, Clone, Copy)]
pub struct CycleRecord<'a> {
    pub sample: &'a Sample,
    pub events: &'a [Event],
    pub diagnostics: &'a [Diagnostic],
    /// Snapshots to retain for this watch group.
    pub max_samples: usize,
}

/// Trait implemented by stores that keep samples and events across cycles.
///
/// Stores are shared between concurrently running watch groups, so methods
/// take `&self` and implementations synchronize internally.
pub trait SampleStore: Send + Sync {
    /// Persist a completed cycle. On error nothing about the group's last
    /// sample may have changed.
    fn persist(&self, record: &CycleRecord<'_>) -> Result<()>;

    /// The most recently persisted sample for `watch_group`, if any.
    fn load_last_sample(&self, watch_group: &str) -> Result<Option<Sample>>;
}

/// Lowercase file-system-safe directory name for a watch group.
#[must_use]
pub fn group_slug(watch_group: &str) -> String {
    let slug: String = watch_group
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches(['-', '.']);
    if slug.is_empty() {
        "group".to_string()
    } else {
        slug.to_string()
    }
}

pub mod memory;
pub mod parquet;
