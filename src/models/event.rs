//! Events emitted when a rule condition holds

use super::sample::FieldChanges;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Removed,
    SizeChanged,
    ContentModified,
    ContentChanged,
    PatternFound,
    PatternRemoved,
    FilesChanged,
    SubdirsChanged,
    DirSizeChanged,
    Custom,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        EventType::Created,
        EventType::Removed,
        EventType::SizeChanged,
        EventType::ContentModified,
        EventType::ContentChanged,
        EventType::PatternFound,
        EventType::PatternRemoved,
        EventType::FilesChanged,
        EventType::SubdirsChanged,
        EventType::DirSizeChanged,
        EventType::Custom,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Removed => "removed",
            EventType::SizeChanged => "size_changed",
            EventType::ContentModified => "content_modified",
            EventType::ContentChanged => "content_changed",
            EventType::PatternFound => "pattern_found",
            EventType::PatternRemoved => "pattern_removed",
            EventType::FilesChanged => "files_changed",
            EventType::SubdirsChanged => "subdirs_changed",
            EventType::DirSizeChanged => "dir_size_changed",
            EventType::Custom => "custom",
        }
    }

    /// Precedence when several change types apply to the same path; lower
    /// ranks win.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            EventType::Removed => 0,
            EventType::Created => 1,
            EventType::PatternFound => 2,
            EventType::PatternRemoved => 3,
            EventType::SizeChanged => 4,
            EventType::ContentChanged => 5,
            EventType::ContentModified => 6,
            EventType::FilesChanged => 7,
            EventType::SubdirsChanged => 8,
            EventType::DirSizeChanged => 9,
            EventType::Custom => 10,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_ascii_lowercase();
        EventType::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == label)
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARNING" | "WARN" => Ok(Severity::Warning),
            "CRITICAL" | "CRIT" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity '{s}'")),
        }
    }
}

/// Structured record produced when a rule's condition evaluates true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_uid: String,
    pub watch_group: String,
    pub rule_name: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub affected_paths: BTreeSet<String>,
    pub change_details: BTreeMap<String, FieldChanges>,
    pub sample_epoch: i64,
}

impl Event {
    /// Build an event and derive its uid from its content.
    #[must_use]
    pub fn new(
        watch_group: &str,
        rule_name: &str,
        event_type: EventType,
        severity: Severity,
        affected_paths: BTreeSet<String>,
        change_details: BTreeMap<String, FieldChanges>,
        sample_epoch: i64,
    ) -> Self {
        let event_uid = derive_event_uid(
            watch_group,
            rule_name,
            event_type,
            &affected_paths,
            &change_details,
            sample_epoch,
        );

        Self {
            event_uid,
            watch_group: watch_group.to_string(),
            rule_name: rule_name.to_string(),
            event_type,
            severity,
            affected_paths,
            change_details,
            sample_epoch,
        }
    }
}

const SEP: u8 = 0x1f;

/// SHA-256 over the event's identifying content. Re-evaluating the same rule
/// against the same epoch and state yields the same uid; any difference in
/// paths or change details yields a new one.
fn derive_event_uid(
    watch_group: &str,
    rule_name: &str,
    event_type: EventType,
    affected_paths: &BTreeSet<String>,
    change_details: &BTreeMap<String, FieldChanges>,
    sample_epoch: i64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(watch_group.as_bytes());
    hasher.update([SEP]);
    hasher.update(rule_name.as_bytes());
    hasher.update([SEP]);
    hasher.update(event_type.as_str().as_bytes());
    hasher.update([SEP]);
    hasher.update(sample_epoch.to_be_bytes());
    for path in affected_paths {
        hasher.update([SEP]);
        hasher.update(path.as_bytes());
    }
    for (path, changes) in change_details {
        hasher.update([SEP]);
        hasher.update(path.as_bytes());
        for (field, delta) in changes {
            hasher.update([SEP]);
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            hasher.update(delta.old.to_string().as_bytes());
            hasher.update(b">");
            hasher.update(delta.new.to_string().as_bytes());
        }
    }

    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}
