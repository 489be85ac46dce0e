//! Per-entity metric records captured by the sampler

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Scalar value of a single metric field.
///
/// `Absent` stands in for metrics that were not computed (hashes above the
/// size ceiling, pattern flags without a configured pattern, directory-only
/// counters on files). It serializes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    #[default]
    Absent,
}

impl FieldValue {
    /// Numeric view used for signed deltas and reducers.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(true) => f.write_str("True"),
            FieldValue::Bool(false) => f.write_str("False"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(v) => f.write_str(v),
            FieldValue::Absent => f.write_str("None"),
        }
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Absent, Into::into)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// Discriminant for the two entity kinds a record can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    File,
    Directory,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::File => "file",
            EntityKind::Directory => "directory",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics only files carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetrics {
    pub size: u64,
    #[serde(default)]
    pub content_md5: Option<String>,
    #[serde(default)]
    pub content_sha256: Option<String>,
    #[serde(default)]
    pub pattern_found: Option<bool>,
}

/// Aggregate metrics for a directory subtree, bounded by the walk depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryMetrics {
    pub file_count: u64,
    pub dir_count: u64,
    pub total_size: u64,
    /// Immediate child paths. Only populated for aggregated directories;
    /// exploded directories expose their children as sample entries.
    #[serde(default)]
    pub children: Option<BTreeSet<String>>,
}

/// Kind-specific half of a [`MetricRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityMetrics {
    File(FileMetrics),
    Directory(DirectoryMetrics),
}

const FILE_DIFF_FIELDS: &[&str] = &[
    "type",
    "size",
    "last_modified",
    "creation_time",
    "owner_uid",
    "owner_gid",
    "mode",
    "content_md5",
    "content_sha256",
    "pattern_found",
];

const DIRECTORY_DIFF_FIELDS: &[&str] = &[
    "type",
    "file_count",
    "dir_count",
    "total_size",
    "last_modified",
    "creation_time",
    "owner_uid",
    "owner_gid",
    "mode",
];

/// One filesystem entity's observed state at a sample epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub path: String,
    /// Seconds since the Unix epoch.
    pub last_modified: f64,
    /// Seconds since the Unix epoch (inode change time on Unix).
    pub creation_time: f64,
    pub owner_uid: u32,
    pub owner_gid: u32,
    pub mode: u32,
    #[serde(flatten)]
    pub entity: EntityMetrics,
}

impl MetricRecord {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self.entity {
            EntityMetrics::File(_) => EntityKind::File,
            EntityMetrics::Directory(_) => EntityKind::Directory,
        }
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind() == EntityKind::Directory
    }

    #[must_use]
    pub fn as_file(&self) -> Option<&FileMetrics> {
        match &self.entity {
            EntityMetrics::File(m) => Some(m),
            EntityMetrics::Directory(_) => None,
        }
    }

    #[must_use]
    pub fn as_directory(&self) -> Option<&DirectoryMetrics> {
        match &self.entity {
            EntityMetrics::Directory(m) => Some(m),
            EntityMetrics::File(_) => None,
        }
    }

    /// Content length for files, aggregate subtree size for directories.
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.entity {
            EntityMetrics::File(m) => m.size,
            EntityMetrics::Directory(m) => m.total_size,
        }
    }

    /// Fields compared by the differ for this record's kind.
    #[must_use]
    pub fn diff_fields(&self) -> &'static [&'static str] {
        match self.entity {
            EntityMetrics::File(_) => FILE_DIFF_FIELDS,
            EntityMetrics::Directory(_) => DIRECTORY_DIFF_FIELDS,
        }
    }

    /// Look up a metric by name. Unknown names and metrics that do not apply
    /// to this entity kind resolve to [`FieldValue::Absent`].
    #[must_use]
    pub fn field(&self, name: &str) -> FieldValue {
        match canonical_field_name(name) {
            "path" => self.path.as_str().into(),
            "type" => self.kind().as_str().into(),
            "is_dir" => self.is_dir().into(),
            "size" => self.size().into(),
            "last_modified" => self.last_modified.into(),
            "creation_time" => self.creation_time.into(),
            "owner_uid" => self.owner_uid.into(),
            "owner_gid" => self.owner_gid.into(),
            "mode" => self.mode.into(),
            "content_md5" => self
                .as_file()
                .and_then(|m| m.content_md5.clone())
                .into(),
            "content_sha256" => self
                .as_file()
                .and_then(|m| m.content_sha256.clone())
                .into(),
            "pattern_found" => self.as_file().and_then(|m| m.pattern_found).into(),
            "file_count" => self.as_directory().map(|m| m.file_count).into(),
            "dir_count" => self.as_directory().map(|m| m.dir_count).into(),
            "total_size" => self.as_directory().map(|m| m.total_size).into(),
            _ => FieldValue::Absent,
        }
    }
}

/// Resolve historical metric names to their canonical spelling.
#[must_use]
pub fn canonical_field_name(name: &str) -> &str {
    match name {
        "user_id" | "uid" => "owner_uid",
        "group_id" | "gid" => "owner_gid",
        "md5" => "content_md5",
        "sha256" => "content_sha256",
        "files_count" => "file_count",
        "subdirs_count" => "dir_count",
        "mtime" => "last_modified",
        "ctime" => "creation_time",
        other => other,
    }
}
