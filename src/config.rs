//! Watch-group configuration and its load-time validation
//!
//! Configuration problems are fatal: a group that fails validation never
//! starts a cycle. Everything else (unreadable paths, bad rules) is handled
//! per entity once cycles run.

use crate::models::{EventType, Severity};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Lowest accepted `sample_rate`, in seconds.
pub const MIN_SAMPLE_RATE: u64 = 60;

const DEFAULT_MAX_DEPTH: u16 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("watch group name must not be empty")]
    EmptyName,
    #[error("watch group '{group}' has no watch_items")]
    EmptyWatchItems { group: String },
    #[error("watch group '{group}' sample_rate {sample_rate} is below the {floor}s floor")]
    SampleRateBelowFloor {
        group: String,
        sample_rate: u64,
        floor: u64,
    },
    #[error("watch group '{group}' max_samples must be at least 1")]
    ZeroMaxSamples { group: String },
    #[error("watch group '{group}' has an invalid content pattern: {message}")]
    InvalidPattern { group: String, message: String },
    #[error("watch group '{group}' has a rule without a name")]
    EmptyRuleName { group: String },
    #[error("watch group '{group}' is defined more than once")]
    DuplicateGroup { group: String },
}

/// How `pattern` is matched against file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    #[default]
    Substring,
    Regex,
}

/// Whether a rule is evaluated once per changed entity or once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    /// Entity scope when the condition references per-entity bindings.
    #[default]
    Auto,
    Entity,
    Group,
}

/// A named condition plus the metadata stamped on the events it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub condition: String,
    #[serde(default, deserialize_with = "severity_from_str")]
    pub severity: Severity,
    #[serde(default, deserialize_with = "event_type_from_str")]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub scope: RuleScope,
}

impl Rule {
    pub fn new(name: impl Into<String>, condition: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.into(),
            condition: condition.into(),
            severity,
            event_type: None,
            scope: RuleScope::Auto,
        }
    }

    #[must_use]
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: RuleScope) -> Self {
        self.scope = scope;
        self
    }
}

fn severity_from_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Severity, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Severity::from_str(&raw).map_err(serde::de::Error::custom)
}

fn event_type_from_str<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<EventType>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| EventType::from_str(&s).map_err(serde::de::Error::custom))
        .transpose()
}

fn default_sample_rate() -> u64 {
    MIN_SAMPLE_RATE
}

fn default_max_samples() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_pattern_scan() -> u64 {
    16 * 1024 * 1024
}

fn default_scan_timeout_secs() -> u64 {
    30
}

fn default_workers() -> usize {
    4
}

/// A named set of watch items sharing one sampling configuration and rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchGroupConfig {
    pub name: String,
    pub watch_items: Vec<String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u64,
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    #[serde(default)]
    pub max_depth: Option<u16>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub pattern_mode: PatternMode,
    #[serde(default)]
    pub explode_directories: Option<bool>,
    #[serde(default = "default_true")]
    pub hash_contents: bool,
    /// Files larger than this are sampled without content hashes.
    #[serde(default)]
    pub max_hash_size: Option<u64>,
    #[serde(default = "default_max_pattern_scan")]
    pub max_pattern_scan: u64,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub cross_filesystem: bool,
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Evaluate rules on the first cycle, when every path is new.
    #[serde(default)]
    pub alert_on_baseline: bool,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl WatchGroupConfig {
    /// A group with defaults for everything but its name and items.
    pub fn new(name: impl Into<String>, watch_items: Vec<String>) -> Self {
        Self {
            name: name.into(),
            watch_items,
            sample_rate: default_sample_rate(),
            max_samples: default_max_samples(),
            max_depth: None,
            pattern: None,
            pattern_mode: PatternMode::default(),
            explode_directories: None,
            hash_contents: true,
            max_hash_size: None,
            max_pattern_scan: default_max_pattern_scan(),
            follow_symlinks: false,
            cross_filesystem: false,
            scan_timeout_secs: default_scan_timeout_secs(),
            workers: default_workers(),
            alert_on_baseline: false,
            rules: Vec::new(),
        }
    }

    /// Check the group-wide constraints that must hold before sampling.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }

        if self.watch_items.iter().all(|item| item.trim().is_empty()) {
            return Err(ConfigError::EmptyWatchItems {
                group: self.name.clone(),
            });
        }

        if self.sample_rate < MIN_SAMPLE_RATE {
            return Err(ConfigError::SampleRateBelowFloor {
                group: self.name.clone(),
                sample_rate: self.sample_rate,
                floor: MIN_SAMPLE_RATE,
            });
        }

        if self.max_samples == 0 {
            return Err(ConfigError::ZeroMaxSamples {
                group: self.name.clone(),
            });
        }

        if let (Some(pattern), PatternMode::Regex) = (&self.pattern, self.pattern_mode)
            && let Err(e) = regex::bytes::Regex::new(pattern)
        {
            return Err(ConfigError::InvalidPattern {
                group: self.name.clone(),
                message: e.to_string(),
            });
        }

        if self.rules.iter().any(|rule| rule.name.trim().is_empty()) {
            return Err(ConfigError::EmptyRuleName {
                group: self.name.clone(),
            });
        }

        Ok(())
    }

    /// Depth limit for directory walks; groups without one walk a single level.
    #[must_use]
    pub fn effective_max_depth(&self) -> u16 {
        self.max_depth.unwrap_or(DEFAULT_MAX_DEPTH)
    }

    #[must_use]
    pub fn explode(&self) -> bool {
        self.explode_directories.unwrap_or(false)
    }

    #[must_use]
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs.max(1))
    }

    /// Time between cycles, never below the sample-rate floor.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sample_rate.max(MIN_SAMPLE_RATE))
    }
}

#[derive(Debug, Deserialize)]
struct WatchGroupsDocument {
    #[serde(default)]
    watch_groups: Vec<WatchGroupConfig>,
}

/// Parse a `{"watch_groups": [...]}` JSON document and validate every group.
pub fn parse_watch_groups(source: &str, origin: &Path) -> Result<Vec<WatchGroupConfig>, ConfigError> {
    let document: WatchGroupsDocument =
        serde_json::from_str(source).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;

    for group in &document.watch_groups {
        group.validate()?;
    }

    Ok(document.watch_groups)
}

/// Load watch groups from a JSON file, or from every `*.json` file in a
/// directory (aggregated in file-name order).
pub fn load_watch_groups<P: AsRef<Path>>(path: P) -> Result<Vec<WatchGroupConfig>, ConfigError> {
    let path = path.as_ref();
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let files = if path.is_dir() {
        let mut files: Vec<PathBuf> = fs::read_dir(path)
            .map_err(io_err)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut groups = Vec::new();
    let mut seen = HashSet::new();
    for file in files {
        let source = fs::read_to_string(&file).map_err(|source| ConfigError::Io {
            path: file.clone(),
            source,
        })?;
        for group in parse_watch_groups(&source, &file)? {
            if !seen.insert(group.name.clone()) {
                return Err(ConfigError::DuplicateGroup { group: group.name });
            }
            log::debug!("Loaded watch group '{}' from {}", group.name, file.display());
            groups.push(group);
        }
    }

    Ok(groups)
}
