//! Filesystem Monitoring Library
//!
//! This library samples a configured set of files and directories into
//! metric snapshots, diffs consecutive snapshots, and evaluates user-authored
//! rules written in a small closed expression language to produce
//! severity-tagged events. Snapshot persistence is provided through
//! pluggable stores, including a Parquet-backed one.

pub mod cli;
pub mod config;
pub mod io;
pub mod models;
pub mod services;

pub use config::{ConfigError, PatternMode, Rule, RuleScope, WatchGroupConfig};
pub use models::{
    ChangeKind, Diagnostic, DiagnosticKind, Diff, DiffEntry, Event, EventType, FieldValue,
    MetricRecord, Sample, Severity,
};
pub use services::cycle::{
    CancelToken, Clock, CycleReport, DiagnosticSink, FixedClock, LogDiagnostics, Monitor,
    SystemClock, run_groups,
};
pub use services::diff::diff;
pub use services::rules::RuleEngine;
pub use services::sampler::Sampler;
pub use services::sink::memory::MemoryStore;
pub use services::sink::parquet::ParquetStore;
pub use services::sink::{CycleRecord, SampleStore};

use std::result;

/// Custom error type for the library
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("Cycle cancelled")]
    Cancelled,
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = result::Result<T, Error>;
