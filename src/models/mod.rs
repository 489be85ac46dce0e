//! Data models for metric records, samples, diffs, events and diagnostics

mod event;
mod record;
mod sample;

pub use event::{Event, EventType, Severity};
pub use record::{
    DirectoryMetrics, EntityKind, EntityMetrics, FieldValue, FileMetrics, MetricRecord,
    canonical_field_name,
};
pub use sample::{ChangeKind, ChildDelta, Diff, DiffEntry, FieldChanges, FieldDelta, Sample};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Extraction,
    Traversal,
    RuleCompile,
    RuleEvaluation,
    Persistence,
}

impl DiagnosticKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::Extraction => "extraction",
            DiagnosticKind::Traversal => "traversal",
            DiagnosticKind::RuleCompile => "rule_compile",
            DiagnosticKind::RuleEvaluation => "rule_evaluation",
            DiagnosticKind::Persistence => "persistence",
        }
    }
}

/// A non-fatal problem scoped to one path or one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Path or rule name the problem is about.
    pub subject: String,
    pub kind: DiagnosticKind,
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        subject: impl Into<String>,
        kind: DiagnosticKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            kind,
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}] {}: {}",
            self.kind.as_str(),
            self.code,
            self.subject,
            self.message
        )
    }
}
