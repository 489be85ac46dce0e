//! Cycle orchestrator: sampler, then differ, then rule engine, once per
//! watch group per cycle.
//!
//! The previous sample is shared read-only between the differ and the rule
//! engine and is only replaced after the store accepted the new one, so a
//! failed cycle leaves it untouched.

use crate::config::WatchGroupConfig;
use crate::models::{ChangeKind, Diagnostic, DiagnosticKind, Event, Sample};
use crate::services::diff::diff;
use crate::services::rules::{RuleEngine, RuleInput, RuleOutcome};
use crate::services::sampler::Sampler;
use crate::services::sink::{CycleRecord, SampleStore};
use crate::{Error, Result};
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Shared cancellation flag, checked between watch items, directories and
/// cycles but never in the middle of hashing a file.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Source of the cycle epoch and the `now` rule binding.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
    }
}

/// Manually driven clock for reproducible cycles.
#[derive(Debug, Default)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    #[must_use]
    pub fn new(epoch: i64) -> Self {
        Self(AtomicI64::new(epoch))
    }

    pub fn set(&self, epoch: i64) {
        self.0.store(epoch, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receiver for per-path and per-rule problems.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, watch_group: &str, diagnostic: &Diagnostic);
}

/// Forwards diagnostics to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDiagnostics;

impl DiagnosticSink for LogDiagnostics {
    fn report(&self, watch_group: &str, diagnostic: &Diagnostic) {
        log::warn!("[{watch_group}] {diagnostic}");
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub watch_group: String,
    pub sample_epoch: i64,
    pub entry_count: usize,
    /// No previous sample existed, so every path was new.
    pub baseline: bool,
    pub created: usize,
    pub removed: usize,
    pub modified: usize,
    pub events: Vec<Event>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Owns one watch group's pipeline and its retained previous sample.
pub struct Monitor {
    config: WatchGroupConfig,
    sampler: Sampler,
    engine: RuleEngine,
    previous: Option<Arc<Sample>>,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("watch_group", &self.config.name)
            .field("rules", &self.engine.rules().len())
            .field("previous_epoch", &self.previous.as_ref().map(|s| s.epoch()))
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Validate the group and compile its rules. Configuration problems are
    /// fatal here; malformed rules are not and surface on every cycle.
    pub fn new(config: WatchGroupConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let sampler = Sampler::new(&config)?;
        let engine = RuleEngine::new(&config.rules);
        Ok(Self {
            config,
            sampler,
            engine,
            previous: None,
            clock,
            cancel: CancelToken::new(),
        })
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn config(&self) -> &WatchGroupConfig {
        &self.config
    }

    #[must_use]
    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    #[must_use]
    pub fn previous(&self) -> Option<&Sample> {
        self.previous.as_deref()
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Time to wait between cycles; never below the sample-rate floor.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.config.interval()
    }

    /// Rehydrate the previous sample from `store`. Returns whether one was found.
    pub fn restore(&mut self, store: &dyn SampleStore) -> Result<bool> {
        match store.load_last_sample(&self.config.name)? {
            Some(sample) => {
                log::info!(
                    "Restored {} with sample {} ({} entries)",
                    self.config.name,
                    sample.epoch(),
                    sample.len()
                );
                self.previous = Some(Arc::new(sample));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run one full cycle and hand the result to `store`.
    pub fn run_once(
        &mut self,
        store: &dyn SampleStore,
        sink: &dyn DiagnosticSink,
    ) -> Result<CycleReport> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let epoch = self.clock.now();
        let previous = self.previous.clone();
        log::info!("Starting cycle for {} at {epoch}", self.config.name);

        let outcome = self
            .sampler
            .sample(epoch, previous.as_deref(), &self.cancel)?;
        let sample = outcome.sample;
        let mut diagnostics = outcome.diagnostics;

        let changes = diff(previous.as_deref(), &sample);

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let baseline = previous.is_none();
        let rules = if baseline && !self.config.alert_on_baseline {
            log::debug!(
                "Baseline sample for {}; rules not evaluated",
                self.config.name
            );
            RuleOutcome {
                events: Vec::new(),
                diagnostics: self.engine.compile_diagnostics(),
            }
        } else {
            self.engine.evaluate_all(&RuleInput {
                watch_group: &self.config.name,
                sample: &sample,
                previous: previous.as_deref(),
                diff: &changes,
                now: epoch,
            })
        };
        diagnostics.extend(rules.diagnostics);
        let events = rules.events;

        for diagnostic in &diagnostics {
            sink.report(&self.config.name, diagnostic);
        }

        if let Err(err) = store.persist(&CycleRecord {
            sample: &sample,
            events: &events,
            diagnostics: &diagnostics,
            max_samples: self.config.max_samples,
        }) {
            sink.report(
                &self.config.name,
                &Diagnostic::new(
                    self.config.name.clone(),
                    DiagnosticKind::Persistence,
                    "PERSIST",
                    err.to_string(),
                ),
            );
            return Err(err);
        }

        let report = CycleReport {
            watch_group: self.config.name.clone(),
            sample_epoch: epoch,
            entry_count: sample.len(),
            baseline,
            created: changes.count(ChangeKind::Created),
            removed: changes.count(ChangeKind::Removed),
            modified: changes.count(ChangeKind::Modified),
            events,
            diagnostics,
        };
        log::info!(
            "Cycle for {} done: {} entries, {} events, {} diagnostics",
            report.watch_group,
            report.entry_count,
            report.events.len(),
            report.diagnostics.len()
        );

        self.previous = Some(Arc::new(sample));
        Ok(report)
    }
}

/// Run one cycle for every monitor concurrently. Results are in monitor order.
pub fn run_groups(
    monitors: &mut [Monitor],
    store: &dyn SampleStore,
    sink: &dyn DiagnosticSink,
) -> Vec<Result<CycleReport>> {
    monitors
        .par_iter_mut()
        .map(|monitor| monitor.run_once(store, sink))
        .collect()
}
