//! Sampler: expands watch items, walks directories and assembles a Sample.
//!
//! The sampler is stateless per invocation. Traversal runs on the calling
//! thread; per-file extraction (hashing, pattern scans) runs on a dedicated
//! bounded `rayon` pool so hashing is throttled independently of the walk.

pub mod expand;
pub mod walk;

use crate::config::{ConfigError, WatchGroupConfig};
use crate::models::{Diagnostic, MetricRecord, Sample};
use crate::services::cycle::CancelToken;
use crate::services::extract::{self, ExtractOptions, ExtractionError, HashPolicy, PatternMatcher};
use crate::services::normalize_path;
use crate::{Error, Result};
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use walk::{PendingFile, WalkPolicy, walk_directory};

/// Sampling options derived from a watch-group configuration.
#[derive(Debug, Clone)]
pub struct SamplerOptions {
    pub extract: ExtractOptions,
    pub max_depth: u16,
    pub explode: bool,
    pub cross_filesystem: bool,
    pub scan_timeout: Duration,
    pub workers: usize,
}

impl SamplerOptions {
    pub fn from_config(group: &WatchGroupConfig) -> std::result::Result<Self, ConfigError> {
        let pattern = group
            .pattern
            .as_deref()
            .map(|p| PatternMatcher::new(p, group.pattern_mode))
            .transpose()
            .map_err(|e| ConfigError::InvalidPattern {
                group: group.name.clone(),
                message: e.to_string(),
            })?;

        let hash = match (group.hash_contents, group.max_hash_size) {
            (false, _) => HashPolicy::Disabled,
            (true, None) => HashPolicy::Always,
            (true, Some(limit)) => HashPolicy::BelowSize(limit),
        };

        Ok(Self {
            extract: ExtractOptions {
                hash,
                pattern,
                max_pattern_scan: group.max_pattern_scan,
                follow_symlinks: group.follow_symlinks,
            },
            max_depth: group.effective_max_depth(),
            explode: group.explode(),
            cross_filesystem: group.cross_filesystem,
            scan_timeout: group.scan_timeout(),
            workers: group.workers.max(1),
        })
    }
}

/// A sample plus the per-entity problems met while building it.
#[derive(Debug)]
pub struct SampleOutcome {
    pub sample: Sample,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Default)]
struct Accumulator {
    records: Vec<MetricRecord>,
    pending: Vec<PendingFile>,
    diagnostics: Vec<Diagnostic>,
}

/// Builds samples for one watch group.
pub struct Sampler {
    watch_group: String,
    watch_items: Vec<String>,
    options: SamplerOptions,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("watch_group", &self.watch_group)
            .field("watch_items", &self.watch_items)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Sampler {
    pub fn new(group: &WatchGroupConfig) -> Result<Self> {
        group.validate()?;
        let options = SamplerOptions::from_config(group)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .thread_name(|i| format!("eventwatch-extract-{i}"))
            .build()
            .map_err(|e| Error::InvalidInput(format!("cannot build extraction pool: {e}")))?;

        Ok(Self {
            watch_group: group.name.clone(),
            watch_items: group.watch_items.clone(),
            options,
            pool,
        })
    }

    #[must_use]
    pub fn options(&self) -> &SamplerOptions {
        &self.options
    }

    /// Override the per-item walk deadline taken from the configuration.
    #[must_use]
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.options.scan_timeout = timeout;
        self
    }

    /// Take one sample at `epoch`.
    ///
    /// `previous` is only consulted when a directory walk overruns its
    /// deadline: the previous records under that root are carried forward
    /// rather than reporting a partial tree. Cancellation is honoured between
    /// watch items, between directories and before each file extraction
    /// starts, and yields [`Error::Cancelled`].
    pub fn sample(
        &self,
        epoch: i64,
        previous: Option<&Sample>,
        cancel: &CancelToken,
    ) -> Result<SampleOutcome> {
        let mut acc = Accumulator::default();

        let roots = expand::expand_watch_items(&self.watch_items, &mut acc.diagnostics);
        log::debug!(
            "Watch group {} resolved {} roots",
            self.watch_group,
            roots.len()
        );

        for root in roots {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.sample_root(&root, previous, cancel, &mut acc)?;
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let Accumulator {
            mut records,
            pending,
            mut diagnostics,
        } = acc;

        let extract_opts = &self.options.extract;
        let extracted: Vec<Option<std::result::Result<MetricRecord, ExtractionError>>> =
            self.pool.install(|| {
                pending
                    .par_iter()
                    .map(|file| {
                        if cancel.is_cancelled() {
                            return None;
                        }
                        Some(extract::extract_file(&file.path, &file.metadata, extract_opts))
                    })
                    .collect()
            });

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        for result in extracted.into_iter().flatten() {
            match result {
                Ok(record) => records.push(record),
                Err(err) => {
                    log::warn!("Skipping entry: {err}");
                    diagnostics.push(err.to_diagnostic());
                }
            }
        }

        let sample = Sample::new(epoch, self.watch_group.clone(), records);
        log::info!(
            "Collected sample for {} with {} entries ({} diagnostics)",
            self.watch_group,
            sample.len(),
            diagnostics.len()
        );

        Ok(SampleOutcome {
            sample,
            diagnostics,
        })
    }

    fn sample_root(
        &self,
        root: &Path,
        previous: Option<&Sample>,
        cancel: &CancelToken,
        acc: &mut Accumulator,
    ) -> Result<()> {
        // Watch items are followed even when they are symlinks: the user named them.
        let metadata = match fs::metadata(root) {
            Ok(m) => m,
            Err(e) => {
                acc.diagnostics
                    .push(ExtractionError::from_io(root, e).to_diagnostic());
                return Ok(());
            }
        };

        if metadata.is_file() {
            acc.pending.push(PendingFile {
                path: root.to_path_buf(),
                metadata,
            });
            return Ok(());
        }

        if !metadata.is_dir() {
            acc.diagnostics.push(
                ExtractionError::Unsupported {
                    path: normalize_path(root),
                }
                .to_diagnostic(),
            );
            return Ok(());
        }

        let policy = WalkPolicy {
            max_depth: self.options.max_depth,
            explode: self.options.explode,
            follow_symlinks: self.options.extract.follow_symlinks,
            cross_filesystem: self.options.cross_filesystem,
            deadline: Instant::now().checked_add(self.options.scan_timeout),
        };

        let output = walk_directory(root, metadata, &policy, cancel)?;
        acc.diagnostics.extend(output.diagnostics);

        if output.timed_out
            && let Some(previous) = previous
        {
            let carried = carry_forward(previous, root);
            if !carried.is_empty() {
                log::warn!(
                    "Carrying forward {} previous records under {}",
                    carried.len(),
                    root.display()
                );
                acc.records.extend(carried);
                return Ok(());
            }
        }

        acc.records.extend(output.directories);
        acc.pending.extend(output.files);
        Ok(())
    }
}

/// Previous records at or beneath `root`.
fn carry_forward(previous: &Sample, root: &Path) -> Vec<MetricRecord> {
    let root = normalize_path(root);
    let prefix = format!("{}/", root.trim_end_matches('/'));
    previous
        .records()
        .filter(|r| r.path == root || r.path.starts_with(&prefix))
        .cloned()
        .collect()
}

/// One-shot convenience: build a sampler for `group` and take a sample.
pub fn sample(
    group: &WatchGroupConfig,
    previous: Option<&Sample>,
    epoch: i64,
) -> Result<SampleOutcome> {
    Sampler::new(group)?.sample(epoch, previous, &CancelToken::new())
}

impl From<walk::WalkCancelled> for Error {
    fn from(_: walk::WalkCancelled) -> Self {
        Error::Cancelled
    }
}
