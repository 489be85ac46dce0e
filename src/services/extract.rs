//! Metric extraction for a single filesystem entity
//!
//! Content hashes and the pattern scan share one streaming pass over the
//! file, read in fixed-size chunks so large files are never held in memory.

use crate::config::PatternMode;
use crate::models::{
    Diagnostic, DiagnosticKind, DirectoryMetrics, EntityMetrics, FileMetrics, MetricRecord,
};
use crate::services::normalize_path;
use sha2::{Digest, Sha256};
use std::fs::{self, File, Metadata};
use std::io::{self, Read};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

const CHUNK_SIZE: usize = 64 * 1024;

/// Per-entity extraction failure. Never fatal to a cycle: the sampler turns
/// it into a skipped entry plus a diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("{path}: not found")]
    NotFound { path: String },
    #[error("{path}: vanished during scan")]
    Vanished { path: String },
    #[error("{path}: permission denied")]
    PermissionDenied { path: String },
    #[error("{path}: unreadable: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path}: unsupported file type")]
    Unsupported { path: String },
}

impl ExtractionError {
    /// Classify an I/O error raised before any content was read.
    #[must_use]
    pub fn from_io(path: &Path, error: io::Error) -> Self {
        let path = normalize_path(path);
        match error.kind() {
            io::ErrorKind::NotFound => ExtractionError::NotFound { path },
            io::ErrorKind::PermissionDenied => ExtractionError::PermissionDenied { path },
            _ => ExtractionError::Unreadable {
                path,
                source: error,
            },
        }
    }

    /// Classify an I/O error raised after metadata was already observed.
    fn from_content_io(path: &Path, error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::NotFound {
            ExtractionError::Vanished {
                path: normalize_path(path),
            }
        } else {
            Self::from_io(path, error)
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            ExtractionError::NotFound { path }
            | ExtractionError::Vanished { path }
            | ExtractionError::PermissionDenied { path }
            | ExtractionError::Unreadable { path, .. }
            | ExtractionError::Unsupported { path } => path,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ExtractionError::NotFound { .. } => "ENOENT",
            ExtractionError::Vanished { .. } => "VANISHED",
            ExtractionError::PermissionDenied { .. } => "EACCES",
            ExtractionError::Unreadable { .. } => "IO",
            ExtractionError::Unsupported { .. } => "UNSUPPORTED",
        }
    }

    #[must_use]
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(
            self.path(),
            DiagnosticKind::Extraction,
            self.code(),
            self.to_string(),
        )
    }
}

/// When content hashes are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashPolicy {
    Disabled,
    Always,
    /// Only files strictly smaller than the given byte count.
    BelowSize(u64),
}

impl HashPolicy {
    #[must_use]
    pub fn applies_to(&self, size: u64) -> bool {
        match self {
            HashPolicy::Disabled => false,
            HashPolicy::Always => true,
            HashPolicy::BelowSize(limit) => size < *limit,
        }
    }
}

/// Compiled content pattern.
#[derive(Debug, Clone)]
pub enum PatternMatcher {
    Substring(Vec<u8>),
    Regex(regex::bytes::Regex),
}

impl PatternMatcher {
    pub fn new(pattern: &str, mode: PatternMode) -> Result<Self, regex::Error> {
        match mode {
            PatternMode::Substring => Ok(PatternMatcher::Substring(pattern.as_bytes().to_vec())),
            PatternMode::Regex => regex::bytes::Regex::new(pattern).map(PatternMatcher::Regex),
        }
    }
}

/// Options shared by every extraction within one sampler run.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub hash: HashPolicy,
    pub pattern: Option<PatternMatcher>,
    /// Upper bound on bytes inspected by the pattern scan.
    pub max_pattern_scan: u64,
    pub follow_symlinks: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            hash: HashPolicy::Always,
            pattern: None,
            max_pattern_scan: 16 * 1024 * 1024,
            follow_symlinks: false,
        }
    }
}

/// Extract a metric record for `path`.
///
/// Directories come back with zeroed aggregates; the sampler fills those in
/// from its walk.
pub fn extract(path: &Path, options: &ExtractOptions) -> Result<MetricRecord, ExtractionError> {
    let metadata = if options.follow_symlinks {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    }
    .map_err(|e| ExtractionError::from_io(path, e))?;

    if metadata.is_file() {
        extract_file(path, &metadata, options)
    } else if metadata.is_dir() {
        Ok(directory_record(
            path,
            &metadata,
            DirectoryMetrics {
                file_count: 0,
                dir_count: 0,
                total_size: 0,
                children: None,
            },
        ))
    } else {
        Err(ExtractionError::Unsupported {
            path: normalize_path(path),
        })
    }
}

/// Extract a file record from metadata the caller already holds.
pub fn extract_file(
    path: &Path,
    metadata: &Metadata,
    options: &ExtractOptions,
) -> Result<MetricRecord, ExtractionError> {
    let size = metadata.len();
    let want_hash = options.hash.applies_to(size);

    let scan = if want_hash || options.pattern.is_some() {
        scan_content(path, want_hash, options.pattern.as_ref(), options.max_pattern_scan)
            .map_err(|e| ExtractionError::from_content_io(path, e))?
    } else {
        ContentScan::default()
    };

    let record = MetricRecord {
        path: normalize_path(path),
        last_modified: modified_secs(metadata),
        creation_time: changed_secs(metadata),
        owner_uid: owner_uid(metadata),
        owner_gid: owner_gid(metadata),
        mode: mode_bits(metadata),
        entity: EntityMetrics::File(FileMetrics {
            size,
            content_md5: scan.md5,
            content_sha256: scan.sha256,
            pattern_found: scan.pattern_found,
        }),
    };

    log::trace!(
        "File: {} -> size={size}, md5={:?}, pattern={:?}",
        record.path,
        record.as_file().and_then(|m| m.content_md5.as_deref()),
        record.as_file().and_then(|m| m.pattern_found)
    );

    Ok(record)
}

/// Assemble a directory record from its own metadata and walked aggregates.
#[must_use]
pub fn directory_record(path: &Path, metadata: &Metadata, metrics: DirectoryMetrics) -> MetricRecord {
    MetricRecord {
        path: normalize_path(path),
        last_modified: modified_secs(metadata),
        creation_time: changed_secs(metadata),
        owner_uid: owner_uid(metadata),
        owner_gid: owner_gid(metadata),
        mode: mode_bits(metadata),
        entity: EntityMetrics::Directory(metrics),
    }
}

#[derive(Debug, Default)]
struct ContentScan {
    md5: Option<String>,
    sha256: Option<String>,
    pattern_found: Option<bool>,
}

fn scan_content(
    path: &Path,
    want_hash: bool,
    pattern: Option<&PatternMatcher>,
    max_scan: u64,
) -> io::Result<ContentScan> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; CHUNK_SIZE];

    let mut md5_ctx = want_hash.then(md5::Context::new);
    let mut sha_ctx = want_hash.then(Sha256::new);
    let mut scanner = pattern.map(|p| PatternScanner::new(p, max_scan));

    loop {
        let read = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let chunk = &buf[..read];

        if let Some(ctx) = md5_ctx.as_mut() {
            ctx.consume(chunk);
        }
        if let Some(ctx) = sha_ctx.as_mut() {
            ctx.update(chunk);
        }
        if let Some(scanner) = scanner.as_mut() {
            scanner.feed(chunk);
        }

        let scan_pending = scanner.as_ref().is_some_and(|s| !s.is_done());
        if !want_hash && !scan_pending {
            break;
        }
    }

    Ok(ContentScan {
        md5: md5_ctx.map(|ctx| format!("{:x}", ctx.compute())),
        sha256: sha_ctx.map(|ctx| hex::encode(ctx.finalize())),
        pattern_found: scanner.map(PatternScanner::finish),
    })
}

/// Incremental pattern search bounded by a byte budget.
struct PatternScanner<'p> {
    matcher: &'p PatternMatcher,
    remaining: u64,
    found: bool,
    /// Substring mode: tail of the previous chunk, so matches spanning a
    /// chunk boundary are seen. Regex mode: everything read so far.
    buffer: Vec<u8>,
}

impl<'p> PatternScanner<'p> {
    fn new(matcher: &'p PatternMatcher, max_scan: u64) -> Self {
        let found = matches!(matcher, PatternMatcher::Substring(needle) if needle.is_empty());
        Self {
            matcher,
            remaining: max_scan,
            found,
            buffer: Vec::new(),
        }
    }

    fn is_done(&self) -> bool {
        self.found || self.remaining == 0
    }

    fn feed(&mut self, chunk: &[u8]) {
        if self.is_done() {
            return;
        }

        let take = usize::try_from(self.remaining).map_or(chunk.len(), |r| r.min(chunk.len()));
        let chunk = &chunk[..take];
        self.remaining -= take as u64;

        match self.matcher {
            PatternMatcher::Substring(needle) => {
                self.buffer.extend_from_slice(chunk);
                if self.buffer.windows(needle.len()).any(|w| w == needle.as_slice()) {
                    self.found = true;
                    self.buffer.clear();
                    return;
                }
                let keep = needle.len().saturating_sub(1).min(self.buffer.len());
                let start = self.buffer.len() - keep;
                self.buffer.drain(..start);
            }
            PatternMatcher::Regex(_) => {
                self.buffer.extend_from_slice(chunk);
            }
        }
    }

    fn finish(self) -> bool {
        if self.found {
            return true;
        }
        match self.matcher {
            PatternMatcher::Substring(_) => false,
            PatternMatcher::Regex(re) => re.is_match(&self.buffer),
        }
    }
}

fn system_time_secs(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

fn modified_secs(metadata: &Metadata) -> f64 {
    metadata.modified().map_or(0.0, system_time_secs)
}

#[cfg(unix)]
#[allow(clippy::cast_precision_loss)]
fn changed_secs(metadata: &Metadata) -> f64 {
    metadata.ctime() as f64 + metadata.ctime_nsec() as f64 / 1_000_000_000.0
}

#[cfg(not(unix))]
fn changed_secs(metadata: &Metadata) -> f64 {
    metadata.created().map_or(0.0, system_time_secs)
}

#[cfg(unix)]
fn owner_uid(metadata: &Metadata) -> u32 {
    metadata.uid()
}

#[cfg(not(unix))]
fn owner_uid(_metadata: &Metadata) -> u32 {
    0
}

#[cfg(unix)]
fn owner_gid(metadata: &Metadata) -> u32 {
    metadata.gid()
}

#[cfg(not(unix))]
fn owner_gid(_metadata: &Metadata) -> u32 {
    0
}

#[cfg(unix)]
fn mode_bits(metadata: &Metadata) -> u32 {
    metadata.mode()
}

#[cfg(not(unix))]
fn mode_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
