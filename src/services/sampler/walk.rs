//! Depth-bounded directory walk driven by an explicit work stack.
//!
//! Depth 0 is the watch-item root. A directory at depth `max_depth` is still
//! recorded and counted by its parent, but its contents are never read.

use crate::models::{Diagnostic, DiagnosticKind, DirectoryMetrics, MetricRecord};
use crate::services::cycle::CancelToken;
use crate::services::extract::directory_record;
use crate::services::normalize_path;
use std::collections::BTreeSet;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// Walk policy for one watch item.
#[derive(Debug, Clone, Copy)]
pub struct WalkPolicy {
    pub max_depth: u16,
    pub explode: bool,
    pub follow_symlinks: bool,
    pub cross_filesystem: bool,
    /// No deadline when the scan timeout does not fit in an `Instant`.
    pub deadline: Option<Instant>,
}

/// A file discovered by the walk, waiting for content extraction.
#[derive(Debug)]
pub struct PendingFile {
    pub path: PathBuf,
    pub metadata: Metadata,
}

/// Result of walking one directory root.
#[derive(Debug, Default)]
pub struct WalkOutput {
    pub directories: Vec<MetricRecord>,
    /// Files to extract individually (exploded mode only).
    pub files: Vec<PendingFile>,
    pub diagnostics: Vec<Diagnostic>,
    pub timed_out: bool,
}

/// Walk stopped because the cycle was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkCancelled;

struct DirNode {
    path: PathBuf,
    metadata: Metadata,
    depth: u16,
    parent: Option<usize>,
    file_count: u64,
    dir_count: u64,
    total_size: u64,
    children: BTreeSet<String>,
}

impl DirNode {
    fn new(path: PathBuf, metadata: Metadata, depth: u16, parent: Option<usize>) -> Self {
        Self {
            path,
            metadata,
            depth,
            parent,
            file_count: 0,
            dir_count: 0,
            total_size: 0,
            children: BTreeSet::new(),
        }
    }
}

#[cfg(unix)]
fn device_id(metadata: &Metadata) -> u64 {
    metadata.dev()
}

#[cfg(not(unix))]
fn device_id(_metadata: &Metadata) -> u64 {
    0
}

/// Per-subtree walk failure. Depth stops are policy, not errors.
#[derive(Debug, thiserror::Error)]
pub enum TraversalError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("directory walk under {path} exceeded the scan timeout")]
    Timeout { path: String },
}

impl TraversalError {
    fn read(path: &Path, source: std::io::Error) -> Self {
        TraversalError::Read {
            path: normalize_path(path),
            source,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            TraversalError::Read { source, .. } => match source.kind() {
                std::io::ErrorKind::NotFound => "ENOENT",
                std::io::ErrorKind::PermissionDenied => "EACCES",
                _ => "IO",
            },
            TraversalError::Timeout { .. } => "TIMEOUT",
        }
    }

    #[must_use]
    pub fn to_diagnostic(&self) -> Diagnostic {
        let path = match self {
            TraversalError::Read { path, .. } | TraversalError::Timeout { path } => path,
        };
        Diagnostic::new(
            path.clone(),
            DiagnosticKind::Traversal,
            self.code(),
            self.to_string(),
        )
    }
}

/// Walk `root` and produce its aggregate record, plus per-entry records and
/// pending files when exploding.
#[allow(clippy::too_many_lines)]
pub fn walk_directory(
    root: &Path,
    root_metadata: Metadata,
    policy: &WalkPolicy,
    cancel: &CancelToken,
) -> Result<WalkOutput, WalkCancelled> {
    let mut output = WalkOutput::default();
    let root_device = device_id(&root_metadata);

    let mut nodes = vec![DirNode::new(root.to_path_buf(), root_metadata, 0, None)];
    let mut stack = vec![0usize];

    while let Some(idx) = stack.pop() {
        if cancel.is_cancelled() {
            return Err(WalkCancelled);
        }

        if policy.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::warn!("Directory walk timed out under {}", root.display());
            output.timed_out = true;
            output.diagnostics.push(
                TraversalError::Timeout {
                    path: normalize_path(root),
                }
                .to_diagnostic(),
            );
            break;
        }

        let depth = nodes[idx].depth;
        if depth >= policy.max_depth {
            continue;
        }

        let read_dir = match fs::read_dir(&nodes[idx].path) {
            Ok(rd) => rd,
            Err(e) => {
                output
                    .diagnostics
                    .push(TraversalError::read(&nodes[idx].path, e).to_diagnostic());
                continue;
            }
        };

        for entry in read_dir {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    output
                        .diagnostics
                        .push(TraversalError::read(&nodes[idx].path, e).to_diagnostic());
                    continue;
                }
            };

            let child_path = entry.path();
            let mut metadata = match fs::symlink_metadata(&child_path) {
                Ok(m) => m,
                Err(e) => {
                    output
                        .diagnostics
                        .push(TraversalError::read(&child_path, e).to_diagnostic());
                    continue;
                }
            };

            if metadata.is_symlink() {
                if !policy.follow_symlinks {
                    log::trace!("Skipping symlink {}", child_path.display());
                    continue;
                }
                metadata = match fs::metadata(&child_path) {
                    Ok(m) => m,
                    Err(e) => {
                        output
                            .diagnostics
                            .push(TraversalError::read(&child_path, e).to_diagnostic());
                        continue;
                    }
                };
            }

            if !policy.cross_filesystem && device_id(&metadata) != root_device {
                log::debug!("Not crossing filesystem boundary at {}", child_path.display());
                continue;
            }

            if !policy.explode {
                nodes[idx].children.insert(normalize_path(&child_path));
            }

            if metadata.is_file() {
                let node = &mut nodes[idx];
                node.file_count += 1;
                node.total_size = node.total_size.saturating_add(metadata.len());
                if policy.explode {
                    output.files.push(PendingFile {
                        path: child_path,
                        metadata,
                    });
                }
            } else if metadata.is_dir() {
                nodes[idx].dir_count += 1;
                nodes.push(DirNode::new(child_path, metadata, depth + 1, Some(idx)));
                stack.push(nodes.len() - 1);
            }
        }
    }

    // Children always sit after their parent, so a reverse pass folds every
    // subtree into its ancestors.
    for idx in (1..nodes.len()).rev() {
        let (file_count, dir_count, total_size) = {
            let node = &nodes[idx];
            (node.file_count, node.dir_count, node.total_size)
        };
        if let Some(parent) = nodes[idx].parent {
            let parent = &mut nodes[parent];
            parent.file_count += file_count;
            parent.dir_count += dir_count;
            parent.total_size = parent.total_size.saturating_add(total_size);
        }
    }

    let emit = if policy.explode { nodes.len() } else { 1 };
    for node in nodes.into_iter().take(emit) {
        log::debug!(
            "Dir: {} -> files={}, subdirs={}, size={}, depth={}",
            node.path.display(),
            node.file_count,
            node.dir_count,
            node.total_size,
            node.depth
        );
        let children = (!policy.explode).then_some(node.children);
        output.directories.push(directory_record(
            &node.path,
            &node.metadata,
            DirectoryMetrics {
                file_count: node.file_count,
                dir_count: node.dir_count,
                total_size: node.total_size,
                children,
            },
        ));
    }

    Ok(output)
}
