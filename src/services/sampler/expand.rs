//! Watch-item expansion: literal paths pass through, glob patterns are
//! matched against the filesystem at sample time.

use crate::models::{Diagnostic, DiagnosticKind};
use crate::services::normalize_path;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Whether a watch item should be treated as a glob pattern.
#[must_use]
pub fn is_glob(item: &str) -> bool {
    item.contains(['*', '?', '['])
}

/// Resolve watch items into concrete, de-duplicated paths in item order.
///
/// An item naming an existing path is taken literally even when it contains
/// glob metacharacters. Missing literals, malformed patterns and patterns
/// matching nothing become diagnostics.
pub fn expand_watch_items(items: &[String], diagnostics: &mut Vec<Diagnostic>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::new();

    for item in items {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let path = Path::new(item);
        let missing = match fs::symlink_metadata(path) {
            Ok(_) => {
                if seen.insert(path.to_path_buf()) {
                    resolved.push(path.to_path_buf());
                }
                continue;
            }
            Err(err) => err,
        };

        if !is_glob(item) {
            log::warn!("Path does not exist: {item}");
            let code = if missing.kind() == std::io::ErrorKind::PermissionDenied {
                "EACCES"
            } else {
                "ENOENT"
            };
            diagnostics.push(Diagnostic::new(
                item,
                DiagnosticKind::Traversal,
                code,
                missing.to_string(),
            ));
            continue;
        }

        let paths = match glob::glob(item) {
            Ok(paths) => paths,
            Err(err) => {
                diagnostics.push(Diagnostic::new(
                    item,
                    DiagnosticKind::Traversal,
                    "GLOB",
                    format!("invalid glob pattern: {err}"),
                ));
                continue;
            }
        };

        let mut matched = 0usize;
        for entry in paths {
            match entry {
                Ok(path) => {
                    matched += 1;
                    if seen.insert(path.clone()) {
                        resolved.push(path);
                    }
                }
                Err(err) => {
                    diagnostics.push(Diagnostic::new(
                        normalize_path(err.path()),
                        DiagnosticKind::Traversal,
                        "GLOB",
                        err.error().to_string(),
                    ));
                }
            }
        }
        log::debug!("Glob pattern {item} matched {matched} paths");
        if matched == 0 {
            diagnostics.push(Diagnostic::new(
                item,
                DiagnosticKind::Traversal,
                "NOMATCH",
                "glob pattern matched no paths",
            ));
        }
    }

    resolved
}
