//! Core services: extraction, sampling, diffing, rule evaluation and the
//! cycle orchestrator that sequences them

pub mod cycle;
pub mod diff;
pub mod extract;
pub mod rules;
pub mod sampler;
pub mod sink;

use std::path::Path;

/// Normalize path for cross-platform storage
/// On Windows: Convert backslashes to forward slashes for consistency
/// On Unix: Use path as-is (backslash is a valid filename character)
#[cfg(windows)]
#[must_use]
pub fn normalize_path(path: &Path) -> String {
    let path_str = path.to_string_lossy();

    if path_str.contains('\\') {
        path_str.replace('\\', "/")
    } else {
        path_str.into_owned()
    }
}

#[cfg(not(windows))]
#[must_use]
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
