//! General utility functions for undbc
//!
//! Helpers shared by the CLI: size formatting, name filters, and locating
//! client database files on disk.

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use std::fs;
use std::path::{Path, PathBuf};

/// Format a byte count in human-readable form (B, KB, MB, GB).
pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", size)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// Create a glob matcher from a pattern string.
///
/// Handles common patterns:
/// - `*.ext` becomes `**/*.ext` (match in any directory)
/// - Plain text without wildcards becomes `**/*text*` (substring search)
pub fn create_glob_matcher(pattern: &str) -> Result<GlobMatcher> {
    let pattern = if pattern.starts_with("*.") {
        format!("**/{}", pattern)
    } else if !pattern.contains('*') && !pattern.contains('?') {
        format!("**/*{}*", pattern)
    } else {
        pattern.to_string()
    };

    let glob = Glob::new(&pattern).with_context(|| format!("Invalid pattern: {}", pattern))?;
    Ok(glob.compile_matcher())
}

/// Check if a name matches the optional filter.
pub fn matches_filter(name: &str, matcher: Option<&GlobMatcher>) -> bool {
    match matcher {
        Some(m) => m.is_match(name),
        None => true,
    }
}

/// Recursively collect client database files (`.dbc`/`.db2`) under a
/// directory, sorted by path.
pub fn collect_db_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk_db_files(dir, &mut files)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;
    files.sort();
    Ok(files)
}

fn walk_db_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_db_files(&path, files)?;
        } else if is_db_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn is_db_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("dbc") || e.eq_ignore_ascii_case("db2"))
        .unwrap_or(false)
}
