//! Scanner module for discovering image files under a folder.
//!
//! Produces the ordered candidate list the orchestrator dispatches, and
//! sweeps temp artifacts left behind by an interrupted run.

use crate::encode::TEMP_SUFFIX;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

/// Image file extensions recognised by the scanner (case-insensitive matching).
pub const IMAGE_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".jpe", ".jfif", ".tiff", ".tif", ".bmp", ".gif", ".webp", ".heic",
    ".heif", ".avif", ".jxl", ".jp2", ".ico", ".icns", ".tga", ".dds",
];

/// A candidate image discovered during scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCandidate {
    pub path: PathBuf,
    /// Lowercase extension with leading dot.
    pub extension: String,
}

/// Lowercase extension of `path` with a leading dot.
pub fn dotted_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
}

/// Checks if a file has an image extension (case-insensitive).
pub fn is_image_file(path: &Path) -> bool {
    dotted_extension(path)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Checks if a file is a temp artifact from a conversion.
pub fn is_temp_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(TEMP_SUFFIX))
        .unwrap_or(false)
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

fn walker(root: &Path, recursive: bool) -> impl Iterator<Item = DirEntry> {
    let mut walk = WalkDir::new(root);
    if !recursive {
        walk = walk.max_depth(1);
    }
    walk.into_iter()
        .filter_entry(|entry| !is_hidden_dir(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
}

/// Scans `root` for image files.
///
/// - Descends into subdirectories only when `recursive` is set
/// - Skips hidden directories (names starting with `.`)
/// - Filters by [`IMAGE_EXTENSIONS`], then drops `skip_extensions`
/// - Never returns temp artifacts
/// - Returns candidates sorted by path; this is the dispatch order
pub fn scan_folder(root: &Path, recursive: bool, skip_extensions: &[String]) -> Vec<ScanCandidate> {
    let mut candidates: Vec<ScanCandidate> = walker(root, recursive)
        .filter(|entry| !is_temp_artifact(entry.path()))
        .filter_map(|entry| {
            let extension = dotted_extension(entry.path())?;
            if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
                return None;
            }
            if skip_extensions.iter().any(|skip| skip.eq_ignore_ascii_case(&extension)) {
                return None;
            }
            Some(ScanCandidate {
                path: entry.into_path(),
                extension,
            })
        })
        .collect();

    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    candidates
}

/// Distinct extensions among `candidates`, for the pre-run report.
pub fn detect_formats(candidates: &[ScanCandidate]) -> BTreeSet<String> {
    candidates.iter().map(|c| c.extension.clone()).collect()
}

/// Deletes temp artifacts left under `root` by an earlier, interrupted run.
///
/// Returns the paths that were removed.
pub fn sweep_orphans(root: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for entry in walker(root, recursive).filter(|e| is_temp_artifact(e.path())) {
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                info!(path = %entry.path().display(), "removed leftover temp artifact");
                removed.push(entry.into_path());
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e, "could not remove temp artifact"),
        }
    }
    removed
}
