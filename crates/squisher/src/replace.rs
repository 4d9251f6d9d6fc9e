//! Replacer module for committing a winning candidate in place.
//!
//! Candidates live in temp artifacts next to their source. The winner is moved
//! to its final name in the same directory without ever replacing an existing
//! file, re-checked, and only then is the original removed. Every failure before the rename leaves the
//! source untouched and the temp artifact deleted.

use crate::format::ImageFormat;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while committing a candidate.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// The source changed size after it was measured.
    #[error("source changed during conversion (expected {expected} bytes, found {actual})")]
    SourceChanged { expected: u64, actual: u64 },

    /// Another file already occupies the final name.
    #[error("refusing to overwrite existing file {0}")]
    TargetExists(PathBuf),

    /// The rename itself failed; nothing was changed.
    #[error("failed to move candidate into place: {0}")]
    RenameFailed(io::Error),

    /// The committed file does not match the adopted candidate.
    #[error("post-commit check failed for {path}: expected {expected} bytes, found {actual}")]
    VerificationFailed {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// The original could not be removed; the commit was rolled back.
    #[error("failed to remove original, commit rolled back: {0}")]
    RemoveOriginalFailed(io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A candidate file owned by one race slot.
///
/// The file is deleted on drop unless it has been committed, so an early
/// return, a panic or a lost race never leaves it behind.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    format: ImageFormat,
    armed: bool,
}

impl TempArtifact {
    pub fn new(path: PathBuf, format: ImageFormat) -> Self {
        Self {
            path,
            format,
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Delete the artifact now. A missing file is not an error.
    pub fn discard(mut self) -> io::Result<()> {
        self.armed = false;
        remove_if_present(&self.path)
    }

}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = remove_if_present(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove temp artifact");
            }
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Name an adopted file takes: the source's stem with the format's extension.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use image_squisher::format::ImageFormat;
/// use image_squisher::replace::final_path_for;
///
/// let target = final_path_for(Path::new("/photos/beach.png"), ImageFormat::Jxl);
/// assert_eq!(target, Path::new("/photos/beach.jxl"));
/// ```
pub fn final_path_for(source: &Path, format: ImageFormat) -> PathBuf {
    source.with_extension(format.extension().trim_start_matches('.'))
}

/// Move `temp` to the unused name `target`.
///
/// The name is claimed with a hard link, which fails when `target` exists, so
/// two jobs sharing a stem can never both win it. Filesystems without hard
/// links get an exclusive empty placeholder instead, which the artifact is
/// then renamed over. `temp` is left for the caller to remove.
fn place_exclusive(temp: &Path, target: &Path) -> Result<(), ReplaceError> {
    let taken = || ReplaceError::TargetExists(target.to_path_buf());

    match fs::hard_link(temp, target) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(taken()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ReplaceError::RenameFailed(e))
        }
        Err(e) => debug!(error = %e, "hard link unavailable, reserving target name"),
    }

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => taken(),
            _ => ReplaceError::RenameFailed(e),
        })?;

    if let Err(e) = fs::rename(temp, target) {
        if let Err(cleanup) = fs::remove_file(target) {
            warn!(path = %target.display(), error = %cleanup, "failed to release reserved name");
        }
        return Err(ReplaceError::RenameFailed(e));
    }
    Ok(())
}

/// Commit `artifact` as the new representation of `source`.
///
/// Steps:
/// 1. Re-stat the source; refuse if its size moved away from `original_size`
/// 2. Place the artifact at its final name (same directory) without
///    replacing any existing file; a taken name is `TargetExists`
/// 3. Re-stat the committed file and compare with `expected_size`
/// 4. Remove the original, rolling the commit back if that fails
///
/// A failure in steps 1-2 leaves the source as it was and deletes the artifact.
/// A failure in step 3 leaves both files in place for inspection.
///
/// # Returns
///
/// The path of the committed file.
pub fn commit(
    source: &Path,
    original_size: u64,
    artifact: TempArtifact,
    expected_size: u64,
) -> Result<PathBuf, ReplaceError> {
    let target = final_path_for(source, artifact.format());
    let replaces_source = target == source;

    let actual = fs::metadata(source)?.len();
    if actual != original_size {
        return Err(ReplaceError::SourceChanged {
            expected: original_size,
            actual,
        });
    }

    if replaces_source {
        fs::rename(artifact.path(), &target).map_err(ReplaceError::RenameFailed)?;
    } else {
        place_exclusive(artifact.path(), &target)?;
    }
    debug!(from = %artifact.path().display(), to = %target.display(), "candidate committed");
    let temp = artifact.path().to_path_buf();
    if let Err(e) = artifact.discard() {
        warn!(path = %temp.display(), error = %e, "failed to remove committed temp name");
    }

    let committed = fs::metadata(&target)?.len();
    if committed != expected_size {
        return Err(ReplaceError::VerificationFailed {
            path: target,
            expected: expected_size,
            actual: committed,
        });
    }

    if !replaces_source {
        if let Err(e) = fs::remove_file(source) {
            if let Err(rollback) = fs::remove_file(&target) {
                warn!(path = %target.display(), error = %rollback, "rollback failed");
            }
            return Err(ReplaceError::RemoveOriginalFailed(e));
        }
    }

    Ok(target)
}

/// Delete every artifact, logging the ones that could not be removed.
pub fn discard_all<I>(artifacts: I)
where
    I: IntoIterator<Item = TempArtifact>,
{
    for artifact in artifacts {
        let path = artifact.path().to_path_buf();
        if let Err(e) = artifact.discard() {
            warn!(path = %path.display(), error = %e, "failed to discard candidate");
        }
    }
}
