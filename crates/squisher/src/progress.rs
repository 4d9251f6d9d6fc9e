//! Run progress module for Image Squisher
//!
//! Process-wide progress shared by the workers (writers) and the hang
//! watchdog (reader).

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// Progress of the current run.
#[derive(Debug, Clone)]
pub struct RunProgress {
    pub total_count: usize,
    pub completed_count: usize,
    /// Jobs currently inside a worker.
    pub active_count: usize,
    /// Last time a job completed, or the run start.
    pub last_progress: Instant,
    pub last_completed: Option<PathBuf>,
    pub finished: bool,
}

impl RunProgress {
    pub fn new(total_count: usize) -> Self {
        Self {
            total_count,
            completed_count: 0,
            active_count: 0,
            last_progress: Instant::now(),
            last_completed: None,
            finished: false,
        }
    }

    pub fn job_started(&mut self) {
        self.active_count += 1;
    }

    pub fn job_finished(&mut self, path: PathBuf) {
        self.active_count = self.active_count.saturating_sub(1);
        self.completed_count += 1;
        self.last_progress = Instant::now();
        self.last_completed = Some(path);
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Time since the last completion.
    pub fn stalled_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_progress)
    }
}

/// Shared progress state for concurrent access across workers
pub type SharedProgress = Arc<RwLock<RunProgress>>;

/// Creates a new SharedProgress for a run of `total_count` jobs
pub fn new_shared_progress(total_count: usize) -> SharedProgress {
    Arc::new(RwLock::new(RunProgress::new(total_count)))
}
