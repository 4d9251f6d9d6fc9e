//! Run aggregation module
//!
//! Collects one [`JobOutcome`] per processed source and reduces them into the
//! end-of-run [`RunSummary`].

use crate::format::ImageFormat;
use crate::race::CandidateSummary;
use crate::select::Decision;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Terminal record for one source image.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub source_path: PathBuf,
    /// Where the image lives after the job; equals `source_path` unless adopted.
    pub final_path: PathBuf,
    pub decision: Decision,
    pub original_size: u64,
    pub final_size: u64,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    pub error: Option<String>,
    pub candidates: Vec<CandidateSummary>,
}

impl JobOutcome {
    /// Outcome for a job that kept its original without error.
    pub fn kept(source_path: PathBuf, original_size: u64, duration: Duration) -> Self {
        Self {
            final_path: source_path.clone(),
            source_path,
            decision: Decision::KeepOriginal,
            original_size,
            final_size: original_size,
            duration,
            error: None,
            candidates: Vec::new(),
        }
    }

    /// Outcome for a job that failed; the original is reported as kept.
    pub fn failed(
        source_path: PathBuf,
        original_size: u64,
        duration: Duration,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::kept(source_path, original_size, duration)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn bytes_saved(&self) -> i64 {
        self.original_size as i64 - self.final_size as i64
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, self.decision) {
            (Some(error), _) => write!(f, "{}: error: {}", self.source_path.display(), error),
            (None, Decision::KeepOriginal) => write!(
                f,
                "{}: kept original ({})",
                self.source_path.display(),
                format_bytes(self.original_size)
            ),
            (None, Decision::Adopt(format)) => write!(
                f,
                "{}: {} -> {} {} ({:.1}% smaller)",
                self.source_path.display(),
                format_bytes(self.original_size),
                format.display_name(),
                format_bytes(self.final_size),
                crate::select::improvement_pct(self.original_size, self.final_size)
            ),
        }
    }
}

/// End-of-run statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Jobs handed to the run.
    pub total_jobs: usize,
    pub processed: usize,
    /// Jobs never dispatched because the run was stopped.
    pub not_started: usize,
    pub succeeded: usize,
    pub errors: usize,
    pub kept_original: usize,
    pub adopted: BTreeMap<ImageFormat, usize>,
    pub original_bytes: u64,
    pub final_bytes: u64,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub stall_alerts: u32,
    pub outcomes: Vec<JobOutcome>,
}

impl RunSummary {
    pub fn bytes_saved(&self) -> i64 {
        self.original_bytes as i64 - self.final_bytes as i64
    }

    pub fn adopted_total(&self) -> usize {
        self.adopted.values().sum()
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Processed {} of {} images", self.processed, self.total_jobs)?;
        if self.not_started > 0 {
            writeln!(f, "  not started:   {}", self.not_started)?;
        }
        writeln!(f, "  kept original: {}", self.kept_original)?;
        for format in ImageFormat::ALL {
            let count = self.adopted.get(&format).copied().unwrap_or(0);
            writeln!(f, "  to {:<11} {}", format!("{}:", format.display_name()), count)?;
        }
        writeln!(f, "  errors:        {}", self.errors)?;

        let saved = self.bytes_saved();
        let pct = crate::select::improvement_pct(self.original_bytes, self.final_bytes);
        writeln!(
            f,
            "Size: {} -> {} ({}{} saved, {:.1}%)",
            format_bytes(self.original_bytes),
            format_bytes(self.final_bytes),
            if saved < 0 { "-" } else { "" },
            format_bytes(saved.unsigned_abs()),
            pct
        )?;
        write!(f, "Elapsed: {:.1}s", self.elapsed.as_secs_f64())?;
        if self.stall_alerts > 0 {
            write!(f, " ({} stall alerts)", self.stall_alerts)?;
        }
        Ok(())
    }
}

/// Human readable size with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Thread-safe append-only store of job outcomes.
#[derive(Debug, Default)]
pub struct RunAggregator {
    outcomes: Mutex<Vec<JobOutcome>>,
}

impl RunAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, outcome: JobOutcome) {
        self.outcomes.lock().await.push(outcome);
    }

    pub async fn len(&self) -> usize {
        self.outcomes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.outcomes.lock().await.is_empty()
    }

    /// Reduce everything recorded so far.
    pub async fn summarize(&self, total_jobs: usize, elapsed: Duration, stall_alerts: u32) -> RunSummary {
        let outcomes = self.outcomes.lock().await.clone();
        summarize(outcomes, total_jobs, elapsed, stall_alerts)
    }
}

/// Pure reduction of outcomes into a summary.
pub fn summarize(
    outcomes: Vec<JobOutcome>,
    total_jobs: usize,
    elapsed: Duration,
    stall_alerts: u32,
) -> RunSummary {
    let mut adopted: BTreeMap<ImageFormat, usize> = BTreeMap::new();
    let mut kept_original = 0;
    let mut errors = 0;
    let mut original_bytes = 0u64;
    let mut final_bytes = 0u64;

    for outcome in &outcomes {
        if !outcome.is_success() {
            errors += 1;
        }
        match outcome.decision {
            Decision::KeepOriginal => kept_original += 1,
            Decision::Adopt(format) => *adopted.entry(format).or_insert(0) += 1,
        }
        original_bytes += outcome.original_size;
        final_bytes += outcome.final_size;
    }

    let processed = outcomes.len();
    RunSummary {
        total_jobs,
        processed,
        not_started: total_jobs.saturating_sub(processed),
        succeeded: processed - errors,
        errors,
        kept_original,
        adopted,
        original_bytes,
        final_bytes,
        elapsed,
        stall_alerts,
        outcomes,
    }
}
