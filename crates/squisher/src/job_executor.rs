//! Job executor module for Image Squisher
//!
//! Runs the per-image pipeline: measure, race both formats, select the winner,
//! commit or discard. Conversions across all jobs share one semaphore.

use crate::aggregate::JobOutcome;
use crate::concurrency::ConcurrencyPlan;
use crate::config::Config;
use crate::format::ImageFormat;
use crate::predict::{FormatPredictor, ImageFeatures};
use crate::race::{ComparisonRecord, DualFormatRace, EncoderSlot};
use crate::replace::{commit, ReplaceError};
use crate::select::{select_winner, Decision, SelectionPolicy};
use crate::verify::{inspect_source, SourceInfo};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Error type for job execution operations
#[derive(Debug, Error)]
pub enum JobError {
    /// The source could not be measured
    #[error("cannot read source: {0}")]
    Source(std::io::Error),

    /// The source is not a regular file
    #[error("source is not a regular file")]
    NotAFile,

    /// Committing the winner failed; the original is kept
    #[error("replacement failed: {0}")]
    Replacement(#[from] ReplaceError),

    /// The selected candidate has no artifact to commit
    #[error("no artifact for adopted {0} candidate")]
    MissingArtifact(ImageFormat),

    /// A task running part of the job did not finish
    #[error("job aborted: {0}")]
    Aborted(String),
}

/// One image's work order. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionJob {
    pub source_path: PathBuf,
    /// Read once, before anything is written.
    pub original_size: u64,
    pub target_formats: Vec<ImageFormat>,
    /// Budget for each candidate.
    pub conversion_timeout: Duration,
    pub min_improvement_pct: f64,
}

impl ConversionJob {
    /// `base` with this job's improvement threshold.
    pub fn policy(&self, base: &SelectionPolicy) -> SelectionPolicy {
        SelectionPolicy {
            min_improvement_pct: self.min_improvement_pct,
            ..base.clone()
        }
    }
}

/// Configuration for the job executor pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct JobExecutorConfig {
    pub conversion_timeout: Duration,
    pub max_animated_frames: u32,
    pub policy: SelectionPolicy,
}

impl JobExecutorConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            conversion_timeout: cfg.conversion_timeout(),
            max_animated_frames: cfg.processing.max_animated_frames,
            policy: SelectionPolicy::from_config(cfg),
        }
    }
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Whether `path` already carries a target format's extension.
pub fn is_target_format(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(ImageFormat::from_extension)
        .is_some()
}

/// Job executor running the image pipeline with a bounded conversion pool
pub struct JobExecutor {
    /// Shared by every candidate launch across all jobs
    semaphore: Arc<Semaphore>,
    concurrency_plan: ConcurrencyPlan,
    race: DualFormatRace,
    config: JobExecutorConfig,
    predictor: Option<Arc<dyn FormatPredictor>>,
}

impl JobExecutor {
    /// Create a new JobExecutor
    ///
    /// # Arguments
    /// * `plan` - Concurrency plan; its conversion bound sizes the semaphore
    /// * `slots` - One encoder slot per target format
    /// * `config` - Timeouts, frame bound and selection policy
    pub fn new(plan: ConcurrencyPlan, slots: Vec<EncoderSlot>, config: JobExecutorConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(plan.max_in_flight_conversions as usize));
        let race = DualFormatRace::new(slots, semaphore.clone(), config.max_animated_frames);
        Self {
            semaphore,
            concurrency_plan: plan,
            race,
            config,
            predictor: None,
        }
    }

    /// Attach a launch-order hint provider.
    pub fn with_predictor(mut self, predictor: Arc<dyn FormatPredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Get the number of conversion slots not currently in use
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Try to take a conversion slot without waiting
    pub fn try_acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    /// Get the concurrency plan
    pub fn concurrency_plan(&self) -> &ConcurrencyPlan {
        &self.concurrency_plan
    }

    pub fn job_for(&self, source: &Path, original_size: u64) -> ConversionJob {
        ConversionJob {
            source_path: source.to_path_buf(),
            original_size,
            target_formats: self.race.formats(),
            conversion_timeout: self.config.conversion_timeout,
            min_improvement_pct: self.config.policy.min_improvement_pct,
        }
    }

    /// Run one image through the pipeline.
    ///
    /// Never fails: every error ends up in the returned outcome, and the
    /// original is left untouched unless a verified winner was committed.
    ///
    /// 1. Measure the source (read once)
    /// 2. Keep sources already in a target format, and empty sources
    /// 3. Inspect frames and, with a predictor, probe features for the hint
    /// 4. Race every format
    /// 5. Select the winner
    /// 6. Commit it, then discard whatever is left
    pub async fn execute(&self, source: &Path) -> JobOutcome {
        let start = Instant::now();
        let source_path = source.to_path_buf();

        let original_size = match tokio::fs::metadata(source).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return JobOutcome::failed(source_path, 0, start.elapsed(), JobError::NotAFile),
            Err(e) => {
                return JobOutcome::failed(source_path, 0, start.elapsed(), JobError::Source(e))
            }
        };

        if original_size == 0 || is_target_format(source) {
            debug!(source = %source.display(), "nothing to convert");
            return JobOutcome::kept(source_path, original_size, start.elapsed());
        }

        let job = self.job_for(source, original_size);
        let (info, features) = self.inspect(&job).await;
        let hint = match (&self.predictor, &features) {
            (Some(predictor), Some(features)) => predictor.predict(features),
            _ => None,
        };

        let mut record = self.race.run(&job, &info, hint).await;
        let decision = select_winner(&record, &job.policy(&self.config.policy));
        let candidates = record.summaries();
        let committed = self.settle(&mut record, decision).await;
        record.discard_all();

        let mut outcome = JobOutcome::kept(source_path, original_size, Duration::ZERO);
        outcome.candidates = candidates;
        match committed {
            Ok(Some((final_path, final_size))) => {
                outcome.decision = decision;
                outcome.final_path = final_path;
                outcome.final_size = final_size;
            }
            Ok(None) => {}
            Err(e) => outcome.error = Some(e.to_string()),
        }

        if let (Some(predictor), Some(features), None) = (&self.predictor, &features, &outcome.error)
        {
            predictor.record(features, outcome.decision);
        }

        outcome.duration = start.elapsed();
        outcome
    }

    /// Frame count, and features when a predictor wants them. Off the runtime.
    async fn inspect(&self, job: &ConversionJob) -> (SourceInfo, Option<ImageFeatures>) {
        let path = job.source_path.clone();
        let size = job.original_size;
        let max_frames = self.config.max_animated_frames;
        let probe = self.predictor.is_some();

        tokio::task::spawn_blocking(move || {
            let info = inspect_source(&path, max_frames);
            let features = if probe {
                ImageFeatures::probe(&path, size)
            } else {
                None
            };
            (info, features)
        })
        .await
        .unwrap_or_else(|_| (SourceInfo::still(&job.source_path, max_frames), None))
    }

    /// Commit the adopted candidate. `Ok(None)` when the original is kept.
    async fn settle(
        &self,
        record: &mut ComparisonRecord,
        decision: Decision,
    ) -> Result<Option<(PathBuf, u64)>, JobError> {
        let format = match decision {
            Decision::KeepOriginal => return Ok(None),
            Decision::Adopt(format) => format,
        };

        let expected_size = record
            .candidate(format)
            .and_then(|c| c.output_size)
            .ok_or(JobError::MissingArtifact(format))?;
        let artifact = record
            .take_artifact(format)
            .ok_or(JobError::MissingArtifact(format))?;
        let source = record.source_path.clone();
        let original_size = record.original_size;

        let final_path = tokio::task::spawn_blocking(move || {
            commit(&source, original_size, artifact, expected_size)
        })
        .await
        .map_err(|e| JobError::Aborted(e.to_string()))??;

        Ok(Some((final_path, expected_size)))
    }
}
