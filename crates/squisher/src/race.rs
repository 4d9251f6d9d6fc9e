//! Dual-format race module
//!
//! Runs every target encoder for one source concurrently, each under its own
//! timeout, and settles all of them into a single [`ComparisonRecord`].

use crate::encode::{run_encoder, temp_artifact_path, EncodeError, Encoder};
use crate::format::ImageFormat;
use crate::job_executor::ConversionJob;
use crate::replace::{discard_all, TempArtifact};
use crate::verify::{verify_artifact, SourceInfo};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

/// One target format as seen by the race: a ready encoder, or the reason
/// it cannot run during this run.
#[derive(Clone)]
pub enum EncoderSlot {
    Ready(Arc<dyn Encoder>),
    Unavailable { format: ImageFormat, reason: String },
}

impl EncoderSlot {
    pub fn format(&self) -> ImageFormat {
        match self {
            EncoderSlot::Ready(encoder) => encoder.format(),
            EncoderSlot::Unavailable { format, .. } => *format,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, EncoderSlot::Ready(_))
    }
}

impl std::fmt::Debug for EncoderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncoderSlot::Ready(encoder) => write!(f, "Ready({})", encoder.format()),
            EncoderSlot::Unavailable { format, reason } => {
                write!(f, "Unavailable({}: {})", format, reason)
            }
        }
    }
}

/// How a candidate settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CandidateStatus {
    /// Encoded and verified.
    Succeeded,
    Failed(String),
    TimedOut,
}

/// Outcome of one (job, format) conversion.
#[derive(Debug)]
pub struct CandidateResult {
    pub format: ImageFormat,
    pub status: CandidateStatus,
    /// Set only when `status` is `Succeeded`.
    pub output_size: Option<u64>,
    /// Set only when `status` is `Succeeded`.
    pub temp: Option<TempArtifact>,
    pub elapsed: Duration,
}

impl CandidateResult {
    fn failed(format: ImageFormat, reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            format,
            status: CandidateStatus::Failed(reason.into()),
            output_size: None,
            temp: None,
            elapsed,
        }
    }

    fn timed_out(format: ImageFormat, elapsed: Duration) -> Self {
        Self {
            format,
            status: CandidateStatus::TimedOut,
            output_size: None,
            temp: None,
            elapsed,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == CandidateStatus::Succeeded
    }

    pub fn summary(&self) -> CandidateSummary {
        CandidateSummary {
            format: self.format,
            status: self.status.clone(),
            output_size: self.output_size,
            elapsed_ms: self.elapsed.as_millis() as u64,
        }
    }
}

/// Serializable view of a candidate, kept in job outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateSummary {
    pub format: ImageFormat,
    #[serde(flatten)]
    pub status: CandidateStatus,
    pub output_size: Option<u64>,
    pub elapsed_ms: u64,
}

/// Both candidates of one job, settled.
#[derive(Debug)]
pub struct ComparisonRecord {
    pub source_path: PathBuf,
    pub original_size: u64,
    /// One entry per target format, ordered by format.
    pub candidates: Vec<CandidateResult>,
}

impl ComparisonRecord {
    /// `(format, size)` of every verified, succeeded candidate.
    pub fn verified_sizes(&self) -> Vec<(ImageFormat, u64)> {
        self.candidates
            .iter()
            .filter(|c| c.is_succeeded())
            .filter_map(|c| c.output_size.map(|size| (c.format, size)))
            .collect()
    }

    pub fn candidate(&self, format: ImageFormat) -> Option<&CandidateResult> {
        self.candidates.iter().find(|c| c.format == format)
    }

    /// Take ownership of a succeeded candidate's artifact.
    pub fn take_artifact(&mut self, format: ImageFormat) -> Option<TempArtifact> {
        self.candidates
            .iter_mut()
            .find(|c| c.format == format)
            .and_then(|c| c.temp.take())
    }

    /// Delete every artifact still held by the record.
    pub fn discard_all(&mut self) {
        discard_all(self.candidates.iter_mut().filter_map(|c| c.temp.take()));
    }

    pub fn summaries(&self) -> Vec<CandidateSummary> {
        self.candidates.iter().map(CandidateResult::summary).collect()
    }
}

/// Runs the configured encoders against one source at a time.
///
/// Every launch holds a permit from the shared conversion semaphore, which
/// bounds the encoder processes alive across the whole pool.
pub struct DualFormatRace {
    slots: Vec<EncoderSlot>,
    permits: Arc<Semaphore>,
    max_animated_frames: u32,
}

impl DualFormatRace {
    pub fn new(slots: Vec<EncoderSlot>, permits: Arc<Semaphore>, max_animated_frames: u32) -> Self {
        Self {
            slots,
            permits,
            max_animated_frames,
        }
    }

    pub fn formats(&self) -> Vec<ImageFormat> {
        self.slots.iter().map(EncoderSlot::format).collect()
    }

    /// Slots for `targets` in launch order: the hinted format first, the rest
    /// as configured.
    fn launch_order(&self, targets: &[ImageFormat], first: Option<ImageFormat>) -> Vec<EncoderSlot> {
        let mut ordered: Vec<EncoderSlot> = self
            .slots
            .iter()
            .filter(|slot| targets.contains(&slot.format()))
            .cloned()
            .collect();
        if let Some(first) = first {
            ordered.sort_by_key(|slot| slot.format() != first);
        }
        ordered
    }

    /// Run every candidate for `job` and wait for all of them to settle.
    ///
    /// Only slots for the job's target formats run. `first` only changes
    /// launch order.
    pub async fn run(
        &self,
        job: &ConversionJob,
        info: &SourceInfo,
        first: Option<ImageFormat>,
    ) -> ComparisonRecord {
        let mut settled: Vec<CandidateResult> = Vec::with_capacity(self.slots.len());
        let mut running: Vec<(ImageFormat, JoinHandle<CandidateResult>)> = Vec::new();

        for slot in self.launch_order(&job.target_formats, first) {
            match slot {
                EncoderSlot::Unavailable { format, reason } => {
                    settled.push(CandidateResult::failed(format, reason, Duration::ZERO));
                }
                EncoderSlot::Ready(encoder) => {
                    let format = encoder.format();
                    let permit = match self.permits.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            settled.push(CandidateResult::failed(
                                format,
                                "conversion pool closed",
                                Duration::ZERO,
                            ));
                            continue;
                        }
                    };
                    let handle = tokio::spawn(run_candidate(
                        encoder,
                        job.source_path.clone(),
                        info.clone(),
                        permit,
                        job.conversion_timeout,
                        self.max_animated_frames,
                    ));
                    running.push((format, handle));
                }
            }
        }

        for (format, handle) in running {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => CandidateResult::failed(
                    format,
                    format!("candidate task aborted: {}", e),
                    Duration::ZERO,
                ),
            };
            debug!(
                source = %job.source_path.display(),
                format = %result.format,
                status = ?result.status,
                size = ?result.output_size,
                "candidate settled"
            );
            settled.push(result);
        }

        settled.sort_by_key(|c| c.format);

        ComparisonRecord {
            source_path: job.source_path.clone(),
            original_size: job.original_size,
            candidates: settled,
        }
    }
}

/// Encode and verify one candidate. The permit is held until it settles.
async fn run_candidate(
    encoder: Arc<dyn Encoder>,
    source: PathBuf,
    info: SourceInfo,
    _permit: OwnedSemaphorePermit,
    budget: Duration,
    max_animated_frames: u32,
) -> CandidateResult {
    let start = Instant::now();
    let format = encoder.format();

    if info.is_animated() {
        if info.exceeds_frame_limit() {
            return CandidateResult::failed(
                format,
                format!("source has more than {} frames", info.frame_limit),
                start.elapsed(),
            );
        }
        if !encoder.supports_animation() {
            return CandidateResult::failed(
                format,
                format!("{} encoder cannot keep animation", format.display_name()),
                start.elapsed(),
            );
        }
    }

    let temp_path = temp_artifact_path(&source, format);
    let artifact = TempArtifact::new(temp_path.clone(), format);

    let cmd = match encoder.build_command(&source, &temp_path, &info) {
        Ok(cmd) => cmd,
        Err(e) => return CandidateResult::failed(format, e.to_string(), start.elapsed()),
    };

    match run_encoder(cmd, &temp_path, budget).await {
        Ok(()) => {}
        Err(EncodeError::Timeout(_)) => return CandidateResult::timed_out(format, start.elapsed()),
        Err(e) => return CandidateResult::failed(format, e.to_string(), start.elapsed()),
    }

    match verify_candidate(temp_path, format, max_animated_frames).await {
        Ok(size) => CandidateResult {
            format,
            status: CandidateStatus::Succeeded,
            output_size: Some(size),
            temp: Some(artifact),
            elapsed: start.elapsed(),
        },
        Err(reason) => CandidateResult::failed(format, reason, start.elapsed()),
    }
}

async fn verify_candidate(
    path: PathBuf,
    format: ImageFormat,
    max_animated_frames: u32,
) -> Result<u64, String> {
    tokio::task::spawn_blocking(move || verify_artifact(&path, format, max_animated_frames))
        .await
        .map_err(|e| format!("verification aborted: {}", e))?
        .map_err(|e| format!("verification failed: {}", e))
}
