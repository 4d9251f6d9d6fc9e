//! Image Squisher
//!
//! Converts a folder of images to whichever of JPEG XL, lossless WebP or the
//! original is smallest, without ever risking the original file.

pub mod aggregate;
pub mod concurrency;
pub mod encode;
pub mod format;
pub mod job_executor;
pub mod notify;
pub mod orchestrator;
pub mod predict;
pub mod progress;
pub mod race;
pub mod replace;
pub mod scan;
pub mod select;
pub mod startup;
pub mod verify;
pub mod watchdog;

pub use image_squisher_config as config;
pub use image_squisher_config::Config;
pub use aggregate::{format_bytes, JobOutcome, RunAggregator, RunSummary};
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use encode::{EncodeError, Encoder, JxlEncoder, WebpEncoder};
pub use format::ImageFormat;
pub use job_executor::{ConversionJob, JobError, JobExecutor, JobExecutorConfig};
pub use notify::{AlertSink, DesktopNotifier, FanoutSink, LogSink, NullSink};
pub use orchestrator::{Orchestrator, RunError, StopHandle};
pub use predict::{FormatLearner, FormatPredictor, ImageFeatures};
pub use progress::{new_shared_progress, RunProgress, SharedProgress};
pub use race::{CandidateResult, CandidateStatus, ComparisonRecord, DualFormatRace, EncoderSlot};
pub use replace::{ReplaceError, TempArtifact};
pub use scan::{detect_formats, scan_folder, sweep_orphans, ScanCandidate};
pub use select::{select, select_winner, Decision, SelectionPolicy};
pub use startup::{probe_encoders, StartupReport};
pub use verify::{SourceInfo, VerifyError};
pub use watchdog::{HangWatchdog, WatchdogHandle};
