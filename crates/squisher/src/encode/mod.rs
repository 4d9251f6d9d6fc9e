//! Encoder adapters for Image Squisher
//!
//! Each adapter knows how to build the command line for one external encoder.
//! Running the command, enforcing the timeout and cleaning up partial output is
//! shared in [`runner`].

pub mod cjxl;
pub mod cwebp;
pub mod runner;

use crate::format::ImageFormat;
use crate::verify::SourceInfo;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

pub use cjxl::JxlEncoder;
pub use cwebp::WebpEncoder;
pub use runner::{locate_tool, run_encoder, temp_artifact_path, TEMP_SUFFIX};

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Encoder binary is not installed
    #[error("{0} is not installed or not on PATH")]
    EncoderUnavailable(String),

    /// Encoder exited with non-zero status
    #[error("{tool} failed with exit code {code}: {stderr}")]
    Failed {
        tool: String,
        code: i32,
        stderr: String,
    },

    /// Encoder was terminated by signal
    #[error("{0} was terminated by signal")]
    Terminated(String),

    /// Conversion exceeded its budget and was killed
    #[error("conversion exceeded {0:?} and was killed")]
    Timeout(Duration),

    /// Encoder reported success without writing its output
    #[error("{0} exited successfully but produced no output")]
    MissingOutput(String),

    /// The source cannot be handled by this encoder
    #[error("{0}")]
    Unsupported(String),

    /// IO error during encoding
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An external encoder for one target format.
///
/// Implementations only build commands; they never touch the source and never
/// decide whether their output is kept.
pub trait Encoder: Send + Sync {
    /// Target format produced by this encoder.
    fn format(&self) -> ImageFormat;

    /// Whether animated sources can be converted without losing frames.
    fn supports_animation(&self) -> bool;

    /// Build the command converting `source` into `output`.
    fn build_command(
        &self,
        source: &Path,
        output: &Path,
        info: &SourceInfo,
    ) -> Result<Command, EncodeError>;
}
