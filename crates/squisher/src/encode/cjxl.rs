//! JPEG XL encoder module
//!
//! Builds `cjxl` invocations. Quality 100 is mathematically lossless; JPEG
//! inputs are losslessly recompressed by cjxl itself.

use super::{locate_tool, EncodeError, Encoder};
use crate::config::JpegXlConfig;
use crate::format::ImageFormat;
use crate::verify::SourceInfo;
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub const CJXL: &str = "cjxl";

/// `cjxl` adapter with the configured quality and effort.
#[derive(Debug, Clone)]
pub struct JxlEncoder {
    program: PathBuf,
    quality: u32,
    effort: u32,
}

impl JxlEncoder {
    pub fn new(program: PathBuf, settings: &JpegXlConfig) -> Self {
        Self {
            program,
            quality: settings.quality,
            effort: settings.effort,
        }
    }

    /// Resolve `cjxl` on this machine.
    pub fn locate(settings: &JpegXlConfig) -> Result<Self, EncodeError> {
        locate_tool(CJXL)
            .map(|program| Self::new(program, settings))
            .ok_or_else(|| EncodeError::EncoderUnavailable(CJXL.to_string()))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Encoder for JxlEncoder {
    fn format(&self) -> ImageFormat {
        ImageFormat::Jxl
    }

    fn supports_animation(&self) -> bool {
        false
    }

    fn build_command(
        &self,
        source: &Path,
        output: &Path,
        info: &SourceInfo,
    ) -> Result<Command, EncodeError> {
        if info.is_animated() {
            return Err(EncodeError::Unsupported(
                "animated sources are not converted to JPEG XL".to_string(),
            ));
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg(source)
            .arg(output)
            .arg("-q")
            .arg(self.quality.to_string())
            .arg("-e")
            .arg(self.effort.to_string());
        Ok(cmd)
    }
}
