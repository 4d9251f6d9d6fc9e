//! WebP encoder module
//!
//! Still images go through `cwebp -lossless`; animated GIFs go through
//! `gif2webp`, which keeps every frame and is lossless by default.

use super::{locate_tool, EncodeError, Encoder};
use crate::config::WebpConfig;
use crate::format::ImageFormat;
use crate::verify::SourceInfo;
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub const CWEBP: &str = "cwebp";
pub const GIF2WEBP: &str = "gif2webp";

/// `cwebp` / `gif2webp` adapter with the configured compression method.
#[derive(Debug, Clone)]
pub struct WebpEncoder {
    cwebp: PathBuf,
    gif2webp: Option<PathBuf>,
    method: u32,
}

impl WebpEncoder {
    pub fn new(cwebp: PathBuf, gif2webp: Option<PathBuf>, settings: &WebpConfig) -> Self {
        Self {
            cwebp,
            gif2webp,
            method: settings.method,
        }
    }

    /// Resolve `cwebp` (required) and `gif2webp` (optional) on this machine.
    pub fn locate(settings: &WebpConfig) -> Result<Self, EncodeError> {
        let cwebp =
            locate_tool(CWEBP).ok_or_else(|| EncodeError::EncoderUnavailable(CWEBP.to_string()))?;
        Ok(Self::new(cwebp, locate_tool(GIF2WEBP), settings))
    }

    pub fn has_animation_support(&self) -> bool {
        self.gif2webp.is_some()
    }
}

impl Encoder for WebpEncoder {
    fn format(&self) -> ImageFormat {
        ImageFormat::Webp
    }

    fn supports_animation(&self) -> bool {
        self.has_animation_support()
    }

    fn build_command(
        &self,
        source: &Path,
        output: &Path,
        info: &SourceInfo,
    ) -> Result<Command, EncodeError> {
        let method = self.method.to_string();

        if info.is_animated() {
            let gif2webp = self
                .gif2webp
                .as_ref()
                .ok_or_else(|| EncodeError::EncoderUnavailable(GIF2WEBP.to_string()))?;
            let mut cmd = Command::new(gif2webp);
            cmd.arg("-q")
                .arg("100")
                .arg("-m")
                .arg(&method)
                .arg(source)
                .arg("-o")
                .arg(output);
            return Ok(cmd);
        }

        let mut cmd = Command::new(&self.cwebp);
        cmd.arg("-lossless")
            .arg("-q")
            .arg("100")
            .arg("-m")
            .arg(&method)
            .arg("-metadata")
            .arg("none")
            .arg("-quiet")
            .arg(source)
            .arg("-o")
            .arg(output);
        Ok(cmd)
    }
}
