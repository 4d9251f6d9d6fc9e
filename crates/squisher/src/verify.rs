//! Verification of produced artifacts and inspection of animated sources.
//!
//! A candidate is only ever eligible to win after [`verify_artifact`] accepts it:
//! the file exists, is non-empty, carries the expected magic bytes and, for
//! animated WebP output, stays within the configured frame bound.

use crate::format::ImageFormat;
use image::codecs::gif::GifDecoder;
use image::AnimationDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bytes read from the start of an artifact for the magic check.
const HEADER_LEN: usize = 16;

/// Why an artifact was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("artifact is missing or unreadable: {0}")]
    Unreadable(String),

    #[error("artifact is empty")]
    Empty,

    #[error("artifact is not a valid {expected} file")]
    WrongFormat { expected: ImageFormat },

    #[error("{frames} frames exceeds the limit of {limit}")]
    TooManyFrames { frames: u32, limit: u32 },

    #[error("malformed container: {0}")]
    Malformed(String),
}

/// What the race needs to know about a source before launching encoders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub path: PathBuf,
    /// Frame count, capped at `limit + 1`. Still images report 1.
    pub frames: u32,
    /// The frame bound the count was taken against.
    pub frame_limit: u32,
}

impl SourceInfo {
    /// A still image; used when a source cannot be inspected.
    pub fn still(path: &Path, frame_limit: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            frames: 1,
            frame_limit,
        }
    }

    pub fn is_animated(&self) -> bool {
        self.frames > 1
    }

    pub fn exceeds_frame_limit(&self) -> bool {
        self.frames > self.frame_limit
    }
}

/// Count the frames of a GIF source, stopping at `max_frames + 1`.
///
/// Only GIF sources are inspected; everything else is reported as still. A GIF
/// that fails to decode is also reported as still and left to the encoders.
pub fn inspect_source(path: &Path, max_frames: u32) -> SourceInfo {
    let is_gif = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("gif"))
        .unwrap_or(false);
    if !is_gif {
        return SourceInfo::still(path, max_frames);
    }

    let frames = File::open(path)
        .ok()
        .and_then(|file| GifDecoder::new(BufReader::new(file)).ok())
        .map(|decoder| {
            decoder
                .into_frames()
                .take(max_frames as usize + 1)
                .take_while(|frame| frame.is_ok())
                .count() as u32
        })
        .unwrap_or(1)
        .max(1);

    SourceInfo {
        path: path.to_path_buf(),
        frames,
        frame_limit: max_frames,
    }
}

/// Structural check of a produced artifact. Returns its size on success.
pub fn verify_artifact(
    path: &Path,
    expected: ImageFormat,
    max_frames: u32,
) -> Result<u64, VerifyError> {
    let metadata = std::fs::metadata(path).map_err(|e| VerifyError::Unreadable(e.to_string()))?;
    if !metadata.is_file() {
        return Err(VerifyError::Unreadable("not a regular file".to_string()));
    }
    let size = metadata.len();
    if size == 0 {
        return Err(VerifyError::Empty);
    }

    let mut file = File::open(path).map_err(|e| VerifyError::Unreadable(e.to_string()))?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    (&mut file)
        .take(HEADER_LEN as u64)
        .read_to_end(&mut header)
        .map_err(|e| VerifyError::Unreadable(e.to_string()))?;

    if !expected.matches_header(&header) {
        return Err(VerifyError::WrongFormat { expected });
    }

    if expected == ImageFormat::Webp {
        let frames = webp_frame_count(&mut file, size)?;
        if frames > max_frames {
            return Err(VerifyError::TooManyFrames {
                frames,
                limit: max_frames,
            });
        }
    }

    Ok(size)
}

/// Walk the RIFF chunks of a WebP file and count its frames.
///
/// Every chunk must fit inside the declared RIFF size, and an image payload
/// (`VP8 `, `VP8L` or `ANMF`) must be present.
pub fn webp_frame_count<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<u32, VerifyError> {
    let io_err = |e: io::Error| VerifyError::Malformed(e.to_string());

    reader.seek(SeekFrom::Start(4)).map_err(io_err)?;
    let mut word = [0u8; 4];
    reader.read_exact(&mut word).map_err(io_err)?;
    let riff_len = u32::from_le_bytes(word) as u64 + 8;
    if riff_len > file_len {
        return Err(VerifyError::Malformed(format!(
            "RIFF declares {} bytes but file has {}",
            riff_len, file_len
        )));
    }

    let mut offset = 12u64;
    let mut frames = 0u32;
    let mut has_still = false;
    let mut chunk_header = [0u8; 8];

    while offset + 8 <= riff_len {
        reader.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        reader.read_exact(&mut chunk_header).map_err(io_err)?;
        let fourcc = &chunk_header[0..4];
        let chunk_len =
            u32::from_le_bytes([chunk_header[4], chunk_header[5], chunk_header[6], chunk_header[7]])
                as u64;
        let padded = chunk_len + (chunk_len & 1);

        if offset + 8 + chunk_len > riff_len {
            return Err(VerifyError::Malformed(format!(
                "chunk {} at offset {} overruns the container",
                String::from_utf8_lossy(fourcc),
                offset
            )));
        }

        match fourcc {
            b"ANMF" => frames += 1,
            b"VP8 " | b"VP8L" => has_still = true,
            _ => {}
        }
        offset += 8 + padded;
    }

    match (frames, has_still) {
        (0, true) => Ok(1),
        (0, false) => Err(VerifyError::Malformed("no image data".to_string())),
        (n, _) => Ok(n),
    }
}
