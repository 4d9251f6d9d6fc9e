//! Target image formats and their on-disk signatures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// JPEG XL bare codestream signature.
const JXL_CODESTREAM_MAGIC: &[u8] = &[0xFF, 0x0A];

/// JPEG XL ISOBMFF container signature.
const JXL_CONTAINER_MAGIC: &[u8] = &[
    0x00, 0x00, 0x00, 0x0C, 0x4A, 0x58, 0x4C, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

/// A lossless target format a source image can be converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jxl,
    Webp,
}

impl ImageFormat {
    /// Every supported target, in declaration order.
    pub const ALL: [ImageFormat; 2] = [ImageFormat::Jxl, ImageFormat::Webp];

    /// Short tag used in config files and reports.
    pub fn tag(&self) -> &'static str {
        match self {
            ImageFormat::Jxl => "jxl",
            ImageFormat::Webp => "webp",
        }
    }

    /// Extension given to an adopted file, with leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jxl => ".jxl",
            ImageFormat::Webp => ".webp",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ImageFormat::Jxl => "JPEG XL",
            ImageFormat::Webp => "WebP",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "jxl" | "jpegxl" | "jpeg-xl" => Some(ImageFormat::Jxl),
            "webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    /// Maps a file extension (with or without dot, any case) to a target format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_lowercase();
        ImageFormat::ALL
            .into_iter()
            .find(|f| f.extension().trim_start_matches('.') == ext)
    }

    /// Whether `header` starts with this format's magic bytes.
    pub fn matches_header(&self, header: &[u8]) -> bool {
        match self {
            ImageFormat::Jxl => {
                header.starts_with(JXL_CODESTREAM_MAGIC) || header.starts_with(JXL_CONTAINER_MAGIC)
            }
            ImageFormat::Webp => {
                header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WEBP"
            }
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageFormat::from_tag(s).ok_or_else(|| format!("unknown image format '{}'", s))
    }
}

/// Parse the config's priority list; unknown tags are skipped and missing
/// formats are appended in declaration order so every format has a rank.
pub fn priority_from_tags<S: AsRef<str>>(tags: &[S]) -> Vec<ImageFormat> {
    let mut order: Vec<ImageFormat> = Vec::with_capacity(ImageFormat::ALL.len());
    for format in tags.iter().filter_map(|t| ImageFormat::from_tag(t.as_ref())) {
        if !order.contains(&format) {
            order.push(format);
        }
    }
    for format in ImageFormat::ALL {
        if !order.contains(&format) {
            order.push(format);
        }
    }
    order
}
