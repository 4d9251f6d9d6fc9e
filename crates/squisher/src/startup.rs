//! Startup checks module for Image Squisher
//!
//! Probes the external encoders once per run. A missing encoder is not fatal:
//! its format is reported unavailable and every candidate for it fails.

use crate::config::Config;
use crate::encode::cwebp::GIF2WEBP;
use crate::encode::{EncodeError, Encoder, JxlEncoder, WebpEncoder};
use crate::format::{priority_from_tags, ImageFormat};
use crate::race::EncoderSlot;
use std::sync::Arc;
use tracing::{info, warn};

/// Install hint for a missing tool on the current platform.
pub fn install_hint(tool: &str) -> String {
    let package = if tool == "cjxl" { "jpeg-xl" } else { "webp" };
    if cfg!(target_os = "macos") {
        format!("install with: brew install {}", package)
    } else if cfg!(target_os = "windows") {
        format!("download {} tools and add them to PATH", package)
    } else {
        let apt = if tool == "cjxl" { "libjxl-tools" } else { "webp" };
        format!("install with your package manager, e.g. apt install {}", apt)
    }
}

/// Result of probing the encoders.
#[derive(Debug, Clone)]
pub struct StartupReport {
    /// One slot per target format, in tie-break priority order.
    pub slots: Vec<EncoderSlot>,
    /// Animated sources can be converted to WebP.
    pub animated_webp: bool,
}

impl StartupReport {
    pub fn available(&self) -> Vec<ImageFormat> {
        self.slots
            .iter()
            .filter(|s| s.is_ready())
            .map(EncoderSlot::format)
            .collect()
    }

    pub fn any_available(&self) -> bool {
        self.slots.iter().any(EncoderSlot::is_ready)
    }
}

fn slot_for(
    format: ImageFormat,
    located: Result<Arc<dyn Encoder>, EncodeError>,
) -> EncoderSlot {
    match located {
        Ok(encoder) => {
            info!(format = %format, "encoder available");
            EncoderSlot::Ready(encoder)
        }
        Err(e) => {
            let tool = match &e {
                EncodeError::EncoderUnavailable(tool) => tool.clone(),
                _ => format.tag().to_string(),
            };
            warn!(
                format = %format,
                "{}; {} candidates will be skipped ({})",
                e,
                format.display_name(),
                install_hint(&tool)
            );
            EncoderSlot::Unavailable {
                format,
                reason: e.to_string(),
            }
        }
    }
}

/// Locate every encoder the configuration asks for.
pub fn probe_encoders(cfg: &Config) -> StartupReport {
    let mut animated_webp = false;
    let slots = priority_from_tags(&cfg.processing.format_priority)
        .into_iter()
        .map(|format| match format {
            ImageFormat::Jxl => slot_for(
                format,
                JxlEncoder::locate(&cfg.jpegxl).map(|e| Arc::new(e) as Arc<dyn Encoder>),
            ),
            ImageFormat::Webp => {
                let located = WebpEncoder::locate(&cfg.webp);
                if let Ok(encoder) = &located {
                    animated_webp = encoder.has_animation_support();
                    if !animated_webp {
                        warn!(
                            "{} not found; animated GIFs will be kept as is ({})",
                            GIF2WEBP,
                            install_hint(GIF2WEBP)
                        );
                    }
                }
                slot_for(
                    format,
                    located.map(|e| Arc::new(e) as Arc<dyn Encoder>),
                )
            }
        })
        .collect();

    StartupReport {
        slots,
        animated_webp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_hint_names_package() {
        let hint = install_hint("cjxl");
        assert!(hint.contains("jxl") || hint.contains("jpeg-xl"));
        assert!(install_hint("cwebp").contains("webp"));
    }

    #[test]
    fn test_probe_returns_slot_per_format_in_priority_order() {
        let mut cfg = Config::default();
        cfg.processing.format_priority = vec!["webp".to_string(), "jxl".to_string()];

        let report = probe_encoders(&cfg);
        let formats: Vec<_> = report.slots.iter().map(EncoderSlot::format).collect();

        assert_eq!(formats, vec![ImageFormat::Webp, ImageFormat::Jxl]);
        assert_eq!(report.any_available(), !report.available().is_empty());
    }

    #[test]
    fn test_unavailable_slot_carries_reason() {
        let slot = slot_for(
            ImageFormat::Jxl,
            Err(EncodeError::EncoderUnavailable("cjxl".to_string())),
        );
        match slot {
            EncoderSlot::Unavailable { format, reason } => {
                assert_eq!(format, ImageFormat::Jxl);
                assert!(reason.contains("cjxl"));
            }
            other => panic!("unexpected slot: {:?}", other),
        }
    }
}
