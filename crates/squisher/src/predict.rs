//! Format prediction module
//!
//! A statistics-only learner that remembers which format won for images with
//! similar features and suggests which candidate to launch first. The hint
//! never removes a candidate from the race.

use crate::format::ImageFormat;
use crate::select::Decision;
use image::{ImageDecoder, ImageReader};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

/// Predictions kept for accuracy reporting.
pub const PREDICTION_HISTORY: usize = 1000;

/// Records between automatic saves.
pub const SAVE_EVERY: u64 = 10;

/// jxl + webp wins a category needs before it may vote.
const MIN_SAMPLES: u32 = 3;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("failed to write statistics: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode statistics: {0}")]
    Json(#[from] serde_json::Error),
}

/// Launch-order hint provider consumed by the job executor.
pub trait FormatPredictor: Send + Sync {
    /// Format expected to win, if the evidence is clear.
    fn predict(&self, features: &ImageFeatures) -> Option<ImageFormat>;

    /// Learn from a finished job.
    fn record(&self, features: &ImageFeatures, decision: Decision);

    /// Persist whatever has been learned.
    fn flush(&self) -> Result<(), PredictError>;
}

/// Bucket for byte sizes and pixel counts.
pub fn size_category(value: u64) -> &'static str {
    match value {
        0..=99_999 => "tiny",
        100_000..=499_999 => "small",
        500_000..=1_999_999 => "medium",
        2_000_000..=9_999_999 => "large",
        _ => "huge",
    }
}

/// Features the learner keys its tallies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFeatures {
    /// Lowercase extension with leading dot.
    pub format: String,
    pub color_mode: String,
    pub size_cat: String,
    pub dim_cat: String,
    pub source_folder: String,
}

impl ImageFeatures {
    /// Probe `path` from its header only. `None` if it cannot be decoded.
    pub fn probe(path: &Path, original_size: u64) -> Option<Self> {
        let decoder = ImageReader::open(path)
            .ok()?
            .with_guessed_format()
            .ok()?
            .into_decoder()
            .ok()?;
        let (width, height) = decoder.dimensions();
        let color_mode = format!("{:?}", decoder.color_type());
        Some(Self::from_parts(path, original_size, width, height, color_mode))
    }

    pub fn from_parts(
        path: &Path,
        original_size: u64,
        width: u32,
        height: u32,
        color_mode: String,
    ) -> Self {
        let format = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        let source_folder = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());

        Self {
            format,
            color_mode,
            size_cat: size_category(original_size).to_string(),
            dim_cat: size_category(width as u64 * height as u64).to_string(),
            source_folder,
        }
    }
}

/// Wins per outcome within one feature category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinTally {
    pub jxl: u32,
    pub webp: u32,
    pub original: u32,
}

impl WinTally {
    fn add(&mut self, decision: Decision) {
        match decision {
            Decision::Adopt(ImageFormat::Jxl) => self.jxl += 1,
            Decision::Adopt(ImageFormat::Webp) => self.webp += 1,
            Decision::KeepOriginal => self.original += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.jxl + self.webp + self.original
    }

    /// Format leading this category, once it has enough samples.
    fn leader(&self) -> Option<ImageFormat> {
        if self.jxl + self.webp < MIN_SAMPLES {
            return None;
        }
        match self.jxl.cmp(&self.webp) {
            std::cmp::Ordering::Greater => Some(ImageFormat::Jxl),
            std::cmp::Ordering::Less => Some(ImageFormat::Webp),
            std::cmp::Ordering::Equal => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub predicted: ImageFormat,
    pub actual: Decision,
    pub correct: bool,
    pub features: ImageFeatures,
}

/// On-disk statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerStats {
    pub total_processed: u64,
    pub by_original_format: BTreeMap<String, WinTally>,
    pub by_color_mode: BTreeMap<String, WinTally>,
    pub by_size_category: BTreeMap<String, WinTally>,
    pub by_dimensions: BTreeMap<String, WinTally>,
    pub by_source_folder: BTreeMap<String, WinTally>,
    pub predictions: VecDeque<PredictionRecord>,
}

impl LearnerStats {
    /// Weighted vote over the features; the winner needs a lead of two.
    pub fn predict(&self, features: &ImageFeatures) -> Option<ImageFormat> {
        let ballots = [
            (self.by_original_format.get(&features.format), 2u32),
            (self.by_color_mode.get(&features.color_mode), 1),
            (self.by_size_category.get(&features.size_cat), 1),
            (self.by_dimensions.get(&features.dim_cat), 1),
        ];

        let (mut jxl, mut webp) = (0u32, 0u32);
        for (tally, weight) in ballots {
            match tally.and_then(WinTally::leader) {
                Some(ImageFormat::Jxl) => jxl += weight,
                Some(ImageFormat::Webp) => webp += weight,
                None => {}
            }
        }

        if jxl > webp + 1 {
            Some(ImageFormat::Jxl)
        } else if webp > jxl + 1 {
            Some(ImageFormat::Webp)
        } else {
            None
        }
    }

    pub fn record(&mut self, features: &ImageFeatures, decision: Decision) {
        if let Some(predicted) = self.predict(features) {
            self.predictions.push_back(PredictionRecord {
                predicted,
                actual: decision,
                correct: decision == Decision::Adopt(predicted),
                features: features.clone(),
            });
            while self.predictions.len() > PREDICTION_HISTORY {
                self.predictions.pop_front();
            }
        }

        self.total_processed += 1;
        for (table, key) in [
            (&mut self.by_original_format, &features.format),
            (&mut self.by_color_mode, &features.color_mode),
            (&mut self.by_size_category, &features.size_cat),
            (&mut self.by_dimensions, &features.dim_cat),
            (&mut self.by_source_folder, &features.source_folder),
        ] {
            table.entry(key.clone()).or_default().add(decision);
        }
    }

    /// `(correct, total)` over the kept prediction history.
    pub fn accuracy(&self) -> (usize, usize) {
        let correct = self.predictions.iter().filter(|p| p.correct).count();
        (correct, self.predictions.len())
    }

    pub fn summary(&self) -> String {
        if self.total_processed == 0 {
            return "No statistics collected yet.".to_string();
        }

        let mut out = format!("Total images processed: {}\n", self.total_processed);
        let (correct, total) = self.accuracy();
        if total > 0 {
            let _ = writeln!(
                out,
                "Prediction accuracy: {:.1}% ({}/{})",
                correct as f64 / total as f64 * 100.0,
                correct,
                total
            );
        }
        if !self.by_original_format.is_empty() {
            out.push_str("By original format:\n");
            for (format, tally) in &self.by_original_format {
                let n = tally.total().max(1) as f64;
                let _ = writeln!(
                    out,
                    "  {}: JXL {:.1}%, WebP {:.1}%, Original {:.1}% (n={})",
                    format,
                    tally.jxl as f64 / n * 100.0,
                    tally.webp as f64 / n * 100.0,
                    tally.original as f64 / n * 100.0,
                    tally.total()
                );
            }
        }
        out
    }
}

/// [`FormatPredictor`] persisted as JSON.
pub struct FormatLearner {
    stats_file: PathBuf,
    stats: Mutex<LearnerStats>,
}

impl FormatLearner {
    /// Load statistics from `stats_file`. A missing or corrupt file starts fresh.
    pub fn load(stats_file: impl Into<PathBuf>) -> Self {
        let stats_file = stats_file.into();
        let stats = match fs::read(&stats_file) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %stats_file.display(), error = %e, "ignoring unreadable learner statistics");
                LearnerStats::default()
            }),
            Err(_) => LearnerStats::default(),
        };
        Self {
            stats_file,
            stats: Mutex::new(stats),
        }
    }

    pub fn stats_file(&self) -> &Path {
        &self.stats_file
    }

    fn lock(&self) -> MutexGuard<'_, LearnerStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn summary(&self) -> String {
        self.lock().summary()
    }

    fn save(&self, stats: &LearnerStats) -> Result<(), PredictError> {
        let json = serde_json::to_vec_pretty(stats)?;
        fs::write(&self.stats_file, json)?;
        Ok(())
    }
}

impl FormatPredictor for FormatLearner {
    fn predict(&self, features: &ImageFeatures) -> Option<ImageFormat> {
        self.lock().predict(features)
    }

    fn record(&self, features: &ImageFeatures, decision: Decision) {
        let mut stats = self.lock();
        stats.record(features, decision);
        if stats.total_processed % SAVE_EVERY == 0 {
            if let Err(e) = self.save(&stats) {
                debug!(error = %e, "periodic statistics save failed");
            }
        }
    }

    fn flush(&self) -> Result<(), PredictError> {
        let stats = self.lock();
        self.save(&stats)
    }
}
