//! Winner selection module
//!
//! Pure decision over a comparison record: keep the original, or adopt the
//! smallest verified candidate when it clears the improvement threshold.

use crate::config::Config;
use crate::format::{priority_from_tags, ImageFormat};
use crate::race::ComparisonRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens to a source image once both candidates have settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "format", rename_all = "snake_case")]
pub enum Decision {
    KeepOriginal,
    Adopt(ImageFormat),
}

impl Decision {
    pub fn adopted(&self) -> Option<ImageFormat> {
        match self {
            Decision::KeepOriginal => None,
            Decision::Adopt(format) => Some(*format),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::KeepOriginal => f.write_str("keep original"),
            Decision::Adopt(format) => write!(f, "adopt {}", format.display_name()),
        }
    }
}

/// Threshold and tie-break order applied to every record of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionPolicy {
    /// Minimum size reduction, in percent of the original, needed to adopt.
    pub min_improvement_pct: f64,
    /// Earlier formats win ties.
    pub priority: Vec<ImageFormat>,
}

impl SelectionPolicy {
    pub fn new(min_improvement_pct: f64, priority: Vec<ImageFormat>) -> Self {
        Self {
            min_improvement_pct,
            priority,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.processing.min_improvement_pct,
            priority_from_tags(&cfg.processing.format_priority),
        )
    }

    /// Tie-break rank; formats missing from the list sort last.
    pub fn rank(&self, format: ImageFormat) -> usize {
        self.priority
            .iter()
            .position(|f| *f == format)
            .unwrap_or(self.priority.len())
    }
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::new(5.0, ImageFormat::ALL.to_vec())
    }
}

/// Size reduction of `candidate_size` relative to `original_size`, in percent.
///
/// Negative when the candidate is larger. An empty original yields 0.
pub fn improvement_pct(original_size: u64, candidate_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    (original_size as f64 - candidate_size as f64) / original_size as f64 * 100.0
}

/// Decide over `(format, size)` pairs of verified, succeeded candidates.
///
/// The best candidate is the smallest one, ties broken by policy rank. It is
/// adopted only if it is strictly smaller than the original and the reduction
/// reaches `min_improvement_pct`.
pub fn select(
    original_size: u64,
    verified: &[(ImageFormat, u64)],
    policy: &SelectionPolicy,
) -> Decision {
    if original_size == 0 {
        return Decision::KeepOriginal;
    }

    let best = verified
        .iter()
        .min_by_key(|(format, size)| (*size, policy.rank(*format)));

    match best {
        Some(&(format, size))
            if size < original_size
                && improvement_pct(original_size, size) >= policy.min_improvement_pct =>
        {
            Decision::Adopt(format)
        }
        _ => Decision::KeepOriginal,
    }
}

/// Decide over a finished race.
pub fn select_winner(record: &ComparisonRecord, policy: &SelectionPolicy) -> Decision {
    select(record.original_size, &record.verified_sizes(), policy)
}
