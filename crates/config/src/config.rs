//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "image-squisher.toml";

/// Format tags accepted in `processing.format_priority`.
pub const KNOWN_FORMAT_TAGS: &[&str] = &["jxl", "webp"];

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// TOML rendering error
    Serialize(toml::ser::Error),
    /// A value is outside its allowed range
    Invalid { field: &'static str, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Serialize(e) => write!(f, "Failed to render config: {}", e),
            ConfigError::Invalid { field, reason } => {
                write!(f, "Invalid value for {}: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Scheduling and policy settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingConfig {
    /// Number of workers (auto-detected if None)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,
    /// Minimum size reduction, in percent, before a candidate may replace the original
    #[serde(default = "default_min_improvement_pct")]
    pub min_improvement_pct: f64,
    /// Seconds without a completed job before the watchdog raises a stall alert
    #[serde(default = "default_hang_timeout_secs")]
    pub hang_timeout_secs: u64,
    /// Budget for a single conversion, in seconds
    #[serde(default = "default_conversion_timeout_secs")]
    pub conversion_timeout_secs: u64,
    /// Upper bound on frames for animated inputs
    #[serde(default = "default_max_animated_frames")]
    pub max_animated_frames: u32,
    /// Scan subdirectories
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Extensions excluded by the scanner (normalized to `.ext` lowercase)
    #[serde(default = "default_skip_extensions")]
    pub skip_extensions: Vec<String>,
    /// Tie-break order between equally sized candidates
    #[serde(default = "default_format_priority")]
    pub format_priority: Vec<String>,
}

fn default_min_improvement_pct() -> f64 {
    5.0
}

fn default_hang_timeout_secs() -> u64 {
    300
}

fn default_conversion_timeout_secs() -> u64 {
    300
}

fn default_max_animated_frames() -> u32 {
    1000
}

fn default_recursive() -> bool {
    true
}

fn default_skip_extensions() -> Vec<String> {
    vec![".webp".to_string(), ".jxl".to_string()]
}

fn default_format_priority() -> Vec<String> {
    vec!["jxl".to_string(), "webp".to_string()]
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            threads: None,
            min_improvement_pct: default_min_improvement_pct(),
            hang_timeout_secs: default_hang_timeout_secs(),
            conversion_timeout_secs: default_conversion_timeout_secs(),
            max_animated_frames: default_max_animated_frames(),
            recursive: default_recursive(),
            skip_extensions: default_skip_extensions(),
            format_priority: default_format_priority(),
        }
    }
}

/// JPEG XL encoder knobs, passed through to `cjxl`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JpegXlConfig {
    /// 1-100, 100 = mathematically lossless
    #[serde(default = "default_jpegxl_quality")]
    pub quality: u32,
    /// 0-9, 9 = slowest / smallest
    #[serde(default = "default_jpegxl_effort")]
    pub effort: u32,
}

fn default_jpegxl_quality() -> u32 {
    100
}

fn default_jpegxl_effort() -> u32 {
    9
}

impl Default for JpegXlConfig {
    fn default() -> Self {
        Self {
            quality: default_jpegxl_quality(),
            effort: default_jpegxl_effort(),
        }
    }
}

/// WebP encoder knobs, passed through to `cwebp` / `gif2webp`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebpConfig {
    /// 0-6, 6 = slowest / smallest
    #[serde(default = "default_webp_method")]
    pub method: u32,
}

fn default_webp_method() -> u32 {
    6
}

impl Default for WebpConfig {
    fn default() -> Self {
        Self {
            method: default_webp_method(),
        }
    }
}

/// Desktop notification settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationsConfig {
    #[serde(default = "default_notifications_enabled")]
    pub enabled: bool,
}

fn default_notifications_enabled() -> bool {
    true
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: default_notifications_enabled(),
        }
    }
}

/// Format learner settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_stats_file")]
    pub stats_file: PathBuf,
}

fn default_stats_file() -> PathBuf {
    PathBuf::from(".image-squisher-stats.json")
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stats_file: default_stats_file(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub jpegxl: JpegXlConfig,
    #[serde(default)]
    pub webp: WebpConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub learning: LearningConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    /// No validation is performed; see [`Config::load`].
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - SQUISHER_THREADS -> processing.threads
    /// - SQUISHER_MIN_IMPROVEMENT_PCT -> processing.min_improvement_pct
    /// - SQUISHER_HANG_TIMEOUT_SECS -> processing.hang_timeout_secs
    /// - SQUISHER_CONVERSION_TIMEOUT_SECS -> processing.conversion_timeout_secs
    /// - SQUISHER_MAX_ANIMATED_FRAMES -> processing.max_animated_frames
    /// - SQUISHER_NOTIFICATIONS -> notifications.enabled
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SQUISHER_THREADS") {
            if let Ok(threads) = val.parse::<u32>() {
                self.processing.threads = Some(threads);
            }
        }

        if let Ok(val) = env::var("SQUISHER_MIN_IMPROVEMENT_PCT") {
            if let Ok(pct) = val.parse::<f64>() {
                self.processing.min_improvement_pct = pct;
            }
        }

        if let Ok(val) = env::var("SQUISHER_HANG_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.processing.hang_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("SQUISHER_CONVERSION_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.processing.conversion_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("SQUISHER_MAX_ANIMATED_FRAMES") {
            if let Ok(frames) = val.parse::<u32>() {
                self.processing.max_animated_frames = frames;
            }
        }

        if let Ok(val) = env::var("SQUISHER_NOTIFICATIONS") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.notifications.enabled = true,
                "false" | "0" | "no" => self.notifications.enabled = false,
                _ => {} // Invalid value, keep existing
            }
        }
    }

    /// Check every range constraint and normalize `skip_extensions`.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let p = &mut self.processing;

        if p.threads == Some(0) {
            return Err(invalid("processing.threads", "must be >= 1"));
        }
        if !p.min_improvement_pct.is_finite() || !(0.0..=100.0).contains(&p.min_improvement_pct)
        {
            return Err(invalid(
                "processing.min_improvement_pct",
                format!("{} is not between 0 and 100", p.min_improvement_pct),
            ));
        }
        if p.hang_timeout_secs < 1 {
            return Err(invalid("processing.hang_timeout_secs", "must be >= 1"));
        }
        if p.conversion_timeout_secs < 1 {
            return Err(invalid("processing.conversion_timeout_secs", "must be >= 1"));
        }
        if p.max_animated_frames < 1 {
            return Err(invalid("processing.max_animated_frames", "must be >= 1"));
        }

        p.format_priority = p
            .format_priority
            .iter()
            .map(|tag| tag.trim().to_lowercase())
            .collect();
        for tag in &p.format_priority {
            if !KNOWN_FORMAT_TAGS.contains(&tag.as_str()) {
                return Err(invalid(
                    "processing.format_priority",
                    format!("unknown format '{}'", tag),
                ));
            }
        }
        for known in KNOWN_FORMAT_TAGS {
            let count = p.format_priority.iter().filter(|t| t == known).count();
            if count != 1 {
                return Err(invalid(
                    "processing.format_priority",
                    format!("'{}' must appear exactly once", known),
                ));
            }
        }

        p.skip_extensions = p
            .skip_extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .collect();

        if !(1..=100).contains(&self.jpegxl.quality) {
            return Err(invalid("jpegxl.quality", "must be between 1 and 100"));
        }
        if self.jpegxl.effort > 9 {
            return Err(invalid("jpegxl.effort", "must be between 0 and 9"));
        }
        if self.webp.method > 6 {
            return Err(invalid("webp.method", "must be between 0 and 6"));
        }

        Ok(())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`], but an explicit `None` falls back to
    /// [`DEFAULT_CONFIG_FILE`] and a missing default file yields defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    return Self::load(default_path);
                }
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Render the default configuration as TOML
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    pub fn hang_timeout(&self) -> Duration {
        Duration::from_secs(self.processing.hang_timeout_secs)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.processing.conversion_timeout_secs)
    }
}

/// Lowercase an extension and make sure it carries a leading dot.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("SQUISHER_THREADS");
        env::remove_var("SQUISHER_MIN_IMPROVEMENT_PCT");
        env::remove_var("SQUISHER_HANG_TIMEOUT_SECS");
        env::remove_var("SQUISHER_CONVERSION_TIMEOUT_SECS");
        env::remove_var("SQUISHER_MAX_ANIMATED_FRAMES");
        env::remove_var("SQUISHER_NOTIFICATIONS");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            threads in proptest::option::of(1u32..256),
            pct in 0.0f64..100.0,
            hang in 1u64..10_000,
            conv in 1u64..10_000,
            frames in 1u32..5000,
            quality in 1u32..=100,
            effort in 0u32..=9,
            method in 0u32..=6,
            notify in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[processing]
{}
min_improvement_pct = {}
hang_timeout_secs = {}
conversion_timeout_secs = {}
max_animated_frames = {}

[jpegxl]
quality = {}
effort = {}

[webp]
method = {}

[notifications]
enabled = {}
"#,
                threads.map(|t| format!("threads = {}", t)).unwrap_or_default(),
                pct, hang, conv, frames, quality, effort, method, notify
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");
            prop_assert!(config.validate().is_ok());

            prop_assert_eq!(config.processing.threads, threads);
            prop_assert!((config.processing.min_improvement_pct - pct).abs() < 1e-9);
            prop_assert_eq!(config.processing.hang_timeout_secs, hang);
            prop_assert_eq!(config.processing.conversion_timeout_secs, conv);
            prop_assert_eq!(config.processing.max_animated_frames, frames);
            prop_assert_eq!(config.jpegxl.quality, quality);
            prop_assert_eq!(config.jpegxl.effort, effort);
            prop_assert_eq!(config.webp.method, method);
            prop_assert_eq!(config.notifications.enabled, notify);
        }

        #[test]
        fn prop_out_of_range_improvement_is_rejected(
            pct in prop_oneof![-1000.0f64..-0.001, 100.001f64..1000.0],
        ) {
            let mut config = Config::default();
            config.processing.min_improvement_pct = pct;
            let is_invalid = matches!(
                config.validate(),
                Err(ConfigError::Invalid { field: "processing.min_improvement_pct", .. })
            );
            prop_assert!(is_invalid);
        }

        #[test]
        fn prop_env_overrides_threads(
            initial in proptest::option::of(1u32..128),
            override_threads in 1u32..256,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                "[processing]\n{}\n",
                initial.map(|t| format!("threads = {}", t)).unwrap_or_default()
            );
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("SQUISHER_THREADS", override_threads.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.processing.threads, Some(override_threads));
        }

        #[test]
        fn prop_env_overrides_timeouts(
            hang in 1u64..100_000,
            conv in 1u64..100_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::default();
            env::set_var("SQUISHER_HANG_TIMEOUT_SECS", hang.to_string());
            env::set_var("SQUISHER_CONVERSION_TIMEOUT_SECS", conv.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.hang_timeout(), Duration::from_secs(hang));
            prop_assert_eq!(config.conversion_timeout(), Duration::from_secs(conv));
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.processing.threads, None);
        assert!((config.processing.min_improvement_pct - 5.0).abs() < 1e-9);
        assert_eq!(config.processing.hang_timeout_secs, 300);
        assert_eq!(config.processing.conversion_timeout_secs, 300);
        assert_eq!(config.processing.max_animated_frames, 1000);
        assert!(config.processing.recursive);
        assert_eq!(config.processing.skip_extensions, vec![".webp", ".jxl"]);
        assert_eq!(config.processing.format_priority, vec!["jxl", "webp"]);
        assert_eq!(config.jpegxl.quality, 100);
        assert_eq!(config.jpegxl.effort, 9);
        assert_eq!(config.webp.method, 6);
        assert!(config.notifications.enabled);
        assert!(!config.learning.enabled);
    }

    #[test]
    fn test_validate_normalizes_skip_extensions() {
        let mut config = Config::parse_toml(
            r#"
[processing]
skip_extensions = ["PNG", ".Gif", " tif "]
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.processing.skip_extensions, vec![".png", ".gif", ".tif"]);
    }

    #[test]
    fn test_validate_rejects_zero_threads() {
        let mut config = Config::parse_toml("[processing]\nthreads = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "processing.threads", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_encoder_knobs_out_of_range() {
        let mut config = Config::default();
        config.jpegxl.effort = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.jpegxl.quality = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.webp.method = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_format_priority() {
        let mut config = Config::parse_toml("[processing]\nformat_priority = [\"WebP\", \"jxl\"]\n")
            .unwrap();
        config.validate().unwrap();
        assert_eq!(config.processing.format_priority, vec!["webp", "jxl"]);

        let mut config =
            Config::parse_toml("[processing]\nformat_priority = [\"jxl\", \"jxl\"]\n").unwrap();
        assert!(config.validate().is_err());

        let mut config =
            Config::parse_toml("[processing]\nformat_priority = [\"jxl\", \"avif\"]\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_toml_round_trips() {
        let rendered = Config::default_toml().unwrap();
        let parsed = Config::parse_toml(&rendered).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_load_validates_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let dir = std::env::temp_dir().join(format!("squisher-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        fs::write(&path, "[webp]\nmethod = 9\n").unwrap();

        let result = Config::load(&path);
        let _ = fs::remove_dir_all(&dir);
        assert!(matches!(result, Err(ConfigError::Invalid { field: "webp.method", .. })));
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension("JXL"), ".jxl");
        assert_eq!(normalize_extension(".WebP"), ".webp");
    }
}
