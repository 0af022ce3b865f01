//! Engine configuration.
//!
//! # Responsibility
//! - Hold thresholds, weights and delays as one explicit parameter object.
//! - Load it from TOML with per-field defaults.
//!
//! # Invariants
//! - A validated config has positive delays/thresholds and
//!   `at_risk_days < stalled_days`.
//! - Momentum weights are normalized to sum to 1.0 before use.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub sync: SyncConfig,
    pub watch: WatchConfig,
    pub momentum: MomentumConfig,
    pub ranking: RankingConfig,
}

impl EngineConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.momentum;
        if m.at_risk_days <= 0 || m.stalled_days <= m.at_risk_days {
            return Err(ConfigError::Invalid(format!(
                "momentum.at_risk_days ({}) must be positive and below momentum.stalled_days ({})",
                m.at_risk_days, m.stalled_days
            )));
        }
        if m.weights.total() <= 0.0 {
            return Err(ConfigError::Invalid(
                "momentum.weights must have a positive sum".to_string(),
            ));
        }
        if m.recency_half_life_days <= 0.0 || m.frequency_reference == 0 {
            return Err(ConfigError::Invalid(
                "momentum.recency_half_life_days and momentum.frequency_reference must be positive"
                    .to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&m.low_water_mark) {
            return Err(ConfigError::Invalid(
                "momentum.low_water_mark must be within [0, 1]".to_string(),
            ));
        }
        if self.sync.file_extension.trim().trim_start_matches('.').is_empty() {
            return Err(ConfigError::Invalid(
                "sync.file_extension cannot be empty".to_string(),
            ));
        }
        if self.sync.conflict_tolerance_ms > MAX_CONFLICT_TOLERANCE_MS {
            return Err(ConfigError::Invalid(format!(
                "sync.conflict_tolerance_ms ({}) cannot exceed {}",
                self.sync.conflict_tolerance_ms, MAX_CONFLICT_TOLERANCE_MS
            )));
        }
        if regex::Regex::new(&self.watch.folder_pattern).is_err() {
            return Err(ConfigError::Invalid(format!(
                "watch.folder_pattern `{}` is not a valid regex",
                self.watch.folder_pattern
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("momentum.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory for rolling log files; stderr when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level(),
            log_dir: None,
        }
    }
}

/// One day. Wider windows would hide every real conflict.
pub const MAX_CONFLICT_TOLERANCE_MS: u64 = 86_400_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Tracked file extension, without the dot.
    pub file_extension: String,
    /// Window absorbing clock/filesystem granularity when comparing the
    /// file mtime with the store's last update.
    pub conflict_tolerance_ms: u64,
    /// Upper bound on waiting for another sync of the same file.
    pub lock_timeout_ms: u64,
    /// Write markers back right after a pull adopts unmarked items.
    pub stamp_new_markers: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            file_extension: "md".to_string(),
            conflict_tolerance_ms: 2_000,
            lock_timeout_ms: 5_000,
            stamp_new_markers: true,
        }
    }
}

impl SyncConfig {
    pub fn extension(&self) -> &str {
        self.file_extension.trim().trim_start_matches('.')
    }

    /// `conflict_tolerance_ms`, capped at [`MAX_CONFLICT_TOLERANCE_MS`] for
    /// configs built in code without [`EngineConfig::validate`].
    pub fn conflict_tolerance(&self) -> chrono::Duration {
        let ms = self.conflict_tolerance_ms.min(MAX_CONFLICT_TOLERANCE_MS);
        chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub roots: Vec<PathBuf>,
    pub debounce_ms: u64,
    pub folder_debounce_ms: u64,
    /// Folder names matching this regex register an area. A `name` capture
    /// group, when present, supplies the area name.
    pub folder_pattern: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            debounce_ms: 1_500,
            folder_debounce_ms: 5_000,
            folder_pattern: r"^\d{2}[ _-](?P<name>.+)$".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumWeights {
    pub recency: f64,
    pub completion: f64,
    pub next_action: f64,
    pub frequency: f64,
}

impl Default for MomentumWeights {
    fn default() -> Self {
        Self {
            recency: 0.35,
            completion: 0.30,
            next_action: 0.20,
            frequency: 0.15,
        }
    }
}

impl MomentumWeights {
    pub fn total(&self) -> f64 {
        self.recency.max(0.0)
            + self.completion.max(0.0)
            + self.next_action.max(0.0)
            + self.frequency.max(0.0)
    }

    /// Returns weights scaled to sum to 1.0 (defaults when the sum is zero).
    pub fn normalized(&self) -> Self {
        let total = self.total();
        if total <= 0.0 {
            return Self::default();
        }
        Self {
            recency: self.recency.max(0.0) / total,
            completion: self.completion.max(0.0) / total,
            next_action: self.next_action.max(0.0) / total,
            frequency: self.frequency.max(0.0) / total,
        }
    }
}

/// One band of the completion sliding window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionTier {
    /// Completions at most this many days old fall in this tier.
    pub max_age_days: i64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub weights: MomentumWeights,
    pub recency_half_life_days: f64,
    /// Ordered by `max_age_days` ascending.
    pub completion_tiers: Vec<CompletionTier>,
    /// Weighted completions that saturate the completion factor.
    pub completion_target: f64,
    pub next_action_fresh_days: i64,
    pub next_action_stale_days: i64,
    pub frequency_window_days: i64,
    /// Event count mapped to a frequency factor of 1.0.
    pub frequency_reference: u32,
    pub at_risk_days: i64,
    pub stalled_days: i64,
    pub low_water_mark: f64,
    pub trend_dead_zone: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            weights: MomentumWeights::default(),
            recency_half_life_days: 3.0,
            completion_tiers: vec![
                CompletionTier {
                    max_age_days: 7,
                    weight: 1.0,
                },
                CompletionTier {
                    max_age_days: 14,
                    weight: 0.5,
                },
                CompletionTier {
                    max_age_days: 30,
                    weight: 0.25,
                },
            ],
            completion_target: 5.0,
            next_action_fresh_days: 3,
            next_action_stale_days: 14,
            frequency_window_days: 14,
            frequency_reference: 20,
            at_risk_days: 7,
            stalled_days: 14,
            low_water_mark: 0.2,
            trend_dead_zone: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub due_horizon_days: i64,
    pub high_momentum: f64,
    pub medium_momentum: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            due_horizon_days: 2,
            high_momentum: 0.7,
            medium_momentum: 0.4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig, MomentumWeights, SyncConfig, MAX_CONFLICT_TOLERANCE_MS};

    #[test]
    fn empty_toml_yields_defaults() {
        let config = EngineConfig::from_toml_str("").expect("empty config should parse");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_toml_str(
            "[momentum]\nstalled_days = 21\n\n[sync]\nconflict_tolerance_ms = 500\n",
        )
        .expect("partial config should parse");
        assert_eq!(config.momentum.stalled_days, 21);
        assert_eq!(config.momentum.at_risk_days, 7);
        assert_eq!(config.sync.conflict_tolerance_ms, 500);
        assert_eq!(config.sync.file_extension, "md");
    }

    #[test]
    fn rejects_inverted_inactivity_thresholds() {
        let err = EngineConfig::from_toml_str("[momentum]\nat_risk_days = 20\nstalled_days = 10\n")
            .expect_err("inverted thresholds must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_conflict_tolerance_beyond_a_day() {
        let err = EngineConfig::from_toml_str("[sync]\nconflict_tolerance_ms = 9223372036854775807\n")
            .expect_err("huge tolerance must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn oversized_tolerance_in_code_is_capped() {
        let sync = SyncConfig {
            conflict_tolerance_ms: u64::MAX,
            ..SyncConfig::default()
        };
        assert_eq!(
            sync.conflict_tolerance(),
            chrono::Duration::milliseconds(MAX_CONFLICT_TOLERANCE_MS as i64)
        );
        assert_eq!(
            SyncConfig::default().conflict_tolerance(),
            chrono::Duration::seconds(2)
        );
    }

    #[test]
    fn weights_normalize_to_one() {
        let weights = MomentumWeights {
            recency: 2.0,
            completion: 1.0,
            next_action: 1.0,
            frequency: 0.0,
        }
        .normalized();
        let total = weights.recency + weights.completion + weights.next_action + weights.frequency;
        assert!((total - 1.0).abs() < 1e-9);
        assert!((weights.recency - 0.5).abs() < 1e-9);
    }
}
