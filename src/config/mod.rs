//! Engine configuration: thresholds, window sizes, and per-metric overrides.

use crate::registry::{MetricCategory, MetricDirection};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Default IQR multiplier `k` for the anomaly bounds.
pub const DEFAULT_IQR_MULTIPLIER: f64 = 1.5;

/// Minimum number of historical points before detection runs.
pub const DEFAULT_MIN_HISTORY: usize = 6;

/// Days of history fetched ahead of the evaluated date.
pub const DEFAULT_HISTORY_DAYS: u32 = 14;

/// IQR below this is floored to `max(floor, 0.5 * stddev)`.
pub const DEFAULT_IQR_FLOOR: f64 = 0.1;

/// `|current - median| / median` above this tags a serious anomaly `high`.
pub const DEFAULT_HIGH_SEVERITY_RATIO: f64 = 0.3;

/// Channels kept in a root-cause report.
pub const DEFAULT_TOP_N: usize = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Sensitivity thresholds for one metric category, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SensitivityThresholds {
    /// Day-over-day change that counts as a worsening move.
    pub day_over_day_pct: f64,
    /// Deviation from the recent mean that counts as a worsening move.
    pub mean_deviation_pct: f64,
}

impl SensitivityThresholds {
    pub const fn new(day_over_day_pct: f64, mean_deviation_pct: f64) -> Self {
        Self {
            day_over_day_pct,
            mean_deviation_pct,
        }
    }

    /// Built-in thresholds per category. Revenue per user is the tightest,
    /// audience composition the loosest.
    pub fn for_category(category: MetricCategory) -> Self {
        match category {
            MetricCategory::Revenue => Self::new(5.0, 3.0),
            MetricCategory::Core => Self::new(8.0, 5.0),
            MetricCategory::Retention => Self::new(6.0, 4.0),
            MetricCategory::Demographic => Self::new(10.0, 6.0),
            MetricCategory::Conversion => Self::new(7.0, 5.0),
            MetricCategory::Default => Self::new(8.0, 5.0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub iqr_multiplier: f64,
    pub min_history: usize,
    pub history_days: u32,
    pub iqr_floor: f64,
    pub high_severity_ratio: f64,
    pub top_n: usize,
    /// Per-category threshold overrides; categories not listed use the built-ins.
    pub sensitivity: BTreeMap<MetricCategory, SensitivityThresholds>,
    /// Per-metric minimum channel volume overrides.
    pub min_volume: BTreeMap<String, f64>,
    /// Per-metric direction overrides.
    pub directions: BTreeMap<String, MetricDirection>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            iqr_multiplier: DEFAULT_IQR_MULTIPLIER,
            min_history: DEFAULT_MIN_HISTORY,
            history_days: DEFAULT_HISTORY_DAYS,
            iqr_floor: DEFAULT_IQR_FLOOR,
            high_severity_ratio: DEFAULT_HIGH_SEVERITY_RATIO,
            top_n: DEFAULT_TOP_N,
            sensitivity: BTreeMap::new(),
            min_volume: BTreeMap::new(),
            directions: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml(&s)
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let cfg: EngineConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.iqr_multiplier >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "iqr_multiplier must be >= 0, got {}",
                self.iqr_multiplier
            )));
        }
        if !(self.iqr_floor > 0.0) {
            return Err(ConfigError::Invalid("iqr_floor must be > 0".to_string()));
        }
        if self.min_history < 1 {
            return Err(ConfigError::Invalid("min_history must be >= 1".to_string()));
        }
        if (self.history_days as usize) < self.min_history {
            return Err(ConfigError::Invalid(format!(
                "history_days ({}) is shorter than min_history ({})",
                self.history_days, self.min_history
            )));
        }
        if self.top_n == 0 {
            return Err(ConfigError::Invalid("top_n must be >= 1".to_string()));
        }
        for (cat, t) in &self.sensitivity {
            if t.day_over_day_pct < 0.0 || t.mean_deviation_pct < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "negative sensitivity threshold for {:?}",
                    cat
                )));
            }
        }
        for (id, v) in &self.min_volume {
            if *v < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "negative min_volume for {}",
                    id
                )));
            }
        }
        Ok(())
    }

    pub fn thresholds(&self, category: MetricCategory) -> SensitivityThresholds {
        self.sensitivity
            .get(&category)
            .copied()
            .unwrap_or_else(|| SensitivityThresholds::for_category(category))
    }
}
