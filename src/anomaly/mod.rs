//! Quartile anomaly detection with direction-aware classification.

pub mod sensitivity;

use crate::config::EngineConfig;
use crate::registry::{MetricDirection, MetricSpec};
use crate::stats;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    None,
    /// Caught by the sensitivity heuristics only.
    Sensitive,
    /// Outside the IQR bounds on the bad side.
    Serious,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviationDirection {
    Increase,
    Decrease,
}

impl DeviationDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviationDirection::Increase => "increase",
            DeviationDirection::Decrease => "decrease",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Sensitive,
}

/// Context recorded when the sensitivity heuristics fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitiveDetails {
    pub previous_value: f64,
    pub daily_change_pct: f64,
    pub recent_mean: f64,
    pub recent_min: f64,
    pub recent_max: f64,
    /// Number of recent values the heuristics looked at.
    pub window: usize,
    pub has_daily_change: bool,
    pub has_extreme_value: bool,
    pub has_mean_deviation: bool,
}

/// Result of evaluating one metric on one day. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub metric: String,
    pub metric_direction: MetricDirection,
    pub current_value: f64,
    pub history_len: usize,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    /// Effective IQR after flooring.
    pub iqr: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Distance outside the nearer bound in IQR units (0 inside the bounds).
    pub deviation_iqr: f64,
    pub classification: Classification,
    pub direction: DeviationDirection,
    pub reasons: Vec<String>,
    /// `None` when classification is `None`.
    pub severity: Option<Severity>,
    pub sensitive_details: Option<SensitiveDetails>,
    /// Day the value belongs to; set by the engine, which may step back a day
    /// for lagged metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_on: Option<NaiveDate>,
}

impl AnomalyRecord {
    pub fn is_anomalous(&self) -> bool {
        self.classification != Classification::None
    }
}

/// IQR-based detector. Pure: identical inputs give identical records.
#[derive(Debug, Clone, Copy)]
pub struct QuartileDetector {
    pub multiplier: f64,
    pub iqr_floor: f64,
    pub min_history: usize,
    pub high_severity_ratio: f64,
}

impl Default for QuartileDetector {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl QuartileDetector {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            multiplier: cfg.iqr_multiplier,
            iqr_floor: cfg.iqr_floor,
            min_history: cfg.min_history,
            high_severity_ratio: cfg.high_severity_ratio,
        }
    }

    /// Classify `current` against `history` (which must exclude the evaluated day).
    /// Returns `None` when history is shorter than `min_history`.
    pub fn detect(
        &self,
        metric_id: &str,
        direction: MetricDirection,
        current: f64,
        history: &[f64],
    ) -> Option<AnomalyRecord> {
        let history: Vec<f64> = history.iter().copied().filter(|v| v.is_finite()).collect();
        if history.len() < self.min_history || !current.is_finite() {
            return None;
        }
        let q1 = stats::percentile(&history, 25.0)?;
        let median = stats::median(&history)?;
        let q3 = stats::percentile(&history, 75.0)?;
        let mut iqr = q3 - q1;
        if iqr < self.iqr_floor {
            iqr = self.iqr_floor.max(0.5 * stats::std_dev(&history)?);
        }
        let lower = q1 - self.multiplier * iqr;
        let upper = q3 + self.multiplier * iqr;

        let below = current < lower;
        let above = current > upper;
        let serious = match direction {
            MetricDirection::Positive => below,
            MetricDirection::Negative => above,
            MetricDirection::Neutral => below || above,
        };
        let deviation_iqr = if below {
            (lower - current) / iqr
        } else if above {
            (current - upper) / iqr
        } else {
            0.0
        };
        let direction_of_move = if below || (!above && current < median) {
            DeviationDirection::Decrease
        } else {
            DeviationDirection::Increase
        };

        let (classification, severity, reasons) = if serious {
            let rel = if median != 0.0 {
                (current - median).abs() / median.abs()
            } else {
                0.0
            };
            let sev = if rel > self.high_severity_ratio {
                Severity::High
            } else {
                Severity::Medium
            };
            let side = if below { "below" } else { "above" };
            (
                Classification::Serious,
                Some(sev),
                vec![format!("out of IQR range ({})", side)],
            )
        } else {
            (Classification::None, None, Vec::new())
        };

        Some(AnomalyRecord {
            metric: metric_id.to_string(),
            metric_direction: direction,
            current_value: current,
            history_len: history.len(),
            median,
            q1,
            q3,
            iqr,
            lower_bound: lower,
            upper_bound: upper,
            deviation_iqr,
            classification,
            direction: direction_of_move,
            reasons,
            severity,
            sensitive_details: None,
            evaluated_on: None,
        })
    }
}

/// Quartile detection followed by the sensitivity heuristics when the
/// quartile test did not already flag the day as serious.
pub fn evaluate(
    metric_id: &str,
    spec: &MetricSpec,
    current: f64,
    history: &[f64],
    cfg: &EngineConfig,
) -> Option<AnomalyRecord> {
    let base = QuartileDetector::from_config(cfg).detect(metric_id, spec.direction, current, history)?;
    if base.classification == Classification::Serious {
        return Some(base);
    }
    let finite: Vec<f64> = history.iter().copied().filter(|v| v.is_finite()).collect();
    match sensitivity::check(
        spec.direction,
        current,
        &finite,
        cfg.thresholds(spec.category),
    ) {
        Some(out) => {
            let direction = if spec.direction == MetricDirection::Negative {
                DeviationDirection::Increase
            } else {
                DeviationDirection::Decrease
            };
            Some(AnomalyRecord {
                classification: Classification::Sensitive,
                severity: Some(Severity::Sensitive),
                direction,
                reasons: out.reasons,
                sensitive_details: Some(out.details),
                ..base
            })
        }
        None => Some(base),
    }
}
