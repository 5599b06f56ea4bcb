//! Multi-dimensional root-cause confidence.
//!
//! Channel attribution is one dimension; trend, channel-mix, and calendar
//! signals add supporting evidence. Each dimension that fires contributes
//! `significance * weight`; the sum is capped at 1.

pub mod signals;

use crate::anomaly::AnomalyRecord;
use crate::attribution::{ChannelAttribution, ChannelContribution};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const TREND_WEIGHT: f64 = 0.3;
pub const STRUCTURAL_WEIGHT: f64 = 0.2;
pub const EXTERNAL_WEIGHT: f64 = 0.2;

/// Significance a secondary signal must exceed to become a finding.
pub const TREND_MIN_SIGNIFICANCE: f64 = 0.15;
pub const STRUCTURAL_MIN_SIGNIFICANCE: f64 = 0.1;
pub const EXTERNAL_MIN_SIGNIFICANCE: f64 = 0.1;

/// Confidence reported when no dimension fired.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Sort key of a channel finding relative to secondary findings.
const CHANNEL_IMPACT: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    ChannelAttribution,
    Trend,
    Structural,
    External,
    /// Placeholder finding when nothing else fired.
    Baseline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLabel {
    Low,
    Medium,
    High,
}

impl ConfidenceLabel {
    pub fn from_score(score: f64) -> Self {
        if score > 0.7 {
            ConfidenceLabel::High
        } else if score > 0.4 {
            ConfidenceLabel::Medium
        } else {
            ConfidenceLabel::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLabel::Low => "low",
            ConfidenceLabel::Medium => "medium",
            ConfidenceLabel::High => "high",
        }
    }
}

/// Output of one secondary analysis, before the firing threshold is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub significance: f64,
    pub description: String,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecondarySignals {
    pub trend: Option<Signal>,
    pub structural: Option<Signal>,
    pub external: Option<Signal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub dimension: Dimension,
    pub description: String,
    pub details: Vec<String>,
    pub significance: f64,
    pub weight: f64,
    /// Ordering key within a report.
    pub impact_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseReport {
    pub metric: String,
    pub overall_current: f64,
    pub overall_previous: f64,
    pub overall_delta: f64,
    /// Top-N channels, best first.
    pub contributions: Vec<ChannelContribution>,
    /// Findings ordered by impact score, highest first.
    pub findings: Vec<Finding>,
    pub confidence: f64,
    pub confidence_label: ConfidenceLabel,
    pub summary: String,
}

/// Significance of the channel dimension: share of the aggregate move explained
/// by the ranked contributors, or 0.5 when the aggregate did not move.
fn channel_significance(attribution: &ChannelAttribution) -> f64 {
    if attribution.overall_delta == 0.0 {
        return 0.5;
    }
    let explained: f64 = attribution
        .contributions
        .iter()
        .map(|c| c.contribution_pct.abs())
        .sum();
    (explained / 100.0).min(1.0)
}

fn channel_finding(attribution: &ChannelAttribution, specificity: f64) -> Option<Finding> {
    if attribution.contributions.is_empty() {
        return None;
    }
    let details = attribution
        .contributions
        .iter()
        .map(|c| format!("{}: {}", c.channel, c.reasons.join("; ")))
        .collect();
    Some(Finding {
        dimension: Dimension::ChannelAttribution,
        description: attribution.summary.clone(),
        details,
        significance: channel_significance(attribution),
        weight: specificity.clamp(0.3, 0.8),
        impact_score: CHANNEL_IMPACT,
    })
}

fn secondary_finding(
    dimension: Dimension,
    signal: &Option<Signal>,
    min_significance: f64,
    weight: f64,
) -> Option<Finding> {
    let s = signal.as_ref()?;
    if s.significance <= min_significance {
        return None;
    }
    Some(Finding {
        dimension,
        description: s.description.clone(),
        details: s.details.clone(),
        significance: s.significance.min(1.0),
        weight,
        impact_score: s.significance.min(1.0),
    })
}

/// Collect the findings that fired and compute the capped confidence.
/// With no findings, returns a single baseline finding and [`FALLBACK_CONFIDENCE`].
pub fn aggregate(channel: Option<Finding>, secondary: &SecondarySignals) -> (Vec<Finding>, f64) {
    let mut findings: Vec<Finding> = [
        channel,
        secondary_finding(
            Dimension::Trend,
            &secondary.trend,
            TREND_MIN_SIGNIFICANCE,
            TREND_WEIGHT,
        ),
        secondary_finding(
            Dimension::Structural,
            &secondary.structural,
            STRUCTURAL_MIN_SIGNIFICANCE,
            STRUCTURAL_WEIGHT,
        ),
        secondary_finding(
            Dimension::External,
            &secondary.external,
            EXTERNAL_MIN_SIGNIFICANCE,
            EXTERNAL_WEIGHT,
        ),
    ]
    .into_iter()
    .flatten()
    .collect();

    if findings.is_empty() {
        return (
            vec![Finding {
                dimension: Dimension::Baseline,
                description: "basic analysis: needs manual review".to_string(),
                details: Vec::new(),
                significance: FALLBACK_CONFIDENCE,
                weight: 1.0,
                impact_score: FALLBACK_CONFIDENCE,
            }],
            FALLBACK_CONFIDENCE,
        );
    }

    let confidence = findings
        .iter()
        .map(|f| f.significance * f.weight)
        .sum::<f64>()
        .min(1.0);
    findings.sort_by(|a, b| {
        b.impact_score
            .partial_cmp(&a.impact_score)
            .unwrap_or(Ordering::Equal)
    });
    (findings, confidence)
}

/// Combine channel attribution and secondary signals into the final report.
pub fn build_report(
    anomaly: &AnomalyRecord,
    attribution: ChannelAttribution,
    specificity: f64,
    secondary: &SecondarySignals,
) -> RootCauseReport {
    let (findings, confidence) = aggregate(channel_finding(&attribution, specificity), secondary);
    let label = ConfidenceLabel::from_score(confidence);
    let lead = if attribution.contributions.is_empty() {
        findings
            .first()
            .map(|f| f.description.clone())
            .unwrap_or_else(|| attribution.summary.clone())
    } else {
        attribution.summary.clone()
    };
    let summary = format!("{} (confidence: {})", lead, label.as_str());
    tracing::debug!(
        "root cause {}: {} finding(s), confidence {:.2}",
        anomaly.metric,
        findings.len(),
        confidence
    );

    RootCauseReport {
        metric: anomaly.metric.clone(),
        overall_current: attribution.overall_current,
        overall_previous: attribution.overall_previous,
        overall_delta: attribution.overall_delta,
        contributions: attribution.contributions,
        findings,
        confidence,
        confidence_label: label,
        summary,
    }
}
