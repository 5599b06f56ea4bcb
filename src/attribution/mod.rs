//! Channel attribution: which sub-populations moved the aggregate.
//!
//! One generic routine serves every metric; the per-metric differences
//! (aggregation, volume floor, ranking preference, thresholds) come from
//! [`AttributionParams`], which is built from the registry entry.

use crate::anomaly::AnomalyRecord;
use crate::config::{EngineConfig, SensitivityThresholds};
use crate::registry::{Aggregation, MetricDirection, MetricSpec, RankBy};
use crate::util::ratio;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Aggregate deltas within this relative tolerance of the previous value count as zero.
const STABLE_DELTA: f64 = 1e-9;

/// A channel whose volume share exceeds this is called out as influential.
const INFLUENTIAL_WEIGHT: f64 = 0.1;

/// One channel's value on the evaluated day and the day before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSample {
    pub channel: String,
    pub current: f64,
    /// `None` when the channel had no usable value the previous day.
    pub previous: Option<f64>,
    /// Current-day volume: attribution denominator and sample-size filter.
    pub volume: f64,
    #[serde(default)]
    pub previous_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelContribution {
    pub channel: String,
    pub current: f64,
    pub previous: f64,
    pub delta: f64,
    pub volume: f64,
    /// Share of retained volume, in `[0, 1]`.
    pub weight: f64,
    pub weighted_impact: f64,
    /// `weighted_impact / |overall_delta| * 100`, or 0 when the aggregate did not move.
    pub contribution_pct: f64,
    pub severity_score: f64,
    pub reasons: Vec<String>,
}

/// Ranked channels for one metric, before confidence aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAttribution {
    pub metric: String,
    pub overall_current: f64,
    pub overall_previous: f64,
    pub overall_delta: f64,
    /// Aggregate moved in the bad direction for this metric.
    pub worsened: bool,
    /// Channels that passed the volume filter.
    pub channels_considered: usize,
    /// Top-N contributors, best first.
    pub contributions: Vec<ChannelContribution>,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct AttributionParams {
    pub display_name: String,
    pub unit: &'static str,
    pub direction: MetricDirection,
    pub aggregation: Aggregation,
    pub rank_by: RankBy,
    pub min_volume: f64,
    pub top_n: usize,
    pub thresholds: SensitivityThresholds,
}

impl AttributionParams {
    pub fn from_spec(display_name: &str, spec: &MetricSpec, cfg: &EngineConfig) -> Self {
        Self {
            display_name: display_name.to_string(),
            unit: spec.unit,
            direction: spec.direction,
            aggregation: spec.aggregation,
            rank_by: spec.rank_by,
            min_volume: spec.min_volume,
            top_n: cfg.top_n,
            thresholds: cfg.thresholds(spec.category),
        }
    }
}

/// Previous value used for the channel delta. A count absent yesterday was
/// zero; a rate absent yesterday is undefined and yields no delta.
fn previous_for(sample: &ChannelSample, aggregation: Aggregation) -> f64 {
    match aggregation {
        Aggregation::Sum => sample.previous.unwrap_or(0.0),
        Aggregation::Ratio => sample.previous.unwrap_or(sample.current),
    }
}

/// Aggregate current and previous values from the raw totals of `retained`.
fn overall(retained: &[&ChannelSample], aggregation: Aggregation) -> (f64, f64) {
    match aggregation {
        Aggregation::Sum => (
            retained.iter().map(|s| s.current).sum(),
            retained.iter().map(|s| s.previous.unwrap_or(0.0)).sum(),
        ),
        Aggregation::Ratio => {
            let vol: f64 = retained.iter().map(|s| s.volume).sum();
            let num: f64 = retained.iter().map(|s| s.current * s.volume).sum();
            let current = ratio(num, vol).unwrap_or(0.0);
            let (prev_num, prev_vol) = retained
                .iter()
                .filter_map(|s| s.previous.map(|p| (p * s.previous_volume, s.previous_volume)))
                .fold((0.0, 0.0), |(n, v), (pn, pv)| (n + pn, v + pv));
            let previous = ratio(prev_num, prev_vol).unwrap_or(current);
            (current, previous)
        }
    }
}

fn fmt_signed(v: f64) -> String {
    format!("{:+.2}", v)
}

fn channel_reasons(
    c: &ChannelContribution,
    overall_current: f64,
    params: &AttributionParams,
) -> Vec<String> {
    let mut reasons = Vec::new();
    let unit = params.unit;
    if params.aggregation == Aggregation::Ratio {
        let gap = c.current - overall_current;
        let bad_side = match params.direction {
            MetricDirection::Positive => gap < 0.0,
            MetricDirection::Negative => gap > 0.0,
            MetricDirection::Neutral => gap != 0.0,
        };
        if bad_side {
            let side = if gap > 0.0 { "above" } else { "below" };
            reasons.push(format!(
                "{:.2} {}, {:.2} {} {} aggregate",
                c.current,
                unit,
                gap.abs(),
                unit,
                side
            ));
        }
    }
    if c.previous != 0.0 {
        let change = (c.current - c.previous) / c.previous.abs() * 100.0;
        if change.abs() > params.thresholds.day_over_day_pct {
            reasons.push(format!("{:+.1}% change vs prior day", change));
        }
    }
    if c.weight > INFLUENTIAL_WEIGHT {
        reasons.push(format!("{:.1}% of volume, high influence", c.weight * 100.0));
    }
    if reasons.is_empty() {
        reasons.push(format!(
            "weighted impact {} {}",
            fmt_signed(c.weighted_impact),
            unit
        ));
    }
    reasons
}

fn summarize(
    params: &AttributionParams,
    overall_current: f64,
    overall_previous: f64,
    overall_delta: f64,
    contributions: &[ChannelContribution],
) -> String {
    let movement = if overall_delta > 0.0 {
        "rose"
    } else if overall_delta < 0.0 {
        "fell"
    } else {
        "was flat"
    };
    let head = format!(
        "{} {} from {:.2} to {:.2}",
        params.display_name, movement, overall_previous, overall_current
    );
    if contributions.is_empty() {
        return format!("{}; no channel-level contributor identified", head);
    }
    let names: Vec<String> = contributions
        .iter()
        .map(|c| {
            if overall_delta != 0.0 {
                format!("{} ({:+.1}%)", c.channel, c.contribution_pct)
            } else {
                format!("{} (score {:.2})", c.channel, c.severity_score)
            }
        })
        .collect();
    format!("{}; top contributors: {}", head, names.join(", "))
}

/// Rank channels by their weighted contribution to the aggregate move.
///
/// Channels below `min_volume` (or with non-finite values) are dropped first.
/// When the aggregate worsened, only channels that themselves moved in the
/// worsening direction are kept.
pub fn rank_channels(
    anomaly: &AnomalyRecord,
    samples: &[ChannelSample],
    params: &AttributionParams,
) -> ChannelAttribution {
    let retained: Vec<&ChannelSample> = samples
        .iter()
        .filter(|s| {
            s.volume > 0.0
                && s.volume >= params.min_volume
                && s.current.is_finite()
                && s.previous.map_or(true, f64::is_finite)
        })
        .collect();

    let (overall_current, overall_previous) = overall(&retained, params.aggregation);
    // Ratio-of-totals arithmetic leaves float residue when channels merely trade places.
    let raw_delta = overall_current - overall_previous;
    let overall_delta = if raw_delta.abs() <= STABLE_DELTA * overall_previous.abs().max(1.0) {
        0.0
    } else {
        raw_delta
    };
    let total_volume: f64 = retained.iter().map(|s| s.volume).sum();
    let worsened = params.direction.worsens(overall_delta);

    let mut contributions: Vec<ChannelContribution> = retained
        .iter()
        .map(|s| {
            let previous = previous_for(s, params.aggregation);
            let delta = s.current - previous;
            let weight = ratio(s.volume, total_volume).unwrap_or(0.0);
            let weighted_impact = delta * weight;
            let contribution_pct = if overall_delta != 0.0 {
                weighted_impact / overall_delta.abs() * 100.0
            } else {
                0.0
            };
            ChannelContribution {
                channel: s.channel.clone(),
                current: s.current,
                previous,
                delta,
                volume: s.volume,
                weight,
                weighted_impact,
                contribution_pct,
                severity_score: weighted_impact.abs() * (1.0 + weight * 10.0),
                reasons: Vec::new(),
            }
        })
        .collect();

    if worsened {
        contributions.retain(|c| params.direction.worsens(c.contribution_pct));
    }

    let moved = overall_delta != 0.0;
    let by_contribution = moved && (!worsened || params.rank_by == RankBy::Contribution);
    contributions.sort_by(|a, b| {
        let primary = if by_contribution {
            b.contribution_pct.abs().partial_cmp(&a.contribution_pct.abs())
        } else {
            b.severity_score.partial_cmp(&a.severity_score)
        };
        primary
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.severity_score
                    .partial_cmp(&a.severity_score)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.channel.cmp(&b.channel))
    });
    contributions.truncate(params.top_n);
    for c in &mut contributions {
        c.reasons = channel_reasons(c, overall_current, params);
    }

    let summary = summarize(
        params,
        overall_current,
        overall_previous,
        overall_delta,
        &contributions,
    );
    tracing::debug!(
        "attribution {}: overall {:.4} -> {:.4}, {} of {} channel(s) ranked",
        anomaly.metric,
        overall_previous,
        overall_current,
        contributions.len(),
        retained.len()
    );

    ChannelAttribution {
        metric: anomaly.metric.clone(),
        overall_current,
        overall_previous,
        overall_delta,
        worsened,
        channels_considered: retained.len(),
        contributions,
        summary,
    }
}

/// Attribute an anomaly to channels and wrap the result in a root-cause report
/// that carries the channel dimension only.
pub fn attribute(
    anomaly: &AnomalyRecord,
    samples: &[ChannelSample],
    params: &AttributionParams,
    specificity: f64,
) -> crate::confidence::RootCauseReport {
    let attribution = rank_channels(anomaly, samples, params);
    crate::confidence::build_report(
        anomaly,
        attribution,
        specificity,
        &crate::confidence::SecondarySignals::default(),
    )
}
