//! Metric registry: direction, sensitivity category, and channel accessors per KPI.
//!
//! Adding a monitored metric is one entry in [`builtin_specs`]; detection and
//! attribution read everything they need from the entry.

use crate::util::ratio;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;

/// Which side of the distribution is "bad" for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricDirection {
    /// Higher is better; only drops are anomalous.
    Positive,
    /// Lower is better; only rises are anomalous.
    Negative,
    Neutral,
}

impl MetricDirection {
    /// True when moving by `delta` makes the metric worse.
    pub fn worsens(self, delta: f64) -> bool {
        match self {
            MetricDirection::Positive => delta < 0.0,
            MetricDirection::Negative => delta > 0.0,
            MetricDirection::Neutral => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricDirection::Positive => "positive",
            MetricDirection::Negative => "negative",
            MetricDirection::Neutral => "neutral",
        }
    }
}

/// Noise-tolerance class; selects the sensitivity thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricCategory {
    /// Revenue per user.
    Revenue,
    /// Core volume and cost KPIs.
    Core,
    Retention,
    /// Audience composition ratios.
    Demographic,
    /// Funnel conversion rates.
    Conversion,
    Default,
}

/// How per-channel values roll up into the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Additive count: aggregate is the sum of channel values.
    Sum,
    /// Rate or average: aggregate is the volume-weighted mean, which equals
    /// the ratio of raw totals when `value = numerator / volume`.
    Ratio,
}

/// Preferred ranking key for attributed channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    SeverityScore,
    /// `|contribution%|`, used only while the aggregate delta is non-zero.
    Contribution,
}

/// Raw additive counters one channel reports for one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelCounts {
    pub total_users: f64,
    pub good_users: f64,
    /// Good and verified users.
    pub quality_users: f64,
    pub cost: f64,
    pub revenue: f64,
    /// Quality users active again the next day.
    pub retained_users: f64,
    pub female_users: f64,
    pub young_users: f64,
    pub high_tier_users: f64,
}

impl AddAssign<&ChannelCounts> for ChannelCounts {
    fn add_assign(&mut self, o: &ChannelCounts) {
        self.total_users += o.total_users;
        self.good_users += o.good_users;
        self.quality_users += o.quality_users;
        self.cost += o.cost;
        self.revenue += o.revenue;
        self.retained_users += o.retained_users;
        self.female_users += o.female_users;
        self.young_users += o.young_users;
        self.high_tier_users += o.high_tier_users;
    }
}

/// Reads a metric value and its attribution volume out of raw counters.
#[derive(Clone, Copy)]
pub struct ChannelAccessor {
    pub value: fn(&ChannelCounts) -> Option<f64>,
    pub volume: fn(&ChannelCounts) -> f64,
}

impl std::fmt::Debug for ChannelAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChannelAccessor")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricSpec {
    pub display_name: &'static str,
    /// Unit used in reason strings ("users", "CNY", "pp").
    pub unit: &'static str,
    pub direction: MetricDirection,
    pub category: MetricCategory,
    /// Channels below this volume are noise and excluded from attribution.
    pub min_volume: f64,
    pub aggregation: Aggregation,
    pub rank_by: RankBy,
    /// Confidence weight of a channel attribution for this metric, in `[0.3, 0.8]`.
    pub attribution_specificity: f64,
    /// Value is only final a day later (next-day retention).
    pub lagged: bool,
    pub accessor: Option<ChannelAccessor>,
}

impl MetricSpec {
    /// Entry used for ids missing from the registry.
    pub const FALLBACK: MetricSpec = MetricSpec {
        display_name: "",
        unit: "",
        direction: MetricDirection::Neutral,
        category: MetricCategory::Default,
        min_volume: 50.0,
        aggregation: Aggregation::Ratio,
        rank_by: RankBy::SeverityScore,
        attribution_specificity: 0.3,
        lagged: false,
        accessor: None,
    };

    /// Metric value computed from (possibly summed) raw counters.
    pub fn value_of(&self, counts: &ChannelCounts) -> Option<f64> {
        self.accessor.and_then(|a| (a.value)(counts))
    }

    pub fn volume_of(&self, counts: &ChannelCounts) -> f64 {
        self.accessor.map(|a| (a.volume)(counts)).unwrap_or(0.0)
    }
}

fn quality_volume(c: &ChannelCounts) -> f64 {
    c.quality_users
}

fn total_volume(c: &ChannelCounts) -> f64 {
    c.total_users
}

fn good_volume(c: &ChannelCounts) -> f64 {
    c.good_users
}

fn pct(num: f64, den: f64) -> Option<f64> {
    ratio(num, den).map(|r| r * 100.0)
}

#[allow(clippy::too_many_arguments)]
fn spec(
    display_name: &'static str,
    unit: &'static str,
    direction: MetricDirection,
    category: MetricCategory,
    min_volume: f64,
    aggregation: Aggregation,
    rank_by: RankBy,
    attribution_specificity: f64,
    lagged: bool,
    accessor: ChannelAccessor,
) -> MetricSpec {
    MetricSpec {
        display_name,
        unit,
        direction,
        category,
        min_volume,
        aggregation,
        rank_by,
        attribution_specificity,
        lagged,
        accessor: Some(accessor),
    }
}

/// The monitored KPI table.
pub fn builtin_specs() -> Vec<(&'static str, MetricSpec)> {
    use Aggregation::*;
    use MetricCategory::*;
    use MetricDirection::*;
    use RankBy::*;
    vec![
        (
            "quality_users",
            spec(
                "Quality users",
                "users",
                Positive,
                Core,
                50.0,
                Sum,
                SeverityScore,
                0.8,
                false,
                ChannelAccessor {
                    value: |c| Some(c.quality_users),
                    volume: quality_volume,
                },
            ),
        ),
        (
            "cpa",
            spec(
                "CPA",
                "CNY",
                Negative,
                Core,
                50.0,
                Ratio,
                SeverityScore,
                0.8,
                false,
                ChannelAccessor {
                    value: |c| {
                        if c.cost > 0.0 {
                            ratio(c.cost, c.quality_users)
                        } else {
                            None
                        }
                    },
                    volume: quality_volume,
                },
            ),
        ),
        (
            "arpu",
            spec(
                "ARPU",
                "CNY",
                Positive,
                Revenue,
                50.0,
                Ratio,
                Contribution,
                0.8,
                false,
                ChannelAccessor {
                    value: |c| ratio(c.revenue, c.quality_users),
                    volume: quality_volume,
                },
            ),
        ),
        (
            "retention_rate",
            spec(
                "Next-day retention",
                "pp",
                Positive,
                Retention,
                50.0,
                Ratio,
                SeverityScore,
                0.5,
                true,
                ChannelAccessor {
                    value: |c| pct(c.retained_users, c.quality_users),
                    volume: quality_volume,
                },
            ),
        ),
        (
            "female_ratio",
            spec(
                "Female share",
                "pp",
                Positive,
                Demographic,
                50.0,
                Ratio,
                SeverityScore,
                0.5,
                false,
                ChannelAccessor {
                    value: |c| pct(c.female_users, c.quality_users),
                    volume: quality_volume,
                },
            ),
        ),
        (
            "young_ratio",
            spec(
                "Young share",
                "pp",
                Negative,
                Demographic,
                50.0,
                Ratio,
                SeverityScore,
                0.5,
                false,
                ChannelAccessor {
                    value: |c| pct(c.young_users, c.quality_users),
                    volume: quality_volume,
                },
            ),
        ),
        (
            "high_tier_ratio",
            spec(
                "High-tier city share",
                "pp",
                Negative,
                Demographic,
                50.0,
                Ratio,
                SeverityScore,
                0.5,
                false,
                ChannelAccessor {
                    value: |c| pct(c.high_tier_users, c.quality_users),
                    volume: quality_volume,
                },
            ),
        ),
        (
            "good_rate",
            spec(
                "Good rate",
                "pp",
                Positive,
                Conversion,
                100.0,
                Ratio,
                Contribution,
                0.8,
                false,
                ChannelAccessor {
                    value: |c| pct(c.good_users, c.total_users),
                    volume: total_volume,
                },
            ),
        ),
        (
            "verified_rate",
            spec(
                "Verified rate",
                "pp",
                Positive,
                Conversion,
                100.0,
                Ratio,
                Contribution,
                0.8,
                false,
                ChannelAccessor {
                    value: |c| pct(c.quality_users, c.good_users),
                    volume: good_volume,
                },
            ),
        ),
        (
            "quality_rate",
            spec(
                "Quality rate",
                "pp",
                Positive,
                Conversion,
                100.0,
                Ratio,
                SeverityScore,
                0.8,
                false,
                ChannelAccessor {
                    value: |c| pct(c.quality_users, c.total_users),
                    volume: total_volume,
                },
            ),
        ),
    ]
}

/// Lookup table from metric id to [`MetricSpec`]. Immutable once built.
#[derive(Debug, Clone)]
pub struct Registry {
    specs: BTreeMap<String, MetricSpec>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    pub fn builtin() -> Self {
        Self {
            specs: builtin_specs()
                .into_iter()
                .map(|(id, s)| (id.to_string(), s))
                .collect(),
        }
    }

    /// Registry with per-metric direction and minimum-volume overrides applied.
    /// Overrides for unknown ids add a neutral-default entry with the override.
    pub fn with_overrides(
        mut self,
        directions: &BTreeMap<String, MetricDirection>,
        min_volume: &BTreeMap<String, f64>,
    ) -> Self {
        for (id, dir) in directions {
            self.specs
                .entry(crate::util::normalize_id(id))
                .or_insert(MetricSpec::FALLBACK)
                .direction = *dir;
        }
        for (id, v) in min_volume {
            self.specs
                .entry(crate::util::normalize_id(id))
                .or_insert(MetricSpec::FALLBACK)
                .min_volume = *v;
        }
        self
    }

    pub fn get(&self, metric_id: &str) -> Option<&MetricSpec> {
        self.specs.get(&crate::util::normalize_id(metric_id))
    }

    /// Entry for `metric_id`, or the neutral fallback with a configuration warning.
    pub fn resolve(&self, metric_id: &str) -> MetricSpec {
        match self.get(metric_id) {
            Some(s) => *s,
            None => {
                tracing::warn!(
                    "no direction mapping for metric {}; treating as neutral",
                    metric_id
                );
                MetricSpec::FALLBACK
            }
        }
    }

    pub fn classify(&self, metric_id: &str) -> MetricDirection {
        self.resolve(metric_id).direction
    }

    /// Display name, falling back to the id itself.
    pub fn display_name<'a>(&self, metric_id: &'a str) -> &'a str {
        match self.get(metric_id) {
            Some(s) if !s.display_name.is_empty() => s.display_name,
            _ => metric_id,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricSpec)> {
        self.specs.iter().map(|(k, v)| (k.as_str(), v))
    }
}
