//! Per-metric pipeline over a [`MetricStore`]: detect, explain, batch.

use crate::anomaly::{self, AnomalyRecord};
use crate::attribution::{self, AttributionParams};
use crate::confidence::{self, signals, RootCauseReport, SecondarySignals};
use crate::config::EngineConfig;
use crate::registry::{MetricSpec, Registry};
use crate::stats;
use crate::store::{MetricStore, StoreError};
use crate::util::normalize_id;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Points of the series (ending at the evaluated day) the trend reading uses.
const TREND_POINTS: usize = 7;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient history: required {required}, got {got}")]
    InsufficientHistory { required: usize, got: usize },
    #[error("data fetch failed for {metric}: {source}")]
    DataFetch {
        metric: String,
        #[source]
        source: StoreError,
    },
}

fn fetch_err(metric: &str) -> impl FnOnce(StoreError) -> EngineError + '_ {
    move |source| EngineError::DataFetch {
        metric: metric.to_string(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Normal,
    Anomalous,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricOutcome {
    pub status: OutcomeStatus,
    /// Day actually evaluated; differs from the batch date for lagged metrics.
    pub evaluated_date: Option<NaiveDate>,
    pub anomaly: Option<AnomalyRecord>,
    pub root_cause: Option<RootCauseReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotEvaluated {
    pub metric: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub date: NaiveDate,
    pub outcomes: BTreeMap<String, MetricOutcome>,
    /// Metrics whose data could not be fetched.
    pub not_evaluated: Vec<NotEvaluated>,
}

impl BatchReport {
    pub fn anomalies(&self) -> impl Iterator<Item = (&str, &MetricOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.status == OutcomeStatus::Anomalous)
            .map(|(k, v)| (k.as_str(), v))
    }
}

/// Detection and attribution over one store. Holds no mutable state, so every
/// call is a function of the store contents and the configuration.
pub struct Engine<S> {
    store: S,
    registry: Registry,
    config: EngineConfig,
}

impl<S: MetricStore> Engine<S> {
    /// Built-in registry with the configuration's direction and volume overrides.
    pub fn new(store: S, config: EngineConfig) -> Self {
        let registry = Registry::builtin().with_overrides(&config.directions, &config.min_volume);
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn with_registry(store: S, registry: Registry, config: EngineConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current value and the day it belongs to. Lagged metrics step back one
    /// day when the report date has no final value yet.
    fn resolve_current(
        &self,
        metric: &str,
        spec: &MetricSpec,
        date: NaiveDate,
    ) -> Result<(NaiveDate, f64), EngineError> {
        let current = self
            .store
            .current_value(metric, date)
            .map_err(fetch_err(metric))?;
        let pending = current.map_or(true, |v| v == 0.0);
        if spec.lagged && pending {
            if let Some(prev) = date.pred_opt() {
                tracing::info!(
                    "{} is not final on {}; evaluating {} instead",
                    metric,
                    date,
                    prev
                );
                let v = self
                    .store
                    .current_value(metric, prev)
                    .map_err(fetch_err(metric))?;
                return v.map(|v| (prev, v)).ok_or_else(|| EngineError::DataFetch {
                    metric: metric.to_string(),
                    source: StoreError::MissingValue {
                        metric: metric.to_string(),
                        date: prev,
                    },
                });
            }
        }
        current
            .map(|v| (date, v))
            .ok_or_else(|| EngineError::DataFetch {
                metric: metric.to_string(),
                source: StoreError::MissingValue {
                    metric: metric.to_string(),
                    date,
                },
            })
    }

    /// Evaluate one metric, reporting short history as an error.
    pub fn try_detect(&self, metric: &str, date: NaiveDate) -> Result<AnomalyRecord, EngineError> {
        let metric = normalize_id(metric);
        let spec = self.registry.resolve(&metric);
        let (evaluated, current) = self.resolve_current(&metric, &spec, date)?;

        let start = evaluated
            .checked_sub_days(Days::new(u64::from(self.config.history_days)))
            .unwrap_or(NaiveDate::MIN);
        let end = evaluated.pred_opt().unwrap_or(NaiveDate::MIN);
        let history: Vec<f64> = self
            .store
            .historical_series(&metric, start, end)
            .map_err(fetch_err(&metric))?
            .into_iter()
            .filter(|(d, v)| *d < evaluated && v.is_finite())
            .map(|(_, v)| v)
            .collect();

        let insufficient = EngineError::InsufficientHistory {
            required: self.config.min_history,
            got: history.len(),
        };
        if history.len() < self.config.min_history {
            tracing::info!(
                "{}: {} historical point(s), need {}; skipping",
                metric,
                history.len(),
                self.config.min_history
            );
            return Err(insufficient);
        }
        let record = anomaly::evaluate(&metric, &spec, current, &history, &self.config)
            .ok_or(insufficient)?;
        tracing::debug!(
            "{} on {}: {:?} (value {:.4}, bounds {:.4}..{:.4})",
            metric,
            evaluated,
            record.classification,
            record.current_value,
            record.lower_bound,
            record.upper_bound
        );
        Ok(AnomalyRecord {
            evaluated_on: Some(evaluated),
            ..record
        })
    }

    /// Evaluate one metric. `Ok(None)` means not enough history to judge.
    pub fn detect_anomaly(
        &self,
        metric: &str,
        date: NaiveDate,
    ) -> Result<Option<AnomalyRecord>, EngineError> {
        match self.try_detect(metric, date) {
            Ok(r) => Ok(Some(r)),
            Err(EngineError::InsufficientHistory { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Rank channels for `record` and fold in the secondary signals.
    /// Secondary signals are skipped (with a warning) when their series cannot be read.
    pub fn explain_anomaly(
        &self,
        record: &AnomalyRecord,
        date: NaiveDate,
    ) -> Result<RootCauseReport, EngineError> {
        let metric = record.metric.as_str();
        let evaluated = record.evaluated_on.unwrap_or(date);
        let spec = self.registry.resolve(metric);
        let samples = self
            .store
            .channel_breakdown(metric, evaluated, spec.min_volume)
            .map_err(fetch_err(metric))?;

        let params =
            AttributionParams::from_spec(self.registry.display_name(metric), &spec, &self.config);
        let attribution = attribution::rank_channels(record, &samples, &params);

        let start = evaluated
            .checked_sub_days(Days::new(u64::from(self.config.history_days)))
            .unwrap_or(NaiveDate::MIN);
        let mut series = match self.store.historical_series(metric, start, evaluated) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("{}: secondary signals skipped: {}", metric, e);
                Vec::new()
            }
        };
        series.retain(|(d, _)| *d <= evaluated);
        if series.last().map(|(d, _)| *d) != Some(evaluated) {
            series.push((evaluated, record.current_value));
        }
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();

        let secondary = SecondarySignals {
            trend: signals::trend(stats::tail(&values, TREND_POINTS)),
            structural: signals::channel_mix(&samples),
            external: signals::external(metric, evaluated, record.current_value, &series),
        };
        let report = confidence::build_report(
            record,
            attribution,
            spec.attribution_specificity,
            &secondary,
        );
        tracing::debug!("{}: {}", metric, report.summary);
        Ok(report)
    }

    /// Detect and explain every metric in `metrics`. One metric's failure never
    /// aborts the batch: fetch errors land in `not_evaluated`.
    pub fn batch_analyze<I, M>(&self, metrics: I, date: NaiveDate) -> BatchReport
    where
        I: IntoIterator<Item = M>,
        M: AsRef<str>,
    {
        let mut outcomes = BTreeMap::new();
        let mut not_evaluated = Vec::new();

        for metric in metrics {
            let metric = normalize_id(metric.as_ref());
            if outcomes.contains_key(&metric) {
                continue;
            }
            let outcome = match self.try_detect(&metric, date) {
                Ok(record) if record.is_anomalous() => {
                    let (root_cause, note) = match self.explain_anomaly(&record, date) {
                        Ok(r) => (Some(r), None),
                        Err(e) => {
                            tracing::warn!("{}: root cause unavailable: {}", metric, e);
                            (None, Some(format!("root cause unavailable: {}", e)))
                        }
                    };
                    MetricOutcome {
                        status: OutcomeStatus::Anomalous,
                        evaluated_date: record.evaluated_on,
                        anomaly: Some(record),
                        root_cause,
                        note,
                    }
                }
                Ok(record) => MetricOutcome {
                    status: OutcomeStatus::Normal,
                    evaluated_date: record.evaluated_on,
                    anomaly: Some(record),
                    root_cause: None,
                    note: None,
                },
                Err(EngineError::InsufficientHistory { required, got }) => MetricOutcome {
                    status: OutcomeStatus::InsufficientData,
                    evaluated_date: None,
                    anomaly: None,
                    root_cause: None,
                    note: Some(format!(
                        "no anomaly (insufficient data: {} of {} historical points)",
                        got, required
                    )),
                },
                Err(e) => {
                    tracing::warn!("{}: not evaluated: {}", metric, e);
                    not_evaluated.push(NotEvaluated {
                        metric,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            outcomes.insert(metric, outcome);
        }

        let report = BatchReport {
            date,
            outcomes,
            not_evaluated,
        };
        tracing::info!(
            "batch {}: {} evaluated, {} anomalous, {} not evaluated",
            date,
            report.outcomes.len(),
            report.anomalies().count(),
            report.not_evaluated.len()
        );
        report
    }

    /// Batch over every metric in the registry that has a channel accessor.
    pub fn batch_analyze_all(&self, date: NaiveDate) -> BatchReport {
        let ids: Vec<String> = self
            .registry
            .iter()
            .filter(|(_, s)| s.accessor.is_some())
            .map(|(id, _)| id.to_string())
            .collect();
        self.batch_analyze(ids, date)
    }
}
