//! Metric store: where daily series and channel breakdowns come from.

mod sqlite;

pub use sqlite::{ChannelDayRow, SqliteStore};

use crate::attribution::ChannelSample;
use crate::util::normalize_id;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
    #[error("no value for {metric} on {date}")]
    MissingValue { metric: String, date: NaiveDate },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Read access to daily metric values. Implementations own all I/O; the
/// engine only calls these three operations.
pub trait MetricStore {
    /// Chronological `(date, value)` pairs with `start <= date <= end`.
    fn historical_series(
        &self,
        metric: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, StoreError>;

    /// Aggregate value on `date`; `Ok(None)` when the day has no data yet.
    fn current_value(&self, metric: &str, date: NaiveDate) -> Result<Option<f64>, StoreError>;

    /// Per-channel values on `date` paired with the previous day, limited to
    /// channels with at least `min_volume` volume.
    fn channel_breakdown(
        &self,
        metric: &str,
        date: NaiveDate,
        min_volume: f64,
    ) -> Result<Vec<ChannelSample>, StoreError>;
}

impl<T: MetricStore + ?Sized> MetricStore for &T {
    fn historical_series(
        &self,
        metric: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, StoreError> {
        (**self).historical_series(metric, start, end)
    }

    fn current_value(&self, metric: &str, date: NaiveDate) -> Result<Option<f64>, StoreError> {
        (**self).current_value(metric, date)
    }

    fn channel_breakdown(
        &self,
        metric: &str,
        date: NaiveDate,
        min_volume: f64,
    ) -> Result<Vec<ChannelSample>, StoreError> {
        (**self).channel_breakdown(metric, date, min_volume)
    }
}

/// Store backed by plain maps; series and breakdowns are inserted directly.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    series: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
    breakdowns: BTreeMap<(String, NaiveDate), Vec<ChannelSample>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_value(&mut self, metric: &str, date: NaiveDate, value: f64) {
        self.series
            .entry(normalize_id(metric))
            .or_default()
            .insert(date, value);
    }

    /// Insert consecutive daily values starting at `first`.
    pub fn insert_daily(&mut self, metric: &str, first: NaiveDate, values: &[f64]) {
        for (date, v) in first.iter_days().zip(values) {
            self.insert_value(metric, date, *v);
        }
    }

    pub fn insert_breakdown(&mut self, metric: &str, date: NaiveDate, samples: Vec<ChannelSample>) {
        self.breakdowns.insert((normalize_id(metric), date), samples);
    }

    fn metric_series(&self, metric: &str) -> Result<&BTreeMap<NaiveDate, f64>, StoreError> {
        self.series
            .get(&normalize_id(metric))
            .ok_or_else(|| StoreError::UnknownMetric(metric.to_string()))
    }
}

impl MetricStore for InMemoryStore {
    fn historical_series(
        &self,
        metric: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .metric_series(metric)?
            .range(start..=end)
            .map(|(d, v)| (*d, *v))
            .collect())
    }

    fn current_value(&self, metric: &str, date: NaiveDate) -> Result<Option<f64>, StoreError> {
        Ok(self.metric_series(metric)?.get(&date).copied())
    }

    fn channel_breakdown(
        &self,
        metric: &str,
        date: NaiveDate,
        min_volume: f64,
    ) -> Result<Vec<ChannelSample>, StoreError> {
        Ok(self
            .breakdowns
            .get(&(normalize_id(metric), date))
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| s.volume >= min_volume)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
