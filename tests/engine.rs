//! Engine scenarios over an in-memory store.

use chrono::NaiveDate;
use kpi_rootcause::anomaly::{Classification, DeviationDirection};
use kpi_rootcause::attribution::ChannelSample;
use kpi_rootcause::config::EngineConfig;
use kpi_rootcause::confidence::ConfidenceLabel;
use kpi_rootcause::engine::{Engine, OutcomeStatus};
use kpi_rootcause::store::{InMemoryStore, MetricStore, StoreError};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).expect("date")
}

fn channel(name: &str, current: f64, previous: f64, volume: f64) -> ChannelSample {
    ChannelSample {
        channel: name.to_string(),
        current,
        previous: Some(previous),
        volume,
        previous_volume: volume,
    }
}

/// Seven flat days (1..=7) followed by `current` on day 8.
fn flat_then(store: &mut InMemoryStore, metric: &str, current: f64) {
    let mut values = vec![10.0; 7];
    values.push(current);
    store.insert_daily(metric, day(1), &values);
}

/// Fails every call for one metric, delegating the rest.
struct FailingStore {
    inner: InMemoryStore,
    broken: &'static str,
}

impl FailingStore {
    fn check(&self, metric: &str) -> Result<(), StoreError> {
        if metric == self.broken {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "warehouse timeout",
            )))
        } else {
            Ok(())
        }
    }
}

impl MetricStore for FailingStore {
    fn historical_series(
        &self,
        metric: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, StoreError> {
        self.check(metric)?;
        self.inner.historical_series(metric, start, end)
    }

    fn current_value(&self, metric: &str, date: NaiveDate) -> Result<Option<f64>, StoreError> {
        self.check(metric)?;
        self.inner.current_value(metric, date)
    }

    fn channel_breakdown(
        &self,
        metric: &str,
        date: NaiveDate,
        min_volume: f64,
    ) -> Result<Vec<ChannelSample>, StoreError> {
        self.check(metric)?;
        self.inner.channel_breakdown(metric, date, min_volume)
    }
}

#[test]
fn flat_history_same_value_is_normal() {
    let mut store = InMemoryStore::new();
    flat_then(&mut store, "arpu", 10.0);
    let engine = Engine::new(store, EngineConfig::default());
    let record = engine
        .detect_anomaly("arpu", day(8))
        .expect("detect")
        .expect("enough history");
    assert_eq!(record.classification, Classification::None);
}

#[test]
fn flat_history_drop_is_serious_decrease() {
    let mut store = InMemoryStore::new();
    flat_then(&mut store, "arpu", 3.0);
    let engine = Engine::new(store, EngineConfig::default());
    let record = engine
        .detect_anomaly("arpu", day(8))
        .expect("detect")
        .expect("enough history");
    assert_eq!(record.classification, Classification::Serious);
    assert_eq!(record.direction, DeviationDirection::Decrease);
}

#[test]
fn positive_metric_spike_is_not_serious() {
    let mut store = InMemoryStore::new();
    flat_then(&mut store, "quality_users", 50.0);
    let engine = Engine::new(store, EngineConfig::default());
    let record = engine
        .detect_anomaly("quality_users", day(8))
        .expect("detect")
        .expect("enough history");
    assert!(record.current_value > record.upper_bound);
    assert_ne!(record.classification, Classification::Serious);
}

#[test]
fn cpa_rise_blames_only_worsening_channels() {
    let mut store = InMemoryStore::new();
    // A: weight 0.5, +6; B: weight 0.1, +1; C: weight 0.4, -2. Aggregate 10 -> 12.3.
    flat_then(&mut store, "cpa", 12.3);
    store.insert_breakdown(
        "cpa",
        day(8),
        vec![
            channel("A", 16.0, 10.0, 500.0),
            channel("B", 11.0, 10.0, 100.0),
            channel("C", 8.0, 10.0, 400.0),
        ],
    );
    let engine = Engine::new(store, EngineConfig::default());
    let record = engine
        .detect_anomaly("cpa", day(8))
        .expect("detect")
        .expect("enough history");
    assert_eq!(record.classification, Classification::Serious);
    assert_eq!(record.direction, DeviationDirection::Increase);

    let report = engine.explain_anomaly(&record, day(8)).expect("explain");
    let names: Vec<&str> = report
        .contributions
        .iter()
        .map(|c| c.channel.as_str())
        .collect();
    assert_eq!(names, vec!["A", "B"]);
    assert!((report.contributions[0].severity_score - 18.0).abs() < 1e-9);
    assert!((report.contributions[1].severity_score - 0.2).abs() < 1e-9);
    let weights: f64 = report.contributions.iter().map(|c| c.weight).sum();
    assert!(weights <= 1.0 + 1e-9);
    assert!(report.confidence > 0.4);
    assert_ne!(report.confidence_label, ConfidenceLabel::Low);
}

#[test]
fn four_points_of_history_is_not_enough() {
    let mut store = InMemoryStore::new();
    store.insert_daily("cpa", day(1), &[10.0, 10.0, 10.0, 10.0, 500.0]);
    let engine = Engine::new(store, EngineConfig::default());
    assert!(engine.detect_anomaly("cpa", day(5)).expect("detect").is_none());

    let batch = engine.batch_analyze(["cpa"], day(5));
    let outcome = &batch.outcomes["cpa"];
    assert_eq!(outcome.status, OutcomeStatus::InsufficientData);
    assert!(outcome
        .note
        .as_deref()
        .unwrap_or_default()
        .contains("insufficient data"));
}

#[test]
fn batch_isolates_fetch_failures() {
    let mut inner = InMemoryStore::new();
    flat_then(&mut inner, "arpu", 3.0);
    flat_then(&mut inner, "cpa", 10.0);
    flat_then(&mut inner, "good_rate", 10.0);
    let store = FailingStore {
        inner,
        broken: "good_rate",
    };
    let engine = Engine::new(store, EngineConfig::default());
    let batch = engine.batch_analyze(["arpu", "cpa", "good_rate"], day(8));

    assert_eq!(batch.outcomes.len(), 2);
    assert_eq!(batch.outcomes["arpu"].status, OutcomeStatus::Anomalous);
    assert!(batch.outcomes["arpu"].root_cause.is_some());
    assert_eq!(batch.outcomes["cpa"].status, OutcomeStatus::Normal);
    assert_eq!(batch.not_evaluated.len(), 1);
    assert_eq!(batch.not_evaluated[0].metric, "good_rate");
    assert!(batch.not_evaluated[0].reason.contains("warehouse timeout"));
}

#[test]
fn anomaly_without_channels_falls_back_to_manual_review() {
    let mut store = InMemoryStore::new();
    // 2024-03-14 is a plain Thursday with no channel data. The small rise is only
    // sensitive (new maximum) and the trend stays flat, so no dimension fires.
    store.insert_daily("cpa", day(7), &[10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0]);
    store.insert_value("cpa", day(14), 10.05);
    let engine = Engine::new(store, EngineConfig::default());
    let record = engine
        .detect_anomaly("cpa", day(14))
        .expect("detect")
        .expect("enough history");
    let report = engine.explain_anomaly(&record, day(14)).expect("explain");
    assert!(report.contributions.is_empty());
    assert_eq!(report.confidence, 0.3);
    assert_eq!(report.confidence_label, ConfidenceLabel::Low);
    assert!(report.summary.contains("manual review"));
}

#[test]
fn unknown_metric_is_treated_as_neutral() {
    let mut store = InMemoryStore::new();
    flat_then(&mut store, "installs", 30.0);
    let engine = Engine::new(store, EngineConfig::default());
    let record = engine
        .detect_anomaly("installs", day(8))
        .expect("detect")
        .expect("enough history");
    assert_eq!(record.classification, Classification::Serious);
    assert_eq!(record.direction, DeviationDirection::Increase);
}

#[test]
fn direction_override_from_config() {
    let cfg = EngineConfig::from_toml("[directions]\ninstalls = \"positive\"\n").expect("config");
    let mut store = InMemoryStore::new();
    flat_then(&mut store, "installs", 30.0);
    let engine = Engine::new(store, cfg);
    let record = engine
        .detect_anomaly("installs", day(8))
        .expect("detect")
        .expect("enough history");
    assert_eq!(record.classification, Classification::None);
}
