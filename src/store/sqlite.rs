//! SQLite store of raw channel-day counters.

use super::{MetricStore, StoreError};
use crate::attribution::ChannelSample;
use crate::registry::{ChannelCounts, MetricSpec, Registry};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS channel_daily (
    dt TEXT NOT NULL,
    channel TEXT NOT NULL,
    total_users REAL NOT NULL DEFAULT 0,
    good_users REAL NOT NULL DEFAULT 0,
    quality_users REAL NOT NULL DEFAULT 0,
    cost REAL NOT NULL DEFAULT 0,
    revenue REAL NOT NULL DEFAULT 0,
    retained_users REAL NOT NULL DEFAULT 0,
    female_users REAL NOT NULL DEFAULT 0,
    young_users REAL NOT NULL DEFAULT 0,
    high_tier_users REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (dt, channel)
);

CREATE INDEX IF NOT EXISTS idx_channel_daily_dt ON channel_daily(dt);
";

const SUMS: &str = "SUM(total_users), SUM(good_users), SUM(quality_users), SUM(cost), \
SUM(revenue), SUM(retained_users), SUM(female_users), SUM(young_users), SUM(high_tier_users)";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One channel's counters for one day, as imported from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDayRow {
    pub dt: NaiveDate,
    pub channel: String,
    #[serde(flatten)]
    pub counts: ChannelCounts,
}

fn date_key(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| {
        StoreError::Sqlite(rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            Box::new(e),
        ))
    })
}

/// Nine summed counters starting at column `at`. SUM over no rows is NULL.
fn counts_at(r: &Row<'_>, at: usize) -> rusqlite::Result<ChannelCounts> {
    let f = |i: usize| -> rusqlite::Result<f64> {
        Ok(r.get::<_, Option<f64>>(at + i)?.unwrap_or(0.0))
    };
    Ok(ChannelCounts {
        total_users: f(0)?,
        good_users: f(1)?,
        quality_users: f(2)?,
        cost: f(3)?,
        revenue: f(4)?,
        retained_users: f(5)?,
        female_users: f(6)?,
        young_users: f(7)?,
        high_tier_users: f(8)?,
    })
}

/// Daily metric values are computed from the day's summed counters through
/// the registry accessor, so ratios come from raw totals.
pub struct SqliteStore {
    conn: Connection,
    registry: Registry,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn,
            registry: Registry::builtin(),
        })
    }

    /// Resolve metric ids against `registry` instead of the built-in table.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Insert or replace rows in one transaction. Returns the row count.
    pub fn insert_rows(&mut self, rows: &[ChannelDayRow]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO channel_daily (dt, channel, total_users, good_users, \
                 quality_users, cost, revenue, retained_users, female_users, young_users, \
                 high_tier_users) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for row in rows {
                let c = &row.counts;
                stmt.execute(params![
                    date_key(row.dt),
                    row.channel.trim(),
                    c.total_users,
                    c.good_users,
                    c.quality_users,
                    c.cost,
                    c.revenue,
                    c.retained_users,
                    c.female_users,
                    c.young_users,
                    c.high_tier_users,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Load a JSON array of [`ChannelDayRow`] from `path`.
    pub fn import_json(&mut self, path: &Path) -> Result<usize, StoreError> {
        let s = std::fs::read_to_string(path)?;
        let rows: Vec<ChannelDayRow> = serde_json::from_str(&s)?;
        let n = self.insert_rows(&rows)?;
        tracing::info!("imported {} channel-day row(s) from {}", n, path.display());
        Ok(n)
    }

    /// First and last date with data, if any.
    pub fn date_range(&self) -> Result<Option<(NaiveDate, NaiveDate)>, StoreError> {
        let (lo, hi): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(dt), MAX(dt) FROM channel_daily",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        match (lo, hi) {
            (Some(lo), Some(hi)) => Ok(Some((parse_date(&lo)?, parse_date(&hi)?))),
            _ => Ok(None),
        }
    }

    fn spec(&self, metric: &str) -> Result<MetricSpec, StoreError> {
        self.registry
            .get(metric)
            .filter(|s| s.accessor.is_some())
            .copied()
            .ok_or_else(|| StoreError::UnknownMetric(metric.to_string()))
    }

    /// Summed counters per day in `[start, end]`.
    fn daily_totals(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, ChannelCounts)>, StoreError> {
        let sql = format!(
            "SELECT dt, {} FROM channel_daily WHERE dt BETWEEN ?1 AND ?2 GROUP BY dt ORDER BY dt",
            SUMS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![date_key(start), date_key(end)], |r| {
            Ok((r.get::<_, String>(0)?, counts_at(r, 1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (dt, counts) = row?;
            out.push((parse_date(&dt)?, counts));
        }
        Ok(out)
    }

    /// Summed counters per channel on one day.
    fn channel_totals(
        &self,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, ChannelCounts>, StoreError> {
        let sql = format!(
            "SELECT channel, {} FROM channel_daily WHERE dt = ?1 GROUP BY channel",
            SUMS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![date_key(date)], |r| {
            Ok((r.get::<_, String>(0)?, counts_at(r, 1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (channel, counts) = row?;
            out.insert(channel, counts);
        }
        Ok(out)
    }
}

impl MetricStore for SqliteStore {
    fn historical_series(
        &self,
        metric: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, StoreError> {
        let spec = self.spec(metric)?;
        Ok(self
            .daily_totals(start, end)?
            .into_iter()
            .filter_map(|(d, c)| spec.value_of(&c).map(|v| (d, v)))
            .collect())
    }

    fn current_value(&self, metric: &str, date: NaiveDate) -> Result<Option<f64>, StoreError> {
        let spec = self.spec(metric)?;
        Ok(self
            .daily_totals(date, date)?
            .first()
            .and_then(|(_, c)| spec.value_of(c)))
    }

    fn channel_breakdown(
        &self,
        metric: &str,
        date: NaiveDate,
        min_volume: f64,
    ) -> Result<Vec<ChannelSample>, StoreError> {
        let spec = self.spec(metric)?;
        let today = self.channel_totals(date)?;
        let yesterday = match date.pred_opt() {
            Some(prev) => self.channel_totals(prev)?,
            None => BTreeMap::new(),
        };
        let mut out = Vec::new();
        for (channel, counts) in &today {
            let volume = spec.volume_of(counts);
            if volume < min_volume {
                continue;
            }
            let Some(current) = spec.value_of(counts) else {
                continue;
            };
            let prev = yesterday.get(channel);
            out.push(ChannelSample {
                channel: channel.clone(),
                current,
                previous: prev.and_then(|p| spec.value_of(p)),
                volume,
                previous_volume: prev.map(|p| spec.volume_of(p)).unwrap_or(0.0),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn row(day: u32, channel: &str, quality: f64, cost: f64) -> ChannelDayRow {
        ChannelDayRow {
            dt: d(day),
            channel: channel.to_string(),
            counts: ChannelCounts {
                total_users: quality * 2.0,
                good_users: quality * 1.5,
                quality_users: quality,
                cost,
                ..Default::default()
            },
        }
    }

    #[test]
    fn daily_value_uses_raw_totals() {
        let mut s = SqliteStore::open_in_memory().unwrap();
        s.insert_rows(&[row(1, "a", 100.0, 1000.0), row(1, "b", 300.0, 1800.0)])
            .unwrap();
        // 2800 / 400, not the mean of 10 and 6.
        let v = s.current_value("cpa", d(1)).unwrap().unwrap();
        assert!((v - 7.0).abs() < 1e-9);
        assert_eq!(s.current_value("cpa", d(2)).unwrap(), None);
    }

    #[test]
    fn series_skips_days_without_a_value() {
        let mut s = SqliteStore::open_in_memory().unwrap();
        s.insert_rows(&[
            row(1, "a", 100.0, 1000.0),
            row(2, "a", 100.0, 0.0),
            row(3, "a", 100.0, 1200.0),
        ])
        .unwrap();
        let got = s.historical_series("cpa", d(1), d(3)).unwrap();
        assert_eq!(got, vec![(d(1), 10.0), (d(3), 12.0)]);
    }

    #[test]
    fn breakdown_pairs_previous_day() {
        let mut s = SqliteStore::open_in_memory().unwrap();
        s.insert_rows(&[
            row(1, "a", 100.0, 1000.0),
            row(2, "a", 100.0, 1500.0),
            row(2, "b", 200.0, 1000.0),
            row(2, "tiny", 5.0, 500.0),
        ])
        .unwrap();
        let got = s.channel_breakdown("cpa", d(2), 50.0).unwrap();
        assert_eq!(got.len(), 2);
        let a = got.iter().find(|c| c.channel == "a").unwrap();
        assert_eq!(a.previous, Some(10.0));
        assert_eq!(a.current, 15.0);
        assert_eq!(a.previous_volume, 100.0);
        let b = got.iter().find(|c| c.channel == "b").unwrap();
        assert_eq!(b.previous, None);
        assert_eq!(b.previous_volume, 0.0);
    }

    #[test]
    fn reimport_replaces_rows() {
        let mut s = SqliteStore::open_in_memory().unwrap();
        s.insert_rows(&[row(1, "a", 100.0, 1000.0)]).unwrap();
        s.insert_rows(&[row(1, "a", 100.0, 2000.0)]).unwrap();
        assert_eq!(s.current_value("cpa", d(1)).unwrap(), Some(20.0));
        assert_eq!(s.date_range().unwrap(), Some((d(1), d(1))));
    }

    #[test]
    fn unknown_metric() {
        let s = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            s.current_value("installs", d(1)),
            Err(StoreError::UnknownMetric(_))
        ));
        assert_eq!(s.date_range().unwrap(), None);
    }

    #[test]
    fn import_json_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        std::fs::write(
            &path,
            r#"[{"dt":"2024-03-01","channel":"a","quality_users":50,"revenue":500}]"#,
        )
        .unwrap();
        let mut s = SqliteStore::open_in_memory().unwrap();
        assert_eq!(s.import_json(&path).unwrap(), 1);
        assert_eq!(s.current_value("arpu", d(1)).unwrap(), Some(10.0));
    }
}
