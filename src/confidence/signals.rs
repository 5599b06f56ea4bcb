//! Secondary analyses feeding the confidence aggregator.

use super::Signal;
use crate::attribution::ChannelSample;
use crate::stats;
use crate::util::{normalize_id, ratio};
use chrono::{Datelike, NaiveDate, Weekday};

/// Values needed for a trend reading: the evaluated day plus three before it.
const TREND_MIN_POINTS: usize = 4;
const TREND_WINDOW: usize = 7;
const TREND_CHANGE: f64 = 0.05;
const STABLE_TREND_SIGNIFICANCE: f64 = 0.1;

const MIX_SHIFT: f64 = 0.05;
const MIX_MIN_SHARE: f64 = 0.1;

const WEEKEND_CHANGE: f64 = 0.2;
const WEEKEND_LOOKBACK: usize = 2;
const HOLIDAY_SIGNIFICANCE: f64 = 0.8;
const SEASONAL_SIGNIFICANCE: f64 = 0.6;
/// Calendar sub-signals at or below this are dropped.
const EXTERNAL_SUB_MIN: f64 = 0.3;

const HOLIDAYS: [((u32, u32), &str); 5] = [
    ((1, 1), "New Year's Day"),
    ((2, 14), "Valentine's Day"),
    ((5, 1), "Labour Day"),
    ((10, 1), "National Day"),
    ((12, 25), "Christmas"),
];

fn seasonal_note(metric: &str, month: u32) -> Option<&'static str> {
    match (normalize_id(metric).as_str(), month) {
        ("arpu", 1) => Some("start-of-year spending"),
        ("arpu", 2) => Some("spring festival spending"),
        ("arpu", 12) => Some("year-end spending"),
        ("quality_users", 9) => Some("back-to-school season"),
        ("quality_users", 12) => Some("year-end acquisition push"),
        _ => None,
    }
}

/// Short-term trend ending at the evaluated day (`values` is chronological,
/// last element is the evaluated value). `None` with fewer than four points.
pub fn trend(values: &[f64]) -> Option<Signal> {
    if values.len() < TREND_MIN_POINTS {
        return None;
    }
    let window = stats::tail(values, TREND_WINDOW);
    let (current, before) = window.split_last()?;
    let prior = stats::mean(stats::tail(before, 3))?;
    let change = if prior > 0.0 {
        (current - prior) / prior
    } else {
        0.0
    };
    if change.abs() <= TREND_CHANGE {
        return Some(Signal {
            significance: STABLE_TREND_SIGNIFICANCE,
            description: "trend stable".to_string(),
            details: vec![format!("{:+.1}% vs mean of previous 3 days", change * 100.0)],
        });
    }
    let continuous = stats::is_monotonic(window);
    let mut significance = (change.abs() * 3.0).min(1.0);
    if continuous {
        significance = (significance + 0.2).min(1.0);
    }
    let word = if change > 0.0 { "rising" } else { "falling" };
    let mut details = vec![
        format!("current {:.2}, previous 3-day mean {:.2}", current, prior),
        format!("{} day window", window.len()),
    ];
    if continuous {
        details.push("continuous movement across the window".to_string());
    }
    Some(Signal {
        significance,
        description: format!(
            "{} trend: {:+.1}% vs mean of previous 3 days",
            word,
            change * 100.0
        ),
        details,
    })
}

/// Channel-mix shift between the previous and evaluated day. `None` when no
/// channel's volume share moved by more than five points.
pub fn channel_mix(samples: &[ChannelSample]) -> Option<Signal> {
    let today: f64 = samples.iter().map(|s| s.volume).sum();
    let yesterday: f64 = samples.iter().map(|s| s.previous_volume).sum();
    if today <= 0.0 || yesterday <= 0.0 {
        return None;
    }
    let shifts: Vec<String> = samples
        .iter()
        .filter(|s| s.previous_volume > 0.0)
        .filter_map(|s| {
            let now = ratio(s.volume, today)?;
            let before = ratio(s.previous_volume, yesterday)?;
            let shift = now - before;
            if shift.abs() > MIX_SHIFT && now > MIX_MIN_SHARE {
                Some(format!(
                    "{} share {} {:.1}pp to {:.1}%",
                    s.channel,
                    if shift > 0.0 { "up" } else { "down" },
                    shift.abs() * 100.0,
                    now * 100.0
                ))
            } else {
                None
            }
        })
        .collect();
    if shifts.is_empty() {
        return None;
    }
    Some(Signal {
        significance: (0.3 * shifts.len() as f64).min(1.0),
        description: format!(
            "channel mix shifted: {}",
            shifts.iter().take(3).cloned().collect::<Vec<_>>().join("; ")
        ),
        details: shifts,
    })
}

/// Calendar effects: weekend deviation, fixed holidays, seasonal months.
/// `series` is chronological and may include the evaluated day.
pub fn external(
    metric: &str,
    date: NaiveDate,
    current: f64,
    series: &[(NaiveDate, f64)],
) -> Option<Signal> {
    let mut subs: Vec<(f64, String)> = Vec::new();

    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        let weekends: Vec<f64> = series
            .iter()
            .rev()
            .filter(|(d, _)| *d < date && matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .take(WEEKEND_LOOKBACK)
            .map(|(_, v)| *v)
            .collect();
        if let Some(avg) = stats::mean(&weekends) {
            if avg > 0.0 {
                let change = (current - avg) / avg;
                if change.abs() > WEEKEND_CHANGE {
                    subs.push((
                        change.abs().min(1.0),
                        format!(
                            "weekend value {} than recent weekends by {:.1}%",
                            if change > 0.0 { "higher" } else { "lower" },
                            change.abs() * 100.0
                        ),
                    ));
                }
            }
        }
    }

    if let Some((_, name)) = HOLIDAYS
        .iter()
        .find(|((m, d), _)| *m == date.month() && *d == date.day())
    {
        subs.push((HOLIDAY_SIGNIFICANCE, format!("{} holiday effect", name)));
    }

    if let Some(note) = seasonal_note(metric, date.month()) {
        subs.push((SEASONAL_SIGNIFICANCE, format!("seasonal effect: {}", note)));
    }

    subs.retain(|(sig, _)| *sig > EXTERNAL_SUB_MIN);
    if subs.is_empty() {
        return None;
    }
    let significance = subs.iter().map(|(s, _)| *s).fold(0.0, f64::max);
    let details: Vec<String> = subs.into_iter().map(|(_, d)| d).collect();
    Some(Signal {
        significance,
        description: details.join("; "),
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn sample(channel: &str, volume: f64, previous_volume: f64) -> ChannelSample {
        ChannelSample {
            channel: channel.to_string(),
            current: 1.0,
            previous: Some(1.0),
            volume,
            previous_volume,
        }
    }

    #[test]
    fn trend_needs_four_points() {
        assert!(trend(&[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn stable_trend_is_weak() {
        let s = trend(&[10.0, 10.1, 9.9, 10.0]).unwrap();
        assert_eq!(s.significance, STABLE_TREND_SIGNIFICANCE);
    }

    #[test]
    fn continuous_fall_gets_bonus() {
        // Prior mean 10.0, current 8.0: -20%, 3x = 0.6, plus 0.2.
        let s = trend(&[11.0, 10.0, 9.0, 8.0]).unwrap();
        assert!(s.description.starts_with("falling"));
        assert!((s.significance - 0.8).abs() < 1e-9);
        assert!(s.details.iter().any(|d| d.contains("continuous")));
    }

    #[test]
    fn large_jump_caps_at_one() {
        let s = trend(&[10.0, 10.0, 10.0, 10.0, 10.0, 25.0]).unwrap();
        assert_eq!(s.significance, 1.0);
    }

    #[test]
    fn mix_shift_detected() {
        // a: 50% -> 70%, b: 50% -> 30%.
        let s = channel_mix(&[sample("a", 700.0, 500.0), sample("b", 300.0, 500.0)]).unwrap();
        assert!((s.significance - 0.6).abs() < 1e-9);
        assert_eq!(s.details.len(), 2);
    }

    #[test]
    fn steady_mix_is_silent() {
        assert!(channel_mix(&[sample("a", 510.0, 500.0), sample("b", 490.0, 500.0)]).is_none());
        assert!(channel_mix(&[]).is_none());
    }

    #[test]
    fn holiday_and_season() {
        let s = external("arpu", d(2024, 12, 25), 10.0, &[]).unwrap();
        assert_eq!(s.significance, HOLIDAY_SIGNIFICANCE);
        assert_eq!(s.details.len(), 2);
        assert!(s.description.contains("Christmas"));
    }

    #[test]
    fn seasonal_only_for_listed_metrics() {
        assert!(external("cpa", d(2024, 9, 10), 10.0, &[]).is_none());
        let s = external("quality_users", d(2024, 9, 10), 10.0, &[]).unwrap();
        assert_eq!(s.significance, SEASONAL_SIGNIFICANCE);
    }

    #[test]
    fn weekend_deviation() {
        // 2024-03-16 is a Saturday; the two previous weekend days averaged 100.
        let series = vec![
            (d(2024, 3, 9), 100.0),
            (d(2024, 3, 10), 100.0),
            (d(2024, 3, 12), 100.0),
            (d(2024, 3, 16), 60.0),
        ];
        let s = external("cpa", d(2024, 3, 16), 60.0, &series).unwrap();
        assert!((s.significance - 0.4).abs() < 1e-9);
        assert!(s.description.contains("lower"));
    }

    #[test]
    fn weekday_without_calendar_effect() {
        assert!(external("cpa", d(2024, 3, 13), 60.0, &[]).is_none());
    }
}
