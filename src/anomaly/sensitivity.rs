//! Secondary sensitivity heuristics for moves too small for the IQR test.
//!
//! Every check is direction-gated: only a worsening move can fire, so a
//! neutral metric never becomes `sensitive`.

use super::SensitiveDetails;
use crate::config::SensitivityThresholds;
use crate::registry::MetricDirection;
use crate::stats;
use crate::util::pct_change;

/// Historical points needed before any heuristic runs.
pub const MIN_SENSITIVE_HISTORY: usize = 3;

/// Long and short recent windows; the long one is used once enough history exists.
const RECENT_WINDOW_LONG: usize = 7;
const RECENT_WINDOW_SHORT: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityOutcome {
    pub reasons: Vec<String>,
    pub details: SensitiveDetails,
}

/// Recent window: last 7 values when at least 7 exist, else last 3.
pub fn recent_window(history: &[f64]) -> &[f64] {
    if history.len() >= RECENT_WINDOW_LONG {
        stats::tail(history, RECENT_WINDOW_LONG)
    } else {
        stats::tail(history, RECENT_WINDOW_SHORT)
    }
}

/// Run the day-over-day, extremum, and mean-deviation checks.
/// Returns `None` when history is too short or nothing fired.
pub fn check(
    direction: MetricDirection,
    current: f64,
    history: &[f64],
    thresholds: SensitivityThresholds,
) -> Option<SensitivityOutcome> {
    if history.len() < MIN_SENSITIVE_HISTORY {
        return None;
    }
    let recent = recent_window(history);
    let window = recent.len();
    let recent_mean = stats::mean(recent)?;
    let recent_min = stats::min(recent)?;
    let recent_max = stats::max(recent)?;
    let previous = *history.last()?;
    let daily_change_pct = pct_change(current, previous);

    let mut details = SensitiveDetails {
        previous_value: previous,
        daily_change_pct,
        recent_mean,
        recent_min,
        recent_max,
        window,
        has_daily_change: false,
        has_extreme_value: false,
        has_mean_deviation: false,
    };
    let mut reasons = Vec::new();

    if previous != 0.0
        && direction.worsens(current - previous)
        && daily_change_pct > thresholds.day_over_day_pct
    {
        details.has_daily_change = true;
        let word = if current < previous {
            "decrease"
        } else {
            "increase"
        };
        reasons.push(format!(
            "day-over-day change {:.1}% ({})",
            daily_change_pct, word
        ));
    }

    match direction {
        MetricDirection::Positive if current < recent_min => {
            details.has_extreme_value = true;
            reasons.push(format!("below recent {}-day minimum", window));
        }
        MetricDirection::Negative if current > recent_max => {
            details.has_extreme_value = true;
            reasons.push(format!("above recent {}-day maximum", window));
        }
        _ => {}
    }

    if recent_mean != 0.0 {
        let deviation = pct_change(current, recent_mean);
        if deviation > thresholds.mean_deviation_pct && direction.worsens(current - recent_mean) {
            details.has_mean_deviation = true;
            reasons.push(format!(
                "deviates {:.1}% from recent {}-day mean",
                deviation, window
            ));
        }
    }

    if reasons.is_empty() {
        None
    } else {
        Some(SensitivityOutcome { reasons, details })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARPU: SensitivityThresholds = SensitivityThresholds::new(5.0, 3.0);
    const DEMOGRAPHIC: SensitivityThresholds = SensitivityThresholds::new(10.0, 6.0);

    #[test]
    fn short_history_never_fires() {
        assert!(check(MetricDirection::Positive, 1.0, &[10.0, 10.0], ARPU).is_none());
    }

    #[test]
    fn positive_drop_fires_all_checks() {
        let hist = [10.0, 10.2, 9.9, 10.1, 10.0, 10.0, 10.1];
        let out = check(MetricDirection::Positive, 9.3, &hist, ARPU).unwrap();
        assert!(out.details.has_daily_change);
        assert!(out.details.has_extreme_value);
        assert!(out.details.has_mean_deviation);
        assert_eq!(out.reasons.len(), 3);
        assert_eq!(out.details.window, 7);
    }

    #[test]
    fn positive_rise_is_ignored() {
        let hist = [10.0, 10.2, 9.9, 10.1, 10.0, 10.0, 10.1];
        assert!(check(MetricDirection::Positive, 12.0, &hist, ARPU).is_none());
    }

    #[test]
    fn negative_rise_fires() {
        let hist = [10.0, 10.0, 10.0, 10.0];
        let out = check(MetricDirection::Negative, 11.0, &hist, ARPU).unwrap();
        assert!(out.details.has_daily_change);
        assert!(out.details.has_extreme_value);
        assert!(out.reasons[0].contains("increase"));
        assert_eq!(out.details.window, 3);
    }

    #[test]
    fn neutral_never_fires() {
        let hist = [10.0, 10.0, 10.0, 10.0];
        assert!(check(MetricDirection::Neutral, 1.0, &hist, ARPU).is_none());
    }

    #[test]
    fn looser_thresholds_tolerate_same_move() {
        // 5.6% drop: above the revenue threshold, below the demographic one.
        let hist = [50.0, 50.0, 50.0, 50.0, 50.0, 50.0, 50.0];
        let tight = check(MetricDirection::Positive, 47.2, &hist, ARPU).unwrap();
        assert!(tight.details.has_daily_change);
        let loose = check(MetricDirection::Positive, 47.2, &hist, DEMOGRAPHIC).unwrap();
        assert!(!loose.details.has_daily_change);
        assert!(!loose.details.has_mean_deviation);
        assert!(loose.details.has_extreme_value);
    }

    #[test]
    fn zero_previous_skips_daily_change() {
        let hist = [1.0, 1.0, 0.0];
        let out = check(MetricDirection::Negative, 5.0, &hist, ARPU).unwrap();
        assert!(!out.details.has_daily_change);
        assert!(out.details.has_extreme_value);
    }
}
