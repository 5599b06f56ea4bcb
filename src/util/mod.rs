//! Shared utilities: logging, ids, guarded arithmetic.

use tracing::Level;

/// Initialize tracing with env filter. Safe to call once at startup.
pub fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Normalize a metric or channel id for lookup (lowercase, trim).
pub fn normalize_id(s: &str) -> String {
    s.trim().to_lowercase()
}

/// `num / den`, or `None` when the denominator is not strictly positive.
pub fn ratio(num: f64, den: f64) -> Option<f64> {
    if den > 0.0 && num.is_finite() && den.is_finite() {
        Some(num / den)
    } else {
        None
    }
}

/// Relative change `|a - b| / |b|` in percent; 0 when `b` is zero.
pub fn pct_change(current: f64, base: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        (current - base).abs() / base.abs() * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_id_trim_lower() {
        assert_eq!(normalize_id("  CPA  "), "cpa");
        assert_eq!(normalize_id("Good_Rate"), "good_rate");
    }

    #[test]
    fn ratio_guards_denominator() {
        assert_eq!(ratio(10.0, 0.0), None);
        assert_eq!(ratio(10.0, -1.0), None);
        assert!((ratio(10.0, 4.0).unwrap() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn pct_change_zero_base() {
        assert_eq!(pct_change(5.0, 0.0), 0.0);
        assert!((pct_change(9.0, 10.0) - 10.0).abs() < 1e-9);
    }
}
