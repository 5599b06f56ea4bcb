//! Descriptive statistics over historical windows.
//!
//! Percentiles use linear interpolation between closest ranks, the same
//! definition most dataframe libraries default to.

/// Percentile `p` in `[0, 100]` of `values`. Returns `None` for an empty slice.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p = p.clamp(0.0, 100.0);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// True when the series never changes direction (non-decreasing or non-increasing).
pub fn is_monotonic(values: &[f64]) -> bool {
    if values.len() < 3 {
        return false;
    }
    let increasing = values.windows(2).all(|w| w[0] <= w[1]);
    let decreasing = values.windows(2).all(|w| w[0] >= w[1]);
    increasing || decreasing
}

/// Last `n` values of `values` (all of them when shorter).
pub fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&v, 25.0).unwrap() - 1.75).abs() < 1e-9);
        assert!((percentile(&v, 50.0).unwrap() - 2.5).abs() < 1e-9);
        assert!((percentile(&v, 75.0).unwrap() - 3.25).abs() < 1e-9);
    }

    #[test]
    fn percentile_unsorted_input() {
        let v = [9.0, 1.0, 5.0];
        assert_eq!(median(&v), Some(5.0));
        assert_eq!(percentile(&v, 0.0), Some(1.0));
        assert_eq!(percentile(&v, 100.0), Some(9.0));
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(percentile(&[], 50.0), None);
        assert_eq!(mean(&[]), None);
        assert_eq!(std_dev(&[]), None);
        assert_eq!(min(&[]), None);
    }

    #[test]
    fn std_dev_population() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((std_dev(&v).unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn monotonic_detection() {
        assert!(is_monotonic(&[1.0, 2.0, 2.0, 3.0]));
        assert!(is_monotonic(&[3.0, 2.0, 1.0]));
        assert!(!is_monotonic(&[1.0, 3.0, 2.0]));
        assert!(!is_monotonic(&[1.0, 2.0]));
    }

    #[test]
    fn tail_shorter_than_n() {
        assert_eq!(tail(&[1.0, 2.0], 7), &[1.0, 2.0]);
        assert_eq!(tail(&[1.0, 2.0, 3.0], 2), &[2.0, 3.0]);
    }
}
