//! Outlier-tolerant averaging for independent worker estimates.
//!
//! Used by box consensus: each coordinate is averaged on its own after
//! Tukey-fence filtering, so a single wild detector cannot drag the result.

/// Multiplier applied to the interquartile range for the outlier fences.
pub const IQR_FENCE_FACTOR: f64 = 1.5;

/// Below this many samples quartiles are meaningless and the plain mean is used.
pub const MIN_SAMPLES_FOR_FILTERING: usize = 3;

/// Arithmetic mean, or `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Value at fraction `p` of a sorted slice, linearly interpolated between
/// the two closest ranks.
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// First and third quartiles of a non-empty slice.
pub fn quartiles(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some((quantile_sorted(&sorted, 0.25), quantile_sorted(&sorted, 0.75)))
}

/// Mean of `values` after discarding points outside
/// `[Q1 - 1.5 * IQR, Q3 + 1.5 * IQR]`.
///
/// - 0 samples: `None`.
/// - 1 or 2 samples: plain mean.
/// - 3 or more: fenced mean, falling back to the plain mean if the fences
///   would discard everything.
///
/// The result always lies within `[min, max]` of the inputs.
pub fn robust_mean(values: &[f64]) -> Option<f64> {
    if values.len() < MIN_SAMPLES_FOR_FILTERING {
        return mean(values);
    }

    let (q1, q3) = quartiles(values)?;
    let iqr = q3 - q1;
    let lower = q1 - IQR_FENCE_FACTOR * iqr;
    let upper = q3 + IQR_FENCE_FACTOR * iqr;

    let kept: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| *v >= lower && *v <= upper)
        .collect();

    if kept.is_empty() {
        mean(values)
    } else {
        mean(&kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_has_no_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(robust_mean(&[]), None);
    }

    #[test]
    fn two_samples_use_plain_mean() {
        assert!(approx(robust_mean(&[10.0, 90.0]).unwrap(), 50.0));
    }

    #[test]
    fn single_outlier_is_excluded() {
        let m = robust_mean(&[10.0, 10.0, 10.0, 10.0, 90.0]).unwrap();
        assert!(approx(m, 10.0), "expected ~10, got {m}");
    }

    #[test]
    fn outlier_position_does_not_matter() {
        let m = robust_mean(&[90.0, 10.0, 10.0, 10.0, 10.0]).unwrap();
        assert!(approx(m, 10.0));
    }

    #[test]
    fn spread_values_are_all_kept() {
        let m = robust_mean(&[10.0, 20.0, 30.0, 40.0]).unwrap();
        assert!(approx(m, 25.0));
    }

    #[test]
    fn quartiles_interpolate() {
        let (q1, q3) = quartiles(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(approx(q1, 1.75));
        assert!(approx(q3, 3.25));
    }

    #[test]
    fn result_stays_within_input_range() {
        let cases: [&[f64]; 5] = [
            &[5.0],
            &[3.0, 700.0],
            &[1.0, 2.0, 1000.0],
            &[100.0, 101.0, 99.0, 400.0, 98.0],
            &[0.0, 0.0, 0.0, 1000.0, 1000.0, 1000.0],
        ];
        for values in cases {
            let m = robust_mean(values).unwrap();
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            assert!(m >= min && m <= max, "{m} outside [{min}, {max}] for {values:?}");
        }
    }
}
