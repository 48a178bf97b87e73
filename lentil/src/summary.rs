//! Summaries of predictive samples.

use crate::error::{Result, VariationalError};

use ndarray::{ArrayD, Axis, IxDyn, Zip};

/// Percentiles (0..=100) along the leading sample axis, with linear
/// interpolation between order statistics.
///
/// * `samples` - `[n, ...]`
///
/// # Returns
/// `[prcs.len(), ...]`
pub fn percentiles(samples: &ArrayD<f32>, prcs: &[f64]) -> Result<ArrayD<f32>> {
    if samples.ndim() == 0 || samples.shape()[0] == 0 {
        return Err(VariationalError::invalid_value("samples", "must not be empty"));
    }
    if let Some(p) = prcs.iter().find(|p| !(0.0..=100.0).contains(*p)) {
        return Err(VariationalError::invalid_value(
            "prcs",
            format!("must be between 0 and 100, got {}", p),
        ));
    }

    let mut shape = samples.shape().to_vec();
    shape[0] = prcs.len();
    let mut out = ArrayD::<f32>::zeros(IxDyn(&shape));
    if prcs.is_empty() {
        return Ok(out);
    }

    Zip::from(out.lanes_mut(Axis(0)))
        .and(samples.lanes(Axis(0)))
        .for_each(|mut dst, src| {
            let mut sorted = src.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            for (d, &p) in dst.iter_mut().zip(prcs) {
                *d = interpolate(&sorted, p / 100.0);
            }
        });
    Ok(out)
}

fn interpolate(sorted: &[f32], q: f64) -> f32 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = (pos - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Average `values` within `bins` equal-width bins of `by`.
///
/// # Returns
/// `(bin centers, per-bin means)`; empty bins are NaN
pub fn bin_by(by: &[f32], values: &[f32], bins: usize) -> Result<(Vec<f32>, Vec<f32>)> {
    if bins < 1 {
        return Err(VariationalError::invalid_value("bins", "must be positive"));
    }
    if by.len() != values.len() || by.is_empty() {
        return Err(VariationalError::InvalidData(format!(
            "cannot bin {} values by {} keys",
            values.len(),
            by.len()
        )));
    }

    let lo = by.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = by.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let width = if hi > lo { (hi - lo) / bins as f32 } else { 1.0 };

    let mut sums = vec![0f32; bins];
    let mut counts = vec![0usize; bins];
    for (&b, &v) in by.iter().zip(values) {
        let ix = (((b - lo) / width) as usize).min(bins - 1);
        sums[ix] += v;
        counts[ix] += 1;
    }

    let centers = (0..bins).map(|i| lo + width * (i as f32 + 0.5)).collect();
    let means = sums
        .iter()
        .zip(&counts)
        .map(|(&s, &c)| if c > 0 { s / c as f32 } else { f32::NAN })
        .collect();
    Ok((centers, means))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    #[test]
    fn test_percentiles() -> Result<()> {
        let s = Array1::from_iter((0..=100).map(|i| i as f32))
            .into_shape_with_order((101, 1))?
            .into_dyn();
        let p = percentiles(&s, &[2.5, 50.0, 100.0])?;
        assert_eq!(p.shape(), &[3, 1]);
        let p = p.iter().copied().collect::<Vec<_>>();
        assert_abs_diff_eq!(p[0], 2.5, epsilon = 1e-5);
        assert_abs_diff_eq!(p[1], 50.0, epsilon = 1e-5);
        assert_abs_diff_eq!(p[2], 100.0, epsilon = 1e-5);
        assert!(percentiles(&s, &[101.0]).is_err());
        Ok(())
    }

    #[test]
    fn test_bin_by() -> Result<()> {
        let by = [0.0f32, 1.0, 2.0, 3.0, 4.0];
        let vals = [1.0f32, 1.0, 5.0, 3.0, 3.0];
        let (centers, means) = bin_by(&by, &vals, 2)?;
        assert_eq!(centers, vec![1.0, 3.0]);
        assert_eq!(means, vec![1.0, 11.0 / 3.0]);
        assert!(bin_by(&by, &vals[..2], 2).is_err());
        Ok(())
    }
}
