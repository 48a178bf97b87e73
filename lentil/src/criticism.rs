//! Criticism of a fitted model: predictions, predictive distributions,
//! coverage and calibration.
//!
//! Every method requires a fit model. `x`/`y` may be new data in the
//! layout used for fitting (samples along the first axis).

use crate::distributions::Density;
use crate::error::{Result, VariationalError};
use crate::fit::Metric;
use crate::model::{as_samples, Model};
use crate::summary::{bin_by, percentiles};
use crate::tensor_util::{row_sums, to_array};

use candle_core::{Shape, Tensor};
use ndarray::{ArrayD, Axis, IxDyn, Zip};
use std::sync::Arc;

impl Model {
    /// Point predictions: the mean of the mean-path predictive
    /// distribution, or its mode for discrete models.
    pub fn predict(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.point_prediction(self.context()?, x)
    }

    /// Evaluate named metrics (`acc`, `accuracy`, `mse`, `sse`, `mae`)
    pub fn metrics(&self, names: &[&str], x: &ArrayD<f32>, y: &ArrayD<f32>) -> Result<Vec<(Metric, f32)>> {
        let metrics = names.iter().map(|m| m.parse()).collect::<Result<Vec<Metric>>>()?;
        let pred = self.predict(x)?;
        let y = as_samples(y)?;
        metrics
            .into_iter()
            .map(|m| Ok((m, m.evaluate(&pred, &y)?)))
            .collect()
    }

    /// `y - predict(x)`
    pub fn residuals(&self, x: &ArrayD<f32>, y: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let y = as_samples(y)?;
        let pred = self.predict(x)?;
        let pred = pred
            .broadcast(y.raw_dim())
            .ok_or_else(|| VariationalError::InvalidData("predictions do not match y".to_string()))?;
        Ok(&y - &pred)
    }

    /// Sample-path predictive distributions, one per build
    fn sample_densities(&self, x: &ArrayD<f32>, num_samples: usize) -> Result<Vec<Arc<dyn Density>>> {
        if num_samples < 1 {
            return Err(VariationalError::invalid_value("num_samples", "must be positive"));
        }
        let ctx = self.context()?;
        (0..num_samples)
            .map(|_| self.build_on(ctx, x)?.sample_density())
            .collect()
    }

    /// Draws from the posterior predictive distribution, `[n, N, ...]`
    pub fn predictive_distribution(&self, x: &ArrayD<f32>, num_samples: usize) -> Result<ArrayD<f32>> {
        let nrows = as_samples(x)?.shape()[0];
        let draws = self
            .sample_densities(x, num_samples)?
            .iter()
            .map(|d| per_row(&d.sample(&[])?, nrows))
            .collect::<Result<Vec<_>>>()?;
        to_array(&Tensor::stack(&draws, 0)?)
    }

    /// Log probability of each observation under `num_samples` draws of
    /// the predictive distribution, `[n, N]`
    pub fn log_prob(&self, x: &ArrayD<f32>, y: &ArrayD<f32>, num_samples: usize) -> Result<ArrayD<f32>> {
        let ctx = self.context()?;
        let y = as_samples(y)?;
        let nrows = y.shape()[0];
        let yt = crate::tensor_util::from_array(&y, ctx.dtype(), ctx.device())?;
        let lps = self
            .sample_densities(x, num_samples)?
            .iter()
            .map(|d| {
                let lp = per_row(&d.log_prob(&yt)?, nrows)?;
                Ok(row_sums(&lp)?)
            })
            .collect::<Result<Vec<_>>>()?;
        to_array(&Tensor::stack(&lps, 0)?)
    }

    /// `exp(log_prob)`, `[n, N]`
    pub fn prob(&self, x: &ArrayD<f32>, y: &ArrayD<f32>, num_samples: usize) -> Result<ArrayD<f32>> {
        Ok(self.log_prob(x, y, num_samples)?.mapv(f32::exp))
    }

    /// Empirical predictive CDF evaluated at each observation, `[N]`
    pub fn cdf(&self, x: &ArrayD<f32>, y: &ArrayD<f32>, num_samples: usize) -> Result<Vec<f32>> {
        let draws = self.predictive_distribution(x, num_samples)?;
        fraction_below(&draws, &as_samples(y)?, true)
    }

    /// Mean log probability per observation, binned by column `by` of `x`
    pub fn log_prob_by(
        &self,
        x: &ArrayD<f32>,
        y: &ArrayD<f32>,
        by: usize,
        bins: usize,
        num_samples: usize,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        let lp = self.log_prob(x, y, num_samples)?;
        bin_by(&column(x, by)?, &sample_means(&lp), bins)
    }

    /// Mean probability per observation, binned by column `by` of `x`
    pub fn prob_by(
        &self,
        x: &ArrayD<f32>,
        y: &ArrayD<f32>,
        by: usize,
        bins: usize,
        num_samples: usize,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        let p = self.prob(x, y, num_samples)?;
        bin_by(&column(x, by)?, &sample_means(&p), bins)
    }

    /// Predictive CDF at each observation, binned by column `by` of `x`
    pub fn cdf_by(
        &self,
        x: &ArrayD<f32>,
        y: &ArrayD<f32>,
        by: usize,
        bins: usize,
        num_samples: usize,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        let c = self.cdf(x, y, num_samples)?;
        bin_by(&column(x, by)?, &c, bins)
    }

    /// Percentiles (0..=100) of the predictive distribution,
    /// `[prcs.len(), N, ...]`
    pub fn confidence_intervals(&self, x: &ArrayD<f32>, prcs: &[f64], num_samples: usize) -> Result<ArrayD<f32>> {
        let draws = self.predictive_distribution(x, num_samples)?;
        percentiles(&draws, prcs)
    }

    /// Fraction of predictive draws strictly below each observation, `[N]`
    pub fn predictive_prc(&self, x: &ArrayD<f32>, y: &ArrayD<f32>, num_samples: usize) -> Result<Vec<f32>> {
        let draws = self.predictive_distribution(x, num_samples)?;
        fraction_below(&draws, &as_samples(y)?, false)
    }

    /// Whether each observation falls inside the central `prc` percent
    /// (0..=100) predictive interval
    pub fn pred_dist_covered(
        &self,
        x: &ArrayD<f32>,
        y: &ArrayD<f32>,
        prc: f64,
        num_samples: usize,
    ) -> Result<Vec<bool>> {
        if !(0.0..=100.0).contains(&prc) {
            return Err(VariationalError::invalid_value("prc", "must be between 0 and 100"));
        }
        let (lo, hi) = ((0.5 - prc / 200.0) as f32, (0.5 + prc / 200.0) as f32);
        Ok(self
            .predictive_prc(x, y, num_samples)?
            .into_iter()
            .map(|p| p >= lo && p < hi)
            .collect())
    }

    /// Fraction of observations covered by the central `prc` percent
    /// interval
    pub fn pred_dist_coverage(&self, x: &ArrayD<f32>, y: &ArrayD<f32>, prc: f64, num_samples: usize) -> Result<f32> {
        let covered = self.pred_dist_covered(x, y, prc, num_samples)?;
        Ok(covered.iter().filter(|&&c| c).count() as f32 / covered.len().max(1) as f32)
    }

    /// Coverage of the central `prc` interval, binned by column `by` of `x`
    pub fn coverage_by(
        &self,
        x: &ArrayD<f32>,
        y: &ArrayD<f32>,
        by: usize,
        prc: f64,
        bins: usize,
        num_samples: usize,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        let covered = self
            .pred_dist_covered(x, y, prc, num_samples)?
            .into_iter()
            .map(|c| c as u8 as f32)
            .collect::<Vec<_>>();
        bin_by(&column(x, by)?, &covered, bins)
    }

    /// Calibration of the predictive distribution.
    ///
    /// Continuous models: for expected levels `i / bins` the observed
    /// fraction of predictive percentiles at or below each level.
    /// Discrete models: predictive probability of the modal prediction
    /// against how often it matches, averaged in `bins` bins.
    ///
    /// # Returns
    /// `(expected, observed)`
    pub fn calibration_curve(
        &self,
        x: &ArrayD<f32>,
        y: &ArrayD<f32>,
        bins: usize,
        num_samples: usize,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        if bins < 1 {
            return Err(VariationalError::invalid_value("bins", "must be positive"));
        }
        if !self.is_discrete() {
            let prc = self.predictive_prc(x, y, num_samples)?;
            let n = prc.len().max(1) as f32;
            let levels = (1..=bins).map(|i| i as f32 / bins as f32).collect::<Vec<_>>();
            let observed = levels
                .iter()
                .map(|&l| prc.iter().filter(|&&p| p <= l).count() as f32 / n)
                .collect();
            return Ok((levels, observed));
        }

        let y = as_samples(y)?;
        let mode = self.predict(x)?;
        let mode = mode
            .broadcast(y.raw_dim())
            .ok_or_else(|| VariationalError::InvalidData("predictions do not match y".to_string()))?
            .to_owned();
        let draws = self.predictive_distribution(x, num_samples)?;
        let draws = broadcast_draws(&draws, y.shape())?;

        let mut prob = ArrayD::<f32>::zeros(y.raw_dim());
        Zip::from(&mut prob)
            .and(draws.lanes(Axis(0)))
            .and(&mode)
            .for_each(|p, lane, &m| {
                *p = lane.iter().filter(|&&v| v == m).count() as f32 / lane.len() as f32;
            });
        let hit = Zip::from(&mode).and(&y).map_collect(|&m, &o| (m == o) as u8 as f32);

        let prob = prob.iter().copied().collect::<Vec<_>>();
        let hit = hit.iter().copied().collect::<Vec<_>>();
        let (_, expected) = bin_by(&prob, &prob, bins)?;
        let (_, observed) = bin_by(&prob, &hit, bins)?;
        Ok((expected, observed))
    }

    /// Bayesian R² of each of `num_samples` posterior draws:
    /// `var(fit) / (var(fit) + var(residual))`
    pub fn r_squared(&self, x: &ArrayD<f32>, y: &ArrayD<f32>, num_samples: usize) -> Result<Vec<f32>> {
        let y = as_samples(y)?;
        let nrows = y.shape()[0];
        self.sample_densities(x, num_samples)?
            .iter()
            .map(|d| {
                let fit = to_array(&per_row(&d.mean()?, nrows)?)?;
                let fit = broadcast_to(&fit, y.shape())?;
                let res = &y - &fit;
                let (vf, vr) = (variance(&fit), variance(&res));
                Ok(if vf + vr > 0.0 { vf / (vf + vr) } else { 0.0 })
            })
            .collect()
    }
}

//
// Helper functions
//

/// Broadcast a per-draw tensor so its leading axis has one entry per row.
fn per_row(t: &Tensor, nrows: usize) -> Result<Tensor> {
    if t.rank() >= 1 && t.dim(0)? == nrows {
        return Ok(t.clone());
    }
    let shape: Shape = t.shape().broadcast_shape_binary_op(&Shape::from((nrows, 1)), "per_row")?;
    Ok(t.broadcast_as(shape)?.contiguous()?)
}

fn broadcast_to(a: &ArrayD<f32>, shape: &[usize]) -> Result<ArrayD<f32>> {
    a.broadcast(IxDyn(shape))
        .map(|v| v.to_owned())
        .ok_or_else(|| VariationalError::InvalidData(format!("cannot broadcast {:?} to {:?}", a.shape(), shape)))
}

/// `[n, N, ...]` draws broadcast to `[n, *shape]`
fn broadcast_draws(draws: &ArrayD<f32>, shape: &[usize]) -> Result<ArrayD<f32>> {
    let mut target = vec![draws.shape()[0]];
    target.extend_from_slice(shape);
    broadcast_to(draws, &target)
}

/// Per-row fraction of draws below (or at, if `inclusive`) the
/// observation, averaged over trailing dimensions.
fn fraction_below(draws: &ArrayD<f32>, y: &ArrayD<f32>, inclusive: bool) -> Result<Vec<f32>> {
    let draws = broadcast_draws(draws, y.shape())?;
    let frac = Zip::from(draws.lanes(Axis(0))).and(y).map_collect(|lane, &o| {
        let below = lane
            .iter()
            .filter(|&&v| if inclusive { v <= o } else { v < o })
            .count();
        below as f32 / lane.len() as f32
    });
    Ok(row_means(&frac))
}

fn row_means(a: &ArrayD<f32>) -> Vec<f32> {
    a.outer_iter()
        .map(|row| row.mean().unwrap_or(f32::NAN))
        .collect()
}

/// Mean over the leading sample axis of `[n, N]`
fn sample_means(a: &ArrayD<f32>) -> Vec<f32> {
    a.mean_axis(Axis(0))
        .map(|m| m.iter().copied().collect())
        .unwrap_or_default()
}

fn column(x: &ArrayD<f32>, by: usize) -> Result<Vec<f32>> {
    let x = as_samples(x)?;
    if x.ndim() != 2 {
        return Err(VariationalError::InvalidData(
            "binning requires x with one column per feature".to_string(),
        ));
    }
    if by >= x.shape()[1] {
        return Err(VariationalError::ColumnOutOfRange {
            index: by,
            ncols: x.shape()[1],
        });
    }
    Ok(x.index_axis(Axis(1), by).iter().copied().collect())
}

fn variance(a: &ArrayD<f32>) -> f32 {
    let n = a.len().max(1) as f32;
    let mean = a.sum() / n;
    a.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fraction_below() -> Result<()> {
        // 4 draws of 2 rows
        let draws = array![[[0f32], [5.0]], [[1.0], [6.0]], [[2.0], [7.0]], [[3.0], [8.0]]].into_dyn();
        let y = array![[1.5f32], [6.0]].into_dyn();
        assert_eq!(fraction_below(&draws, &y, true)?, vec![0.5, 0.5]);
        assert_eq!(fraction_below(&draws, &y, false)?, vec![0.5, 0.25]);
        Ok(())
    }

    #[test]
    fn test_column_and_variance() -> Result<()> {
        let x = array![[1f32, 10.0], [2.0, 20.0]].into_dyn();
        assert_eq!(column(&x, 1)?, vec![10.0, 20.0]);
        assert!(column(&x, 2).is_err());
        assert_eq!(variance(&array![1f32, 3.0].into_dyn()), 1.0);
        Ok(())
    }
}
