//! Unconstrained-to-constrained maps for posterior parameters, and
//! the bijective transforms applied to parameter samples.

use candle_core::{Result, Tensor};
use candle_nn::ops;

/// Box constraint on a posterior parameter.
///
/// * no bounds: identity
/// * lower only: `lb + exp(x)`
/// * upper only: `ub - exp(x)`
/// * both: `lb + (ub - lb) * sigmoid(x)`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bound {
    pub lb: Option<f64>,
    pub ub: Option<f64>,
}

impl Bound {
    pub fn none() -> Self {
        Self { lb: None, ub: None }
    }

    pub fn lower(lb: f64) -> Self {
        Self {
            lb: Some(lb),
            ub: None,
        }
    }

    pub fn upper(ub: f64) -> Self {
        Self {
            lb: None,
            ub: Some(ub),
        }
    }

    pub fn between(lb: f64, ub: f64) -> Self {
        Self {
            lb: Some(lb),
            ub: Some(ub),
        }
    }

    pub fn is_valid(&self) -> bool {
        match (self.lb, self.ub) {
            (Some(lb), Some(ub)) => lb < ub,
            _ => true,
        }
    }

    pub fn apply(&self, x: &Tensor) -> Result<Tensor> {
        match (self.lb, self.ub) {
            (None, None) => Ok(x.clone()),
            (Some(lb), None) => x.exp()? + lb,
            (None, Some(ub)) => x.exp()?.neg()? + ub,
            (Some(lb), Some(ub)) => ops::sigmoid(x)?.affine(ub - lb, lb),
        }
    }

    pub fn apply_f64(&self, x: f64) -> f64 {
        match (self.lb, self.ub) {
            (None, None) => x,
            (Some(lb), None) => lb + x.exp(),
            (None, Some(ub)) => ub - x.exp(),
            (Some(lb), Some(ub)) => lb + (ub - lb) / (1.0 + (-x).exp()),
        }
    }

    /// Map a constrained value back to the unconstrained scale.
    pub fn inverse_f64(&self, y: f64) -> f64 {
        match (self.lb, self.ub) {
            (None, None) => y,
            (Some(lb), None) => (y - lb).ln(),
            (None, Some(ub)) => (ub - y).ln(),
            (Some(lb), Some(ub)) => {
                let p = (y - lb) / (ub - lb);
                (p / (1.0 - p)).ln()
            }
        }
    }

    pub fn contains(&self, y: f64) -> bool {
        self.lb.is_none_or(|lb| y >= lb) && self.ub.is_none_or(|ub| y <= ub)
    }
}

/// Bijective transform applied to posterior samples and means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bijector {
    #[default]
    Identity,
    Exp,
    Square,
    Sqrt,
    Reciprocal,
    Softplus,
}

impl Bijector {
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Bijector::Identity => Ok(x.clone()),
            Bijector::Exp => x.exp(),
            Bijector::Square => x.sqr(),
            Bijector::Sqrt => x.sqrt(),
            Bijector::Reciprocal => x.recip(),
            Bijector::Softplus => softplus(x),
        }
    }

    pub fn inverse(&self, y: &Tensor) -> Result<Tensor> {
        match self {
            Bijector::Identity => Ok(y.clone()),
            Bijector::Exp => y.log(),
            Bijector::Square => y.sqrt(),
            Bijector::Sqrt => y.sqr(),
            Bijector::Reciprocal => y.recip(),
            Bijector::Softplus => (y.exp()? - 1.0)?.log(),
        }
    }

    pub fn forward_f64(&self, x: f64) -> f64 {
        match self {
            Bijector::Identity => x,
            Bijector::Exp => x.exp(),
            Bijector::Square => x * x,
            Bijector::Sqrt => x.sqrt(),
            Bijector::Reciprocal => 1.0 / x,
            Bijector::Softplus => x.max(0.0) + (-x.abs()).exp().ln_1p(),
        }
    }

    pub fn inverse_f64(&self, y: f64) -> f64 {
        match self {
            Bijector::Identity => y,
            Bijector::Exp => y.ln(),
            Bijector::Square => y.sqrt(),
            Bijector::Sqrt => y * y,
            Bijector::Reciprocal => 1.0 / y,
            Bijector::Softplus => y.exp_m1().ln(),
        }
    }

    /// Values of `x` for which `inverse(forward(x)) == x`.
    pub fn domain_contains(&self, x: f64) -> bool {
        match self {
            Bijector::Square | Bijector::Sqrt => x >= 0.0,
            Bijector::Reciprocal => x != 0.0,
            _ => x.is_finite(),
        }
    }
}

/// Numerically stable `log(1 + exp(x))`.
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    x.relu()? + tail
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    #[test]
    fn bounds_map_into_range() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::new(&[-3.0f64, -0.5, 0.0, 0.5, 3.0], &device)?;

        let lower = Bound::lower(0.0).apply(&x)?.to_vec1::<f64>()?;
        assert!(lower.iter().all(|&v| v > 0.0));

        let upper = Bound::upper(1.0).apply(&x)?.to_vec1::<f64>()?;
        assert!(upper.iter().all(|&v| v < 1.0));

        let both = Bound::between(-2.0, 5.0).apply(&x)?.to_vec1::<f64>()?;
        assert!(both.iter().all(|&v| v > -2.0 && v < 5.0));

        for bound in [Bound::none(), Bound::lower(1.0), Bound::upper(-1.0), Bound::between(0.0, 2.0)] {
            for v in [-2.0, 0.3, 1.7] {
                assert_abs_diff_eq!(bound.inverse_f64(bound.apply_f64(v)), v, epsilon = 1e-9);
            }
        }
        Ok(())
    }

    #[test]
    fn bijector_round_trip() -> Result<()> {
        let device = Device::Cpu;
        let xs = [0.1f64, 0.5, 1.0, 2.5, 7.0];
        let x = Tensor::new(&xs, &device)?;
        for b in [
            Bijector::Identity,
            Bijector::Exp,
            Bijector::Square,
            Bijector::Sqrt,
            Bijector::Reciprocal,
            Bijector::Softplus,
        ] {
            let back = b.inverse(&b.forward(&x)?)?.to_vec1::<f64>()?;
            for (a, e) in back.iter().zip(xs.iter()) {
                assert_abs_diff_eq!(*a, *e, epsilon = 1e-9);
            }
            for &v in xs.iter().chain([-1.5, -0.2].iter()) {
                if b.domain_contains(v) {
                    assert_abs_diff_eq!(b.inverse_f64(b.forward_f64(v)), v, epsilon = 1e-9);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn softplus_is_stable() -> Result<()> {
        let x = Tensor::new(&[-50f32, 0.0, 50.0], &Device::Cpu)?.to_dtype(DType::F32)?;
        let y = softplus(&x)?.to_vec1::<f32>()?;
        assert_abs_diff_eq!(y[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y[1], std::f32::consts::LN_2, epsilon = 1e-6);
        assert_abs_diff_eq!(y[2], 50.0, epsilon = 1e-4);
        Ok(())
    }
}
