use super::{broadcast_pair, extend_shape, Density, DistributionOp, Family};
use crate::binder::ArgSpec;
use crate::error::Result;
use crate::graph::BuiltArgs;
use crate::transform::Bound;

use candle_core::Tensor;
use candle_nn::Init;
use std::f64::consts::PI;
use std::sync::Arc;

/// Cauchy distribution with location `loc` and scale `scale`
pub struct Cauchy;

impl DistributionOp for Cauchy {
    fn name(&self) -> &'static str {
        "Cauchy"
    }

    fn family(&self) -> Family {
        Family::Cauchy
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![
            ArgSpec::with_default("loc", 0.0),
            ArgSpec::with_default("scale", 1.0),
        ]
    }

    fn bounds(&self, param: &str) -> Bound {
        match param {
            "scale" => Bound::lower(0.0),
            _ => Bound::none(),
        }
    }

    fn initializer(&self, param: &str) -> Init {
        match param {
            "scale" => Init::Uniform { lo: -0.7, up: 0.4 },
            _ => Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        }
    }

    fn density(&self, args: &BuiltArgs) -> Result<Arc<dyn Density>> {
        Ok(Arc::new(CauchyDensity::new(args.get("loc")?, args.get("scale")?)?))
    }
}

#[derive(Debug, Clone)]
pub struct CauchyDensity {
    loc: Tensor,
    scale: Tensor,
}

impl CauchyDensity {
    pub fn new(loc: &Tensor, scale: &Tensor) -> candle_core::Result<Self> {
        let (loc, scale) = broadcast_pair(loc, scale, "cauchy")?;
        Ok(Self { loc, scale })
    }
}

impl Density for CauchyDensity {
    fn family(&self) -> Family {
        Family::Cauchy
    }

    fn batch_shape(&self) -> &[usize] {
        self.loc.dims()
    }

    /// log p(x) = -ln(π) - ln(γ) - ln(1 + ((x - x0)/γ)²)
    fn log_prob(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let z = x.broadcast_sub(&self.loc)?.broadcast_div(&self.scale)?;
        let tail = (z.sqr()? + 1.0)?.log()?.neg()?;
        tail.broadcast_sub(&self.scale.log()?)? - PI.ln()
    }

    /// The mean is undefined; the location (median and mode) stands in.
    fn mean(&self) -> candle_core::Result<Tensor> {
        Ok(self.loc.clone())
    }

    /// Inverse-CDF draw: x0 + γ * tan(π (u - 1/2))
    fn sample(&self, prefix: &[usize]) -> candle_core::Result<Tensor> {
        let shape = extend_shape(prefix, self.batch_shape());
        let u = Tensor::rand(1e-6f32, 1.0 - 1e-6f32, shape, self.loc.device())?
            .to_dtype(self.loc.dtype())?;
        let angle = u.affine(PI, -0.5 * PI)?;
        let tan = (angle.sin()? / angle.cos()?)?;
        tan.broadcast_mul(&self.scale)?.broadcast_add(&self.loc)
    }

    fn location_scale(&self) -> Option<(&Tensor, &Tensor)> {
        Some((&self.loc, &self.scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    #[test]
    fn test_log_prob_and_median() -> candle_core::Result<()> {
        let device = Device::Cpu;
        let loc = Tensor::new(1.0f64, &device)?;
        let scale = Tensor::new(2.0f64, &device)?;
        let dens = CauchyDensity::new(&loc, &scale)?;

        let lp = dens.log_prob(&Tensor::new(&[1.0f64, 3.0], &device)?)?.to_vec1::<f64>()?;
        assert_abs_diff_eq!(lp[0], -(PI * 2.0).ln(), epsilon = 1e-9);
        assert_abs_diff_eq!(lp[1], -(PI * 2.0).ln() - 2f64.ln(), epsilon = 1e-9);

        let x = dens.sample(&[10001])?.to_dtype(DType::F64)?.to_vec1::<f64>()?;
        let mut x = x;
        x.sort_by(|a, b| a.total_cmp(b));
        assert_abs_diff_eq!(x[5000], 1.0, epsilon = 0.2);
        Ok(())
    }
}
