use super::{broadcast_pair, extend_shape, Density, DistributionOp, Family};
use crate::binder::ArgSpec;
use crate::error::Result;
use crate::graph::BuiltArgs;
use crate::transform::Bound;

use candle_core::Tensor;
use candle_nn::Init;
use std::sync::Arc;

const HALF_LN_2PI: f64 = 0.918_938_533_204_672_8;

/// Normal distribution `N(loc, scale^2)`
pub struct Normal;

impl DistributionOp for Normal {
    fn name(&self) -> &'static str {
        "Normal"
    }

    fn family(&self) -> Family {
        Family::Normal
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
        Ok(Arc::new(NormalDensity::new(args.get("loc")?, args.get("scale")?)?))
    }
}

#[derive(Debug, Clone)]
pub struct NormalDensity {
    loc: Tensor,
    scale: Tensor,
}

impl NormalDensity {
    pub fn new(loc: &Tensor, scale: &Tensor) -> candle_core::Result<Self> {
        let (loc, scale) = broadcast_pair(loc, scale, "normal")?;
        Ok(Self { loc, scale })
    }

    pub fn scale(&self) -> &Tensor {
        &self.scale
    }
}

impl Density for NormalDensity {
    fn family(&self) -> Family {
        Family::Normal
    }

    fn batch_shape(&self) -> &[usize] {
        self.loc.dims()
    }

    /// log N(x; μ, σ²) = -0.5 * ((x-μ)/σ)² - ln(σ) - 0.5 * ln(2π)
    fn log_prob(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let z = x.broadcast_sub(&self.loc)?.broadcast_div(&self.scale)?;
        let quad = (z.sqr()? * -0.5)?;
        quad.broadcast_sub(&self.scale.log()?)? - HALF_LN_2PI
    }

    fn mean(&self) -> candle_core::Result<Tensor> {
        Ok(self.loc.clone())
    }

    fn sample(&self, prefix: &[usize]) -> candle_core::Result<Tensor> {
        let shape = extend_shape(prefix, self.batch_shape());
        let eps = Tensor::randn(0f32, 1f32, shape, self.loc.device())?.to_dtype(self.loc.dtype())?;
        eps.broadcast_mul(&self.scale)?.broadcast_add(&self.loc)
    }

    fn location_scale(&self) -> Option<(&Tensor, &Tensor)> {
        Some((&self.loc, &self.scale))
    }
}
