use super::{extend_shape, Density, DistributionOp, Family};
use crate::binder::ArgSpec;
use crate::error::Result;
use crate::graph::BuiltArgs;
use crate::transform::Bound;

use candle_core::{DType, Tensor};
use candle_nn::Init;
use rand_distr::Distribution;
use special::Gamma as SpecialGamma;
use std::sync::Arc;

/// Poisson distribution with rate `rate`
pub struct Poisson;

impl DistributionOp for Poisson {
    fn name(&self) -> &'static str {
        "Poisson"
    }

    fn family(&self) -> Family {
        Family::Poisson
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![ArgSpec::required("rate")]
    }

    fn bounds(&self, _param: &str) -> Bound {
        Bound::lower(0.0)
    }

    fn initializer(&self, _param: &str) -> Init {
        Init::Uniform { lo: 0.0, up: 3.0 }
    }

    fn density(&self, args: &BuiltArgs) -> Result<Arc<dyn Density>> {
        Ok(Arc::new(PoissonDensity::new(args.get("rate")?)))
    }
}

#[derive(Debug, Clone)]
pub struct PoissonDensity {
    rate: Tensor,
}

impl PoissonDensity {
    pub fn new(rate: &Tensor) -> Self {
        Self { rate: rate.clone() }
    }
}

impl Density for PoissonDensity {
    fn family(&self) -> Family {
        Family::Poisson
    }

    fn batch_shape(&self) -> &[usize] {
        self.rate.dims()
    }

    /// log p(k) = k ln λ - λ - ln Γ(k + 1)
    fn log_prob(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let klogr = x.broadcast_mul(&self.rate.log()?)?;
        klogr
            .broadcast_sub(&self.rate)?
            .broadcast_sub(&ln_factorial(x)?)
    }

    fn mean(&self) -> candle_core::Result<Tensor> {
        Ok(self.rate.clone())
    }

    fn mode(&self) -> candle_core::Result<Tensor> {
        self.rate.floor()
    }

    /// Draws are not reparameterizable; sampled on the host.
    fn sample(&self, prefix: &[usize]) -> candle_core::Result<Tensor> {
        let shape = extend_shape(prefix, self.batch_shape());
        let rates = self
            .rate
            .detach()
            .broadcast_as(shape.clone())?
            .to_dtype(DType::F64)?
            .flatten_all()?
            .to_vec1::<f64>()?;

        let mut rng = rand::rng();
        let draws = rates
            .iter()
            .map(|&l| match rand_distr::Poisson::new(l) {
                Ok(rpois) => rpois.sample(&mut rng),
                Err(_) => 0.0,
            })
            .collect::<Vec<f64>>();

        Tensor::from_vec(draws, shape, self.rate.device())?.to_dtype(self.rate.dtype())
    }
}

/// Element-wise ln(k!) computed on the host. Observations carry no
/// gradient, so the result is a constant.
fn ln_factorial(x: &Tensor) -> candle_core::Result<Tensor> {
    let vals = x
        .detach()
        .to_dtype(DType::F64)?
        .flatten_all()?
        .to_vec1::<f64>()?
        .into_iter()
        .map(|k| SpecialGamma::ln_gamma(k + 1.0).0)
        .collect::<Vec<f64>>();
    Tensor::from_vec(vals, x.dims(), x.device())?.to_dtype(x.dtype())
}
