use super::{extend_shape, Density, DistributionOp, Family};
use crate::binder::ArgSpec;
use crate::error::Result;
use crate::graph::BuiltArgs;
use crate::transform::softplus;

use candle_core::Tensor;
use candle_nn::ops;
use std::sync::Arc;

/// Bernoulli distribution parameterized by `logits`
pub struct Bernoulli;

impl DistributionOp for Bernoulli {
    fn name(&self) -> &'static str {
        "Bernoulli"
    }

    fn family(&self) -> Family {
        Family::Bernoulli
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![ArgSpec::required("logits")]
    }

    fn density(&self, args: &BuiltArgs) -> Result<Arc<dyn Density>> {
        Ok(Arc::new(BernoulliDensity::new(args.get("logits")?)))
    }
}

#[derive(Debug, Clone)]
pub struct BernoulliDensity {
    logits: Tensor,
}

impl BernoulliDensity {
    pub fn new(logits: &Tensor) -> Self {
        Self {
            logits: logits.clone(),
        }
    }

    pub fn probs(&self) -> candle_core::Result<Tensor> {
        ops::sigmoid(&self.logits)
    }
}

impl Density for BernoulliDensity {
    fn family(&self) -> Family {
        Family::Bernoulli
    }

    fn batch_shape(&self) -> &[usize] {
        self.logits.dims()
    }

    /// log p(x) = x * l - log(1 + exp(l))
    fn log_prob(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        x.broadcast_mul(&self.logits)?
            .broadcast_sub(&softplus(&self.logits)?)
    }

    fn mean(&self) -> candle_core::Result<Tensor> {
        self.probs()
    }

    fn mode(&self) -> candle_core::Result<Tensor> {
        self.logits.gt(0.0)?.to_dtype(self.logits.dtype())
    }

    fn sample(&self, prefix: &[usize]) -> candle_core::Result<Tensor> {
        let shape = extend_shape(prefix, self.batch_shape());
        let u = Tensor::rand(0f32, 1f32, shape, self.logits.device())?.to_dtype(self.logits.dtype())?;
        u.broadcast_lt(&self.probs()?)?.to_dtype(self.logits.dtype())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    #[test]
    fn test_log_prob_and_mode() -> candle_core::Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::new(&[0.0f64, 2.0, -1.0], &device)?;
        let dens = BernoulliDensity::new(&logits);

        let lp = dens.log_prob(&Tensor::new(&[1.0f64, 1.0, 0.0], &device)?)?.to_vec1::<f64>()?;
        let sig = |l: f64| 1.0 / (1.0 + (-l).exp());
        assert_abs_diff_eq!(lp[0], 0.5f64.ln(), epsilon = 1e-9);
        assert_abs_diff_eq!(lp[1], sig(2.0).ln(), epsilon = 1e-9);
        assert_abs_diff_eq!(lp[2], (1.0 - sig(-1.0)).ln(), epsilon = 1e-9);

        assert_eq!(dens.mode()?.to_vec1::<f64>()?, vec![0.0, 1.0, 0.0]);

        let x = dens.sample(&[4000])?.to_dtype(DType::F64)?.mean(0)?.to_vec1::<f64>()?;
        assert_abs_diff_eq!(x[1], sig(2.0), epsilon = 0.05);
        Ok(())
    }
}
