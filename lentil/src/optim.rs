//! Optimizer selection for `fit`.

use crate::error::Result;

use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, SGD};

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizerKind {
    /// Adam (AdamW without weight decay)
    #[default]
    Adam,
    AdamW,
    Sgd,
}

/// Optimizer family and its options; the learning rate is set by `fit`.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    /// only used by [`OptimizerKind::AdamW`]
    pub weight_decay: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.01,
        }
    }
}

impl OptimizerConfig {
    pub fn new(kind: OptimizerKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }
}

/// A constructed optimizer minimizing a scalar loss.
pub enum FitOptimizer {
    Adam(AdamW),
    Sgd(SGD),
}

impl FitOptimizer {
    pub fn new(config: &OptimizerConfig, vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let adam = |weight_decay: f64| ParamsAdamW {
            lr: learning_rate,
            beta1: config.beta1,
            beta2: config.beta2,
            eps: config.eps,
            weight_decay,
        };
        let opt = match config.kind {
            OptimizerKind::Adam => FitOptimizer::Adam(AdamW::new(vars, adam(0.0))?),
            OptimizerKind::AdamW => FitOptimizer::Adam(AdamW::new(vars, adam(config.weight_decay))?),
            OptimizerKind::Sgd => FitOptimizer::Sgd(SGD::new(vars, learning_rate)?),
        };
        Ok(opt)
    }

    /// Backpropagate `loss` and update every variable once.
    pub fn step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            FitOptimizer::Adam(opt) => opt.backward_step(loss)?,
            FitOptimizer::Sgd(opt) => opt.backward_step(loss)?,
        }
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            FitOptimizer::Adam(opt) => opt.learning_rate(),
            FitOptimizer::Sgd(opt) => opt.learning_rate(),
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            FitOptimizer::Adam(opt) => opt.set_learning_rate(lr),
            FitOptimizer::Sgd(opt) => opt.set_learning_rate(lr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_sgd_step_moves_toward_minimum() -> Result<()> {
        let w = Var::zeros(1, DType::F32, &Device::Cpu)?;
        let mut opt = FitOptimizer::new(&OptimizerConfig::new(OptimizerKind::Sgd), vec![w.clone()], 0.1)?;
        for _ in 0..50 {
            let loss = (w.as_tensor() - 3.0)?.sqr()?.sum_all()?;
            opt.step(&loss)?;
        }
        let v = w.as_tensor().to_vec1::<f32>()?[0];
        assert!((v - 3.0).abs() < 1e-3);
        assert_eq!(opt.learning_rate(), 0.1);
        opt.set_learning_rate(0.0);
        assert_eq!(opt.learning_rate(), 0.0);
        Ok(())
    }

    #[test]
    fn test_adam_kinds() -> Result<()> {
        let w = Var::ones(2, DType::F32, &Device::Cpu)?;
        for kind in [OptimizerKind::Adam, OptimizerKind::AdamW] {
            let mut opt = FitOptimizer::new(&OptimizerConfig::new(kind), vec![w.clone()], 0.01)?;
            let loss = w.as_tensor().sqr()?.sum_all()?;
            opt.step(&loss)?;
        }
        let v = w.as_tensor().to_vec1::<f32>()?;
        assert!(v.iter().all(|&x| x < 1.0));
        Ok(())
    }
}
