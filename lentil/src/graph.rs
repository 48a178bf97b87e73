//! Recursive dual build of a node tree.
//!
//! Every node is built twice in lockstep: once on the sample path
//! (stochastic posterior draws) and once on the mean path (posterior
//! means). Three scalar losses accumulate bottom-up along the way:
//!
//! * `sample`: log-loss of the sample path
//! * `mean`: log-loss of the mean path
//! * `kl`: divergence of posteriors from their priors
//!
//! A [`BuildPass`] owns every intermediate result of one pass over one
//! batch; nodes themselves are never mutated.

use crate::binder::Bindings;
use crate::context::ExecutionContext;
use crate::distributions::{Density, Distribution};
use crate::error::{Result, VariationalError};
use crate::layers::Layer;
use crate::node::{Node, NodeId};
use crate::tensor_util::mean_row_sum;
use crate::value::Value;

use candle_core::{DType, Device, Tensor};
use std::collections::HashMap;
use std::sync::Arc;

/// Built argument tensors of one node, in schema order.
#[derive(Debug, Clone, Default)]
pub struct BuiltArgs {
    entries: Vec<(String, Tensor)>,
}

impl BuiltArgs {
    pub fn push(&mut self, name: &str, tensor: Tensor) {
        self.entries.push((name.to_string(), tensor));
    }

    pub fn get(&self, name: &str) -> Result<&Tensor> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, t)| t)
            .ok_or_else(|| VariationalError::MissingArgument {
                node: "built arguments".to_string(),
                required: name.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(k, t)| (k.as_str(), t))
    }
}

/// What a node's build hooks see of the current pass.
pub struct BuildEnv<'a> {
    pub ctx: &'a ExecutionContext,
    /// independent-variable batch `[B, ...]`
    pub x: &'a Tensor,
    pub batch_size: usize,
    /// node being built
    pub node: NodeId,
}

impl BuildEnv<'_> {
    pub fn dtype(&self) -> DType {
        self.ctx.dtype()
    }

    pub fn device(&self) -> &Device {
        self.ctx.device()
    }

    /// Scalar zero in the context's dtype
    pub fn zero(&self) -> Result<Tensor> {
        Ok(Tensor::zeros((), self.dtype(), self.device())?)
    }
}

/// Built output: layers and parameters produce tensors, distributions
/// produce density objects.
#[derive(Clone)]
pub enum Output {
    Tensor(Tensor),
    Density(Arc<dyn Density>),
}

impl Output {
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Output::Tensor(t) => Some(t),
            Output::Density(_) => None,
        }
    }

    pub fn as_density(&self) -> Option<&Arc<dyn Density>> {
        match self {
            Output::Density(d) => Some(d),
            Output::Tensor(_) => None,
        }
    }
}

/// The three parallel scalar losses.
#[derive(Debug, Clone)]
pub struct LossSums {
    pub sample: Tensor,
    pub mean: Tensor,
    pub kl: Tensor,
}

impl LossSums {
    pub fn zeros(env: &BuildEnv) -> Result<Self> {
        Ok(Self {
            sample: env.zero()?,
            mean: env.zero()?,
            kl: env.zero()?,
        })
    }

    pub fn add(&self, other: &LossSums) -> Result<Self> {
        Ok(Self {
            sample: (&self.sample + &other.sample)?,
            mean: (&self.mean + &other.mean)?,
            kl: (&self.kl + &other.kl)?,
        })
    }
}

/// Build result of one node.
///
/// `sums` is what the node's arguments (or a parameter's prior)
/// accumulated; `own` is the node's self contribution. A parent adds
/// both for every node-valued argument.
#[derive(Clone)]
pub struct Built {
    pub sample: Output,
    pub mean: Output,
    pub sums: LossSums,
    pub own: LossSums,
}

impl Built {
    pub fn total(&self) -> Result<LossSums> {
        self.sums.add(&self.own)
    }

    fn tensor<'o>(out: &'o Output, what: &str) -> Result<&'o Tensor> {
        out.as_tensor().ok_or_else(|| VariationalError::InvalidType {
            arg: what.to_string(),
            reason: "a distribution cannot be used as a value".to_string(),
        })
    }

    fn density<'o>(out: &'o Output, what: &str) -> Result<&'o Arc<dyn Density>> {
        out.as_density().ok_or_else(|| VariationalError::InvalidType {
            arg: what.to_string(),
            reason: "expected a distribution".to_string(),
        })
    }

    pub fn sample_tensor(&self) -> Result<Tensor> {
        Ok(Self::tensor(&self.sample, "sample")?.clone())
    }

    pub fn mean_tensor(&self) -> Result<Tensor> {
        Ok(Self::tensor(&self.mean, "mean")?.clone())
    }

    pub fn sample_density(&self) -> Result<Arc<dyn Density>> {
        Ok(Self::density(&self.sample, "sample")?.clone())
    }

    pub fn mean_density(&self) -> Result<Arc<dyn Density>> {
        Ok(Self::density(&self.mean, "mean")?.clone())
    }
}

/// One build pass over one batch of the independent variable.
///
/// Results are memoized by node identity, so a node shared by several
/// parents is built once and its losses are added once per occurrence.
pub struct BuildPass<'a> {
    ctx: &'a ExecutionContext,
    x: &'a Tensor,
    batch_size: usize,
    built: HashMap<NodeId, Built>,
}

impl<'a> BuildPass<'a> {
    pub fn new(ctx: &'a ExecutionContext, x: &'a Tensor) -> Self {
        let batch_size = x.dims().first().copied().unwrap_or(1);
        Self {
            ctx,
            x,
            batch_size,
            built: HashMap::new(),
        }
    }

    pub fn ctx(&self) -> &'a ExecutionContext {
        self.ctx
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn env(&self, node: NodeId) -> BuildEnv<'a> {
        BuildEnv {
            ctx: self.ctx,
            x: self.x,
            batch_size: self.batch_size,
            node,
        }
    }

    pub fn build(&mut self, node: &Node) -> Result<Built> {
        if let Some(built) = self.built.get(&node.id()) {
            return Ok(built.clone());
        }
        let built = match node {
            Node::Parameter(p) => p.build(self)?,
            Node::Layer(l) => self.build_layer(l)?,
            Node::Distribution(d) => self.build_distribution(d)?,
        };
        self.built.insert(node.id(), built.clone());
        Ok(built)
    }

    /// Sample-path args, mean-path args, and the children's losses.
    fn build_args(
        &mut self,
        id: NodeId,
        node_name: &str,
        args: &Bindings,
    ) -> Result<(BuiltArgs, BuiltArgs, LossSums)> {
        let env = self.env(id);
        let mut sample = BuiltArgs::default();
        let mut mean = BuiltArgs::default();
        let mut sums = LossSums::zeros(&env)?;

        for (name, value) in args.iter() {
            match value {
                Value::Node(child) => {
                    let b = self.build(child)?;
                    sample.push(name, b.sample_tensor()?);
                    mean.push(name, b.mean_tensor()?);
                    sums = sums.add(&b.sums)?.add(&b.own)?;
                }
                literal => {
                    let t = literal
                        .literal_tensor(env.dtype(), env.device())?
                        .ok_or_else(|| VariationalError::InvalidArgumentType {
                            node: node_name.to_string(),
                            arg: name.to_string(),
                        })?;
                    sample.push(name, t.clone());
                    mean.push(name, t);
                }
            }
        }
        Ok((sample, mean, sums))
    }

    fn build_layer(&mut self, layer: &Layer) -> Result<Built> {
        let (sample_args, mean_args, sums) = self.build_args(layer.id(), layer.name(), layer.args())?;
        let env = self.env(layer.id());
        let op = layer.op();

        let sample = op.build(&sample_args, layer.options(), &env)?;
        let mean = op.build_mean(&mean_args, layer.options(), &env)?;
        let own = LossSums {
            sample: op.log_loss(&sample, &env)?,
            mean: op.mean_log_loss(&mean, &env)?,
            kl: op.kl_loss(&env)?,
        };
        Ok(Built {
            sample: Output::Tensor(sample),
            mean: Output::Tensor(mean),
            sums,
            own,
        })
    }

    /// Observed-data log-losses of a root are formed by the fit loop,
    /// which holds the dependent variable.
    fn build_distribution(&mut self, dist: &Distribution) -> Result<Built> {
        let (sample_args, mean_args, sums) = self.build_args(dist.id(), dist.name(), dist.args())?;
        let env = self.env(dist.id());
        let op = dist.op();
        Ok(Built {
            sample: Output::Density(op.density(&sample_args)?),
            mean: Output::Density(op.density(&mean_args)?),
            sums,
            own: LossSums::zeros(&env)?,
        })
    }
}

/// Scalar objective of one batch:
/// `sum(KL) / n_train - mean_rows(log p(y | sample path))`.
///
/// Returns `(loss, log_likelihood, kl)`.
pub fn elbo_loss(root: &Built, y: &Tensor, n_train: usize) -> Result<(Tensor, Tensor, Tensor)> {
    let density = root.sample_density()?;
    let log_lik = mean_row_sum(&density.log_prob(y)?)?;
    let kl = root.total()?.kl;
    let loss = ((&kl / n_train.max(1) as f64)? - &log_lik)?;
    Ok((loss, log_lik, kl))
}
