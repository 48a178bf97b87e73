//! Probability distributions: node types usable as model roots and
//! parameter priors, and the built density objects they produce.

mod bernoulli;
mod cauchy;
mod kl;
mod normal;
mod poisson;

pub use bernoulli::{Bernoulli, BernoulliDensity};
pub use cauchy::{Cauchy, CauchyDensity};
pub use kl::kl_divergence;
pub use normal::{Normal, NormalDensity};
pub use poisson::{Poisson, PoissonDensity};

use crate::binder::{bind, ArgSpec, Bindings, OptionSpec};
use crate::error::Result;
use crate::graph::BuiltArgs;
use crate::node::{Node, NodeId};
use crate::transform::Bound;
use crate::value::Value;

use candle_core::{Shape, Tensor};
use candle_nn::Init;
use std::fmt;
use std::sync::Arc;

/// Distribution family of a built density.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Normal,
    Cauchy,
    Poisson,
    Bernoulli,
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::Normal => "Normal",
            Family::Cauchy => "Cauchy",
            Family::Poisson => "Poisson",
            Family::Bernoulli => "Bernoulli",
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Family::Poisson | Family::Bernoulli)
    }

    /// Families symmetric about their location with a scale parameter;
    /// the only ones the flipout estimator accepts.
    pub fn is_symmetric_location_scale(&self) -> bool {
        matches!(self, Family::Normal | Family::Cauchy)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A built distribution object with concrete tensor parameters.
pub trait Density: Send + Sync + fmt::Debug {
    fn family(&self) -> Family;

    /// Shape of one draw, the broadcast of all parameter shapes.
    fn batch_shape(&self) -> &[usize];

    /// Element-wise log density of `x` (broadcast against the batch shape)
    fn log_prob(&self, x: &Tensor) -> candle_core::Result<Tensor>;

    fn mean(&self) -> candle_core::Result<Tensor>;

    fn mode(&self) -> candle_core::Result<Tensor> {
        self.mean()
    }

    /// Draw samples of shape `[*prefix, *batch_shape]`.
    /// Continuous families are reparameterized.
    fn sample(&self, prefix: &[usize]) -> candle_core::Result<Tensor>;

    /// `(loc, scale)` for location-scale families
    fn location_scale(&self) -> Option<(&Tensor, &Tensor)> {
        None
    }
}

/// A concrete distribution kind: its argument schema, the bounds and
/// initializers of its parameters when it serves as a variational
/// posterior, and how to build its density from argument tensors.
pub trait DistributionOp: Send + Sync {
    fn name(&self) -> &'static str;

    fn family(&self) -> Family;

    fn arg_specs(&self) -> Vec<ArgSpec>;

    fn option_specs(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    fn validate_options(&self, _options: &Bindings) -> Result<()> {
        Ok(())
    }

    /// Constraint of a posterior parameter
    fn bounds(&self, _param: &str) -> Bound {
        Bound::none()
    }

    /// Initializer of an unconstrained posterior parameter
    fn initializer(&self, _param: &str) -> Init {
        Init::Randn {
            mean: 0.0,
            stdev: 1.0,
        }
    }

    fn is_discrete(&self) -> bool {
        self.family().is_discrete()
    }

    fn density(&self, args: &BuiltArgs) -> Result<Arc<dyn Density>>;
}

/// Distribution node: a bound instance of a [`DistributionOp`].
pub struct Distribution {
    id: NodeId,
    op: Arc<dyn DistributionOp>,
    args: Bindings,
    options: Bindings,
}

impl Distribution {
    /// Bind `positional`/`keywords` against the op's schema.
    pub fn new(
        op: Arc<dyn DistributionOp>,
        positional: Vec<Value>,
        keywords: Vec<(&str, Value)>,
    ) -> Result<Self> {
        let (args, options) = bind(
            op.name(),
            &op.arg_specs(),
            &op.option_specs(),
            positional,
            keywords,
        )?;
        op.validate_options(&options)?;
        Ok(Self {
            id: NodeId::fresh(),
            op,
            args,
            options,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub fn op(&self) -> &Arc<dyn DistributionOp> {
        &self.op
    }

    pub fn args(&self) -> &Bindings {
        &self.args
    }

    pub fn options(&self) -> &Bindings {
        &self.options
    }

    pub fn family(&self) -> Family {
        self.op.family()
    }

    pub fn is_discrete(&self) -> bool {
        self.op.is_discrete()
    }
}

//
// Builder functions
//

/// `Normal(loc, scale)`
pub fn normal(loc: impl Into<Value>, scale: impl Into<Value>) -> Result<Node> {
    Ok(Distribution::new(Arc::new(Normal), vec![loc.into(), scale.into()], vec![])?.into())
}

/// `Cauchy(loc, scale)`
pub fn cauchy(loc: impl Into<Value>, scale: impl Into<Value>) -> Result<Node> {
    Ok(Distribution::new(Arc::new(Cauchy), vec![loc.into(), scale.into()], vec![])?.into())
}

/// `Poisson(rate)`
pub fn poisson(rate: impl Into<Value>) -> Result<Node> {
    Ok(Distribution::new(Arc::new(Poisson), vec![rate.into()], vec![])?.into())
}

/// `Bernoulli(logits)`
pub fn bernoulli(logits: impl Into<Value>) -> Result<Node> {
    Ok(Distribution::new(Arc::new(Bernoulli), vec![logits.into()], vec![])?.into())
}

//
// Helper functions
//

/// Broadcast two parameter tensors to their common shape.
pub(crate) fn broadcast_pair(a: &Tensor, b: &Tensor, op: &'static str) -> candle_core::Result<(Tensor, Tensor)> {
    let shape: Shape = a.shape().broadcast_shape_binary_op(b.shape(), op)?;
    Ok((a.broadcast_as(shape.clone())?, b.broadcast_as(shape)?))
}

/// `[*prefix, *shape]`
pub(crate) fn extend_shape(prefix: &[usize], shape: &[usize]) -> Vec<usize> {
    prefix.iter().chain(shape.iter()).copied().collect()
}
