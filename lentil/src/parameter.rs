//! Parameters drawn from variational posterior distributions.

use crate::context::ExecutionContext;
use crate::distributions::{kl_divergence, normal, Density, DistributionOp, Normal};
use crate::error::{Result, VariationalError};
use crate::graph::{BuildPass, Built, BuiltArgs, LossSums, Output};
use crate::node::{Node, NodeId};
use crate::tensor_util::{rademacher, reduce_rows, to_array};
use crate::transform::{Bijector, Bound};

use candle_core::Tensor;
use candle_nn::Init;
use ndarray::ArrayD;
use std::fmt;
use std::sync::Arc;

/// How posterior draws are generated for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Estimator {
    /// One independent posterior draw per row of the batch
    Independent,
    /// One shared centered draw, decorrelated across rows by random
    /// sign flips (https://arxiv.org/abs/1803.04386)
    #[default]
    Flipout,
}

/// One unconstrained variable of a parameter's posterior.
#[derive(Debug, Clone)]
pub struct PostParam {
    pub name: String,
    pub bound: Bound,
    pub init: Init,
}

/// Array of parameters with a variational posterior and an optional
/// prior distribution.
pub struct Parameter {
    id: NodeId,
    name: String,
    shape: Vec<usize>,
    prior: Option<Node>,
    posterior: Arc<dyn DistributionOp>,
    post_params: Vec<PostParam>,
    transform: Bijector,
    estimator: Estimator,
}

pub struct ParameterBuilder {
    name: String,
    shape: Vec<usize>,
    prior: Option<Option<Node>>,
    posterior: Arc<dyn DistributionOp>,
    post_names: Option<Vec<String>>,
    post_lb: Option<Vec<Option<f64>>>,
    post_ub: Option<Vec<Option<f64>>>,
    initializers: Vec<(String, Init)>,
    transform: Bijector,
    estimator: Estimator,
}

impl ParameterBuilder {
    pub fn shape(mut self, shape: &[usize]) -> Self {
        self.shape = shape.to_vec();
        self
    }

    /// `None` removes the prior (and with it every loss term).
    pub fn prior(mut self, prior: Option<Node>) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn posterior(mut self, posterior: Arc<dyn DistributionOp>) -> Self {
        self.posterior = posterior;
        self
    }

    /// Names and bounds of the posterior's parameters; the three
    /// slices must have equal length.
    pub fn post_params(mut self, names: &[&str], lb: &[Option<f64>], ub: &[Option<f64>]) -> Self {
        self.post_names = Some(names.iter().map(|s| s.to_string()).collect());
        self.post_lb = Some(lb.to_vec());
        self.post_ub = Some(ub.to_vec());
        self
    }

    pub fn initializer(mut self, post_param: &str, init: Init) -> Self {
        self.initializers.push((post_param.to_string(), init));
        self
    }

    pub fn transform(mut self, transform: Bijector) -> Self {
        self.transform = transform;
        self
    }

    pub fn estimator(mut self, estimator: Estimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn build(self) -> Result<Parameter> {
        let invalid = |reason: String| VariationalError::InvalidParameter {
            name: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("name must be a non-empty string".into()));
        }
        if self.shape.is_empty() || self.shape.iter().any(|&d| d == 0) {
            return Err(invalid(format!(
                "shape must be positive, got {:?}",
                self.shape
            )));
        }

        let prior = match self.prior.clone() {
            Some(prior) => prior,
            None => Some(normal(0.0, 1.0)?),
        };
        if let Some(p) = &prior {
            if p.as_distribution().is_none() {
                return Err(invalid(format!(
                    "prior must be a distribution or None, got {}",
                    p.type_name()
                )));
            }
        }

        let names = match &self.post_names {
            Some(names) => names.clone(),
            None => self
                .posterior
                .arg_specs()
                .iter()
                .map(|s| s.name.to_string())
                .collect(),
        };
        let lb = match &self.post_lb {
            Some(lb) => lb.clone(),
            None => names.iter().map(|n| self.posterior.bounds(n).lb).collect(),
        };
        let ub = match &self.post_ub {
            Some(ub) => ub.clone(),
            None => names.iter().map(|n| self.posterior.bounds(n).ub).collect(),
        };
        if lb.len() != names.len() || ub.len() != names.len() {
            return Err(invalid(format!(
                "post_param_lb ({}) and post_param_ub ({}) must be same length as post_param_names ({})",
                lb.len(),
                ub.len(),
                names.len()
            )));
        }

        for (key, _) in &self.initializers {
            if !names.contains(key) {
                return Err(invalid(format!("no posterior parameter '{}' to initialize", key)));
            }
        }

        let mut post_params = Vec::with_capacity(names.len());
        for ((name, lb), ub) in names.into_iter().zip(lb).zip(ub) {
            let bound = Bound { lb, ub };
            if !bound.is_valid() {
                return Err(invalid(format!(
                    "lower bound of '{}' must be below its upper bound",
                    name
                )));
            }
            let init = self
                .initializers
                .iter()
                .rev()
                .find(|(k, _)| *k == name)
                .map(|(_, init)| *init)
                .unwrap_or_else(|| self.posterior.initializer(&name));
            post_params.push(PostParam { name, bound, init });
        }

        Ok(Parameter {
            id: NodeId::fresh(),
            name: self.name,
            shape: self.shape,
            prior,
            posterior: self.posterior,
            post_params,
            transform: self.transform,
            estimator: self.estimator,
        })
    }
}

impl Parameter {
    /// Start a parameter with defaults: shape `[1]`, a `Normal(0, 1)`
    /// prior, a Normal posterior, identity transform, flipout.
    pub fn builder(name: &str) -> ParameterBuilder {
        ParameterBuilder {
            name: name.to_string(),
            shape: vec![1],
            prior: None,
            posterior: Arc::new(Normal),
            post_names: None,
            post_lb: None,
            post_ub: None,
            initializers: vec![],
            transform: Bijector::Identity,
            estimator: Estimator::Flipout,
        }
    }

    /// Positive scale parameter: Normal posterior on the log scale,
    /// exponentiated, without a prior.
    pub fn scale(name: &str) -> Result<Parameter> {
        Parameter::builder(name)
            .prior(None)
            .transform(Bijector::Exp)
            .build()
    }

    pub fn into_node(self) -> Node {
        self.into()
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn prior(&self) -> Option<&Node> {
        self.prior.as_ref()
    }

    pub fn posterior_op(&self) -> &Arc<dyn DistributionOp> {
        &self.posterior
    }

    pub fn post_params(&self) -> &[PostParam] {
        &self.post_params
    }

    pub fn post_param_names(&self) -> Vec<&str> {
        self.post_params.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn transform(&self) -> Bijector {
        self.transform
    }

    pub fn estimator(&self) -> Estimator {
        self.estimator
    }

    //
    // Posterior construction
    //

    /// Constrained posterior parameters, read from `ctx`.
    fn constrained(&self, ctx: &ExecutionContext) -> Result<BuiltArgs> {
        let vars = ctx
            .parameter_vars(self.id)
            .ok_or_else(|| VariationalError::NotBuilt(self.name.clone()))?;
        let mut args = BuiltArgs::default();
        for (pp, (_, raw)) in self.post_params.iter().zip(vars.iter()) {
            args.push(&pp.name, pp.bound.apply(raw)?);
        }
        Ok(args)
    }

    fn posterior_density(&self, ctx: &ExecutionContext) -> Result<Arc<dyn Density>> {
        self.posterior.density(&self.constrained(ctx)?)
    }

    /// Draws of shape `[batch_size, *shape]` on the unconstrained scale.
    fn draw(&self, posterior: &dyn Density, batch_size: usize) -> Result<Tensor> {
        match self.estimator {
            Estimator::Independent => Ok(posterior.sample(&[batch_size])?),
            Estimator::Flipout => {
                if !posterior.family().is_symmetric_location_scale() {
                    return Err(VariationalError::IncompatibleEstimator {
                        estimator: "flipout".to_string(),
                        family: posterior.family().to_string(),
                    });
                }
                let w_mean = posterior.mean()?;
                let w_sample = (posterior.sample(&[])? - &w_mean)?;
                let (dtype, device) = (w_mean.dtype(), w_mean.device());

                let sign_r = rademacher(w_sample.dims(), dtype, device)?;
                let mut row_shape = vec![batch_size];
                row_shape.extend(std::iter::repeat_n(1, w_sample.rank()));
                let sign_s = rademacher(&row_shape, dtype, device)?;

                let perturb = (w_sample * sign_r)?.unsqueeze(0)?.broadcast_mul(&sign_s)?;
                Ok(perturb.broadcast_add(&w_mean.unsqueeze(0)?)?)
            }
        }
    }

    /// Sample path, mean path and loss terms for one build pass.
    ///
    /// Own losses: the prior log density of the draws (batch-averaged),
    /// the prior log density of the posterior mean, and KL(q || p),
    /// analytic where available and Monte Carlo otherwise. The prior
    /// subtree's accumulated losses are this parameter's child sums.
    pub(crate) fn build(&self, pass: &mut BuildPass) -> Result<Built> {
        let posterior = self.posterior_density(pass.ctx())?;

        let raw_sample = self.draw(posterior.as_ref(), pass.batch_size())?;
        let raw_mean = posterior.mean()?;

        let sample = self.transform.forward(&raw_sample)?;
        let mean = self.transform.forward(&raw_mean)?;

        let env = pass.env(self.id);
        let (sums, own) = match &self.prior {
            None => (LossSums::zeros(&env)?, LossSums::zeros(&env)?),
            Some(prior) => {
                let prior_built = pass.build(prior)?;
                let prior_sample = prior_built.sample_density()?;
                let prior_mean = prior_built.mean_density()?;
                let rank = self.shape.len();

                let sample_ll = reduce_rows(&prior_sample.log_prob(&raw_sample)?, rank)?;
                let mean_ll = prior_mean.log_prob(&raw_mean)?.sum_all()?;
                let kl = match kl_divergence(posterior.as_ref(), prior_sample.as_ref())? {
                    Some(kl) => reduce_rows(&kl, rank)?,
                    None => {
                        let log_q = posterior.log_prob(&raw_sample)?;
                        let log_p = prior_sample.log_prob(&raw_sample)?;
                        reduce_rows(&log_q.broadcast_sub(&log_p)?, rank)?
                    }
                };
                let own = LossSums {
                    sample: sample_ll,
                    mean: mean_ll,
                    kl,
                };
                (prior_built.total()?, own)
            }
        };

        Ok(Built {
            sample: Output::Tensor(sample),
            mean: Output::Tensor(mean),
            sums,
            own,
        })
    }

    //
    // Introspection
    //

    /// Mean of the transformed posterior, `[*shape]`.
    pub fn posterior_mean(&self, ctx: &ExecutionContext) -> Result<ArrayD<f32>> {
        let posterior = self.posterior_density(ctx)?;
        to_array(&self.transform.forward(&posterior.mean()?)?)
    }

    /// Independent posterior draws, `[num_samples, *shape]`.
    pub fn posterior_sample(&self, ctx: &ExecutionContext, num_samples: usize) -> Result<ArrayD<f32>> {
        if num_samples < 1 {
            return Err(VariationalError::invalid_value("num_samples", "must be positive"));
        }
        let posterior = self.posterior_density(ctx)?;
        let draws = self.transform.forward(&posterior.sample(&[num_samples])?)?;
        to_array(&draws)
    }

    /// Current constrained posterior parameters, `name -> [*shape]`.
    pub fn posterior_params(&self, ctx: &ExecutionContext) -> Result<Vec<(String, ArrayD<f32>)>> {
        self.constrained(ctx)?
            .iter()
            .map(|(name, t)| Ok((name.to_string(), to_array(t)?)))
            .collect()
    }

    /// Draws from the prior, `[num_samples, *shape]`. Priors whose
    /// arguments are parameters use those parameters' posterior means.
    pub fn prior_sample(&self, ctx: &ExecutionContext, num_samples: usize) -> Result<ArrayD<f32>> {
        if num_samples < 1 {
            return Err(VariationalError::invalid_value("num_samples", "must be positive"));
        }
        let prior = self.prior.as_ref().ok_or_else(|| {
            VariationalError::invalid_value(&self.name, "has no prior to sample from")
        })?;

        let x = Tensor::zeros((1, 1), ctx.dtype(), ctx.device())?;
        let mut pass = BuildPass::new(ctx, &x);
        let density = pass.build(prior)?.mean_density()?;

        let bs = density.batch_shape().to_vec();
        let draws = if bs.is_empty() {
            let mut prefix = vec![num_samples];
            prefix.extend_from_slice(&self.shape);
            density.sample(&prefix)?
        } else {
            let mut target = vec![num_samples];
            target.extend_from_slice(&self.shape);
            density.sample(&[num_samples])?.broadcast_as(target)?.contiguous()?
        };
        to_array(&self.transform.forward(&draws)?)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parameter '{}'", self.name)
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("posterior", &self.posterior.name())
            .field("post_params", &self.post_params)
            .field("transform", &self.transform)
            .field("estimator", &self.estimator)
            .finish()
    }
}
