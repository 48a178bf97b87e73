//! A model rooted at a distribution, and its training loop.

use crate::context::ExecutionContext;
use crate::data::{generate_batch, initialize_shuffles, process_xy_data, test_train_split, FitData};
use crate::error::{Result, VariationalError};
use crate::fit::{FitConfig, Metric, TrainingState};
use crate::graph::{elbo_loss, BuildPass, Built};
use crate::node::Node;
use crate::optim::FitOptimizer;
use crate::parameter::Parameter;
use crate::records::{init_records, RecordFrequency, Records};
use crate::tensor_util::{from_array, to_array};

use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info};
use ndarray::ArrayD;
use std::collections::HashMap;
use std::sync::Arc;

/// A Bayesian model: the tree under a root distribution, plus the
/// training state once fit.
pub struct Model {
    root: Node,
    state: Option<TrainingState>,
}

impl Model {
    pub fn new(root: Node) -> Result<Self> {
        if root.as_distribution().is_none() {
            return Err(VariationalError::InvalidRoot(root.type_name().to_string()));
        }
        Ok(Self { root, state: None })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn is_fit(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_discrete(&self) -> bool {
        self.root
            .as_distribution()
            .is_some_and(|d| d.is_discrete())
    }

    pub(crate) fn state(&self) -> Result<&TrainingState> {
        self.state.as_ref().ok_or(VariationalError::NotFit)
    }

    /// Execution context of the last fit
    pub fn context(&self) -> Result<&ExecutionContext> {
        Ok(&self.state()?.ctx)
    }

    /// Fit the model by minimizing the negative ELBO with minibatch
    /// stochastic optimization.
    ///
    /// # Returns
    /// mean loss of each epoch
    pub fn fit(&mut self, data: &FitData, config: &FitConfig) -> Result<Vec<f32>> {
        let metrics = config.validate()?;

        let xy = process_xy_data(data)?;
        let split = test_train_split(&xy.x, &xy.y, config.validation_split, config.validation_shuffle)?;
        let n = split.n;

        let parameters = self.root.parameter_list();
        if parameters.is_empty() {
            return Err(VariationalError::EmptyModel);
        }
        let unique = self.root.unique_parameters();
        check_unique_names(&unique)?;

        let mut ctx = ExecutionContext::new(config.dtype, config.device.clone());
        let ncols = xy.x.shape().get(1).copied().unwrap_or(1);
        ctx.resolve_inputs(&self.root, &xy.x_columns, ncols)?;
        ctx.count_unique(&self.root, &split.x_train)?;

        let n_batches = n.div_ceil(config.batch_size);
        let mut records = init_records(
            &config.record,
            &unique,
            config.record_freq,
            config.epochs,
            n_batches,
        )?;

        // a failed re-fit keeps the previous state until here
        self.state = None;
        ctx.materialize(&unique)?;

        let shuffles = initialize_shuffles(n, config.epochs.max(1), config.shuffle);
        if n > 0 {
            let (xb, yb, _) = generate_batch(&split.x_train, &split.y_train, 0, 0, config.batch_size, &shuffles)?;
            self.batch_loss(&ctx, &xb, &yb, n)?;
        }

        let mut optimizer = FitOptimizer::new(&config.optimizer, ctx.all_vars(), config.learning_rate)?;
        debug!(
            "fitting {} parameters on {} samples, {} batches per epoch",
            unique.len(),
            n,
            n_batches
        );

        let pb = ProgressBar::new(config.epochs as u64);
        if !config.show_progress || config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut loss_trace = Vec::with_capacity(config.epochs);
        let mut metric_trace = vec![];

        for epoch in 0..config.epochs {
            let mut loss_tot = 0f32;
            for batch in 0..n_batches {
                let (xb, yb, _) =
                    generate_batch(&split.x_train, &split.y_train, epoch, batch, config.batch_size, &shuffles)?;
                let loss = self.batch_loss(&ctx, &xb, &yb, n)?;
                optimizer.step(&loss)?;
                loss_tot += loss.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?;

                if let (Some(rec), RecordFrequency::Batch) = (records.as_mut(), config.record_freq) {
                    rec.save(epoch * n_batches + batch, &ctx)?;
                }
            }
            if let (Some(rec), RecordFrequency::Epoch) = (records.as_mut(), config.record_freq) {
                rec.save(epoch, &ctx)?;
            }

            loss_trace.push(loss_tot / n_batches.max(1) as f32);
            pb.inc(1);

            if !metrics.is_empty() && split.x_val.shape()[0] > 0 {
                let pred = self.point_prediction(&ctx, &split.x_val)?;
                let scores = metrics
                    .iter()
                    .map(|m| Ok((*m, m.evaluate(&pred, &split.y_val)?)))
                    .collect::<Result<Vec<_>>>()?;
                metric_trace.push(scores);
            }

            if config.verbose {
                let scores = metric_trace
                    .last()
                    .map(|s| format_scores(s))
                    .unwrap_or_default();
                info!(
                    "[{}] loss: {}{}",
                    epoch + 1,
                    loss_trace.last().copied().unwrap_or(f32::NAN),
                    scores
                );
            }
        }
        pb.finish_and_clear();

        self.state = Some(TrainingState {
            ctx,
            parameters,
            records,
            loss_trace: loss_trace.clone(),
            metric_trace,
            n_train: n,
            batches_per_epoch: n_batches,
            x_columns: xy.x_columns,
        });
        Ok(loss_trace)
    }

    /// Negative ELBO of one batch
    fn batch_loss(
        &self,
        ctx: &ExecutionContext,
        xb: &ArrayD<f32>,
        yb: &ArrayD<f32>,
        n_train: usize,
    ) -> Result<candle_core::Tensor> {
        let x = from_array(xb, ctx.dtype(), ctx.device())?;
        let y = from_array(yb, ctx.dtype(), ctx.device())?;
        let mut pass = BuildPass::new(ctx, &x);
        let root = pass.build(&self.root)?;
        let (loss, _, _) = elbo_loss(&root, &y, n_train)?;
        Ok(loss)
    }

    /// Build the whole tree over `x` in `ctx`.
    pub(crate) fn build_on(&self, ctx: &ExecutionContext, x: &ArrayD<f32>) -> Result<Built> {
        let x = from_array(&as_samples(x)?, ctx.dtype(), ctx.device())?;
        let mut pass = BuildPass::new(ctx, &x);
        pass.build(&self.root)
    }

    /// Mean (continuous) or mode (discrete) of the mean-path
    /// predictive distribution.
    pub(crate) fn point_prediction(&self, ctx: &ExecutionContext, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let density = self.build_on(ctx, x)?.mean_density()?;
        let point = if self.is_discrete() {
            density.mode()?
        } else {
            density.mean()?
        };
        to_array(&point)
    }

    //
    // Training state
    //

    /// Per-epoch mean loss of the last fit
    pub fn loss_trace(&self) -> Result<&[f32]> {
        Ok(&self.state()?.loss_trace)
    }

    /// Per-epoch validation metrics of the last fit
    pub fn metric_trace(&self) -> Result<&[Vec<(Metric, f32)>]> {
        Ok(&self.state()?.metric_trace)
    }

    /// Every parameter in traversal order, duplicates included
    pub fn parameters(&self) -> Result<&[Arc<Parameter>]> {
        Ok(&self.state()?.parameters)
    }

    pub fn parameter(&self, name: &str) -> Result<&Arc<Parameter>> {
        self.state()?
            .parameters
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| VariationalError::UnknownParameter(name.to_string()))
    }

    pub fn records(&self) -> Result<&Records> {
        self.state()?
            .records
            .as_ref()
            .ok_or(VariationalError::NothingRecorded)
    }

    /// Recorded values of one posterior parameter, `[n_snapshots, *shape]`
    pub fn record(&self, name: &str, post_param: &str) -> Result<&ArrayD<f32>> {
        let rec = self
            .state()?
            .records
            .as_ref()
            .ok_or_else(|| VariationalError::NotRecorded(name.to_string()))?
            .get(name)?;
        rec.get(post_param).ok_or_else(|| {
            VariationalError::invalid_value(post_param, format!("is not a posterior parameter of '{}'", name))
        })
    }

    //
    // Posterior introspection
    //

    pub fn posterior_mean(&self, name: &str) -> Result<ArrayD<f32>> {
        let ctx = self.context()?;
        self.parameter(name)?.posterior_mean(ctx)
    }

    /// Posterior means of every parameter, in first-occurrence order
    pub fn posterior_means(&self) -> Result<Vec<(String, ArrayD<f32>)>> {
        let ctx = self.context()?;
        self.root
            .unique_parameters()
            .iter()
            .map(|p| Ok((p.name().to_string(), p.posterior_mean(ctx)?)))
            .collect()
    }

    pub fn posterior_sample(&self, name: &str, num_samples: usize) -> Result<ArrayD<f32>> {
        let ctx = self.context()?;
        self.parameter(name)?.posterior_sample(ctx, num_samples)
    }

    pub fn posterior_params(&self, name: &str) -> Result<Vec<(String, ArrayD<f32>)>> {
        let ctx = self.context()?;
        self.parameter(name)?.posterior_params(ctx)
    }

    pub fn prior_sample(&self, name: &str, num_samples: usize) -> Result<ArrayD<f32>> {
        let ctx = self.context()?;
        self.parameter(name)?.prior_sample(ctx, num_samples)
    }
}

fn check_unique_names(params: &[Arc<Parameter>]) -> Result<()> {
    let mut seen = HashMap::new();
    for p in params {
        if let Some(other) = seen.insert(p.name(), p.id()) {
            if other != p.id() {
                return Err(VariationalError::DuplicateParameter(p.name().to_string()));
            }
        }
    }
    Ok(())
}

/// Promote a vector of samples to a column.
pub(crate) fn as_samples(x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    match x.ndim() {
        0 => Err(VariationalError::InvalidData("data must have a sample axis".to_string())),
        1 => Ok(x.clone().into_shape_with_order(ndarray::IxDyn(&[x.len(), 1]))?),
        _ => Ok(x.clone()),
    }
}

fn format_scores(scores: &[(Metric, f32)]) -> String {
    scores
        .iter()
        .map(|(m, v)| format!(", {}: {}", m, v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::normal;
    use crate::error::{ErrorCategory, ErrorKind};
    use crate::layers::{add, input, mul};
    use approx::assert_abs_diff_eq;
    use candle_nn::Init;
    use ndarray::Array1;

    fn linear_model() -> Result<Model> {
        let w = Parameter::builder("w").build()?.into_node();
        let b = Parameter::builder("b").build()?.into_node();
        Model::new(normal(&add(&mul(&input(0)?, &w)?, &b)?, 1.0)?)
    }

    fn toy_data() -> FitData {
        let x = Array1::from_iter((0..20).map(|i| i as f32 / 10.0));
        let y = x.mapv(|v| 2.0 * v + 1.0);
        FitData::from_arrays(x, y)
    }

    #[test]
    fn test_root_must_be_distribution() -> Result<()> {
        let err = Model::new(input(0)?).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Type));
        Ok(())
    }

    #[test]
    fn test_not_fit_guard() -> Result<()> {
        let model = linear_model()?;
        assert!(!model.is_fit());
        let err = model.posterior_mean("w").err();
        assert_eq!(err.map(|e| e.category()), Some(ErrorCategory::Precondition));
        assert!(matches!(model.loss_trace(), Err(VariationalError::NotFit)));
        Ok(())
    }

    #[test]
    fn test_zero_epochs() -> Result<()> {
        let w = Parameter::builder("w")
            .initializer("loc", Init::Const(0.5))
            .initializer("scale", Init::Const(-1.0))
            .build()?
            .into_node();
        let mut model = Model::new(normal(&mul(&input(0)?, &w)?, 1.0)?)?;
        let config = FitConfig {
            epochs: 0,
            ..Default::default()
        };
        let trace = model.fit(&toy_data(), &config)?;
        assert!(trace.is_empty());
        assert!(model.is_fit());
        assert_eq!(model.posterior_mean("w")?.shape(), &[1]);

        // no optimizer step was taken
        let params = model.posterior_params("w")?;
        assert_eq!(params[0].0, "loc");
        assert!(params[0].1.iter().all(|&v| v == 0.5));
        assert_eq!(params[1].0, "scale");
        for &v in params[1].1.iter() {
            assert_abs_diff_eq!(v, (-1f32).exp(), epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_failed_refit_keeps_state() -> Result<()> {
        let w = Parameter::builder("w").build()?.into_node();
        let mut model = Model::new(normal(&mul(&input("x")?, &w)?, 1.0)?)?;
        let config = FitConfig {
            epochs: 3,
            ..Default::default()
        };
        model.fit(&toy_data().with_x_columns(vec!["x".into()]), &config)?;
        let before = model.posterior_mean("w")?;

        let err = model.fit(&toy_data().with_x_columns(vec!["y".into()]), &config).err();
        assert!(matches!(err, Some(VariationalError::MissingColumn(_))));
        assert!(model.is_fit());
        assert_eq!(model.loss_trace()?.len(), 3);
        assert_eq!(model.posterior_mean("w")?, before);
        Ok(())
    }

    #[test]
    fn test_records_without_recording() -> Result<()> {
        let mut model = linear_model()?;
        model.fit(&toy_data(), &FitConfig::default())?;
        assert!(matches!(model.records(), Err(VariationalError::NothingRecorded)));
        assert!(matches!(model.record("w", "loc"), Err(_)));
        Ok(())
    }

    #[test]
    fn test_duplicate_names() -> Result<()> {
        let w1 = Parameter::builder("w").build()?.into_node();
        let w2 = Parameter::builder("w").build()?.into_node();
        let mut model = Model::new(normal(&add(&w1, &w2)?, 1.0)?)?;
        let err = model.fit(&toy_data(), &FitConfig::default()).err();
        assert!(matches!(err, Some(VariationalError::DuplicateParameter(_))));
        assert!(!model.is_fit());
        Ok(())
    }

    #[test]
    fn test_validation_split_everything() -> Result<()> {
        let mut model = linear_model()?;
        let config = FitConfig {
            epochs: 2,
            validation_split: 1.0,
            metrics: vec!["mse".into()],
            ..Default::default()
        };
        let trace = model.fit(&toy_data(), &config)?;
        assert_eq!(trace, vec![0.0, 0.0]);
        assert_eq!(model.metric_trace()?.len(), 2);
        Ok(())
    }
}
