use lentil::layers::{add, input, mul};
use lentil::{bernoulli, normal, FitConfig, FitData, Model, Parameter, Result};
use ndarray::{Array1, ArrayD};

fn fitted_line() -> Result<(Model, ArrayD<f32>, ArrayD<f32>)> {
    let x = Array1::from_iter((0..40).map(|i| i as f32 / 40.0));
    let y = x.mapv(|v| 1.5 * v + 0.5);

    let w = Parameter::builder("w").build()?.into_node();
    let b = Parameter::builder("b").build()?.into_node();
    let mut model = Model::new(normal(&add(&mul(&input(0)?, &w)?, &b)?, 0.5)?)?;
    let config = FitConfig {
        batch_size: 10,
        epochs: 20,
        learning_rate: 0.05,
        ..Default::default()
    };
    model.fit(&FitData::from_arrays(x.clone(), y.clone()), &config)?;
    Ok((model, x.into_dyn(), y.into_dyn()))
}

#[test]
fn predictive_summaries() -> Result<()> {
    let (model, x, y) = fitted_line()?;
    let n = x.len();

    assert_eq!(model.predict(&x)?.shape(), &[n, 1]);
    assert_eq!(model.residuals(&x, &y)?.shape(), &[n, 1]);
    assert_eq!(model.predictive_distribution(&x, 8)?.shape(), &[8, n, 1]);
    assert_eq!(model.log_prob(&x, &y, 4)?.shape(), &[4, n]);
    assert!(model.prob(&x, &y, 4)?.iter().all(|&p| p >= 0.0));

    let cdf = model.cdf(&x, &y, 16)?;
    assert_eq!(cdf.len(), n);
    assert!(cdf.iter().all(|&c| (0.0..=1.0).contains(&c)));

    let ci = model.confidence_intervals(&x, &[2.5, 97.5], 32)?;
    assert_eq!(ci.shape(), &[2, n, 1]);
    assert!(ci
        .index_axis(ndarray::Axis(0), 0)
        .iter()
        .zip(ci.index_axis(ndarray::Axis(0), 1).iter())
        .all(|(lo, hi)| lo <= hi));

    let coverage = model.pred_dist_coverage(&x, &y, 95.0, 32)?;
    assert!((0.0..=1.0).contains(&coverage));
    assert!(model.pred_dist_coverage(&x, &y, 150.0, 4).is_err());
    // percent scale: an empty central interval covers nothing
    assert_eq!(model.pred_dist_coverage(&x, &y, 0.0, 8)?, 0.0);
    assert_eq!(model.pred_dist_covered(&x, &y, 95.0, 8)?.len(), n);

    let r2 = model.r_squared(&x, &y, 5)?;
    assert_eq!(r2.len(), 5);
    assert!(r2.iter().all(|&r| (0.0..=1.0).contains(&r)));

    let metrics = model.metrics(&["mse", "mae"], &x, &y)?;
    assert_eq!(metrics.len(), 2);
    assert!(model.metrics(&["r2"], &x, &y).is_err());
    Ok(())
}

#[test]
fn binned_diagnostics() -> Result<()> {
    let (model, x, y) = fitted_line()?;

    let (centers, lp) = model.log_prob_by(&x, &y, 0, 4, 8)?;
    assert_eq!(centers.len(), 4);
    assert_eq!(lp.len(), 4);

    let (_, cov) = model.coverage_by(&x, &y, 0, 90.0, 4, 16)?;
    assert!(cov.iter().all(|&c| (0.0..=1.0).contains(&c)));

    let (expected, observed) = model.calibration_curve(&x, &y, 5, 16)?;
    assert_eq!(expected.len(), 5);
    assert_eq!(observed.len(), 5);
    assert_eq!(observed.last().copied(), Some(1.0));
    assert!(model.log_prob_by(&x, &y, 3, 4, 8).is_err());
    Ok(())
}

#[test]
fn parameter_introspection() -> Result<()> {
    let (model, _, _) = fitted_line()?;

    let params = model.posterior_params("w")?;
    let names = params.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["loc", "scale"]);
    assert!(params[1].1.iter().all(|&s| s > 0.0));

    assert_eq!(model.prior_sample("b", 6)?.shape(), &[6, 1]);
    assert_eq!(model.posterior_means()?.len(), 2);
    assert!(model.posterior_mean("nope").is_err());
    Ok(())
}

#[test]
fn discrete_model_predicts_labels() -> Result<()> {
    let x = Array1::from_iter((0..40).map(|i| i as f32 / 20.0 - 1.0));
    let y = x.mapv(|v| (v > 0.0) as u8 as f32);

    let w = Parameter::builder("w").build()?.into_node();
    let mut model = Model::new(bernoulli(&mul(&input(0)?, &w)?)?)?;
    assert!(model.is_discrete());
    let config = FitConfig {
        batch_size: 10,
        epochs: 5,
        ..Default::default()
    };
    model.fit(&FitData::from_arrays(x.clone(), y.clone()), &config)?;

    let (x, y) = (x.into_dyn(), y.into_dyn());
    let pred = model.predict(&x)?;
    assert!(pred.iter().all(|&p| p == 0.0 || p == 1.0));

    let acc = model.metrics(&["acc"], &x, &y)?;
    assert!((0.0..=1.0).contains(&acc[0].1));

    let (_, observed) = model.calibration_curve(&x, &y, 3, 8)?;
    assert_eq!(observed.len(), 3);
    Ok(())
}
