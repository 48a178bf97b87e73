use lentil::layers::{add, input, matmul, mul};
use lentil::{
    normal, Column, FitConfig, FitData, Model, OptimizerConfig, OptimizerKind, Parameter, RecordFrequency,
    RecordSpec, Result, Table, Value,
};
use ndarray::{Array1, Array2, ArrayD};

/// y = 2 x + 1 with a small deterministic wiggle
fn line(n: usize) -> (Array1<f32>, Array1<f32>) {
    let x = Array1::from_iter((0..n).map(|i| i as f32 / n as f32 * 2.0));
    let y = Array1::from_iter(x.iter().enumerate().map(|(i, &v)| 2.0 * v + 1.0 + 0.1 * (i as f32).sin()));
    (x, y)
}

fn line_model() -> Result<Model> {
    let w = Parameter::builder("w").build()?.into_node();
    let b = Parameter::builder("b").build()?.into_node();
    Model::new(normal(&add(&mul(&input(0)?, &w)?, &b)?, 1.0)?)
}

#[test]
fn recovers_slope_and_intercept() -> Result<()> {
    let (x, y) = line(100);
    let mut model = line_model()?;
    let config = FitConfig {
        batch_size: 10,
        epochs: 200,
        learning_rate: 0.05,
        ..Default::default()
    };
    let trace = model.fit(&FitData::from_arrays(x, y), &config)?;

    assert_eq!(trace.len(), 200);
    assert!(trace.iter().all(|l| l.is_finite()));

    let w = model.posterior_mean("w")?;
    let b = model.posterior_mean("b")?;
    assert_eq!(w.shape(), &[1]);
    assert!((w[[0]] - 2.0).abs() < 0.5, "w = {}", w[[0]]);
    assert!((b[[0]] - 1.0).abs() < 0.5, "b = {}", b[[0]]);
    Ok(())
}

#[test]
fn records_every_epoch() -> Result<()> {
    let (x, y) = line(50);
    let mut model = line_model()?;
    let config = FitConfig {
        batch_size: 10,
        epochs: 10,
        record: RecordSpec::All,
        record_freq: RecordFrequency::Epoch,
        ..Default::default()
    };
    model.fit(&FitData::from_arrays(x, y), &config)?;

    let records = model.records()?;
    assert_eq!(records.len(), 10);
    assert_eq!(records.x_epochs().len(), 10);
    for name in ["w", "b"] {
        for post_param in ["loc", "scale"] {
            let buf = model.record(name, post_param)?;
            assert_eq!(buf.shape(), &[10, 1]);
            assert!(buf.iter().all(|v| !v.is_nan()));
        }
    }
    Ok(())
}

#[test]
fn records_every_batch() -> Result<()> {
    let (x, y) = line(25);
    let mut model = line_model()?;
    let config = FitConfig {
        batch_size: 10,
        epochs: 4,
        record: RecordSpec::from("w"),
        ..Default::default()
    };
    model.fit(&FitData::from_arrays(x, y), &config)?;

    // 3 batches per epoch
    let buf = model.record("w", "loc")?;
    assert_eq!(buf.shape(), &[12, 1]);
    assert!(buf.iter().all(|v| v.is_finite()));
    assert!(model.record("b", "loc").is_err());
    Ok(())
}

#[test]
fn refit_replaces_state() -> Result<()> {
    let (x, y) = line(30);
    let data = FitData::from_arrays(x, y);
    let mut model = line_model()?;

    let first = model.fit(
        &data,
        &FitConfig {
            epochs: 3,
            ..Default::default()
        },
    )?;
    let tree = model.root().to_string();
    let ids = |m: &Model| -> Result<Vec<(String, lentil::node::NodeId)>> {
        Ok(m.parameters()?.iter().map(|p| (p.name().to_string(), p.id())).collect())
    };
    let params = ids(&model)?;

    let second = model.fit(
        &data,
        &FitConfig {
            epochs: 5,
            optimizer: OptimizerConfig::new(OptimizerKind::Sgd),
            ..Default::default()
        },
    )?;
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 5);
    assert_eq!(model.loss_trace()?.len(), 5);

    // fitting never rewires the tree
    assert_eq!(model.root().to_string(), tree);
    assert_eq!(ids(&model)?, params);
    Ok(())
}

#[test]
fn matrix_regression_with_learned_scale() -> Result<()> {
    let n = 60;
    let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i * (j + 1)) % 7) as f32 / 7.0);
    let y = Array2::from_shape_fn((n, 1), |(i, _)| x[[i, 0]] - 0.5 * x[[i, 1]] + 0.3);

    let w = Parameter::builder("w").shape(&[2, 1]).build()?.into_node();
    let b = Parameter::builder("b").build()?.into_node();
    let sigma = Parameter::scale("sigma")?.into_node();
    let mu = add(&matmul(&input(Value::None)?, &w)?, &b)?;
    let mut model = Model::new(normal(&mu, &sigma)?)?;

    let config = FitConfig {
        batch_size: 20,
        epochs: 5,
        validation_split: 0.25,
        metrics: vec!["mse".into(), "mae".into()],
        ..Default::default()
    };
    let data = FitData::from_arrays(x.clone(), y.clone()).with_x_columns(vec!["a".into(), "b".into()]);
    let trace = model.fit(&data, &config)?;
    assert_eq!(trace.len(), 5);

    let metrics = model.metric_trace()?;
    assert_eq!(metrics.len(), 5);
    assert!(metrics.iter().all(|m| m.len() == 2 && m.iter().all(|(_, v)| v.is_finite())));

    assert_eq!(model.posterior_mean("w")?.shape(), &[2, 1]);
    assert!(model.posterior_mean("sigma")?.iter().all(|&s| s > 0.0));
    assert_eq!(model.posterior_sample("w", 7)?.shape(), &[7, 2, 1]);

    let xd: ArrayD<f32> = x.into_dyn();
    assert_eq!(model.predict(&xd)?.shape(), &[n, 1]);
    Ok(())
}

#[test]
fn named_input_columns() -> Result<()> {
    let n = 20;
    let x = Array2::from_shape_fn((n, 2), |(i, j)| (i + j) as f32 / n as f32);
    let y = x.column(1).to_owned();

    let w = Parameter::builder("w").build()?.into_node();
    let mut model = Model::new(normal(&mul(&input("second")?, &w)?, 1.0)?)?;
    let data = FitData::from_arrays(x, y).with_x_columns(vec!["first".into(), "second".into()]);
    let config = FitConfig {
        epochs: 2,
        ..Default::default()
    };
    assert_eq!(model.fit(&data, &config)?.len(), 2);
    Ok(())
}

#[test]
fn fit_from_table_columns() -> Result<()> {
    let (x, y) = line(30);
    let values = Array2::from_shape_fn((30, 3), |(i, j)| match j {
        0 => x[i],
        1 => -x[i],
        _ => y[i],
    });
    let table = Table::new(vec!["x".into(), "neg".into(), "y".into()], values)?;

    let w = Parameter::builder("w").build()?.into_node();
    let mut model = Model::new(normal(&mul(&input("x")?, &w)?, 1.0)?)?;
    let data = FitData::from_table(table, vec![Column::from("x"), Column::from("neg")], "y");
    let config = FitConfig {
        epochs: 2,
        ..Default::default()
    };
    assert_eq!(model.fit(&data, &config)?.len(), 2);
    Ok(())
}
