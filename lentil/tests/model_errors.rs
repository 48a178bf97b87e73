use lentil::layers::{add, input, mul};
use lentil::{
    normal, ErrorCategory, ErrorKind, FitConfig, FitData, Model, Parameter, RecordSpec, Result, VariationalError,
};
use ndarray::Array1;

fn data() -> FitData {
    let x = Array1::from_iter((0..20).map(|i| i as f32 / 20.0));
    let y = x.mapv(|v| 3.0 * v - 1.0);
    FitData::from_arrays(x, y)
}

#[test]
fn recording_unknown_parameter() -> Result<()> {
    let z = Parameter::builder("z").build()?.into_node();
    let mut model = Model::new(normal(&mul(&input(0)?, &z)?, 1.0)?)?;
    let config = FitConfig {
        epochs: 2,
        record: RecordSpec::from("w"),
        ..Default::default()
    };
    let err = model.fit(&data(), &config).err();
    assert!(matches!(err, Some(VariationalError::UnknownParameter(ref n)) if n == "w"));
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Value));
    assert!(!model.is_fit());
    Ok(())
}

#[test]
fn distribution_is_not_a_layer_argument() {
    let err = normal(0.0, 1.0).and_then(|d| add(&d, 1.0)).err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Type));
}

#[test]
fn model_without_parameters() -> Result<()> {
    let mut model = Model::new(normal(&input(0)?, 1.0)?)?;
    let err = model.fit(&data(), &FitConfig::default()).err();
    assert!(matches!(err, Some(VariationalError::EmptyModel)));
    let err = err.map(|e| (e.kind(), e.category()));
    assert_eq!(err, Some((ErrorKind::Runtime, ErrorCategory::EmptyModel)));
    Ok(())
}

#[test]
fn zero_batch_size() -> Result<()> {
    let w = Parameter::builder("w").build()?.into_node();
    let mut model = Model::new(normal(&mul(&input(0)?, &w)?, 1.0)?)?;
    let config = FitConfig {
        batch_size: 0,
        ..Default::default()
    };
    let err = model.fit(&data(), &config).err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Value));
    Ok(())
}

#[test]
fn criticism_requires_fit() -> Result<()> {
    let w = Parameter::builder("w").build()?.into_node();
    let model = Model::new(normal(&mul(&input(0)?, &w)?, 1.0)?)?;
    let x = Array1::<f32>::zeros(3).into_dyn();
    let errs = [
        model.predict(&x).err(),
        model.predictive_distribution(&x, 5).err(),
        model.r_squared(&x, &x, 5).err(),
    ];
    for err in errs {
        assert_eq!(err.map(|e| e.category()), Some(ErrorCategory::Precondition));
    }
    assert!(model.records().is_err());
    Ok(())
}

#[test]
fn missing_column_name() -> Result<()> {
    let w = Parameter::builder("w").build()?.into_node();
    let mut model = Model::new(normal(&mul(&input("nope")?, &w)?, 1.0)?)?;
    let err = model.fit(&data().with_x_columns(vec!["x".into()]), &FitConfig::default()).err();
    assert!(matches!(err, Some(VariationalError::MissingColumn(_))));
    Ok(())
}

#[test]
fn mismatched_sample_counts() -> Result<()> {
    let w = Parameter::builder("w").build()?.into_node();
    let mut model = Model::new(normal(&mul(&input(0)?, &w)?, 1.0)?)?;
    let data = FitData::from_arrays(Array1::<f32>::zeros(5), Array1::<f32>::zeros(4));
    let err = model.fit(&data, &FitConfig::default()).err();
    assert!(matches!(err, Some(VariationalError::InvalidData(_))));
    Ok(())
}
