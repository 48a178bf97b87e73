use crate::distributions::normal;
use crate::error::Result;
use crate::fit::{ComputeDevice, FitConfig};
use crate::io::{read_table, write_json};
use crate::layers::{add, input, matmul};
use crate::model::Model;
use crate::optim::{OptimizerConfig, OptimizerKind};
use crate::parameter::Parameter;
use crate::records::{RecordFrequency, RecordSpec};
use crate::value::Value;
use crate::data::FitData;

use candle_core::DType;
use clap::Args;
use log::info;
use ndarray::ArrayD;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct RegressionArgs {
    #[arg(
        long,
        required = true,
        help = "Covariate matrix file",
        long_help = "Covariate matrix (N x p) with a header line of column names.\n\
		     Tab, comma or space delimited; `.gz` files are decompressed."
    )]
    pub x: Box<str>,

    #[arg(
        long,
        required = true,
        help = "Response file",
        long_help = "Response (N x 1) with a header line.\n\
		     Tab, comma or space delimited; `.gz` files are decompressed."
    )]
    pub y: Box<str>,

    #[arg(
        long,
        short,
        default_value = "stdout",
        help = "Output JSON file",
        long_help = "Output file for the JSON summary of the fit:\n\
		     loss trace, posterior means and parameters,\n\
		     and recorded snapshots if requested."
    )]
    pub out: Box<str>,

    #[arg(long, short = 'i', default_value_t = 100, help = "Number of epochs")]
    pub epochs: usize,

    #[arg(long, short = 'b', default_value_t = 128, help = "Minibatch size")]
    pub batch_size: usize,

    #[arg(long, short = 'l', default_value_t = 0.01, help = "Learning rate")]
    pub learning_rate: f64,

    #[arg(long, value_enum, default_value = "adam", help = "Optimizer")]
    pub optimizer: OptimizerKind,

    #[arg(
        long,
        value_delimiter(','),
        help = "Parameters to record",
        long_help = "Parameters to record during training (comma-separated),\n\
		     e.g., `w,b`, or `all` for every parameter."
    )]
    pub record: Option<Vec<Box<str>>>,

    #[arg(long, value_enum, default_value = "batch", help = "Recording frequency")]
    pub record_freq: RecordFrequency,

    #[arg(
        long,
        default_value_t = 0.0,
        help = "Fraction held out for validation",
        long_help = "Fraction of samples held out for validation.\n\
		     Validation metrics are evaluated after every epoch."
    )]
    pub validation_split: f64,

    #[arg(
        long,
        value_delimiter(','),
        help = "Validation metrics",
        long_help = "Validation metrics (comma-separated):\n\
		     acc, accuracy, mse, sse, mae"
    )]
    pub metrics: Option<Vec<Box<str>>>,

    #[arg(long, value_enum, default_value = "cpu", help = "Candle device")]
    pub device: ComputeDevice,

    #[arg(long, help = "Number of threads (default: rayon's global pool)")]
    pub threads: Option<usize>,

    #[arg(long, default_value_t = false, help = "Double precision")]
    pub f64: bool,

    #[arg(
        long,
        short,
        help = "Verbosity",
        long_help = "Log the loss of every epoch instead of a progress bar.\n\
		     Set RUST_LOG=info to see the messages."
    )]
    pub verbose: bool,
}

#[derive(Serialize)]
struct ArraySummary {
    shape: Vec<usize>,
    values: Vec<f32>,
}

impl From<&ArrayD<f32>> for ArraySummary {
    fn from(arr: &ArrayD<f32>) -> Self {
        Self {
            shape: arr.shape().to_vec(),
            values: arr.iter().copied().collect(),
        }
    }
}

#[derive(Serialize)]
struct ParameterSummary {
    name: String,
    mean: ArraySummary,
    posterior: Vec<(String, ArraySummary)>,
}

#[derive(Serialize)]
struct RecordSummary {
    frequency: String,
    x_epochs: Vec<f32>,
    parameters: Vec<(String, Vec<(String, ArraySummary)>)>,
}

#[derive(Serialize)]
struct RegressionSummary {
    covariates: Vec<String>,
    loss: Vec<f32>,
    metrics: Vec<Vec<(String, f32)>>,
    parameters: Vec<ParameterSummary>,
    records: Option<RecordSummary>,
}

/// `y ~ Normal(x w + b, sigma)` with a learned scale
pub fn regression_model(num_covariates: usize) -> Result<Model> {
    let w = Parameter::builder("w")
        .shape(&[num_covariates, 1])
        .build()?
        .into_node();
    let b = Parameter::builder("b").build()?.into_node();
    let sigma = Parameter::scale("sigma")?.into_node();
    let mu = add(&matmul(&input(Value::None)?, &w)?, &b)?;
    Model::new(normal(&mu, &sigma)?)
}

pub fn run(args: &RegressionArgs) -> anyhow::Result<()> {
    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    let x = read_table(&args.x, &['\t', ',', ' '])?;
    let y = read_table(&args.y, &['\t', ',', ' '])?;
    info!("Read x: {} x {}, y: {} x {}", x.nrows(), x.columns().len(), y.nrows(), y.columns().len());

    if y.columns().len() != 1 {
        anyhow::bail!("expected a single response column, got {}", y.columns().len());
    }
    if x.nrows() != y.nrows() {
        anyhow::bail!("X and Y must have same number of rows");
    }

    let covariates = x.columns().to_vec();
    let data = FitData::from_arrays(x.values().clone(), y.values().clone()).with_x_columns(covariates.clone());

    let record = match args.record.as_deref() {
        None => RecordSpec::None,
        Some([all]) if &**all == "all" => RecordSpec::All,
        Some(names) => RecordSpec::Names(names.iter().map(|s| s.to_string()).collect()),
    };

    let config = FitConfig {
        dtype: if args.f64 { DType::F64 } else { DType::F32 },
        device: args.device.to_device(0)?,
        batch_size: args.batch_size,
        epochs: args.epochs,
        optimizer: OptimizerConfig::new(args.optimizer),
        learning_rate: args.learning_rate,
        metrics: args
            .metrics
            .iter()
            .flatten()
            .map(|s| s.to_string())
            .collect(),
        verbose: args.verbose,
        show_progress: true,
        validation_split: args.validation_split,
        record,
        record_freq: args.record_freq,
        ..Default::default()
    };

    let mut model = regression_model(covariates.len())?;
    let loss = model.fit(&data, &config)?;
    info!("Done fitting: final loss {:?}", loss.last());

    let mut parameters = vec![];
    for (name, mean) in model.posterior_means()? {
        let posterior: Vec<(String, ArraySummary)> = model
            .posterior_params(&name)?
            .iter()
            .map(|(k, v)| (k.clone(), v.into()))
            .collect();
        parameters.push(ParameterSummary {
            name,
            mean: (&mean).into(),
            posterior,
        });
    }

    let records = match config.record {
        RecordSpec::None => None,
        _ => {
            let records = model.records()?;
            Some(RecordSummary {
                frequency: format!("{:?}", records.frequency()).to_lowercase(),
                x_epochs: records.x_epochs().to_vec(),
                parameters: records
                    .params()
                    .iter()
                    .map(|p| {
                        let buffers: Vec<(String, ArraySummary)> = p.buffers().iter().map(|(k, v)| (k.clone(), v.into())).collect();
                        (p.name().to_string(), buffers)
                    })
                    .collect(),
            })
        }
    };

    let metrics: Vec<Vec<(String, f32)>> = model
        .metric_trace()?
        .iter()
        .map(|epoch| epoch.iter().map(|(m, v)| (m.to_string(), *v)).collect())
        .collect();

    let summary = RegressionSummary {
        covariates,
        loss,
        metrics,
        parameters,
        records,
    };
    write_json(&summary, &args.out)?;
    info!("Wrote {}", args.out);
    Ok(())
}
