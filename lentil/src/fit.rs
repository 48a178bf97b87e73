//! Fit configuration, evaluation metrics, and the state a fit leaves
//! behind.

use crate::context::ExecutionContext;
use crate::error::{Result, VariationalError};
use crate::optim::OptimizerConfig;
use crate::parameter::Parameter;
use crate::records::{RecordFrequency, RecordSpec, Records};

use candle_core::{DType, Device};
use clap::ValueEnum;
use ndarray::{ArrayD, Zip};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Compute device selection.
#[derive(ValueEnum, Clone, Debug, PartialEq, Default)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    #[default]
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    /// Create a candle `Device` from this enum.
    pub fn to_device(&self, device_no: usize) -> Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => Device::Cpu,
        })
    }
}

/// Configuration of one call to `Model::fit`.
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// `F32` or `F64`
    pub dtype: DType,
    pub device: Device,
    pub batch_size: usize,
    pub epochs: usize,
    pub optimizer: OptimizerConfig,
    pub learning_rate: f64,
    /// names of validation metrics, see [`Metric`]
    pub metrics: Vec<String>,
    pub verbose: bool,
    pub show_progress: bool,
    /// fraction of samples held out for validation
    pub validation_split: f64,
    pub validation_shuffle: bool,
    pub shuffle: bool,
    pub record: RecordSpec,
    pub record_freq: RecordFrequency,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            dtype: DType::F32,
            device: Device::Cpu,
            batch_size: 128,
            epochs: 100,
            optimizer: OptimizerConfig::default(),
            learning_rate: 0.01,
            metrics: vec![],
            verbose: false,
            show_progress: false,
            validation_split: 0.0,
            validation_shuffle: true,
            shuffle: true,
            record: RecordSpec::None,
            record_freq: RecordFrequency::Batch,
        }
    }
}

impl FitConfig {
    /// Check every setting, returning the parsed metrics.
    pub fn validate(&self) -> Result<Vec<Metric>> {
        if !matches!(self.dtype, DType::F32 | DType::F64) {
            return Err(VariationalError::invalid_type(
                "dtype",
                format!("must be a floating point type F32 or F64, got {:?}", self.dtype),
            ));
        }
        if self.batch_size < 1 {
            return Err(VariationalError::invalid_value("batch_size", "must be positive"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate >= 0.0) {
            return Err(VariationalError::invalid_value(
                "learning_rate",
                "must be a non-negative number",
            ));
        }
        if !(0.0..=1.0).contains(&self.validation_split) {
            return Err(VariationalError::invalid_value(
                "validation_split",
                "must be between 0 and 1",
            ));
        }
        if let RecordSpec::Names(names) = &self.record {
            if names.iter().any(|n| n.is_empty()) {
                return Err(VariationalError::invalid_value(
                    "record",
                    "parameter names must be non-empty",
                ));
            }
        }
        self.metrics.iter().map(|m| m.parse()).collect()
    }
}

/// Validation metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Accuracy,
    Mse,
    Sse,
    Mae,
}

impl FromStr for Metric {
    type Err = VariationalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "acc" | "accuracy" => Ok(Metric::Accuracy),
            "mse" => Ok(Metric::Mse),
            "sse" => Ok(Metric::Sse),
            "mae" => Ok(Metric::Mae),
            other => Err(VariationalError::invalid_value(
                "metric",
                format!("'{}' is not one of acc, accuracy, mse, sse, mae", other),
            )),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::Accuracy => "accuracy",
            Metric::Mse => "mse",
            Metric::Sse => "sse",
            Metric::Mae => "mae",
        })
    }
}

impl Metric {
    /// Compare point predictions, broadcast to the shape of the
    /// observations, against them.
    pub fn evaluate(&self, pred: &ArrayD<f32>, y: &ArrayD<f32>) -> Result<f32> {
        let pred = pred.broadcast(y.raw_dim()).ok_or_else(|| {
            VariationalError::InvalidData(format!(
                "predictions {:?} do not broadcast to observations {:?}",
                pred.shape(),
                y.shape()
            ))
        })?;
        let n = y.len().max(1) as f32;
        let mut acc = 0f32;
        Zip::from(&pred).and(y).for_each(|&p, &o| {
            acc += match self {
                Metric::Accuracy => (p == o) as u8 as f32,
                Metric::Mse | Metric::Sse => (o - p) * (o - p),
                Metric::Mae => (o - p).abs(),
            }
        });
        Ok(match self {
            Metric::Sse => acc,
            _ => acc / n,
        })
    }
}

/// Everything a successful fit leaves behind.
pub struct TrainingState {
    pub ctx: ExecutionContext,
    /// every parameter in traversal order, duplicates included
    pub parameters: Vec<Arc<Parameter>>,
    pub records: Option<Records>,
    /// mean loss per epoch
    pub loss_trace: Vec<f32>,
    /// validation metrics per epoch
    pub metric_trace: Vec<Vec<(Metric, f32)>>,
    /// number of training samples
    pub n_train: usize,
    pub batches_per_epoch: usize,
    pub x_columns: Vec<String>,
}
