//! Snapshots of posterior parameters taken during training.

use crate::context::ExecutionContext;
use crate::error::{Result, VariationalError};
use crate::parameter::Parameter;

use ndarray::{ArrayD, Axis, IxDyn};
use std::sync::Arc;

/// Which parameters to record while fitting.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RecordSpec {
    #[default]
    None,
    All,
    Names(Vec<String>),
}

impl From<&str> for RecordSpec {
    fn from(s: &str) -> Self {
        match s {
            "all" => RecordSpec::All,
            name => RecordSpec::Names(vec![name.to_string()]),
        }
    }
}

impl From<Vec<&str>> for RecordSpec {
    fn from(names: Vec<&str>) -> Self {
        RecordSpec::Names(names.into_iter().map(String::from).collect())
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFrequency {
    #[default]
    Batch,
    Epoch,
}

/// Recorded posterior parameters of one parameter; each buffer is
/// `[n_snapshots, *shape]`.
#[derive(Debug, Clone)]
pub struct ParamRecord {
    parameter: Arc<Parameter>,
    buffers: Vec<(String, ArrayD<f32>)>,
}

impl ParamRecord {
    pub fn name(&self) -> &str {
        self.parameter.name()
    }

    pub fn buffers(&self) -> &[(String, ArrayD<f32>)] {
        &self.buffers
    }

    pub fn get(&self, post_param: &str) -> Option<&ArrayD<f32>> {
        self.buffers
            .iter()
            .find(|(k, _)| k == post_param)
            .map(|(_, b)| b)
    }
}

/// All recording buffers of one fit.
#[derive(Debug, Clone)]
pub struct Records {
    frequency: RecordFrequency,
    x_epochs: Vec<f32>,
    params: Vec<ParamRecord>,
}

/// Number of snapshots a fit takes
pub fn num_snapshots(frequency: RecordFrequency, epochs: usize, batches_per_epoch: usize) -> usize {
    match frequency {
        RecordFrequency::Batch => epochs * batches_per_epoch,
        RecordFrequency::Epoch => epochs,
    }
}

/// Allocate NaN-filled buffers for the requested parameters.
///
/// # Arguments
/// * `params` - unique parameters of the model
pub fn init_records(
    spec: &RecordSpec,
    params: &[Arc<Parameter>],
    frequency: RecordFrequency,
    epochs: usize,
    batches_per_epoch: usize,
) -> Result<Option<Records>> {
    let selected: Vec<Arc<Parameter>> = match spec {
        RecordSpec::None => return Ok(None),
        RecordSpec::All => params.to_vec(),
        RecordSpec::Names(names) => names
            .iter()
            .map(|name| {
                params
                    .iter()
                    .find(|p| p.name() == name)
                    .cloned()
                    .ok_or_else(|| VariationalError::UnknownParameter(name.clone()))
            })
            .collect::<Result<_>>()?,
    };

    let n = num_snapshots(frequency, epochs, batches_per_epoch);
    let params = selected
        .into_iter()
        .map(|p| {
            let mut shape = vec![n];
            shape.extend_from_slice(p.shape());
            let buffers = p
                .post_param_names()
                .into_iter()
                .map(|name| (name.to_string(), ArrayD::from_elem(IxDyn(&shape), f32::NAN)))
                .collect();
            ParamRecord {
                parameter: p,
                buffers,
            }
        })
        .collect();

    Ok(Some(Records {
        frequency,
        x_epochs: linspace(1.0, epochs as f32, n),
        params,
    }))
}

/// `n` evenly spaced values from `start` to `end`, both included
fn linspace(start: f32, end: f32, n: usize) -> Vec<f32> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f32;
            (0..n).map(|i| start + step * i as f32).collect()
        }
    }
}

impl Records {
    /// Write the current constrained posterior parameters of every
    /// tracked parameter at snapshot `index`.
    pub fn save(&mut self, index: usize, ctx: &ExecutionContext) -> Result<()> {
        for record in self.params.iter_mut() {
            let current = record.parameter.posterior_params(ctx)?;
            for ((name, buf), (_, value)) in record.buffers.iter_mut().zip(current.iter()) {
                if index >= buf.shape()[0] {
                    return Err(VariationalError::invalid_value(
                        "index",
                        format!("{} out of range for {} snapshots of {}", index, buf.shape()[0], name),
                    ));
                }
                buf.index_axis_mut(Axis(0), index).assign(value);
            }
        }
        Ok(())
    }

    pub fn frequency(&self) -> RecordFrequency {
        self.frequency
    }

    /// Epoch coordinate of each snapshot
    pub fn x_epochs(&self) -> &[f32] {
        &self.x_epochs
    }

    pub fn len(&self) -> usize {
        self.x_epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x_epochs.is_empty()
    }

    pub fn params(&self) -> &[ParamRecord] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Result<&ParamRecord> {
        self.params
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| VariationalError::NotRecorded(name.to_string()))
    }
}
