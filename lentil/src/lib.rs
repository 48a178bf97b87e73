//! Composable Bayesian models fit by stochastic variational inference.
//!
//! A model is a tree of [`Node`]s: trainable [`Parameter`]s, deterministic
//! [`Layer`]s and a [`Distribution`] at the root. [`Model::fit`] runs
//! minibatch ELBO optimization; the criticism methods on [`Model`]
//! inspect the fitted posterior predictive.

pub mod binder;
pub mod cli;
pub mod context;
pub mod criticism;
pub mod data;
pub mod distributions;
pub mod error;
pub mod fit;
pub mod graph;
pub mod io;
pub mod layers;
pub mod model;
pub mod node;
pub mod optim;
pub mod parameter;
pub mod records;
pub mod summary;
pub mod tensor_util;
pub mod transform;
pub mod value;

pub use candle_core;
pub use candle_nn;

pub use data::{FitData, Table};
pub use distributions::{bernoulli, cauchy, normal, poisson, Distribution};
pub use error::{ErrorCategory, ErrorKind, Result, VariationalError};
pub use fit::{ComputeDevice, FitConfig, Metric};
pub use layers::Layer;
pub use model::Model;
pub use node::Node;
pub use optim::{OptimizerConfig, OptimizerKind};
pub use parameter::{Estimator, Parameter};
pub use records::{RecordFrequency, RecordSpec};
pub use transform::{Bijector, Bound};
pub use value::{Column, Value};
