//! Execution context of one `fit`: variable storage and resolved data
//! bindings.

use crate::error::{Result, VariationalError};
use crate::node::{Node, NodeId};
use crate::parameter::Parameter;
use crate::value::{Column, Value};

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use log::debug;
use ndarray::{ArrayD, Axis};
use std::collections::HashMap;
use std::sync::Arc;

/// Owns the trainable variables of every materialized parameter and
/// the column bindings of Input-role layers.
///
/// Tensors handed out by a context (posterior draws, built outputs)
/// refer to its variables; a new `fit` creates a new context.
pub struct ExecutionContext {
    dtype: DType,
    device: Device,
    varmap: VarMap,
    vars: HashMap<NodeId, Vec<(String, Tensor)>>,
    inputs: HashMap<NodeId, Vec<usize>>,
    nunique: HashMap<NodeId, Vec<usize>>,
}

impl ExecutionContext {
    pub fn new(dtype: DType, device: Device) -> Self {
        Self {
            dtype,
            device,
            varmap: VarMap::new(),
            vars: HashMap::new(),
            inputs: HashMap::new(),
            nunique: HashMap::new(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Every trainable variable, for the optimizer
    pub fn all_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Create the unconstrained posterior variables of each parameter,
    /// stored as `{parameter name}.{posterior parameter name}`.
    pub fn materialize(&mut self, params: &[Arc<Parameter>]) -> Result<()> {
        let vb = VarBuilder::from_varmap(&self.varmap, self.dtype, &self.device);
        for p in params {
            if self.vars.contains_key(&p.id()) {
                continue;
            }
            let pvb = vb.pp(p.name());
            let mut vars = Vec::with_capacity(p.post_params().len());
            for pp in p.post_params() {
                let t = pvb.get_with_hints(p.shape().to_vec(), &pp.name, pp.init)?;
                vars.push((pp.name.clone(), t));
            }
            debug!("materialized {} {:?}", p.name(), p.shape());
            self.vars.insert(p.id(), vars);
        }
        Ok(())
    }

    /// Unconstrained posterior variables of a parameter, in declaration order
    pub fn parameter_vars(&self, id: NodeId) -> Option<&[(String, Tensor)]> {
        self.vars.get(&id).map(|v| v.as_slice())
    }

    /// Resolve every Input-role layer under `root` to explicit column
    /// indices of an `ncols`-wide independent variable.
    ///
    /// # Arguments
    /// * `columns` - column names of the data, empty if unnamed
    pub fn resolve_inputs(&mut self, root: &Node, columns: &[String], ncols: usize) -> Result<()> {
        for layer in root.input_list() {
            let selector = match layer.options().get("cols") {
                None | Some(Value::None) => continue,
                Some(v) => v.as_columns().ok_or_else(|| VariationalError::InvalidOption {
                    node: layer.name().to_string(),
                    option: "cols".to_string(),
                    reason: format!("cannot select columns with {}", v.type_name()),
                })?,
            };

            let mut resolved = Vec::with_capacity(selector.len());
            for col in selector {
                let index = match col {
                    Column::Index(i) => i,
                    Column::Name(name) => columns
                        .iter()
                        .position(|c| *c == name)
                        .ok_or(VariationalError::MissingColumn(name))?,
                };
                if index >= ncols {
                    return Err(VariationalError::ColumnOutOfRange { index, ncols });
                }
                resolved.push(index);
            }
            self.inputs.insert(layer.id(), resolved);
        }
        Ok(())
    }

    /// Columns read by an Input-role layer; `None` means all of them.
    pub fn input_columns(&self, id: NodeId) -> Option<&[usize]> {
        self.inputs.get(&id).map(|v| v.as_slice())
    }

    /// Count the distinct training values of every column each
    /// Input-role layer reads. Call after [`Self::resolve_inputs`].
    ///
    /// * `x` - training data, `[N, ncols, ...]`
    pub fn count_unique(&mut self, root: &Node, x: &ArrayD<f32>) -> Result<()> {
        let ncols = match x.shape() {
            [_, ncols, ..] => *ncols,
            _ => {
                return Err(VariationalError::InvalidData(
                    "x must have a column axis".to_string(),
                ))
            }
        };
        for layer in root.input_list() {
            let cols = match self.input_columns(layer.id()) {
                Some(cols) => cols.to_vec(),
                None => (0..ncols).collect(),
            };
            let counts = cols
                .iter()
                .map(|&c| {
                    let mut values = x.index_axis(Axis(1), c).iter().copied().collect::<Vec<_>>();
                    values.sort_by(|a, b| a.total_cmp(b));
                    values.dedup_by(|a, b| a.total_cmp(b).is_eq());
                    values.len()
                })
                .collect::<Vec<_>>();
            debug!("{} distinct values per column {:?}", layer.name(), counts);
            self.nunique.insert(layer.id(), counts);
        }
        Ok(())
    }

    /// Distinct training values of each column an Input-role layer
    /// reads, in column order
    pub fn input_nunique(&self, id: NodeId) -> Option<&[usize]> {
        self.nunique.get(&id).map(|v| v.as_slice())
    }
}
