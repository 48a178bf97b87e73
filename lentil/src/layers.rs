//! Deterministic layers and the builder functions that compose them.

use crate::binder::{bind, ArgSpec, Bindings, OptionSpec};
use crate::error::{Result, VariationalError};
use crate::graph::{BuildEnv, BuiltArgs};
use crate::node::{Node, NodeId};
use crate::value::Value;

use candle_core::Tensor;
use candle_nn::ops;
use std::sync::Arc;

/// A concrete layer kind.
///
/// `build` computes the sample-path output from sample-path arguments;
/// `build_mean` the mean-path output from mean-path arguments. The loss
/// hooks are a layer's own contribution and default to zero.
pub trait LayerOp: Send + Sync {
    fn name(&self) -> &'static str;

    fn arg_specs(&self) -> Vec<ArgSpec>;

    fn option_specs(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    fn validate_options(&self, _options: &Bindings) -> Result<()> {
        Ok(())
    }

    fn build(&self, args: &BuiltArgs, options: &Bindings, env: &BuildEnv) -> Result<Tensor>;

    fn build_mean(&self, args: &BuiltArgs, options: &Bindings, env: &BuildEnv) -> Result<Tensor> {
        self.build(args, options, env)
    }

    fn log_loss(&self, _vals: &Tensor, env: &BuildEnv) -> Result<Tensor> {
        env.zero()
    }

    fn mean_log_loss(&self, _vals: &Tensor, env: &BuildEnv) -> Result<Tensor> {
        env.zero()
    }

    fn kl_loss(&self, env: &BuildEnv) -> Result<Tensor> {
        env.zero()
    }

    /// Whether this layer reads columns of the independent variable.
    fn is_input(&self) -> bool {
        false
    }
}

/// Layer node: a bound instance of a [`LayerOp`].
pub struct Layer {
    id: NodeId,
    op: Arc<dyn LayerOp>,
    args: Bindings,
    options: Bindings,
}

impl Layer {
    pub fn new(
        op: Arc<dyn LayerOp>,
        positional: Vec<Value>,
        keywords: Vec<(&str, Value)>,
    ) -> Result<Self> {
        let (args, options) = bind(
            op.name(),
            &op.arg_specs(),
            &op.option_specs(),
            positional,
            keywords,
        )?;
        op.validate_options(&options)?;
        Ok(Self {
            id: NodeId::fresh(),
            op,
            args,
            options,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub fn op(&self) -> &Arc<dyn LayerOp> {
        &self.op
    }

    pub fn args(&self) -> &Bindings {
        &self.args
    }

    pub fn options(&self) -> &Bindings {
        &self.options
    }

    pub fn is_input(&self) -> bool {
        self.op.is_input()
    }
}

//
// Input
//

/// Selects columns of the independent-variable batch.
///
/// Option `cols`: `None` for every column, an index, a name, or a list
/// of either. Names are resolved against the data when a model is fit.
pub struct Input;

impl LayerOp for Input {
    fn name(&self) -> &'static str {
        "Input"
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        Vec::new()
    }

    fn option_specs(&self) -> Vec<OptionSpec> {
        vec![OptionSpec::new("cols", Value::None)]
    }

    fn validate_options(&self, options: &Bindings) -> Result<()> {
        match options.get("cols") {
            Some(Value::None) | None => Ok(()),
            Some(v) if v.as_columns().is_some() => Ok(()),
            Some(v) => Err(VariationalError::InvalidOption {
                node: self.name().to_string(),
                option: "cols".to_string(),
                reason: format!("must be an int, str, or list of either, got {}", v.type_name()),
            }),
        }
    }

    fn build(&self, _args: &BuiltArgs, _options: &Bindings, env: &BuildEnv) -> Result<Tensor> {
        match env.ctx.input_columns(env.node) {
            None => Ok(env.x.clone()),
            Some(cols) => {
                let idx = cols.iter().map(|&c| c as u32).collect::<Vec<_>>();
                let idx = Tensor::from_vec(idx, cols.len(), env.x.device())?;
                Ok(env.x.index_select(&idx, 1)?)
            }
        }
    }

    fn is_input(&self) -> bool {
        true
    }
}

//
// Element-wise arithmetic
//

macro_rules! binary_layer {
    ($(#[$doc:meta])* $op:ident, $name:literal, $method:ident) => {
        $(#[$doc])*
        pub struct $op;

        impl LayerOp for $op {
            fn name(&self) -> &'static str {
                $name
            }

            fn arg_specs(&self) -> Vec<ArgSpec> {
                vec![ArgSpec::required("a"), ArgSpec::required("b")]
            }

            fn build(&self, args: &BuiltArgs, _options: &Bindings, _env: &BuildEnv) -> Result<Tensor> {
                Ok(args.get("a")?.$method(args.get("b")?)?)
            }
        }
    };
}

binary_layer!(
    /// `a + b` with broadcasting
    Add, "Add", broadcast_add
);
binary_layer!(
    /// `a - b` with broadcasting
    Sub, "Sub", broadcast_sub
);
binary_layer!(
    /// `a * b` with broadcasting
    Mul, "Mul", broadcast_mul
);
binary_layer!(
    /// `a / b` with broadcasting
    Div, "Div", broadcast_div
);

macro_rules! unary_layer {
    ($(#[$doc:meta])* $op:ident, $name:literal, |$x:ident| $body:expr) => {
        $(#[$doc])*
        pub struct $op;

        impl LayerOp for $op {
            fn name(&self) -> &'static str {
                $name
            }

            fn arg_specs(&self) -> Vec<ArgSpec> {
                vec![ArgSpec::required("input")]
            }

            fn build(&self, args: &BuiltArgs, _options: &Bindings, _env: &BuildEnv) -> Result<Tensor> {
                let $x = args.get("input")?;
                Ok($body?)
            }
        }
    };
}

unary_layer!(Neg, "Neg", |x| x.neg());
unary_layer!(Abs, "Abs", |x| x.abs());
unary_layer!(Exp, "Exp", |x| x.exp());
unary_layer!(Log, "Log", |x| x.log());
unary_layer!(
    /// Logistic sigmoid
    Sigmoid, "Sigmoid", |x| ops::sigmoid(x)
);

/// Matrix product `a @ b`.
///
/// A per-row weight draw `b: [B, p, k]` against `a: [B, p]` gives
/// `[B, k]`, one product per row.
pub struct Matmul;

impl LayerOp for Matmul {
    fn name(&self) -> &'static str {
        "Matmul"
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![ArgSpec::required("a"), ArgSpec::required("b")]
    }

    fn build(&self, args: &BuiltArgs, _options: &Bindings, _env: &BuildEnv) -> Result<Tensor> {
        let (a, b) = (args.get("a")?, args.get("b")?);
        let out = if a.rank() == 2 && b.rank() == 3 && a.dim(0)? == b.dim(0)? {
            a.unsqueeze(1)?.contiguous()?.matmul(&b.contiguous()?)?.squeeze(1)?
        } else {
            a.contiguous()?.broadcast_matmul(&b.contiguous()?)?
        };
        Ok(out)
    }
}

/// Sum along one axis, keeping the dimension.
///
/// Option `axis`: negative values count from the last axis (default -1).
pub struct Sum;

impl LayerOp for Sum {
    fn name(&self) -> &'static str {
        "Sum"
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![ArgSpec::required("input")]
    }

    fn option_specs(&self) -> Vec<OptionSpec> {
        vec![OptionSpec::new("axis", -1)]
    }

    fn validate_options(&self, options: &Bindings) -> Result<()> {
        match options.get("axis") {
            Some(Value::Int(_)) => Ok(()),
            _ => Err(VariationalError::InvalidOption {
                node: self.name().to_string(),
                option: "axis".to_string(),
                reason: "must be an int".to_string(),
            }),
        }
    }

    fn build(&self, args: &BuiltArgs, options: &Bindings, _env: &BuildEnv) -> Result<Tensor> {
        let x = args.get("input")?;
        if x.rank() == 0 {
            return Ok(x.clone());
        }
        let axis = match options.get("axis") {
            Some(Value::Int(a)) => *a,
            _ => -1,
        };
        let rank = x.rank() as i64;
        let axis = if axis < 0 { rank + axis } else { axis };
        if axis < 0 || axis >= rank {
            return Err(VariationalError::InvalidOption {
                node: self.name().to_string(),
                option: "axis".to_string(),
                reason: format!("axis out of range for a rank {} input", rank),
            });
        }
        Ok(x.sum_keepdim(axis as usize)?)
    }
}

//
// Builder functions
//

fn layer(op: impl LayerOp + 'static, positional: Vec<Value>) -> Result<Node> {
    Ok(Layer::new(Arc::new(op), positional, vec![])?.into())
}

/// Input-role layer reading `cols` of the independent variable.
/// Pass `Value::None` to read every column.
pub fn input(cols: impl Into<Value>) -> Result<Node> {
    layer(Input, vec![cols.into()])
}

pub fn add(a: impl Into<Value>, b: impl Into<Value>) -> Result<Node> {
    layer(Add, vec![a.into(), b.into()])
}

pub fn sub(a: impl Into<Value>, b: impl Into<Value>) -> Result<Node> {
    layer(Sub, vec![a.into(), b.into()])
}

pub fn mul(a: impl Into<Value>, b: impl Into<Value>) -> Result<Node> {
    layer(Mul, vec![a.into(), b.into()])
}

pub fn div(a: impl Into<Value>, b: impl Into<Value>) -> Result<Node> {
    layer(Div, vec![a.into(), b.into()])
}

pub fn matmul(a: impl Into<Value>, b: impl Into<Value>) -> Result<Node> {
    layer(Matmul, vec![a.into(), b.into()])
}

pub fn neg(x: impl Into<Value>) -> Result<Node> {
    layer(Neg, vec![x.into()])
}

pub fn abs(x: impl Into<Value>) -> Result<Node> {
    layer(Abs, vec![x.into()])
}

pub fn exp(x: impl Into<Value>) -> Result<Node> {
    layer(Exp, vec![x.into()])
}

pub fn log(x: impl Into<Value>) -> Result<Node> {
    layer(Log, vec![x.into()])
}

pub fn sigmoid(x: impl Into<Value>) -> Result<Node> {
    layer(Sigmoid, vec![x.into()])
}

/// Sum over the last axis
pub fn sum(x: impl Into<Value>) -> Result<Node> {
    layer(Sum, vec![x.into()])
}
