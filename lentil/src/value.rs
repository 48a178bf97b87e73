use crate::error::Result;
use crate::node::Node;

use candle_core::{DType, Device, Tensor};
use ndarray::{Array1, Array2, ArrayD};
use std::fmt;

/// A column of the independent-variable data, by position or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    Index(usize),
    Name(String),
}

impl From<usize> for Column {
    fn from(ix: usize) -> Self {
        Column::Index(ix)
    }
}

impl From<&str> for Column {
    fn from(name: &str) -> Self {
        Column::Name(name.to_string())
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::Index(ix) => write!(f, "{}", ix),
            Column::Name(name) => write!(f, "'{}'", name),
        }
    }
}

/// Value bound to a node argument or configuration option.
///
/// Arguments must be numeric literals, arrays, tensors, or
/// layer/parameter nodes. Options may hold any variant.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Array(ArrayD<f32>),
    Tensor(Tensor),
    Columns(Vec<Column>),
    Node(Node),
    None,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "str",
            Value::Array(_) => "array",
            Value::Tensor(_) => "tensor",
            Value::Columns(_) => "columns",
            Value::Node(Node::Parameter(_)) => "parameter",
            Value::Node(Node::Layer(_)) => "layer",
            Value::Node(Node::Distribution(_)) => "distribution",
            Value::None => "none",
        }
    }

    /// Whether this value may be used as a layer argument.
    /// Distributions are never valid arguments.
    pub fn is_valid_argument(&self) -> bool {
        match self {
            Value::Int(_) | Value::Float(_) | Value::Array(_) | Value::Tensor(_) => true,
            Value::Node(Node::Parameter(_)) | Value::Node(Node::Layer(_)) => true,
            _ => false,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(x) => Some(*x as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Column selector view: `None` selects every column.
    pub fn as_columns(&self) -> Option<Vec<Column>> {
        match self {
            Value::Int(ix) if *ix >= 0 => Some(vec![Column::Index(*ix as usize)]),
            Value::Str(name) => Some(vec![Column::Name(name.clone())]),
            Value::Columns(cols) => Some(cols.clone()),
            _ => None,
        }
    }

    /// Convert a literal (non-node) value to a tensor.
    /// Integers are coerced to floating point.
    pub(crate) fn literal_tensor(&self, dtype: DType, device: &Device) -> Result<Option<Tensor>> {
        let tensor = match self {
            Value::Int(x) => Some(Tensor::new(*x as f64, device)?.to_dtype(dtype)?),
            Value::Float(x) => Some(Tensor::new(*x, device)?.to_dtype(dtype)?),
            Value::Array(arr) => {
                let shape = arr.shape().to_vec();
                let data = arr.iter().copied().collect::<Vec<f32>>();
                Some(Tensor::from_vec(data, shape, device)?.to_dtype(dtype)?)
            }
            Value::Tensor(t) => Some(t.to_device(device)?.to_dtype(dtype)?),
            _ => None,
        };
        Ok(tensor)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "'{}'", s),
            Value::Array(arr) => write!(f, "array shape={:?}", arr.shape()),
            Value::Tensor(t) => write!(f, "tensor shape={:?}", t.dims()),
            Value::Columns(cols) => {
                let cols = cols.iter().map(|c| c.to_string()).collect::<Vec<_>>();
                write!(f, "[{}]", cols.join(", "))
            }
            Value::Node(node) => write!(f, "{}", node),
            Value::None => write!(f, "None"),
        }
    }
}

macro_rules! impl_value_from {
    ($t:ty, $var:ident, $conv:expr) => {
        impl From<$t> for Value {
            fn from(x: $t) -> Self {
                Value::$var($conv(x))
            }
        }
    };
}

impl_value_from!(f64, Float, |x| x);
impl_value_from!(f32, Float, |x: f32| x as f64);
impl_value_from!(i64, Int, |x| x);
impl_value_from!(i32, Int, |x: i32| x as i64);
impl_value_from!(usize, Int, |x: usize| x as i64);
impl_value_from!(bool, Bool, |x| x);
impl_value_from!(String, Str, |x| x);
impl_value_from!(&str, Str, |x: &str| x.to_string());
impl_value_from!(ArrayD<f32>, Array, |x| x);
impl_value_from!(Array1<f32>, Array, |x: Array1<f32>| x.into_dyn());
impl_value_from!(Array2<f32>, Array, |x: Array2<f32>| x.into_dyn());
impl_value_from!(Tensor, Tensor, |x| x);
impl_value_from!(Vec<Column>, Columns, |x| x);
impl_value_from!(Node, Node, |x| x);

impl From<&Node> for Value {
    fn from(node: &Node) -> Self {
        Value::Node(node.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_become_float_tensors() -> Result<()> {
        let device = Device::Cpu;
        let t = Value::from(3).literal_tensor(DType::F32, &device)?;
        let t = t.ok_or(crate::error::VariationalError::NotFit)?;
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.to_scalar::<f32>()?, 3.0);

        let arr = Array2::<f32>::ones((4, 2));
        let t = Value::from(arr).literal_tensor(DType::F64, &device)?;
        assert_eq!(t.map(|t| t.dims().to_vec()), Some(vec![4, 2]));

        assert!(Value::from("x").literal_tensor(DType::F32, &device)?.is_none());
        Ok(())
    }

    #[test]
    fn argument_validity() {
        assert!(Value::from(1.5).is_valid_argument());
        assert!(Value::from(2).is_valid_argument());
        assert!(!Value::from("loc").is_valid_argument());
        assert!(!Value::None.is_valid_argument());
        assert!(!Value::from(true).is_valid_argument());
    }
}
