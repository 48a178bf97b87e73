//! Error types for model construction, fitting and criticism.

use thiserror::Error;

/// Result type alias used across the library.
pub type Result<T> = std::result::Result<T, VariationalError>;

/// Coarse error kind, mirroring the type/value/runtime split users
/// expect when matching on failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Type,
    Value,
    Runtime,
}

/// Which stage of the model life cycle raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad node construction (missing/invalid arguments, malformed options)
    Schema,
    /// Operation called before the model or parameter was ready
    Precondition,
    /// Invalid arguments to `fit` or a criticism method
    InvalidInput,
    /// Data could not be matched against the model
    Data,
    /// Model has nothing to train
    EmptyModel,
    /// Sampling estimator incompatible with the posterior
    Estimator,
    /// Failure inside the numeric backend or IO
    Backend,
}

/// Errors that can occur while building, fitting or querying a model.
#[derive(Debug, Error)]
pub enum VariationalError {
    /// A required argument was not bound.
    #[error("required arg(s) were not set. {node} requires args: {required}")]
    MissingArgument { node: String, required: String },

    /// An argument was bound to a value of an unsupported type.
    #[error(
        "invalid type for {node} argument {arg}. Arguments to a layer must be one of: \
         int, float, array, tensor, or a layer or parameter"
    )]
    InvalidArgumentType { node: String, arg: String },

    /// Too many positional values or an unknown keyword.
    #[error("{node}: {reason}")]
    InvalidBinding { node: String, reason: String },

    /// A configuration option failed validation.
    #[error("invalid option {option} for {node}: {reason}")]
    InvalidOption {
        node: String,
        option: String,
        reason: String,
    },

    /// A parameter was declared with an inconsistent configuration.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The root of a model must be a distribution.
    #[error("model root must be a distribution, got {0}")]
    InvalidRoot(String),

    /// Two distinct parameters in one model share a name.
    #[error("parameter name '{0}' is used by more than one parameter")]
    DuplicateParameter(String),

    /// Wrong type for a fit or criticism argument.
    #[error("{arg} {reason}")]
    InvalidType { arg: String, reason: String },

    /// Out-of-range value for a fit or criticism argument.
    #[error("{arg} {reason}")]
    InvalidValue { arg: String, reason: String },

    /// Criticism method called before `fit` completed.
    #[error("model must first be fit")]
    NotFit,

    /// Parameter has no variables in the given context.
    #[error("parameter '{0}' must first be built")]
    NotBuilt(String),

    /// A requested parameter does not exist.
    #[error("'{0}' is not a parameter in this model")]
    UnknownParameter(String),

    /// A parameter was not recorded during training.
    #[error("parameter '{0}' was not recorded. To record, set `record` when calling fit")]
    NotRecorded(String),

    /// Records were requested but the last fit recorded nothing.
    #[error("no parameters were recorded. To record, set `record` when calling fit")]
    NothingRecorded,

    /// Named column not among the supplied columns.
    #[error("column '{0}' not in x")]
    MissingColumn(String),

    /// Column index beyond the data width.
    #[error("column index {index} out of range for x with {ncols} columns")]
    ColumnOutOfRange { index: usize, ncols: usize },

    /// Data arrays disagree on the number of samples or are unusable.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The model has no trainable parameters.
    #[error("model contains no parameters, cannot fit it")]
    EmptyModel,

    /// Estimator not compatible with the posterior family.
    #[error("{estimator} requires a symmetric posterior distribution in the location-scale family, got {family}")]
    IncompatibleEstimator { estimator: String, family: String },

    /// Operation not defined for this distribution family.
    #[error("{op} is not supported for the {family} distribution")]
    Unsupported { op: String, family: String },

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Array shape error.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VariationalError {
    pub fn category(&self) -> ErrorCategory {
        use VariationalError::*;
        match self {
            MissingArgument { .. }
            | InvalidArgumentType { .. }
            | InvalidBinding { .. }
            | InvalidOption { .. }
            | InvalidParameter { .. }
            | InvalidRoot(_)
            | DuplicateParameter(_) => ErrorCategory::Schema,
            NotFit | NotBuilt(_) => ErrorCategory::Precondition,
            InvalidType { .. }
            | InvalidValue { .. }
            | UnknownParameter(_)
            | NotRecorded(_)
            | NothingRecorded
            | Unsupported { .. } => ErrorCategory::InvalidInput,
            MissingColumn(_) | ColumnOutOfRange { .. } | InvalidData(_) => ErrorCategory::Data,
            EmptyModel => ErrorCategory::EmptyModel,
            IncompatibleEstimator { .. } => ErrorCategory::Estimator,
            Tensor(_) | Shape(_) | Io(_) => ErrorCategory::Backend,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use VariationalError::*;
        match self {
            MissingArgument { .. }
            | InvalidArgumentType { .. }
            | InvalidBinding { .. }
            | InvalidRoot(_)
            | InvalidType { .. } => ErrorKind::Type,
            InvalidOption { .. }
            | InvalidParameter { .. }
            | DuplicateParameter(_)
            | InvalidValue { .. }
            | UnknownParameter(_)
            | NotRecorded(_)
            | NothingRecorded
            | InvalidData(_)
            | IncompatibleEstimator { .. }
            | Unsupported { .. } => ErrorKind::Value,
            NotFit
            | NotBuilt(_)
            | MissingColumn(_)
            | ColumnOutOfRange { .. }
            | EmptyModel
            | Tensor(_)
            | Shape(_)
            | Io(_) => ErrorKind::Runtime,
        }
    }

    pub(crate) fn invalid_value(arg: &str, reason: impl Into<String>) -> Self {
        VariationalError::InvalidValue {
            arg: arg.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_type(arg: &str, reason: impl Into<String>) -> Self {
        VariationalError::InvalidType {
            arg: arg.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_taxonomy() {
        let missing = VariationalError::MissingArgument {
            node: "Add".into(),
            required: "a, b".into(),
        };
        assert_eq!(missing.category(), ErrorCategory::Schema);
        assert_eq!(missing.kind(), ErrorKind::Type);
        assert!(missing.to_string().contains("Add requires args: a, b"));

        assert_eq!(VariationalError::NotFit.category(), ErrorCategory::Precondition);
        assert_eq!(VariationalError::EmptyModel.kind(), ErrorKind::Runtime);
        assert_eq!(
            VariationalError::UnknownParameter("z".into()).kind(),
            ErrorKind::Value
        );

        let nothing = VariationalError::NothingRecorded;
        assert_eq!(nothing.category(), ErrorCategory::InvalidInput);
        assert_eq!(nothing.kind(), ErrorKind::Value);
        assert!(nothing.to_string().starts_with("no parameters were recorded"));
    }
}
