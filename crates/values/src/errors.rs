use thiserror::Error;

use crate::data_type::DataType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("cannot divide by zero")]
    DivideByZero,
    #[error("cannot modulo by zero")]
    ModuloByZero,
    #[error("result of `{op}` on `{ty}` is out of range")]
    Overflow { op: String, ty: DataType },
    #[error("exponent must be a non-negative integer, got `{0}`")]
    InvalidExponent(String),
    #[error("operator `{op}` is not supported for type `{ty}`")]
    UnsupportedOp { op: String, ty: DataType },
    #[error("type mismatch: cannot combine `{left}` with `{right}`")]
    Mismatch { left: DataType, right: DataType },
    #[error("cannot cast `{from}` to `{to}`: {reason}")]
    Cast { from: DataType, to: DataType, reason: String },
    #[error("cannot parse `{input}` as `{ty}`")]
    Parse { input: String, ty: DataType },
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("invalid numeric precision and scale ({precision},{scale})")]
    InvalidDecimalMeta { precision: u16, scale: u16 },
    #[error("value `{value}` is out of range for `{ty}`")]
    DecimalOutOfRange { value: String, ty: DataType },
    #[error("array index must be 1 or greater, got {0}")]
    InvalidIndex(i64),
    #[error("array index {index} is out of bounds for array of length {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("array index {index} exceeds the maximum array length of {max}")]
    ArrayTooLarge { index: i64, max: usize },
    #[error("slice upper bound {to} is less than lower bound {from}")]
    InvertedSlice { from: i64, to: i64 },
    #[error("slice assignment needs at least {expected} values, got {got}")]
    SliceTooShort { expected: usize, got: usize },
    #[error("only one-dimensional arrays are supported")]
    Dimensionality,
    #[error("cannot build an empty array of unknown type")]
    EmptyArray,
    #[error("record already has field `{0}`")]
    DuplicateField(String),
    #[error("expected `{expected}`, got `{found}`")]
    UnexpectedType { expected: DataType, found: DataType },
}

impl ValueError {
    pub fn cast(from: DataType, to: DataType, reason: impl ToString) -> Self {
        Self::Cast {
            from,
            to,
            reason: reason.to_string(),
        }
    }

    pub fn unsupported(op: impl ToString, ty: DataType) -> Self {
        Self::UnsupportedOp { op: op.to_string(), ty }
    }

    pub fn parse(input: &str, ty: DataType) -> Self {
        Self::Parse {
            input: input.to_owned(),
            ty,
        }
    }
}

pub type ValueResult<T> = Result<T, ValueError>;
