//! The value system of the quill procedure interpreter.
//!
//! Every [`Value`] carries a type, even when it is null, and all operators follow SQL
//! three-valued logic. Arrays are one-dimensional and 1-indexed.

mod array;
mod cast;
mod data_type;
mod decimal;
mod errors;
pub mod ops;
mod record;
mod text;
mod value;

pub use array::{ArrayValue, MAX_ARRAY_LEN};
pub use data_type::{DataType, DecimalMeta, MAX_PRECISION, ScalarType};
pub use decimal::Decimal;
pub use errors::{ValueError, ValueResult};
pub use ops::{ArithOp, CmpOp, UnaryOp};
pub use record::RecordValue;
pub use value::Value;

pub use uuid::Uuid;
