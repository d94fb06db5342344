use std::fmt;

use itertools::Itertools;
use uuid::Uuid;

use crate::array::ArrayValue;
use crate::data_type::{DataType, ScalarType};
use crate::decimal::Decimal;
use crate::record::RecordValue;

/// A runtime value.
///
/// Scalars carry their null bit in an `Option`, so a null still knows its type.
/// [`Value::Null`] is the untyped null literal; it has to be resolved to a concrete type
/// (usually by a cast) before it is stored anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(Option<i64>),
    Text(Option<String>),
    Bool(Option<bool>),
    Blob(Option<Vec<u8>>),
    Uuid(Option<Uuid>),
    Decimal(Decimal),
    Array(ArrayValue),
    Record(RecordValue),
    Null,
}

impl Value {
    pub fn int(v: i64) -> Self {
        Self::Int(Some(v))
    }

    pub fn text(v: impl Into<String>) -> Self {
        Self::Text(Some(v.into()))
    }

    pub fn bool(v: bool) -> Self {
        Self::Bool(Some(v))
    }

    pub fn blob(v: impl Into<Vec<u8>>) -> Self {
        Self::Blob(Some(v.into()))
    }

    pub fn uuid(v: Uuid) -> Self {
        Self::Uuid(Some(v))
    }

    /// A null carrying the type `ty`.
    pub fn null_of(ty: &DataType) -> Self {
        match ty {
            DataType::Scalar(s) => Self::null_scalar(*s),
            DataType::Array(s) => Self::Array(ArrayValue::null(*s)),
            DataType::Record => Self::Record(RecordValue::default()),
            DataType::Null => Self::Null,
        }
    }

    pub fn null_scalar(ty: ScalarType) -> Self {
        match ty {
            ScalarType::Int => Self::Int(None),
            ScalarType::Text => Self::Text(None),
            ScalarType::Bool => Self::Bool(None),
            ScalarType::Blob => Self::Blob(None),
            ScalarType::Uuid => Self::Uuid(None),
            ScalarType::Decimal(meta) => Self::Decimal(Decimal::null(meta)),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::Array(a) => DataType::Array(a.elem_type()),
            Self::Record(_) => DataType::Record,
            Self::Null => DataType::Null,
            scalar => match scalar.scalar_type() {
                Some(s) => DataType::Scalar(s),
                None => DataType::Null,
            },
        }
    }

    /// The scalar type of a scalar value. `None` for arrays, records and untyped nulls.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        Some(match self {
            Self::Int(_) => ScalarType::Int,
            Self::Text(_) => ScalarType::Text,
            Self::Bool(_) => ScalarType::Bool,
            Self::Blob(_) => ScalarType::Blob,
            Self::Uuid(_) => ScalarType::Uuid,
            Self::Decimal(d) => ScalarType::Decimal(d.meta()),
            Self::Array(_) | Self::Record(_) | Self::Null => return None,
        })
    }

    pub fn is_null(&self) -> bool {
        match self {
            Self::Int(v) => v.is_none(),
            Self::Text(v) => v.is_none(),
            Self::Bool(v) => v.is_none(),
            Self::Blob(v) => v.is_none(),
            Self::Uuid(v) => v.is_none(),
            Self::Decimal(d) => d.is_null(),
            Self::Array(a) => a.is_null(),
            Self::Record(_) => false,
            Self::Null => true,
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.scalar_type().is_some()
    }

    /// `Some(b)` for a non-null boolean.
    pub fn truthy(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => *b,
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::text(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::bool(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<ArrayValue> for Value {
    fn from(v: ArrayValue) -> Self {
        Self::Array(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("NULL");
        }
        match self {
            Self::Int(Some(v)) => write!(f, "{v}"),
            Self::Text(Some(v)) => f.write_str(v),
            Self::Bool(Some(v)) => write!(f, "{v}"),
            Self::Blob(Some(v)) => write!(f, "\\x{}", hex::encode(v)),
            Self::Uuid(Some(v)) => write!(f, "{v}"),
            Self::Decimal(d) => f.write_str(&d.to_plain_string().unwrap_or_default()),
            Self::Array(a) => write!(f, "[{}]", a.elements().iter().join(",")),
            Self::Record(r) => write!(
                f,
                "{{{}}}",
                r.iter().map(|(name, v)| format!("{name}: {v}")).join(", ")
            ),
            _ => f.write_str("NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn typed_nulls_keep_their_type() {
        for ty in ["int8", "text", "bool", "bytea", "uuid", "numeric(10,2)", "int8[]", "numeric(3,1)[]"] {
            let ty: DataType = ty.parse().unwrap();
            let null = Value::null_of(&ty);
            assert!(null.is_null(), "{ty}");
            assert_eq!(null.data_type(), ty);
        }
        assert_eq!(Value::Null.data_type(), DataType::Null);
    }

    #[test]
    fn display() {
        let arr = ArrayValue::from_values(vec![Value::int(1), Value::Int(None), Value::int(3)]).unwrap();
        assert_eq!(Value::Array(arr).to_string(), "[1,NULL,3]");
        assert_eq!(Value::blob(vec![0xde, 0xad]).to_string(), "\\xdead");
        assert_eq!(Value::Text(None).to_string(), "NULL");
    }
}
