use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{ValueError, ValueResult};

/// The largest precision a `numeric` may declare.
pub const MAX_PRECISION: u16 = 1000;

/// Precision and scale of a `numeric(p, s)` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecimalMeta {
    pub precision: u16,
    pub scale: u16,
}

impl DecimalMeta {
    pub fn new(precision: u16, scale: u16) -> ValueResult<Self> {
        if precision == 0 || precision > MAX_PRECISION || scale > precision {
            return Err(ValueError::InvalidDecimalMeta { precision, scale });
        }
        Ok(Self { precision, scale })
    }

    /// The number of digits allowed left of the decimal point.
    pub fn integral_digits(&self) -> u16 {
        self.precision - self.scale
    }
}

/// The element types a value can have.
///
/// `Decimal(None)` is a bare `numeric` with no declared precision or scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Int,
    Text,
    Bool,
    Blob,
    Uuid,
    Decimal(Option<DecimalMeta>),
}

impl ScalarType {
    /// The base name of the type, without any decimal metadata.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int => "int8",
            Self::Text => "text",
            Self::Bool => "bool",
            Self::Blob => "bytea",
            Self::Uuid => "uuid",
            Self::Decimal(_) => "numeric",
        }
    }

    /// Loose equality: a bare `numeric` matches any `numeric(p, s)`.
    pub fn equals(&self, other: &ScalarType) -> bool {
        match (self, other) {
            (Self::Decimal(a), Self::Decimal(b)) => a.is_none() || b.is_none() || a == b,
            _ => self == other,
        }
    }

    /// Whether both types are the same kind, ignoring decimal metadata.
    pub fn same_kind(&self, other: &ScalarType) -> bool {
        matches!((self, other), (Self::Decimal(_), Self::Decimal(_))) || self == other
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decimal(Some(meta)) => write!(f, "numeric({},{})", meta.precision, meta.scale),
            other => f.write_str(other.name()),
        }
    }
}

/// The type of a [`Value`](crate::Value).
///
/// Arrays are always one-dimensional, so an array type is fully described by its element type.
/// `Null` is the type of an untyped null literal, which must be resolved before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Scalar(ScalarType),
    Array(ScalarType),
    Record,
    Null,
}

impl DataType {
    pub const INT: DataType = DataType::Scalar(ScalarType::Int);
    pub const TEXT: DataType = DataType::Scalar(ScalarType::Text);
    pub const BOOL: DataType = DataType::Scalar(ScalarType::Bool);
    pub const BLOB: DataType = DataType::Scalar(ScalarType::Blob);
    pub const UUID: DataType = DataType::Scalar(ScalarType::Uuid);
    pub const NUMERIC: DataType = DataType::Scalar(ScalarType::Decimal(None));

    pub fn decimal(precision: u16, scale: u16) -> ValueResult<Self> {
        Ok(Self::Scalar(ScalarType::Decimal(Some(DecimalMeta::new(precision, scale)?))))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The scalar type of a scalar, or the element type of an array.
    pub fn scalar(&self) -> Option<ScalarType> {
        match self {
            Self::Scalar(s) | Self::Array(s) => Some(*s),
            Self::Record | Self::Null => None,
        }
    }

    /// The array type whose elements are of this scalar type.
    pub fn array_of(&self) -> Option<DataType> {
        match self {
            Self::Scalar(s) => Some(Self::Array(*s)),
            _ => None,
        }
    }

    /// Exact equality, including decimal precision and scale.
    pub fn equals_strict(&self, other: &DataType) -> bool {
        self == other
    }

    /// Loose equality used when checking assignments and operands.
    ///
    /// The untyped null type matches every type, and a bare `numeric` matches any
    /// `numeric(p, s)`.
    pub fn equals(&self, other: &DataType) -> bool {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => true,
            (Self::Scalar(a), Self::Scalar(b)) | (Self::Array(a), Self::Array(b)) => a.equals(b),
            (Self::Record, Self::Record) => true,
            _ => false,
        }
    }

    /// Whether arithmetic between the two types is well-formed.
    /// Decimals of differing precision are allowed; the result takes the left side's metadata.
    pub fn arithmetic_compatible(&self, other: &DataType) -> bool {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => true,
            (Self::Scalar(a), Self::Scalar(b)) => a.same_kind(b),
            _ => false,
        }
    }
}

impl From<ScalarType> for DataType {
    fn from(s: ScalarType) -> Self {
        DataType::Scalar(s)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Array(s) => write!(f, "{s}[]"),
            Self::Record => f.write_str("record"),
            Self::Null => f.write_str("null"),
        }
    }
}

impl FromStr for DataType {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let (base, is_array) = match lowered.strip_suffix("[]") {
            Some(base) => (base.trim_end(), true),
            None => (lowered.as_str(), false),
        };

        let unknown = || ValueError::UnknownType(s.to_owned());

        let scalar = match base {
            "null" if !is_array => return Ok(Self::Null),
            "record" if !is_array => return Ok(Self::Record),
            "int" | "int8" | "integer" | "bigint" => ScalarType::Int,
            "text" => ScalarType::Text,
            "bool" | "boolean" => ScalarType::Bool,
            "bytea" | "blob" => ScalarType::Blob,
            "uuid" => ScalarType::Uuid,
            "numeric" | "decimal" => ScalarType::Decimal(None),
            other => {
                let args = other
                    .strip_prefix("numeric")
                    .or_else(|| other.strip_prefix("decimal"))
                    .and_then(|rest| rest.trim().strip_prefix('('))
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(unknown)?;
                let (precision, scale) = args.split_once(',').ok_or_else(unknown)?;
                let precision = precision.trim().parse().map_err(|_| unknown())?;
                let scale = scale.trim().parse().map_err(|_| unknown())?;
                ScalarType::Decimal(Some(DecimalMeta::new(precision, scale)?))
            }
        };

        Ok(if is_array {
            Self::Array(scalar)
        } else {
            Self::Scalar(scalar)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_and_display() {
        struct TestCase {
            input: &'static str,
            want: &'static str,
        }

        for TestCase { input, want } in [
            TestCase { input: "int", want: "int8" },
            TestCase { input: "INT8[]", want: "int8[]" },
            TestCase { input: "text", want: "text" },
            TestCase { input: "blob", want: "bytea" },
            TestCase { input: "uuid[]", want: "uuid[]" },
            TestCase { input: "numeric", want: "numeric" },
            TestCase { input: "decimal(10, 5)", want: "numeric(10,5)" },
            TestCase { input: "numeric(16,6)[]", want: "numeric(16,6)[]" },
            TestCase { input: "bool", want: "bool" },
        ] {
            let ty: DataType = input.parse().unwrap();
            assert_eq!(ty.to_string(), want, "{input}");
            assert_eq!(ty.to_string().parse::<DataType>().unwrap(), ty, "{input}");
        }
    }

    #[test]
    fn rejects_bad_types() {
        for input in ["float", "numeric(0,0)", "numeric(5,6)", "numeric(5)", "null[]", "record[]"] {
            assert!(input.parse::<DataType>().is_err(), "{input}");
        }
    }

    #[test]
    fn loose_equality() {
        let dec = DataType::decimal(10, 2).unwrap();
        assert!(dec.equals(&DataType::NUMERIC));
        assert!(!dec.equals_strict(&DataType::NUMERIC));
        assert!(!dec.equals(&DataType::decimal(10, 3).unwrap()));
        assert!(DataType::Null.equals(&DataType::TEXT));
        assert!(!DataType::INT.equals(&DataType::Array(ScalarType::Int)));
        assert!(dec.arithmetic_compatible(&DataType::decimal(5, 1).unwrap()));
    }
}
