//! Comparison, arithmetic and unary operators over [`Value`]s.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::array::ArrayValue;
use crate::data_type::{DataType, ScalarType};
use crate::errors::{ValueError, ValueResult};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum CmpOp {
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "<>", serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    LtEq,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    GtEq,
    #[strum(serialize = "IS")]
    Is,
    #[strum(serialize = "IS DISTINCT FROM")]
    IsDistinctFrom,
}

impl CmpOp {
    /// Operators that require an ordering rather than just equality.
    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::Lt | Self::LtEq | Self::Gt | Self::GtEq)
    }

    fn test(&self, ord: Ordering) -> bool {
        match self {
            Self::Eq | Self::Is => ord == Ordering::Equal,
            Self::NotEq | Self::IsDistinctFrom => ord != Ordering::Equal,
            Self::Lt => ord == Ordering::Less,
            Self::LtEq => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::GtEq => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum ArithOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "^")]
    Exp,
    #[strum(serialize = "||")]
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum UnaryOp {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "+")]
    Pos,
    #[strum(serialize = "NOT")]
    Not,
}

/// Checks whether `left op right` is well typed, returning the result type.
pub fn arithmetic_type(left: &DataType, right: &DataType, op: ArithOp) -> ValueResult<DataType> {
    if !left.arithmetic_compatible(right) {
        return Err(ValueError::Mismatch {
            left: *left,
            right: *right,
        });
    }
    let ty = if left.is_null() { *right } else { *left };
    if ty.is_null() {
        return Ok(ty);
    }
    let supported = match ty {
        DataType::INT => op != ArithOp::Concat,
        DataType::TEXT | DataType::BLOB => op == ArithOp::Concat,
        DataType::Scalar(ScalarType::Decimal(_)) => op != ArithOp::Concat,
        _ => false,
    };
    if !supported {
        return Err(ValueError::unsupported(op, ty));
    }
    Ok(ty)
}

/// Checks whether `left op right` is well typed. The result is always `bool`.
pub fn comparison_type(left: &DataType, right: &DataType, op: CmpOp) -> ValueResult<()> {
    let comparable = left.equals(right) || left.arithmetic_compatible(right);
    if !comparable {
        return Err(ValueError::Mismatch {
            left: *left,
            right: *right,
        });
    }
    let ty = if left.is_null() { right } else { left };
    if op.is_ordering() && !orderable(ty) {
        return Err(ValueError::unsupported(op, *ty));
    }
    Ok(())
}

/// Checks whether `op` applies to `ty`, returning the result type.
pub fn unary_type(ty: &DataType, op: UnaryOp) -> ValueResult<DataType> {
    let ok = match op {
        UnaryOp::Neg | UnaryOp::Pos => {
            matches!(*ty, DataType::Null | DataType::Scalar(ScalarType::Int | ScalarType::Decimal(_)))
        }
        UnaryOp::Not => matches!(*ty, DataType::Null | DataType::BOOL),
    };
    if !ok {
        return Err(ValueError::unsupported(op, *ty));
    }
    Ok(*ty)
}

fn orderable(ty: &DataType) -> bool {
    matches!(
        ty,
        DataType::Null | DataType::Scalar(ScalarType::Int | ScalarType::Text | ScalarType::Bool | ScalarType::Decimal(_))
    )
}

impl Value {
    /// Compares two values, yielding a `bool` value.
    ///
    /// Apart from `IS` and `IS DISTINCT FROM`, a null on either side yields a null `bool`.
    pub fn compare(&self, other: &Value, op: CmpOp) -> ValueResult<Value> {
        comparison_type(&self.data_type(), &other.data_type(), op)?;

        if matches!(op, CmpOp::Is | CmpOp::IsDistinctFrom) {
            let same = match (self.is_null(), other.is_null()) {
                (true, true) => true,
                (false, false) => self.equal_non_null(other)?,
                _ => false,
            };
            return Ok(Value::bool(if op == CmpOp::Is { same } else { !same }));
        }

        if self.is_null() || other.is_null() {
            return Ok(Value::Bool(None));
        }

        let ord = if op.is_ordering() {
            self.order_non_null(other)?
        } else if self.equal_non_null(other)? {
            Ordering::Equal
        } else {
            Ordering::Less
        };
        Ok(Value::bool(op.test(ord)))
    }

    fn equal_non_null(&self, other: &Value) -> ValueResult<bool> {
        Ok(match (self, other) {
            (Value::Array(a), Value::Array(b)) => arrays_equal(a, b)?,
            (Value::Record(a), Value::Record(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for ((an, av), (bn, bv)) in a.iter().zip(b.iter()) {
                    if an != bn || !av.compare(bv, CmpOp::Is)?.truthy().unwrap_or(false) {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp_value(b) == Some(Ordering::Equal),
            (a, b) => {
                return Err(ValueError::Mismatch {
                    left: a.data_type(),
                    right: b.data_type(),
                });
            }
        })
    }

    fn order_non_null(&self, other: &Value) -> ValueResult<Ordering> {
        let ord = match (self, other) {
            (Value::Int(Some(a)), Value::Int(Some(b))) => Some(a.cmp(b)),
            (Value::Text(Some(a)), Value::Text(Some(b))) => Some(a.cmp(b)),
            (Value::Bool(Some(a)), Value::Bool(Some(b))) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp_value(b),
            _ => None,
        };
        ord.ok_or_else(|| ValueError::unsupported("ordering", self.data_type()))
    }

    /// Applies a binary arithmetic operator.
    ///
    /// A null operand produces a null of the left operand's type, or of the right operand's
    /// type when the left is an untyped null.
    pub fn arithmetic(&self, other: &Value, op: ArithOp) -> ValueResult<Value> {
        let ty = arithmetic_type(&self.data_type(), &other.data_type(), op)?;
        if self.is_null() || other.is_null() {
            return Ok(Value::null_of(&ty));
        }

        let overflow = || ValueError::Overflow {
            op: op.to_string(),
            ty: DataType::INT,
        };

        Ok(match (self, other) {
            (Value::Int(Some(a)), Value::Int(Some(b))) => Value::int(match op {
                ArithOp::Add => a.checked_add(*b).ok_or_else(overflow)?,
                ArithOp::Sub => a.checked_sub(*b).ok_or_else(overflow)?,
                ArithOp::Mul => a.checked_mul(*b).ok_or_else(overflow)?,
                ArithOp::Div => {
                    if *b == 0 {
                        return Err(ValueError::DivideByZero);
                    }
                    a.checked_div(*b).ok_or_else(overflow)?
                }
                ArithOp::Mod => {
                    if *b == 0 {
                        return Err(ValueError::ModuloByZero);
                    }
                    a.checked_rem(*b).ok_or_else(overflow)?
                }
                ArithOp::Exp => {
                    let exp = u32::try_from(*b).map_err(|_| ValueError::InvalidExponent(b.to_string()))?;
                    a.checked_pow(exp).ok_or_else(overflow)?
                }
                ArithOp::Concat => return Err(ValueError::unsupported(op, DataType::INT)),
            }),
            (Value::Decimal(a), Value::Decimal(b)) => Value::Decimal(a.arithmetic(b, op)?),
            (Value::Text(Some(a)), Value::Text(Some(b))) => Value::text(format!("{a}{b}")),
            (Value::Blob(Some(a)), Value::Blob(Some(b))) => Value::blob([a.as_slice(), b.as_slice()].concat()),
            (a, _) => return Err(ValueError::unsupported(op, a.data_type())),
        })
    }

    pub fn unary(&self, op: UnaryOp) -> ValueResult<Value> {
        unary_type(&self.data_type(), op)?;
        Ok(match (self, op) {
            (Value::Null, _) => Value::Null,
            (v, UnaryOp::Pos) => v.clone(),
            (Value::Int(v), UnaryOp::Neg) => match v {
                Some(v) => Value::int(v.checked_neg().ok_or_else(|| ValueError::Overflow {
                    op: op.to_string(),
                    ty: DataType::INT,
                })?),
                None => Value::Int(None),
            },
            (Value::Decimal(d), UnaryOp::Neg) => Value::Decimal(d.neg()),
            (Value::Bool(v), UnaryOp::Not) => Value::Bool(v.map(|b| !b)),
            (v, op) => return Err(ValueError::unsupported(op, v.data_type())),
        })
    }
}

fn arrays_equal(a: &ArrayValue, b: &ArrayValue) -> ValueResult<bool> {
    let (a, b) = (a.elements(), b.elements());
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !x.compare(y, CmpOp::Is)?.truthy().unwrap_or(false) {
            return Ok(false);
        }
    }
    Ok(true)
}
