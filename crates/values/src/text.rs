//! A flat text encoding of values, used to persist extension configuration.

use itertools::Itertools;

use crate::array::ArrayValue;
use crate::data_type::{DataType, ScalarType};
use crate::errors::{ValueError, ValueResult};
use crate::value::Value;

const NULL: &str = "NULL";

impl Value {
    /// Encodes the value as text that [`Value::parse`] reads back given the same type.
    pub fn stringify(&self) -> ValueResult<String> {
        if self.is_null() {
            return Ok(NULL.to_owned());
        }
        match self {
            Value::Array(arr) => arr.elements().iter().map(Value::stringify).process_results(|mut it| it.join(",")),
            Value::Blob(Some(b)) => Ok(format!("\\x{}", hex::encode(b))),
            Value::Record(_) => Err(ValueError::unsupported("stringify", DataType::Record)),
            v => Ok(v.to_string()),
        }
    }

    /// Decodes text produced by [`Value::stringify`] as a value of type `ty`.
    pub fn parse(input: &str, ty: &DataType) -> ValueResult<Value> {
        if input == NULL {
            return Ok(Value::null_of(ty));
        }
        match ty {
            DataType::Scalar(s) => parse_scalar(input, *s),
            DataType::Array(s) => {
                if input.is_empty() {
                    return Ok(Value::Array(ArrayValue::empty(*s)));
                }
                let elems = input
                    .split(',')
                    .map(|part| if part == NULL { Ok(Value::null_scalar(*s)) } else { parse_scalar(part, *s) })
                    .collect::<ValueResult<Vec<_>>>()?;
                Ok(Value::Array(ArrayValue::new(*s, elems)?))
            }
            DataType::Record | DataType::Null => Err(ValueError::parse(input, *ty)),
        }
    }
}

fn parse_scalar(input: &str, ty: ScalarType) -> ValueResult<Value> {
    let target = DataType::Scalar(ty);
    match ty {
        ScalarType::Blob => {
            let digits = input.strip_prefix("\\x").ok_or_else(|| ValueError::parse(input, target))?;
            hex::decode(digits)
                .map(Value::blob)
                .map_err(|_| ValueError::parse(input, target))
        }
        _ => Value::text(input).cast(&target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn round_trips() {
        let values = [
            Value::int(-12),
            Value::text("hello world"),
            Value::bool(false),
            Value::blob(vec![0, 1, 0xfe]),
            Value::uuid(Uuid::from_u128(99)),
            Value::text("1.50").cast(&"numeric(4,2)".parse().unwrap()).unwrap(),
            Value::Int(None),
            Value::Array(ArrayValue::from_values(vec![Value::int(1), Value::Int(None), Value::int(3)]).unwrap()),
            Value::Array(ArrayValue::from_values(vec![Value::blob(vec![1]), Value::blob(vec![2])]).unwrap()),
            Value::Array(ArrayValue::empty(ScalarType::Bool)),
        ];
        for v in values {
            let text = v.stringify().unwrap();
            assert_eq!(Value::parse(&text, &v.data_type()).unwrap(), v, "{text}");
        }
    }

    #[test]
    fn formats() {
        assert_eq!(Value::blob(vec![0xab]).stringify().unwrap(), "\\xab");
        assert_eq!(Value::Text(None).stringify().unwrap(), "NULL");
        let arr = ArrayValue::from_values(vec![Value::text("a"), Value::text("b")]).unwrap();
        assert_eq!(Value::Array(arr).stringify().unwrap(), "a,b");
        assert!(Value::Record(Default::default()).stringify().is_err());
    }
}
