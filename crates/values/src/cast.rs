use uuid::Uuid;

use crate::data_type::{DataType, ScalarType};
use crate::decimal::Decimal;
use crate::errors::{ValueError, ValueResult};
use crate::value::Value;

impl Value {
    /// Casts to `to`.
    ///
    /// Nulls of any type cast to a null of `to`. Arrays cast element-wise; casting between a
    /// scalar and an array is an error.
    pub fn cast(&self, to: &DataType) -> ValueResult<Value> {
        let from = self.data_type();
        let err = |reason: &str| ValueError::cast(from, *to, reason);

        match (self, to) {
            (_, DataType::Null) => Err(err("cannot cast to an untyped null")),
            (Value::Null, to) => Ok(Value::null_of(to)),
            (Value::Record(_), DataType::Record) => Ok(self.clone()),
            (Value::Record(_), _) | (_, DataType::Record) => Err(err("records cannot be cast")),
            (Value::Array(arr), DataType::Array(elem)) => Ok(Value::Array(arr.cast_elements(*elem)?)),
            (Value::Array(_), DataType::Scalar(_)) => Err(err("cannot cast an array to a scalar")),
            (_, DataType::Array(_)) => Err(err("cannot cast a scalar to an array")),
            (v, DataType::Scalar(s)) => v.cast_scalar(*s),
        }
    }

    fn cast_scalar(&self, to: ScalarType) -> ValueResult<Value> {
        let target = DataType::Scalar(to);
        let err = |reason: &str| ValueError::cast(self.data_type(), target, reason);

        if self.is_null() {
            return Ok(Value::null_scalar(to));
        }

        Ok(match (self, to) {
            (Value::Int(Some(v)), ScalarType::Int) => Value::int(*v),
            (Value::Int(Some(v)), ScalarType::Text) => Value::text(v.to_string()),
            (Value::Int(Some(v)), ScalarType::Bool) => Value::bool(*v != 0),
            (Value::Int(Some(v)), ScalarType::Decimal(meta)) => Value::Decimal(Decimal::from_i64(*v, meta)?),

            (Value::Text(Some(v)), ScalarType::Int) => Value::int(parse_int(v, target)?),
            (Value::Text(Some(v)), ScalarType::Text) => Value::text(v.clone()),
            (Value::Text(Some(v)), ScalarType::Bool) => Value::bool(parse_bool(v).ok_or_else(|| ValueError::parse(v, target))?),
            (Value::Text(Some(v)), ScalarType::Uuid) => {
                Value::uuid(Uuid::parse_str(v.trim()).map_err(|_| ValueError::parse(v, target))?)
            }
            (Value::Text(Some(v)), ScalarType::Blob) => Value::blob(v.as_bytes()),
            (Value::Text(Some(v)), ScalarType::Decimal(meta)) => Value::Decimal(Decimal::parse(v, meta)?),

            (Value::Bool(Some(v)), ScalarType::Int) => Value::int(*v as i64),
            (Value::Bool(Some(v)), ScalarType::Text) => Value::text(v.to_string()),
            (Value::Bool(Some(v)), ScalarType::Bool) => Value::bool(*v),

            (Value::Blob(Some(v)), ScalarType::Int) => {
                let text = std::str::from_utf8(v).map_err(|_| err("bytes are not valid utf-8"))?;
                Value::int(parse_int(text, target)?)
            }
            (Value::Blob(Some(v)), ScalarType::Text) => {
                Value::text(String::from_utf8(v.clone()).map_err(|_| err("bytes are not valid utf-8"))?)
            }
            (Value::Blob(Some(v)), ScalarType::Blob) => Value::blob(v.clone()),

            (Value::Uuid(Some(v)), ScalarType::Text) => Value::text(v.to_string()),
            (Value::Uuid(Some(v)), ScalarType::Blob) => Value::blob(v.as_bytes().to_vec()),
            (Value::Uuid(Some(v)), ScalarType::Uuid) => Value::uuid(*v),

            (Value::Decimal(d), ScalarType::Decimal(meta)) => Value::Decimal(d.with_meta(meta)?),
            (Value::Decimal(d), ScalarType::Int) => Value::Int(d.to_i64()?),
            (Value::Decimal(d), ScalarType::Text) => Value::Text(d.to_plain_string()),

            _ => return Err(err("unsupported cast")),
        })
    }
}

fn parse_int(s: &str, ty: DataType) -> ValueResult<i64> {
    s.trim().parse().map_err(|_| ValueError::parse(s, ty))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArrayValue;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn ty(s: &str) -> DataType {
        s.parse().unwrap()
    }

    #[test]
    fn matrix() {
        struct TestCase {
            value: Value,
            to: &'static str,
            want: Option<Value>,
        }

        let id = Uuid::from_u128(0x1234);
        for TestCase { value, to, want } in [
            TestCase { value: Value::int(5), to: "text", want: Some(Value::text("5")) },
            TestCase { value: Value::int(0), to: "bool", want: Some(Value::bool(false)) },
            TestCase { value: Value::int(-2), to: "bool", want: Some(Value::bool(true)) },
            TestCase { value: Value::int(1), to: "uuid", want: None },
            TestCase { value: Value::int(1), to: "bytea", want: None },
            TestCase { value: Value::text(" 42 "), to: "int", want: Some(Value::int(42)) },
            TestCase { value: Value::text("T"), to: "bool", want: Some(Value::bool(true)) },
            TestCase { value: Value::text("nope"), to: "bool", want: None },
            TestCase { value: Value::text("ab"), to: "bytea", want: Some(Value::blob(*b"ab")) },
            TestCase { value: Value::bool(true), to: "int", want: Some(Value::int(1)) },
            TestCase { value: Value::bool(true), to: "uuid", want: None },
            TestCase { value: Value::blob(*b"17"), to: "int", want: Some(Value::int(17)) },
            TestCase { value: Value::blob(vec![0xff]), to: "text", want: None },
            TestCase { value: Value::blob(*b"x"), to: "bool", want: None },
            TestCase { value: Value::uuid(id), to: "bytea", want: Some(Value::blob(id.as_bytes().to_vec())) },
            TestCase { value: Value::uuid(id), to: "int", want: None },
            TestCase { value: Value::Null, to: "int8[]", want: Some(Value::null_of(&ty("int8[]"))) },
            TestCase { value: Value::Int(None), to: "text", want: Some(Value::Text(None)) },
            TestCase { value: Value::int(1), to: "int[]", want: None },
        ] {
            let got = value.cast(&ty(to)).ok();
            assert_eq!(got, want, "{value} -> {to}");
        }
    }

    #[test]
    fn decimal_casts() {
        let d = Value::text("12.345").cast(&ty("numeric(5,2)")).unwrap();
        assert_eq!(d.to_string(), "12.35");
        assert_eq!(d.data_type(), ty("numeric(5,2)"));
        assert_eq!(d.cast(&ty("numeric(10,4)")).unwrap().to_string(), "12.3500");
        assert!(d.cast(&ty("numeric(3,2)")).is_err());
        assert!(d.cast(&ty("int")).is_err());
        assert_eq!(Value::int(7).cast(&ty("numeric(3,1)")).unwrap().to_string(), "7.0");
        assert_eq!(
            Value::int(7).cast(&ty("numeric(3,1)")).unwrap().cast(&ty("int")).unwrap(),
            Value::int(7)
        );
    }

    #[test]
    fn arrays_cast_element_wise() {
        let arr = ArrayValue::from_values(vec![Value::int(1), Value::Int(None)]).unwrap();
        let got = Value::Array(arr).cast(&ty("text[]")).unwrap();
        let want = ArrayValue::from_values(vec![Value::text("1"), Value::Text(None)]).unwrap();
        assert_eq!(got, Value::Array(want));
    }

    proptest! {
        #[test]
        fn int_text_round_trip(v in any::<i64>()) {
            let text = Value::int(v).cast(&DataType::TEXT).unwrap();
            prop_assert_eq!(text.cast(&DataType::INT).unwrap(), Value::int(v));
        }

        #[test]
        fn bool_text_round_trip(v in any::<bool>()) {
            let text = Value::bool(v).cast(&DataType::TEXT).unwrap();
            prop_assert_eq!(text.cast(&DataType::BOOL).unwrap(), Value::bool(v));
        }

        #[test]
        fn uuid_round_trips(v in any::<u128>()) {
            let id = Value::uuid(Uuid::from_u128(v));
            prop_assert_eq!(id.cast(&DataType::TEXT).unwrap().cast(&DataType::UUID).unwrap(), id.clone());
            prop_assert_eq!(id.cast(&DataType::BLOB).unwrap(), Value::blob(Uuid::from_u128(v).as_bytes().to_vec()));
        }

        #[test]
        fn decimal_text_round_trip(units in any::<i64>(), scale in 0u16..6) {
            let meta = crate::DecimalMeta::new(19 + scale, scale).unwrap();
            let to = DataType::Scalar(ScalarType::Decimal(Some(meta)));
            let v = Value::int(units).cast(&to).unwrap();
            prop_assert_eq!(v.cast(&DataType::TEXT).unwrap().cast(&to).unwrap(), v);
        }

        #[test]
        fn text_blob_round_trip(s in ".*") {
            let v = Value::text(s);
            prop_assert_eq!(v.cast(&DataType::BLOB).unwrap().cast(&DataType::TEXT).unwrap(), v);
        }
    }
}
