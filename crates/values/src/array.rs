use crate::data_type::{DataType, ScalarType};
use crate::errors::{ValueError, ValueResult};
use crate::value::Value;

/// The largest number of elements an array may grow to, as in Postgres.
pub const MAX_ARRAY_LEN: usize = 134_217_727;

/// A one-dimensional, 1-indexed array of scalars.
///
/// Every element is a scalar [`Value`] of type `elem`; individual elements may be null.
/// `elems == None` is a null array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayValue {
    elem: ScalarType,
    elems: Option<Vec<Value>>,
}

impl ArrayValue {
    /// Builds an array of `elem`, casting every value to it.
    pub fn new(elem: ScalarType, values: Vec<Value>) -> ValueResult<Self> {
        let target = DataType::Scalar(elem);
        let elems = values
            .into_iter()
            .map(|v| match v {
                Value::Array(_) => Err(ValueError::Dimensionality),
                Value::Record(_) => Err(ValueError::UnexpectedType {
                    expected: target,
                    found: DataType::Record,
                }),
                v => v.cast(&target),
            })
            .collect::<ValueResult<Vec<_>>>()?;
        Ok(Self {
            elem,
            elems: Some(elems),
        })
    }

    /// An empty, non-null array.
    pub fn empty(elem: ScalarType) -> Self {
        Self {
            elem,
            elems: Some(Vec::new()),
        }
    }

    pub fn null(elem: ScalarType) -> Self {
        Self { elem, elems: None }
    }

    /// Builds an array whose element type is that of the first non-null value.
    /// An array of only untyped nulls is `text[]`.
    pub fn from_values(values: Vec<Value>) -> ValueResult<Self> {
        if values.is_empty() {
            return Err(ValueError::EmptyArray);
        }
        let mut elem = None;
        for v in &values {
            match v {
                Value::Array(_) => return Err(ValueError::Dimensionality),
                Value::Record(_) => {
                    return Err(ValueError::UnexpectedType {
                        expected: DataType::TEXT,
                        found: DataType::Record,
                    });
                }
                Value::Null => {}
                v if elem.is_none() && !v.is_null() => elem = v.scalar_type(),
                _ => {}
            }
        }
        let elem = elem
            .or_else(|| values.iter().find_map(Value::scalar_type))
            .unwrap_or(ScalarType::Text);
        Self::new(elem, values)
    }

    pub fn elem_type(&self) -> ScalarType {
        self.elem
    }

    pub fn is_null(&self) -> bool {
        self.elems.is_none()
    }

    /// The elements, or an empty slice for a null array.
    pub fn elements(&self) -> &[Value] {
        self.elems.as_deref().unwrap_or_default()
    }

    pub fn into_elements(self) -> Vec<Value> {
        self.elems.unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.elements().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_index(index: i64) -> ValueResult<usize> {
        if index < 1 {
            return Err(ValueError::InvalidIndex(index));
        }
        usize::try_from(index - 1).map_err(|_| ValueError::InvalidIndex(index))
    }

    fn check_write_index(index: i64) -> ValueResult<usize> {
        let pos = Self::check_index(index)?;
        if pos >= MAX_ARRAY_LEN {
            return Err(ValueError::ArrayTooLarge {
                index,
                max: MAX_ARRAY_LEN,
            });
        }
        Ok(pos)
    }

    /// Reads the element at 1-based `index`. Reading from a null array yields a typed null.
    pub fn get(&self, index: i64) -> ValueResult<Value> {
        let pos = Self::check_index(index)?;
        let Some(elems) = &self.elems else {
            return Ok(Value::null_scalar(self.elem));
        };
        elems.get(pos).cloned().ok_or(ValueError::IndexOutOfBounds {
            index,
            len: elems.len(),
        })
    }

    /// Writes `value` at 1-based `index`, growing the array with typed nulls if needed.
    /// Indices past [`MAX_ARRAY_LEN`] are rejected.
    pub fn set(&mut self, index: i64, value: Value) -> ValueResult<()> {
        let pos = Self::check_write_index(index)?;
        let value = self.coerce(value)?;
        let fill = Value::null_scalar(self.elem);
        let elems = self.elems.get_or_insert_with(Vec::new);
        if pos >= elems.len() {
            elems.resize(pos + 1, fill);
        }
        elems[pos] = value;
        Ok(())
    }

    /// Returns elements `from..=to` (1-based, either bound optional).
    ///
    /// Bounds are clamped to the array, and an inverted range gives an empty array.
    pub fn slice(&self, from: Option<i64>, to: Option<i64>) -> ValueResult<ArrayValue> {
        let Some(elems) = &self.elems else {
            return Ok(self.clone());
        };
        let len = elems.len() as i64;
        let from = from.unwrap_or(1).max(1);
        let to = to.unwrap_or(len).min(len);
        if from > to {
            return Ok(Self::empty(self.elem));
        }
        Ok(Self {
            elem: self.elem,
            elems: Some(elems[(from - 1) as usize..to as usize].to_vec()),
        })
    }

    /// Assigns `values` to positions `from..=to`.
    ///
    /// `values` must have at least as many elements as the destination range; extra values
    /// are ignored. Positions past the end grow the array. A missing `to` means the last
    /// element, and a range ending before it starts is an error.
    pub fn set_slice(&mut self, from: Option<i64>, to: Option<i64>, values: &ArrayValue) -> ValueResult<()> {
        let from = from.unwrap_or(1);
        Self::check_write_index(from)?;
        let to = to.unwrap_or(self.len() as i64);
        if to < from {
            return Err(ValueError::InvertedSlice { from, to });
        }
        Self::check_write_index(to)?;
        let expected = (to - from + 1) as usize;
        if values.len() < expected {
            return Err(ValueError::SliceTooShort {
                expected,
                got: values.len(),
            });
        }
        for (offset, v) in values.elements().iter().take(expected).enumerate() {
            self.set(from + offset as i64, v.clone())?;
        }
        Ok(())
    }

    fn coerce(&self, value: Value) -> ValueResult<Value> {
        let target = DataType::Scalar(self.elem);
        let found = value.data_type();
        if !found.equals(&target) && !found.arithmetic_compatible(&target) {
            return Err(ValueError::UnexpectedType { expected: target, found });
        }
        value.cast(&target)
    }

    pub fn push(&mut self, value: Value) -> ValueResult<()> {
        let value = self.coerce(value)?;
        self.elems.get_or_insert_with(Vec::new).push(value);
        Ok(())
    }

    pub fn prepend(&mut self, value: Value) -> ValueResult<()> {
        let value = self.coerce(value)?;
        self.elems.get_or_insert_with(Vec::new).insert(0, value);
        Ok(())
    }

    /// Concatenates two arrays. A null side is treated as empty; two nulls give a null.
    pub fn concat(&self, other: &ArrayValue) -> ValueResult<ArrayValue> {
        if self.is_null() && other.is_null() {
            return Ok(self.clone());
        }
        let mut out = self.clone();
        for v in other.elements() {
            out.push(v.clone())?;
        }
        Ok(out)
    }

    /// Removes every element equal to `value`, nulls included when `value` is null.
    pub fn remove(&self, value: &Value) -> ValueResult<ArrayValue> {
        let Some(elems) = &self.elems else {
            return Ok(self.clone());
        };
        let mut kept = Vec::with_capacity(elems.len());
        for v in elems {
            if !v.compare(value, crate::CmpOp::Is)?.truthy().unwrap_or(false) {
                kept.push(v.clone());
            }
        }
        Ok(Self {
            elem: self.elem,
            elems: Some(kept),
        })
    }

    /// Casts every element, producing an array of `to`.
    pub fn cast_elements(&self, to: ScalarType) -> ValueResult<ArrayValue> {
        let target = DataType::Scalar(to);
        let elems = match &self.elems {
            None => None,
            Some(elems) => Some(elems.iter().map(|v| v.cast(&target)).collect::<ValueResult<_>>()?),
        };
        Ok(Self { elem: to, elems })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ints(vals: &[i64]) -> ArrayValue {
        ArrayValue::new(ScalarType::Int, vals.iter().copied().map(Value::int).collect()).unwrap()
    }

    #[test]
    fn indexing_is_one_based() {
        let arr = ints(&[10, 20, 30]);
        assert_eq!(arr.get(1), Ok(Value::int(10)));
        assert_eq!(arr.get(3), Ok(Value::int(30)));
        assert_eq!(arr.get(0), Err(ValueError::InvalidIndex(0)));
        assert_eq!(arr.get(-2), Err(ValueError::InvalidIndex(-2)));
        assert_eq!(arr.get(4), Err(ValueError::IndexOutOfBounds { index: 4, len: 3 }));
    }

    #[test]
    fn write_grows_with_nulls() {
        let mut arr = ints(&[1, 2, 3]);
        arr.set(2, Value::int(5)).unwrap();
        assert_eq!(arr, ints(&[1, 5, 3]));
        assert_eq!(arr.get(3), Ok(Value::int(3)));

        arr.set(6, Value::int(9)).unwrap();
        assert_eq!(arr.len(), 6);
        assert_eq!(arr.get(4), Ok(Value::Int(None)));
        assert_eq!(arr.get(5), Ok(Value::Int(None)));
        assert_eq!(arr.get(6), Ok(Value::int(9)));

        assert!(arr.set(0, Value::int(1)).is_err());
        assert!(arr.set(1, Value::text("x")).is_err());
    }

    #[test]
    fn slices() {
        struct TestCase {
            from: Option<i64>,
            to: Option<i64>,
            want: &'static [i64],
        }

        let arr = ints(&[1, 2, 3, 4, 5]);
        for TestCase { from, to, want } in [
            TestCase { from: Some(2), to: Some(3), want: &[2, 3] },
            TestCase { from: None, to: Some(2), want: &[1, 2] },
            TestCase { from: Some(4), to: None, want: &[4, 5] },
            TestCase { from: Some(-5), to: Some(2), want: &[1, 2] },
            TestCase { from: Some(3), to: Some(99), want: &[3, 4, 5] },
            TestCase { from: Some(4), to: Some(2), want: &[] },
        ] {
            assert_eq!(arr.slice(from, to).unwrap(), ints(want), "{from:?}:{to:?}");
        }
    }

    #[test]
    fn slice_assignment() {
        let mut arr = ints(&[1, 2, 3, 4]);
        arr.set_slice(Some(2), Some(3), &ints(&[8, 9, 10])).unwrap();
        assert_eq!(arr, ints(&[1, 8, 9, 4]));

        let err = arr.set_slice(Some(1), Some(3), &ints(&[7])).unwrap_err();
        assert_eq!(err, ValueError::SliceTooShort { expected: 3, got: 1 });

        let err = arr.set_slice(Some(6), None, &ints(&[7])).unwrap_err();
        assert_eq!(err, ValueError::InvertedSlice { from: 6, to: 4 });
        assert_eq!(
            arr.set_slice(Some(3), Some(2), &ints(&[7])),
            Err(ValueError::InvertedSlice { from: 3, to: 2 })
        );
        assert_eq!(arr, ints(&[1, 8, 9, 4]));
    }

    #[test]
    fn writes_past_the_maximum_length_are_rejected() {
        let mut arr = ints(&[1]);
        for index in [i64::MAX, MAX_ARRAY_LEN as i64 + 1] {
            assert_eq!(
                arr.set(index, Value::int(2)),
                Err(ValueError::ArrayTooLarge {
                    index,
                    max: MAX_ARRAY_LEN
                })
            );
        }
        assert!(matches!(
            arr.set_slice(Some(2), Some(i64::MAX), &ints(&[2])),
            Err(ValueError::ArrayTooLarge { .. })
        ));
        assert_eq!(arr, ints(&[1]));
    }

    #[test]
    fn constructor_infers_type() {
        let arr = ArrayValue::from_values(vec![Value::Null, Value::text("a")]).unwrap();
        assert_eq!(arr.elem_type(), ScalarType::Text);
        assert_eq!(arr.get(1), Ok(Value::Text(None)));

        let arr = ArrayValue::from_values(vec![Value::Null, Value::Null]).unwrap();
        assert_eq!(arr.elem_type(), ScalarType::Text);

        assert_eq!(ArrayValue::from_values(vec![]), Err(ValueError::EmptyArray));
        let nested = Value::Array(ints(&[1]));
        assert_eq!(ArrayValue::from_values(vec![nested]), Err(ValueError::Dimensionality));
    }

    #[test]
    fn remove_and_concat() {
        let arr = ArrayValue::from_values(vec![Value::int(1), Value::Int(None), Value::int(1), Value::int(2)]).unwrap();
        assert_eq!(arr.remove(&Value::int(1)).unwrap().len(), 2);
        assert_eq!(arr.remove(&Value::Int(None)).unwrap().len(), 3);
        assert_eq!(ints(&[1]).concat(&ints(&[2, 3])).unwrap(), ints(&[1, 2, 3]));
    }
}
