use std::cmp::Ordering;
use std::str::FromStr;

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};

use crate::data_type::{DataType, DecimalMeta, MAX_PRECISION, ScalarType};
use crate::errors::{ValueError, ValueResult};
use crate::ops::ArithOp;

/// Exponents above this are rejected instead of being computed.
const MAX_EXPONENT: i64 = 1000;

/// A possibly-null `numeric` with optional declared precision and scale.
///
/// When `meta` is set, `value` always fits it: it has been rounded half-up to `meta.scale`
/// and its integral part has at most `precision - scale` digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal {
    value: Option<BigDecimal>,
    meta: Option<DecimalMeta>,
}

impl Decimal {
    pub fn new(value: BigDecimal, meta: Option<DecimalMeta>) -> ValueResult<Self> {
        let value = fit(value, meta)?;
        Ok(Self {
            value: Some(value),
            meta,
        })
    }

    pub fn null(meta: Option<DecimalMeta>) -> Self {
        Self { value: None, meta }
    }

    /// Parses `input` into a decimal that fits `meta`.
    pub fn parse(input: &str, meta: Option<DecimalMeta>) -> ValueResult<Self> {
        let value = BigDecimal::from_str(input.trim())
            .map_err(|_| ValueError::parse(input, DataType::Scalar(ScalarType::Decimal(meta))))?;
        Self::new(value, meta)
    }

    /// Parses a literal, deriving precision and scale from its digits.
    pub fn parse_literal(input: &str) -> ValueResult<Self> {
        let value = BigDecimal::from_str(input.trim()).map_err(|_| ValueError::parse(input, DataType::NUMERIC))?;
        let meta = infer_meta(&value)?;
        Ok(Self {
            value: Some(value),
            meta: Some(meta),
        })
    }

    pub fn from_i64(value: i64, meta: Option<DecimalMeta>) -> ValueResult<Self> {
        Self::new(BigDecimal::from(value), meta)
    }

    pub fn value(&self) -> Option<&BigDecimal> {
        self.value.as_ref()
    }

    pub fn meta(&self) -> Option<DecimalMeta> {
        self.meta
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    pub fn data_type(&self) -> DataType {
        DataType::Scalar(ScalarType::Decimal(self.meta))
    }

    /// Re-fits the value to new metadata. Only explicit casts should call this.
    pub fn with_meta(&self, meta: Option<DecimalMeta>) -> ValueResult<Self> {
        match &self.value {
            None => Ok(Self::null(meta)),
            Some(v) => Self::new(v.clone(), meta),
        }
    }

    /// Computes `self op other`. The result keeps the metadata of `self`.
    pub fn arithmetic(&self, other: &Decimal, op: ArithOp) -> ValueResult<Self> {
        let (Some(a), Some(b)) = (&self.value, &other.value) else {
            return Ok(Self::null(self.meta));
        };

        let result = match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => {
                if b.is_zero() {
                    return Err(ValueError::DivideByZero);
                }
                a / b
            }
            ArithOp::Mod => {
                if b.is_zero() {
                    return Err(ValueError::ModuloByZero);
                }
                a.clone() % b.clone()
            }
            ArithOp::Exp => pow(a, b)?,
            ArithOp::Concat => return Err(ValueError::unsupported(op, self.data_type())),
        };

        let value = fit(result, self.meta).map_err(|_| ValueError::Overflow {
            op: op.to_string(),
            ty: self.data_type(),
        })?;
        Ok(Self {
            value: Some(value),
            meta: self.meta,
        })
    }

    pub fn neg(&self) -> Self {
        Self {
            value: self.value.as_ref().map(|v| -v.clone()),
            meta: self.meta,
        }
    }

    /// Numeric ordering; both sides must be non-null.
    pub fn cmp_value(&self, other: &Decimal) -> Option<Ordering> {
        Some(self.value.as_ref()?.cmp(other.value.as_ref()?))
    }

    /// Converts to an integer; the value must have no fractional part.
    pub fn to_i64(&self) -> ValueResult<Option<i64>> {
        let Some(v) = &self.value else {
            return Ok(None);
        };
        if !is_integral(v) {
            return Err(ValueError::cast(self.data_type(), DataType::INT, "value has a fractional part"));
        }
        v.to_i64()
            .map(Some)
            .ok_or_else(|| ValueError::cast(self.data_type(), DataType::INT, "value is out of range"))
    }

    pub fn is_zero(&self) -> bool {
        self.value.as_ref().is_some_and(|v| v.is_zero())
    }

    /// Plain notation, never scientific, keeping trailing zeros of the scale.
    pub fn to_plain_string(&self) -> Option<String> {
        self.value.as_ref().map(format_plain)
    }
}

fn is_integral(v: &BigDecimal) -> bool {
    v.with_scale(0) == *v
}

fn pow(base: &BigDecimal, exp: &BigDecimal) -> ValueResult<BigDecimal> {
    if !is_integral(exp) || exp < &BigDecimal::zero() {
        return Err(ValueError::InvalidExponent(format_plain(exp)));
    }
    let n = exp
        .to_i64()
        .filter(|n| *n <= MAX_EXPONENT)
        .ok_or_else(|| ValueError::InvalidExponent(format_plain(exp)))?;
    let mut acc = BigDecimal::from(1);
    for _ in 0..n {
        acc = &acc * base;
    }
    Ok(acc)
}

/// Number of digits left of the decimal point, ignoring sign. Zero has none.
fn integral_digits(v: &BigDecimal) -> u64 {
    let (int, _) = v.abs().with_scale(0).as_bigint_and_exponent();
    if int == BigInt::zero() {
        0
    } else {
        int.to_string().len() as u64
    }
}

fn fit(value: BigDecimal, meta: Option<DecimalMeta>) -> ValueResult<BigDecimal> {
    let Some(meta) = meta else {
        return Ok(value);
    };
    let rounded = value.with_scale_round(meta.scale as i64, RoundingMode::HalfUp);
    if integral_digits(&rounded) > meta.integral_digits() as u64 {
        return Err(ValueError::DecimalOutOfRange {
            value: format_plain(&value),
            ty: DataType::Scalar(ScalarType::Decimal(Some(meta))),
        });
    }
    Ok(rounded)
}

fn infer_meta(v: &BigDecimal) -> ValueResult<DecimalMeta> {
    let (_, exponent) = v.as_bigint_and_exponent();
    let scale = exponent.max(0) as u64;
    let precision = (integral_digits(v) + scale).max(1);
    if precision > MAX_PRECISION as u64 {
        return Err(ValueError::DecimalOutOfRange {
            value: format_plain(v),
            ty: DataType::NUMERIC,
        });
    }
    DecimalMeta::new(precision as u16, scale as u16)
}

fn format_plain(v: &BigDecimal) -> String {
    let (int, scale) = v.as_bigint_and_exponent();
    let negative = int < BigInt::zero();
    let digits = int.magnitude().to_string();
    let body = if scale <= 0 {
        if int == BigInt::zero() {
            "0".to_owned()
        } else {
            format!("{digits}{}", "0".repeat((-scale) as usize))
        }
    } else {
        let scale = scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{digits}", "0".repeat(scale + 1 - digits.len()))
        } else {
            digits
        };
        let (whole, frac) = padded.split_at(padded.len() - scale);
        format!("{whole}.{frac}")
    };
    if negative { format!("-{body}") } else { body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dec(s: &str, p: u16, sc: u16) -> Decimal {
        Decimal::parse(s, Some(DecimalMeta::new(p, sc).unwrap())).unwrap()
    }

    #[test]
    fn fits_scale_half_up() {
        assert_eq!(dec("1.005", 5, 2).to_plain_string().unwrap(), "1.01");
        assert_eq!(dec("-1.005", 5, 2).to_plain_string().unwrap(), "-1.01");
        assert_eq!(dec("7", 5, 2).to_plain_string().unwrap(), "7.00");
        assert_eq!(dec("0.5", 1, 1).to_plain_string().unwrap(), "0.5");
    }

    #[test]
    fn rejects_values_out_of_range() {
        let meta = Some(DecimalMeta::new(4, 2).unwrap());
        assert!(Decimal::parse("123.4", meta).is_err());
        assert!(Decimal::parse("99.994", meta).is_ok());
        assert!(Decimal::parse("99.995", meta).is_err());
    }

    #[test]
    fn arithmetic_keeps_left_meta() {
        let a = dec("10.25", 10, 2);
        let b = dec("3.1", 5, 1);
        let sum = a.arithmetic(&b, ArithOp::Add).unwrap();
        assert_eq!(sum.meta(), a.meta());
        assert_eq!(sum.to_plain_string().unwrap(), "13.35");

        let quot = a.arithmetic(&b, ArithOp::Div).unwrap();
        assert_eq!(quot.to_plain_string().unwrap(), "3.31");

        let pow = dec("1.5", 10, 2).arithmetic(&dec("2", 5, 0), ArithOp::Exp).unwrap();
        assert_eq!(pow.to_plain_string().unwrap(), "2.25");
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let a = dec("1", 5, 2);
        let zero = dec("0", 5, 2);
        assert_eq!(a.arithmetic(&zero, ArithOp::Div), Err(ValueError::DivideByZero));
        assert_eq!(a.arithmetic(&zero, ArithOp::Mod), Err(ValueError::ModuloByZero));
    }

    #[test]
    fn bad_exponents() {
        let a = dec("2", 5, 2);
        assert!(a.arithmetic(&dec("0.5", 5, 2), ArithOp::Exp).is_err());
        assert!(a.arithmetic(&dec("-1", 5, 0), ArithOp::Exp).is_err());
    }

    #[test]
    fn literal_meta() {
        let d = Decimal::parse_literal("123.450").unwrap();
        assert_eq!(d.meta(), Some(DecimalMeta::new(6, 3).unwrap()));
        let d = Decimal::parse_literal("0.01").unwrap();
        assert_eq!(d.meta(), Some(DecimalMeta::new(2, 2).unwrap()));
    }

    #[test]
    fn integral_conversion() {
        assert_eq!(dec("42.00", 5, 2).to_i64().unwrap(), Some(42));
        assert!(dec("42.50", 5, 2).to_i64().is_err());
        assert_eq!(Decimal::null(None).to_i64().unwrap(), None);
    }
}
