//! Built-in functions.
//!
//! Each function has a validator that checks argument types and returns the result
//! type, a native implementation, and a Postgres rendering. Procedural code calls
//! scalar functions through storage (see [`crate::executable`]); storage
//! implementations without a Postgres backend evaluate them with [`BuiltinFunction::evaluate`].

use std::collections::BTreeMap;

use base64::Engine as _;
use itertools::Itertools;
use once_cell::sync::Lazy;
use quill_values::{CmpOp, DataType, Decimal, ScalarType, UnaryOp, Value};
use smallvec::SmallVec;

use crate::errors::{ExecError, ExecResult, InvocationError, TypeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Returns one value per call.
    Scalar,
    /// Folds a column of values. Only valid inside SQL.
    Aggregate,
    /// Called for its effect. Returns nothing.
    Procedure,
}

type Validator = fn(&str, &[DataType]) -> ExecResult<DataType>;
type Evaluator = fn(&[Value], &DataType) -> ExecResult<Value>;

pub struct BuiltinFunction {
    pub name: &'static str,
    pub kind: FunctionKind,
    /// Whether a null argument makes the result null without evaluating.
    strict: bool,
    validate: Validator,
    evaluate: Evaluator,
    render: Option<fn(&[String]) -> String>,
}

impl std::fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinFunction")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl BuiltinFunction {
    fn scalar(name: &'static str, validate: Validator, evaluate: Evaluator) -> Self {
        Self {
            name,
            kind: FunctionKind::Scalar,
            strict: true,
            validate,
            evaluate,
            render: None,
        }
    }

    fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    fn kind(mut self, kind: FunctionKind) -> Self {
        self.kind = kind;
        self
    }

    fn rendered(mut self, render: fn(&[String]) -> String) -> Self {
        self.render = Some(render);
        self
    }

    /// Checks the argument types, returning the result type.
    ///
    /// An untyped null argument stands for an argument whose type is not known yet
    /// and matches any expected type.
    pub fn validate(&self, args: &[DataType]) -> ExecResult<DataType> {
        (self.validate)(self.name, args)
    }

    pub fn evaluate(&self, args: &[Value]) -> ExecResult<Value> {
        let types: SmallVec<[DataType; 4]> = args.iter().map(Value::data_type).collect();
        let ret = self.validate(&types)?;
        if self.kind == FunctionKind::Aggregate {
            return Err(TypeError::AggregateOutsideSql(self.name.to_owned()).into());
        }
        if self.strict && args.iter().any(Value::is_null) {
            return Ok(Value::null_of(&ret));
        }
        (self.evaluate)(args, &ret)
    }

    /// Folds one group of rows. `values` holds the argument of every row in the
    /// group; for `count(*)` each row contributes an untyped null.
    pub fn aggregate(&self, values: &[Value], star: bool) -> ExecResult<Value> {
        let non_null = values.iter().filter(|v| !v.is_null());
        match self.name {
            "count" if star => Ok(Value::int(values.len() as i64)),
            "count" => Ok(Value::int(non_null.count() as i64)),
            "sum" => {
                let mut total: Option<Value> = None;
                for v in non_null {
                    let v = v.cast(&DataType::NUMERIC)?;
                    total = Some(match total {
                        Some(t) => t.arithmetic(&v, quill_values::ArithOp::Add)?,
                        None => v,
                    });
                }
                Ok(total.unwrap_or(Value::Decimal(Decimal::null(None))))
            }
            "min" | "max" => {
                let op = if self.name == "min" { CmpOp::Lt } else { CmpOp::Gt };
                let mut best: Option<&Value> = None;
                for v in non_null {
                    best = match best {
                        Some(b) if !v.compare(b, op)?.truthy().unwrap_or(false) => Some(b),
                        _ => Some(v),
                    };
                }
                Ok(match best {
                    Some(v) => v.clone(),
                    None => values.first().map(|v| Value::null_of(&v.data_type())).unwrap_or(Value::Null),
                })
            }
            name => Err(ExecError::Internal(format!("`{name}` is not an aggregate"))),
        }
    }

    /// The Postgres text of a call with already rendered arguments.
    pub fn render_sql(&self, args: &[String]) -> String {
        match self.render {
            Some(render) => render(args),
            None => format!("{}({})", self.name, args.iter().join(", ")),
        }
    }
}

static BUILTINS: Lazy<BTreeMap<&'static str, BuiltinFunction>> = Lazy::new(|| {
    use BuiltinFunction as F;
    [
        F::scalar("abs", validate_abs, eval_abs),
        F::scalar("error", validate_text_procedure, eval_error).lenient().kind(FunctionKind::Procedure),
        F::scalar("notice", validate_text_procedure, |_, _| Ok(Value::Null))
            .lenient()
            .kind(FunctionKind::Procedure),
        F::scalar("encode", validate_encode, eval_encode),
        F::scalar("decode", validate_decode, eval_decode),
        F::scalar("array_append", validate_array_append, eval_array_append).lenient(),
        F::scalar("array_prepend", validate_array_prepend, eval_array_prepend).lenient(),
        F::scalar("array_cat", validate_array_cat, eval_array_cat).lenient(),
        F::scalar("array_length", validate_array_length, eval_array_length),
        F::scalar("array_remove", validate_array_append, eval_array_remove).lenient(),
        F::scalar("bit_length", validate_text_to_int, |a, _| Ok(Value::int(text(&a[0])?.len() as i64 * 8))),
        F::scalar("char_length", validate_text_to_int, eval_char_length),
        F::scalar("character_length", validate_text_to_int, eval_char_length),
        F::scalar("length", validate_text_to_int, eval_char_length),
        F::scalar("octet_length", validate_octet_length, eval_octet_length),
        F::scalar("lower", validate_text_to_text, |a, _| Ok(Value::text(text(&a[0])?.to_lowercase()))),
        F::scalar("upper", validate_text_to_text, |a, _| Ok(Value::text(text(&a[0])?.to_uppercase()))),
        F::scalar("reverse", validate_text_to_text, |a, _| {
            Ok(Value::text(text(&a[0])?.chars().rev().collect::<String>()))
        }),
        F::scalar("lpad", validate_pad, |a, _| eval_pad(a, true)),
        F::scalar("rpad", validate_pad, |a, _| eval_pad(a, false)),
        F::scalar("ltrim", validate_trim, |a, _| eval_trim(a, true, false)),
        F::scalar("rtrim", validate_trim, |a, _| eval_trim(a, false, true)),
        F::scalar("trim", validate_trim, |a, _| eval_trim(a, true, true)),
        F::scalar("position", validate_position, eval_position).rendered(|args| match args {
            [sub, s] => format!("position({sub} IN {s})"),
            _ => format!("position({})", args.iter().join(", ")),
        }),
        F::scalar("substring", validate_substring, eval_substring),
        F::scalar("left", validate_left_right, |a, _| eval_left_right(a, true)),
        F::scalar("right", validate_left_right, |a, _| eval_left_right(a, false)),
        F::scalar("replace", validate_replace, eval_replace),
        F::scalar("coalesce", validate_common_type, eval_coalesce).lenient(),
        F::scalar("nullif", validate_nullif, eval_nullif).lenient(),
        F::scalar("greatest", validate_common_type, |a, ret| eval_extreme(a, ret, CmpOp::Gt)).lenient(),
        F::scalar("least", validate_common_type, |a, ret| eval_extreme(a, ret, CmpOp::Lt)).lenient(),
        F::scalar("count", validate_count, no_eval).lenient().kind(FunctionKind::Aggregate),
        F::scalar("sum", validate_sum, no_eval).lenient().kind(FunctionKind::Aggregate),
        F::scalar("min", validate_min_max, no_eval).lenient().kind(FunctionKind::Aggregate),
        F::scalar("max", validate_min_max, no_eval).lenient().kind(FunctionKind::Aggregate),
    ]
    .into_iter()
    .map(|f| (f.name, f))
    .collect()
});

pub fn builtin(name: &str) -> Option<&'static BuiltinFunction> {
    BUILTINS.get(name)
}

pub fn builtins() -> impl Iterator<Item = &'static BuiltinFunction> {
    BUILTINS.values()
}

fn no_eval(_: &[Value], _: &DataType) -> ExecResult<Value> {
    Err(ExecError::Internal("aggregates are folded, not evaluated".into()))
}

// Validation helpers

fn arity(name: &str, args: &[DataType], min: usize, max: usize) -> ExecResult<()> {
    if args.len() < min || args.len() > max {
        return Err(InvocationError::ArgumentCount {
            name: name.to_owned(),
            expected: if args.len() < min { min } else { max },
            got: args.len(),
        }
        .into());
    }
    Ok(())
}

fn expect(name: &str, args: &[DataType], position: usize, expected: &DataType) -> ExecResult<()> {
    match args.get(position) {
        Some(found) if !found.equals(expected) => Err(InvocationError::ArgumentType {
            name: name.to_owned(),
            position: position + 1,
            expected: expected.to_string(),
            found: *found,
        }
        .into()),
        _ => Ok(()),
    }
}

fn expect_array(name: &str, args: &[DataType], position: usize) -> ExecResult<Option<ScalarType>> {
    match args.get(position) {
        Some(DataType::Array(elem)) => Ok(Some(*elem)),
        Some(DataType::Null) | None => Ok(None),
        Some(found) => Err(InvocationError::ArgumentType {
            name: name.to_owned(),
            position: position + 1,
            expected: "an array".into(),
            found: *found,
        }
        .into()),
    }
}

fn validate_abs(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 1, 1)?;
    match args[0] {
        DataType::Null | DataType::INT | DataType::Scalar(ScalarType::Decimal(_)) => Ok(args[0]),
        found => Err(InvocationError::ArgumentType {
            name: name.to_owned(),
            position: 1,
            expected: "int8 or numeric".into(),
            found,
        }
        .into()),
    }
}

fn validate_text_procedure(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 1, 1)?;
    expect(name, args, 0, &DataType::TEXT)?;
    Ok(DataType::Null)
}

fn validate_encode(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 2, 2)?;
    expect(name, args, 0, &DataType::BLOB)?;
    expect(name, args, 1, &DataType::TEXT)?;
    Ok(DataType::TEXT)
}

fn validate_decode(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 2, 2)?;
    expect(name, args, 0, &DataType::TEXT)?;
    expect(name, args, 1, &DataType::TEXT)?;
    Ok(DataType::BLOB)
}

fn validate_array_append(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 2, 2)?;
    match expect_array(name, args, 0)? {
        Some(elem) => {
            expect(name, args, 1, &DataType::Scalar(elem))?;
            Ok(DataType::Array(elem))
        }
        None => Ok(args[1].array_of().unwrap_or(DataType::Null)),
    }
}

fn validate_array_prepend(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 2, 2)?;
    match expect_array(name, args, 1)? {
        Some(elem) => {
            expect(name, args, 0, &DataType::Scalar(elem))?;
            Ok(DataType::Array(elem))
        }
        None => Ok(args[0].array_of().unwrap_or(DataType::Null)),
    }
}

fn validate_array_cat(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 2, 2)?;
    match (expect_array(name, args, 0)?, expect_array(name, args, 1)?) {
        (Some(elem), _) => {
            expect(name, args, 1, &DataType::Array(elem))?;
            Ok(DataType::Array(elem))
        }
        (None, Some(elem)) => Ok(DataType::Array(elem)),
        (None, None) => Ok(DataType::Null),
    }
}

fn validate_array_length(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 1, 1)?;
    expect_array(name, args, 0)?;
    Ok(DataType::INT)
}

fn validate_text_to_int(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 1, 1)?;
    expect(name, args, 0, &DataType::TEXT)?;
    Ok(DataType::INT)
}

fn validate_text_to_text(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 1, 1)?;
    expect(name, args, 0, &DataType::TEXT)?;
    Ok(DataType::TEXT)
}

fn validate_octet_length(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 1, 1)?;
    match args[0] {
        DataType::Null | DataType::TEXT | DataType::BLOB => Ok(DataType::INT),
        found => Err(InvocationError::ArgumentType {
            name: name.to_owned(),
            position: 1,
            expected: "text or bytea".into(),
            found,
        }
        .into()),
    }
}

fn validate_pad(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 2, 3)?;
    expect(name, args, 0, &DataType::TEXT)?;
    expect(name, args, 1, &DataType::INT)?;
    expect(name, args, 2, &DataType::TEXT)?;
    Ok(DataType::TEXT)
}

fn validate_trim(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 1, 2)?;
    expect(name, args, 0, &DataType::TEXT)?;
    expect(name, args, 1, &DataType::TEXT)?;
    Ok(DataType::TEXT)
}

fn validate_position(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 2, 2)?;
    expect(name, args, 0, &DataType::TEXT)?;
    expect(name, args, 1, &DataType::TEXT)?;
    Ok(DataType::INT)
}

fn validate_substring(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 2, 3)?;
    expect(name, args, 0, &DataType::TEXT)?;
    expect(name, args, 1, &DataType::INT)?;
    expect(name, args, 2, &DataType::INT)?;
    Ok(DataType::TEXT)
}

fn validate_left_right(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 2, 2)?;
    expect(name, args, 0, &DataType::TEXT)?;
    expect(name, args, 1, &DataType::INT)?;
    Ok(DataType::TEXT)
}

fn validate_replace(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 3, 3)?;
    for i in 0..3 {
        expect(name, args, i, &DataType::TEXT)?;
    }
    Ok(DataType::TEXT)
}

/// Every argument must share one type, which is the result type.
fn validate_common_type(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 1, usize::MAX)?;
    let common = args.iter().copied().find(|t| !t.is_null()).unwrap_or(DataType::Null);
    for i in 0..args.len() {
        expect(name, args, i, &common)?;
    }
    Ok(common)
}

fn validate_nullif(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 2, 2)?;
    expect(name, args, 1, &args[0])?;
    Ok(if args[0].is_null() { args[1] } else { args[0] })
}

fn validate_count(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 0, 1)?;
    Ok(DataType::INT)
}

fn validate_sum(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 1, 1)?;
    validate_abs(name, args)?;
    Ok(DataType::NUMERIC)
}

fn validate_min_max(name: &str, args: &[DataType]) -> ExecResult<DataType> {
    arity(name, args, 1, 1)?;
    Ok(args[0])
}

// Evaluation helpers. Arguments have been validated, so a wrong variant is an internal error.

fn text(v: &Value) -> ExecResult<&str> {
    match v {
        Value::Text(Some(s)) => Ok(s),
        other => Err(TypeError::mismatch(DataType::TEXT, other.data_type()).into()),
    }
}

fn int(v: &Value) -> ExecResult<i64> {
    match v {
        Value::Int(Some(i)) => Ok(*i),
        other => Err(TypeError::mismatch(DataType::INT, other.data_type()).into()),
    }
}

fn array_arg(v: &Value, ret: &DataType) -> ExecResult<quill_values::ArrayValue> {
    match (v, ret) {
        (Value::Array(a), _) => Ok(a.clone()),
        (Value::Null, DataType::Array(elem)) => Ok(quill_values::ArrayValue::null(*elem)),
        (other, _) => Err(TypeError::mismatch("an array", other.data_type()).into()),
    }
}

fn eval_abs(args: &[Value], _: &DataType) -> ExecResult<Value> {
    let v = &args[0];
    let zero = Value::int(0).cast(&v.data_type())?;
    if v.compare(&zero, CmpOp::Lt)?.truthy().unwrap_or(false) {
        Ok(v.unary(UnaryOp::Neg)?)
    } else {
        Ok(v.clone())
    }
}

fn eval_error(args: &[Value], _: &DataType) -> ExecResult<Value> {
    let msg = match &args[0] {
        Value::Text(Some(s)) => s.clone(),
        _ => String::new(),
    };
    Err(ExecError::User(msg))
}

fn eval_encode(args: &[Value], _: &DataType) -> ExecResult<Value> {
    let Value::Blob(Some(bytes)) = &args[0] else {
        return Err(TypeError::mismatch(DataType::BLOB, args[0].data_type()).into());
    };
    match text(&args[1])?.to_lowercase().as_str() {
        "hex" => Ok(Value::text(hex::encode(bytes))),
        "base64" => Ok(Value::text(base64::engine::general_purpose::STANDARD.encode(bytes))),
        other => Err(ExecError::User(format!("unrecognized encoding: \"{other}\""))),
    }
}

fn eval_decode(args: &[Value], _: &DataType) -> ExecResult<Value> {
    let input = text(&args[0])?;
    let bytes = match text(&args[1])?.to_lowercase().as_str() {
        "hex" => hex::decode(input).map_err(|e| ExecError::User(format!("invalid hex input: {e}")))?,
        "base64" => base64::engine::general_purpose::STANDARD
            .decode(input)
            .map_err(|e| ExecError::User(format!("invalid base64 input: {e}")))?,
        other => return Err(ExecError::User(format!("unrecognized encoding: \"{other}\""))),
    };
    Ok(Value::blob(bytes))
}

fn eval_array_append(args: &[Value], ret: &DataType) -> ExecResult<Value> {
    let mut arr = array_arg(&args[0], ret)?;
    arr.push(args[1].clone())?;
    Ok(Value::Array(arr))
}

fn eval_array_prepend(args: &[Value], ret: &DataType) -> ExecResult<Value> {
    let mut arr = array_arg(&args[1], ret)?;
    arr.prepend(args[0].clone())?;
    Ok(Value::Array(arr))
}

fn eval_array_cat(args: &[Value], ret: &DataType) -> ExecResult<Value> {
    if ret.is_null() {
        return Ok(Value::Null);
    }
    let left = array_arg(&args[0], ret)?;
    let right = array_arg(&args[1], ret)?;
    Ok(Value::Array(left.concat(&right)?))
}

fn eval_array_length(args: &[Value], _: &DataType) -> ExecResult<Value> {
    let Value::Array(arr) = &args[0] else {
        return Err(TypeError::mismatch("an array", args[0].data_type()).into());
    };
    Ok(match arr.len() {
        0 => Value::Int(None),
        n => Value::int(n as i64),
    })
}

fn eval_array_remove(args: &[Value], ret: &DataType) -> ExecResult<Value> {
    if ret.is_null() {
        return Ok(Value::Null);
    }
    Ok(Value::Array(array_arg(&args[0], ret)?.remove(&args[1])?))
}

fn eval_char_length(args: &[Value], _: &DataType) -> ExecResult<Value> {
    Ok(Value::int(text(&args[0])?.chars().count() as i64))
}

fn eval_octet_length(args: &[Value], _: &DataType) -> ExecResult<Value> {
    let len = match &args[0] {
        Value::Blob(Some(b)) => b.len(),
        other => text(other)?.len(),
    };
    Ok(Value::int(len as i64))
}

/// The longest string `lpad` and `rpad` will build, in characters.
const MAX_PAD_LEN: usize = 1 << 30;

fn eval_pad(args: &[Value], left: bool) -> ExecResult<Value> {
    let s: Vec<char> = text(&args[0])?.chars().collect();
    let len = usize::try_from(int(&args[1])?).unwrap_or(0);
    if len > MAX_PAD_LEN {
        return Err(ExecError::User("requested length too large".into()));
    }
    let fill: Vec<char> = match args.get(2) {
        Some(v) => text(v)?.chars().collect(),
        None => vec![' '],
    };
    if s.len() >= len || fill.is_empty() {
        return Ok(Value::text(s.iter().take(len).collect::<String>()));
    }
    let padding: String = fill.iter().cycle().take(len - s.len()).collect();
    let s: String = s.into_iter().collect();
    Ok(Value::text(if left { padding + &s } else { s + &padding }))
}

fn eval_trim(args: &[Value], start: bool, end: bool) -> ExecResult<Value> {
    let s = text(&args[0])?;
    let chars: Vec<char> = match args.get(1) {
        Some(v) => text(v)?.chars().collect(),
        None => vec![' '],
    };
    let mut out = s;
    if start {
        out = out.trim_start_matches(chars.as_slice());
    }
    if end {
        out = out.trim_end_matches(chars.as_slice());
    }
    Ok(Value::text(out))
}

fn eval_position(args: &[Value], _: &DataType) -> ExecResult<Value> {
    let sub = text(&args[0])?;
    let s = text(&args[1])?;
    let pos = match s.find(sub) {
        Some(byte) => s[..byte].chars().count() as i64 + 1,
        None => 0,
    };
    Ok(Value::int(pos))
}

fn eval_substring(args: &[Value], _: &DataType) -> ExecResult<Value> {
    let s = text(&args[0])?;
    let from = int(&args[1])?;
    let end = match args.get(2) {
        Some(count) => {
            let count = int(count)?;
            if count < 0 {
                return Err(ExecError::User("negative substring length not allowed".into()));
            }
            Some(from.saturating_add(count))
        }
        None => None,
    };
    let out: String = s
        .chars()
        .enumerate()
        .filter(|(i, _)| {
            let pos = *i as i64 + 1;
            pos >= from && end.is_none_or(|end| pos < end)
        })
        .map(|(_, c)| c)
        .collect();
    Ok(Value::text(out))
}

fn eval_left_right(args: &[Value], left: bool) -> ExecResult<Value> {
    let chars: Vec<char> = text(&args[0])?.chars().collect();
    let n = int(&args[1])?;
    let len = chars.len() as i64;
    let keep = (if n >= 0 { n.min(len) } else { (len + n).max(0) }) as usize;
    let out: String = if left {
        chars[..keep].iter().collect()
    } else {
        chars[chars.len() - keep..].iter().collect()
    };
    Ok(Value::text(out))
}

fn eval_replace(args: &[Value], _: &DataType) -> ExecResult<Value> {
    let (s, from, to) = (text(&args[0])?, text(&args[1])?, text(&args[2])?);
    if from.is_empty() {
        return Ok(Value::text(s));
    }
    Ok(Value::text(s.replace(from, to)))
}

fn eval_coalesce(args: &[Value], ret: &DataType) -> ExecResult<Value> {
    match args.iter().find(|v| !v.is_null()) {
        Some(v) if ret.is_null() => Ok(v.clone()),
        Some(v) => Ok(v.cast(ret)?),
        None => Ok(Value::null_of(ret)),
    }
}

fn eval_nullif(args: &[Value], ret: &DataType) -> ExecResult<Value> {
    if args[0].compare(&args[1], CmpOp::Eq)?.truthy().unwrap_or(false) {
        return Ok(Value::null_of(ret));
    }
    Ok(args[0].clone())
}

fn eval_extreme(args: &[Value], ret: &DataType, op: CmpOp) -> ExecResult<Value> {
    let mut best: Option<&Value> = None;
    for v in args.iter().filter(|v| !v.is_null()) {
        best = match best {
            Some(b) if !v.compare(b, op)?.truthy().unwrap_or(false) => Some(b),
            _ => Some(v),
        };
    }
    match best {
        Some(v) => Ok(v.clone()),
        None => Ok(Value::null_of(ret)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quill_values::ArrayValue;

    fn call(name: &str, args: Vec<Value>) -> ExecResult<Value> {
        builtin(name).unwrap().evaluate(&args)
    }

    fn ints(vals: &[i64]) -> Value {
        Value::Array(ArrayValue::new(ScalarType::Int, vals.iter().copied().map(Value::int).collect()).unwrap())
    }

    #[test]
    fn scalar_functions() {
        struct TestCase {
            name: &'static str,
            args: Vec<Value>,
            want: Value,
        }

        for TestCase { name, args, want } in [
            TestCase {
                name: "abs",
                args: vec![Value::int(-5)],
                want: Value::int(5),
            },
            TestCase {
                name: "abs",
                args: vec![Value::Int(None)],
                want: Value::Int(None),
            },
            TestCase {
                name: "length",
                args: vec![Value::text("héllo")],
                want: Value::int(5),
            },
            TestCase {
                name: "octet_length",
                args: vec![Value::text("héllo")],
                want: Value::int(6),
            },
            TestCase {
                name: "bit_length",
                args: vec![Value::text("ab")],
                want: Value::int(16),
            },
            TestCase {
                name: "upper",
                args: vec![Value::text("abc")],
                want: Value::text("ABC"),
            },
            TestCase {
                name: "lpad",
                args: vec![Value::text("hi"), Value::int(5), Value::text("xy")],
                want: Value::text("xyxhi"),
            },
            TestCase {
                name: "rpad",
                args: vec![Value::text("hello"), Value::int(3)],
                want: Value::text("hel"),
            },
            TestCase {
                name: "trim",
                args: vec![Value::text("xxhixx"), Value::text("x")],
                want: Value::text("hi"),
            },
            TestCase {
                name: "ltrim",
                args: vec![Value::text("  hi  ")],
                want: Value::text("hi  "),
            },
            TestCase {
                name: "position",
                args: vec![Value::text("lo"), Value::text("hello")],
                want: Value::int(4),
            },
            TestCase {
                name: "position",
                args: vec![Value::text("z"), Value::text("hello")],
                want: Value::int(0),
            },
            TestCase {
                name: "substring",
                args: vec![Value::text("hello"), Value::int(2), Value::int(3)],
                want: Value::text("ell"),
            },
            TestCase {
                name: "substring",
                args: vec![Value::text("hello"), Value::int(0), Value::int(3)],
                want: Value::text("he"),
            },
            TestCase {
                name: "left",
                args: vec![Value::text("hello"), Value::int(-2)],
                want: Value::text("hel"),
            },
            TestCase {
                name: "right",
                args: vec![Value::text("hello"), Value::int(2)],
                want: Value::text("lo"),
            },
            TestCase {
                name: "replace",
                args: vec![Value::text("a-b-c"), Value::text("-"), Value::text("+")],
                want: Value::text("a+b+c"),
            },
            TestCase {
                name: "reverse",
                args: vec![Value::text("abc")],
                want: Value::text("cba"),
            },
            TestCase {
                name: "encode",
                args: vec![Value::blob(vec![0xde, 0xad]), Value::text("hex")],
                want: Value::text("dead"),
            },
            TestCase {
                name: "decode",
                args: vec![Value::text("aGk="), Value::text("base64")],
                want: Value::blob(b"hi".to_vec()),
            },
            TestCase {
                name: "coalesce",
                args: vec![Value::Int(None), Value::int(2), Value::int(3)],
                want: Value::int(2),
            },
            TestCase {
                name: "nullif",
                args: vec![Value::int(1), Value::int(1)],
                want: Value::Int(None),
            },
            TestCase {
                name: "greatest",
                args: vec![Value::int(1), Value::Int(None), Value::int(7)],
                want: Value::int(7),
            },
            TestCase {
                name: "least",
                args: vec![Value::text("b"), Value::text("a")],
                want: Value::text("a"),
            },
            TestCase {
                name: "array_append",
                args: vec![ints(&[1, 2]), Value::int(3)],
                want: ints(&[1, 2, 3]),
            },
            TestCase {
                name: "array_prepend",
                args: vec![Value::int(0), ints(&[1])],
                want: ints(&[0, 1]),
            },
            TestCase {
                name: "array_cat",
                args: vec![ints(&[1]), ints(&[2, 3])],
                want: ints(&[1, 2, 3]),
            },
            TestCase {
                name: "array_remove",
                args: vec![ints(&[1, 2, 1]), Value::int(1)],
                want: ints(&[2]),
            },
            TestCase {
                name: "array_length",
                args: vec![ints(&[])],
                want: Value::Int(None),
            },
        ] {
            assert_eq!(call(name, args).unwrap(), want, "{name}");
        }
    }

    #[test]
    fn padding_is_bounded() {
        for name in ["lpad", "rpad"] {
            let err = call(name, vec![Value::text("a"), Value::int(1 << 62)]).unwrap_err();
            assert_eq!(err.to_string(), "requested length too large", "{name}");
        }
        let max = MAX_PAD_LEN as i64;
        assert!(call("lpad", vec![Value::text("a"), Value::int(max + 1), Value::text("")]).is_err());
        assert_eq!(
            call("rpad", vec![Value::text("a"), Value::int(-3)]).unwrap(),
            Value::text("")
        );
    }

    #[test]
    fn validation() {
        let abs = builtin("abs").unwrap();
        assert_eq!(abs.validate(&[DataType::INT]).unwrap(), DataType::INT);
        assert_eq!(
            abs.validate(&[DataType::TEXT]).unwrap_err().to_string(),
            "argument 1 of `abs` must be int8 or numeric, got text"
        );
        assert_eq!(
            builtin("lpad").unwrap().validate(&[DataType::TEXT]).unwrap_err().to_string(),
            "`lpad` expects 2 arguments, got 1"
        );
        assert_eq!(
            builtin("coalesce")
                .unwrap()
                .validate(&[DataType::Null, DataType::TEXT, DataType::INT])
                .unwrap_err()
                .to_string(),
            "argument 3 of `coalesce` must be text, got int8"
        );
        assert_eq!(
            builtin("array_append").unwrap().validate(&[DataType::Null, DataType::INT]).unwrap(),
            DataType::Array(ScalarType::Int)
        );
    }

    #[test]
    fn error_is_a_user_error() {
        let err = call("error", vec![Value::text("nope")]).unwrap_err();
        assert!(err.is_user_error());
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn aggregates() {
        let count = builtin("count").unwrap();
        let values = [Value::int(1), Value::Int(None), Value::int(3)];
        assert_eq!(count.aggregate(&values, false).unwrap(), Value::int(2));
        assert_eq!(count.aggregate(&values, true).unwrap(), Value::int(3));
        assert_eq!(
            builtin("max").unwrap().aggregate(&values, false).unwrap(),
            Value::int(3)
        );
        assert_eq!(
            builtin("sum").unwrap().aggregate(&values, false).unwrap(),
            Value::Decimal(Decimal::parse("4", None).unwrap())
        );
        assert!(matches!(
            count.evaluate(&[Value::int(1)]),
            Err(ExecError::Type(TypeError::AggregateOutsideSql(_)))
        ));
    }

    #[test]
    fn position_renders_with_in() {
        let position = builtin("position").unwrap();
        assert_eq!(position.render_sql(&["$1".into(), "$2".into()]), "position($1 IN $2)");
        assert_eq!(builtin("lower").unwrap().render_sql(&["$1".into()]), "lower($1)");
    }
}
