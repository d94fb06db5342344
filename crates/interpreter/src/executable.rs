//! The callables of a namespace: built-in functions, actions and extension methods.

use std::fmt;
use std::sync::Arc;

use quill_ast::ddl::ActionReturn;
use quill_ast::sql::Select;
use quill_ast::{CreateAction, Expr, FunctionCall, SqlStatement};
use quill_values::{DataType, RecordValue, Value};
use smallvec::SmallVec;

use crate::db::{Row, UNNAMED_COLUMN};
use crate::errors::{ExecError, ExecResult, InvocationError, TypeError};
use crate::exec::{ExecCtx, Flow, Sink, StmtFn, run_body};
use crate::extension::ExtensionMethod;
use crate::functions::{BuiltinFunction, FunctionKind};

/// The static type of an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    /// Only known at run time, such as the result of a late-bound call.
    Any,
    Known(DataType),
    /// A row. `None` when the fields are only known at run time, as for rows of a
    /// SELECT.
    Record(Option<Arc<Vec<(String, Ty)>>>),
}

impl Ty {
    /// The type to validate against. Unknown types are passed as the untyped null,
    /// which matches everything.
    pub fn as_data_type(&self) -> DataType {
        match self {
            Self::Any => DataType::Null,
            Self::Known(ty) => *ty,
            Self::Record(_) => DataType::Record,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Known(ty) => write!(f, "{ty}"),
            Self::Record(_) => f.write_str("record"),
        }
    }
}

/// What an executable returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnShape {
    None,
    /// Exactly one row
    Scalar(Vec<(String, Ty)>),
    /// Any number of rows
    Table(Vec<(String, Ty)>),
}

impl ReturnShape {
    pub(crate) fn declared(returns: &Option<ActionReturn>) -> Self {
        let Some(returns) = returns else {
            return Self::None;
        };
        let fields = returns
            .fields
            .iter()
            .map(|f| (f.name.clone(), Ty::Known(f.ty)))
            .collect();
        if returns.is_table {
            Self::Table(fields)
        } else {
            Self::Scalar(fields)
        }
    }

    pub fn fields(&self) -> &[(String, Ty)] {
        match self {
            Self::None => &[],
            Self::Scalar(fields) | Self::Table(fields) => fields,
        }
    }
}

/// A planned action.
pub struct Action {
    pub namespace: String,
    pub definition: CreateAction,
    pub(crate) body: Vec<StmtFn>,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("namespace", &self.namespace)
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Executable {
    Builtin(&'static BuiltinFunction),
    Action(Arc<Action>),
    Method {
        namespace: String,
        method: Arc<ExtensionMethod>,
    },
}

impl Executable {
    pub fn name(&self) -> &str {
        match self {
            Self::Builtin(f) => f.name,
            Self::Action(a) => &a.definition.name,
            Self::Method { method, .. } => &method.name,
        }
    }

    /// What kind of executable this is, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Builtin(_) => "function",
            Self::Action(_) => "action",
            Self::Method { .. } => "method",
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::Builtin(_))
    }

    fn params(&self) -> Option<SmallVec<[DataType; 4]>> {
        match self {
            Self::Builtin(_) => None,
            Self::Action(a) => Some(a.definition.params.iter().map(|p| p.ty).collect()),
            Self::Method { method, .. } => Some(method.params.iter().copied().collect()),
        }
    }

    /// Checks a call with arguments of the given types, returning what it produces.
    pub fn validate(&self, args: &[Ty]) -> ExecResult<ReturnShape> {
        match self {
            Self::Builtin(f) => {
                if f.kind == FunctionKind::Aggregate {
                    return Err(TypeError::AggregateOutsideSql(f.name.to_owned()).into());
                }
                let types: SmallVec<[DataType; 4]> = args.iter().map(Ty::as_data_type).collect();
                let ret = f.validate(&types)?;
                if f.kind == FunctionKind::Procedure {
                    return Ok(ReturnShape::None);
                }
                let ty = if ret.is_null() && args.iter().any(|a| !a.is_known()) {
                    Ty::Any
                } else {
                    Ty::Known(ret)
                };
                Ok(ReturnShape::Scalar(vec![(f.name.to_owned(), ty)]))
            }
            Self::Action(a) => {
                let params: SmallVec<[DataType; 4]> = a.definition.params.iter().map(|p| p.ty).collect();
                validate_signature(&a.definition.name, &params, &a.definition.returns, args)
            }
            Self::Method { method, .. } => validate_signature(&method.name, &method.params, &method.returns, args),
        }
    }

    /// Brings arguments to the declared parameter types.
    ///
    /// Nulls and empty arrays take the declared type, and decimals are fitted to the
    /// declared precision. Anything else must already have the declared type.
    pub fn coerce_args(&self, args: Vec<Value>) -> ExecResult<Vec<Value>> {
        let Some(params) = self.params() else {
            return Ok(args);
        };
        if params.len() != args.len() {
            return Err(InvocationError::ArgumentCount {
                name: self.name().to_owned(),
                expected: params.len(),
                got: args.len(),
            }
            .into());
        }
        args.into_iter()
            .zip(params.iter())
            .enumerate()
            .map(|(i, (arg, param))| {
                soft_cast(&arg, param).ok_or_else(|| {
                    InvocationError::ArgumentType {
                        name: self.name().to_owned(),
                        position: i + 1,
                        expected: param.to_string(),
                        found: arg.data_type(),
                    }
                    .into()
                })
            })
            .collect()
    }

    /// Runs the executable, passing every row it returns to `sink`.
    pub fn call(&self, ctx: &mut ExecCtx<'_>, args: Vec<Value>, sink: Sink<'_>) -> ExecResult<()> {
        match self {
            Self::Builtin(f) => call_builtin(f, ctx, args, sink),
            Self::Action(action) => call_action(action, ctx, args, sink),
            Self::Method { namespace, method } => {
                ctx.check_can_execute(namespace, &method.name, &method.modifiers)?;
                let args = self.coerce_args(args)?;
                let shape = ReturnShape::declared(&method.returns);
                let name = method.name.clone();
                let handler = method.handler.clone();
                ctx.call_frame(namespace, |ctx| {
                    let mut emit = |row: Row| sink(shape_row(&name, &shape, row)?);
                    handler(ctx, &args, &mut emit)
                })
            }
        }
    }
}

/// Checks arguments of the given types against declared parameters, returning the
/// declared return shape.
pub(crate) fn validate_signature(
    name: &str,
    params: &[DataType],
    returns: &Option<ActionReturn>,
    args: &[Ty],
) -> ExecResult<ReturnShape> {
    if params.len() != args.len() {
        return Err(InvocationError::ArgumentCount {
            name: name.to_owned(),
            expected: params.len(),
            got: args.len(),
        }
        .into());
    }
    for (i, (param, arg)) in params.iter().zip(args).enumerate() {
        let found = arg.as_data_type();
        if !found.equals(param) && !soft_castable(&found, param) {
            return Err(InvocationError::ArgumentType {
                name: name.to_owned(),
                position: i + 1,
                expected: param.to_string(),
                found,
            }
            .into());
        }
    }
    Ok(ReturnShape::declared(returns))
}

pub(crate) fn soft_castable(from: &DataType, to: &DataType) -> bool {
    match (from, to) {
        (DataType::Scalar(a), DataType::Scalar(b)) | (DataType::Array(a), DataType::Array(b)) => a.same_kind(b),
        _ => false,
    }
}

/// Casts `value` to `ty` if it is null, an empty array, or a decimal of other
/// precision. `None` if the types do not match otherwise.
pub(crate) fn soft_cast(value: &Value, ty: &DataType) -> Option<Value> {
    let found = value.data_type();
    if found.equals_strict(ty) {
        return Some(value.clone());
    }
    let castable = value.is_null()
        || soft_castable(&found, ty)
        || matches!((value, ty), (Value::Array(a), DataType::Array(_)) if a.is_empty());
    if castable { value.cast(ty).ok() } else { None }
}

/// Names the columns of `row` after the declared return fields and checks it fits them.
pub(crate) fn shape_row(name: &str, shape: &ReturnShape, mut row: Row) -> ExecResult<Row> {
    let fields = shape.fields();
    let mismatch = |reason: String| -> ExecError {
        InvocationError::ReturnShape {
            name: name.to_owned(),
            reason,
        }
        .into()
    };
    if matches!(shape, ReturnShape::None) {
        return Err(mismatch("it does not declare a return type but returned a row".into()));
    }
    if row.values.len() != fields.len() {
        return Err(mismatch(format!(
            "declared {} return values, returned {}",
            fields.len(),
            row.values.len()
        )));
    }
    for (i, ((field, ty), value)) in fields.iter().zip(row.values.iter_mut()).enumerate() {
        if let Ty::Known(ty) = ty {
            *value = soft_cast(value, ty).ok_or_else(|| {
                mismatch(format!(
                    "return value {} (`{field}`) must be {ty}, got {}",
                    i + 1,
                    value.data_type()
                ))
            })?;
        }
    }
    row.columns = fields
        .iter()
        .map(|(f, _)| if f.is_empty() { UNNAMED_COLUMN.to_owned() } else { f.clone() })
        .collect();
    Ok(row)
}

fn call_builtin(f: &'static BuiltinFunction, ctx: &mut ExecCtx<'_>, args: Vec<Value>, sink: Sink<'_>) -> ExecResult<()> {
    match f.kind {
        FunctionKind::Aggregate => return Err(TypeError::AggregateOutsideSql(f.name.to_owned()).into()),
        FunctionKind::Procedure if f.name == "notice" => {
            let types: SmallVec<[DataType; 4]> = args.iter().map(Value::data_type).collect();
            f.validate(&types)?;
            let msg = match args.first() {
                Some(Value::Text(Some(msg))) => msg.clone(),
                _ => String::new(),
            };
            ctx.notice(msg);
            return Ok(());
        }
        FunctionKind::Procedure => {
            f.evaluate(&args)?;
            return Ok(());
        }
        FunctionKind::Scalar => {}
    }

    let params: Vec<(String, Value)> = args
        .into_iter()
        .enumerate()
        .map(|(i, v)| (format!("${}", i + 1), v))
        .collect();
    let call = FunctionCall::new(
        f.name,
        params.iter().map(|(name, _)| Expr::var(name)).collect(),
    );
    let stmt = SqlStatement::Select(Select::new(vec![Expr::Call(call)]));

    let mut rows = vec![];
    ctx.run_query(&stmt, params, &mut |row| {
        rows.push(row);
        Ok(())
    })?;
    let [row] = <[Row; 1]>::try_from(rows).map_err(|rows| InvocationError::RowCount {
        name: f.name.to_owned(),
        got: rows.len(),
    })?;
    sink(Row {
        columns: vec![f.name.to_owned()],
        values: row.values,
    })
}

fn call_action(action: &Arc<Action>, ctx: &mut ExecCtx<'_>, args: Vec<Value>, sink: Sink<'_>) -> ExecResult<()> {
    let def = &action.definition;
    ctx.check_can_execute(&action.namespace, &def.name, &def.modifiers)?;
    let args = Executable::Action(action.clone()).coerce_args(args)?;
    let shape = ReturnShape::declared(&def.returns);

    ctx.call_frame(&action.namespace, |ctx| {
        for (param, arg) in def.params.iter().zip(args) {
            ctx.declare(&param.name, arg)?;
        }
        let mut emit = |row: Row| sink(shape_row(&def.name, &shape, row)?);
        match run_body(ctx, &action.body, &mut emit)? {
            Flow::Normal | Flow::Return(None) => Ok(()),
            Flow::Return(Some(row)) => emit(row),
            Flow::Break | Flow::Continue => Err(ExecError::Internal(format!(
                "loop control escaped the body of `{}`",
                def.name
            ))),
        }
    })
}

/// Turns a returned row into a record, for loops over calls and queries.
pub(crate) fn row_to_record(row: Row) -> ExecResult<Value> {
    Ok(Value::Record(RecordValue::from_pairs(row.columns.into_iter().zip(row.values))?))
}
