//! Turns action bodies and ad-hoc statements into closures.
//!
//! Planning is a single walk over the tree. It keeps a stack of frames holding the
//! static type of every variable, rejects anything that cannot type check, and returns
//! closures that do the actual work when run with an [`ExecCtx`]. Nothing touches
//! storage or the scope while planning, so a rejected action has no side effects.
//!
//! Calls are checked against the callee known at plan time but looked up by name when
//! they run, so replacing an action takes effect for its callers.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use quill_ast::sql::ResultColumn;
use quill_ast::{
    ActionStmt, Assignable, CreateAction, Expr, FunctionCall, IfThen, Literal, LogicalOp, LoopTerm, Modifier,
    ReturnValue, SqlStatement, Subscript, VarPrefix, Variable,
};
use quill_values::ops::{arithmetic_type, comparison_type, unary_type};
use quill_values::{ArrayValue, CmpOp, DataType, Decimal, UnaryOp, Value, ValueError};

use crate::db::Row;
use crate::errors::{AuthError, CatalogError, ExecError, ExecResult, InvocationError, TypeError};
use crate::exec::{ExecCtx, ExprFn, Flow, Sink, StmtFn, coerce_assign, context_variable_type, run_body};
use crate::executable::{ReturnShape, Ty, row_to_record, soft_castable, validate_signature};
use crate::namespace::State;
use crate::privilege::Privilege;
use crate::scope::Scope;
use crate::sqlgen;

/// A SQL statement with the procedural values it reads.
pub(crate) struct SqlPlan {
    stmt: SqlStatement,
    params: Vec<(String, ExprFn)>,
}

impl SqlPlan {
    pub(crate) fn statement(&self) -> &SqlStatement {
        &self.stmt
    }

    /// Evaluates the parameters and runs the statement.
    pub(crate) fn run(&self, ctx: &mut ExecCtx<'_>, sink: Sink<'_>) -> ExecResult<()> {
        let mut params = Vec::with_capacity(self.params.len());
        for (name, param) in &self.params {
            params.push((name.clone(), param(ctx)?));
        }
        ctx.run_query(&self.stmt, params, sink)
    }

    /// Fails if the statement may not run in `ctx`. Statements inside actions only need
    /// the context to be writable; at top level the caller also needs the privilege.
    pub(crate) fn authorize(&self, ctx: &ExecCtx<'_>) -> ExecResult<()> {
        if self.stmt.is_mutating() && !ctx.can_mutate() {
            return Err(AuthError::ReadOnlyContext.into());
        }
        if ctx.is_top_level() {
            ctx.check_privilege(sql_privilege(&self.stmt))?;
        }
        Ok(())
    }
}

pub(crate) fn sql_privilege(stmt: &SqlStatement) -> Privilege {
    match stmt {
        SqlStatement::Select(_) => Privilege::Select,
        SqlStatement::Insert(_) => Privilege::Insert,
        SqlStatement::Update(_) => Privilege::Update,
        SqlStatement::Delete(_) => Privilege::Delete,
    }
}

/// Fails unless exactly one of PUBLIC, PRIVATE and SYSTEM is present.
pub(crate) fn check_visibility(name: &str, modifiers: &[Modifier]) -> ExecResult<()> {
    let found = modifiers
        .iter()
        .filter(|m| matches!(m, Modifier::Public | Modifier::Private | Modifier::System))
        .count();
    if found != 1 {
        return Err(InvocationError::Visibility {
            name: name.to_owned(),
            found,
        }
        .into());
    }
    Ok(())
}

/// Plans the body of `def`, an action in `namespace`.
///
/// With `late_bound`, calls to functions that do not exist yet are accepted and checked
/// when they run. This is used when actions are reloaded from storage, where they may
/// call each other in any order.
pub(crate) fn plan_action(
    state: &State,
    namespace: &str,
    def: &CreateAction,
    late_bound: bool,
) -> ExecResult<Vec<StmtFn>> {
    check_visibility(&def.name, &def.modifiers)?;
    Planner::for_action(state, namespace, def, late_bound)
        .and_then(|mut planner| planner.block(&def.body))
        .map_err(ExecError::planning)
}

/// Plans a procedural statement run directly in a batch, where the variables bound so far
/// are those in `scope`.
pub(crate) fn plan_batch_stmt(state: &State, namespace: &str, scope: &Scope, stmt: &ActionStmt) -> ExecResult<StmtFn> {
    Planner::for_batch(state, namespace, scope)
        .stmt(stmt)
        .map_err(ExecError::planning)
}

/// Plans an ad-hoc SQL statement.
pub(crate) fn plan_batch_sql(state: &State, namespace: &str, scope: &Scope, stmt: &SqlStatement) -> ExecResult<SqlPlan> {
    Planner::for_batch(state, namespace, scope)
        .sql(stmt)
        .map_err(ExecError::planning)
}

/// Plans an expression evaluated directly in a batch.
pub(crate) fn plan_batch_expr(state: &State, namespace: &str, scope: &Scope, expr: &Expr) -> ExecResult<ExprFn> {
    Planner::for_batch(state, namespace, scope)
        .expr(expr)
        .map(|(f, _)| f)
        .map_err(ExecError::planning)
}

fn value_ty(value: &Value) -> Ty {
    match value {
        Value::Record(r) => Ty::Record(Some(Arc::new(
            r.field_types().map(|(name, ty)| (name.to_owned(), Ty::Known(ty))).collect(),
        ))),
        v => Ty::Known(v.data_type()),
    }
}

/// Whether a value of type `value` can be stored in a variable of type `target`.
fn assignable(target: &Ty, value: &Ty) -> bool {
    match (target, value) {
        (Ty::Any, _) | (_, Ty::Any) => true,
        (Ty::Record(_), Ty::Record(_)) => true,
        (Ty::Record(_), Ty::Known(t)) | (Ty::Known(t), Ty::Record(_)) => t.is_null() || *t == DataType::Record,
        (Ty::Known(target), Ty::Known(value)) => value.equals(target) || soft_castable(value, target),
    }
}

fn expect(ty: &Ty, want: DataType) -> ExecResult<()> {
    if ty.as_data_type().equals(&want) {
        Ok(())
    } else {
        Err(TypeError::mismatch(want, ty).into())
    }
}

fn literal_value(lit: &Literal) -> ExecResult<Value> {
    Ok(match lit {
        Literal::Null => Value::Null,
        Literal::Int(i) => Value::int(*i),
        Literal::Text(s) => Value::text(s.clone()),
        Literal::Bool(b) => Value::bool(*b),
        Literal::Blob(b) => Value::blob(b.clone()),
        Literal::Decimal(d) => Value::Decimal(Decimal::parse_literal(d)?),
    })
}

fn as_array(value: Value) -> ExecResult<Option<ArrayValue>> {
    match value {
        Value::Array(a) => Ok(Some(a)),
        Value::Null => Ok(None),
        other => Err(TypeError::mismatch("an array", other.data_type()).into()),
    }
}

fn as_index(value: &Value) -> ExecResult<Option<i64>> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Null => Ok(None),
        other => Err(TypeError::mismatch(DataType::INT, other.data_type()).into()),
    }
}

fn bound(value: Option<&ExprFn>, ctx: &mut ExecCtx<'_>) -> ExecResult<Option<Option<i64>>> {
    match value {
        None => Ok(Some(None)),
        Some(f) => Ok(as_index(&f(ctx)?)?.map(Some)),
    }
}

/// Where a call goes when it runs.
#[derive(Clone)]
struct CallTarget {
    namespace: Option<String>,
    name: String,
}

fn call_rows(ctx: &mut ExecCtx<'_>, target: &CallTarget, args: &[ExprFn]) -> ExecResult<Vec<Row>> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(arg(ctx)?);
    }
    let exe = ctx.lookup_function(target.namespace.as_deref(), &target.name)?;
    let mut rows = vec![];
    exe.call(ctx, values, &mut |row| {
        rows.push(row);
        Ok(())
    })?;
    Ok(rows)
}

fn single_row(name: &str, rows: Vec<Row>) -> ExecResult<Row> {
    <[Row; 1]>::try_from(rows)
        .map(|[row]| row)
        .map_err(|rows| {
            InvocationError::RowCount {
                name: name.to_owned(),
                got: rows.len(),
            }
            .into()
        })
}

enum LoopSource {
    Range(ExprFn, ExprFn),
    Array(ExprFn),
    Call(Vec<ExprFn>, CallTarget),
    Sql(SqlPlan),
}

enum Items {
    Range(RangeInclusive<i64>),
    Values(std::vec::IntoIter<Value>),
}

impl Iterator for Items {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Self::Range(r) => r.next().map(Value::int),
            Self::Values(v) => v.next(),
        }
    }
}

impl LoopSource {
    /// The values the loop variable takes. Rows are read in full before the body runs.
    fn items(&self, ctx: &mut ExecCtx<'_>) -> ExecResult<Items> {
        Ok(match self {
            Self::Range(start, end) => {
                let (start, end) = (as_index(&start(ctx)?)?, as_index(&end(ctx)?)?);
                match (start, end) {
                    (Some(start), Some(end)) => Items::Range(start..=end),
                    _ => Items::Values(vec![].into_iter()),
                }
            }
            Self::Array(array) => {
                let elems = as_array(array(ctx)?)?.map(ArrayValue::into_elements).unwrap_or_default();
                Items::Values(elems.into_iter())
            }
            Self::Call(args, target) => {
                let rows = call_rows(ctx, target, args)?;
                let records = rows.into_iter().map(row_to_record).collect::<ExecResult<Vec<_>>>()?;
                Items::Values(records.into_iter())
            }
            Self::Sql(plan) => {
                plan.authorize(ctx)?;
                let mut records = vec![];
                plan.run(ctx, &mut |row| {
                    records.push(row_to_record(row)?);
                    Ok(())
                })?;
                Items::Values(records.into_iter())
            }
        })
    }
}

struct Planner<'p> {
    state: &'p State,
    namespace: String,
    frames: Vec<HashMap<String, Ty>>,
    loops: usize,
    /// The action being planned, absent for batches.
    action: Option<&'p CreateAction>,
    late_bound: bool,
}

impl<'p> Planner<'p> {
    fn for_action(state: &'p State, namespace: &str, def: &'p CreateAction, late_bound: bool) -> ExecResult<Self> {
        let mut params = HashMap::new();
        for param in &def.params {
            let var = Variable::new(&param.name);
            if var.prefix == VarPrefix::At {
                return Err(TypeError::InvalidVariableName {
                    name: param.name.clone(),
                    reason: "parameters must start with `$`".into(),
                }
                .into());
            }
            if params.insert(var.name, Ty::Known(param.ty)).is_some() {
                return Err(TypeError::AlreadyDeclared(param.name.clone()).into());
            }
        }
        Ok(Self {
            state,
            namespace: namespace.to_owned(),
            frames: vec![params],
            loops: 0,
            action: Some(def),
            late_bound,
        })
    }

    fn for_batch(state: &'p State, namespace: &str, scope: &Scope) -> Self {
        let vars = scope
            .bindings()
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value_ty(value)))
            .collect();
        Self {
            state,
            namespace: namespace.to_owned(),
            frames: vec![vars],
            loops: 0,
            action: None,
            late_bound: false,
        }
    }

    fn lookup(&self, name: &str) -> Option<&Ty> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    fn declare(&mut self, var: &Variable, ty: Ty) -> ExecResult<()> {
        if let Some(frame) = self.frames.last_mut() {
            if frame.contains_key(&var.name) {
                return Err(TypeError::AlreadyDeclared(var.to_string()).into());
            }
            frame.insert(var.name.clone(), ty);
        }
        Ok(())
    }

    /// Declares `var` with `ty` unless it exists, in which case `ty` must fit it.
    fn bind(&mut self, var: &Variable, ty: &Ty) -> ExecResult<()> {
        if var.prefix == VarPrefix::At {
            return Err(TypeError::ReadOnlyVariable(var.to_string()).into());
        }
        match self.lookup(&var.name) {
            Some(current) if !assignable(current, ty) => Err(TypeError::Assign {
                name: var.to_string(),
                expected: current.as_data_type(),
                found: ty.as_data_type(),
            }
            .into()),
            Some(_) => Ok(()),
            None => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.insert(var.name.clone(), ty.clone());
                }
                Ok(())
            }
        }
    }

    fn var_type(&self, var: &Variable) -> ExecResult<Ty> {
        match var.prefix {
            VarPrefix::Dollar => self
                .lookup(&var.name)
                .cloned()
                .ok_or_else(|| TypeError::UnknownVariable(var.to_string()).into()),
            VarPrefix::At => context_variable_type(&var.name)
                .map(Ty::Known)
                .ok_or_else(|| TypeError::UnknownContextVariable(var.to_string()).into()),
        }
    }

    /// Plans statements in a child frame.
    fn block(&mut self, body: &[quill_ast::ActionStmt]) -> ExecResult<Vec<StmtFn>> {
        self.frames.push(HashMap::new());
        let res = body.iter().map(|stmt| self.stmt(stmt)).collect();
        self.frames.pop();
        res
    }

    /// Checks a call, returning its planned arguments, what it returns (`None` if it
    /// is late bound), and where it goes.
    fn call(&mut self, call: &FunctionCall) -> ExecResult<(Vec<ExprFn>, Option<ReturnShape>, CallTarget)> {
        let target = CallTarget {
            namespace: call.namespace.as_ref().map(|ns| ns.to_lowercase()),
            name: call.name.to_lowercase(),
        };
        if call.star || call.distinct {
            return Err(InvocationError::SqlOnly(format!("{}(...)", target.name)).into());
        }

        let mut args = Vec::with_capacity(call.args.len());
        let mut types = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let (f, ty) = self.expr(arg)?;
            args.push(f);
            types.push(ty);
        }

        let namespace = target.namespace.as_deref().unwrap_or(&self.namespace);
        if let Some(def) = self.action
            && namespace == self.namespace
            && def.name.eq_ignore_ascii_case(&target.name)
        {
            let params: Vec<DataType> = def.params.iter().map(|p| p.ty).collect();
            let shape = validate_signature(&target.name, &params, &def.returns, &types)?;
            return Ok((args, Some(shape), target));
        }

        let shape = match self.state.namespaces.get(namespace) {
            None if self.late_bound => None,
            None => return Err(CatalogError::UnknownNamespace(namespace.to_owned()).into()),
            Some(ns) => match ns.function(&target.name) {
                Some(exe) => Some(exe.validate(&types)?),
                None if self.late_bound => None,
                None => {
                    return Err(CatalogError::UnknownFunction {
                        namespace: namespace.to_owned(),
                        name: target.name.clone(),
                    }
                    .into());
                }
            },
        };
        Ok((args, shape, target))
    }

    fn expr(&mut self, expr: &Expr) -> ExecResult<(ExprFn, Ty)> {
        Ok(match expr {
            Expr::Literal(lit) => {
                let value = literal_value(lit)?;
                let ty = Ty::Known(value.data_type());
                (Box::new(move |_: &mut ExecCtx<'_>| Ok(value.clone())), ty)
            }
            Expr::Variable(var) => {
                let ty = self.var_type(var)?;
                let var = var.clone();
                (Box::new(move |ctx: &mut ExecCtx<'_>| ctx.get_variable(&var)), ty)
            }
            Expr::Call(call) => self.call_expr(call)?,
            Expr::ArrayAccess { array, subscript } => self.array_access(array, subscript)?,
            Expr::MakeArray(values) => self.make_array(values)?,
            Expr::FieldAccess { record, field } => self.field_access(record, field)?,
            Expr::Paren(inner) => self.expr(inner)?,
            Expr::Comparison { left, op, right } => {
                let (l, lt) = self.expr(left)?;
                let (r, rt) = self.expr(right)?;
                comparison_type(&lt.as_data_type(), &rt.as_data_type(), *op)?;
                let op = *op;
                (
                    Box::new(move |ctx: &mut ExecCtx<'_>| {
                        let left = l(ctx)?;
                        Ok(left.compare(&r(ctx)?, op)?)
                    }),
                    Ty::Known(DataType::BOOL),
                )
            }
            Expr::Logical { left, op, right } => {
                let (l, lt) = self.expr(left)?;
                let (r, rt) = self.expr(right)?;
                expect(&lt, DataType::BOOL)?;
                expect(&rt, DataType::BOOL)?;
                let op = *op;
                (
                    Box::new(move |ctx: &mut ExecCtx<'_>| {
                        let left = l(ctx)?.truthy();
                        let decided = match op {
                            LogicalOp::And => Some(false),
                            LogicalOp::Or => Some(true),
                        };
                        if left == decided {
                            return Ok(Value::Bool(left));
                        }
                        let right = r(ctx)?.truthy();
                        Ok(Value::Bool(match (left, right) {
                            (_, r) if r == decided => r,
                            (Some(l), Some(_)) => Some(l),
                            _ => None,
                        }))
                    }),
                    Ty::Known(DataType::BOOL),
                )
            }
            Expr::Arithmetic { left, op, right } => {
                let (l, lt) = self.expr(left)?;
                let (r, rt) = self.expr(right)?;
                let ret = arithmetic_type(&lt.as_data_type(), &rt.as_data_type(), *op)?;
                let ty = if ret.is_null() && !(lt.is_known() && rt.is_known()) {
                    Ty::Any
                } else {
                    Ty::Known(ret)
                };
                let op = *op;
                (
                    Box::new(move |ctx: &mut ExecCtx<'_>| {
                        let left = l(ctx)?;
                        Ok(left.arithmetic(&r(ctx)?, op)?)
                    }),
                    ty,
                )
            }
            Expr::Unary { op, expr } => {
                let (f, ty) = self.expr(expr)?;
                let ret = unary_type(&ty.as_data_type(), *op)?;
                let ty = if ty.is_known() { Ty::Known(ret) } else { ty };
                let op = *op;
                (Box::new(move |ctx: &mut ExecCtx<'_>| Ok(f(ctx)?.unary(op)?)), ty)
            }
            Expr::Is {
                left,
                right,
                not,
                distinct,
            } => {
                let (l, lt) = self.expr(left)?;
                let (r, rt) = self.expr(right)?;
                let op = if *distinct { CmpOp::IsDistinctFrom } else { CmpOp::Is };
                comparison_type(&lt.as_data_type(), &rt.as_data_type(), op)?;
                let not = *not;
                (
                    Box::new(move |ctx: &mut ExecCtx<'_>| {
                        let left = l(ctx)?;
                        let res = left.compare(&r(ctx)?, op)?;
                        Ok(if not { res.unary(UnaryOp::Not)? } else { res })
                    }),
                    Ty::Known(DataType::BOOL),
                )
            }
            Expr::Cast { expr, ty } => {
                let (f, from) = self.expr(expr)?;
                if matches!(from, Ty::Record(_)) || *ty == DataType::Record {
                    return Err(ValueError::cast(from.as_data_type(), *ty, "records cannot be cast").into());
                }
                let target = *ty;
                (
                    Box::new(move |ctx: &mut ExecCtx<'_>| Ok(f(ctx)?.cast(&target)?)),
                    Ty::Known(target),
                )
            }
            Expr::Column { table, column } => {
                let name = match table {
                    Some(t) => format!("{t}.{column}"),
                    None => column.clone(),
                };
                return Err(TypeError::ColumnOutsideSql(name).into());
            }
            Expr::Between { .. } => return Err(InvocationError::SqlOnly("BETWEEN".into()).into()),
            Expr::InList { .. } => return Err(InvocationError::SqlOnly("IN".into()).into()),
        })
    }

    fn call_expr(&mut self, call: &FunctionCall) -> ExecResult<(ExprFn, Ty)> {
        let (args, shape, target) = self.call(call)?;
        let name = target.name.clone();
        let ty = match shape {
            None => Ty::Any,
            Some(ReturnShape::Scalar(mut fields)) if fields.len() == 1 => fields.remove(0).1,
            Some(ReturnShape::Scalar(fields)) => {
                return Err(InvocationError::ColumnCount {
                    name,
                    expected: 1,
                    got: fields.len(),
                }
                .into());
            }
            Some(ReturnShape::Table(_)) => return Err(InvocationError::ReturnsTable(name).into()),
            Some(ReturnShape::None) => return Err(InvocationError::NoReturn(name).into()),
        };
        let f = move |ctx: &mut ExecCtx<'_>| {
            let row = single_row(&target.name, call_rows(ctx, &target, &args)?)?;
            let [value] = <[Value; 1]>::try_from(row.values).map_err(|values| InvocationError::ColumnCount {
                name: target.name.clone(),
                expected: 1,
                got: values.len(),
            })?;
            Ok(value)
        };
        Ok((Box::new(f), ty))
    }

    fn array_access(&mut self, array: &Expr, subscript: &Subscript) -> ExecResult<(ExprFn, Ty)> {
        let (arr, arr_ty) = self.expr(array)?;
        let elem = match &arr_ty {
            Ty::Known(DataType::Array(elem)) => Some(*elem),
            Ty::Any | Ty::Known(DataType::Null) => None,
            other => return Err(TypeError::mismatch("an array", other).into()),
        };
        Ok(match subscript {
            Subscript::Index(index) => {
                let (idx, idx_ty) = self.expr(index)?;
                expect(&idx_ty, DataType::INT)?;
                let ty = elem.map_or(Ty::Any, |e| Ty::Known(DataType::Scalar(e)));
                let f = move |ctx: &mut ExecCtx<'_>| {
                    let Some(array) = as_array(arr(ctx)?)? else {
                        return Ok(Value::Null);
                    };
                    match as_index(&idx(ctx)?)? {
                        Some(i) => Ok(array.get(i)?),
                        None => Ok(Value::null_scalar(array.elem_type())),
                    }
                };
                (Box::new(f) as ExprFn, ty)
            }
            Subscript::Slice { from, to } => {
                let mut plan_bound = |b: &Option<Box<Expr>>| -> ExecResult<Option<ExprFn>> {
                    let Some(b) = b else { return Ok(None) };
                    let (f, ty) = self.expr(b)?;
                    expect(&ty, DataType::INT)?;
                    Ok(Some(f))
                };
                let from = plan_bound(from)?;
                let to = plan_bound(to)?;
                let ty = elem.map_or(Ty::Any, |e| Ty::Known(DataType::Array(e)));
                let f = move |ctx: &mut ExecCtx<'_>| {
                    let Some(array) = as_array(arr(ctx)?)? else {
                        return Ok(Value::Null);
                    };
                    match (bound(from.as_ref(), ctx)?, bound(to.as_ref(), ctx)?) {
                        (Some(from), Some(to)) => Ok(Value::Array(array.slice(from, to)?)),
                        _ => Ok(Value::Array(ArrayValue::null(array.elem_type()))),
                    }
                };
                (Box::new(f) as ExprFn, ty)
            }
        })
    }

    fn make_array(&mut self, values: &[Expr]) -> ExecResult<(ExprFn, Ty)> {
        if values.is_empty() {
            return Err(ValueError::EmptyArray.into());
        }
        let mut elems = Vec::with_capacity(values.len());
        let mut elem: Option<DataType> = None;
        let mut all_null = true;
        for value in values {
            let (f, ty) = self.expr(value)?;
            match &ty {
                Ty::Known(DataType::Null) => {}
                Ty::Known(DataType::Array(_)) => return Err(ValueError::Dimensionality.into()),
                Ty::Known(DataType::Record) | Ty::Record(_) => {
                    return Err(TypeError::mismatch("a scalar", &ty).into());
                }
                Ty::Known(t) => {
                    all_null = false;
                    match &elem {
                        Some(e) if !e.equals(t) && !e.arithmetic_compatible(t) => {
                            return Err(TypeError::mismatch(e, t).into());
                        }
                        Some(_) => {}
                        None => elem = Some(*t),
                    }
                }
                Ty::Any => all_null = false,
            }
            elems.push(f);
        }
        let ty = match elem.and_then(|e| e.array_of()) {
            Some(array) => Ty::Known(array),
            None if all_null => Ty::Known(DataType::Array(quill_values::ScalarType::Text)),
            None => Ty::Any,
        };
        let f = move |ctx: &mut ExecCtx<'_>| {
            let mut values = Vec::with_capacity(elems.len());
            for e in &elems {
                values.push(e(ctx)?);
            }
            Ok(Value::Array(ArrayValue::from_values(values)?))
        };
        Ok((Box::new(f), ty))
    }

    fn field_access(&mut self, record: &Expr, field: &str) -> ExecResult<(ExprFn, Ty)> {
        let (rec, rec_ty) = self.expr(record)?;
        let ty = match &rec_ty {
            Ty::Record(Some(fields)) => fields
                .iter()
                .find(|(name, _)| name == field)
                .map(|(_, ty)| ty.clone())
                .ok_or_else(|| TypeError::UnknownField(field.to_owned()))?,
            Ty::Record(None) | Ty::Any | Ty::Known(DataType::Record | DataType::Null) => Ty::Any,
            other => return Err(TypeError::mismatch("a record", other).into()),
        };
        let field = field.to_owned();
        let f = move |ctx: &mut ExecCtx<'_>| match rec(ctx)? {
            Value::Record(r) => r
                .get(&field)
                .cloned()
                .ok_or_else(|| TypeError::UnknownField(field.clone()).into()),
            Value::Null => Ok(Value::Null),
            other => Err(TypeError::mismatch("a record", other.data_type()).into()),
        };
        Ok((Box::new(f), ty))
    }

    fn sql(&mut self, stmt: &SqlStatement) -> ExecResult<SqlPlan> {
        let mut params = vec![];
        for (name, expr) in sqlgen::collect_params(stmt) {
            let (f, _) = self.expr(expr)?;
            params.push((name, f));
        }
        // Rendering checks that every call inside the statement is a built-in.
        let names: Vec<String> = params.iter().map(|(name, _)| name.clone()).collect();
        sqlgen::render_sql(stmt, &self.namespace, &names)?;
        Ok(SqlPlan {
            stmt: stmt.clone(),
            params,
        })
    }

    fn returns_of(&self) -> ExecResult<(&'p CreateAction, Option<&'p quill_ast::ddl::ActionReturn>)> {
        let def = self.action.ok_or(TypeError::ReturnOutsideAction)?;
        Ok((def, def.returns.as_ref()))
    }

    /// Checks values returned by RETURN or RETURN NEXT against the declared fields.
    fn check_returned(&self, def: &CreateAction, fields: &[quill_ast::NamedType], types: &[Ty]) -> ExecResult<()> {
        let mismatch = |reason: String| -> ExecError {
            InvocationError::ReturnShape {
                name: def.name.clone(),
                reason,
            }
            .into()
        };
        if fields.len() != types.len() {
            return Err(mismatch(format!(
                "declared {} return values, returned {}",
                fields.len(),
                types.len()
            )));
        }
        for (i, (field, ty)) in fields.iter().zip(types).enumerate() {
            if !assignable(&Ty::Known(field.ty), ty) {
                return Err(mismatch(format!(
                    "return value {} (`{}`) must be {}, got {ty}",
                    i + 1,
                    field.name,
                    field.ty
                )));
            }
        }
        Ok(())
    }

    fn exprs(&mut self, exprs: &[Expr]) -> ExecResult<(Vec<ExprFn>, Vec<Ty>)> {
        let mut fns = Vec::with_capacity(exprs.len());
        let mut types = Vec::with_capacity(exprs.len());
        for e in exprs {
            let (f, ty) = self.expr(e)?;
            fns.push(f);
            types.push(ty);
        }
        Ok((fns, types))
    }

    fn stmt(&mut self, stmt: &ActionStmt) -> ExecResult<StmtFn> {
        Ok(match stmt {
            ActionStmt::Declare { var, ty } => {
                if var.prefix == VarPrefix::At {
                    return Err(TypeError::ReadOnlyVariable(var.to_string()).into());
                }
                self.declare(var, Ty::Known(*ty))?;
                let name = var.name.clone();
                let null = Value::null_of(ty);
                Box::new(move |ctx: &mut ExecCtx<'_>, _: Sink<'_>| {
                    ctx.declare(&name, null.clone())?;
                    Ok(Flow::Normal)
                })
            }
            ActionStmt::Assign {
                target: Assignable::Variable(var),
                ty,
                value,
            } => self.assign(var, *ty, value)?,
            ActionStmt::Assign {
                target: Assignable::ArrayElement { array, subscript },
                ty,
                value,
            } => {
                if let Some(ty) = ty {
                    return Err(TypeError::mismatch("an untyped element assignment", ty).into());
                }
                self.assign_element(array, subscript, value)?
            }
            ActionStmt::Call { receivers, call } => self.call_stmt(receivers, call)?,
            ActionStmt::ForLoop { receiver, term, body } => self.for_loop(receiver, term, body)?,
            ActionStmt::If { branches, otherwise } => self.if_stmt(branches, otherwise)?,
            ActionStmt::Sql(stmt) => {
                let plan = self.sql(stmt)?;
                Box::new(move |ctx: &mut ExecCtx<'_>, _: Sink<'_>| {
                    plan.authorize(ctx)?;
                    plan.run(ctx, &mut |_| Ok(()))?;
                    Ok(Flow::Normal)
                })
            }
            ActionStmt::Break | ActionStmt::Continue => {
                let (word, flow) = match stmt {
                    ActionStmt::Break => ("BREAK", Flow::Break),
                    _ => ("CONTINUE", Flow::Continue),
                };
                if self.loops == 0 {
                    return Err(TypeError::LoopControl(word).into());
                }
                Box::new(move |_: &mut ExecCtx<'_>, _: Sink<'_>| Ok(flow.clone()))
            }
            ActionStmt::Return(ReturnValue::Values(values)) => {
                let (def, returns) = self.returns_of()?;
                let (fns, types) = self.exprs(values)?;
                if !values.is_empty() {
                    match returns {
                        Some(r) if !r.is_table => self.check_returned(def, &r.fields, &types)?,
                        Some(_) => {
                            return Err(InvocationError::ReturnShape {
                                name: def.name.clone(),
                                reason: "it returns a table, so rows are returned with RETURN NEXT".into(),
                            }
                            .into());
                        }
                        None => {
                            return Err(InvocationError::ReturnShape {
                                name: def.name.clone(),
                                reason: "it does not declare a return type but returns values".into(),
                            }
                            .into());
                        }
                    }
                }
                Box::new(move |ctx: &mut ExecCtx<'_>, _: Sink<'_>| {
                    if fns.is_empty() {
                        return Ok(Flow::Return(None));
                    }
                    let mut values = Vec::with_capacity(fns.len());
                    for f in &fns {
                        values.push(f(ctx)?);
                    }
                    Ok(Flow::Return(Some(Row::unnamed(values))))
                })
            }
            ActionStmt::Return(ReturnValue::Sql(stmt)) => {
                let (def, returns) = self.returns_of()?;
                let Some(returns) = returns else {
                    return Err(InvocationError::ReturnShape {
                        name: def.name.clone(),
                        reason: "it does not declare a return type but returns a query".into(),
                    }
                    .into());
                };
                if let SqlStatement::Select(select) = stmt
                    && !select.columns.iter().any(|c| matches!(c, ResultColumn::Wildcard { .. }))
                    && select.columns.len() != returns.fields.len()
                {
                    return Err(InvocationError::ReturnShape {
                        name: def.name.clone(),
                        reason: format!(
                            "declared {} return values, the query returns {}",
                            returns.fields.len(),
                            select.columns.len()
                        ),
                    }
                    .into());
                }
                let plan = self.sql(stmt)?;
                Box::new(move |ctx: &mut ExecCtx<'_>, sink: Sink<'_>| {
                    plan.authorize(ctx)?;
                    plan.run(ctx, sink)?;
                    Ok(Flow::Return(None))
                })
            }
            ActionStmt::ReturnNext(values) => {
                let (def, returns) = self.returns_of()?;
                match returns {
                    Some(r) if r.is_table => {
                        let fields = r.fields.clone();
                        let (fns, types) = self.exprs(values)?;
                        self.check_returned(def, &fields, &types)?;
                        Box::new(move |ctx: &mut ExecCtx<'_>, sink: Sink<'_>| {
                            let mut values = Vec::with_capacity(fns.len());
                            for f in &fns {
                                values.push(f(ctx)?);
                            }
                            sink(Row::unnamed(values))?;
                            Ok(Flow::Normal)
                        })
                    }
                    _ => {
                        return Err(InvocationError::ReturnShape {
                            name: def.name.clone(),
                            reason: "RETURN NEXT needs RETURNS TABLE".into(),
                        }
                        .into());
                    }
                }
            }
        })
    }

    fn assign(&mut self, var: &Variable, ty: Option<DataType>, value: &Expr) -> ExecResult<StmtFn> {
        if var.prefix == VarPrefix::At {
            return Err(TypeError::ReadOnlyVariable(var.to_string()).into());
        }
        let (f, value_ty) = self.expr(value)?;
        match (self.lookup(&var.name).cloned(), ty) {
            (Some(current), Some(ty)) if !assignable(&current, &Ty::Known(ty)) => {
                return Err(TypeError::Assign {
                    name: var.to_string(),
                    expected: current.as_data_type(),
                    found: ty,
                }
                .into());
            }
            (None, Some(ty)) => {
                if !assignable(&Ty::Known(ty), &value_ty) {
                    return Err(TypeError::Assign {
                        name: var.to_string(),
                        expected: ty,
                        found: value_ty.as_data_type(),
                    }
                    .into());
                }
                self.declare(var, Ty::Known(ty))?;
            }
            _ => self.bind(var, &value_ty)?,
        }
        let var = var.clone();
        Ok(Box::new(move |ctx: &mut ExecCtx<'_>, _: Sink<'_>| {
            let value = f(ctx)?;
            ctx.set_variable(&var, ty, value)?;
            Ok(Flow::Normal)
        }))
    }

    fn assign_element(&mut self, array: &Variable, subscript: &Subscript, value: &Expr) -> ExecResult<StmtFn> {
        if array.prefix == VarPrefix::At {
            return Err(TypeError::ReadOnlyVariable(array.to_string()).into());
        }
        let elem = match self.var_type(array)? {
            Ty::Known(DataType::Array(elem)) => Some(elem),
            Ty::Any | Ty::Known(DataType::Null) => None,
            other => return Err(TypeError::mismatch("an array", other).into()),
        };
        let (f, value_ty) = self.expr(value)?;
        let name = array.to_string();
        let array = array.clone();

        match subscript {
            Subscript::Index(index) => {
                if let Some(elem) = elem
                    && !assignable(&Ty::Known(DataType::Scalar(elem)), &value_ty)
                {
                    return Err(TypeError::Assign {
                        name,
                        expected: DataType::Scalar(elem),
                        found: value_ty.as_data_type(),
                    }
                    .into());
                }
                let (idx, idx_ty) = self.expr(index)?;
                expect(&idx_ty, DataType::INT)?;
                Ok(Box::new(move |ctx: &mut ExecCtx<'_>, _: Sink<'_>| {
                    let index = as_index(&idx(ctx)?)?
                        .ok_or_else(|| TypeError::mismatch("a non-null array index", "null"))?;
                    let value = f(ctx)?;
                    let mut arr = as_array(ctx.get_variable(&array)?)?
                        .ok_or_else(|| TypeError::mismatch("an array", "null"))?;
                    let value = coerce_assign(&name, &DataType::Scalar(arr.elem_type()), value)?;
                    arr.set(index, value)?;
                    ctx.set_variable(&array, None, Value::Array(arr))?;
                    Ok(Flow::Normal)
                }))
            }
            Subscript::Slice { from, to } => {
                match (&value_ty, elem) {
                    (Ty::Known(DataType::Array(v)), Some(e)) if !v.equals(&e) && !v.same_kind(&e) => {
                        return Err(TypeError::Assign {
                            name,
                            expected: DataType::Array(e),
                            found: DataType::Array(*v),
                        }
                        .into());
                    }
                    (Ty::Known(DataType::Array(_) | DataType::Null) | Ty::Any, _) => {}
                    (other, _) => return Err(TypeError::mismatch("an array", other).into()),
                }
                let mut plan_bound = |b: &Option<Box<Expr>>| -> ExecResult<Option<ExprFn>> {
                    let Some(b) = b else { return Ok(None) };
                    let (f, ty) = self.expr(b)?;
                    expect(&ty, DataType::INT)?;
                    Ok(Some(f))
                };
                let from = plan_bound(from)?;
                let to = plan_bound(to)?;
                Ok(Box::new(move |ctx: &mut ExecCtx<'_>, _: Sink<'_>| {
                    let null_bound = || TypeError::mismatch("a non-null slice bound", "null");
                    let from = bound(from.as_ref(), ctx)?.ok_or_else(null_bound)?;
                    let to = bound(to.as_ref(), ctx)?.ok_or_else(null_bound)?;
                    let values = as_array(f(ctx)?)?.ok_or_else(|| TypeError::mismatch("an array", "null"))?;
                    let mut arr = as_array(ctx.get_variable(&array)?)?
                        .ok_or_else(|| TypeError::mismatch("an array", "null"))?;
                    arr.set_slice(from, to, &values)?;
                    ctx.set_variable(&array, None, Value::Array(arr))?;
                    Ok(Flow::Normal)
                }))
            }
        }
    }

    fn call_stmt(&mut self, receivers: &[Option<Variable>], call: &FunctionCall) -> ExecResult<StmtFn> {
        let (args, shape, target) = self.call(call)?;
        if !receivers.is_empty() {
            let fields: Vec<Ty> = match shape {
                None => vec![Ty::Any; receivers.len()],
                Some(ReturnShape::Scalar(fields) | ReturnShape::Table(fields)) => {
                    if fields.len() < receivers.len() {
                        return Err(InvocationError::ColumnCount {
                            name: target.name.clone(),
                            expected: receivers.len(),
                            got: fields.len(),
                        }
                        .into());
                    }
                    fields.into_iter().map(|(_, ty)| ty).collect()
                }
                Some(ReturnShape::None) => return Err(InvocationError::NoReturn(target.name.clone()).into()),
            };
            for (receiver, ty) in receivers.iter().zip(&fields) {
                if let Some(var) = receiver {
                    self.bind(var, ty)?;
                }
            }
        }
        let receivers = receivers.to_vec();
        Ok(Box::new(move |ctx: &mut ExecCtx<'_>, _: Sink<'_>| {
            let rows = call_rows(ctx, &target, &args)?;
            if receivers.is_empty() {
                return Ok(Flow::Normal);
            }
            let row = single_row(&target.name, rows)?;
            if row.values.len() < receivers.len() {
                return Err(InvocationError::ColumnCount {
                    name: target.name.clone(),
                    expected: receivers.len(),
                    got: row.values.len(),
                }
                .into());
            }
            for (receiver, value) in receivers.iter().zip(row.values) {
                if let Some(var) = receiver {
                    ctx.set_variable(var, None, value)?;
                }
            }
            Ok(Flow::Normal)
        }))
    }

    fn for_loop(&mut self, receiver: &Variable, term: &LoopTerm, body: &[ActionStmt]) -> ExecResult<StmtFn> {
        if receiver.prefix == VarPrefix::At {
            return Err(TypeError::ReadOnlyVariable(receiver.to_string()).into());
        }
        let (source, ty) = match term {
            LoopTerm::Range { start, end } => {
                let (start, start_ty) = self.expr(start)?;
                let (end, end_ty) = self.expr(end)?;
                expect(&start_ty, DataType::INT)?;
                expect(&end_ty, DataType::INT)?;
                (LoopSource::Range(start, end), Ty::Known(DataType::INT))
            }
            LoopTerm::Array(array) => {
                let (f, ty) = self.expr(array)?;
                let ty = match ty {
                    Ty::Known(DataType::Array(elem)) => Ty::Known(DataType::Scalar(elem)),
                    Ty::Any | Ty::Known(DataType::Null) => Ty::Any,
                    other => return Err(TypeError::mismatch("an array", other).into()),
                };
                (LoopSource::Array(f), ty)
            }
            LoopTerm::Call(call) => {
                let (args, shape, target) = self.call(call)?;
                let ty = match shape {
                    None => Ty::Record(None),
                    Some(ReturnShape::Scalar(fields) | ReturnShape::Table(fields)) => Ty::Record(Some(Arc::new(fields))),
                    Some(ReturnShape::None) => return Err(InvocationError::NoReturn(target.name).into()),
                };
                (LoopSource::Call(args, target), ty)
            }
            LoopTerm::Sql(stmt) => (LoopSource::Sql(self.sql(stmt)?), Ty::Record(None)),
        };

        self.frames.push(HashMap::from([(receiver.name.clone(), ty)]));
        self.loops += 1;
        let body: ExecResult<Vec<StmtFn>> = body.iter().map(|stmt| self.stmt(stmt)).collect();
        self.loops -= 1;
        self.frames.pop();
        let body = body?;

        let receiver = receiver.name.clone();
        Ok(Box::new(move |ctx: &mut ExecCtx<'_>, sink: Sink<'_>| {
            for item in source.items(ctx)? {
                let flow = ctx.block(|ctx| {
                    ctx.declare(&receiver, item)?;
                    run_body(ctx, &body, &mut *sink)
                })?;
                match flow {
                    Flow::Normal | Flow::Continue => {}
                    Flow::Break => break,
                    ret @ Flow::Return(_) => return Ok(ret),
                }
            }
            Ok(Flow::Normal)
        }))
    }

    fn if_stmt(&mut self, branches: &[IfThen], otherwise: &[ActionStmt]) -> ExecResult<StmtFn> {
        let mut planned = Vec::with_capacity(branches.len());
        for branch in branches {
            let (cond, ty) = self.expr(&branch.condition)?;
            expect(&ty, DataType::BOOL)?;
            planned.push((cond, self.block(&branch.body)?));
        }
        let otherwise = self.block(otherwise)?;
        Ok(Box::new(move |ctx: &mut ExecCtx<'_>, sink: Sink<'_>| {
            for (cond, body) in &planned {
                if cond(ctx)?.truthy() == Some(true) {
                    return ctx.block(|ctx| run_body(ctx, body, &mut *sink));
                }
            }
            if otherwise.is_empty() {
                return Ok(Flow::Normal);
            }
            ctx.block(|ctx| run_body(ctx, &otherwise, &mut *sink))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NamespaceKind;
    use crate::namespace::Namespace;
    use pretty_assertions::assert_eq;
    use quill_ast::NamedType;
    use quill_values::ArithOp;

    fn state() -> State {
        let mut state = State::default();
        state.namespaces.insert("main".into(), Namespace::new("main", NamespaceKind::User));
        state
    }

    fn action(body: Vec<ActionStmt>) -> CreateAction {
        CreateAction::new("act", vec![Modifier::Public], body)
            .params(vec![NamedType::new("$n", DataType::INT)])
            .returns(false, vec![NamedType::new("count", DataType::INT)])
    }

    fn plan_err(def: &CreateAction) -> String {
        match plan_action(&state(), "main", def, false) {
            Ok(_) => panic!("expected `{}` to fail planning", def.name),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn rejected_at_plan_time() {
        struct TestCase {
            body: Vec<ActionStmt>,
            msg: &'static str,
        }

        for TestCase { body, msg } in [
            TestCase {
                body: vec![ActionStmt::return_values(vec![Expr::int(1), Expr::int(2)])],
                msg: "caught at plan time: return shape mismatch in `act`: declared 1 return values, returned 2",
            },
            TestCase {
                body: vec![ActionStmt::assign("$x", Expr::var("$missing"))],
                msg: "caught at plan time: unknown variable `$missing`",
            },
            TestCase {
                body: vec![ActionStmt::Break],
                msg: "caught at plan time: BREAK is only valid inside a loop",
            },
            TestCase {
                body: vec![ActionStmt::assign("@caller", Expr::text("me"))],
                msg: "caught at plan time: cannot assign to `@caller`: context variables are read-only",
            },
            TestCase {
                body: vec![ActionStmt::assign("$x", Expr::var("$n").arith(ArithOp::Add, Expr::text("a")))],
                msg: "caught at plan time: type mismatch: cannot combine `int8` with `text`",
            },
            TestCase {
                body: vec![ActionStmt::assign("$x", Expr::array(vec![]))],
                msg: "caught at plan time: cannot build an empty array of unknown type",
            },
            TestCase {
                body: vec![ActionStmt::assign("$x", Expr::call("count", vec![Expr::var("$n")]))],
                msg: "caught at plan time: aggregate `count` is only valid inside SQL",
            },
            TestCase {
                body: vec![ActionStmt::assign("$x", Expr::call("nope", vec![]))],
                msg: "caught at plan time: `nope` is not a known action or function in namespace `main`",
            },
            TestCase {
                body: vec![ActionStmt::assign("$x", Expr::column("name"))],
                msg: "caught at plan time: column references such as `name` are only valid inside SQL",
            },
            TestCase {
                body: vec![
                    ActionStmt::Assign {
                        target: Assignable::Variable(Variable::new("$x")),
                        ty: Some(DataType::INT),
                        value: Expr::text("one"),
                    },
                ],
                msg: "caught at plan time: cannot assign a value of type text to `$x` of type int8",
            },
            TestCase {
                body: vec![ActionStmt::ReturnNext(vec![Expr::int(1)])],
                msg: "caught at plan time: return shape mismatch in `act`: RETURN NEXT needs RETURNS TABLE",
            },
        ] {
            assert_eq!(plan_err(&action(body)), msg);
        }
    }

    #[test]
    fn visibility_is_required() {
        let def = CreateAction::new("hidden", vec![Modifier::View], vec![]);
        assert_eq!(
            plan_action(&state(), "main", &def, false).err().map(|e| e.to_string()),
            Some("action `hidden` must have exactly one of PUBLIC, PRIVATE or SYSTEM, found 0".into())
        );
    }

    #[test]
    fn late_bound_calls() {
        let def = action(vec![ActionStmt::assign("$x", Expr::call("later", vec![]))]);
        assert!(plan_action(&state(), "main", &def, false).is_err());
        assert!(plan_action(&state(), "main", &def, true).is_ok());
    }

    #[test]
    fn actions_can_call_themselves() {
        let def = action(vec![
            ActionStmt::If {
                branches: vec![IfThen {
                    condition: Expr::var("$n").cmp(CmpOp::LtEq, Expr::int(0)),
                    body: vec![ActionStmt::return_values(vec![Expr::int(0)])],
                }],
                otherwise: vec![],
            },
            ActionStmt::assign(
                "$rest",
                Expr::call("act", vec![Expr::var("$n").arith(ArithOp::Sub, Expr::int(1))]),
            ),
            ActionStmt::return_values(vec![Expr::var("$rest").arith(ArithOp::Add, Expr::int(1))]),
        ]);
        assert!(plan_action(&state(), "main", &def, false).is_ok());
    }

    #[test]
    fn blocks_scope_declarations() {
        let def = action(vec![
            ActionStmt::for_range("$i", Expr::int(1), Expr::int(3), vec![ActionStmt::assign("$inner", Expr::var("$i"))]),
            ActionStmt::return_values(vec![Expr::var("$inner")]),
        ]);
        assert_eq!(plan_err(&def), "caught at plan time: unknown variable `$inner`");
    }
}
