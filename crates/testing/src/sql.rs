//! Evaluates rendered queries directly from their syntax tree.
//!
//! Covers the single-table SQL the interpreter generates: filters, projections,
//! whole-table aggregates, ordering, DISTINCT and LIMIT/OFFSET, plus the three DML
//! statements with constraint checks.

use std::cmp::Ordering;

use anyhow::{anyhow, bail};
use quill_ast::sql::{Delete, Insert, OrderingTerm, ResultColumn, Select, Update};
use quill_ast::{Expr, Literal, LogicalOp, SqlStatement, Subscript};
use quill_interpreter::functions::FunctionKind;
use quill_interpreter::sqlgen::param_name;
use quill_interpreter::{Query, Row, UNNAMED_COLUMN, builtin};
use quill_values::{ArrayValue, CmpOp, Decimal, UnaryOp, Value};

use crate::store::Image;

pub(crate) fn run(image: &mut Image, query: &Query<'_>, on_row: &mut dyn FnMut(Row) -> anyhow::Result<()>) -> anyhow::Result<()> {
    let eval = Eval { query };
    match query.statement {
        SqlStatement::Select(select) => eval.select(image, select, on_row),
        SqlStatement::Insert(insert) => eval.insert(image, insert),
        SqlStatement::Update(update) => eval.update(image, update),
        SqlStatement::Delete(delete) => eval.delete(image, delete),
    }
}

/// The columns visible to an expression.
struct Source {
    qualifier: Option<String>,
    columns: Vec<String>,
}

impl Source {
    fn empty() -> Self {
        Self {
            qualifier: None,
            columns: vec![],
        }
    }

    fn position(&self, table: Option<&str>, column: &str) -> anyhow::Result<usize> {
        if let Some(table) = table
            && self.qualifier.as_deref() != Some(table)
        {
            bail!("missing FROM-clause entry for table \"{table}\"");
        }
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| anyhow!("column \"{column}\" does not exist"))
    }
}

/// What the columns of an expression read from.
#[derive(Clone, Copy)]
enum Input<'a> {
    None,
    Row(&'a [Value]),
    /// A whole group, for aggregates.
    Group(&'a [&'a [Value]]),
}

struct Eval<'q> {
    query: &'q Query<'q>,
}

impl Eval<'_> {
    fn expr(&self, expr: &Expr, src: &Source, input: Input<'_>) -> anyhow::Result<Value> {
        if let Some(name) = param_name(expr) {
            return self
                .query
                .param(&name)
                .cloned()
                .ok_or_else(|| anyhow!("no value bound for {name}"));
        }
        Ok(match expr {
            Expr::Literal(lit) => literal(lit)?,
            Expr::Variable(v) => bail!("no value bound for {v}"),
            Expr::Column { table, column } => {
                let i = src.position(table.as_deref(), column)?;
                match input {
                    Input::Row(row) => row[i].clone(),
                    Input::Group(rows) => rows.first().map(|r| r[i].clone()).unwrap_or(Value::Null),
                    Input::None => bail!("column \"{column}\" does not exist"),
                }
            }
            Expr::Call(call) => {
                let f = builtin(&call.name).ok_or_else(|| anyhow!("function {}() does not exist", call.name))?;
                if f.kind == FunctionKind::Aggregate {
                    let Input::Group(rows) = input else {
                        bail!("aggregate functions are not allowed here");
                    };
                    let mut values = vec![];
                    for row in rows {
                        let value = match call.args.first() {
                            Some(arg) if !call.star => self.expr(arg, src, Input::Row(row))?,
                            _ => Value::Null,
                        };
                        if !(call.distinct && values.contains(&value)) {
                            values.push(value);
                        }
                    }
                    f.aggregate(&values, call.star)?
                } else {
                    let args = call
                        .args
                        .iter()
                        .map(|a| self.expr(a, src, input))
                        .collect::<anyhow::Result<Vec<_>>>()?;
                    f.evaluate(&args)?
                }
            }
            Expr::ArrayAccess { array, subscript } => {
                let array = self.expr(array, src, input)?;
                let Value::Array(array) = array else {
                    bail!("cannot subscript type {} because it is not an array", array.data_type());
                };
                match subscript {
                    Subscript::Index(i) => array.get(self.int(i, src, input)?.unwrap_or(0))?,
                    Subscript::Slice { from, to } => {
                        let from = from.as_deref().map(|e| self.int(e, src, input)).transpose()?.flatten();
                        let to = to.as_deref().map(|e| self.int(e, src, input)).transpose()?.flatten();
                        Value::Array(array.slice(from, to)?)
                    }
                }
            }
            Expr::MakeArray(values) => {
                let values = values
                    .iter()
                    .map(|v| self.expr(v, src, input))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Value::Array(ArrayValue::from_values(values)?)
            }
            Expr::FieldAccess { record, field } => match self.expr(record, src, input)? {
                Value::Record(r) => r
                    .get(field)
                    .cloned()
                    .ok_or_else(|| anyhow!("record has no field \"{field}\""))?,
                other => bail!("cannot access field \"{field}\" of type {}", other.data_type()),
            },
            Expr::Paren(e) => self.expr(e, src, input)?,
            Expr::Comparison { left, op, right } => {
                self.expr(left, src, input)?.compare(&self.expr(right, src, input)?, *op)?
            }
            Expr::Logical { left, op, right } => {
                let left = self.expr(left, src, input)?.truthy();
                let right = self.expr(right, src, input)?.truthy();
                let out = match (op, left, right) {
                    (LogicalOp::And, Some(false), _) | (LogicalOp::And, _, Some(false)) => Some(false),
                    (LogicalOp::And, Some(true), Some(true)) => Some(true),
                    (LogicalOp::Or, Some(true), _) | (LogicalOp::Or, _, Some(true)) => Some(true),
                    (LogicalOp::Or, Some(false), Some(false)) => Some(false),
                    _ => None,
                };
                Value::Bool(out)
            }
            Expr::Arithmetic { left, op, right } => {
                self.expr(left, src, input)?.arithmetic(&self.expr(right, src, input)?, *op)?
            }
            Expr::Unary { op, expr } => self.expr(expr, src, input)?.unary(*op)?,
            Expr::Is {
                left,
                right,
                not,
                distinct,
            } => {
                let op = if *distinct { CmpOp::IsDistinctFrom } else { CmpOp::Is };
                let out = self.expr(left, src, input)?.compare(&self.expr(right, src, input)?, op)?;
                if *not { out.unary(UnaryOp::Not)? } else { out }
            }
            Expr::Cast { expr, ty } => self.expr(expr, src, input)?.cast(ty)?,
            Expr::Between {
                expr,
                lower,
                upper,
                not,
            } => {
                let value = self.expr(expr, src, input)?;
                let above = value.compare(&self.expr(lower, src, input)?, CmpOp::GtEq)?.truthy();
                let below = value.compare(&self.expr(upper, src, input)?, CmpOp::LtEq)?.truthy();
                let within = match (above, below) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                };
                Value::Bool(within.map(|w| w != *not))
            }
            Expr::InList { expr, list, not } => {
                let value = self.expr(expr, src, input)?;
                let mut found = Some(false);
                for candidate in list {
                    match value.compare(&self.expr(candidate, src, input)?, CmpOp::Eq)?.truthy() {
                        Some(true) => {
                            found = Some(true);
                            break;
                        }
                        None => found = None,
                        Some(false) => {}
                    }
                }
                Value::Bool(found.map(|f| f != *not))
            }
        })
    }

    fn int(&self, expr: &Expr, src: &Source, input: Input<'_>) -> anyhow::Result<Option<i64>> {
        match self.expr(expr, src, input)?.cast(&quill_values::DataType::INT)? {
            Value::Int(v) => Ok(v),
            other => bail!("expected an integer, found {}", other.data_type()),
        }
    }

    fn matches(&self, filter: Option<&Expr>, src: &Source, row: &[Value]) -> anyhow::Result<bool> {
        match filter {
            Some(f) => Ok(self.expr(f, src, Input::Row(row))?.truthy() == Some(true)),
            None => Ok(true),
        }
    }

    fn select(
        &self,
        image: &Image,
        select: &Select,
        on_row: &mut dyn FnMut(Row) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let (src, rows) = match &select.from {
            Some(from) => {
                let namespace = from.namespace.as_deref().unwrap_or(self.query.namespace);
                let table = image.table(namespace, &from.table)?;
                let src = Source {
                    qualifier: Some(from.alias.clone().unwrap_or_else(|| from.table.clone())),
                    columns: table.schema.columns.iter().map(|c| c.name.clone()).collect(),
                };
                (src, table.rows.clone())
            }
            None => (Source::empty(), vec![vec![]]),
        };

        let mut kept = vec![];
        for row in &rows {
            if self.matches(select.filter.as_ref(), &src, row)? {
                kept.push(row.as_slice());
            }
        }

        let names = output_names(&select.columns, &src)?;
        let aggregate = select.columns.iter().any(|c| match c {
            ResultColumn::Expr { expr, .. } => has_aggregate(expr),
            ResultColumn::Wildcard { .. } => false,
        });
        let inputs: Vec<Input<'_>> = if aggregate {
            vec![Input::Group(&kept)]
        } else {
            kept.iter().map(|row| Input::Row(row)).collect()
        };

        // (sort keys, output values)
        let mut out: Vec<(Vec<Value>, Vec<Value>)> = vec![];
        for input in inputs {
            let mut values = vec![];
            for column in &select.columns {
                match column {
                    ResultColumn::Expr { expr, .. } => values.push(self.expr(expr, &src, input)?),
                    ResultColumn::Wildcard { .. } => match input {
                        Input::Row(row) => values.extend(row.iter().cloned()),
                        _ => bail!("SELECT * is not allowed with aggregates"),
                    },
                }
            }
            let mut keys = vec![];
            for term in &select.order_by {
                keys.push(self.order_key(term, &src, input, &names, &values)?);
            }
            out.push((keys, values));
        }

        let mut failure = None;
        out.sort_by(|(a, _), (b, _)| {
            for ((x, y), term) in a.iter().zip(b).zip(&select.order_by) {
                match compare(x, y, term) {
                    Ok(Ordering::Equal) => {}
                    Ok(ord) => return ord,
                    Err(e) => {
                        failure.get_or_insert(e);
                        return Ordering::Equal;
                    }
                }
            }
            Ordering::Equal
        });
        if let Some(e) = failure {
            return Err(e);
        }

        if select.distinct {
            let mut seen: Vec<Vec<Value>> = vec![];
            out.retain(|(_, values)| {
                if seen.contains(values) {
                    false
                } else {
                    seen.push(values.clone());
                    true
                }
            });
        }

        let offset = match &select.offset {
            Some(e) => self.int(e, &Source::empty(), Input::None)?.unwrap_or(0).max(0) as usize,
            None => 0,
        };
        let limit = match &select.limit {
            Some(e) => self.int(e, &Source::empty(), Input::None)?.map(|l| l.max(0) as usize),
            None => None,
        };
        for (_, values) in out.into_iter().skip(offset).take(limit.unwrap_or(usize::MAX)) {
            on_row(Row {
                columns: names.clone(),
                values,
            })?;
        }
        Ok(())
    }

    /// ORDER BY may name an output column by its alias.
    fn order_key(
        &self,
        term: &OrderingTerm,
        src: &Source,
        input: Input<'_>,
        names: &[String],
        values: &[Value],
    ) -> anyhow::Result<Value> {
        if let Expr::Column { table: None, column } = &term.expr
            && !src.columns.contains(column)
            && let Some(i) = names.iter().position(|n| n == column)
        {
            return Ok(values[i].clone());
        }
        self.expr(&term.expr, src, input)
    }

    fn insert(&self, image: &mut Image, insert: &Insert) -> anyhow::Result<()> {
        let table = image.table_mut(self.query.namespace, &insert.table)?;
        let targets = if insert.columns.is_empty() {
            (0..table.schema.columns.len()).collect()
        } else {
            insert
                .columns
                .iter()
                .map(|c| table.column_index(c))
                .collect::<anyhow::Result<Vec<_>>>()?
        };

        for exprs in &insert.values {
            if exprs.len() > targets.len() {
                bail!("INSERT has more expressions than target columns");
            }
            if exprs.len() < targets.len() {
                bail!("INSERT has more target columns than expressions");
            }
            let mut row = vec![];
            for column in &table.schema.columns {
                row.push(match table.defaults.get(&column.name) {
                    Some(default) => self.expr(default, &Source::empty(), Input::None)?.cast(&column.ty)?,
                    None => Value::null_of(&column.ty),
                });
            }
            for (&i, expr) in targets.iter().zip(exprs) {
                row[i] = self
                    .expr(expr, &Source::empty(), Input::None)?
                    .cast(&table.schema.columns[i].ty)?;
            }
            table.rows.push(row);
        }
        table.check_integrity()
    }

    fn update(&self, image: &mut Image, update: &Update) -> anyhow::Result<()> {
        let table = image.table_mut(self.query.namespace, &update.table)?;
        let src = Source {
            qualifier: Some(update.table.clone()),
            columns: table.schema.columns.iter().map(|c| c.name.clone()).collect(),
        };
        let targets = update
            .set
            .iter()
            .map(|s| table.column_index(&s.column))
            .collect::<anyhow::Result<Vec<_>>>()?;

        for r in 0..table.rows.len() {
            if !self.matches(update.filter.as_ref(), &src, &table.rows[r])? {
                continue;
            }
            let old = table.rows[r].clone();
            for (&i, set) in targets.iter().zip(&update.set) {
                let value = self.expr(&set.value, &src, Input::Row(&old))?;
                table.rows[r][i] = value.cast(&table.schema.columns[i].ty)?;
            }
        }
        table.check_integrity()
    }

    fn delete(&self, image: &mut Image, delete: &Delete) -> anyhow::Result<()> {
        let table = image.table_mut(self.query.namespace, &delete.table)?;
        let src = Source {
            qualifier: Some(delete.table.clone()),
            columns: table.schema.columns.iter().map(|c| c.name.clone()).collect(),
        };
        let mut doomed = vec![];
        for row in &table.rows {
            doomed.push(self.matches(delete.filter.as_ref(), &src, row)?);
        }
        let mut doomed = doomed.into_iter();
        table.rows.retain(|_| !doomed.next().unwrap_or(false));
        Ok(())
    }
}

fn literal(lit: &Literal) -> anyhow::Result<Value> {
    Ok(match lit {
        Literal::Null => Value::Null,
        Literal::Int(v) => Value::int(*v),
        Literal::Text(v) => Value::text(v.clone()),
        Literal::Bool(v) => Value::bool(*v),
        Literal::Blob(v) => Value::blob(v.clone()),
        Literal::Decimal(v) => Value::Decimal(Decimal::parse_literal(v)?),
    })
}

fn has_aggregate(expr: &Expr) -> bool {
    let mut found = false;
    expr.walk(&mut |e| {
        if let Expr::Call(call) = e
            && builtin(&call.name).is_some_and(|f| f.kind == FunctionKind::Aggregate)
        {
            found = true;
        }
    });
    found
}

fn output_names(columns: &[ResultColumn], src: &Source) -> anyhow::Result<Vec<String>> {
    let mut names = vec![];
    for column in columns {
        match column {
            ResultColumn::Expr { alias: Some(alias), .. } => names.push(alias.clone()),
            ResultColumn::Expr { expr, alias: None } => names.push(expr_name(expr)),
            ResultColumn::Wildcard { table } => {
                if let Some(table) = table
                    && src.qualifier.as_deref() != Some(table.as_str())
                {
                    bail!("missing FROM-clause entry for table \"{table}\"");
                }
                names.extend(src.columns.iter().cloned());
            }
        }
    }
    Ok(names)
}

/// The name Postgres gives an unaliased output column.
fn expr_name(expr: &Expr) -> String {
    match expr {
        Expr::Column { column, .. } => column.clone(),
        Expr::Call(call) => call.name.clone(),
        Expr::Cast { expr, .. } | Expr::Paren(expr) => expr_name(expr),
        Expr::FieldAccess { field, .. } => field.clone(),
        _ => UNNAMED_COLUMN.to_owned(),
    }
}

fn compare(x: &Value, y: &Value, term: &OrderingTerm) -> anyhow::Result<Ordering> {
    let nulls_first = term.nulls_first.unwrap_or(term.descending);
    let ord = match (x.is_null(), y.is_null()) {
        (true, true) => return Ok(Ordering::Equal),
        (true, false) => return Ok(if nulls_first { Ordering::Less } else { Ordering::Greater }),
        (false, true) => return Ok(if nulls_first { Ordering::Greater } else { Ordering::Less }),
        (false, false) if x.compare(y, CmpOp::Lt)?.truthy() == Some(true) => Ordering::Less,
        (false, false) if x.compare(y, CmpOp::Gt)?.truthy() == Some(true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
    };
    Ok(if term.descending { ord.reverse() } else { ord })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn term(descending: bool, nulls_first: Option<bool>) -> OrderingTerm {
        OrderingTerm {
            expr: Expr::column("x"),
            descending,
            nulls_first,
        }
    }

    #[test]
    fn null_ordering() {
        struct TestCase {
            term: OrderingTerm,
            expected: Ordering,
        }
        let cases = [
            TestCase {
                term: term(false, None),
                expected: Ordering::Greater,
            },
            TestCase {
                term: term(true, None),
                expected: Ordering::Less,
            },
            TestCase {
                term: term(false, Some(true)),
                expected: Ordering::Less,
            },
        ];
        for case in cases {
            assert_eq!(compare(&Value::Int(None), &Value::int(1), &case.term).unwrap(), case.expected);
        }
        assert_eq!(
            compare(&Value::int(2), &Value::int(1), &term(true, None)).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn output_column_names() {
        let columns = vec![
            ResultColumn::Expr {
                expr: Expr::column("name"),
                alias: None,
            },
            ResultColumn::Expr {
                expr: Expr::call("count", vec![]),
                alias: None,
            },
            ResultColumn::Expr {
                expr: Expr::int(1),
                alias: None,
            },
            ResultColumn::Expr {
                expr: Expr::int(1),
                alias: Some("one".into()),
            },
        ];
        let names = output_names(&columns, &Source::empty()).unwrap();
        assert_eq!(names, ["name", "count", UNNAMED_COLUMN, "one"]);
    }

    #[test]
    fn aggregates_are_found_when_nested() {
        assert!(has_aggregate(&Expr::call("coalesce", vec![Expr::call("max", vec![Expr::column("x")])])));
        assert!(!has_aggregate(&Expr::call("abs", vec![Expr::column("x")])));
    }
}
