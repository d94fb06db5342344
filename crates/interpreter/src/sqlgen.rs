//! Renders SQL statements and schema changes to Postgres text.
//!
//! Tables are qualified with their namespace, which Postgres sees as a schema.
//! Procedural values used inside SQL (`$var`, `@caller`, `$row.field`) become
//! numbered placeholders; see [`collect_params`].

use itertools::Itertools;
use quill_ast::ddl::{
    AlterTable, AlterTableAction, ColumnDef, ConstraintDef, CreateIndex, CreateTable, DropIndex, DropTable,
    NamedConstraint,
};
use quill_ast::sql::{Delete, Insert, OrderingTerm, ResultColumn, Select, TableRef, Update};
use quill_ast::{Expr, FunctionCall, Literal, LogicalOp, SqlStatement, Subscript};
use quill_values::{CmpOp, DataType, UnaryOp};

use crate::db::DdlStatement;
use crate::errors::{CatalogError, ExecError, ExecResult};
use crate::functions::builtin;

/// The placeholder name of an expression that is evaluated by the interpreter
/// rather than by SQL, if it is one.
pub fn param_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Variable(v) => Some(v.to_string()),
        Expr::FieldAccess { record, field } => match record.as_ref() {
            Expr::Variable(v) => Some(format!("{v}.{field}")),
            _ => None,
        },
        _ => None,
    }
}

/// Every distinct placeholder expression in `stmt`, in the order placeholders are numbered.
pub fn collect_params(stmt: &SqlStatement) -> Vec<(String, &Expr)> {
    let mut out: Vec<(String, &Expr)> = vec![];
    for expr in stmt.exprs() {
        visit_params(expr, &mut out);
    }
    out
}

fn visit_params<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) {
    if let Some(name) = param_name(expr) {
        if !out.iter().any(|(n, _)| *n == name) {
            out.push((name, expr));
        }
        return;
    }
    match expr {
        Expr::Literal(_) | Expr::Variable(_) | Expr::Column { .. } => {}
        Expr::Call(call) => call.args.iter().for_each(|a| visit_params(a, out)),
        Expr::ArrayAccess { array, subscript } => {
            visit_params(array, out);
            match subscript {
                Subscript::Index(i) => visit_params(i, out),
                Subscript::Slice { from, to } => from.iter().chain(to.iter()).for_each(|e| visit_params(e, out)),
            }
        }
        Expr::MakeArray(values) => values.iter().for_each(|v| visit_params(v, out)),
        Expr::FieldAccess { record, .. } => visit_params(record, out),
        Expr::Paren(e) | Expr::Unary { expr: e, .. } | Expr::Cast { expr: e, .. } => visit_params(e, out),
        Expr::Comparison { left, right, .. }
        | Expr::Logical { left, right, .. }
        | Expr::Arithmetic { left, right, .. }
        | Expr::Is { left, right, .. } => {
            visit_params(left, out);
            visit_params(right, out);
        }
        Expr::Between { expr, lower, upper, .. } => {
            visit_params(expr, out);
            visit_params(lower, out);
            visit_params(upper, out);
        }
        Expr::InList { expr, list, .. } => {
            visit_params(expr, out);
            list.iter().for_each(|e| visit_params(e, out));
        }
    }
}

/// Renders `stmt`, numbering placeholders by their position in `params`.
pub fn render_sql(stmt: &SqlStatement, namespace: &str, params: &[String]) -> ExecResult<String> {
    let w = Writer { namespace, params };
    match stmt {
        SqlStatement::Select(s) => w.select(s),
        SqlStatement::Insert(i) => w.insert(i),
        SqlStatement::Update(u) => w.update(u),
        SqlStatement::Delete(d) => w.delete(d),
    }
}

pub fn render_ddl(stmt: DdlStatement<'_>, namespace: &str) -> ExecResult<String> {
    let w = Writer { namespace, params: &[] };
    match stmt {
        DdlStatement::CreateTable(t) => w.create_table(t),
        DdlStatement::DropTable(t) => Ok(w.drop_table(t)),
        DdlStatement::AlterTable(t) => w.alter_table(t),
        DdlStatement::CreateIndex(i) => Ok(w.create_index(i)),
        DdlStatement::DropIndex(i) => Ok(w.drop_index(i)),
    }
}

struct Writer<'a> {
    namespace: &'a str,
    params: &'a [String],
}

impl Writer<'_> {
    fn table(&self, table: &str) -> String {
        format!("{}.{table}", self.namespace)
    }

    fn table_ref(&self, t: &TableRef) -> String {
        let ns = t.namespace.as_deref().unwrap_or(self.namespace);
        match &t.alias {
            Some(alias) => format!("{ns}.{} AS {alias}", t.table),
            None => format!("{ns}.{}", t.table),
        }
    }

    fn select(&self, s: &Select) -> ExecResult<String> {
        let columns = s
            .columns
            .iter()
            .map(|c| match c {
                ResultColumn::Expr { expr, alias: None } => self.expr(expr),
                ResultColumn::Expr {
                    expr,
                    alias: Some(alias),
                } => Ok(format!("{} AS {alias}", self.expr(expr)?)),
                ResultColumn::Wildcard { table: None } => Ok("*".to_owned()),
                ResultColumn::Wildcard { table: Some(t) } => Ok(format!("{t}.*")),
            })
            .collect::<ExecResult<Vec<_>>>()?;

        let mut sql = format!("SELECT {}{}", if s.distinct { "DISTINCT " } else { "" }, columns.join(", "));
        if let Some(from) = &s.from {
            sql += &format!(" FROM {}", self.table_ref(from));
        }
        if let Some(filter) = &s.filter {
            sql += &format!(" WHERE {}", self.expr(filter)?);
        }
        if !s.order_by.is_empty() {
            let terms = s.order_by.iter().map(|o| self.ordering(o)).collect::<ExecResult<Vec<_>>>()?;
            sql += &format!(" ORDER BY {}", terms.join(", "));
        }
        if let Some(limit) = &s.limit {
            sql += &format!(" LIMIT {}", self.expr(limit)?);
        }
        if let Some(offset) = &s.offset {
            sql += &format!(" OFFSET {}", self.expr(offset)?);
        }
        Ok(sql)
    }

    fn ordering(&self, o: &OrderingTerm) -> ExecResult<String> {
        let mut term = self.expr(&o.expr)?;
        if o.descending {
            term += " DESC";
        }
        match o.nulls_first {
            Some(true) => term += " NULLS FIRST",
            Some(false) => term += " NULLS LAST",
            None => {}
        }
        Ok(term)
    }

    fn insert(&self, i: &Insert) -> ExecResult<String> {
        let rows = i
            .values
            .iter()
            .map(|row| Ok(format!("({})", self.exprs(row)?)))
            .collect::<ExecResult<Vec<_>>>()?;
        let columns = if i.columns.is_empty() {
            String::new()
        } else {
            format!(" ({})", i.columns.join(", "))
        };
        Ok(format!(
            "INSERT INTO {}{columns} VALUES {}",
            self.table(&i.table),
            rows.join(", ")
        ))
    }

    fn update(&self, u: &Update) -> ExecResult<String> {
        let set = u
            .set
            .iter()
            .map(|s| Ok(format!("{} = {}", s.column, self.expr(&s.value)?)))
            .collect::<ExecResult<Vec<_>>>()?;
        let mut sql = format!("UPDATE {} SET {}", self.table(&u.table), set.join(", "));
        if let Some(filter) = &u.filter {
            sql += &format!(" WHERE {}", self.expr(filter)?);
        }
        Ok(sql)
    }

    fn delete(&self, d: &Delete) -> ExecResult<String> {
        let mut sql = format!("DELETE FROM {}", self.table(&d.table));
        if let Some(filter) = &d.filter {
            sql += &format!(" WHERE {}", self.expr(filter)?);
        }
        Ok(sql)
    }

    fn exprs(&self, exprs: &[Expr]) -> ExecResult<String> {
        Ok(exprs.iter().map(|e| self.expr(e)).collect::<ExecResult<Vec<_>>>()?.join(", "))
    }

    fn expr(&self, expr: &Expr) -> ExecResult<String> {
        if let Some(name) = param_name(expr) {
            let pos = self
                .params
                .iter()
                .position(|p| *p == name)
                .ok_or_else(|| ExecError::Internal(format!("`{name}` was not bound as a parameter")))?;
            return Ok(format!("${}", pos + 1));
        }
        Ok(match expr {
            Expr::Literal(lit) => literal(lit),
            Expr::Variable(v) => return Err(ExecError::Internal(format!("`{v}` was not bound as a parameter"))),
            Expr::Call(call) => self.call(call)?,
            Expr::ArrayAccess { array, subscript } => {
                let array = self.expr(array)?;
                match subscript {
                    Subscript::Index(i) => format!("({array})[{}]", self.expr(i)?),
                    Subscript::Slice { from, to } => {
                        let bound = |b: &Option<Box<Expr>>| b.as_deref().map(|e| self.expr(e)).transpose();
                        format!(
                            "({array})[{}:{}]",
                            bound(from)?.unwrap_or_default(),
                            bound(to)?.unwrap_or_default()
                        )
                    }
                }
            }
            Expr::MakeArray(values) => format!("ARRAY[{}]", self.exprs(values)?),
            Expr::FieldAccess { record, field } => format!("({}).{field}", self.expr(record)?),
            Expr::Paren(e) => format!("({})", self.expr(e)?),
            Expr::Comparison { left, op, right } => format!("{} {} {}", self.expr(left)?, cmp_op(*op), self.expr(right)?),
            Expr::Logical { left, op, right } => {
                let op = match op {
                    LogicalOp::And => "AND",
                    LogicalOp::Or => "OR",
                };
                format!("{} {op} {}", self.expr(left)?, self.expr(right)?)
            }
            Expr::Arithmetic { left, op, right } => format!("{} {op} {}", self.expr(left)?, self.expr(right)?),
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => format!("NOT {}", self.expr(expr)?),
                op => format!("{op}{}", self.expr(expr)?),
            },
            Expr::Is {
                left,
                right,
                not,
                distinct,
            } => format!(
                "{} IS {}{}{}",
                self.expr(left)?,
                if *not { "NOT " } else { "" },
                if *distinct { "DISTINCT FROM " } else { "" },
                self.expr(right)?
            ),
            Expr::Cast { expr, ty } => format!("CAST({} AS {})", self.expr(expr)?, type_name(ty)?),
            Expr::Column { table: Some(t), column } => format!("{t}.{column}"),
            Expr::Column { table: None, column } => column.clone(),
            Expr::Between {
                expr,
                lower,
                upper,
                not,
            } => format!(
                "{} {}BETWEEN {} AND {}",
                self.expr(expr)?,
                if *not { "NOT " } else { "" },
                self.expr(lower)?,
                self.expr(upper)?
            ),
            Expr::InList { expr, list, not } => format!(
                "{} {}IN ({})",
                self.expr(expr)?,
                if *not { "NOT " } else { "" },
                self.exprs(list)?
            ),
        })
    }

    fn call(&self, call: &FunctionCall) -> ExecResult<String> {
        let func = match (&call.namespace, builtin(&call.name)) {
            (None, Some(f)) => f,
            _ => {
                return Err(CatalogError::UnknownFunction {
                    namespace: call.namespace.clone().unwrap_or_else(|| self.namespace.to_owned()),
                    name: call.name.clone(),
                }
                .into());
            }
        };
        if call.star {
            return Ok(format!("{}(*)", func.name));
        }
        let mut args = call.args.iter().map(|a| self.expr(a)).collect::<ExecResult<Vec<_>>>()?;
        if call.distinct {
            if let Some(first) = args.first_mut() {
                *first = format!("DISTINCT {first}");
            }
        }
        Ok(func.render_sql(&args))
    }

    fn create_table(&self, t: &CreateTable) -> ExecResult<String> {
        let mut defs = t.columns.iter().map(|c| self.column_def(c)).collect::<ExecResult<Vec<_>>>()?;
        for c in &t.constraints {
            defs.push(self.constraint(c)?);
        }
        Ok(format!(
            "CREATE TABLE {}{} ({})",
            if t.if_not_exists { "IF NOT EXISTS " } else { "" },
            self.table(&t.name),
            defs.join(", ")
        ))
    }

    fn column_def(&self, c: &ColumnDef) -> ExecResult<String> {
        let mut def = format!("{} {}", c.name, type_name(&c.ty)?);
        if c.primary_key {
            def += " PRIMARY KEY";
        }
        if c.not_null {
            def += " NOT NULL";
        }
        if c.unique {
            def += " UNIQUE";
        }
        if let Some(default) = &c.default {
            def += &format!(" DEFAULT {}", self.expr(default)?);
        }
        Ok(def)
    }

    fn constraint(&self, c: &NamedConstraint) -> ExecResult<String> {
        let body = match &c.constraint {
            ConstraintDef::PrimaryKey(cols) => format!("PRIMARY KEY ({})", cols.join(", ")),
            ConstraintDef::Unique(cols) => format!("UNIQUE ({})", cols.join(", ")),
            ConstraintDef::Check(e) => format!("CHECK ({})", self.expr(e)?),
            ConstraintDef::ForeignKey {
                columns,
                ref_table,
                ref_columns,
            } => format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                columns.join(", "),
                self.table(ref_table),
                ref_columns.join(", ")
            ),
        };
        Ok(match &c.name {
            Some(name) => format!("CONSTRAINT {name} {body}"),
            None => body,
        })
    }

    fn drop_table(&self, t: &DropTable) -> String {
        format!(
            "DROP TABLE {}{}{}",
            if t.if_exists { "IF EXISTS " } else { "" },
            t.tables.iter().map(|name| self.table(name)).join(", "),
            if t.cascade { " CASCADE" } else { "" }
        )
    }

    fn alter_table(&self, t: &AlterTable) -> ExecResult<String> {
        let action = match &t.action {
            AlterTableAction::AddColumn { name, ty } => format!("ADD COLUMN {name} {}", type_name(ty)?),
            AlterTableAction::DropColumn(c) => format!("DROP COLUMN {c}"),
            AlterTableAction::RenameColumn { from, to } => format!("RENAME COLUMN {from} TO {to}"),
            AlterTableAction::RenameTable(to) => format!("RENAME TO {to}"),
            AlterTableAction::SetNotNull(c) => format!("ALTER COLUMN {c} SET NOT NULL"),
            AlterTableAction::DropNotNull(c) => format!("ALTER COLUMN {c} DROP NOT NULL"),
            AlterTableAction::SetDefault { column, value } => {
                format!("ALTER COLUMN {column} SET DEFAULT {}", self.expr(value)?)
            }
            AlterTableAction::DropDefault(c) => format!("ALTER COLUMN {c} DROP DEFAULT"),
            AlterTableAction::AddConstraint(c) => format!("ADD {}", self.constraint(c)?),
            AlterTableAction::DropConstraint(name) => format!("DROP CONSTRAINT {name}"),
        };
        Ok(format!("ALTER TABLE {} {action}", self.table(&t.table)))
    }

    fn create_index(&self, i: &CreateIndex) -> String {
        format!(
            "CREATE {}INDEX {}{} ON {} ({})",
            if i.unique { "UNIQUE " } else { "" },
            if i.if_not_exists { "IF NOT EXISTS " } else { "" },
            i.name,
            self.table(&i.table),
            i.columns.join(", ")
        )
    }

    fn drop_index(&self, i: &DropIndex) -> String {
        format!(
            "DROP INDEX {}{}",
            if i.if_exists { "IF EXISTS " } else { "" },
            self.table(&i.name)
        )
    }
}

fn literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_owned(),
        Literal::Int(i) => i.to_string(),
        Literal::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Literal::Bool(true) => "TRUE".to_owned(),
        Literal::Bool(false) => "FALSE".to_owned(),
        Literal::Blob(b) => format!("'\\x{}'::bytea", hex::encode(b)),
        Literal::Decimal(d) => d.clone(),
    }
}

fn cmp_op(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "=",
        CmpOp::NotEq => "<>",
        CmpOp::Lt => "<",
        CmpOp::LtEq => "<=",
        CmpOp::Gt => ">",
        CmpOp::GtEq => ">=",
        CmpOp::Is => "IS",
        CmpOp::IsDistinctFrom => "IS DISTINCT FROM",
    }
}

fn type_name(ty: &DataType) -> ExecResult<String> {
    match ty {
        DataType::Scalar(_) | DataType::Array(_) => Ok(ty.to_string()),
        other => Err(ExecError::Internal(format!("type `{other}` cannot be stored"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quill_ast::sql::SetClause;
    use quill_values::ArithOp;

    fn render(stmt: SqlStatement) -> String {
        let params: Vec<String> = collect_params(&stmt).into_iter().map(|(n, _)| n).collect();
        render_sql(&stmt, "main", &params).unwrap()
    }

    #[test]
    fn statements() {
        struct TestCase {
            stmt: SqlStatement,
            sql: &'static str,
        }

        for TestCase { stmt, sql } in [
            TestCase {
                stmt: Select::new(vec![Expr::column("name"), Expr::column("age")])
                    .from_table(TableRef::new("users"))
                    .filter(Expr::column("name").cmp(CmpOp::Eq, Expr::var("$name")))
                    .into(),
                sql: "SELECT name, age FROM main.users WHERE name = $1",
            },
            TestCase {
                stmt: Insert {
                    table: "users".into(),
                    columns: vec!["id".into(), "name".into()],
                    values: vec![vec![Expr::int(1), Expr::text("O'Brien")], vec![Expr::var("$id"), Expr::var("@caller")]],
                }
                .into(),
                sql: "INSERT INTO main.users (id, name) VALUES (1, 'O''Brien'), ($1, $2)",
            },
            TestCase {
                stmt: Update {
                    table: "users".into(),
                    set: vec![SetClause {
                        column: "age".into(),
                        value: Expr::column("age").arith(ArithOp::Add, Expr::var("$n")),
                    }],
                    filter: Some(Expr::column("id").cmp(CmpOp::Eq, Expr::var("$row").field("id"))),
                }
                .into(),
                sql: "UPDATE main.users SET age = age + $1 WHERE id = $2",
            },
            TestCase {
                stmt: Delete {
                    table: "users".into(),
                    filter: Some(Expr::column("age").cmp(CmpOp::Eq, Expr::var("$n"))),
                }
                .into(),
                sql: "DELETE FROM main.users WHERE age = $1",
            },
            TestCase {
                stmt: Select::new(vec![Expr::Call(FunctionCall {
                    star: true,
                    ..FunctionCall::new("count", vec![])
                })])
                .from_table(TableRef::new("users"))
                .into(),
                sql: "SELECT count(*) FROM main.users",
            },
        ] {
            assert_eq!(render(stmt), sql);
        }
    }

    #[test]
    fn params_are_deduplicated_in_order() {
        let stmt: SqlStatement = Select::new(vec![
            Expr::var("$b"),
            Expr::var("$a").arith(ArithOp::Add, Expr::var("$b")),
            Expr::var("$rec").field("x"),
        ])
        .into();
        let names: Vec<String> = collect_params(&stmt).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["$b", "$a", "$rec.x"]);
        assert_eq!(render(stmt), "SELECT $1, $2 + $1, $3");
    }

    #[test]
    fn ddl() {
        let table = CreateTable {
            if_not_exists: true,
            name: "users".into(),
            columns: vec![
                ColumnDef::new("id", DataType::INT).primary_key(),
                ColumnDef::new("tags", DataType::Array(quill_values::ScalarType::Text)).not_null(),
            ],
            constraints: vec![NamedConstraint {
                name: Some("uq".into()),
                constraint: ConstraintDef::Unique(vec!["tags".into()]),
            }],
        };
        assert_eq!(
            render_ddl(DdlStatement::CreateTable(&table), "app").unwrap(),
            "CREATE TABLE IF NOT EXISTS app.users (id int8 PRIMARY KEY, tags text[] NOT NULL, CONSTRAINT uq UNIQUE (tags))"
        );
        let index = CreateIndex {
            if_not_exists: false,
            name: "by_name".into(),
            table: "users".into(),
            columns: vec!["name".into()],
            unique: true,
        };
        assert_eq!(
            render_ddl(DdlStatement::CreateIndex(&index), "main").unwrap(),
            "CREATE UNIQUE INDEX by_name ON main.users (name)"
        );
    }

    #[test]
    fn unbound_variables_fail() {
        let stmt: SqlStatement = Select::new(vec![Expr::var("$x")]).into();
        assert!(render_sql(&stmt, "main", &[]).is_err());
    }
}
