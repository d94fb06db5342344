#![allow(dead_code)]

use quill_ast::ddl::{ColumnDef, CreateTable, GrantOrRevoke, GrantSubject};
use quill_ast::sql::{Insert, ResultColumn, Select, TableRef};
use quill_ast::{ActionStmt, Expr, FunctionCall, SqlStatement, Statement, TopLevel};
use quill_testing::{Harness, init_logging};
use quill_values::DataType;

pub fn harness() -> Harness {
    init_logging();
    Harness::new().unwrap()
}

/// `CREATE TABLE users (id int8 PRIMARY KEY, name text NOT NULL, age int8)`
pub fn users_table() -> Statement {
    Statement::new(CreateTable {
        if_not_exists: false,
        name: "users".into(),
        columns: vec![
            ColumnDef::new("id", DataType::INT).primary_key(),
            ColumnDef::new("name", DataType::TEXT).not_null(),
            ColumnDef::new("age", DataType::INT),
        ],
        constraints: vec![],
    })
}

pub fn sql(stmt: impl Into<SqlStatement>) -> Statement {
    Statement::new(TopLevel::Sql(stmt.into()))
}

pub fn stmt(stmt: ActionStmt) -> Statement {
    Statement::new(TopLevel::Action(stmt))
}

pub fn insert(table: &str, columns: &[&str], rows: Vec<Vec<Expr>>) -> Insert {
    Insert {
        table: table.into(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        values: rows,
    }
}

pub fn select(columns: &[&str], table: &str) -> Select {
    Select::new(columns.iter().map(|c| Expr::column(*c)).collect()).from_table(TableRef::new(table))
}

pub fn count_star() -> Select {
    Select {
        columns: vec![ResultColumn::Expr {
            expr: Expr::Call(FunctionCall {
                star: true,
                ..FunctionCall::new("count", vec![])
            }),
            alias: None,
        }],
        ..Select::new(vec![])
    }
}

pub fn grant(privileges: &[&str], role: &str, namespace: Option<&str>) -> Statement {
    grant_or_revoke(true, privileges, role, namespace)
}

pub fn revoke(privileges: &[&str], role: &str, namespace: Option<&str>) -> Statement {
    grant_or_revoke(false, privileges, role, namespace)
}

fn grant_or_revoke(is_grant: bool, privileges: &[&str], role: &str, namespace: Option<&str>) -> Statement {
    Statement::new(GrantOrRevoke {
        is_grant,
        if_: false,
        subject: GrantSubject::Privileges {
            privileges: privileges.iter().map(|p| p.to_string()).collect(),
            role: role.into(),
        },
        namespace: namespace.map(Into::into),
    })
}
