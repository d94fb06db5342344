//! The storage collaborator: runs generated SQL inside the caller's transaction.

use quill_ast::ddl::{AlterTable, CreateIndex, CreateTable, DropIndex, DropTable};
use quill_ast::SqlStatement;
use quill_values::Value;
use thiserror::Error;

use crate::catalog::CatalogStore;

/// The name of a result column that has no name.
pub const UNNAMED_COLUMN: &str = "?column?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Row {
    /// A row whose columns are all unnamed.
    pub fn unnamed(values: Vec<Value>) -> Self {
        Self {
            columns: vec![UNNAMED_COLUMN.to_owned(); values.len()],
            values,
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.iter().position(|c| c == column).map(|i| &self.values[i])
    }
}

/// A DML statement or query, rendered and ready to run.
#[derive(Debug)]
pub struct Query<'a> {
    /// The namespace unqualified tables resolve to.
    pub namespace: &'a str,
    /// Postgres text, with `$1, $2, ...` placeholders.
    pub sql: String,
    /// The statement `sql` was rendered from.
    pub statement: &'a SqlStatement,
    /// Bound parameters in placeholder order, keyed by the variable they came
    /// from as written in the statement (`$name`, `@caller`).
    pub params: Vec<(String, Value)>,
}

impl Query<'_> {
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum DdlStatement<'a> {
    CreateTable(&'a CreateTable),
    DropTable(&'a DropTable),
    AlterTable(&'a AlterTable),
    CreateIndex(&'a CreateIndex),
    DropIndex(&'a DropIndex),
}

/// A schema change, rendered and ready to run.
#[derive(Debug)]
pub struct Ddl<'a> {
    pub namespace: &'a str,
    pub sql: String,
    pub statement: DdlStatement<'a>,
}

/// A constraint violation caused by the data a statement wrote, such as a
/// duplicate primary key.
///
/// Storage implementations return it (inside the `anyhow::Error`) so the
/// interpreter can report it to the caller as a user error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("integrity violation: {0}")]
pub struct IntegrityError(pub String);

/// A connection inside an open transaction.
pub trait Db: CatalogStore {
    fn access_mode(&self) -> AccessMode;

    /// Runs `query`, passing each result row to `on_row` in order.
    ///
    /// If `on_row` fails the scan stops and that error is returned.
    fn query(&mut self, query: &Query<'_>, on_row: &mut dyn FnMut(Row) -> anyhow::Result<()>) -> anyhow::Result<()>;

    fn execute_ddl(&mut self, ddl: &Ddl<'_>) -> anyhow::Result<()>;
}
