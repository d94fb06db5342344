use derive_more::From;
use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// The AST for the SQL DML and query language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From, EnumAsInner)]
pub enum SqlStatement {
    /// SELECT ...
    Select(Select),
    /// INSERT INTO ...
    Insert(Insert),
    /// UPDATE ...
    Update(Update),
    /// DELETE FROM ...
    Delete(Delete),
}

impl SqlStatement {
    /// Whether executing the statement writes to storage.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Select(_))
    }

    /// Every expression in the statement, in source order.
    pub fn exprs(&self) -> Vec<&Expr> {
        let mut out = vec![];
        match self {
            Self::Select(select) => select.collect_exprs(&mut out),
            Self::Insert(insert) => out.extend(insert.values.iter().flatten()),
            Self::Update(update) => {
                out.extend(update.set.iter().map(|s| &s.value));
                out.extend(update.filter.iter());
            }
            Self::Delete(delete) => out.extend(delete.filter.iter()),
        }
        out
    }
}

/// A table in a FROM clause. Without a namespace the current one is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub namespace: Option<String>,
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            namespace: None,
            table: table.into(),
            alias: None,
        }
    }
}

/// A projection in a SELECT clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultColumn {
    /// SELECT a, b AS c
    Expr { expr: Expr, alias: Option<String> },
    /// SELECT *
    /// SELECT t.*
    Wildcard { table: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingTerm {
    pub expr: Expr,
    pub descending: bool,
    /// `NULLS FIRST` / `NULLS LAST`. Unset follows the Postgres default.
    pub nulls_first: Option<bool>,
}

/// A SELECT statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub distinct: bool,
    pub columns: Vec<ResultColumn>,
    pub from: Option<TableRef>,
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderingTerm>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

impl Select {
    /// `SELECT columns` with no FROM clause.
    pub fn new(columns: Vec<Expr>) -> Self {
        Self {
            distinct: false,
            columns: columns
                .into_iter()
                .map(|expr| ResultColumn::Expr { expr, alias: None })
                .collect(),
            from: None,
            filter: None,
            order_by: vec![],
            limit: None,
            offset: None,
        }
    }

    pub fn from_table(mut self, table: TableRef) -> Self {
        self.from = Some(table);
        self
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    fn collect_exprs<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        for col in &self.columns {
            if let ResultColumn::Expr { expr, .. } = col {
                out.push(expr);
            }
        }
        out.extend(self.filter.iter());
        out.extend(self.order_by.iter().map(|o| &o.expr));
        out.extend(self.limit.iter().chain(self.offset.iter()));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insert {
    pub table: String,
    /// Empty means every column, in table order.
    pub columns: Vec<String>,
    pub values: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetClause {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub table: String,
    pub set: Vec<SetClause>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delete {
    pub table: String,
    pub filter: Option<Expr>,
}

impl SqlStatement {
    /// The table the statement reads or writes, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Select(s) => s.from.as_ref().map(|t| t.table.as_str()),
            Self::Insert(i) => Some(&i.table),
            Self::Update(u) => Some(&u.table),
            Self::Delete(d) => Some(&d.table),
        }
    }
}
