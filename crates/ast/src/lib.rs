//! Syntax trees consumed by the quill interpreter.
//!
//! These are produced by a parser that lives outside this workspace. Every node is
//! serializable so that stored actions can be persisted and planned again on restart.

pub mod action;
pub mod ddl;
pub mod expr;
pub mod sql;
pub mod statement;

pub use action::{ActionStmt, Assignable, IfThen, LoopTerm, ReturnValue};
pub use ddl::{CreateAction, Modifier, NamedType};
pub use expr::{Expr, FunctionCall, Literal, LogicalOp, Subscript, VarPrefix, Variable};
pub use sql::SqlStatement;
pub use statement::{Statement, TopLevel};
