use enum_as_inner::EnumAsInner;
use quill_values::DataType;
use serde::{Deserialize, Serialize};

use crate::expr::{Expr, FunctionCall, Subscript, Variable};
use crate::sql::SqlStatement;

/// The left side of an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Assignable {
    /// `$x := ...`
    Variable(Variable),
    /// `$arr[i] := ...` or `$arr[a:b] := ...`
    ArrayElement { array: Variable, subscript: Subscript },
}

/// What a `FOR` loop iterates over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoopTerm {
    /// `FOR $i IN 1..10`, inclusive on both ends
    Range { start: Expr, end: Expr },
    /// `FOR $x IN ARRAY $arr`
    Array(Expr),
    /// `FOR $row IN my_action(...)`
    Call(FunctionCall),
    /// `FOR $row IN SELECT ...`
    Sql(SqlStatement),
}

/// One `IF`/`ELSEIF` condition and the block it guards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfThen {
    pub condition: Expr,
    pub body: Vec<ActionStmt>,
}

/// What a `RETURN` produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReturnValue {
    /// `RETURN a, b;` or a bare `RETURN;` when empty
    Values(Vec<Expr>),
    /// `RETURN SELECT ...;`
    Sql(SqlStatement),
}

/// A statement in the body of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum ActionStmt {
    /// `$x type;`
    Declare { var: Variable, ty: DataType },
    /// `$x [type] := value;`
    Assign {
        target: Assignable,
        ty: Option<DataType>,
        value: Expr,
    },
    /// `[$a, _ :=] ns.f(...);` where `None` receivers are `_`
    Call {
        receivers: Vec<Option<Variable>>,
        call: FunctionCall,
    },
    ForLoop {
        receiver: Variable,
        term: LoopTerm,
        body: Vec<ActionStmt>,
    },
    /// `IF ... ELSEIF ... ELSE ...`. `ELSE IF` parses to the same node as `ELSEIF`.
    If {
        branches: Vec<IfThen>,
        otherwise: Vec<ActionStmt>,
    },
    Sql(SqlStatement),
    Break,
    Continue,
    Return(ReturnValue),
    /// `RETURN NEXT a, b;` yields one row of a table-returning action
    ReturnNext(Vec<Expr>),
}

impl ActionStmt {
    pub fn assign(name: &str, value: Expr) -> Self {
        Self::Assign {
            target: Assignable::Variable(Variable::new(name)),
            ty: None,
            value,
        }
    }

    pub fn declare(name: &str, ty: DataType) -> Self {
        Self::Declare {
            var: Variable::new(name),
            ty,
        }
    }

    pub fn call(call: FunctionCall) -> Self {
        Self::Call { receivers: vec![], call }
    }

    pub fn for_range(receiver: &str, start: Expr, end: Expr, body: Vec<ActionStmt>) -> Self {
        Self::ForLoop {
            receiver: Variable::new(receiver),
            term: LoopTerm::Range { start, end },
            body,
        }
    }

    pub fn return_values(values: Vec<Expr>) -> Self {
        Self::Return(ReturnValue::Values(values))
    }
}
