use std::fmt;

use enum_as_inner::EnumAsInner;
use quill_values::{ArithOp, CmpOp, DataType, UnaryOp};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A constant in source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    /// An untyped `NULL`
    Null,
    Int(i64),
    Text(String),
    Bool(bool),
    /// A hex value like `0xFF`
    Blob(Vec<u8>),
    /// A number with a fractional part, kept as written
    Decimal(String),
}

/// The sigil in front of a variable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum VarPrefix {
    /// `$name`: a variable declared by the procedure
    #[strum(serialize = "$")]
    Dollar,
    /// `@name`: a read-only variable supplied by the transaction
    #[strum(serialize = "@")]
    At,
}

/// A `$` or `@` variable. `name` never includes the sigil and is lower case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub prefix: VarPrefix,
    pub name: String,
}

impl Variable {
    /// Parses `$name` or `@name`. A bare name is treated as `$name`.
    pub fn new(name: &str) -> Self {
        let (prefix, rest) = match name.as_bytes().first() {
            Some(b'@') => (VarPrefix::At, &name[1..]),
            Some(b'$') => (VarPrefix::Dollar, &name[1..]),
            _ => (VarPrefix::Dollar, name),
        };
        Self {
            prefix,
            name: rest.to_lowercase(),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.name)
    }
}

/// A call to a function or action, optionally qualified with a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub namespace: Option<String>,
    pub name: String,
    pub args: Vec<Expr>,
    /// `count(DISTINCT x)`
    pub distinct: bool,
    /// `count(*)`; `args` is empty
    pub star: bool,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            args,
            distinct: false,
            star: false,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// How an array is indexed: `arr[i]`, or `arr[from:to]` with either bound optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Subscript {
    Index(Box<Expr>),
    Slice {
        from: Option<Box<Expr>>,
        to: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(ascii_case_insensitive)]
pub enum LogicalOp {
    #[strum(serialize = "AND")]
    And,
    #[strum(serialize = "OR")]
    Or,
}

/// An expression, usable both in procedural code and inside SQL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum Expr {
    Literal(Literal),
    Variable(Variable),
    Call(FunctionCall),
    /// `arr[i]` or `arr[a:b]`
    ArrayAccess {
        array: Box<Expr>,
        subscript: Subscript,
    },
    /// `ARRAY[a, b, c]`
    MakeArray(Vec<Expr>),
    /// `record.field`
    FieldAccess {
        record: Box<Expr>,
        field: String,
    },
    Paren(Box<Expr>),
    Comparison {
        left: Box<Expr>,
        op: CmpOp,
        right: Box<Expr>,
    },
    Logical {
        left: Box<Expr>,
        op: LogicalOp,
        right: Box<Expr>,
    },
    Arithmetic {
        left: Box<Expr>,
        op: ArithOp,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    /// `a IS [NOT] b` and `a IS [NOT] DISTINCT FROM b`
    Is {
        left: Box<Expr>,
        right: Box<Expr>,
        not: bool,
        distinct: bool,
    },
    /// `expr::type`
    Cast {
        expr: Box<Expr>,
        ty: DataType,
    },
    /// A column reference. Only valid inside SQL.
    Column {
        table: Option<String>,
        column: String,
    },
    /// `expr [NOT] BETWEEN lower AND upper`. Only valid inside SQL.
    Between {
        expr: Box<Expr>,
        lower: Box<Expr>,
        upper: Box<Expr>,
        not: bool,
    },
    /// `expr [NOT] IN (a, b, ...)`. Only valid inside SQL.
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        not: bool,
    },
}

impl Expr {
    pub fn null() -> Self {
        Self::Literal(Literal::Null)
    }

    pub fn int(v: i64) -> Self {
        Self::Literal(Literal::Int(v))
    }

    pub fn text(v: impl Into<String>) -> Self {
        Self::Literal(Literal::Text(v.into()))
    }

    pub fn bool(v: bool) -> Self {
        Self::Literal(Literal::Bool(v))
    }

    pub fn decimal(v: impl Into<String>) -> Self {
        Self::Literal(Literal::Decimal(v.into()))
    }

    /// `$name` or `@name`
    pub fn var(name: &str) -> Self {
        Self::Variable(Variable::new(name))
    }

    pub fn column(name: impl Into<String>) -> Self {
        Self::Column {
            table: None,
            column: name.into(),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Call(FunctionCall::new(name, args))
    }

    pub fn array(values: Vec<Expr>) -> Self {
        Self::MakeArray(values)
    }

    pub fn index(self, index: Expr) -> Self {
        Self::ArrayAccess {
            array: Box::new(self),
            subscript: Subscript::Index(Box::new(index)),
        }
    }

    pub fn slice(self, from: Option<Expr>, to: Option<Expr>) -> Self {
        Self::ArrayAccess {
            array: Box::new(self),
            subscript: Subscript::Slice {
                from: from.map(Box::new),
                to: to.map(Box::new),
            },
        }
    }

    pub fn field(self, field: impl Into<String>) -> Self {
        Self::FieldAccess {
            record: Box::new(self),
            field: field.into(),
        }
    }

    pub fn cmp(self, op: CmpOp, right: Expr) -> Self {
        Self::Comparison {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn arith(self, op: ArithOp, right: Expr) -> Self {
        Self::Arithmetic {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn and(self, right: Expr) -> Self {
        Self::Logical {
            left: Box::new(self),
            op: LogicalOp::And,
            right: Box::new(right),
        }
    }

    pub fn or(self, right: Expr) -> Self {
        Self::Logical {
            left: Box::new(self),
            op: LogicalOp::Or,
            right: Box::new(right),
        }
    }

    pub fn cast(self, ty: DataType) -> Self {
        Self::Cast {
            expr: Box::new(self),
            ty,
        }
    }

    /// Calls `f` on this expression and every expression nested in it, outermost first.
    pub fn walk(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Self::Literal(_) | Self::Variable(_) | Self::Column { .. } => {}
            Self::Call(call) => call.args.iter().for_each(|a| a.walk(f)),
            Self::ArrayAccess { array, subscript } => {
                array.walk(f);
                match subscript {
                    Subscript::Index(i) => i.walk(f),
                    Subscript::Slice { from, to } => {
                        from.iter().chain(to.iter()).for_each(|e| e.walk(f));
                    }
                }
            }
            Self::MakeArray(values) => values.iter().for_each(|v| v.walk(f)),
            Self::FieldAccess { record, .. } => record.walk(f),
            Self::Paren(e) | Self::Unary { expr: e, .. } | Self::Cast { expr: e, .. } => e.walk(f),
            Self::Comparison { left, right, .. }
            | Self::Logical { left, right, .. }
            | Self::Arithmetic { left, right, .. }
            | Self::Is { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Self::Between { expr, lower, upper, .. } => {
                expr.walk(f);
                lower.walk(f);
                upper.walk(f);
            }
            Self::InList { expr, list, .. } => {
                expr.walk(f);
                list.iter().for_each(|e| e.walk(f));
            }
        }
    }
}

impl From<Literal> for Expr {
    fn from(lit: Literal) -> Self {
        Self::Literal(lit)
    }
}

impl From<Variable> for Expr {
    fn from(var: Variable) -> Self {
        Self::Variable(var)
    }
}

impl From<FunctionCall> for Expr {
    fn from(call: FunctionCall) -> Self {
        Self::Call(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn variable_names() {
        assert_eq!(Variable::new("$Name"), Variable { prefix: VarPrefix::Dollar, name: "name".into() });
        assert_eq!(Variable::new("@caller").to_string(), "@caller");
        assert_eq!(Variable::new("x").to_string(), "$x");
    }

    #[test]
    fn walk_visits_every_variable() {
        let expr = Expr::var("$a")
            .arith(ArithOp::Add, Expr::call("abs", vec![Expr::var("$b")]))
            .cmp(CmpOp::Lt, Expr::var("$arr").index(Expr::var("$i")));
        let mut names = vec![];
        expr.walk(&mut |e| {
            if let Expr::Variable(v) = e {
                names.push(v.to_string());
            }
        });
        assert_eq!(names, ["$a", "$b", "$arr", "$i"]);
    }
}
