use quill_values::{DataType, ValueError};
use thiserror::Error;

use crate::db::IntegrityError;
use crate::privilege::Privilege;

#[derive(Error, Debug)]
pub enum TypeError {
    #[error("expected {expected}, found {found}")]
    Mismatch { expected: String, found: String },
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("`{0}` is not a known context variable")]
    UnknownContextVariable(String),
    #[error("cannot assign to `{0}`: context variables are read-only")]
    ReadOnlyVariable(String),
    #[error("invalid variable name `{name}`: {reason}")]
    InvalidVariableName { name: String, reason: String },
    #[error("cannot assign a value of type {found} to `{name}` of type {expected}")]
    Assign {
        name: String,
        expected: DataType,
        found: DataType,
    },
    #[error("variable `{0}` is already declared in this block")]
    AlreadyDeclared(String),
    #[error("record has no field `{0}`")]
    UnknownField(String),
    #[error("{0} is only valid inside a loop")]
    LoopControl(&'static str),
    #[error("column references such as `{0}` are only valid inside SQL")]
    ColumnOutsideSql(String),
    #[error("aggregate `{0}` is only valid inside SQL")]
    AggregateOutsideSql(String),
    #[error("RETURN is only valid inside an action")]
    ReturnOutsideAction,
}

impl TypeError {
    pub fn mismatch(expected: impl ToString, found: impl ToString) -> Self {
        Self::Mismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("namespace `{0}` does not exist")]
    UnknownNamespace(String),
    #[error("namespace `{0}` already exists")]
    NamespaceExists(String),
    #[error("table `{table}` does not exist in namespace `{namespace}`")]
    UnknownTable { namespace: String, table: String },
    #[error("table `{0}` already exists")]
    TableExists(String),
    #[error("column `{column}` does not exist in table `{table}`")]
    UnknownColumn { table: String, column: String },
    #[error("column `{column}` already exists in table `{table}`")]
    ColumnExists { table: String, column: String },
    #[error("index `{0}` does not exist")]
    UnknownIndex(String),
    #[error("index `{0}` already exists")]
    IndexExists(String),
    #[error("`{name}` is not a known action or function in namespace `{namespace}`")]
    UnknownFunction { namespace: String, name: String },
    #[error("action or function `{0}` already exists")]
    ActionExists(String),
    #[error("cannot drop {kind} `{name}`")]
    CannotDrop { name: String, kind: &'static str },
    #[error("cannot drop built-in namespace `{0}`")]
    BuiltInNamespace(String),
    #[error("namespace `{0}` belongs to an extension and must be removed with UNUSE")]
    ExtensionNamespace(String),
    #[error("namespace `{0}` is not an extension")]
    NotAnExtension(String),
    #[error("extension `{0}` is not registered")]
    UnknownExtension(String),
    #[error("the namespace `{0}` is read-only")]
    ReadOnlyNamespace(String),
    #[error("the schema of extension namespace `{0}` can only be changed by the extension")]
    ExtensionSchema(String),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing privilege {privilege}{}", .namespace.as_ref().map(|ns| format!(" on namespace `{ns}`")).unwrap_or_default())]
    MissingPrivilege {
        privilege: Privilege,
        namespace: Option<String>,
    },
    #[error("statement mutates state, but the execution context is read-only")]
    ReadOnlyContext,
    #[error("action `{0}` requires a writable context")]
    RequiresWriter(String),
    #[error("action `{0}` is private")]
    Private(String),
    #[error("action `{0}` is system-only")]
    SystemOnly(String),
    #[error("action `{0}` can only be called by the owner")]
    OwnerOnly(String),
    #[error("only the owner can transfer ownership")]
    NotOwner,
    #[error("`@{0}` is not available outside of a transaction")]
    InvalidTxContext(String),
}

#[derive(Error, Debug)]
pub enum RoleError {
    #[error("role `{0}` is built in and cannot be created, dropped or modified")]
    BuiltInRole(String),
    #[error("role `{0}` already exists")]
    RoleExists(String),
    #[error("role `{0}` does not exist")]
    UnknownRole(String),
    #[error("role `{0}` already has some or all of the specified privileges")]
    AlreadyGranted(String),
    #[error("role `{0}` does not have some or all of the specified privileges")]
    NotGranted(String),
    #[error("privilege `{0}` does not exist")]
    UnknownPrivilege(String),
    #[error("privilege {0} cannot be granted or revoked on a namespace")]
    CannotBeNamespaced(Privilege),
    #[error("user `{user}` already has role `{role}`")]
    UserHasRole { user: String, role: String },
    #[error("user `{user}` does not have role `{role}`")]
    UserLacksRole { user: String, role: String },
    #[error("roles are assigned to users globally and cannot be limited to a namespace")]
    NamespacedAssignment,
}

#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("`{name}` expects {expected} arguments, got {got}")]
    ArgumentCount { name: String, expected: usize, got: usize },
    #[error("argument {position} of `{name}` must be {expected}, got {found}")]
    ArgumentType {
        name: String,
        position: usize,
        expected: String,
        found: DataType,
    },
    #[error("built-in function `{0}` cannot be called directly")]
    DirectBuiltin(String),
    #[error("`{0}` does not return anything")]
    NoReturn(String),
    #[error("`{0}` returns a table and cannot be used as a single value")]
    ReturnsTable(String),
    #[error("expected `{name}` to return exactly one row, got {got}")]
    RowCount { name: String, got: usize },
    #[error("expected `{name}` to return {expected} values, got {got}")]
    ColumnCount { name: String, expected: usize, got: usize },
    #[error("return shape mismatch in `{name}`: {reason}")]
    ReturnShape { name: String, reason: String },
    #[error("action `{name}` must have exactly one of PUBLIC, PRIVATE or SYSTEM, found {found}")]
    Visibility { name: String, found: usize },
    #[error("`{0}` is only valid inside SQL")]
    SqlOnly(String),
}

/// Everything that can go wrong while planning or running a statement.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Role(#[from] RoleError),
    #[error(transparent)]
    Invocation(#[from] InvocationError),
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
    #[error("extension error: {0:#}")]
    Extension(anyhow::Error),
    #[error("caught at plan time: {0}")]
    Planning(Box<ExecError>),
    /// Raised by the `error(text)` built-in.
    #[error("{0}")]
    User(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecError {
    pub fn planning(err: ExecError) -> Self {
        match err {
            e @ Self::Planning(_) => e,
            e => Self::Planning(Box::new(e)),
        }
    }

    /// Whether the error comes from user logic or data rather than from a
    /// misbehaving interpreter or storage layer.
    ///
    /// These are reported in [`crate::CallResult::error`] instead of failing the call.
    pub fn is_user_error(&self) -> bool {
        match self {
            Self::User(_) => true,
            Self::Storage(e) => e.downcast_ref::<IntegrityError>().is_some(),
            _ => false,
        }
    }
}

pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn messages() {
        struct TestCase {
            err: ExecError,
            msg: &'static str,
        }

        for TestCase { err, msg } in [
            TestCase {
                err: AuthError::MissingPrivilege {
                    privilege: Privilege::Select,
                    namespace: Some("main".into()),
                }
                .into(),
                msg: "missing privilege SELECT on namespace `main`",
            },
            TestCase {
                err: AuthError::MissingPrivilege {
                    privilege: Privilege::Roles,
                    namespace: None,
                }
                .into(),
                msg: "missing privilege ROLES",
            },
            TestCase {
                err: ExecError::planning(TypeError::UnknownVariable("$x".into()).into()),
                msg: "caught at plan time: unknown variable `$x`",
            },
            TestCase {
                err: ExecError::planning(ExecError::planning(TypeError::LoopControl("BREAK").into())),
                msg: "caught at plan time: BREAK is only valid inside a loop",
            },
        ] {
            assert_eq!(err.to_string(), msg);
        }
    }

    #[test]
    fn user_errors() {
        assert!(ExecError::User("boom".into()).is_user_error());
        assert!(ExecError::Storage(IntegrityError("duplicate key".into()).into()).is_user_error());
        assert!(!ExecError::Storage(anyhow::anyhow!("connection reset")).is_user_error());
        assert!(!ExecError::Internal("oops".into()).is_user_error());
    }
}
