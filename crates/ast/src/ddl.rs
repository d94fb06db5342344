//! Schema, action, role, namespace and extension statements.

use quill_values::DataType;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::action::ActionStmt;
use crate::expr::Expr;

/// A column definition in CREATE TABLE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: DataType,
    pub primary_key: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<Expr>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self {
            name: name.into(),
            ty,
            primary_key: false,
            not_null: false,
            unique: false,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

/// A table constraint declared out of line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintDef {
    PrimaryKey(Vec<String>),
    Unique(Vec<String>),
    Check(Expr),
    ForeignKey {
        columns: Vec<String>,
        ref_table: String,
        ref_columns: Vec<String>,
    },
}

impl ConstraintDef {
    /// The local columns the constraint applies to.
    pub fn columns(&self) -> &[String] {
        match self {
            Self::PrimaryKey(cols) | Self::Unique(cols) => cols,
            Self::ForeignKey { columns, .. } => columns,
            Self::Check(_) => &[],
        }
    }
}

/// A constraint with an optional name. Unnamed constraints get a generated name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedConstraint {
    pub name: Option<String>,
    pub constraint: ConstraintDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTable {
    pub if_not_exists: bool,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<NamedConstraint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropTable {
    pub if_exists: bool,
    pub tables: Vec<String>,
    pub cascade: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlterTableAction {
    AddColumn { name: String, ty: DataType },
    DropColumn(String),
    RenameColumn { from: String, to: String },
    RenameTable(String),
    SetNotNull(String),
    DropNotNull(String),
    SetDefault { column: String, value: Expr },
    DropDefault(String),
    AddConstraint(NamedConstraint),
    DropConstraint(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterTable {
    pub table: String,
    pub action: AlterTableAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIndex {
    pub if_not_exists: bool,
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropIndex {
    pub if_exists: bool,
    pub name: String,
}

/// An access or behavior modifier on an action or extension method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Modifier {
    /// Callable by anyone with the CALL privilege
    Public,
    /// Callable only from other actions in the same namespace
    Private,
    /// Callable only from other actions, never at top level
    System,
    /// Does not modify state
    View,
    /// Callable only by the database owner
    Owner,
}

/// A named, typed parameter or return column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedType {
    pub name: String,
    pub ty: DataType,
}

impl NamedType {
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// `RETURNS (a int, b text)` or `RETURNS TABLE (a int, b text)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReturn {
    pub is_table: bool,
    pub fields: Vec<NamedType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAction {
    /// At most one of `if_not_exists` and `or_replace` is set.
    pub if_not_exists: bool,
    pub or_replace: bool,
    pub name: String,
    pub params: Vec<NamedType>,
    pub modifiers: Vec<Modifier>,
    pub returns: Option<ActionReturn>,
    pub body: Vec<ActionStmt>,
}

impl CreateAction {
    pub fn new(name: impl Into<String>, modifiers: Vec<Modifier>, body: Vec<ActionStmt>) -> Self {
        Self {
            if_not_exists: false,
            or_replace: false,
            name: name.into(),
            params: vec![],
            modifiers,
            returns: None,
            body,
        }
    }

    pub fn params(mut self, params: Vec<NamedType>) -> Self {
        self.params = params;
        self
    }

    pub fn returns(mut self, is_table: bool, fields: Vec<NamedType>) -> Self {
        self.returns = Some(ActionReturn { is_table, fields });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropAction {
    pub if_exists: bool,
    pub name: String,
}

/// A user identifier given literally or as an expression, such as `$user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UserRef {
    Literal(String),
    Expr(Expr),
}

/// What a GRANT or REVOKE applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GrantSubject {
    /// `GRANT SELECT, INSERT [ON ns] TO role`
    Privileges { privileges: Vec<String>, role: String },
    /// `GRANT role TO user`
    Role { role: String, user: UserRef },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantOrRevoke {
    pub is_grant: bool,
    /// `IF NOT GRANTED` on a grant, `IF GRANTED` on a revoke
    pub if_: bool,
    pub subject: GrantSubject,
    /// Only valid for privilege grants.
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOwnership {
    pub to: UserRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRole {
    pub if_not_exists: bool,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropRole {
    pub if_exists: bool,
    pub role: String,
}

/// `USE ext {key: value, ...} AS alias`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseExtension {
    pub if_not_exists: bool,
    pub extension: String,
    pub config: Vec<(String, Expr)>,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnuseExtension {
    pub if_exists: bool,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNamespace {
    pub if_not_exists: bool,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropNamespace {
    pub if_exists: bool,
    pub namespace: String,
}

/// `SET CURRENT NAMESPACE TO ns`, lasting until the end of the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetCurrentNamespace {
    pub namespace: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn modifier_names() {
        assert_eq!("view".parse::<Modifier>().unwrap(), Modifier::View);
        assert_eq!(Modifier::Private.to_string(), "PRIVATE");
        assert!("static".parse::<Modifier>().is_err());
    }
}
