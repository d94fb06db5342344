use derive_more::From;
use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::action::ActionStmt;
use crate::ddl::*;
use crate::sql::SqlStatement;

/// A statement that can be executed on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From, EnumAsInner)]
pub enum TopLevel {
    Sql(SqlStatement),
    CreateTable(CreateTable),
    DropTable(DropTable),
    AlterTable(AlterTable),
    CreateIndex(CreateIndex),
    DropIndex(DropIndex),
    CreateAction(CreateAction),
    DropAction(DropAction),
    CreateNamespace(CreateNamespace),
    DropNamespace(DropNamespace),
    SetCurrentNamespace(SetCurrentNamespace),
    GrantOrRevoke(GrantOrRevoke),
    TransferOwnership(TransferOwnership),
    CreateRole(CreateRole),
    DropRole(DropRole),
    UseExtension(UseExtension),
    UnuseExtension(UnuseExtension),
    /// Procedural statements such as assignments, loops and calls
    Action(ActionStmt),
}

/// A top-level statement with its optional `{namespace}` prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub namespace: Option<String>,
    pub kind: TopLevel,
}

impl Statement {
    pub fn new(kind: impl Into<TopLevel>) -> Self {
        Self {
            namespace: None,
            kind: kind.into(),
        }
    }

    pub fn in_namespace(namespace: impl Into<String>, kind: impl Into<TopLevel>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            kind: kind.into(),
        }
    }
}

impl From<TopLevel> for Statement {
    fn from(kind: TopLevel) -> Self {
        Self::new(kind)
    }
}
