//! A deterministic interpreter for stored procedures over a relational store.
//!
//! Procedures ("actions") are planned once into closures and run against a [`Db`]
//! inside the caller's transaction. State is organized into namespaces and guarded by
//! role based access control. Native extensions add callable methods under an alias.

pub mod access;
pub mod catalog;
pub mod config;
pub mod context;
pub mod db;
pub mod errors;
pub mod exec;
pub mod executable;
pub mod extension;
pub mod functions;
mod interpreter;
pub mod namespace;
mod planner;
pub mod privilege;
pub mod scope;
pub mod sqlgen;
mod statements;

pub use access::{DEFAULT_ROLE, OWNER_ROLE};
pub use catalog::{
    CatalogStore, Column, ConfigEntry, Constraint, Index, IndexKind, NamespaceKind, StoredAction, StoredExtension,
    StoredNamespace, StoredPrivilege, Table, UserRole,
};
pub use config::InterpreterConfig;
pub use context::{CallResult, TxContext};
pub use db::{AccessMode, Db, Ddl, DdlStatement, IntegrityError, Query, Row, UNNAMED_COLUMN};
pub use errors::{AuthError, CatalogError, ExecError, ExecResult, InvocationError, RoleError, TypeError};
pub use exec::{ExecCtx, Flow, Sink};
pub use extension::{ExtensionInitializer, ExtensionInstance, ExtensionMethod, ExtensionRegistry};
pub use functions::builtin;
pub use interpreter::Interpreter;
pub use privilege::Privilege;
