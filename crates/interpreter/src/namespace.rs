use std::collections::BTreeMap;
use std::sync::Arc;

use crate::access::AccessController;
use crate::catalog::{NamespaceKind, Table};
use crate::errors::{AuthError, ExecResult};
use crate::executable::Executable;
use crate::extension::ExtensionInstance;
use crate::functions::builtins;

/// The extension instance that owns an extension namespace.
#[derive(Clone)]
pub struct ExtensionBinding {
    /// The registered extension name, as given to `USE`.
    pub extension: String,
    pub instance: Arc<dyn ExtensionInstance>,
}

/// A schema: tables, the callables visible in it, and its extension if it has one.
#[derive(Clone)]
pub struct Namespace {
    pub name: String,
    pub kind: NamespaceKind,
    pub tables: BTreeMap<String, Table>,
    /// Built-ins first, overridden by actions and extension methods of the same name.
    pub functions: BTreeMap<String, Arc<Executable>>,
    pub extension: Option<ExtensionBinding>,
}

impl Namespace {
    pub fn new(name: impl Into<String>, kind: NamespaceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            tables: BTreeMap::new(),
            functions: builtins()
                .map(|f| (f.name.to_owned(), Arc::new(Executable::Builtin(f))))
                .collect(),
            extension: None,
        }
    }

    pub fn function(&self, name: &str) -> Option<&Arc<Executable>> {
        self.functions.get(name)
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Everything the interpreter keeps in memory between calls.
///
/// Cloning is cheap enough to snapshot before every call: executables are shared.
#[derive(Clone, Debug, Default)]
pub struct State {
    pub namespaces: BTreeMap<String, Namespace>,
    pub access: AccessController,
}

/// The state a call runs against: shared under the read lock, exclusive under the
/// write lock.
pub(crate) enum StateRef<'a> {
    Shared(&'a State),
    Exclusive(&'a mut State),
}

impl StateRef<'_> {
    pub(crate) fn get_mut(&mut self) -> ExecResult<&mut State> {
        match self {
            Self::Shared(_) => Err(AuthError::ReadOnlyContext.into()),
            Self::Exclusive(state) => Ok(&mut **state),
        }
    }
}

impl std::ops::Deref for StateRef<'_> {
    type Target = State;

    fn deref(&self) -> &State {
        match self {
            Self::Shared(state) => *state,
            Self::Exclusive(state) => &**state,
        }
    }
}
