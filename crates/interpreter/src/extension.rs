//! Native extensions.
//!
//! An extension is registered under a name with an [`ExtensionInitializer`]. `USE name
//! {config} AS alias` initializes an instance and gives it its own namespace, where its
//! methods can be called like actions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use quill_ast::ddl::ActionReturn;
use quill_ast::Modifier;
use quill_values::{DataType, Value};

use crate::errors::ExecResult;
use crate::exec::{ExecCtx, Sink};

pub type MethodHandler = Arc<dyn Fn(&mut ExecCtx<'_>, &[Value], Sink<'_>) -> ExecResult<()> + Send + Sync>;

/// A callable exposed by an extension instance.
#[derive(Clone)]
pub struct ExtensionMethod {
    pub name: String,
    pub params: Vec<DataType>,
    pub returns: Option<ActionReturn>,
    /// Checked the same way as action modifiers.
    pub modifiers: Vec<Modifier>,
    pub handler: MethodHandler,
}

impl ExtensionMethod {
    pub fn new(
        name: impl Into<String>,
        modifiers: Vec<Modifier>,
        handler: impl Fn(&mut ExecCtx<'_>, &[Value], Sink<'_>) -> ExecResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into().to_lowercase(),
            params: vec![],
            returns: None,
            modifiers,
            handler: Arc::new(handler),
        }
    }

    pub fn params(mut self, params: Vec<DataType>) -> Self {
        self.params = params;
        self
    }

    pub fn returns(mut self, returns: ActionReturn) -> Self {
        self.returns = Some(returns);
        self
    }
}

impl fmt::Debug for ExtensionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("modifiers", &self.modifiers)
            .finish_non_exhaustive()
    }
}

/// One initialized extension.
///
/// Hooks run with authorization overridden, in the instance's own namespace.
pub trait ExtensionInstance: Send + Sync {
    fn methods(&self) -> Vec<ExtensionMethod>;

    /// Called for every used instance once the interpreter has been rebuilt from storage.
    fn on_start(&self, _ctx: &mut ExecCtx<'_>) -> ExecResult<()> {
        Ok(())
    }

    /// Called when the instance is first used, after its namespace exists.
    fn on_use(&self, _ctx: &mut ExecCtx<'_>) -> ExecResult<()> {
        Ok(())
    }

    /// Called before the instance's namespace is dropped.
    fn on_unuse(&self, _ctx: &mut ExecCtx<'_>) -> ExecResult<()> {
        Ok(())
    }
}

pub trait ExtensionInitializer: Send + Sync {
    fn initialize(&self, alias: &str, config: &[(String, Value)]) -> anyhow::Result<Arc<dyn ExtensionInstance>>;
}

impl<F> ExtensionInitializer for F
where
    F: Fn(&str, &[(String, Value)]) -> anyhow::Result<Arc<dyn ExtensionInstance>> + Send + Sync,
{
    fn initialize(&self, alias: &str, config: &[(String, Value)]) -> anyhow::Result<Arc<dyn ExtensionInstance>> {
        self(alias, config)
    }
}

/// Extensions available to `USE`, by lowercase name.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    initializers: BTreeMap<String, Arc<dyn ExtensionInitializer>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `initializer` under `name`, replacing any earlier registration.
    pub fn register(mut self, name: &str, initializer: impl ExtensionInitializer + 'static) -> Self {
        self.initializers.insert(name.to_lowercase(), Arc::new(initializer));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ExtensionInitializer>> {
        self.initializers.get(&name.to_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.initializers.keys().map(String::as_str)
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
