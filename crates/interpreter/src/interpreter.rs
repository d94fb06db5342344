use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use quill_ast::Statement;
use quill_values::Value;
use regex::Regex;

use crate::access::AccessController;
use crate::catalog::NamespaceKind;
use crate::config::InterpreterConfig;
use crate::context::{CallResult, TxContext};
use crate::db::{AccessMode, Db};
use crate::errors::{CatalogError, ExecError, ExecResult, InvocationError, TypeError};
use crate::exec::{ExecCtx, Sink};
use crate::executable::{Action, Executable};
use crate::extension::{ExtensionInstance, ExtensionRegistry};
use crate::namespace::{Namespace, State, StateRef};
use crate::planner::plan_action;
use crate::statements::extension_namespace;

static IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap());

/// Runs actions and ad-hoc statements against a [`Db`].
///
/// The interpreter caches the catalog, the planned actions and the access controller.
/// Storage stays the source of truth: every change is written through the `Db` of the
/// call that makes it, and [`Interpreter::new`] rebuilds the cache from storage alone.
///
/// Calls on a read-write `Db` hold the write lock and are serialized. Read-only calls
/// hold the read lock for their whole duration and may run concurrently.
pub struct Interpreter {
    config: InterpreterConfig,
    extensions: ExtensionRegistry,
    state: RwLock<State>,
}

impl Interpreter {
    /// Loads the interpreter from `db`, initializing the store first if it is empty.
    pub fn new(config: InterpreterConfig, db: &mut dyn Db, extensions: ExtensionRegistry) -> ExecResult<Self> {
        if !db.is_initialized().map_err(ExecError::Storage)? {
            initialize(&config, db)?;
        }

        let mut state = State {
            namespaces: BTreeMap::new(),
            access: AccessController::load(&mut *db)?,
        };
        for stored in db.list_namespaces().map_err(ExecError::Storage)? {
            let mut ns = Namespace::new(&stored.name, stored.kind);
            ns.tables = db
                .list_tables(&stored.name)
                .map_err(ExecError::Storage)?
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect();
            state.namespaces.insert(stored.name, ns);
        }

        let mut started: Vec<(String, Arc<dyn ExtensionInstance>)> = vec![];
        for stored in db.list_extensions().map_err(ExecError::Storage)? {
            let initializer = extensions
                .get(&stored.extension)
                .ok_or_else(|| CatalogError::UnknownExtension(stored.extension.clone()))?;
            let instance = initializer
                .initialize(&stored.alias, &stored.decode_config()?)
                .map_err(ExecError::Extension)?;
            let mut ns = extension_namespace(&stored.alias, &stored.extension, instance.clone());
            if let Some(existing) = state.namespaces.remove(&stored.alias) {
                ns.tables = existing.tables;
            }
            state.namespaces.insert(stored.alias.clone(), ns);
            started.push((stored.alias, instance));
        }

        let names: Vec<String> = state.namespaces.keys().cloned().collect();
        for namespace in &names {
            for stored in db.list_actions(namespace).map_err(ExecError::Storage)? {
                let definition = stored.decode()?;
                let body = plan_action(&state, namespace, &definition, true)?;
                let name = definition.name.clone();
                let action = Action {
                    namespace: namespace.clone(),
                    definition,
                    body,
                };
                if let Some(ns) = state.namespaces.get_mut(namespace) {
                    ns.functions
                        .insert(name, Arc::new(Executable::Action(Arc::new(action))));
                }
            }
        }

        let tx = TxContext::outside_tx().with_override_authz();
        let mut ctx = ExecCtx::new(&tx, db, StateRef::Exclusive(&mut state), &config, &extensions);
        for (alias, instance) in &started {
            ctx.hook_frame(alias, |ctx| instance.on_start(ctx))?;
        }
        drop(ctx);

        log::info!(
            "interpreter loaded {} namespaces and {} extensions",
            state.namespaces.len(),
            started.len()
        );
        Ok(Self {
            config,
            extensions,
            state: RwLock::new(state),
        })
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Calls `action` in `namespace`, the default namespace if empty.
    #[tracing::instrument(level = "debug", skip_all, fields(caller = %tx.caller, namespace = %namespace, action = %action))]
    pub fn call(
        &self,
        tx: &TxContext,
        db: &mut dyn Db,
        namespace: &str,
        action: &str,
        args: Vec<Value>,
        sink: Sink<'_>,
    ) -> ExecResult<CallResult> {
        let namespace = match namespace {
            "" => self.config.default_namespace.clone(),
            ns => ns.to_lowercase(),
        };
        let action = action.to_lowercase();
        self.run(tx, db, |ctx| {
            let exe = ctx.lookup_function(Some(&namespace), &action)?;
            if exe.is_builtin() {
                return Err(InvocationError::DirectBuiltin(action.clone()).into());
            }
            exe.call(ctx, args, sink)
        })
    }

    /// Runs `statements` in order, starting in the default namespace, with `params`
    /// bound as variables.
    #[tracing::instrument(level = "debug", skip_all, fields(caller = %tx.caller, statements = statements.len()))]
    pub fn execute(
        &self,
        tx: &TxContext,
        db: &mut dyn Db,
        statements: &[Statement],
        params: &[(String, Value)],
        sink: Sink<'_>,
    ) -> ExecResult<CallResult> {
        let params = params
            .iter()
            .map(|(name, value)| Ok((self.param_name(name)?, value.clone())))
            .collect::<ExecResult<Vec<_>>>()?;
        self.run(tx, db, |ctx| {
            for (name, value) in params {
                ctx.declare(&name, value)?;
            }
            for stmt in statements {
                ctx.execute(stmt, &mut *sink)?;
            }
            Ok(())
        })
    }

    /// Makes `user` the owner, bypassing authorization. For use by the node operator.
    #[tracing::instrument(level = "debug", skip_all, fields(user = %user))]
    pub fn set_owner(&self, db: &mut dyn Db, user: &str) -> ExecResult<()> {
        let mut state = self.state.write();
        let snapshot = state.access.clone();
        let res = state.access.transfer_ownership(db, user);
        if res.is_err() {
            state.access = snapshot;
        }
        res
    }

    /// Checks a parameter name and brings it to the form variables are stored in.
    fn param_name(&self, name: &str) -> ExecResult<String> {
        let invalid = |reason: String| -> ExecError {
            TypeError::InvalidVariableName {
                name: name.to_owned(),
                reason,
            }
            .into()
        };
        let bare = name.strip_prefix('$').unwrap_or(name);
        if bare.starts_with('@') {
            return Err(invalid("context variables cannot be bound".into()));
        }
        if !IDENT.is_match(bare) {
            return Err(invalid("names must start with a letter and contain only letters, digits and `_`".into()));
        }
        if bare.len() > self.config.max_ident_length {
            return Err(invalid(format!(
                "names may be at most {} characters long",
                self.config.max_ident_length
            )));
        }
        Ok(format!("${}", bare.to_lowercase()))
    }

    fn run(
        &self,
        tx: &TxContext,
        db: &mut dyn Db,
        f: impl FnOnce(&mut ExecCtx<'_>) -> ExecResult<()>,
    ) -> ExecResult<CallResult> {
        match db.access_mode() {
            AccessMode::ReadOnly => {
                tracing::debug!("taking the interpreter read lock");
                let state = self.state.read();
                let mut ctx = ExecCtx::new(tx, db, StateRef::Shared(&state), &self.config, &self.extensions);
                let res = f(&mut ctx);
                finish(res, ctx.take_logs())
            }
            AccessMode::ReadWrite => {
                tracing::debug!("taking the interpreter write lock");
                let mut state = self.state.write();
                let snapshot = state.clone();
                let mut ctx = ExecCtx::new(tx, db, StateRef::Exclusive(&mut state), &self.config, &self.extensions);
                let res = f(&mut ctx);
                let logs = ctx.take_logs();
                drop(ctx);
                if let Err(e) = &res {
                    log::warn!("rolling back interpreter state: {e}");
                    *state = snapshot;
                }
                finish(res, logs)
            }
        }
    }
}

/// Creates the built-in namespaces and roles in an empty store.
fn initialize(config: &InterpreterConfig, db: &mut dyn Db) -> ExecResult<()> {
    db.create_namespace(&config.default_namespace, NamespaceKind::User)
        .map_err(ExecError::Storage)?;
    db.create_namespace(&config.info_namespace, NamespaceKind::System)
        .map_err(ExecError::Storage)?;
    AccessController::initialize(db, config.initial_owner.as_deref())?;
    log::info!("initialized an empty store");
    Ok(())
}

fn finish(res: ExecResult<()>, logs: Vec<String>) -> ExecResult<CallResult> {
    match res {
        Ok(()) => Ok(CallResult { logs, error: None }),
        Err(e) if e.is_user_error() => Ok(CallResult { logs, error: Some(e) }),
        Err(e) => Err(e),
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("config", &self.config)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        for ok in ["a", "abc_1", "Z9"] {
            assert!(IDENT.is_match(ok), "{ok}");
        }
        for bad in ["", "1a", "_a", "a-b", "a b"] {
            assert!(!IDENT.is_match(bad), "{bad}");
        }
    }
}
