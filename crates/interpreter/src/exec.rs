//! The per-call execution context.

use quill_ast::{Modifier, SqlStatement, VarPrefix, Variable};
use quill_values::{DataType, Value};

use crate::catalog::NamespaceKind;
use crate::config::InterpreterConfig;
use crate::context::TxContext;
use crate::db::{AccessMode, Db, Query, Row};
use crate::errors::{AuthError, CatalogError, ExecError, ExecResult, TypeError};
use crate::executable::{Executable, soft_cast};
use crate::extension::ExtensionRegistry;
use crate::namespace::{Namespace, StateRef};
use crate::privilege::Privilege;
use crate::scope::Scope;
use crate::sqlgen;

/// Receives the rows produced by a statement or call.
pub type Sink<'a> = &'a mut dyn FnMut(Row) -> ExecResult<()>;

/// How a statement finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Normal,
    Break,
    Continue,
    /// Leaves the action, emitting the row if there is one.
    Return(Option<Row>),
}

pub(crate) type StmtFn = Box<dyn Fn(&mut ExecCtx<'_>, Sink<'_>) -> ExecResult<Flow> + Send + Sync>;
pub(crate) type ExprFn = Box<dyn Fn(&mut ExecCtx<'_>) -> ExecResult<Value> + Send + Sync>;

/// Runs statements in order until one of them leaves the block.
pub(crate) fn run_body(ctx: &mut ExecCtx<'_>, body: &[StmtFn], sink: Sink<'_>) -> ExecResult<Flow> {
    for stmt in body {
        let flow = stmt(ctx, &mut *sink)?;
        if flow != Flow::Normal {
            return Ok(flow);
        }
    }
    Ok(Flow::Normal)
}

/// The type of a context variable, by name without the `@`.
pub fn context_variable_type(name: &str) -> Option<DataType> {
    Some(match name {
        "caller" | "txid" | "authenticator" | "foreign_caller" => DataType::TEXT,
        "signer" => DataType::BLOB,
        "height" | "block_timestamp" => DataType::INT,
        _ => return None,
    })
}

/// Brings `value` to the type of the variable it is assigned to.
pub(crate) fn coerce_assign(name: &str, target: &DataType, value: Value) -> ExecResult<Value> {
    if target.is_null() || (*target == DataType::Record && matches!(value, Value::Record(_))) {
        return Ok(value);
    }
    soft_cast(&value, target).ok_or_else(|| {
        TypeError::Assign {
            name: name.to_owned(),
            expected: *target,
            found: value.data_type(),
        }
        .into()
    })
}

/// Everything a statement can see while it runs.
///
/// One context is created for every top-level `call` or `execute` and dropped when it
/// returns. Nested action calls swap in a fresh scope and namespace for their duration.
pub struct ExecCtx<'a> {
    pub(crate) tx: &'a TxContext,
    pub(crate) db: &'a mut dyn Db,
    pub(crate) state: StateRef<'a>,
    pub(crate) config: &'a InterpreterConfig,
    pub(crate) extensions: &'a ExtensionRegistry,
    pub(crate) scope: Scope,
    namespace: String,
    /// The namespace of the calling action, empty at top level.
    foreign_caller: String,
    top_level: bool,
    override_authz: bool,
    can_mutate: bool,
    logs: Vec<String>,
}

impl<'a> ExecCtx<'a> {
    pub(crate) fn new(
        tx: &'a TxContext,
        db: &'a mut dyn Db,
        state: StateRef<'a>,
        config: &'a InterpreterConfig,
        extensions: &'a ExtensionRegistry,
    ) -> Self {
        let can_mutate = db.access_mode() == AccessMode::ReadWrite;
        Self {
            tx,
            db,
            state,
            config,
            extensions,
            scope: Scope::new(),
            namespace: config.default_namespace.clone(),
            foreign_caller: String::new(),
            top_level: true,
            override_authz: tx.override_authz,
            can_mutate,
            logs: vec![],
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn caller(&self) -> &str {
        &self.tx.caller
    }

    pub fn can_mutate(&self) -> bool {
        self.can_mutate
    }

    pub fn is_top_level(&self) -> bool {
        self.top_level
    }

    pub(crate) fn overrides_authz(&self) -> bool {
        self.override_authz
    }

    /// Appends a message to the logs returned with the call.
    pub fn notice(&mut self, msg: String) {
        tracing::debug!(namespace = %self.namespace, "notice: {msg}");
        self.logs.push(msg);
    }

    pub(crate) fn take_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.logs)
    }

    pub fn get_variable(&self, var: &Variable) -> ExecResult<Value> {
        match var.prefix {
            VarPrefix::Dollar => self
                .scope
                .get(&var.name)
                .cloned()
                .ok_or_else(|| TypeError::UnknownVariable(var.to_string()).into()),
            VarPrefix::At => self.context_variable(&var.name),
        }
    }

    fn context_variable(&self, name: &str) -> ExecResult<Value> {
        if name == "foreign_caller" {
            return Ok(Value::text(self.foreign_caller.clone()));
        }
        if context_variable_type(name).is_none() {
            return Err(TypeError::UnknownContextVariable(format!("@{name}")).into());
        }
        if self.tx.invalid {
            return Err(AuthError::InvalidTxContext(name.to_owned()).into());
        }
        let tx = self.tx;
        Ok(match name {
            "caller" => Value::text(tx.caller.clone()),
            "txid" => Value::text(tx.txid.clone()),
            "authenticator" => Value::text(tx.authenticator.clone()),
            "signer" => Value::blob(tx.signer.clone()),
            "height" => Value::int(tx.height),
            _ => Value::int(tx.block_timestamp),
        })
    }

    /// Assigns to `var`, declaring it in the current frame if it is unknown.
    ///
    /// With `ty`, an unknown variable starts as a null of that type and a known one
    /// must already have it. The value is brought to the variable's type.
    pub fn set_variable(&mut self, var: &Variable, ty: Option<DataType>, value: Value) -> ExecResult<()> {
        if var.prefix == VarPrefix::At {
            return Err(TypeError::ReadOnlyVariable(var.to_string()).into());
        }
        let name = var.to_string();
        match self.scope.find(&var.name) {
            None => {
                let value = match ty {
                    Some(ty) => coerce_assign(&name, &ty, value)?,
                    None => value,
                };
                Ok(self.scope.declare(&var.name, value)?)
            }
            Some(frame) => {
                let current = self.scope.get(&var.name).map(Value::data_type).unwrap_or(DataType::Null);
                if let Some(ty) = ty
                    && !ty.equals(&current)
                {
                    return Err(TypeError::Assign {
                        name,
                        expected: current,
                        found: ty,
                    }
                    .into());
                }
                let value = coerce_assign(&name, &current, value)?;
                self.scope.set(frame, &var.name, value);
                Ok(())
            }
        }
    }

    /// Binds a new variable in the current frame. `name` may carry its `$`.
    pub fn declare(&mut self, name: &str, value: Value) -> ExecResult<()> {
        let var = Variable::new(name);
        if var.prefix == VarPrefix::At {
            return Err(TypeError::ReadOnlyVariable(var.to_string()).into());
        }
        Ok(self.scope.declare(&var.name, value)?)
    }

    pub(crate) fn namespace_ref(&self, name: &str) -> ExecResult<&Namespace> {
        self.state
            .namespaces
            .get(name)
            .ok_or_else(|| CatalogError::UnknownNamespace(name.to_owned()).into())
    }

    pub(crate) fn namespace_mut(&mut self, name: &str) -> ExecResult<&mut Namespace> {
        self.state
            .get_mut()?
            .namespaces
            .get_mut(name)
            .ok_or_else(|| CatalogError::UnknownNamespace(name.to_owned()).into())
    }

    /// Fails unless the caller holds `privilege` on the current namespace.
    pub fn check_privilege(&self, privilege: Privilege) -> ExecResult<()> {
        self.check_privilege_on(Some(&self.namespace), privilege)
    }

    /// Fails unless the caller holds `privilege` globally.
    pub fn check_global_privilege(&self, privilege: Privilege) -> ExecResult<()> {
        self.check_privilege_on(None, privilege)
    }

    fn check_privilege_on(&self, namespace: Option<&str>, privilege: Privilege) -> ExecResult<()> {
        if self.override_authz || self.state.access.has_privilege(&self.tx.caller, namespace, privilege) {
            return Ok(());
        }
        Err(AuthError::MissingPrivilege {
            privilege,
            namespace: namespace.map(str::to_owned),
        }
        .into())
    }

    pub(crate) fn is_owner(&self) -> bool {
        self.override_authz || self.state.access.is_owner(&self.tx.caller)
    }

    /// Fails if the schema of `namespace` cannot be changed from here.
    pub(crate) fn check_namespace_mutability(&self, namespace: &str) -> ExecResult<()> {
        if !self.can_mutate {
            return Err(AuthError::ReadOnlyContext.into());
        }
        match self.namespace_ref(namespace)?.kind {
            NamespaceKind::System => Err(CatalogError::ReadOnlyNamespace(namespace.to_owned()).into()),
            NamespaceKind::Extension if !self.override_authz => {
                Err(CatalogError::ExtensionSchema(namespace.to_owned()).into())
            }
            _ => Ok(()),
        }
    }

    /// The gates an action or extension method in `namespace` passes before it runs.
    pub(crate) fn check_can_execute(&self, namespace: &str, name: &str, modifiers: &[Modifier]) -> ExecResult<()> {
        if !modifiers.contains(&Modifier::View) && !self.can_mutate {
            return Err(AuthError::RequiresWriter(name.to_owned()).into());
        }
        if self.override_authz && self.top_level {
            return Ok(());
        }
        if modifiers.contains(&Modifier::Private) && (self.top_level || self.namespace != namespace) {
            return Err(AuthError::Private(name.to_owned()).into());
        }
        if modifiers.contains(&Modifier::System) && self.top_level {
            return Err(AuthError::SystemOnly(name.to_owned()).into());
        }
        if modifiers.contains(&Modifier::Owner) && !self.is_owner() {
            return Err(AuthError::OwnerOnly(name.to_owned()).into());
        }
        self.check_privilege_on(Some(namespace), Privilege::Call)
    }

    /// Runs `f` with `namespace` as the current namespace.
    pub(crate) fn with_namespace<T>(
        &mut self,
        namespace: &str,
        f: impl FnOnce(&mut Self) -> ExecResult<T>,
    ) -> ExecResult<T> {
        self.namespace_ref(namespace)?;
        let previous = std::mem::replace(&mut self.namespace, namespace.to_owned());
        let res = f(self);
        self.namespace = previous;
        res
    }

    /// Runs `f` in a child frame of the current scope.
    pub(crate) fn block<T>(&mut self, f: impl FnOnce(&mut Self) -> ExecResult<T>) -> ExecResult<T> {
        self.scope.push();
        let res = f(self);
        self.scope.pop();
        res
    }

    /// Runs `f` as the body of something called from here: a fresh scope in the callee's
    /// namespace.
    pub(crate) fn call_frame<T>(
        &mut self,
        namespace: &str,
        f: impl FnOnce(&mut Self) -> ExecResult<T>,
    ) -> ExecResult<T> {
        let scope = std::mem::take(&mut self.scope);
        let caller_ns = std::mem::replace(&mut self.namespace, namespace.to_owned());
        let foreign_caller = std::mem::replace(&mut self.foreign_caller, caller_ns.clone());
        let top_level = std::mem::replace(&mut self.top_level, false);

        let res = f(self);

        self.scope = scope;
        self.namespace = caller_ns;
        self.foreign_caller = foreign_caller;
        self.top_level = top_level;
        res
    }

    /// Runs an extension hook: a fresh top-level scope in the extension's namespace, with
    /// authorization overridden.
    pub(crate) fn hook_frame<T>(&mut self, alias: &str, f: impl FnOnce(&mut Self) -> ExecResult<T>) -> ExecResult<T> {
        let scope = std::mem::take(&mut self.scope);
        let namespace = std::mem::replace(&mut self.namespace, alias.to_owned());
        let foreign_caller = std::mem::take(&mut self.foreign_caller);
        let top_level = std::mem::replace(&mut self.top_level, true);
        let override_authz = std::mem::replace(&mut self.override_authz, true);

        let res = f(self);

        self.scope = scope;
        self.namespace = namespace;
        self.foreign_caller = foreign_caller;
        self.top_level = top_level;
        self.override_authz = override_authz;
        res
    }

    /// Sets the current namespace for the rest of the batch.
    pub(crate) fn set_namespace(&mut self, namespace: &str) -> ExecResult<()> {
        self.namespace_ref(namespace)?;
        self.namespace = namespace.to_owned();
        Ok(())
    }

    /// The executable `name` in `namespace` (the current one when `None`).
    pub(crate) fn lookup_function(&self, namespace: Option<&str>, name: &str) -> ExecResult<std::sync::Arc<Executable>> {
        let namespace = namespace.unwrap_or(&self.namespace);
        self.namespace_ref(namespace)?
            .function(name)
            .cloned()
            .ok_or_else(|| {
                CatalogError::UnknownFunction {
                    namespace: namespace.to_owned(),
                    name: name.to_owned(),
                }
                .into()
            })
    }

    /// Calls `name` in `namespace`, passing every returned row to `sink`.
    pub fn call(&mut self, namespace: Option<&str>, name: &str, args: Vec<Value>, sink: Sink<'_>) -> ExecResult<()> {
        let namespace = namespace.map(str::to_lowercase);
        let exe = self.lookup_function(namespace.as_deref(), &name.to_lowercase())?;
        exe.call(self, args, sink)
    }

    /// Renders `stmt` for the current namespace and runs it with `params` bound.
    pub fn run_query(&mut self, stmt: &SqlStatement, params: Vec<(String, Value)>, sink: Sink<'_>) -> ExecResult<()> {
        let names: Vec<String> = params.iter().map(|(name, _)| name.clone()).collect();
        let sql = sqlgen::render_sql(stmt, &self.namespace, &names)?;
        let query = Query {
            namespace: &self.namespace,
            sql,
            statement: stmt,
            params,
        };

        let mut failure = None;
        let res = self.db.query(&query, &mut |row| match sink(row) {
            Ok(()) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                failure = Some(e);
                Err(anyhow::anyhow!(msg))
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        res.map_err(storage_error)
    }

    /// Runs a schema change, then reloads the tables of the current namespace.
    pub(crate) fn execute_ddl(&mut self, statement: crate::db::DdlStatement<'_>) -> ExecResult<()> {
        let sql = sqlgen::render_ddl(statement, &self.namespace)?;
        let ddl = crate::db::Ddl {
            namespace: &self.namespace,
            sql,
            statement,
        };
        self.db.execute_ddl(&ddl).map_err(storage_error)?;
        let namespace = self.namespace.clone();
        self.reload_tables(&namespace)
    }

    pub(crate) fn reload_tables(&mut self, namespace: &str) -> ExecResult<()> {
        let tables = self.db.list_tables(namespace).map_err(ExecError::Storage)?;
        self.namespace_mut(namespace)?.tables = tables.into_iter().map(|t| (t.name.clone(), t)).collect();
        Ok(())
    }
}

/// Storage errors raised while evaluating one of our own functions, such as `error()`
/// inside a query, keep their original kind.
fn storage_error(err: anyhow::Error) -> ExecError {
    match err.downcast::<ExecError>() {
        Ok(err) => err,
        Err(err) => ExecError::Storage(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quill_values::{ArrayValue, ScalarType};

    #[test]
    fn assignment_coercion() {
        struct TestCase {
            target: DataType,
            value: Value,
            expected: Option<Value>,
        }

        for TestCase { target, value, expected } in [
            TestCase {
                target: DataType::Null,
                value: Value::text("anything"),
                expected: Some(Value::text("anything")),
            },
            TestCase {
                target: DataType::INT,
                value: Value::Null,
                expected: Some(Value::Int(None)),
            },
            TestCase {
                target: DataType::INT,
                value: Value::Text(None),
                expected: Some(Value::Int(None)),
            },
            TestCase {
                target: DataType::Array(ScalarType::Int),
                value: Value::Array(ArrayValue::empty(ScalarType::Text)),
                expected: Some(Value::Array(ArrayValue::empty(ScalarType::Int))),
            },
            TestCase {
                target: DataType::INT,
                value: Value::text("1"),
                expected: None,
            },
            TestCase {
                target: DataType::TEXT,
                value: Value::Array(ArrayValue::empty(ScalarType::Text)),
                expected: None,
            },
        ] {
            assert_eq!(coerce_assign("$x", &target, value).ok(), expected);
        }
    }

    #[test]
    fn context_variable_types() {
        assert_eq!(context_variable_type("caller"), Some(DataType::TEXT));
        assert_eq!(context_variable_type("signer"), Some(DataType::BLOB));
        assert_eq!(context_variable_type("height"), Some(DataType::INT));
        assert_eq!(context_variable_type("nonsense"), None);
    }

    #[test]
    fn storage_errors_keep_user_errors() {
        let err = storage_error(anyhow::Error::new(ExecError::User("boom".into())));
        assert!(matches!(err, ExecError::User(msg) if msg == "boom"));
        assert!(matches!(storage_error(anyhow::anyhow!("disk full")), ExecError::Storage(_)));
    }
}
