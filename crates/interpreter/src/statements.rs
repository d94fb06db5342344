//! Top-level statements: schema changes, actions, roles, namespaces and extensions.

use std::sync::Arc;

use quill_ast::ddl::{
    AlterTable, AlterTableAction, CreateIndex, CreateNamespace, CreateRole, CreateTable, DropAction, DropIndex,
    DropNamespace, DropRole, DropTable, GrantOrRevoke, GrantSubject, TransferOwnership, UnuseExtension,
    UseExtension, UserRef,
};
use quill_ast::{ActionStmt, CreateAction, SqlStatement, Statement, TopLevel};
use quill_values::{DataType, Value};

use crate::catalog::{NamespaceKind, StoredAction, StoredExtension};
use crate::db::DdlStatement;
use crate::errors::{AuthError, CatalogError, ExecError, ExecResult, RoleError, TypeError};
use crate::exec::{ExecCtx, Flow, Sink};
use crate::executable::{Action, Executable};
use crate::functions::builtin;
use crate::namespace::{ExtensionBinding, Namespace};
use crate::planner::{plan_action, plan_batch_expr, plan_batch_sql, plan_batch_stmt};
use crate::privilege::Privilege;

impl ExecCtx<'_> {
    /// Runs one top-level statement, passing any rows it returns to `sink`.
    pub fn execute(&mut self, stmt: &Statement, sink: Sink<'_>) -> ExecResult<()> {
        match &stmt.namespace {
            Some(ns) => {
                let ns = ns.to_lowercase();
                self.with_namespace(&ns, |ctx| ctx.execute_kind(&stmt.kind, sink))
            }
            None => self.execute_kind(&stmt.kind, sink),
        }
    }

    fn execute_kind(&mut self, kind: &TopLevel, sink: Sink<'_>) -> ExecResult<()> {
        match kind {
            TopLevel::Sql(stmt) => self.execute_sql(stmt, sink),
            TopLevel::CreateTable(stmt) => self.create_table(stmt),
            TopLevel::DropTable(stmt) => self.drop_table(stmt),
            TopLevel::AlterTable(stmt) => self.alter_table(stmt),
            TopLevel::CreateIndex(stmt) => self.create_index(stmt),
            TopLevel::DropIndex(stmt) => self.drop_index(stmt),
            TopLevel::CreateAction(stmt) => self.create_action(stmt),
            TopLevel::DropAction(stmt) => self.drop_action(stmt),
            TopLevel::CreateNamespace(stmt) => self.create_namespace(stmt),
            TopLevel::DropNamespace(stmt) => self.drop_namespace(stmt),
            TopLevel::SetCurrentNamespace(stmt) => self.set_namespace(&stmt.namespace.to_lowercase()),
            TopLevel::GrantOrRevoke(stmt) => self.grant_or_revoke(stmt),
            TopLevel::TransferOwnership(stmt) => self.transfer_ownership(stmt),
            TopLevel::CreateRole(stmt) => self.create_role(stmt),
            TopLevel::DropRole(stmt) => self.drop_role(stmt),
            TopLevel::UseExtension(stmt) => self.use_extension(stmt),
            TopLevel::UnuseExtension(stmt) => self.unuse_extension(stmt),
            TopLevel::Action(stmt) => self.execute_action_stmt(stmt, sink),
        }
    }

    fn execute_sql(&mut self, stmt: &SqlStatement, sink: Sink<'_>) -> ExecResult<()> {
        let plan = plan_batch_sql(&self.state, self.namespace(), &self.scope, stmt)?;
        plan.authorize(self)?;
        plan.run(self, sink)
    }

    fn execute_action_stmt(&mut self, stmt: &ActionStmt, sink: Sink<'_>) -> ExecResult<()> {
        let plan = plan_batch_stmt(&self.state, self.namespace(), &self.scope, stmt)?;
        match plan(self, sink)? {
            Flow::Normal => Ok(()),
            flow => Err(ExecError::Internal(format!("{flow:?} escaped a top-level statement"))),
        }
    }

    /// Evaluates an expression outside of any action, such as a user in `GRANT role TO $user`.
    fn eval(&mut self, expr: &quill_ast::Expr) -> ExecResult<Value> {
        let f = plan_batch_expr(&self.state, self.namespace(), &self.scope, expr)?;
        f(self)
    }

    fn eval_user(&mut self, user: &UserRef) -> ExecResult<String> {
        match user {
            UserRef::Literal(user) => Ok(user.clone()),
            UserRef::Expr(expr) => match self.eval(expr)? {
                Value::Text(Some(user)) => Ok(user),
                other => Err(TypeError::mismatch(DataType::TEXT, other.data_type()).into()),
            },
        }
    }

    fn current_table(&self, name: &str) -> Option<&crate::catalog::Table> {
        self.namespace_ref(self.namespace())
            .ok()
            .and_then(|ns| ns.tables.get(name))
    }

    fn unknown_table(&self, table: &str) -> ExecError {
        CatalogError::UnknownTable {
            namespace: self.namespace().to_owned(),
            table: table.to_owned(),
        }
        .into()
    }

    fn create_table(&mut self, stmt: &CreateTable) -> ExecResult<()> {
        self.check_namespace_mutability(self.namespace())?;
        self.check_privilege(Privilege::Create)?;
        if self.current_table(&stmt.name).is_some() {
            if stmt.if_not_exists {
                return Ok(());
            }
            return Err(CatalogError::TableExists(stmt.name.clone()).into());
        }
        self.execute_ddl(DdlStatement::CreateTable(stmt))
    }

    fn drop_table(&mut self, stmt: &DropTable) -> ExecResult<()> {
        self.check_namespace_mutability(self.namespace())?;
        self.check_privilege(Privilege::Drop)?;
        let mut tables = Vec::with_capacity(stmt.tables.len());
        for table in &stmt.tables {
            match self.current_table(table) {
                Some(_) => tables.push(table.clone()),
                None if stmt.if_exists => {}
                None => return Err(self.unknown_table(table)),
            }
        }
        if tables.is_empty() {
            return Ok(());
        }
        let existing = DropTable {
            if_exists: stmt.if_exists,
            tables,
            cascade: stmt.cascade,
        };
        self.execute_ddl(DdlStatement::DropTable(&existing))
    }

    fn alter_table(&mut self, stmt: &AlterTable) -> ExecResult<()> {
        self.check_namespace_mutability(self.namespace())?;
        self.check_privilege(Privilege::Alter)?;
        let table = self
            .current_table(&stmt.table)
            .ok_or_else(|| self.unknown_table(&stmt.table))?;

        let must_exist = |column: &str| -> ExecResult<()> {
            match table.column(column) {
                Some(_) => Ok(()),
                None => Err(CatalogError::UnknownColumn {
                    table: stmt.table.clone(),
                    column: column.to_owned(),
                }
                .into()),
            }
        };
        let must_not_exist = |column: &str| -> ExecResult<()> {
            match table.column(column) {
                Some(_) => Err(CatalogError::ColumnExists {
                    table: stmt.table.clone(),
                    column: column.to_owned(),
                }
                .into()),
                None => Ok(()),
            }
        };
        match &stmt.action {
            AlterTableAction::AddColumn { name, .. } => must_not_exist(name)?,
            AlterTableAction::RenameColumn { from, to } => {
                must_exist(from)?;
                must_not_exist(to)?;
            }
            AlterTableAction::DropColumn(column)
            | AlterTableAction::SetNotNull(column)
            | AlterTableAction::DropNotNull(column)
            | AlterTableAction::DropDefault(column)
            | AlterTableAction::SetDefault { column, .. } => must_exist(column)?,
            AlterTableAction::AddConstraint(constraint) => {
                for column in constraint.constraint.columns() {
                    must_exist(column)?;
                }
            }
            AlterTableAction::RenameTable(to) => {
                if self.current_table(to).is_some() {
                    return Err(CatalogError::TableExists(to.clone()).into());
                }
            }
            AlterTableAction::DropConstraint(_) => {}
        }
        self.execute_ddl(DdlStatement::AlterTable(stmt))
    }

    fn create_index(&mut self, stmt: &CreateIndex) -> ExecResult<()> {
        self.check_namespace_mutability(self.namespace())?;
        self.check_privilege(Privilege::Create)?;
        let table = self
            .current_table(&stmt.table)
            .ok_or_else(|| self.unknown_table(&stmt.table))?;
        if let Some(column) = stmt.columns.iter().find(|c| table.column(c).is_none()) {
            return Err(CatalogError::UnknownColumn {
                table: stmt.table.clone(),
                column: column.clone(),
            }
            .into());
        }
        if self.find_index(&stmt.name) {
            if stmt.if_not_exists {
                return Ok(());
            }
            return Err(CatalogError::IndexExists(stmt.name.clone()).into());
        }
        self.execute_ddl(DdlStatement::CreateIndex(stmt))
    }

    fn drop_index(&mut self, stmt: &DropIndex) -> ExecResult<()> {
        self.check_namespace_mutability(self.namespace())?;
        self.check_privilege(Privilege::Drop)?;
        if !self.find_index(&stmt.name) {
            if stmt.if_exists {
                return Ok(());
            }
            return Err(CatalogError::UnknownIndex(stmt.name.clone()).into());
        }
        self.execute_ddl(DdlStatement::DropIndex(stmt))
    }

    /// Whether any table in the current namespace has an index called `name`.
    fn find_index(&self, name: &str) -> bool {
        self.namespace_ref(self.namespace())
            .map(|ns| ns.tables.values().any(|t| t.index(name).is_some()))
            .unwrap_or(false)
    }

    fn create_action(&mut self, stmt: &CreateAction) -> ExecResult<()> {
        let namespace = self.namespace().to_owned();
        self.check_namespace_mutability(&namespace)?;
        self.check_privilege(Privilege::Create)?;

        let mut def = stmt.clone();
        def.name = def.name.to_lowercase();
        let replacing = match self.namespace_ref(&namespace)?.function(&def.name).map(|f| &**f) {
            Some(Executable::Action(_)) if def.if_not_exists => return Ok(()),
            Some(Executable::Action(_)) if def.or_replace => true,
            Some(Executable::Action(_) | Executable::Method { .. }) => {
                return Err(CatalogError::ActionExists(def.name).into());
            }
            Some(Executable::Builtin(_)) | None => false,
        };

        let body = plan_action(&self.state, &namespace, &def, false)?;
        if replacing {
            self.db.delete_action(&namespace, &def.name).map_err(ExecError::Storage)?;
        }
        self.db
            .store_action(&namespace, &StoredAction::encode(&def)?)
            .map_err(ExecError::Storage)?;

        let name = def.name.clone();
        let action = Action {
            namespace: namespace.clone(),
            definition: def,
            body,
        };
        self.namespace_mut(&namespace)?
            .functions
            .insert(name.clone(), Arc::new(Executable::Action(Arc::new(action))));
        log::debug!("stored action `{namespace}.{name}`");
        Ok(())
    }

    fn drop_action(&mut self, stmt: &DropAction) -> ExecResult<()> {
        let namespace = self.namespace().to_owned();
        self.check_namespace_mutability(&namespace)?;
        self.check_privilege(Privilege::Drop)?;

        let name = stmt.name.to_lowercase();
        match self.namespace_ref(&namespace)?.function(&name).map(|f| &**f) {
            Some(Executable::Action(_)) => {}
            None if stmt.if_exists => return Ok(()),
            None => {
                return Err(CatalogError::UnknownFunction { namespace, name }.into());
            }
            Some(exe) => {
                return Err(CatalogError::CannotDrop {
                    name,
                    kind: exe.kind(),
                }
                .into());
            }
        }

        self.db.delete_action(&namespace, &name).map_err(ExecError::Storage)?;
        let functions = &mut self.namespace_mut(&namespace)?.functions;
        match builtin(&name) {
            Some(f) => functions.insert(name, Arc::new(Executable::Builtin(f))),
            None => functions.remove(&name),
        };
        Ok(())
    }

    fn create_namespace(&mut self, stmt: &CreateNamespace) -> ExecResult<()> {
        if !self.can_mutate() {
            return Err(AuthError::ReadOnlyContext.into());
        }
        self.check_global_privilege(Privilege::Create)?;
        let name = stmt.namespace.to_lowercase();
        if self.state.namespaces.contains_key(&name) {
            if stmt.if_not_exists {
                return Ok(());
            }
            return Err(CatalogError::NamespaceExists(name).into());
        }

        self.db
            .create_namespace(&name, NamespaceKind::User)
            .map_err(ExecError::Storage)?;
        self.state
            .get_mut()?
            .namespaces
            .insert(name.clone(), Namespace::new(&name, NamespaceKind::User));
        self.state.get_mut()?.access.register_namespace(&name);
        log::info!("created namespace `{name}`");
        Ok(())
    }

    fn drop_namespace(&mut self, stmt: &DropNamespace) -> ExecResult<()> {
        if !self.can_mutate() {
            return Err(AuthError::ReadOnlyContext.into());
        }
        self.check_global_privilege(Privilege::Drop)?;
        let name = stmt.namespace.to_lowercase();
        let Some(ns) = self.state.namespaces.get(&name) else {
            if stmt.if_exists {
                return Ok(());
            }
            return Err(CatalogError::UnknownNamespace(name).into());
        };
        match ns.kind {
            NamespaceKind::System => return Err(CatalogError::BuiltInNamespace(name).into()),
            NamespaceKind::Extension => return Err(CatalogError::ExtensionNamespace(name).into()),
            NamespaceKind::User if name == self.config.default_namespace => {
                return Err(CatalogError::BuiltInNamespace(name).into());
            }
            NamespaceKind::User => {}
        }

        self.db.drop_namespace(&name).map_err(ExecError::Storage)?;
        self.state.get_mut()?.namespaces.remove(&name);
        self.state.get_mut()?.access.unregister_namespace(&name);
        log::info!("dropped namespace `{name}`");
        Ok(())
    }

    fn grant_or_revoke(&mut self, stmt: &GrantOrRevoke) -> ExecResult<()> {
        if !self.can_mutate() {
            return Err(AuthError::ReadOnlyContext.into());
        }
        self.check_global_privilege(Privilege::Roles)?;
        match &stmt.subject {
            GrantSubject::Privileges { privileges, role } => {
                let privileges = Privilege::parse_list(privileges)?;
                let role = role.to_lowercase();
                let namespace = stmt.namespace.as_ref().map(|ns| ns.to_lowercase());
                if let Some(ns) = &namespace
                    && !self.state.namespaces.contains_key(ns)
                {
                    return Err(CatalogError::UnknownNamespace(ns.clone()).into());
                }
                let access = &mut self.state.get_mut()?.access;
                if stmt.is_grant {
                    access.grant_privileges(&mut *self.db, &role, &privileges, namespace.as_deref(), stmt.if_)
                } else {
                    access.revoke_privileges(&mut *self.db, &role, &privileges, namespace.as_deref(), stmt.if_)
                }
            }
            GrantSubject::Role { role, user } => {
                if stmt.namespace.is_some() {
                    return Err(RoleError::NamespacedAssignment.into());
                }
                let role = role.to_lowercase();
                if role == crate::access::OWNER_ROLE {
                    return Err(RoleError::BuiltInRole(role).into());
                }
                let user = self.eval_user(user)?;
                let access = &mut self.state.get_mut()?.access;
                if stmt.is_grant {
                    access.assign_role(&mut *self.db, &role, &user, stmt.if_)
                } else {
                    access.unassign_role(&mut *self.db, &role, &user, stmt.if_)
                }
            }
        }
    }

    fn transfer_ownership(&mut self, stmt: &TransferOwnership) -> ExecResult<()> {
        if !self.can_mutate() {
            return Err(AuthError::ReadOnlyContext.into());
        }
        if !self.is_owner() {
            return Err(AuthError::NotOwner.into());
        }
        let user = self.eval_user(&stmt.to)?;
        self.state.get_mut()?.access.transfer_ownership(&mut *self.db, &user)?;
        log::info!("transferred ownership to `{user}`");
        Ok(())
    }

    fn create_role(&mut self, stmt: &CreateRole) -> ExecResult<()> {
        if !self.can_mutate() {
            return Err(AuthError::ReadOnlyContext.into());
        }
        self.check_global_privilege(Privilege::Roles)?;
        let role = stmt.role.to_lowercase();
        if stmt.if_not_exists && self.state.access.role_exists(&role) {
            return Ok(());
        }
        self.state.get_mut()?.access.create_role(&mut *self.db, &role)
    }

    fn drop_role(&mut self, stmt: &DropRole) -> ExecResult<()> {
        if !self.can_mutate() {
            return Err(AuthError::ReadOnlyContext.into());
        }
        self.check_global_privilege(Privilege::Roles)?;
        let role = stmt.role.to_lowercase();
        if stmt.if_exists && !self.state.access.role_exists(&role) {
            return Ok(());
        }
        self.state.get_mut()?.access.drop_role(&mut *self.db, &role)
    }

    fn use_extension(&mut self, stmt: &UseExtension) -> ExecResult<()> {
        if !self.can_mutate() {
            return Err(AuthError::ReadOnlyContext.into());
        }
        self.check_global_privilege(Privilege::Use)?;
        let alias = stmt.alias.to_lowercase();
        if self.state.namespaces.contains_key(&alias) {
            if stmt.if_not_exists {
                return Ok(());
            }
            return Err(CatalogError::NamespaceExists(alias).into());
        }
        let extension = stmt.extension.to_lowercase();
        let initializer = self
            .extensions
            .get(&extension)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownExtension(extension.clone()))?;

        let mut config = Vec::with_capacity(stmt.config.len());
        for (key, expr) in &stmt.config {
            config.push((key.to_lowercase(), self.eval(expr)?));
        }
        let instance = initializer
            .initialize(&alias, &config)
            .map_err(ExecError::Extension)?;

        self.db
            .create_namespace(&alias, NamespaceKind::Extension)
            .map_err(ExecError::Storage)?;
        self.state
            .get_mut()?
            .namespaces
            .insert(alias.clone(), extension_namespace(&alias, &extension, instance.clone()));
        self.state.get_mut()?.access.register_namespace(&alias);
        self.hook_frame(&alias, |ctx| instance.on_use(ctx))?;
        self.db
            .store_extension(&StoredExtension::encode(&alias, &extension, &config)?)
            .map_err(ExecError::Storage)?;
        log::info!("using extension `{extension}` as `{alias}`");
        Ok(())
    }

    fn unuse_extension(&mut self, stmt: &UnuseExtension) -> ExecResult<()> {
        if !self.can_mutate() {
            return Err(AuthError::ReadOnlyContext.into());
        }
        self.check_global_privilege(Privilege::Use)?;
        let alias = stmt.alias.to_lowercase();
        let Some(ns) = self.state.namespaces.get(&alias) else {
            if stmt.if_exists {
                return Ok(());
            }
            return Err(CatalogError::UnknownNamespace(alias).into());
        };
        let Some(binding) = ns.extension.clone() else {
            return Err(CatalogError::NotAnExtension(alias).into());
        };

        self.hook_frame(&alias, |ctx| binding.instance.on_unuse(ctx))?;
        self.db.delete_extension(&alias).map_err(ExecError::Storage)?;
        self.db.drop_namespace(&alias).map_err(ExecError::Storage)?;
        self.state.get_mut()?.namespaces.remove(&alias);
        self.state.get_mut()?.access.unregister_namespace(&alias);
        log::info!("stopped using extension `{}` as `{alias}`", binding.extension);
        Ok(())
    }
}

/// The namespace of an extension instance: built-ins plus the instance's methods.
pub(crate) fn extension_namespace(
    alias: &str,
    extension: &str,
    instance: Arc<dyn crate::extension::ExtensionInstance>,
) -> Namespace {
    let mut ns = Namespace::new(alias, NamespaceKind::Extension);
    for method in instance.methods() {
        ns.functions.insert(
            method.name.clone(),
            Arc::new(Executable::Method {
                namespace: alias.to_owned(),
                method: Arc::new(method),
            }),
        );
    }
    ns.extension = Some(ExtensionBinding {
        extension: extension.to_owned(),
        instance,
    });
    ns
}
