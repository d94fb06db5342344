//! The durable image and the transactions that read and write it.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, anyhow, bail};
use itertools::Itertools;
use quill_ast::Expr;
use quill_ast::ddl::{AlterTable, AlterTableAction, ConstraintDef, CreateIndex, CreateTable, NamedConstraint};
use quill_interpreter::catalog::ConstraintKind;
use quill_interpreter::{
    AccessMode, CatalogStore, Column, Constraint, Db, Ddl, DdlStatement, Index, IndexKind, IntegrityError,
    NamespaceKind, Privilege, Query, Row, StoredAction, StoredExtension, StoredNamespace, StoredPrivilege, Table,
    UserRole,
};
use quill_values::Value;

use crate::sql;

/// One table: its schema, column defaults and rows in insertion order.
#[derive(Debug, Clone)]
pub(crate) struct TableData {
    pub(crate) schema: Table,
    pub(crate) defaults: BTreeMap<String, Expr>,
    pub(crate) rows: Vec<Vec<Value>>,
}

impl TableData {
    pub(crate) fn column_index(&self, name: &str) -> anyhow::Result<usize> {
        self.schema
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| anyhow!("column \"{name}\" of relation \"{}\" does not exist", self.schema.name))
    }

    /// Fails with an [`IntegrityError`] if any row breaks a NOT NULL, primary key or
    /// unique constraint.
    pub(crate) fn check_integrity(&self) -> anyhow::Result<()> {
        for (i, column) in self.schema.columns.iter().enumerate() {
            if !column.nullable && self.rows.iter().any(|row| row[i].is_null()) {
                return Err(IntegrityError(format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    column.name, self.schema.name
                ))
                .into());
            }
        }
        for index in &self.schema.indexes {
            if index.kind == IndexKind::Btree {
                continue;
            }
            let positions = index
                .columns
                .iter()
                .map(|c| self.column_index(c))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let keys: Vec<Vec<&Value>> = self
                .rows
                .iter()
                .map(|row| positions.iter().map(|&p| &row[p]).collect())
                .filter(|key: &Vec<&Value>| key.iter().all(|v| !v.is_null()))
                .collect();
            for (i, key) in keys.iter().enumerate() {
                if keys[i + 1..].contains(key) {
                    return Err(IntegrityError(format!(
                        "duplicate key value violates unique constraint \"{}\"",
                        index.name
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NamespaceData {
    pub(crate) kind: NamespaceKind,
    pub(crate) tables: BTreeMap<String, TableData>,
}

/// Everything the store holds.
#[derive(Debug, Clone, Default)]
pub struct Image {
    pub(crate) namespaces: BTreeMap<String, NamespaceData>,
    roles: BTreeSet<String>,
    privileges: Vec<StoredPrivilege>,
    user_roles: Vec<UserRole>,
    /// By namespace, then by name.
    actions: BTreeMap<String, BTreeMap<String, StoredAction>>,
    extensions: BTreeMap<String, StoredExtension>,
}

impl Image {
    pub(crate) fn table(&self, namespace: &str, table: &str) -> anyhow::Result<&TableData> {
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.tables.get(table))
            .ok_or_else(|| anyhow!("relation \"{namespace}.{table}\" does not exist"))
    }

    pub(crate) fn table_mut(&mut self, namespace: &str, table: &str) -> anyhow::Result<&mut TableData> {
        self.namespaces
            .get_mut(namespace)
            .and_then(|ns| ns.tables.get_mut(table))
            .ok_or_else(|| anyhow!("relation \"{namespace}.{table}\" does not exist"))
    }

    fn tables_mut(&mut self, namespace: &str) -> anyhow::Result<&mut BTreeMap<String, TableData>> {
        self.namespaces
            .get_mut(namespace)
            .map(|ns| &mut ns.tables)
            .ok_or_else(|| anyhow!("schema \"{namespace}\" does not exist"))
    }

    /// Row counts by table, for checking what a transaction left behind.
    pub fn row_count(&self, namespace: &str, table: &str) -> Option<usize> {
        self.table(namespace, table).ok().map(|t| t.rows.len())
    }

    fn apply_ddl(&mut self, namespace: &str, statement: DdlStatement<'_>) -> anyhow::Result<()> {
        match statement {
            DdlStatement::CreateTable(t) => {
                let data = create_table(t)?;
                self.tables_mut(namespace)?.insert(t.name.clone(), data);
            }
            DdlStatement::DropTable(t) => {
                let tables = self.tables_mut(namespace)?;
                for name in &t.tables {
                    if tables.remove(name).is_none() && !t.if_exists {
                        bail!("table \"{name}\" does not exist");
                    }
                }
            }
            DdlStatement::AlterTable(t) => self.alter_table(namespace, t)?,
            DdlStatement::CreateIndex(i) => create_index(self.table_mut(namespace, &i.table)?, i)?,
            DdlStatement::DropIndex(i) => {
                let found = self
                    .tables_mut(namespace)?
                    .values_mut()
                    .find(|t| t.schema.index(&i.name).is_some());
                match found {
                    Some(t) => t.schema.indexes.retain(|idx| idx.name != i.name),
                    None if i.if_exists => {}
                    None => bail!("index \"{}\" does not exist", i.name),
                }
            }
        }
        Ok(())
    }

    fn alter_table(&mut self, namespace: &str, stmt: &AlterTable) -> anyhow::Result<()> {
        if let AlterTableAction::RenameTable(to) = &stmt.action {
            let tables = self.tables_mut(namespace)?;
            let mut data = tables
                .remove(&stmt.table)
                .ok_or_else(|| anyhow!("relation \"{}\" does not exist", stmt.table))?;
            data.schema.name = to.clone();
            tables.insert(to.clone(), data);
            return Ok(());
        }

        let table = self.table_mut(namespace, &stmt.table)?;
        match &stmt.action {
            AlterTableAction::AddColumn { name, ty } => {
                table.schema.columns.push(Column {
                    name: name.clone(),
                    ty: *ty,
                    nullable: true,
                    primary_key: false,
                });
                for row in &mut table.rows {
                    row.push(Value::null_of(ty));
                }
            }
            AlterTableAction::DropColumn(name) => {
                let i = table.column_index(name)?;
                table.schema.columns.remove(i);
                for row in &mut table.rows {
                    row.remove(i);
                }
                table.schema.indexes.retain(|idx| !idx.columns.contains(name));
                table.defaults.remove(name);
            }
            AlterTableAction::RenameColumn { from, to } => {
                let i = table.column_index(from)?;
                table.schema.columns[i].name = to.clone();
                for idx in &mut table.schema.indexes {
                    idx.columns.iter_mut().filter(|c| *c == from).for_each(|c| *c = to.clone());
                }
                if let Some(default) = table.defaults.remove(from) {
                    table.defaults.insert(to.clone(), default);
                }
            }
            AlterTableAction::SetNotNull(name) => {
                let i = table.column_index(name)?;
                table.schema.columns[i].nullable = false;
            }
            AlterTableAction::DropNotNull(name) => {
                let i = table.column_index(name)?;
                if table.schema.columns[i].primary_key {
                    bail!("column \"{name}\" is in a primary key");
                }
                table.schema.columns[i].nullable = true;
            }
            AlterTableAction::SetDefault { column, value } => {
                table.column_index(column)?;
                table.defaults.insert(column.clone(), value.clone());
            }
            AlterTableAction::DropDefault(column) => {
                table.defaults.remove(column);
            }
            AlterTableAction::AddConstraint(constraint) => add_constraint(table, constraint)?,
            AlterTableAction::DropConstraint(name) => {
                let before = table.schema.indexes.len() + table.schema.constraints.len();
                table.schema.indexes.retain(|idx| idx.name != *name || idx.kind == IndexKind::Btree);
                table.schema.constraints.retain(|c| c.name != *name);
                if before == table.schema.indexes.len() + table.schema.constraints.len() {
                    bail!("constraint \"{name}\" of relation \"{}\" does not exist", stmt.table);
                }
            }
            AlterTableAction::RenameTable(_) => {}
        }
        table.check_integrity()
    }
}

fn create_table(stmt: &CreateTable) -> anyhow::Result<TableData> {
    if let Some(dup) = stmt.columns.iter().map(|c| &c.name).duplicates().next() {
        bail!("column \"{dup}\" specified more than once");
    }

    let mut table = TableData {
        schema: Table {
            name: stmt.name.clone(),
            columns: stmt
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    ty: c.ty,
                    nullable: !c.not_null,
                    primary_key: false,
                })
                .collect(),
            indexes: vec![],
            constraints: vec![],
        },
        defaults: stmt
            .columns
            .iter()
            .filter_map(|c| c.default.clone().map(|d| (c.name.clone(), d)))
            .collect(),
        rows: vec![],
    };

    let inline_pk: Vec<String> = stmt
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.clone())
        .collect();
    if !inline_pk.is_empty() {
        add_constraint(
            &mut table,
            &NamedConstraint {
                name: None,
                constraint: ConstraintDef::PrimaryKey(inline_pk),
            },
        )?;
    }
    for column in stmt.columns.iter().filter(|c| c.unique) {
        add_constraint(
            &mut table,
            &NamedConstraint {
                name: None,
                constraint: ConstraintDef::Unique(vec![column.name.clone()]),
            },
        )?;
    }
    for constraint in &stmt.constraints {
        add_constraint(&mut table, constraint)?;
    }
    Ok(table)
}

fn add_constraint(table: &mut TableData, constraint: &NamedConstraint) -> anyhow::Result<()> {
    let columns = constraint.constraint.columns().to_vec();
    for column in &columns {
        table.column_index(column)?;
    }
    let name = |suffix: &str| {
        constraint
            .name
            .clone()
            .unwrap_or_else(|| format!("{}_{}_{suffix}", table.schema.name, columns.join("_")))
    };
    match &constraint.constraint {
        ConstraintDef::PrimaryKey(_) => {
            if table.schema.indexes.iter().any(|i| i.kind == IndexKind::Primary) {
                bail!("multiple primary keys for table \"{}\" are not allowed", table.schema.name);
            }
            for column in table.schema.columns.iter_mut().filter(|c| columns.contains(&c.name)) {
                column.primary_key = true;
                column.nullable = false;
            }
            let name = constraint
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_pkey", table.schema.name));
            table.schema.indexes.insert(
                0,
                Index {
                    name,
                    columns,
                    kind: IndexKind::Primary,
                },
            );
        }
        ConstraintDef::Unique(_) => {
            let name = name("key");
            table.schema.indexes.push(Index {
                name,
                columns,
                kind: IndexKind::Unique,
            });
        }
        ConstraintDef::Check(_) => {
            let name = constraint
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_check", table.schema.name));
            table.schema.constraints.push(Constraint {
                name,
                kind: ConstraintKind::Check,
                columns,
            });
        }
        ConstraintDef::ForeignKey { .. } => {
            let name = name("fkey");
            table.schema.constraints.push(Constraint {
                name,
                kind: ConstraintKind::ForeignKey,
                columns,
            });
        }
    }
    table.check_integrity()
}

fn create_index(table: &mut TableData, stmt: &CreateIndex) -> anyhow::Result<()> {
    for column in &stmt.columns {
        table.column_index(column)?;
    }
    table.schema.indexes.push(Index {
        name: stmt.name.clone(),
        columns: stmt.columns.clone(),
        kind: if stmt.unique { IndexKind::Unique } else { IndexKind::Btree },
    });
    table.check_integrity()
}

/// A store that lives in memory. Changes are made through a [`MemoryTx`] and only
/// become visible once it commits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    image: Image,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, mode: AccessMode) -> MemoryTx<'_> {
        MemoryTx {
            work: self.image.clone(),
            store: self,
            mode,
        }
    }

    pub fn image(&self) -> &Image {
        &self.image
    }
}

/// An open transaction. Dropping it without calling [`MemoryTx::commit`] rolls it back.
pub struct MemoryTx<'s> {
    store: &'s mut MemoryStore,
    work: Image,
    mode: AccessMode,
}

impl MemoryTx<'_> {
    pub fn commit(self) {
        self.store.image = self.work;
    }

    fn writable(&self) -> anyhow::Result<()> {
        match self.mode {
            AccessMode::ReadWrite => Ok(()),
            AccessMode::ReadOnly => bail!("cannot write in a read-only transaction"),
        }
    }
}

impl CatalogStore for MemoryTx<'_> {
    fn is_initialized(&mut self) -> anyhow::Result<bool> {
        Ok(!self.work.namespaces.is_empty())
    }

    fn list_namespaces(&mut self) -> anyhow::Result<Vec<StoredNamespace>> {
        Ok(self
            .work
            .namespaces
            .iter()
            .map(|(name, ns)| StoredNamespace {
                name: name.clone(),
                kind: ns.kind,
            })
            .collect())
    }

    fn create_namespace(&mut self, name: &str, kind: NamespaceKind) -> anyhow::Result<()> {
        self.writable()?;
        if self.work.namespaces.contains_key(name) {
            bail!("schema \"{name}\" already exists");
        }
        self.work.namespaces.insert(
            name.to_owned(),
            NamespaceData {
                kind,
                tables: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn drop_namespace(&mut self, name: &str) -> anyhow::Result<()> {
        self.writable()?;
        self.work
            .namespaces
            .remove(name)
            .with_context(|| format!("schema \"{name}\" does not exist"))?;
        self.work.actions.remove(name);
        self.work.privileges.retain(|p| p.namespace.as_deref() != Some(name));
        Ok(())
    }

    fn list_tables(&mut self, namespace: &str) -> anyhow::Result<Vec<Table>> {
        let ns = self
            .work
            .namespaces
            .get(namespace)
            .with_context(|| format!("schema \"{namespace}\" does not exist"))?;
        Ok(ns.tables.values().map(|t| t.schema.clone()).collect())
    }

    fn list_roles(&mut self) -> anyhow::Result<Vec<String>> {
        Ok(self.work.roles.iter().cloned().collect())
    }

    fn create_role(&mut self, role: &str) -> anyhow::Result<()> {
        self.writable()?;
        if !self.work.roles.insert(role.to_owned()) {
            bail!("role \"{role}\" already exists");
        }
        Ok(())
    }

    fn drop_role(&mut self, role: &str) -> anyhow::Result<()> {
        self.writable()?;
        if !self.work.roles.remove(role) {
            bail!("role \"{role}\" does not exist");
        }
        self.work.privileges.retain(|p| p.role != role);
        self.work.user_roles.retain(|ur| ur.role != role);
        Ok(())
    }

    fn list_privileges(&mut self) -> anyhow::Result<Vec<StoredPrivilege>> {
        Ok(self.work.privileges.clone())
    }

    fn upsert_privilege(&mut self, privilege: &StoredPrivilege) -> anyhow::Result<()> {
        self.writable()?;
        let existing = self.work.privileges.iter_mut().find(|p| {
            p.role == privilege.role && p.namespace == privilege.namespace && p.privilege == privilege.privilege
        });
        match existing {
            Some(p) => p.granted = privilege.granted,
            None => self.work.privileges.push(privilege.clone()),
        }
        Ok(())
    }

    fn delete_privilege(&mut self, role: &str, namespace: Option<&str>, privilege: Privilege) -> anyhow::Result<()> {
        self.writable()?;
        self.work
            .privileges
            .retain(|p| !(p.role == role && p.namespace.as_deref() == namespace && p.privilege == privilege));
        Ok(())
    }

    fn list_user_roles(&mut self) -> anyhow::Result<Vec<UserRole>> {
        Ok(self.work.user_roles.clone())
    }

    fn assign_role(&mut self, user: &str, role: &str) -> anyhow::Result<()> {
        self.writable()?;
        self.work.user_roles.push(UserRole {
            user: user.to_owned(),
            role: role.to_owned(),
        });
        Ok(())
    }

    fn unassign_role(&mut self, user: &str, role: &str) -> anyhow::Result<()> {
        self.writable()?;
        self.work.user_roles.retain(|ur| !(ur.user == user && ur.role == role));
        Ok(())
    }

    fn list_actions(&mut self, namespace: &str) -> anyhow::Result<Vec<StoredAction>> {
        Ok(self
            .work
            .actions
            .get(namespace)
            .map(|actions| actions.values().cloned().collect())
            .unwrap_or_default())
    }

    fn store_action(&mut self, namespace: &str, action: &StoredAction) -> anyhow::Result<()> {
        self.writable()?;
        let actions = self.work.actions.entry(namespace.to_owned()).or_default();
        if actions.contains_key(&action.name) {
            bail!("action \"{namespace}.{}\" already exists", action.name);
        }
        actions.insert(action.name.clone(), action.clone());
        Ok(())
    }

    fn delete_action(&mut self, namespace: &str, name: &str) -> anyhow::Result<()> {
        self.writable()?;
        self.work
            .actions
            .get_mut(namespace)
            .and_then(|actions| actions.remove(name))
            .with_context(|| format!("action \"{namespace}.{name}\" does not exist"))?;
        Ok(())
    }

    fn list_extensions(&mut self) -> anyhow::Result<Vec<StoredExtension>> {
        Ok(self.work.extensions.values().cloned().collect())
    }

    fn store_extension(&mut self, extension: &StoredExtension) -> anyhow::Result<()> {
        self.writable()?;
        self.work.extensions.insert(extension.alias.clone(), extension.clone());
        Ok(())
    }

    fn delete_extension(&mut self, alias: &str) -> anyhow::Result<()> {
        self.writable()?;
        self.work
            .extensions
            .remove(alias)
            .with_context(|| format!("extension \"{alias}\" is not in use"))?;
        Ok(())
    }
}

impl Db for MemoryTx<'_> {
    fn access_mode(&self) -> AccessMode {
        self.mode
    }

    fn query(&mut self, query: &Query<'_>, on_row: &mut dyn FnMut(Row) -> anyhow::Result<()>) -> anyhow::Result<()> {
        log::trace!("query: {}", query.sql);
        if query.statement.is_mutating() {
            self.writable()?;
        }
        sql::run(&mut self.work, query, on_row)
    }

    fn execute_ddl(&mut self, ddl: &Ddl<'_>) -> anyhow::Result<()> {
        log::trace!("ddl: {}", ddl.sql);
        self.writable()?;
        self.work.apply_ddl(ddl.namespace, ddl.statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quill_ast::ddl::ColumnDef;
    use quill_values::DataType;

    fn users() -> CreateTable {
        CreateTable {
            if_not_exists: false,
            name: "users".into(),
            columns: vec![
                ColumnDef::new("id", DataType::INT).primary_key(),
                ColumnDef::new("name", DataType::TEXT).not_null(),
            ],
            constraints: vec![],
        }
    }

    #[test]
    fn primary_keys_are_indexed() {
        let table = create_table(&users()).unwrap();
        assert_eq!(
            table.schema.indexes,
            vec![Index {
                name: "users_pkey".into(),
                columns: vec!["id".into()],
                kind: IndexKind::Primary,
            }]
        );
        assert!(!table.schema.columns[0].nullable);
    }

    #[test]
    fn integrity() {
        let mut table = create_table(&users()).unwrap();
        table.rows.push(vec![Value::int(1), Value::text("a")]);
        table.rows.push(vec![Value::int(1), Value::text("b")]);
        let err = table.check_integrity().unwrap_err();
        assert_eq!(
            err.downcast_ref::<IntegrityError>().map(|e| e.0.as_str()),
            Some("duplicate key value violates unique constraint \"users_pkey\"")
        );

        table.rows[1] = vec![Value::int(2), Value::Text(None)];
        assert!(table.check_integrity().unwrap_err().is::<IntegrityError>());
    }

    #[test]
    fn uncommitted_work_is_discarded() {
        let mut store = MemoryStore::new();
        let mut tx = store.begin(AccessMode::ReadWrite);
        tx.create_namespace("main", NamespaceKind::User).unwrap();
        drop(tx);
        assert!(!store.begin(AccessMode::ReadOnly).is_initialized().unwrap());

        let mut tx = store.begin(AccessMode::ReadWrite);
        tx.create_namespace("main", NamespaceKind::User).unwrap();
        tx.commit();
        assert!(store.begin(AccessMode::ReadOnly).is_initialized().unwrap());
    }

    #[test]
    fn read_only_transactions_cannot_write() {
        let mut store = MemoryStore::new();
        let mut tx = store.begin(AccessMode::ReadOnly);
        assert!(tx.create_role("r").is_err());
    }
}
