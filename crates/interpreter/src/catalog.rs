//! The durable image the interpreter rebuilds itself from, and the schema cache types.

use quill_ast::CreateAction;
use quill_values::{DataType, Value};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::errors::{ExecError, ExecResult};
use crate::privilege::Privilege;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum NamespaceKind {
    /// Created with CREATE NAMESPACE
    User,
    /// Built into the interpreter and read-only
    System,
    /// Owned by an extension instance
    Extension,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: DataType,
    pub nullable: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum IndexKind {
    Primary,
    Unique,
    Btree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub kind: IndexKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum ConstraintKind {
    Unique,
    Check,
    ForeignKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
}

/// The cached schema of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub constraints: Vec<Constraint>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNamespace {
    pub name: String,
    pub kind: NamespaceKind,
}

/// One row of a role's privileges. `namespace: None` is a global grant.
///
/// A global privilege can be revoked for a single namespace, which is stored as
/// `granted: false` on that namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPrivilege {
    pub role: String,
    pub namespace: Option<String>,
    pub privilege: Privilege,
    pub granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub user: String,
    pub role: String,
}

/// A persisted action definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAction {
    pub name: String,
    /// The JSON encoded [`CreateAction`]
    pub definition: String,
}

impl StoredAction {
    pub fn encode(action: &CreateAction) -> ExecResult<Self> {
        let definition = serde_json::to_string(action).map_err(|e| ExecError::Storage(e.into()))?;
        Ok(Self {
            name: action.name.clone(),
            definition,
        })
    }

    pub fn decode(&self) -> ExecResult<CreateAction> {
        serde_json::from_str(&self.definition).map_err(|e| {
            ExecError::Storage(anyhow::Error::new(e).context(format!("decoding stored action `{}`", self.name)))
        })
    }
}

/// One `key: value` pair of an extension's configuration, stored as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub ty: String,
}

/// A persisted `USE extension {...} AS alias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredExtension {
    pub alias: String,
    pub extension: String,
    pub config: Vec<ConfigEntry>,
}

impl StoredExtension {
    pub fn encode(alias: &str, extension: &str, config: &[(String, Value)]) -> ExecResult<Self> {
        let config = config
            .iter()
            .map(|(key, value)| {
                Ok(ConfigEntry {
                    key: key.clone(),
                    value: value.stringify()?,
                    ty: value.data_type().to_string(),
                })
            })
            .collect::<ExecResult<_>>()?;
        Ok(Self {
            alias: alias.to_owned(),
            extension: extension.to_owned(),
            config,
        })
    }

    pub fn decode_config(&self) -> ExecResult<Vec<(String, Value)>> {
        self.config
            .iter()
            .map(|entry| {
                let ty: DataType = entry.ty.parse()?;
                Ok((entry.key.clone(), Value::parse(&entry.value, &ty)?))
            })
            .collect()
    }
}

/// Reads and writes the interpreter's durable image.
///
/// Every method runs inside the caller's storage transaction, so a failed call
/// leaves nothing behind once that transaction is rolled back.
pub trait CatalogStore {
    /// Whether the image has been initialized by [`crate::Interpreter::new`].
    fn is_initialized(&mut self) -> anyhow::Result<bool>;

    fn list_namespaces(&mut self) -> anyhow::Result<Vec<StoredNamespace>>;
    fn create_namespace(&mut self, name: &str, kind: NamespaceKind) -> anyhow::Result<()>;
    /// Drops the namespace along with its tables, actions and namespaced privileges.
    fn drop_namespace(&mut self, name: &str) -> anyhow::Result<()>;
    fn list_tables(&mut self, namespace: &str) -> anyhow::Result<Vec<Table>>;

    fn list_roles(&mut self) -> anyhow::Result<Vec<String>>;
    fn create_role(&mut self, role: &str) -> anyhow::Result<()>;
    /// Drops the role along with its privileges and user assignments.
    fn drop_role(&mut self, role: &str) -> anyhow::Result<()>;
    fn list_privileges(&mut self) -> anyhow::Result<Vec<StoredPrivilege>>;
    /// Inserts the row, or updates `granted` if the role already has a row for the
    /// privilege on that namespace.
    fn upsert_privilege(&mut self, privilege: &StoredPrivilege) -> anyhow::Result<()>;
    /// Deletes the role's rows for `privilege` on `namespace`. With `namespace: None`
    /// only the global row is deleted.
    fn delete_privilege(&mut self, role: &str, namespace: Option<&str>, privilege: Privilege) -> anyhow::Result<()>;
    fn list_user_roles(&mut self) -> anyhow::Result<Vec<UserRole>>;
    fn assign_role(&mut self, user: &str, role: &str) -> anyhow::Result<()>;
    fn unassign_role(&mut self, user: &str, role: &str) -> anyhow::Result<()>;

    fn list_actions(&mut self, namespace: &str) -> anyhow::Result<Vec<StoredAction>>;
    fn store_action(&mut self, namespace: &str, action: &StoredAction) -> anyhow::Result<()>;
    fn delete_action(&mut self, namespace: &str, name: &str) -> anyhow::Result<()>;

    fn list_extensions(&mut self) -> anyhow::Result<Vec<StoredExtension>>;
    fn store_extension(&mut self, extension: &StoredExtension) -> anyhow::Result<()>;
    fn delete_extension(&mut self, alias: &str) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quill_ast::{ActionStmt, Expr, Modifier, NamedType};
    use quill_values::ArrayValue;

    #[test]
    fn actions_encode() {
        let action = CreateAction::new(
            "greet",
            vec![Modifier::Public, Modifier::View],
            vec![ActionStmt::return_values(vec![Expr::var("$name")])],
        )
        .params(vec![NamedType::new("$name", DataType::TEXT)])
        .returns(false, vec![NamedType::new("greeting", DataType::TEXT)]);

        let stored = StoredAction::encode(&action).unwrap();
        assert_eq!(stored.name, "greet");
        assert_eq!(stored.decode().unwrap(), action);

        let broken = StoredAction {
            name: "broken".into(),
            definition: "{".into(),
        };
        assert!(broken.decode().unwrap_err().to_string().contains("`broken`"));
    }

    #[test]
    fn extension_config_encodes() {
        let config = vec![
            ("limit".to_string(), Value::int(10)),
            ("name".to_string(), Value::Text(None)),
            (
                "tags".to_string(),
                Value::Array(ArrayValue::from_values(vec![Value::text("a"), Value::text("b")]).unwrap()),
            ),
        ];
        let stored = StoredExtension::encode("cache", "kv", &config).unwrap();
        assert_eq!(
            stored.config[0],
            ConfigEntry {
                key: "limit".into(),
                value: "10".into(),
                ty: "int8".into(),
            }
        );
        assert_eq!(stored.decode_config().unwrap(), config);
    }

    #[test]
    fn namespace_kind_names() {
        assert_eq!(NamespaceKind::Extension.to_string(), "EXTENSION");
        assert_eq!("system".parse::<NamespaceKind>().unwrap(), NamespaceKind::System);
    }
}
