//! Roles, privileges and the in-memory mirror of what storage says about them.
//!
//! Every mutating method writes to storage first and only then updates the mirror,
//! so a failed write never leaves the two out of step. [`AccessController::load`]
//! rebuilds the mirror from storage alone.

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{CatalogStore, StoredPrivilege};
use crate::errors::{CatalogError, ExecError, ExecResult, RoleError};
use crate::privilege::Privilege;

/// Holds every privilege. Never granted to or revoked from directly.
pub const OWNER_ROLE: &str = "owner";
/// Applies to every caller, on top of their assigned roles.
pub const DEFAULT_ROLE: &str = "default";

/// What the default role is granted when a store is initialized.
const DEFAULT_PRIVILEGES: &[Privilege] = &[Privilege::Select, Privilege::Call];

pub fn is_built_in_role(role: &str) -> bool {
    role == OWNER_ROLE || role == DEFAULT_ROLE
}

/// The privileges of one role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Perms {
    /// Privileges granted globally. New namespaces start with these.
    global: BTreeSet<Privilege>,
    /// What the role may do in each namespace, global grants included.
    namespaced: BTreeMap<String, BTreeSet<Privilege>>,
}

impl Perms {
    fn new<'a>(namespaces: impl IntoIterator<Item = &'a String>) -> Self {
        Self {
            global: BTreeSet::new(),
            namespaced: namespaces.into_iter().map(|ns| (ns.clone(), BTreeSet::new())).collect(),
        }
    }

    fn can_do(&self, privilege: Privilege, namespace: Option<&str>) -> bool {
        match namespace {
            None => self.global.contains(&privilege),
            Some(ns) => self.namespaced.get(ns).is_some_and(|set| set.contains(&privilege)),
        }
    }

    fn grant(&mut self, namespace: Option<&str>, privileges: &[Privilege]) {
        match namespace {
            None => {
                self.global.extend(privileges);
                for set in self.namespaced.values_mut() {
                    set.extend(privileges);
                }
            }
            Some(ns) => self.namespaced.entry(ns.to_owned()).or_default().extend(privileges),
        }
    }

    fn revoke(&mut self, namespace: Option<&str>, privileges: &[Privilege]) {
        let remove = |set: &mut BTreeSet<Privilege>| privileges.iter().for_each(|p| _ = set.remove(p));
        match namespace {
            None => {
                remove(&mut self.global);
                self.namespaced.values_mut().for_each(remove);
            }
            Some(ns) => {
                if let Some(set) = self.namespaced.get_mut(ns) {
                    remove(set);
                }
            }
        }
    }
}

/// Decides who may do what, globally or in a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessController {
    roles: BTreeMap<String, Perms>,
    /// Roles assigned to each user. Does not include the default role.
    user_roles: BTreeMap<String, Vec<String>>,
    namespaces: BTreeSet<String>,
}

impl AccessController {
    /// Creates the built-in roles in an empty store and makes `owner` the owner.
    /// Everyone starts out able to read and to call actions.
    pub fn initialize(store: &mut dyn CatalogStore, owner: Option<&str>) -> ExecResult<()> {
        store.create_role(OWNER_ROLE).map_err(ExecError::Storage)?;
        store.create_role(DEFAULT_ROLE).map_err(ExecError::Storage)?;
        for privilege in DEFAULT_PRIVILEGES {
            store
                .upsert_privilege(&StoredPrivilege {
                    role: DEFAULT_ROLE.to_owned(),
                    namespace: None,
                    privilege: *privilege,
                    granted: true,
                })
                .map_err(ExecError::Storage)?;
        }
        if let Some(owner) = owner {
            store.assign_role(owner, OWNER_ROLE).map_err(ExecError::Storage)?;
        }
        Ok(())
    }

    /// Rebuilds the controller from storage.
    pub fn load(store: &mut dyn CatalogStore) -> ExecResult<Self> {
        let mut ac = Self::default();
        for ns in store.list_namespaces().map_err(ExecError::Storage)? {
            ac.register_namespace(&ns.name);
        }
        for role in store.list_roles().map_err(ExecError::Storage)? {
            let perms = Perms::new(&ac.namespaces);
            ac.roles.insert(role, perms);
        }

        // Global rows first, so namespaced rows apply on top of what they grant.
        let mut privileges = store.list_privileges().map_err(ExecError::Storage)?;
        privileges.sort_by_key(|p| p.namespace.is_some());
        for StoredPrivilege {
            role,
            namespace,
            privilege,
            granted,
        } in privileges
        {
            let perms = ac
                .roles
                .get_mut(&role)
                .ok_or_else(|| ExecError::Internal(format!("privilege stored for unknown role `{role}`")))?;
            if granted {
                perms.grant(namespace.as_deref(), &[privilege]);
            } else {
                perms.revoke(namespace.as_deref(), &[privilege]);
            }
        }

        for assignment in store.list_user_roles().map_err(ExecError::Storage)? {
            if !ac.roles.contains_key(&assignment.role) {
                return Err(ExecError::Internal(format!(
                    "user `{}` is assigned unknown role `{}`",
                    assignment.user, assignment.role
                )));
            }
            ac.user_roles.entry(assignment.user).or_default().push(assignment.role);
        }
        Ok(ac)
    }

    /// Makes a new namespace known. Every role inherits its global privileges there.
    pub fn register_namespace(&mut self, namespace: &str) {
        for perms in self.roles.values_mut() {
            perms.namespaced.insert(namespace.to_owned(), perms.global.clone());
        }
        self.namespaces.insert(namespace.to_owned());
    }

    pub fn unregister_namespace(&mut self, namespace: &str) {
        for perms in self.roles.values_mut() {
            perms.namespaced.remove(namespace);
        }
        self.namespaces.remove(namespace);
    }

    /// Owners can do anything. Everyone else needs the privilege from the default
    /// role or from one of their roles.
    pub fn has_privilege(&self, user: &str, namespace: Option<&str>, privilege: Privilege) -> bool {
        if self.is_owner(user) {
            return true;
        }
        if self
            .roles
            .get(DEFAULT_ROLE)
            .is_some_and(|perms| perms.can_do(privilege, namespace))
        {
            return true;
        }
        self.user_roles.get(user).is_some_and(|roles| {
            roles
                .iter()
                .filter_map(|role| self.roles.get(role))
                .any(|perms| perms.can_do(privilege, namespace))
        })
    }

    pub fn is_owner(&self, user: &str) -> bool {
        self.user_roles
            .get(user)
            .is_some_and(|roles| roles.iter().any(|r| r == OWNER_ROLE))
    }

    pub fn owner(&self) -> Option<&str> {
        self.user_roles
            .iter()
            .find(|(_, roles)| roles.iter().any(|r| r == OWNER_ROLE))
            .map(|(user, _)| user.as_str())
    }

    pub fn role_exists(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn user_roles(&self, user: &str) -> &[String] {
        self.user_roles.get(user).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn create_role(&mut self, store: &mut dyn CatalogStore, role: &str) -> ExecResult<()> {
        if is_built_in_role(role) {
            return Err(RoleError::BuiltInRole(role.to_owned()).into());
        }
        if self.role_exists(role) {
            return Err(RoleError::RoleExists(role.to_owned()).into());
        }
        store.create_role(role).map_err(ExecError::Storage)?;
        self.roles.insert(role.to_owned(), Perms::new(&self.namespaces));
        Ok(())
    }

    pub fn drop_role(&mut self, store: &mut dyn CatalogStore, role: &str) -> ExecResult<()> {
        if is_built_in_role(role) {
            return Err(RoleError::BuiltInRole(role.to_owned()).into());
        }
        if !self.role_exists(role) {
            return Err(RoleError::UnknownRole(role.to_owned()).into());
        }
        store.drop_role(role).map_err(ExecError::Storage)?;
        self.roles.remove(role);
        for roles in self.user_roles.values_mut() {
            roles.retain(|r| r != role);
        }
        Ok(())
    }

    fn check_target(&self, role: &str, namespace: Option<&str>, privileges: &[Privilege]) -> ExecResult<&Perms> {
        if role == OWNER_ROLE {
            return Err(RoleError::BuiltInRole(role.to_owned()).into());
        }
        if let Some(ns) = namespace {
            Privilege::check_namespaceable(privileges)?;
            if !self.namespaces.contains(ns) {
                return Err(CatalogError::UnknownNamespace(ns.to_owned()).into());
            }
        }
        self.roles
            .get(role)
            .ok_or_else(|| RoleError::UnknownRole(role.to_owned()).into())
    }

    /// Grants `privileges` to `role`, globally or on `namespace`.
    ///
    /// A global grant also lifts any namespace-level revocation of the same privileges.
    pub fn grant_privileges(
        &mut self,
        store: &mut dyn CatalogStore,
        role: &str,
        privileges: &[Privilege],
        namespace: Option<&str>,
        if_not_granted: bool,
    ) -> ExecResult<()> {
        let perms = self.check_target(role, namespace, privileges)?;
        if !if_not_granted && privileges.iter().any(|p| perms.can_do(*p, namespace)) {
            return Err(RoleError::AlreadyGranted(role.to_owned()).into());
        }

        let mut lifted = vec![];
        if namespace.is_none() {
            for (ns, set) in &perms.namespaced {
                lifted.extend(privileges.iter().filter(|p| !set.contains(p)).map(|p| (ns.clone(), *p)));
            }
        }

        for privilege in privileges {
            store
                .upsert_privilege(&StoredPrivilege {
                    role: role.to_owned(),
                    namespace: namespace.map(str::to_owned),
                    privilege: *privilege,
                    granted: true,
                })
                .map_err(ExecError::Storage)?;
        }
        for (ns, privilege) in &lifted {
            store
                .delete_privilege(role, Some(ns), *privilege)
                .map_err(ExecError::Storage)?;
        }

        if let Some(perms) = self.roles.get_mut(role) {
            perms.grant(namespace, privileges);
        }
        Ok(())
    }

    /// Revokes `privileges` from `role`, globally or on `namespace`.
    ///
    /// Revoking on a namespace a privilege that the role holds globally is recorded
    /// as an explicit revocation for that namespace. A global revoke also deletes
    /// the role's namespaced rows for the same privileges.
    pub fn revoke_privileges(
        &mut self,
        store: &mut dyn CatalogStore,
        role: &str,
        privileges: &[Privilege],
        namespace: Option<&str>,
        if_granted: bool,
    ) -> ExecResult<()> {
        let perms = self.check_target(role, namespace, privileges)?;
        if !if_granted && privileges.iter().any(|p| !perms.can_do(*p, namespace)) {
            return Err(RoleError::NotGranted(role.to_owned()).into());
        }

        for privilege in privileges {
            match namespace {
                // Namespaced rows left behind would grant it again on rebuild.
                None => std::iter::once(None)
                    .chain(self.namespaces.iter().map(|ns| Some(ns.as_str())))
                    .try_for_each(|ns| store.delete_privilege(role, ns, *privilege)),
                Some(ns) => store.upsert_privilege(&StoredPrivilege {
                    role: role.to_owned(),
                    namespace: Some(ns.to_owned()),
                    privilege: *privilege,
                    granted: false,
                }),
            }
            .map_err(ExecError::Storage)?;
        }

        if let Some(perms) = self.roles.get_mut(role) {
            perms.revoke(namespace, privileges);
        }
        Ok(())
    }

    pub fn assign_role(
        &mut self,
        store: &mut dyn CatalogStore,
        role: &str,
        user: &str,
        if_not_granted: bool,
    ) -> ExecResult<()> {
        if !self.role_exists(role) {
            return Err(RoleError::UnknownRole(role.to_owned()).into());
        }
        if self.user_roles(user).iter().any(|r| r == role) {
            if if_not_granted {
                return Ok(());
            }
            return Err(RoleError::UserHasRole {
                user: user.to_owned(),
                role: role.to_owned(),
            }
            .into());
        }
        store.assign_role(user, role).map_err(ExecError::Storage)?;
        self.user_roles.entry(user.to_owned()).or_default().push(role.to_owned());
        Ok(())
    }

    pub fn unassign_role(
        &mut self,
        store: &mut dyn CatalogStore,
        role: &str,
        user: &str,
        if_granted: bool,
    ) -> ExecResult<()> {
        if !self.role_exists(role) {
            return Err(RoleError::UnknownRole(role.to_owned()).into());
        }
        if !self.user_roles(user).iter().any(|r| r == role) {
            if if_granted {
                return Ok(());
            }
            return Err(RoleError::UserLacksRole {
                user: user.to_owned(),
                role: role.to_owned(),
            }
            .into());
        }
        store.unassign_role(user, role).map_err(ExecError::Storage)?;
        if let Some(roles) = self.user_roles.get_mut(user) {
            roles.retain(|r| r != role);
        }
        Ok(())
    }

    /// Makes `user` the only owner.
    pub fn transfer_ownership(&mut self, store: &mut dyn CatalogStore, user: &str) -> ExecResult<()> {
        let previous: Vec<String> = self
            .user_roles
            .iter()
            .filter(|(u, roles)| u.as_str() != user && roles.iter().any(|r| r == OWNER_ROLE))
            .map(|(u, _)| u.clone())
            .collect();
        for old in previous {
            self.unassign_role(store, OWNER_ROLE, &old, false)?;
        }
        self.assign_role(store, OWNER_ROLE, user, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn controller() -> AccessController {
        let mut ac = AccessController::default();
        ac.register_namespace("main");
        ac.roles.insert(DEFAULT_ROLE.into(), Perms::new(&ac.namespaces));
        ac.roles.insert(OWNER_ROLE.into(), Perms::new(&ac.namespaces));
        ac.roles.insert("writer".into(), Perms::new(&ac.namespaces));
        ac.user_roles.insert("alice".into(), vec![OWNER_ROLE.into()]);
        ac.user_roles.insert("bob".into(), vec!["writer".into()]);
        ac
    }

    #[test]
    fn perms_inheritance() {
        let mut perms = Perms::new(&BTreeSet::from(["main".to_string()]));
        perms.grant(None, &[Privilege::Select, Privilege::Insert]);
        assert!(perms.can_do(Privilege::Select, None));
        assert!(perms.can_do(Privilege::Select, Some("main")));
        assert!(!perms.can_do(Privilege::Select, Some("other")));

        perms.revoke(Some("main"), &[Privilege::Insert]);
        assert!(!perms.can_do(Privilege::Insert, Some("main")));
        assert!(perms.can_do(Privilege::Insert, None));

        perms.grant(Some("other"), &[Privilege::Call]);
        assert!(perms.can_do(Privilege::Call, Some("other")));
        assert!(!perms.can_do(Privilege::Call, None));

        perms.revoke(None, &[Privilege::Select]);
        assert!(!perms.can_do(Privilege::Select, Some("main")));
    }

    #[test]
    fn resolution_order() {
        let mut ac = controller();
        assert!(ac.has_privilege("alice", Some("main"), Privilege::Drop));
        assert!(ac.has_privilege("alice", None, Privilege::Roles));
        assert!(!ac.has_privilege("bob", Some("main"), Privilege::Insert));

        ac.roles.get_mut("writer").unwrap().grant(Some("main"), &[Privilege::Insert]);
        assert!(ac.has_privilege("bob", Some("main"), Privilege::Insert));
        assert!(!ac.has_privilege("carol", Some("main"), Privilege::Insert));

        ac.roles.get_mut(DEFAULT_ROLE).unwrap().grant(None, &[Privilege::Select]);
        assert!(ac.has_privilege("carol", Some("main"), Privilege::Select));
        assert!(ac.has_privilege("carol", None, Privilege::Select));
    }

    #[test]
    fn namespaces_inherit_globals() {
        let mut ac = controller();
        ac.roles.get_mut(DEFAULT_ROLE).unwrap().grant(None, &[Privilege::Call]);
        ac.register_namespace("shop");
        assert!(ac.has_privilege("carol", Some("shop"), Privilege::Call));

        ac.unregister_namespace("shop");
        assert!(!ac.has_privilege("carol", Some("shop"), Privilege::Call));
    }

    #[test]
    fn owner_lookup() {
        let ac = controller();
        assert_eq!(ac.owner(), Some("alice"));
        assert!(ac.is_owner("alice"));
        assert!(!ac.is_owner("bob"));
        assert_eq!(ac.user_roles("nobody"), &[] as &[String]);
    }
}
