use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::errors::RoleError;

/// A capability that can be granted to a role, globally or on one namespace.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Privilege {
    /// Call actions
    Call,
    /// Run ad-hoc SELECT statements
    Select,
    Insert,
    Update,
    Delete,
    /// Create tables, indexes, actions and namespaces
    Create,
    /// Drop tables, indexes, actions and namespaces
    Drop,
    Alter,
    /// Manage roles and role assignments
    Roles,
    /// Use and unuse extensions
    Use,
}

impl Privilege {
    /// Privileges that only exist globally and cannot be scoped to a namespace.
    pub fn is_global_only(self) -> bool {
        matches!(self, Self::Roles | Self::Use)
    }

    /// Parses privilege names case-insensitively.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<Privilege>, RoleError> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                name.parse()
                    .map_err(|_| RoleError::UnknownPrivilege(name.to_uppercase()))
            })
            .collect()
    }

    /// Fails if any of `privileges` cannot be scoped to a namespace.
    pub fn check_namespaceable(privileges: &[Privilege]) -> Result<(), RoleError> {
        match privileges.iter().find(|p| p.is_global_only()) {
            Some(p) => Err(RoleError::CannotBeNamespaced(*p)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    #[test]
    fn names_round_trip() {
        for p in Privilege::iter() {
            assert_eq!(p.to_string().parse::<Privilege>().unwrap(), p);
            assert_eq!(p.to_string().to_lowercase().parse::<Privilege>().unwrap(), p);
        }
        assert_eq!(Privilege::Select.to_string(), "SELECT");
    }

    #[test]
    fn parse_list() {
        assert_eq!(
            Privilege::parse_list(&["select", "Insert"]).unwrap(),
            [Privilege::Select, Privilege::Insert]
        );
        assert_eq!(
            Privilege::parse_list(&["select", "fly"]).unwrap_err().to_string(),
            "privilege `FLY` does not exist"
        );
    }

    #[test]
    fn global_only() {
        assert!(Privilege::check_namespaceable(&[Privilege::Select, Privilege::Call]).is_ok());
        assert!(Privilege::check_namespaceable(&[Privilege::Select, Privilege::Use]).is_err());
        assert!(Privilege::check_namespaceable(&[Privilege::Roles]).is_err());
    }
}
