use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "main";
pub const INFO_NAMESPACE: &str = "info";
pub const MAX_IDENT_LENGTH: usize = 32;

/// Configuration as written in a file. Every field is optional.
#[derive(Default, Deserialize, Serialize, Debug, Clone)]
pub struct RawConfig {
    default_namespace: Option<String>,
    info_namespace: Option<String>,
    max_ident_length: Option<usize>,
    initial_owner: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// The namespace used when a statement or call does not name one.
    pub default_namespace: String,
    /// The read-only system namespace.
    pub info_namespace: String,
    /// The longest allowed variable name, not counting the sigil.
    pub max_ident_length: usize,
    /// The user given the `owner` role when an empty store is initialized.
    pub initial_owner: Option<String>,
}

impl InterpreterConfig {
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            default_namespace: raw
                .default_namespace
                .map(|ns| ns.to_lowercase())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_owned()),
            info_namespace: raw
                .info_namespace
                .map(|ns| ns.to_lowercase())
                .unwrap_or_else(|| INFO_NAMESPACE.to_owned()),
            max_ident_length: raw.max_ident_length.unwrap_or(MAX_IDENT_LENGTH),
            initial_owner: raw.initial_owner,
        }
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let raw: RawConfig = toml::from_str(s)?;
        Ok(Self::from_raw(raw))
    }

    pub fn with_initial_owner(mut self, owner: impl Into<String>) -> Self {
        self.initial_owner = Some(owner.into());
        self
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self::from_raw(RawConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = InterpreterConfig::default();
        assert_eq!(config.default_namespace, "main");
        assert_eq!(config.info_namespace, "info");
        assert_eq!(config.max_ident_length, 32);
        assert_eq!(config.initial_owner, None);
        assert_eq!(InterpreterConfig::from_toml_str("").unwrap(), config);
    }

    #[test]
    fn from_toml() {
        let config = InterpreterConfig::from_toml_str(
            r#"
            default_namespace = "App"
            max_ident_length = 64
            initial_owner = "0xabc"
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            InterpreterConfig {
                default_namespace: "app".into(),
                info_namespace: "info".into(),
                max_ident_length: 64,
                initial_owner: Some("0xabc".into()),
            }
        );
    }

    #[test]
    fn rejects_bad_types() {
        assert!(InterpreterConfig::from_toml_str("max_ident_length = \"long\"").is_err());
    }
}
