use crate::secrets::SecretStore;
use anyhow::{Context, Result};
use log::debug;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use strum::IntoEnumIterator;
use thiserror::Error;

/// The name of the keyring entry that holds the config JSON.
pub const CONFIG_ENTRY: &str = "config";

/// Settings which are secret enough to live in the keyring rather than in `.env`.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    strum::AsRefStr,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::VariantNames,
)]
pub enum ConfigKey {
    #[strum(serialize = "GITHUB_TOKEN")]
    GithubToken,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyringConfigError {
    #[error(
        "Required config key '{0}' not set. Please run 'sm-tools config set {0} {{value}}' to set it."
    )]
    MissingKey(ConfigKey),
}

/// Key/value configuration persisted as a single JSON object in the keyring.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyringConfig {
    values: BTreeMap<String, String>,
}

impl KeyringConfig {
    /// Loads the config from the store. A missing entry is an empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the store can't be read or the stored value is not a JSON object of
    /// strings.
    pub fn load(store: &dyn SecretStore) -> Result<Self> {
        let Some(json) = store.get(CONFIG_ENTRY)? else {
            debug!("no config found in the keyring, starting with an empty config");
            return Ok(Self::default());
        };
        let values = serde_json::from_str(&json)
            .context("the config stored in the keyring is not a JSON object of strings")?;
        Ok(Self { values })
    }

    /// # Errors
    ///
    /// Returns an error if the store can't be written.
    pub fn save(&self, store: &dyn SecretStore) -> Result<()> {
        let json = serde_json::to_string(&self.values)?;
        store.set(CONFIG_ENTRY, &json)
    }

    #[must_use]
    pub fn get(&self, key: ConfigKey) -> Option<&str> {
        self.values.get(key.as_ref()).map(String::as_str)
    }

    /// Like [`KeyringConfig::get`], but a missing or empty value is an error which tells the user
    /// how to set it.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringConfigError::MissingKey`] if the key is not set.
    pub fn get_required(&self, key: ConfigKey) -> Result<&str, KeyringConfigError> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or(KeyringConfigError::MissingKey(key))
    }

    #[must_use]
    pub fn contains(&self, key: ConfigKey) -> bool {
        self.values.contains_key(key.as_ref())
    }

    pub fn set(&mut self, key: ConfigKey, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Removes a key, returning its old value.
    pub fn clear(&mut self, key: ConfigKey) -> Option<String> {
        self.values.remove(key.as_ref())
    }

    /// Renders every known key as pretty JSON, masking the values: `"********"` for a set value,
    /// `""` for a set but empty value, and `"(not set)"` for a missing one.
    #[must_use]
    pub fn to_keys_json(&self) -> String {
        let mut map = Map::new();
        for key in ConfigKey::iter() {
            let shown = match self.get(key) {
                Some("") => "",
                Some(_) => "********",
                None => "(not set)",
            };
            map.insert(key.to_string(), Value::String(shown.to_string()));
        }
        // Serializing a map of strings cannot fail.
        serde_json::to_string_pretty(&Value::Object(map)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemoryStore;
    use std::str::FromStr;

    #[test]
    fn load_missing_is_empty() -> Result<()> {
        let store = MemoryStore::new();
        assert_eq!(KeyringConfig::load(&store)?, KeyringConfig::default());
        Ok(())
    }

    #[test]
    fn set_save_load() -> Result<()> {
        let store = MemoryStore::new();
        let mut config = KeyringConfig::load(&store)?;
        config.set(ConfigKey::GithubToken, "ghp_abc");
        config.save(&store)?;

        assert_eq!(
            store.get(CONFIG_ENTRY)?.as_deref(),
            Some(r#"{"GITHUB_TOKEN":"ghp_abc"}"#)
        );
        let loaded = KeyringConfig::load(&store)?;
        assert_eq!(loaded.get(ConfigKey::GithubToken), Some("ghp_abc"));
        assert_eq!(loaded.get_required(ConfigKey::GithubToken)?, "ghp_abc");
        Ok(())
    }

    #[test]
    fn clear_removes_key() {
        let mut config = KeyringConfig::default();
        config.set(ConfigKey::GithubToken, "x");
        assert_eq!(config.clear(ConfigKey::GithubToken).as_deref(), Some("x"));
        assert!(!config.contains(ConfigKey::GithubToken));
        assert_eq!(config.clear(ConfigKey::GithubToken), None);
    }

    #[test]
    fn get_required_error_has_hint() {
        let config = KeyringConfig::default();
        let err = config.get_required(ConfigKey::GithubToken).unwrap_err();
        assert_eq!(err, KeyringConfigError::MissingKey(ConfigKey::GithubToken));
        assert_eq!(
            err.to_string(),
            "Required config key 'GITHUB_TOKEN' not set. Please run 'sm-tools config set GITHUB_TOKEN {value}' to set it."
        );

        let mut config = KeyringConfig::default();
        config.set(ConfigKey::GithubToken, "");
        assert!(config.get_required(ConfigKey::GithubToken).is_err());
    }

    #[test]
    fn keys_json_masks_values() -> Result<()> {
        let mut config = KeyringConfig::default();
        let parsed: Value = serde_json::from_str(&config.to_keys_json())?;
        assert_eq!(parsed["GITHUB_TOKEN"], "(not set)");

        config.set(ConfigKey::GithubToken, "");
        let parsed: Value = serde_json::from_str(&config.to_keys_json())?;
        assert_eq!(parsed["GITHUB_TOKEN"], "");

        config.set(ConfigKey::GithubToken, "ghp_secret");
        let rendered = config.to_keys_json();
        assert!(!rendered.contains("ghp_secret"));
        let parsed: Value = serde_json::from_str(&rendered)?;
        assert_eq!(parsed["GITHUB_TOKEN"], "********");
        Ok(())
    }

    #[test]
    fn load_rejects_garbage() {
        let store = MemoryStore::new();
        store.set(CONFIG_ENTRY, "[1, 2]").unwrap();
        assert!(KeyringConfig::load(&store).is_err());
    }

    #[test]
    fn config_key_from_str() -> Result<()> {
        assert_eq!(ConfigKey::from_str("GITHUB_TOKEN")?, ConfigKey::GithubToken);
        assert!(ConfigKey::from_str("NOPE").is_err());
        Ok(())
    }
}
