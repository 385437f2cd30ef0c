use anyhow::{Context, Result};
use log::debug;
use std::{collections::HashMap, sync::Mutex};

/// The keyring service name that all `sm-tools` secrets are stored under.
pub const SERVICE_NAME: &str = "sm-tools";

/// A place to keep named secrets. [`KeyringStore`] is the real one. [`MemoryStore`] exists so that
/// code which reads or writes secrets can be tested without touching the OS keyring.
pub trait SecretStore {
    /// Returns `Ok(None)` when there is no secret with this name.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn get(&self, name: &str) -> Result<Option<String>>;

    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be written.
    fn set(&self, name: &str, value: &str) -> Result<()>;

    /// Deleting a secret which does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be written.
    fn delete(&self, name: &str) -> Result<()>;
}

/// Secrets in the OS credential store (Keychain, Windows Credential Manager, or Secret Service).
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl KeyringStore {
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, name).with_context(|| {
            format!(
                "could not open keyring entry {name:?} for service {:?}",
                self.service
            )
        })
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        debug!("reading {name:?} from the {:?} keyring", self.service);
        match self.entry(name)?.get_password() {
            Ok(v) => Ok(Some(v)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("could not read {name:?} from the keyring")),
        }
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        debug!("writing {name:?} to the {:?} keyring", self.service);
        self.entry(name)?
            .set_password(value)
            .with_context(|| format!("could not write {name:?} to the keyring"))
    }

    fn delete(&self, name: &str) -> Result<()> {
        match self.entry(name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("could not delete {name:?} from the keyring")),
        }
    }
}

/// An in-process secret store.
#[derive(Debug, Default)]
pub struct MemoryStore(Mutex<HashMap<String, String>>);

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned lock only means another test panicked mid-write. The map itself is still usable.
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SecretStore for MemoryStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.map().get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.map().insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.map().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store() -> Result<()> {
        let store = MemoryStore::new();
        assert_eq!(store.get("a")?, None);
        store.set("a", "1")?;
        assert_eq!(store.get("a")?.as_deref(), Some("1"));
        store.delete("a")?;
        store.delete("a")?;
        assert_eq!(store.get("a")?, None);
        Ok(())
    }
}
