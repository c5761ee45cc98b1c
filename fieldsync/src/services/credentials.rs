//! Secure key storage
//!
//! The encryption gateway treats the platform keystore as a small
//! get/set/delete string store. `KeyringStore` talks to the OS credential
//! store; `MemoryKeyStore` backs tests and hosts without a keystore.

use crate::error::{AppError, Result};
use keyring::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

/// String store keyed by a fixed identifier
pub trait SecureKeyStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Deleting a missing entry is not an error
    fn delete(&self, key: &str) -> Result<()>;
}

/// OS credential store (Keychain, Credential Manager, kernel keyutils)
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key)
            .map_err(|e| AppError::KeyStore(format!("Failed to create keyring entry: {}", e)))
    }
}

impl SecureKeyStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AppError::KeyStore(format!("Failed to read {}: {}", key, e))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| AppError::KeyStore(format!("Failed to store {}: {}", key, e)))?;

        tracing::info!("Stored {} in credential manager", key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                tracing::info!("Deleted {} from credential manager", key);
                Ok(())
            }
            Err(e) => Err(AppError::KeyStore(format!("Failed to delete {}: {}", key, e))),
        }
    }
}

/// Process-local keystore; contents vanish with the process
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|e| AppError::KeyStore(format!("Keystore lock poisoned: {}", e)))
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
