//! Encryption gateway for sensitive record fields
//!
//! Provides AES-256-GCM encryption under a single process-wide key.
//! The key is generated on first use, kept in the secure keystore (never
//! in the application database) and only ever held in memory otherwise.
//!
//! Ciphertext format: base64(nonce || ciphertext || tag).

use crate::config::ENCRYPTION_KEY_ID;
use crate::error::{AppError, Result};
use crate::services::SecureKeyStore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use std::sync::{Arc, RwLock};

const NONCE_SIZE: usize = 12; // 96 bits for GCM
const KEY_SIZE: usize = 32; // 256 bits

/// Encrypts and decrypts record fields with the keystore-held key
pub struct EncryptionGateway {
    keystore: Arc<dyn SecureKeyStore>,
    cipher: RwLock<Option<Aes256Gcm>>,
}

impl EncryptionGateway {
    pub fn new(keystore: Arc<dyn SecureKeyStore>) -> Self {
        Self {
            keystore,
            cipher: RwLock::new(None),
        }
    }

    /// Load the key from the keystore, generating and persisting one if absent.
    ///
    /// Safe to call repeatedly; only the first successful call touches the
    /// keystore.
    pub fn initialize(&self) -> Result<()> {
        let mut cipher = self
            .cipher
            .write()
            .map_err(|e| AppError::Generic(format!("Key lock poisoned: {}", e)))?;

        if cipher.is_some() {
            return Ok(());
        }

        let key = match self.keystore.get(ENCRYPTION_KEY_ID)? {
            Some(encoded) => decode_key(&encoded)?,
            None => {
                let mut key = vec![0u8; KEY_SIZE];
                OsRng.fill_bytes(&mut key);
                self.keystore.set(ENCRYPTION_KEY_ID, &STANDARD.encode(&key))?;
                tracing::info!("Generated new record encryption key");
                key
            }
        };

        let instance = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| AppError::KeyStore(format!("Cipher initialization failed: {}", e)))?;
        *cipher = Some(instance);

        tracing::debug!("Encryption gateway initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.cipher.read().map(|c| c.is_some()).unwrap_or(false)
    }

    /// Encrypt a UTF-8 string
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        self.encrypt_bytes(plaintext.as_bytes())
    }

    /// Encrypt raw bytes; every call uses a fresh random nonce
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<String> {
        let guard = self
            .cipher
            .read()
            .map_err(|e| AppError::Generic(format!("Key lock poisoned: {}", e)))?;
        let cipher = guard.as_ref().ok_or(AppError::NotInitialized)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| AppError::Generic(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(sealed))
    }

    /// Decrypt into a UTF-8 string
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let bytes = self.decrypt_bytes(ciphertext)?;
        String::from_utf8(bytes)
            .map_err(|_| AppError::Decryption("plaintext is not valid UTF-8".to_string()))
    }

    /// Decrypt raw bytes; fails on tampering, truncation or a key mismatch
    pub fn decrypt_bytes(&self, ciphertext: &str) -> Result<Vec<u8>> {
        let guard = self
            .cipher
            .read()
            .map_err(|e| AppError::Generic(format!("Key lock poisoned: {}", e)))?;
        let cipher = guard.as_ref().ok_or(AppError::NotInitialized)?;

        let sealed = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| AppError::Decryption("ciphertext is not valid base64".to_string()))?;

        if sealed.len() <= NONCE_SIZE {
            return Err(AppError::Decryption("ciphertext is truncated".to_string()));
        }

        let (nonce_bytes, body) = sealed.split_at(NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| AppError::Decryption("authentication failed".to_string()))
    }

    /// Erase the key from the keystore and from memory.
    ///
    /// Every record encrypted under the old key becomes permanently
    /// unreadable. The next `initialize()` generates a fresh key.
    pub fn reset_key(&self) -> Result<()> {
        {
            let mut cipher = self
                .cipher
                .write()
                .map_err(|e| AppError::Generic(format!("Key lock poisoned: {}", e)))?;
            *cipher = None;
        }

        self.keystore.delete(ENCRYPTION_KEY_ID)?;
        tracing::warn!("Record encryption key reset; existing encrypted records are unreadable");
        Ok(())
    }
}

fn decode_key(encoded: &str) -> Result<Vec<u8>> {
    let key = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AppError::KeyStore("stored key is not valid base64".to_string()))?;

    if key.len() != KEY_SIZE {
        return Err(AppError::KeyStore(format!(
            "stored key has {} bytes, expected {}",
            key.len(),
            KEY_SIZE
        )));
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryKeyStore;

    struct BrokenKeyStore;

    impl SecureKeyStore for BrokenKeyStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(AppError::KeyStore("keystore unavailable".to_string()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(AppError::KeyStore("keystore unavailable".to_string()))
        }

        fn delete(&self, _key: &str) -> Result<()> {
            Err(AppError::KeyStore("keystore unavailable".to_string()))
        }
    }

    fn create_gateway() -> (EncryptionGateway, Arc<MemoryKeyStore>) {
        let keystore = Arc::new(MemoryKeyStore::new());
        let gateway = EncryptionGateway::new(keystore.clone());
        gateway.initialize().unwrap();
        (gateway, keystore)
    }

    #[test]
    fn test_encrypt_decrypt() {
        let (gateway, _) = create_gateway();

        let encrypted = gateway.encrypt("Witness statement, page 2").unwrap();
        let decrypted = gateway.decrypt(&encrypted).unwrap();

        assert_eq!(decrypted, "Witness statement, page 2");
        assert!(!encrypted.contains("Witness"));
    }

    #[test]
    fn test_same_plaintext_different_ciphertext() {
        let (gateway, _) = create_gateway();

        let first = gateway.encrypt("same").unwrap();
        let second = gateway.encrypt("same").unwrap();

        assert_ne!(first, second);
        assert_eq!(gateway.decrypt(&first).unwrap(), "same");
        assert_eq!(gateway.decrypt(&second).unwrap(), "same");
    }

    #[test]
    fn test_empty_and_unicode_plaintext() {
        let (gateway, _) = create_gateway();

        for plaintext in ["", "débrief 証拠 🔐"] {
            let encrypted = gateway.encrypt(plaintext).unwrap();
            assert_eq!(gateway.decrypt(&encrypted).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_not_initialized() {
        let gateway = EncryptionGateway::new(Arc::new(MemoryKeyStore::new()));

        assert!(matches!(gateway.encrypt("x"), Err(AppError::NotInitialized)));
        assert!(matches!(gateway.decrypt("x"), Err(AppError::NotInitialized)));
    }

    #[test]
    fn test_initialize_is_idempotent_and_persists_key() {
        let (gateway, keystore) = create_gateway();
        let stored = keystore.get(ENCRYPTION_KEY_ID).unwrap().unwrap();

        gateway.initialize().unwrap();
        assert_eq!(keystore.get(ENCRYPTION_KEY_ID).unwrap().unwrap(), stored);

        // A second gateway over the same keystore reads the same key
        let encrypted = gateway.encrypt("shared").unwrap();
        let other = EncryptionGateway::new(keystore);
        other.initialize().unwrap();
        assert_eq!(other.decrypt(&encrypted).unwrap(), "shared");
    }

    #[test]
    fn test_corrupted_ciphertext() {
        let (gateway, _) = create_gateway();

        let encrypted = gateway.encrypt("Original message").unwrap();
        let mut sealed = STANDARD.decode(&encrypted).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;

        let result = gateway.decrypt(&STANDARD.encode(sealed));
        assert!(matches!(result, Err(AppError::Decryption(_))));
    }

    #[test]
    fn test_garbage_and_truncated_input() {
        let (gateway, _) = create_gateway();

        assert!(matches!(
            gateway.decrypt("not base64 !!"),
            Err(AppError::Decryption(_))
        ));
        assert!(matches!(
            gateway.decrypt(&STANDARD.encode([0u8; 4])),
            Err(AppError::Decryption(_))
        ));
    }

    #[test]
    fn test_reset_key_makes_old_ciphertext_unreadable() {
        let (gateway, keystore) = create_gateway();
        let encrypted = gateway.encrypt("wipe me").unwrap();

        gateway.reset_key().unwrap();
        assert!(!gateway.is_initialized());
        assert_eq!(keystore.get(ENCRYPTION_KEY_ID).unwrap(), None);

        gateway.initialize().unwrap();
        assert!(matches!(
            gateway.decrypt(&encrypted),
            Err(AppError::Decryption(_))
        ));
    }

    #[test]
    fn test_keystore_unavailable() {
        let gateway = EncryptionGateway::new(Arc::new(BrokenKeyStore));

        assert!(matches!(gateway.initialize(), Err(AppError::KeyStore(_))));
        assert!(!gateway.is_initialized());
    }

    #[test]
    fn test_malformed_stored_key() {
        let keystore = Arc::new(MemoryKeyStore::new());
        keystore.set(ENCRYPTION_KEY_ID, &STANDARD.encode([1u8; 7])).unwrap();

        let gateway = EncryptionGateway::new(keystore);
        assert!(matches!(gateway.initialize(), Err(AppError::KeyStore(_))));
    }
}
