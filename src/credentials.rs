//! Secure credential storage using the system keyring.
//!
//! Uses the native OS credential store:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (GNOME Keyring, KWallet)
//!
//! Also supplies the field-encryption key, either from the keyring or
//! derived from a configured passphrase.

use aes_gcm::aead::{rand_core::RngCore, OsRng};
use keyring::Entry;
use sha2::{Digest, Sha256};

const SERVICE_NAME: &str = "com.echoplant.sensor-link";

/// Keyring scope and field under which the field-encryption key is kept
const FIELD_KEY_SCOPE: &str = "crypto";
const FIELD_KEY_FIELD: &str = "field_key";

/// Builds a unique account name for a credential.
fn account_name(scope: &str, field: &str) -> String {
    format!("{}:{}", scope, field)
}

fn entry(scope: &str, field: &str) -> Result<Entry, String> {
    Entry::new(SERVICE_NAME, &account_name(scope, field))
        .map_err(|e| format!("Failed to create keyring entry: {e}"))
}

/// Store a credential in the system keyring.
pub fn store_credential(scope: &str, field: &str, value: &str) -> Result<(), String> {
    entry(scope, field)?
        .set_password(value)
        .map_err(|e| format!("Failed to store credential: {e}"))
}

/// Retrieve a credential from the system keyring.
/// Returns Ok(None) if no credential is stored.
pub fn get_credential(scope: &str, field: &str) -> Result<Option<String>, String> {
    match entry(scope, field)?.get_password() {
        Ok(pw) => Ok(Some(pw)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(format!("Failed to retrieve credential: {e}")),
    }
}

/// Delete a credential from the system keyring.
/// Returns Ok(()) even if no credential was stored.
pub fn delete_credential(scope: &str, field: &str) -> Result<(), String> {
    match entry(scope, field)?.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()), // Already gone, that's fine
        Err(e) => Err(format!("Failed to delete credential: {e}")),
    }
}

// ============================================================================
// Field Encryption Keys
// ============================================================================

/// Source of the 256-bit key used for field encryption.
pub trait KeyProvider: Send + Sync {
    fn field_key(&self) -> Result<[u8; 32], String>;
}

/// Keeps a random key in the system keyring, generating it on first use.
pub struct KeyringKeyProvider;

impl KeyProvider for KeyringKeyProvider {
    fn field_key(&self) -> Result<[u8; 32], String> {
        if let Some(stored) = get_credential(FIELD_KEY_SCOPE, FIELD_KEY_FIELD)? {
            return decode_key(&stored);
        }

        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        store_credential(FIELD_KEY_SCOPE, FIELD_KEY_FIELD, &hex::encode(key))?;
        tlog!("[credentials] Generated new field encryption key");
        Ok(key)
    }
}

/// Derives the key from a passphrase, for hosts without a keyring.
pub struct PassphraseKeyProvider {
    passphrase: String,
}

impl PassphraseKeyProvider {
    pub fn new(passphrase: impl Into<String>) -> Self {
        PassphraseKeyProvider {
            passphrase: passphrase.into(),
        }
    }
}

impl KeyProvider for PassphraseKeyProvider {
    fn field_key(&self) -> Result<[u8; 32], String> {
        if self.passphrase.is_empty() {
            return Err("Encryption passphrase is empty".to_string());
        }
        Ok(Sha256::digest(self.passphrase.as_bytes()).into())
    }
}

fn decode_key(stored: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(stored.trim()).map_err(|e| format!("Stored key is not hex: {e}"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("Stored key has length {}, expected 32", b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_name() {
        assert_eq!(account_name("storage", "password"), "storage:password");
    }

    #[test]
    fn test_passphrase_key_is_stable() {
        let a = PassphraseKeyProvider::new("hunter2").field_key().unwrap();
        let b = PassphraseKeyProvider::new("hunter2").field_key().unwrap();
        let c = PassphraseKeyProvider::new("hunter3").field_key().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        assert!(PassphraseKeyProvider::new("").field_key().is_err());
    }

    #[test]
    fn test_decode_key() {
        let key = [0xABu8; 32];
        assert_eq!(decode_key(&hex::encode(key)).unwrap(), key);
        assert!(decode_key("abcd").is_err());
        assert!(decode_key("zz").is_err());
    }
}
