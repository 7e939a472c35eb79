// src/cipher.rs
//
// Field-level encryption for sensitive record fields. Values are sealed
// with AES-256-GCM and stored as text: `enc:v1:<nonce hex>:<ciphertext hex>`.
// The plaintext is the field's JSON encoding, so any value type survives
// the round trip.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde_json::Value;

const ENCRYPTED_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;

pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        FieldCipher {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Seal one field value. A fresh random nonce is used every call.
    pub fn encrypt_value(&self, value: &Value) -> Result<String, String> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| format!("Failed to encode field: {}", e))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| format!("Failed to encrypt field: {}", e))?;
        Ok(format!(
            "{}{}:{}",
            ENCRYPTED_PREFIX,
            hex::encode(nonce),
            hex::encode(ciphertext)
        ))
    }

    /// Open a value produced by `encrypt_value`.
    pub fn decrypt_value(&self, sealed: &str) -> Result<Value, String> {
        let body = sealed
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or_else(|| "Value is not an encrypted field".to_string())?;
        let (nonce_hex, ct_hex) = body
            .split_once(':')
            .ok_or_else(|| "Encrypted field is malformed".to_string())?;

        let nonce_bytes =
            hex::decode(nonce_hex).map_err(|e| format!("Invalid nonce encoding: {}", e))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(format!("Invalid nonce length: {}", nonce_bytes.len()));
        }
        let ciphertext =
            hex::decode(ct_hex).map_err(|e| format!("Invalid ciphertext encoding: {}", e))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| "Failed to decrypt field (wrong key or corrupted data)".to_string())?;
        serde_json::from_slice(&plaintext).map_err(|e| format!("Decrypted field is not JSON: {}", e))
    }
}

/// Whether a stored value looks like an encrypted field
pub fn is_encrypted(value: &Value) -> bool {
    value
        .as_str()
        .map(|s| s.starts_with(ENCRYPTED_PREFIX))
        .unwrap_or(false)
}
