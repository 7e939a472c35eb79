// src/lib.rs
//
// EchoPlant sensor backend: serial link manager, record ingestion and
// storage. The binary in main.rs composes these pieces from settings.

#[macro_use]
mod logging;

pub mod cipher;
pub mod credentials;
pub mod ingest;
pub mod io;
pub mod readings;
pub mod settings;
pub mod store;

pub use logging::{init_file_logging, stop_file_logging};

use std::path::Path;
use std::sync::Arc;

use cipher::FieldCipher;
use credentials::{KeyProvider, KeyringKeyProvider, PassphraseKeyProvider};
use settings::{CryptoSettings, KeySource, StorageBackend, StorageSettings};
use store::{PostgresStore, RecordStore, SqliteStore};

/// Keyring scope/field holding the postgres password
const POSTGRES_PASSWORD_SCOPE: &str = "storage";
const POSTGRES_PASSWORD_FIELD: &str = "postgres_password";

// ============================================================================
// Composition
// ============================================================================

/// Open the configured record store.
pub async fn open_store(settings: &StorageSettings) -> Result<Arc<dyn RecordStore>, String> {
    match settings.backend {
        StorageBackend::Sqlite => {
            let store = SqliteStore::open(Path::new(&settings.sqlite_path))
                .map_err(|e| format!("Failed to open SQLite store: {}", e))?;
            Ok(Arc::new(store))
        }
        StorageBackend::Postgres => {
            let mut config = settings.postgres.clone();
            if settings.postgres_password_from_keyring {
                match credentials::get_credential(
                    POSTGRES_PASSWORD_SCOPE,
                    POSTGRES_PASSWORD_FIELD,
                )? {
                    Some(password) => config.password = Some(password),
                    None => tlog!("[store] No postgres password in keyring, connecting without"),
                }
            }
            let store = PostgresStore::connect(&config)
                .await
                .map_err(|e| format!("Failed to connect to PostgreSQL: {}", e))?;
            Ok(Arc::new(store))
        }
    }
}

/// Store the postgres password in the system keyring.
pub fn store_postgres_password(password: &str) -> Result<(), String> {
    credentials::store_credential(POSTGRES_PASSWORD_SCOPE, POSTGRES_PASSWORD_FIELD, password)
}

/// Remove the postgres password from the system keyring.
pub fn clear_postgres_password() -> Result<(), String> {
    credentials::delete_credential(POSTGRES_PASSWORD_SCOPE, POSTGRES_PASSWORD_FIELD)
}

/// Build the field cipher. Returns `None` when nothing needs encrypting,
/// so hosts without a keyring are never asked for one.
pub fn field_cipher(
    settings: &CryptoSettings,
    needed: bool,
) -> Result<Option<Arc<FieldCipher>>, String> {
    if !needed {
        return Ok(None);
    }
    let provider: Box<dyn KeyProvider> = match settings.key_source {
        KeySource::Keyring => Box::new(KeyringKeyProvider),
        KeySource::Passphrase => {
            let passphrase = settings
                .passphrase
                .clone()
                .ok_or_else(|| "crypto.passphrase is not set".to_string())?;
            Box::new(PassphraseKeyProvider::new(passphrase))
        }
    };
    let key = provider.field_key()?;
    Ok(Some(Arc::new(FieldCipher::new(&key))))
}
