// src/ingest.rs
//
// Ingestion pipeline: decoded record -> validated, stamped, encrypted record
// -> storage. Preparation runs inline on the link driver; storage runs on a
// separate persistence worker fed by a bounded queue, so the read path never
// waits on the database and records already queued survive a reconnect.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cipher::FieldCipher;
use crate::io::serial::{LinkConfig, StatusCell};
use crate::io::{ErrorKind, Notifier};
use crate::store::{Record, RecordStore};

/// Records waiting for the persistence worker before new ones are dropped
pub const PERSIST_QUEUE_CAPACITY: usize = 256;

// ============================================================================
// Preparation
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("cannot encrypt field '{field}': {reason}")]
    Encryption { field: String, reason: String },
}

/// A record ready for storage. Has no identity until inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedRecord {
    pub table: String,
    pub fields: Record,
}

pub struct Ingestor {
    table: String,
    required_fields: Vec<String>,
    fields_to_encrypt: Vec<String>,
    timestamp_field: String,
    cipher: Option<Arc<FieldCipher>>,
}

impl Ingestor {
    pub fn new(config: &LinkConfig, cipher: Option<Arc<FieldCipher>>) -> Self {
        Ingestor {
            table: config.target_table.clone(),
            required_fields: config.required_fields.clone(),
            fields_to_encrypt: config.fields_to_encrypt.clone(),
            timestamp_field: config.timestamp_field.clone(),
            cipher,
        }
    }

    /// Validate, stamp and encrypt one record.
    pub fn prepare(&self, mut record: Record) -> Result<IngestedRecord, IngestError> {
        for field in &self.required_fields {
            if record.get(field).map(Value::is_null).unwrap_or(true) {
                return Err(IngestError::MissingField(field.clone()));
            }
        }

        if !self.timestamp_field.is_empty() && !record.contains_key(&self.timestamp_field) {
            record.insert(
                self.timestamp_field.clone(),
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }

        for field in &self.fields_to_encrypt {
            let Some(value) = record.get_mut(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let cipher = self.cipher.as_ref().ok_or_else(|| IngestError::Encryption {
                field: field.clone(),
                reason: "no encryption key available".to_string(),
            })?;
            let sealed = cipher
                .encrypt_value(value)
                .map_err(|reason| IngestError::Encryption {
                    field: field.clone(),
                    reason,
                })?;
            *value = Value::String(sealed);
        }

        Ok(IngestedRecord {
            table: self.table.clone(),
            fields: record,
        })
    }
}

// ============================================================================
// Persistence Worker
// ============================================================================

/// Sending side of the persistence queue
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<IngestedRecord>,
}

impl PersistQueue {
    /// Queue a record without waiting. Fails when the worker is backed up
    /// or gone; the record is then dropped by the caller.
    pub fn submit(&self, record: IngestedRecord) -> Result<(), String> {
        self.tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                "Persistence queue is full; record dropped".to_string()
            }
            mpsc::error::TrySendError::Closed(_) => {
                "Persistence worker has stopped; record dropped".to_string()
            }
        })
    }
}

/// Start the persistence worker. It runs until every `PersistQueue` clone
/// is dropped and the queue is drained.
pub fn spawn_persist_worker(
    store: Arc<dyn RecordStore>,
    status: StatusCell,
    notifier: Notifier,
    capacity: usize,
) -> (PersistQueue, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<IngestedRecord>(capacity.max(1));

    let handle = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            match store.insert(&record.table, &record.fields).await {
                Ok(id) => {
                    status.update(|s| {
                        s.counters.records_persisted += 1;
                        s.last_record_at = Some(Utc::now());
                    });
                    notifier.data(&record.table, id, record.fields);
                }
                Err(e) => {
                    status.counters(|c| c.persist_failures += 1);
                    tlog!("[ingest] Failed to store record in '{}': {}", record.table, e);
                    notifier.error(
                        ErrorKind::Persistence,
                        format!("Failed to store record: {}", e),
                        None,
                    );
                }
            }
        }
        tlog!("[ingest] Persistence worker stopped");
    });

    (PersistQueue { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::is_encrypted;
    use crate::io::serial::LinkStatus;
    use crate::io::{notification_channel, Notification};
    use crate::store::{QueryOptions, SqliteStore, StoreError, StoredRecord};
    use async_trait::async_trait;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn config(required: &[&str], encrypt: &[&str]) -> LinkConfig {
        LinkConfig {
            required_fields: required.iter().map(|s| s.to_string()).collect(),
            fields_to_encrypt: encrypt.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let ingestor = Ingestor::new(&config(&["temperature_reading"], &[]), None);
        assert_eq!(
            ingestor.prepare(record(json!({"ph_reading": 6.5}))),
            Err(IngestError::MissingField("temperature_reading".to_string()))
        );
        assert!(ingestor
            .prepare(record(json!({"temperature_reading": null})))
            .is_err());
    }

    #[test]
    fn test_timestamp_stamped_only_when_absent() {
        let ingestor = Ingestor::new(&config(&[], &[]), None);
        let stamped = ingestor.prepare(record(json!({"a": 1}))).unwrap();
        assert!(stamped.fields["reading_date"].as_str().unwrap().ends_with('Z'));

        let kept = ingestor
            .prepare(record(json!({"reading_date": "2024-06-01T00:00:00Z"})))
            .unwrap();
        assert_eq!(kept.fields["reading_date"], json!("2024-06-01T00:00:00Z"));
        assert_eq!(kept.table, "sensor_data");
    }

    #[test]
    fn test_encrypted_field_never_plaintext() {
        let cipher = Arc::new(FieldCipher::new(&[9u8; 32]));
        let ingestor = Ingestor::new(&config(&[], &["device_id"]), Some(cipher.clone()));
        let prepared = ingestor
            .prepare(record(json!({"device_id": "probe-17", "temperature_reading": 21.0})))
            .unwrap();

        let sealed = &prepared.fields["device_id"];
        assert!(is_encrypted(sealed));
        assert!(!sealed.as_str().unwrap().contains("probe-17"));
        assert_eq!(prepared.fields["temperature_reading"], json!(21.0));
        assert_eq!(
            cipher.decrypt_value(sealed.as_str().unwrap()).unwrap(),
            json!("probe-17")
        );
    }

    #[test]
    fn test_encryption_without_key_rejects() {
        let ingestor = Ingestor::new(&config(&[], &["device_id"]), None);
        assert!(matches!(
            ingestor.prepare(record(json!({"device_id": "x"}))),
            Err(IngestError::Encryption { .. })
        ));
        // Absent fields need no key
        assert!(ingestor.prepare(record(json!({"other": 1}))).is_ok());
    }

    #[tokio::test]
    async fn test_worker_persists_and_notifies() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let status = StatusCell::new(LinkStatus::new(false));
        let (notifier, mut rx) = notification_channel();
        let (queue, handle) =
            spawn_persist_worker(store.clone(), status.clone(), notifier, PERSIST_QUEUE_CAPACITY);

        queue
            .submit(IngestedRecord {
                table: "sensor_data".to_string(),
                fields: record(json!({"temperature_reading": 24.5})),
            })
            .unwrap();
        drop(queue);
        handle.await.unwrap();

        match rx.recv().await.unwrap() {
            Notification::Data(payload) => {
                assert_eq!(payload.table, "sensor_data");
                assert_eq!(payload.record["temperature_reading"], json!(24.5));
            }
            other => panic!("unexpected {:?}", other),
        }
        let snap = status.snapshot();
        assert_eq!(snap.counters.records_persisted, 1);
        assert!(snap.last_record_at.is_some());

        let rows = store
            .query("sensor_data", &Record::new(), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    struct FailingStore;

    #[async_trait]
    impl RecordStore for FailingStore {
        async fn insert(&self, _table: &str, _record: &Record) -> Result<i64, StoreError> {
            Err(StoreError::new("database is unavailable"))
        }

        async fn query(
            &self,
            _table: &str,
            _filters: &Record,
            _options: &QueryOptions,
        ) -> Result<Vec<StoredRecord>, StoreError> {
            Err(StoreError::new("database is unavailable"))
        }
    }

    #[tokio::test]
    async fn test_worker_reports_store_failure() {
        let status = StatusCell::new(LinkStatus::new(false));
        let (notifier, mut rx) = notification_channel();
        let (queue, handle) =
            spawn_persist_worker(Arc::new(FailingStore), status.clone(), notifier, 4);

        queue
            .submit(IngestedRecord {
                table: "sensor_data".to_string(),
                fields: record(json!({"a": 1})),
            })
            .unwrap();
        drop(queue);
        handle.await.unwrap();

        match rx.recv().await.unwrap() {
            Notification::Error(payload) => {
                assert_eq!(payload.kind, ErrorKind::Persistence);
                assert!(payload.message.contains("unavailable"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(status.snapshot().counters.persist_failures, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_record() {
        let (tx, _rx) = mpsc::channel(1);
        let queue = PersistQueue { tx };
        let rec = IngestedRecord {
            table: "t".to_string(),
            fields: Record::new(),
        };
        queue.submit(rec.clone()).unwrap();
        let err = queue.submit(rec).unwrap_err();
        assert!(err.contains("full"));
    }
}
