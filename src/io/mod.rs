// src/io/mod.rs
//
// Device IO for the sensor link, plus the outward notification channel the
// link reports through. Notifications are fire-and-forget: a closed or
// missing receiver never affects the link.

pub mod serial;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::store::Record;

// ============================================================================
// Notification Payloads
// ============================================================================

/// Payload emitted on every link state transition
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusPayload {
    /// State tag: "disconnected", "scanning", "connecting", "connected",
    /// "reconnecting", "closed"
    pub state: String,
    pub connected: bool,
    /// Active (or targeted) port, if any
    pub port: Option<String>,
    /// Reconnect attempt number, 0 outside of reconnecting
    pub attempt: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Human-readable summary for the status bar
    pub message: String,
}

/// Error category carried in error notifications
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Open, read or write failure on the port
    Link,
    /// Frame that is not a JSON object
    Framing,
    /// Record missing a required field
    Validation,
    /// Storage rejected or could not take the record
    Persistence,
    /// Too many bytes without a delimiter
    Overflow,
    /// Outbound data that could not be written
    Send,
}

/// Payload emitted when something goes wrong on the link or in ingestion
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    pub port: Option<String>,
}

/// Payload emitted after a record has been stored
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DataPayload {
    pub table: String,
    pub id: i64,
    /// The record as stored (encrypted fields stay encrypted)
    pub record: Record,
}

/// Everything the link reports outward
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum Notification {
    #[serde(rename = "serial-port-status")]
    Status(StatusPayload),
    #[serde(rename = "serial-port-error")]
    Error(ErrorPayload),
    #[serde(rename = "serial-port-data")]
    Data(DataPayload),
}

impl Notification {
    pub fn event_name(&self) -> &'static str {
        match self {
            Notification::Status(_) => "serial-port-status",
            Notification::Error(_) => "serial-port-error",
            Notification::Data(_) => "serial-port-data",
        }
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Sending half of the notification channel. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl Notifier {
    pub fn new(tx: mpsc::UnboundedSender<Notification>) -> Self {
        Notifier { tx: Some(tx) }
    }

    /// A notifier that drops everything
    pub fn disabled() -> Self {
        Notifier { tx: None }
    }

    pub fn emit(&self, notification: Notification) {
        if let Some(ref tx) = self.tx {
            let _ = tx.send(notification);
        }
    }

    pub fn status(&self, payload: StatusPayload) {
        self.emit(Notification::Status(payload));
    }

    pub fn error(&self, kind: ErrorKind, message: impl Into<String>, port: Option<&str>) {
        self.emit(Notification::Error(ErrorPayload {
            kind,
            message: message.into(),
            port: port.map(str::to_string),
        }));
    }

    pub fn data(&self, table: &str, id: i64, record: Record) {
        self.emit(Notification::Data(DataPayload {
            table: table.to_string(),
            id,
            record,
        }));
    }
}

/// Create a notifier and the receiver the composing layer listens on
pub fn notification_channel() -> (Notifier, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Notifier::new(tx), rx)
}
