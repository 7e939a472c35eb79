// src/io/serial/status.rs
//
// Link state and the status snapshot published by the driver. The snapshot
// lives behind a short-lived mutex so status queries never wait on I/O.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::io::StatusPayload;

/// Connection state. Only the link driver changes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
        next_retry_at: DateTime<Utc>,
    },
    Closed,
}

impl LinkState {
    pub fn tag(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Scanning => "scanning",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Reconnecting { .. } => "reconnecting",
            LinkState::Closed => "closed",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

/// Running totals. Kept across reconnects and port switches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LinkCounters {
    /// Non-blank frames taken off the wire
    pub frames_received: u64,
    /// Frames that failed decoding or validation
    pub frames_rejected: u64,
    pub decode_failures: u64,
    pub validation_failures: u64,
    pub persist_failures: u64,
    pub records_persisted: u64,
    /// Bytes thrown away by decoder overflow
    pub bytes_discarded: u64,
    pub reconnect_attempts: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinkStatus {
    #[serde(flatten)]
    pub state: LinkState,
    pub port: Option<String>,
    pub dynamic_switching: bool,
    pub counters: LinkCounters,
    pub last_record_at: Option<DateTime<Utc>>,
}

impl LinkStatus {
    pub fn new(dynamic_switching: bool) -> Self {
        LinkStatus {
            state: LinkState::Disconnected,
            port: None,
            dynamic_switching,
            counters: LinkCounters::default(),
            last_record_at: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn attempt(&self) -> u32 {
        match self.state {
            LinkState::Reconnecting { attempt, .. } => attempt,
            _ => 0,
        }
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            LinkState::Reconnecting { next_retry_at, .. } => Some(next_retry_at),
            _ => None,
        }
    }

    /// Status notification for the current state
    pub fn to_payload(&self) -> StatusPayload {
        let port = self.port.as_deref().unwrap_or("auto");
        let message = match self.state {
            LinkState::Disconnected => "Disconnected".to_string(),
            LinkState::Scanning => "Scanning for serial ports".to_string(),
            LinkState::Connecting => format!("Connecting to {}", port),
            LinkState::Connected => format!("Connected to {}", port),
            LinkState::Reconnecting { attempt, next_retry_at } => format!(
                "Reconnecting (attempt {}) at {}",
                attempt,
                next_retry_at.format("%H:%M:%S%.3f")
            ),
            LinkState::Closed => "Closed".to_string(),
        };
        StatusPayload {
            state: self.state.tag().to_string(),
            connected: self.is_connected(),
            port: self.port.clone(),
            attempt: self.attempt(),
            next_retry_at: self.next_retry_at(),
            message,
        }
    }
}

/// Shared status snapshot
#[derive(Clone, Debug)]
pub struct StatusCell {
    inner: Arc<Mutex<LinkStatus>>,
}

impl StatusCell {
    pub fn new(status: LinkStatus) -> Self {
        StatusCell {
            inner: Arc::new(Mutex::new(status)),
        }
    }

    pub fn snapshot(&self) -> LinkStatus {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut LinkStatus) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn counters(&self, f: impl FnOnce(&mut LinkCounters)) {
        self.update(|s| f(&mut s.counters));
    }
}
