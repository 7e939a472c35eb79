// src/io/serial/manager.rs
//
// Serial link manager: the facade the application holds. Every method is a
// message to the link driver, so none of them wait on port I/O. Status is
// read from the shared snapshot.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::config::LinkConfig;
use super::connection::{Command, DriverParts, LinkDriver};
use super::ports::{PortCandidate, PortCatalog, PortScorer, SignatureScorer};
use super::reader::{PortBackend, SerialPortBackend};
use super::status::{LinkStatus, StatusCell};
use crate::cipher::FieldCipher;
use crate::ingest::{spawn_persist_worker, Ingestor, PERSIST_QUEUE_CAPACITY};
use crate::io::Notifier;
use crate::store::RecordStore;

/// Caller-visible failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("serial link manager is closed")]
    Closed,
    #[error("port enumeration failed: {0}")]
    PortScan(String),
}

/// Everything the manager works with besides its configuration
pub struct LinkCollaborators {
    pub store: Arc<dyn RecordStore>,
    pub notifier: Notifier,
    /// Required when `fields_to_encrypt` is not empty
    pub cipher: Option<Arc<FieldCipher>>,
    pub backend: Arc<dyn PortBackend>,
    pub scorer: Arc<dyn PortScorer>,
}

impl LinkCollaborators {
    /// Real serial ports and the default signature scorer
    pub fn new(
        config: &LinkConfig,
        store: Arc<dyn RecordStore>,
        notifier: Notifier,
        cipher: Option<Arc<FieldCipher>>,
    ) -> Self {
        LinkCollaborators {
            store,
            notifier,
            cipher,
            backend: Arc::new(SerialPortBackend),
            scorer: Arc::new(SignatureScorer::new(config.device_signatures.clone())),
        }
    }
}

pub struct SerialLinkManager {
    config: Arc<LinkConfig>,
    commands: mpsc::UnboundedSender<Command>,
    status: StatusCell,
    delimiter: Vec<u8>,
    closed: AtomicBool,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl SerialLinkManager {
    /// Build the manager and start its driver and persistence worker.
    /// Must be called inside a tokio runtime. The link stays disconnected
    /// until `connect()`.
    pub fn new(config: LinkConfig, parts: LinkCollaborators) -> Self {
        let config = Arc::new(config);
        let status = StatusCell::new(LinkStatus::new(config.dynamic_port_switching));

        let (persist, worker) = spawn_persist_worker(
            parts.store,
            status.clone(),
            parts.notifier.clone(),
            PERSIST_QUEUE_CAPACITY,
        );
        let (driver, events) = LinkDriver::new(DriverParts {
            config: config.clone(),
            backend: parts.backend,
            catalog: PortCatalog::new(parts.scorer),
            ingestor: Ingestor::new(&config, parts.cipher),
            persist,
            status: status.clone(),
            notifier: parts.notifier,
        });

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(driver.run(commands_rx, events));

        tlog!(
            "[serial] Link manager ready (port: {}, table: {})",
            config.port_path.as_deref().unwrap_or("auto"),
            config.target_table
        );

        SerialLinkManager {
            delimiter: config.delimiter_bytes(),
            config,
            commands,
            status,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Some((driver, worker))),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn command(&self, cmd: Command) -> Result<(), LinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        self.commands.send(cmd).map_err(|_| LinkError::Closed)
    }

    /// Start connecting. No effect unless disconnected.
    pub fn connect(&self) -> Result<(), LinkError> {
        self.command(Command::Connect)
    }

    /// Drop the link and stop retrying.
    pub fn disconnect(&self) -> Result<(), LinkError> {
        self.command(Command::Disconnect)
    }

    /// Reset backoff and try again right away.
    pub fn force_reconnect(&self) -> Result<(), LinkError> {
        self.command(Command::ForceReconnect)
    }

    /// Re-score ports now; switch if allowed and a better port exists.
    pub fn scan_for_better_ports(&self) -> Result<(), LinkError> {
        self.command(Command::ScanForBetterPorts)
    }

    pub fn set_dynamic_port_switching(&self, enabled: bool) -> Result<(), LinkError> {
        self.command(Command::SetDynamicSwitching(enabled))?;
        self.status.update(|s| s.dynamic_switching = enabled);
        Ok(())
    }

    /// Latest status snapshot. Never waits on the driver.
    pub fn get_status(&self) -> LinkStatus {
        self.status.snapshot()
    }

    /// Write `payload` followed by the line delimiter. Strings go out as-is,
    /// anything else as JSON. Dropped with an error notification when the
    /// link is not connected.
    pub fn send_data(&self, payload: &Value) -> Result<(), LinkError> {
        let mut bytes = match payload {
            Value::String(s) => s.as_bytes().to_vec(),
            other => other.to_string().into_bytes(),
        };
        bytes.extend_from_slice(&self.delimiter);
        self.command(Command::Send(bytes))
    }

    /// Current ports, best first
    pub async fn list_ports(&self) -> Result<Vec<PortCandidate>, LinkError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::ListPorts(reply))?;
        rx.await
            .map_err(|_| LinkError::Closed)?
            .map_err(LinkError::PortScan)
    }

    /// Shut down for good. Waits for the driver to release the port and for
    /// queued records to be stored.
    pub async fn close(&self) -> Result<(), LinkError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        let _ = self.commands.send(Command::Close);

        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some((driver, worker)) = tasks {
            let _ = driver.await;
            let _ = worker.await;
        }
        Ok(())
    }
}
