// src/io/serial/mock.rs
//
// Scripted port backend and recording store for link tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use super::reader::{OpenedLink, PortBackend};
use super::utils::{LineSettings, PortInfo};
use crate::store::{QueryOptions, Record, RecordStore, StoreError, StoredRecord};

const MOCK_READ_TIMEOUT: Duration = Duration::from_millis(10);

// ============================================================================
// Devices
// ============================================================================

#[derive(Default)]
struct DeviceInner {
    /// Feeds the reader of the currently open link
    sender: Option<std_mpsc::Sender<Vec<u8>>>,
    /// Bytes sent while no link was open, delivered on the next open
    pending: Vec<Vec<u8>>,
    written: Vec<u8>,
    unplugged: bool,
}

/// Test handle on a simulated device
#[derive(Clone, Default)]
pub struct MockDevice {
    inner: Arc<Mutex<DeviceInner>>,
    live_handles: Arc<AtomicUsize>,
}

impl MockDevice {
    /// Bytes from the device to the host
    pub fn send(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let delivered = match inner.sender {
            Some(ref tx) => tx.send(bytes.to_vec()).is_ok(),
            None => false,
        };
        if !delivered {
            inner.pending.push(bytes.to_vec());
        }
    }

    /// Pull the cable: the open link sees a read error and writes fail
    pub fn unplug(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.sender = None;
        inner.unplugged = true;
    }

    /// Bytes the host has written to the device
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().unwrap().written.clone()
    }

    pub fn is_open(&self) -> bool {
        self.live_handles.load(Ordering::SeqCst) > 0
    }

    fn open(&self) -> OpenedLink {
        let (tx, rx) = std_mpsc::channel();
        {
            let mut inner = self.inner.lock().unwrap();
            for chunk in inner.pending.drain(..) {
                let _ = tx.send(chunk);
            }
            inner.sender = Some(tx);
            inner.unplugged = false;
        }
        self.live_handles.fetch_add(1, Ordering::SeqCst);
        OpenedLink {
            reader: Box::new(MockReader {
                rx,
                leftover: Vec::new(),
            }),
            writer: Box::new(MockWriter {
                device: self.clone(),
            }),
        }
    }
}

struct MockReader {
    rx: std_mpsc::Receiver<Vec<u8>>,
    leftover: Vec<u8>,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.leftover.is_empty() {
            match self.rx.recv_timeout(MOCK_READ_TIMEOUT) {
                Ok(chunk) => self.leftover = chunk,
                Err(std_mpsc::RecvTimeoutError::Timeout) => {
                    return Err(std::io::ErrorKind::TimedOut.into())
                }
                Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "device unplugged",
                    ))
                }
            }
        }
        let n = buf.len().min(self.leftover.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Ok(n)
    }
}

struct MockWriter {
    device: MockDevice,
}

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut inner = self.device.inner.lock().unwrap();
        if inner.unplugged {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            ));
        }
        inner.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for MockWriter {
    fn drop(&mut self) {
        self.device.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Default)]
struct BackendState {
    ports: Vec<PortInfo>,
    devices: HashMap<String, MockDevice>,
    failing: HashSet<String>,
    open_delay: Option<Duration>,
    open_count: usize,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<BackendState>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(MockBackend::default())
    }

    /// List a port and return the device behind it
    pub fn add_port(&self, info: PortInfo) -> MockDevice {
        let mut state = self.state.lock().unwrap();
        let device = state
            .devices
            .entry(info.port_name.clone())
            .or_default()
            .clone();
        state.ports.push(info);
        device
    }

    pub fn remove_port(&self, path: &str) {
        self.state.lock().unwrap().ports.retain(|p| p.port_name != path);
    }

    pub fn set_failing(&self, path: &str, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing.insert(path.to_string());
        } else {
            state.failing.remove(path);
        }
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().unwrap().open_delay = Some(delay);
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open_count
    }
}

impl PortBackend for MockBackend {
    fn available_ports(&self) -> Result<Vec<PortInfo>, String> {
        Ok(self.state.lock().unwrap().ports.clone())
    }

    fn open(&self, path: &str, _settings: &LineSettings) -> Result<OpenedLink, String> {
        let delay = self.state.lock().unwrap().open_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.state.lock().unwrap();
        state.open_count += 1;
        if state.failing.contains(path) {
            return Err(format!("Failed to open {}: Permission denied", path));
        }
        if !state.ports.iter().any(|p| p.port_name == path) {
            return Err(format!("Failed to open {}: No such file or directory", path));
        }
        let device = state.devices.entry(path.to_string()).or_default().clone();
        Ok(device.open())
    }
}

/// A USB port that matches the Arduino signature
pub fn arduino_port(path: &str) -> PortInfo {
    PortInfo {
        port_name: path.to_string(),
        port_type: "USB".to_string(),
        manufacturer: Some("Arduino (www.arduino.cc)".to_string()),
        vid: Some(0x2341),
        pid: Some(0x0043),
        ..Default::default()
    }
}

/// A built-in port with nothing to recommend it
pub fn plain_port(path: &str) -> PortInfo {
    PortInfo {
        port_name: path.to_string(),
        port_type: "PCI".to_string(),
        ..Default::default()
    }
}

// ============================================================================
// Recording Store
// ============================================================================

#[derive(Default)]
pub struct RecordingStore {
    inserts: Mutex<Vec<(String, Record)>>,
    next_id: AtomicI64,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingStore::default())
    }

    pub fn inserts(&self) -> Vec<(String, Record)> {
        self.inserts.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn insert(&self, table: &str, record: &Record) -> Result<i64, StoreError> {
        self.inserts
            .lock()
            .unwrap()
            .push((table.to_string(), record.clone()));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn query(
        &self,
        _table: &str,
        _filters: &Record,
        _options: &QueryOptions,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(Vec::new())
    }
}
