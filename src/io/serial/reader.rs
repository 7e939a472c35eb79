// src/io/serial/reader.rs
//
// Port backend and blocking read loop.
//
// The backend opens a port and splits it into a read half and a write half.
// The read half is moved onto a blocking thread that forwards chunks to the
// link driver until the port fails, reaches EOF, or the cancel flag is set.

use std::io::{Read, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;

use super::connection::DriverEvent;
use super::utils::{
    is_listed_port, port_info_from_serialport, to_serialport_data_bits, to_serialport_parity,
    to_serialport_stop_bits, LineSettings, PortInfo,
};

/// Read timeout. Bounds how long the read loop takes to notice cancellation.
const READ_TIMEOUT: Duration = Duration::from_millis(50);
const READ_BUF_SIZE: usize = 1024;

pub type PortReader = Box<dyn Read + Send>;
pub type PortWriter = Box<dyn Write + Send>;

/// An open port, split for concurrent read and write
pub struct OpenedLink {
    pub reader: PortReader,
    pub writer: PortWriter,
}

impl std::fmt::Debug for OpenedLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedLink").finish_non_exhaustive()
    }
}

/// Enumerates and opens serial endpoints.
pub trait PortBackend: Send + Sync {
    fn available_ports(&self) -> Result<Vec<PortInfo>, String>;

    /// Open `path`. May block; callers run it on a blocking thread.
    fn open(&self, path: &str, settings: &LineSettings) -> Result<OpenedLink, String>;
}

/// Backend over the serialport crate
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialPortBackend;

impl PortBackend for SerialPortBackend {
    fn available_ports(&self) -> Result<Vec<PortInfo>, String> {
        let ports = serialport::available_ports()
            .map_err(|e| format!("Failed to enumerate ports: {}", e))?;
        Ok(ports
            .into_iter()
            .filter(|p| is_listed_port(&p.port_name))
            .map(port_info_from_serialport)
            .collect())
    }

    fn open(&self, path: &str, settings: &LineSettings) -> Result<OpenedLink, String> {
        let port = serialport::new(path, settings.baud_rate)
            .data_bits(to_serialport_data_bits(settings.data_bits))
            .stop_bits(to_serialport_stop_bits(settings.stop_bits))
            .parity(to_serialport_parity(&settings.parity))
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| format!("Failed to open {}: {}", path, e))?;
        let writer = port
            .try_clone()
            .map_err(|e| format!("Failed to clone {} for writing: {}", path, e))?;

        Ok(OpenedLink {
            reader: Box::new(port),
            writer: Box::new(writer),
        })
    }
}

/// What the read loop reports for one link generation
#[derive(Debug)]
pub enum ReadEvent {
    Bytes(Vec<u8>),
    /// The loop has stopped on its own: EOF or a read error
    Ended(String),
}

/// Start the blocking read loop for an open link.
///
/// Every event is tagged with `generation` so the driver can ignore a loop
/// that belongs to a link it has already torn down.
pub fn spawn_read_loop(
    mut reader: PortReader,
    generation: u64,
    cancel: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<DriverEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_BUF_SIZE];
        let send = |event: ReadEvent| tx.send(DriverEvent::Read { generation, event }).is_ok();

        while !cancel.load(Ordering::SeqCst) {
            match reader.read(&mut buf) {
                Ok(0) => {
                    if !cancel.load(Ordering::SeqCst) {
                        send(ReadEvent::Ended("Device disconnected".to_string()));
                    }
                    return;
                }
                Ok(n) => {
                    if !send(ReadEvent::Bytes(buf[..n].to_vec())) {
                        return;
                    }
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    // Timeout - continue
                }
                Err(e) => {
                    if !cancel.load(Ordering::SeqCst) {
                        send(ReadEvent::Ended(format!("Read error: {}", e)));
                    }
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"))
        }
    }

    #[tokio::test]
    async fn test_read_loop_forwards_bytes_then_eof() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reader: PortReader = Box::new(Cursor::new(b"{\"a\":1}\r\n".to_vec()));
        spawn_read_loop(reader, 4, Arc::new(AtomicBool::new(false)), tx)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            DriverEvent::Read { generation, event: ReadEvent::Bytes(bytes) } => {
                assert_eq!(generation, 4);
                assert_eq!(bytes, b"{\"a\":1}\r\n");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            DriverEvent::Read { event: ReadEvent::Ended(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_read_error_ends_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_read_loop(Box::new(FailingReader), 1, Arc::new(AtomicBool::new(false)), tx)
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            DriverEvent::Read { event: ReadEvent::Ended(reason), .. } => {
                assert!(reason.contains("unplugged"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_loop_reports_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(true));
        spawn_read_loop(Box::new(FailingReader), 1, cancel, tx)
            .await
            .unwrap();
        assert!(rx.recv().await.is_none());
    }
}
