// src/io/serial/connection.rs
//
// Link driver: the connection state machine.
//
// One task owns the state, the write half of the port, the frame decoder
// and the reconnect timer. Facade commands, open results, read-loop events,
// the backoff deadline and the port-evaluation tick all arrive through a
// single select loop, so transitions never race each other.
//
// Opens and reads happen on blocking threads and report back tagged with a
// link generation. The generation is bumped whenever a link is torn down or
// a new open starts, which makes late results from an abandoned link inert.

use chrono::Utc;
use std::collections::HashSet;
use std::io::Write;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use super::backoff::BackoffPolicy;
use super::config::LinkConfig;
use super::framer::{parse_frame, FrameDecoder};
use super::ports::{best_candidate, better_than_active, PortCandidate, PortCatalog, ScoreContext};
use super::reader::{spawn_read_loop, OpenedLink, PortBackend, PortWriter, ReadEvent};
use super::status::{LinkState, StatusCell};
use crate::ingest::{Ingestor, PersistQueue};
use crate::io::{ErrorKind, Notifier};
use crate::store::Record;

// ============================================================================
// Messages
// ============================================================================

/// Requests from the facade
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    ForceReconnect,
    ScanForBetterPorts,
    SetDynamicSwitching(bool),
    Send(Vec<u8>),
    ListPorts(oneshot::Sender<Result<Vec<PortCandidate>, String>>),
    Close,
}

/// Reports from blocking threads
#[derive(Debug)]
pub enum DriverEvent {
    Opened {
        generation: u64,
        path: String,
        result: Result<OpenedLink, String>,
    },
    Read {
        generation: u64,
        event: ReadEvent,
    },
}

struct ActiveLink {
    path: String,
    writer: PortWriter,
    cancel: Arc<AtomicBool>,
}

// ============================================================================
// Driver
// ============================================================================

pub(crate) struct LinkDriver {
    config: Arc<LinkConfig>,
    backend: Arc<dyn PortBackend>,
    catalog: PortCatalog,
    backoff: BackoffPolicy,
    decoder: FrameDecoder,
    ingestor: Ingestor,
    persist: PersistQueue,
    status: StatusCell,
    notifier: Notifier,
    events_tx: mpsc::UnboundedSender<DriverEvent>,

    state: LinkState,
    /// Port being opened, in use, or last lost
    port: Option<String>,
    generation: u64,
    active: Option<ActiveLink>,
    attempt: u32,
    retry_at: Option<Instant>,
    previously_used: HashSet<String>,
    dynamic_switching: bool,
}

pub(crate) struct DriverParts {
    pub config: Arc<LinkConfig>,
    pub backend: Arc<dyn PortBackend>,
    pub catalog: PortCatalog,
    pub ingestor: Ingestor,
    pub persist: PersistQueue,
    pub status: StatusCell,
    pub notifier: Notifier,
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl LinkDriver {
    pub(crate) fn new(parts: DriverParts) -> (Self, mpsc::UnboundedReceiver<DriverEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let config = parts.config;
        let driver = LinkDriver {
            backoff: config.backoff(),
            decoder: FrameDecoder::new(config.delimiter_bytes(), config.max_frame_bytes),
            dynamic_switching: config.dynamic_port_switching,
            config,
            backend: parts.backend,
            catalog: parts.catalog,
            ingestor: parts.ingestor,
            persist: parts.persist,
            status: parts.status,
            notifier: parts.notifier,
            events_tx,
            state: LinkState::Disconnected,
            port: None,
            generation: 0,
            active: None,
            attempt: 0,
            retry_at: None,
            previously_used: HashSet::new(),
        };
        (driver, events_rx)
    }

    /// Drive the link until `Close` arrives or the facade goes away.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<DriverEvent>,
    ) {
        let period = self.config.port_scan_interval();
        let mut scan_tick = tokio::time::interval_at(Instant::now() + period, period);
        scan_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Close) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(event) = events.recv() => self.handle_event(event),
                _ = sleep_until_deadline(retry_at) => self.on_retry_timer(),
                _ = scan_tick.tick() => self.evaluate_switch(),
            }
        }

        self.teardown();
        self.retry_at = None;
        self.set_state(LinkState::Closed, None);
        tlog!("[serial] Link driver stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => {
                if self.state == LinkState::Disconnected {
                    self.begin_attempt();
                }
            }
            Command::Disconnect => self.disconnect(),
            Command::ForceReconnect => {
                tlog!("[serial] Forced reconnect");
                self.teardown();
                self.attempt = 0;
                self.retry_at = None;
                self.begin_attempt();
            }
            Command::ScanForBetterPorts => self.evaluate_switch(),
            Command::SetDynamicSwitching(enabled) => {
                self.dynamic_switching = enabled;
                self.status.update(|s| s.dynamic_switching = enabled);
                tlog!(
                    "[serial] Dynamic port switching {}",
                    if enabled { "enabled" } else { "disabled" }
                );
            }
            Command::Send(bytes) => self.write(&bytes),
            Command::ListPorts(reply) => {
                let active = self.active.as_ref().map(|a| a.path.clone());
                let _ = reply.send(self.scan(active.as_deref()));
            }
            // Handled by the run loop
            Command::Close => {}
        }
    }

    fn handle_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Opened {
                generation,
                path,
                result,
            } => self.on_opened(generation, path, result),
            DriverEvent::Read { generation, event } => {
                // Only the current link, and only while it is up
                if generation != self.generation || self.active.is_none() {
                    return;
                }
                match event {
                    ReadEvent::Bytes(bytes) => self.handle_bytes(&bytes),
                    ReadEvent::Ended(reason) => {
                        tlog!(
                            "[serial] Link to {} lost: {}",
                            self.port.as_deref().unwrap_or("?"),
                            reason
                        );
                        self.notifier
                            .error(ErrorKind::Link, reason, self.port.as_deref());
                        self.enter_reconnecting();
                    }
                }
            }
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn set_state(&mut self, state: LinkState, port: Option<String>) {
        self.state = state.clone();
        self.port = port.clone();
        let payload = self.status.update(|s| {
            s.state = state;
            s.port = port;
            s.to_payload()
        });
        tlog!("[serial] {}", payload.message);
        self.notifier.status(payload);
    }

    /// Scan when auto, open the configured port otherwise
    fn begin_attempt(&mut self) {
        match self.config.port_path.clone().filter(|p| !p.is_empty()) {
            Some(path) => self.start_connecting(path),
            None => self.scan_and_connect(),
        }
    }

    fn scan(&self, active: Option<&str>) -> Result<Vec<PortCandidate>, String> {
        let ctx = ScoreContext {
            active,
            previously_used: &self.previously_used,
        };
        self.catalog.scan(self.backend.as_ref(), &ctx)
    }

    fn scan_and_connect(&mut self) {
        self.set_state(LinkState::Scanning, None);

        let candidates = match self.scan(None) {
            Ok(candidates) => candidates,
            Err(e) => {
                tlog!("[serial] Port scan failed: {}", e);
                self.notifier.error(ErrorKind::Link, e, None);
                self.enter_reconnecting();
                return;
            }
        };

        match best_candidate(&candidates) {
            Some(best) => {
                tlog!(
                    "[serial] Selected {} (score {}) from {} candidate(s)",
                    best.path,
                    best.score,
                    candidates.len()
                );
                let path = best.path.clone();
                self.start_connecting(path);
            }
            None => {
                self.notifier
                    .error(ErrorKind::Link, "No serial ports found", None);
                self.enter_reconnecting();
            }
        }
    }

    fn start_connecting(&mut self, path: String) {
        self.generation += 1;
        let generation = self.generation;
        self.set_state(LinkState::Connecting, Some(path.clone()));

        let backend = self.backend.clone();
        let settings = self.config.line_settings();
        let tx = self.events_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = backend.open(&path, &settings);
            // If the driver is gone the handle is dropped with the message
            let _ = tx.send(DriverEvent::Opened {
                generation,
                path,
                result,
            });
        });
    }

    fn on_opened(&mut self, generation: u64, path: String, result: Result<OpenedLink, String>) {
        if generation != self.generation || self.state != LinkState::Connecting {
            if result.is_ok() {
                tlog!("[serial] Releasing abandoned handle for {}", path);
            }
            return;
        }

        match result {
            Ok(link) => {
                let cancel = Arc::new(AtomicBool::new(false));
                spawn_read_loop(link.reader, generation, cancel.clone(), self.events_tx.clone());
                self.active = Some(ActiveLink {
                    path: path.clone(),
                    writer: link.writer,
                    cancel,
                });
                self.previously_used.insert(path.clone());
                self.attempt = 0;
                self.retry_at = None;
                self.decoder.reset();
                tlog!(
                    "[serial] Opened {} at {}",
                    path,
                    self.config.line_settings()
                );
                self.set_state(LinkState::Connected, Some(path));
            }
            Err(e) => {
                tlog!("[serial] {}", e);
                self.notifier.error(ErrorKind::Link, e, Some(&path));
                self.enter_reconnecting();
            }
        }
    }

    fn enter_reconnecting(&mut self) {
        self.teardown();
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.backoff.delay_for(self.attempt);
        self.retry_at = Some(Instant::now() + delay);
        let next_retry_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        self.status.counters(|c| c.reconnect_attempts += 1);

        let port = self.port.clone();
        self.set_state(
            LinkState::Reconnecting {
                attempt: self.attempt,
                next_retry_at,
            },
            port,
        );
    }

    fn on_retry_timer(&mut self) {
        self.retry_at = None;
        if matches!(self.state, LinkState::Reconnecting { .. }) {
            self.begin_attempt();
        }
    }

    fn disconnect(&mut self) {
        if self.state == LinkState::Disconnected {
            return;
        }
        self.teardown();
        self.retry_at = None;
        self.attempt = 0;
        self.set_state(LinkState::Disconnected, None);
    }

    /// Release the current link, if any, and invalidate in-flight results.
    fn teardown(&mut self) {
        self.generation += 1;
        if let Some(active) = self.active.take() {
            active.cancel.store(true, Ordering::SeqCst);
            tlog!("[serial] Closed {}", active.path);
        }
        // The partial frame belongs to the old stream
        self.decoder.reset();
    }

    /// Move to a strictly better port when allowed.
    fn evaluate_switch(&mut self) {
        if !self.state.is_connected() || !self.dynamic_switching || !self.config.is_auto() {
            return;
        }
        let Some(active_path) = self.active.as_ref().map(|a| a.path.clone()) else {
            return;
        };

        let candidates = match self.scan(Some(&active_path)) {
            Ok(candidates) => candidates,
            Err(e) => {
                tlog!("[serial] Port evaluation failed: {}", e);
                return;
            }
        };

        if let Some(better) = better_than_active(&candidates, &active_path) {
            tlog!(
                "[serial] Switching from {} to {} (score {})",
                active_path,
                better.path,
                better.score
            );
            let target = better.path.clone();
            self.teardown();
            self.set_state(LinkState::Scanning, None);
            self.start_connecting(target);
        }
    }

    // ========================================================================
    // Data Path
    // ========================================================================

    fn handle_bytes(&mut self, bytes: &[u8]) {
        let fed = self.decoder.feed(bytes);

        if fed.discarded_bytes > 0 {
            self.status
                .counters(|c| c.bytes_discarded += fed.discarded_bytes as u64);
        }
        if fed.overflowed {
            let message = format!(
                "Discarded {} bytes without a delimiter (limit {})",
                fed.discarded_bytes, self.config.max_frame_bytes
            );
            tlog!("[serial] {}", message);
            self.notifier
                .error(ErrorKind::Overflow, message, self.port.as_deref());
        }

        for frame in fed.frames {
            match parse_frame(&frame, self.config.data_type) {
                // Blank line
                Ok(None) => {}
                Ok(Some(record)) => {
                    self.status.counters(|c| c.frames_received += 1);
                    self.ingest(record);
                }
                Err(e) => {
                    self.status.counters(|c| {
                        c.frames_received += 1;
                        c.decode_failures += 1;
                        c.frames_rejected += 1;
                    });
                    tlog!("[serial] Dropped frame: {}", e);
                    self.notifier.error(
                        ErrorKind::Framing,
                        format!("Dropped frame: {}", e),
                        self.port.as_deref(),
                    );
                }
            }
        }
    }

    fn ingest(&mut self, record: Record) {
        match self.ingestor.prepare(record) {
            Ok(prepared) => {
                if let Err(e) = self.persist.submit(prepared) {
                    self.status.counters(|c| c.persist_failures += 1);
                    tlog!("[ingest] {}", e);
                    self.notifier.error(ErrorKind::Persistence, e, None);
                }
            }
            Err(e) => {
                self.status.counters(|c| {
                    c.validation_failures += 1;
                    c.frames_rejected += 1;
                });
                tlog!("[ingest] Rejected record: {}", e);
                self.notifier.error(
                    ErrorKind::Validation,
                    format!("Rejected record: {}", e),
                    self.port.as_deref(),
                );
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        if !self.state.is_connected() {
            self.notifier.error(
                ErrorKind::Send,
                "Not connected; outbound data dropped",
                self.port.as_deref(),
            );
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let result = active
            .writer
            .write_all(bytes)
            .and_then(|_| active.writer.flush());
        if let Err(e) = result {
            let path = active.path.clone();
            let message = format!("Write to {} failed: {}", path, e);
            tlog!("[serial] {}", message);
            self.notifier.error(ErrorKind::Send, message, Some(&path));
            self.enter_reconnecting();
        }
    }
}
