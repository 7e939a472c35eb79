// src/io/serial/mod.rs
//
// Serial link to the sensor device.
//
// Features:
// - Port discovery and scoring, with dynamic switching to a better port
// - Automatic reconnect with exponential backoff
// - Delimiter framing of the byte stream into JSON records
// - Bidirectional communication (read + send)

pub mod backoff;
pub mod config;
mod connection;
pub mod framer;
mod manager;
#[cfg(test)]
pub(crate) mod mock;
pub mod ports;
pub mod reader;
mod status;
pub(crate) mod utils;

pub use backoff::BackoffPolicy;
pub use config::LinkConfig;
pub use framer::{parse_frame, DataType, DecodeError, FrameDecoder, RawFrame};
pub use manager::{LinkCollaborators, LinkError, SerialLinkManager};
pub use ports::{
    DeviceSignature, PortCandidate, PortCatalog, PortScorer, ScoreContext, SignatureScorer,
};
pub use reader::{OpenedLink, PortBackend, SerialPortBackend};
pub use status::{LinkCounters, LinkState, LinkStatus, StatusCell};
pub use utils::{LineSettings, Parity, PortInfo};
