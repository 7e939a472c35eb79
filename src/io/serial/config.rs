// src/io/serial/config.rs
//
// Link configuration. Fixed once the link manager is constructed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backoff::BackoffPolicy;
use super::framer::{parse_delimiter, DataType, DEFAULT_MAX_FRAME_BYTES};
use super::ports::{default_device_signatures, DeviceSignature};
use super::utils::{LineSettings, Parity};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Explicit port. When unset the port is discovered by scanning.
    #[serde(default)]
    pub port_path: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    /// Frame delimiter. Escapes such as `\r\n` and `\x03` are accepted.
    #[serde(default = "default_line_delimiter")]
    pub line_delimiter: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_target_table")]
    pub target_table: String,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub fields_to_encrypt: Vec<String>,
    /// Field stamped with the current UTC time when a record lacks it.
    /// Empty disables stamping.
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default = "default_port_scan_interval_ms")]
    pub port_scan_interval_ms: u64,
    /// Initial state of dynamic port switching
    #[serde(default = "default_true")]
    pub dynamic_port_switching: bool,
    #[serde(default = "default_device_signatures")]
    pub device_signatures: Vec<DeviceSignature>,
}

fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_line_delimiter() -> String {
    "\r\n".to_string()
}
fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
fn default_target_table() -> String {
    "sensor_data".to_string()
}
fn default_timestamp_field() -> String {
    "reading_date".to_string()
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_retry_max_ms() -> u64 {
    30_000
}
fn default_port_scan_interval_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            port_path: None,
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            line_delimiter: default_line_delimiter(),
            data_type: DataType::default(),
            max_frame_bytes: default_max_frame_bytes(),
            target_table: default_target_table(),
            required_fields: Vec::new(),
            fields_to_encrypt: Vec::new(),
            timestamp_field: default_timestamp_field(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            port_scan_interval_ms: default_port_scan_interval_ms(),
            dynamic_port_switching: default_true(),
            device_signatures: default_device_signatures(),
        }
    }
}

impl LinkConfig {
    pub fn line_settings(&self) -> LineSettings {
        LineSettings {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
        }
    }

    pub fn delimiter_bytes(&self) -> Vec<u8> {
        parse_delimiter(&self.line_delimiter)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::from_millis(self.retry_base_ms, self.retry_max_ms)
    }

    pub fn port_scan_interval(&self) -> Duration {
        // interval() panics on a zero period
        Duration::from_millis(self.port_scan_interval_ms.max(1))
    }

    /// Auto-discovery is on when no explicit port is configured
    pub fn is_auto(&self) -> bool {
        self.port_path.as_deref().map(str::is_empty).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert!(config.is_auto());
        assert_eq!(config.delimiter_bytes(), b"\r\n".to_vec());
        assert_eq!(config.line_settings().to_string(), "9600 baud (8-N-1)");
        assert_eq!(config.backoff(), BackoffPolicy::default());
        assert_eq!(config.target_table, "sensor_data");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LinkConfig = toml::from_str(
            r#"
            port_path = "/dev/ttyACM0"
            baud_rate = 115200
            line_delimiter = "\\n"
            required_fields = ["temperature_reading"]
            "#,
        )
        .unwrap();
        assert!(!config.is_auto());
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.delimiter_bytes(), b"\n".to_vec());
        assert_eq!(config.required_fields, vec!["temperature_reading"]);
        assert_eq!(config.retry_max_ms, 30_000);
        assert_eq!(config.device_signatures.len(), 4);
    }

    #[test]
    fn test_empty_port_path_means_auto() {
        let config = LinkConfig {
            port_path: Some(String::new()),
            ..Default::default()
        };
        assert!(config.is_auto());
    }
}
