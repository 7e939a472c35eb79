// src/io/serial/utils.rs
//
// Line settings and port descriptions shared by the port catalog and the
// serialport-backed link. Converts between our types and the serialport
// crate's.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, SerialPortType, StopBits};

// ============================================================================
// Types
// ============================================================================

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    pub fn as_char(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

/// Line settings used when opening a port
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl std::fmt::Display for LineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} baud ({}-{}-{})",
            self.baud_rate,
            self.data_bits,
            self.parity.as_char(),
            self.stop_bits
        )
    }
}

/// Information about an available serial port
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl PortInfo {
    pub fn is_usb(&self) -> bool {
        self.port_type == "USB"
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert our Parity enum to serialport crate's Parity type
pub fn to_serialport_parity(p: &Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Convert data bits count to serialport crate's DataBits type
pub fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

/// Convert stop bits count to serialport crate's StopBits type
pub fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

/// Convert a serialport enumeration entry into our port description
pub fn port_info_from_serialport(p: serialport::SerialPortInfo) -> PortInfo {
    let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
        SerialPortType::UsbPort(info) => (
            "USB".to_string(),
            info.manufacturer,
            info.product,
            info.serial_number,
            Some(info.vid),
            Some(info.pid),
        ),
        SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None, None, None, None),
        SerialPortType::PciPort => ("PCI".to_string(), None, None, None, None, None),
        SerialPortType::Unknown => ("Unknown".to_string(), None, None, None, None, None),
    };
    PortInfo {
        port_name: p.port_name,
        port_type,
        manufacturer,
        product,
        serial_number,
        vid,
        pid,
    }
}

/// Whether a port should be offered at all.
///
/// On macOS, /dev/tty.* devices are hidden in favour of their /dev/cu.*
/// twins. The cu (calling unit) devices do not block on open waiting for
/// carrier detect.
pub fn is_listed_port(port_name: &str) -> bool {
    if cfg!(target_os = "macos") {
        !port_name.starts_with("/dev/tty.")
    } else {
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_default() {
        assert_eq!(Parity::default(), Parity::None);
    }

    #[test]
    fn test_to_serialport_parity() {
        assert!(matches!(to_serialport_parity(&Parity::None), SpParity::None));
        assert!(matches!(to_serialport_parity(&Parity::Odd), SpParity::Odd));
        assert!(matches!(to_serialport_parity(&Parity::Even), SpParity::Even));
    }

    #[test]
    fn test_to_serialport_data_bits() {
        assert!(matches!(to_serialport_data_bits(7), DataBits::Seven));
        assert!(matches!(to_serialport_data_bits(8), DataBits::Eight));
        assert!(matches!(to_serialport_data_bits(9), DataBits::Eight)); // default
    }

    #[test]
    fn test_to_serialport_stop_bits() {
        assert!(matches!(to_serialport_stop_bits(2), StopBits::Two));
        assert!(matches!(to_serialport_stop_bits(0), StopBits::One)); // default
    }

    #[test]
    fn test_line_settings_display() {
        let settings = LineSettings {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        };
        assert_eq!(settings.to_string(), "9600 baud (8-N-1)");
    }

    #[test]
    fn test_usb_port_conversion() {
        let info = port_info_from_serialport(serialport::SerialPortInfo {
            port_name: "/dev/ttyACM0".to_string(),
            port_type: SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x2341,
                pid: 0x0043,
                serial_number: Some("A1".to_string()),
                manufacturer: Some("Arduino (www.arduino.cc)".to_string()),
                product: None,
            }),
        });
        assert!(info.is_usb());
        assert_eq!(info.vid, Some(0x2341));
        assert_eq!(info.serial_number.as_deref(), Some("A1"));
    }
}
