//! Error types for esprog.

use std::io;
use thiserror::Error;

/// Result type for esprog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for esprog operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No matching response arrived before the deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The receive side of the transport stopped.
    #[error("Transport disconnected")]
    Disconnected,

    /// The programmer answered with a nonzero or missing status.
    #[error("{command} failed with device status {status}")]
    DeviceStatus {
        /// Wire name of the command.
        command: String,
        /// Reported status, `None` when the response carried none.
        status: StatusCode,
    },

    /// The programmer answered with an unexpected shape.
    #[error("Unexpected {command} response: {reason}")]
    UnexpectedResponse {
        /// Wire name of the command.
        command: String,
        /// What did not match.
        reason: String,
    },

    /// Block checksum mismatch.
    #[error("Checksum mismatch at {address:#010x}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Absolute block address.
        address: u32,
        /// Checksum declared by the device.
        expected: u32,
        /// Checksum computed over the received payload.
        actual: u32,
    },

    /// The device confirmed or returned a different block address.
    #[error("Address mismatch: expected {expected:#010x}, got {actual:#010x}")]
    AddressMismatch {
        /// Requested address.
        expected: u32,
        /// Address reported by the device.
        actual: u32,
    },

    /// Data does not fit the zone.
    #[error("Zone overflow: {len} bytes exceed zone size {size}")]
    ZoneOverflow {
        /// Byte count that was offered or received.
        len: usize,
        /// Zone size in bytes.
        size: u32,
    },

    /// Destination buffer does not match the zone size.
    #[error("Buffer of {actual} bytes does not match zone size {expected}")]
    BufferSize {
        /// Zone size in bytes.
        expected: usize,
        /// Buffer length.
        actual: usize,
    },

    /// Zone mask outside the known set.
    #[error("Invalid zone mask: {0:#04x}")]
    InvalidZone(u8),

    /// Chip part number not in the registry.
    #[error("Unknown chip: {0:#06x}")]
    UnknownChip(u16),

    /// Bus address not valid for the chip.
    #[error("Address {address:#04x} is not valid for NU{chip:04X}")]
    InvalidAddress {
        /// Chip part number.
        chip: u16,
        /// Rejected bus address.
        address: u8,
    },

    /// A zone operation was requested before selecting a chip.
    #[error("No chip selected")]
    NoChipSelected,

    /// Firmware image rejected.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Operation interrupted by the embedding application.
    #[error("Operation interrupted")]
    Interrupted,

    /// No programmer found.
    #[error("Programmer not found")]
    DeviceNotFound,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Status field of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub Option<u8>);

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(code) => write!(f, "{code:#04x}"),
            None => f.write_str("<none>"),
        }
    }
}

impl Error {
    /// Whether the error came from the link or device rather than from
    /// invalid caller input.
    pub fn is_communication(&self) -> bool {
        match self {
            Self::Io(_)
            | Self::Timeout(_)
            | Self::Disconnected
            | Self::DeviceStatus { .. }
            | Self::UnexpectedResponse { .. }
            | Self::ChecksumMismatch { .. }
            | Self::AddressMismatch { .. } => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let err = Error::DeviceStatus {
            command: "SetChip".into(),
            status: StatusCode(Some(3)),
        };
        assert_eq!(err.to_string(), "SetChip failed with device status 0x03");

        let err = Error::DeviceStatus {
            command: "SetChip".into(),
            status: StatusCode(None),
        };
        assert!(err.to_string().contains("<none>"));
    }

    #[test]
    fn test_is_communication() {
        assert!(Error::Timeout("GetChip".into()).is_communication());
        assert!(!Error::InvalidZone(0x08).is_communication());
        assert!(!Error::UnknownChip(0x1234).is_communication());
    }
}
