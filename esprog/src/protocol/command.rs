//! Command table for the ESPROG protocol.
//!
//! Every command the programmer understands is listed once here together
//! with its response timing class and the number of values a successful
//! response carries. The dispatcher validates responses against this table
//! instead of each call site checking counts on its own.

use std::fmt;
use std::time::Duration;

use super::frame::Value;
use super::payload::PayloadCoding;

/// Name of the unsolicited error frame.
pub const ERROR_FRAME: &str = "Error";

/// Value carried by the final frame of a heartbeat command.
pub const HEARTBEAT_DONE: u8 = 0xFF;

/// How long the programmer may take to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// Programmer-local get/set operations and block buffers.
    Fast,
    /// Operations that talk to the target chip over its bus.
    Slow,
    /// Long operations reporting progress with periodic heartbeats.
    Heartbeat,
}

/// Programmer commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Firmware version of the programmer.
    GetAppVersion,
    /// Build date and time of the programmer firmware.
    GetAppCompileTime,
    /// Target supply voltage and switching mode.
    SetVddCtrl,
    /// I/O level of the target bus.
    SetIoVol,
    /// Gate control mode.
    SetGateCtrl,
    /// Query gate control mode.
    GetGateCtrl,
    /// Select target chip part number.
    SetChip,
    /// Query selected chip part number.
    GetChip,
    /// Select target bus address.
    SetDevAddr,
    /// Query selected bus address.
    GetDevAddr,
    /// Select memory zone.
    SetZone,
    /// Query selected memory zone.
    GetZone,
    /// Read one target register.
    ReadReg,
    /// Write one target register.
    WriteReg,
    /// Query target part number and revision.
    GetChipInfo,
    /// Query target unique ID.
    GetChipUID,
    /// Store one block into the programmer buffer.
    FwWriteBuf,
    /// Fetch one block from the programmer buffer.
    FwReadBuf,
    /// Store the expected image checksum.
    FwWriteChecksum,
    /// Query the checksum of the buffered image.
    FwReadChecksum,
    /// Program the buffered image into the target.
    FwWriteStart,
    /// Read the target zone into the programmer buffer.
    FwReadStart,
    /// Persist the buffered image in programmer flash.
    SaveConfig,
    /// Erase programmer flash.
    FlashFormat,
}

impl Command {
    /// All commands, in table order.
    pub const ALL: [Self; 24] = [
        Self::GetAppVersion,
        Self::GetAppCompileTime,
        Self::SetVddCtrl,
        Self::SetIoVol,
        Self::SetGateCtrl,
        Self::GetGateCtrl,
        Self::SetChip,
        Self::GetChip,
        Self::SetDevAddr,
        Self::GetDevAddr,
        Self::SetZone,
        Self::GetZone,
        Self::ReadReg,
        Self::WriteReg,
        Self::GetChipInfo,
        Self::GetChipUID,
        Self::FwWriteBuf,
        Self::FwReadBuf,
        Self::FwWriteChecksum,
        Self::FwReadChecksum,
        Self::FwWriteStart,
        Self::FwReadStart,
        Self::SaveConfig,
        Self::FlashFormat,
    ];

    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::GetAppVersion => "GetAppVersion",
            Self::GetAppCompileTime => "GetAppCompileTime",
            Self::SetVddCtrl => "SetVddCtrl",
            Self::SetIoVol => "SetIoVol",
            Self::SetGateCtrl => "SetGateCtrl",
            Self::GetGateCtrl => "GetGateCtrl",
            Self::SetChip => "SetChip",
            Self::GetChip => "GetChip",
            Self::SetDevAddr => "SetDevAddr",
            Self::GetDevAddr => "GetDevAddr",
            Self::SetZone => "SetZone",
            Self::GetZone => "GetZone",
            Self::ReadReg => "ReadReg",
            Self::WriteReg => "WriteReg",
            Self::GetChipInfo => "GetChipInfo",
            Self::GetChipUID => "GetChipUID",
            Self::FwWriteBuf => "FwWriteBuf",
            Self::FwReadBuf => "FwReadBuf",
            Self::FwWriteChecksum => "FwWriteChecksum",
            Self::FwReadChecksum => "FwReadChecksum",
            Self::FwWriteStart => "FwWriteStart",
            Self::FwReadStart => "FwReadStart",
            Self::SaveConfig => "SaveConfig",
            Self::FlashFormat => "FlashFormat",
        }
    }

    /// Look up a command by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.name() == name)
    }

    /// Timing class of the response.
    pub fn response_class(self) -> ResponseClass {
        match self {
            Self::ReadReg | Self::WriteReg | Self::GetChipInfo | Self::GetChipUID => {
                ResponseClass::Slow
            },
            Self::FwWriteStart | Self::FwReadStart | Self::SaveConfig | Self::FlashFormat => {
                ResponseClass::Heartbeat
            },
            _ => ResponseClass::Fast,
        }
    }

    /// Exact number of values in a successful response, `None` when any
    /// count is accepted.
    pub fn response_values(self) -> Option<usize> {
        match self {
            Self::GetAppVersion | Self::FwReadBuf => Some(3),
            Self::GetAppCompileTime | Self::GetChipInfo => Some(2),
            Self::GetGateCtrl
            | Self::GetChip
            | Self::GetDevAddr
            | Self::GetZone
            | Self::ReadReg
            | Self::GetChipUID
            | Self::FwWriteBuf
            | Self::FwReadChecksum
            | Self::FwWriteStart
            | Self::FwReadStart
            | Self::SaveConfig
            | Self::FlashFormat => Some(1),
            Self::SetVddCtrl
            | Self::SetIoVol
            | Self::SetGateCtrl
            | Self::SetChip
            | Self::SetDevAddr
            | Self::SetZone
            | Self::WriteReg
            | Self::FwWriteChecksum => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Response deadlines per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Deadline for [`ResponseClass::Fast`].
    pub fast: Duration,
    /// Deadline for [`ResponseClass::Slow`].
    pub slow: Duration,
    /// Maximum gap between heartbeats for [`ResponseClass::Heartbeat`].
    pub heartbeat: Duration,
}

impl Timeouts {
    /// Deadline for `class`.
    pub fn for_class(&self, class: ResponseClass) -> Duration {
        match class {
            ResponseClass::Fast => self.fast,
            ResponseClass::Slow => self.slow,
            ResponseClass::Heartbeat => self.heartbeat,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        ProtocolRevision::default().timeouts()
    }
}

/// Firmware dialect spoken by the programmer.
///
/// | | `Legacy` | `Zoned` |
/// |---|---|---|
/// | Baud rate | 2 000 000 | 1 000 000 |
/// | Block payload | plain base64 | inverted base64 |
/// | `FwWriteChecksum` args | checksum | zone, checksum |
/// | Slow / heartbeat | 1000 / 2000 ms | 750 / 1500 ms |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ProtocolRevision {
    /// Older firmware without zone-tagged checksums.
    Legacy,
    /// Current firmware.
    #[default]
    Zoned,
}

impl ProtocolRevision {
    /// Parse a revision name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "legacy" => Some(Self::Legacy),
            "zoned" => Some(Self::Zoned),
            _ => None,
        }
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Zoned => "zoned",
        }
    }

    /// Default serial baud rate.
    pub fn baud_rate(self) -> u32 {
        match self {
            Self::Legacy => 2_000_000,
            Self::Zoned => 1_000_000,
        }
    }

    /// Block payload coding.
    pub fn payload_coding(self) -> PayloadCoding {
        match self {
            Self::Legacy => PayloadCoding::Plain,
            Self::Zoned => PayloadCoding::Inverted,
        }
    }

    /// Whether `FwWriteChecksum` carries the zone mask before the checksum.
    pub fn zoned_checksum(self) -> bool {
        self == Self::Zoned
    }

    /// `SetChip` argument for `part`: 32 bits wide on legacy firmware.
    pub fn chip_value(self, part: u16) -> Value {
        match self {
            Self::Legacy => Value::U32(u32::from(part)),
            Self::Zoned => Value::U16(part),
        }
    }

    /// Response deadlines.
    pub fn timeouts(self) -> Timeouts {
        match self {
            Self::Legacy => Timeouts {
                fast: Duration::from_millis(500),
                slow: Duration::from_millis(1000),
                heartbeat: Duration::from_millis(2000),
            },
            Self::Zoned => Timeouts {
                fast: Duration::from_millis(500),
                slow: Duration::from_millis(750),
                heartbeat: Duration::from_millis(1500),
            },
        }
    }
}

impl fmt::Display for ProtocolRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
