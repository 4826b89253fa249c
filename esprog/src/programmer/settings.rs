//! Power settings of the programmer.

use std::fmt;

/// When the programmer drives the target supply (VDD), also used for the
/// gate control output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum PowerMode {
    /// Powered only while a command needs the target.
    #[default]
    OnDemand,
    /// Powered continuously.
    AlwaysOn,
    /// Never powered by the programmer.
    AlwaysOff,
}

impl PowerMode {
    /// All modes in wire order.
    pub const ALL: [Self; 3] = [Self::OnDemand, Self::AlwaysOn, Self::AlwaysOff];

    /// Wire value.
    pub fn value(self) -> u8 {
        match self {
            Self::OnDemand => 0x00,
            Self::AlwaysOn => 0x01,
            Self::AlwaysOff => 0x02,
        }
    }

    /// Decode a wire value.
    pub fn from_value(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.value() == value)
    }

    /// Kebab-case name.
    pub fn name(self) -> &'static str {
        match self {
            Self::OnDemand => "on-demand",
            Self::AlwaysOn => "always-on",
            Self::AlwaysOff => "always-off",
        }
    }

    /// Parse a name as printed by [`PowerMode::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Target supply voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VddVoltage {
    /// 5.0 V.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "5v"))]
    V5,
    /// 3.3 V.
    #[cfg_attr(feature = "serde", serde(rename = "3v3"))]
    V3_3,
}

impl VddVoltage {
    /// All voltages in wire order.
    pub const ALL: [Self; 2] = [Self::V5, Self::V3_3];

    /// Wire value.
    pub fn value(self) -> u8 {
        match self {
            Self::V5 => 0x00,
            Self::V3_3 => 0x01,
        }
    }

    /// Decode a wire value.
    pub fn from_value(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.value() == value)
    }

    /// Short name, `5v` or `3v3`.
    pub fn name(self) -> &'static str {
        match self {
            Self::V5 => "5v",
            Self::V3_3 => "3v3",
        }
    }

    /// Parse a name as printed by [`VddVoltage::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for VddVoltage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V5 => "5.0V",
            Self::V3_3 => "3.3V",
        })
    }
}

/// I/O level of the programming bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IoVoltage {
    /// 1.8 V.
    #[cfg_attr(feature = "serde", serde(rename = "1v8"))]
    V1_8,
    /// 3.3 V.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "3v3"))]
    V3_3,
    /// 5.0 V.
    #[cfg_attr(feature = "serde", serde(rename = "5v"))]
    V5,
    /// 5.0 V with the high-sink SCL driver enabled.
    #[cfg_attr(feature = "serde", serde(rename = "5v-hs"))]
    V5HighSink,
}

impl IoVoltage {
    /// All levels in wire order.
    pub const ALL: [Self; 4] = [Self::V1_8, Self::V3_3, Self::V5, Self::V5HighSink];

    /// Wire value.
    pub fn value(self) -> u8 {
        match self {
            Self::V1_8 => 0x00,
            Self::V3_3 => 0x01,
            Self::V5 => 0x02,
            Self::V5HighSink => 0x03,
        }
    }

    /// Decode a wire value.
    pub fn from_value(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.value() == value)
    }

    /// Short name.
    pub fn name(self) -> &'static str {
        match self {
            Self::V1_8 => "1v8",
            Self::V3_3 => "3v3",
            Self::V5 => "5v",
            Self::V5HighSink => "5v-hs",
        }
    }

    /// Parse a name as printed by [`IoVoltage::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for IoVoltage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V1_8 => "1.8V",
            Self::V3_3 => "3.3V",
            Self::V5 => "5.0V",
            Self::V5HighSink => "5.0V (high-sink SCL)",
        })
    }
}

/// Supply settings applied before programming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PowerSettings {
    /// Target supply voltage.
    pub vdd: VddVoltage,
    /// Target supply mode.
    pub vdd_mode: PowerMode,
    /// Bus I/O level.
    pub io: IoVoltage,
}
