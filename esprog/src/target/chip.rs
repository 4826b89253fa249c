//! Supported target chips and their memory layout.
//!
//! Every chip exposes three address-disjoint zones. Transfers address
//! blocks as `zone.offset + relative_address`, so the zone table is the only
//! place absolute addresses come from.

use std::fmt;

use crate::error::{Error, Result};

/// Maximum number of bytes moved by one block command.
pub const MAX_BLOCK_SIZE: u32 = 512;

/// Memory zone kinds and their wire masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ZoneKind {
    /// Firmware (MTP) zone.
    Mtp,
    /// Configuration zone.
    Config,
    /// Trim zone.
    Trim,
}

impl ZoneKind {
    /// All zone kinds.
    pub const ALL: [Self; 3] = [Self::Mtp, Self::Config, Self::Trim];

    /// Wire mask used by `SetZone` and `FwWriteChecksum`.
    pub fn mask(self) -> u8 {
        match self {
            Self::Mtp => 0x01,
            Self::Config => 0x02,
            Self::Trim => 0x04,
        }
    }

    /// Zone for a wire mask.
    pub fn from_mask(mask: u8) -> Result<Self> {
        match mask {
            0x01 => Ok(Self::Mtp),
            0x02 => Ok(Self::Config),
            0x04 => Ok(Self::Trim),
            other => Err(Error::InvalidZone(other)),
        }
    }

    /// Parse a zone name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "mtp" | "fw" | "firmware" => Some(Self::Mtp),
            "config" | "cfg" => Some(Self::Config),
            "trim" => Some(Self::Trim),
            _ => None,
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mtp => write!(f, "MTP"),
            Self::Config => write!(f, "Config"),
            Self::Trim => write!(f, "Trim"),
        }
    }
}

/// One zone of a chip's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Zone {
    /// Absolute start address.
    pub offset: u32,
    /// Size in bytes.
    pub size: u32,
}

impl Zone {
    /// Create a zone descriptor.
    pub const fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    /// Bytes per block command.
    pub fn block_size(&self) -> u32 {
        self.size.min(MAX_BLOCK_SIZE)
    }

    /// Number of block commands covering the zone.
    pub fn block_count(&self) -> u32 {
        self.size.div_ceil(self.block_size().max(1))
    }

    /// One past the last absolute address.
    pub fn end(&self) -> u32 {
        self.offset.saturating_add(self.size)
    }

    fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// One supported chip.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChipModel {
    /// Part number, e.g. `0x1708`.
    pub part: u16,
    /// Accepted bus addresses.
    pub addresses: Vec<u8>,
    /// Firmware zone.
    pub mtp: Zone,
    /// Configuration zone.
    pub config: Zone,
    /// Trim zone.
    pub trim: Zone,
}

impl ChipModel {
    /// Display name, e.g. `NU1708`.
    pub fn name(&self) -> String {
        format!("NU{:04X}", self.part)
    }

    /// Descriptor for `kind`.
    pub fn zone(&self, kind: ZoneKind) -> Zone {
        match kind {
            ZoneKind::Mtp => self.mtp,
            ZoneKind::Config => self.config,
            ZoneKind::Trim => self.trim,
        }
    }

    /// Whether `address` is a valid bus address for this chip.
    pub fn accepts_address(&self, address: u8) -> bool {
        self.addresses.contains(&address)
    }

    /// Address preselected when none is given.
    pub fn default_address(&self) -> u8 {
        self.addresses
            .get(1)
            .or_else(|| self.addresses.first())
            .copied()
            .unwrap_or_default()
    }

    fn zones_disjoint(&self) -> bool {
        !self.mtp.overlaps(&self.config)
            && !self.mtp.overlaps(&self.trim)
            && !self.config.overlaps(&self.trim)
    }
}

impl fmt::Display for ChipModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NU{:04X}", self.part)
    }
}

/// Immutable table of supported chips.
#[derive(Debug, Clone)]
pub struct ChipRegistry {
    chips: Vec<ChipModel>,
}

impl ChipRegistry {
    /// Built-in chip table.
    pub fn builtin() -> Self {
        let small = |part: u16, addresses: [u8; 4]| ChipModel {
            part,
            addresses: addresses.to_vec(),
            mtp: Zone::new(0x0000_0000, 32 * 1024),
            config: Zone::new(0x0000_8200, 3 * 512),
            trim: Zone::new(0x0000_8000, 512),
        };

        Self {
            chips: vec![
                small(0x1708, [0x50, 0x51, 0x52, 0x53]),
                ChipModel {
                    part: 0x1718,
                    addresses: vec![0x70, 0x71, 0x72, 0x73],
                    mtp: Zone::new(0x0000_0000, 64 * 1024),
                    config: Zone::new(0x0001_0080, 128),
                    trim: Zone::new(0x0001_0000, 128),
                },
                small(0x1651, [0x60, 0x61, 0x62, 0x63]),
                small(0x1652, [0x40, 0x41, 0x42, 0x43]),
                small(0x1628, [0x40, 0x41, 0x42, 0x43]),
            ],
        }
    }

    /// Build a registry from a custom table.
    ///
    /// Rejects duplicate part numbers and chips whose zones overlap.
    pub fn from_models(chips: Vec<ChipModel>) -> Result<Self> {
        for (i, chip) in chips.iter().enumerate() {
            if chips[..i].iter().any(|c| c.part == chip.part) {
                return Err(Error::Config(format!("duplicate chip {chip}")));
            }
            if !chip.zones_disjoint() {
                return Err(Error::Config(format!("{chip} has overlapping zones")));
            }
        }
        Ok(Self { chips })
    }

    /// Look up a chip by part number.
    pub fn get(&self, part: u16) -> Option<&ChipModel> {
        self.chips.iter().find(|c| c.part == part)
    }

    /// Look up a chip, failing for unknown part numbers.
    pub fn require(&self, part: u16) -> Result<&ChipModel> {
        self.get(part).ok_or(Error::UnknownChip(part))
    }

    /// Check a chip/address pair before any transfer.
    pub fn validate(&self, part: u16, address: u8) -> Result<&ChipModel> {
        let chip = self.require(part)?;
        if chip.accepts_address(address) {
            Ok(chip)
        } else {
            Err(Error::InvalidAddress {
                chip: part,
                address,
            })
        }
    }

    /// All chips in table order.
    pub fn iter(&self) -> impl Iterator<Item = &ChipModel> {
        self.chips.iter()
    }

    /// Number of chips.
    pub fn len(&self) -> usize {
        self.chips.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }
}

impl Default for ChipRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Parse a part number given as `NU1708`, `1708` or `0x1708`.
///
/// Part numbers read as hex digits.
pub fn parse_part(s: &str) -> Option<u16> {
    let s = s.trim();
    let digits = s
        .strip_prefix("NU")
        .or_else(|| s.strip_prefix("nu"))
        .or_else(|| s.strip_prefix("0x"))
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        let registry = ChipRegistry::builtin();
        assert_eq!(registry.len(), 5);

        let nu1708 = registry.get(0x1708).unwrap();
        assert_eq!(nu1708.name(), "NU1708");
        assert_eq!(nu1708.mtp, Zone::new(0, 32768));
        assert_eq!(nu1708.trim, Zone::new(0x8000, 512));
        assert_eq!(nu1708.config, Zone::new(0x8200, 1536));

        let nu1718 = registry.get(0x1718).unwrap();
        assert_eq!(nu1718.mtp.size, 65536);
        assert_eq!(nu1718.zone(ZoneKind::Trim), Zone::new(0x10000, 128));
        assert_eq!(nu1718.zone(ZoneKind::Config), Zone::new(0x10080, 128));
    }

    #[test]
    fn test_builtin_zones_disjoint() {
        for chip in ChipRegistry::builtin().iter() {
            assert!(chip.zones_disjoint(), "{chip}");
        }
    }

    #[test]
    fn test_validate() {
        let registry = ChipRegistry::builtin();
        assert!(registry.validate(0x1652, 0x42).is_ok());
        assert!(matches!(
            registry.validate(0x1652, 0x50),
            Err(Error::InvalidAddress {
                chip: 0x1652,
                address: 0x50
            })
        ));
        assert!(matches!(
            registry.validate(0x9999, 0x50),
            Err(Error::UnknownChip(0x9999))
        ));
    }

    #[test]
    fn test_default_address() {
        let registry = ChipRegistry::builtin();
        assert_eq!(registry.get(0x1708).unwrap().default_address(), 0x51);
        assert_eq!(registry.get(0x1718).unwrap().default_address(), 0x71);
    }

    #[test]
    fn test_block_geometry() {
        assert_eq!(Zone::new(0, 32768).block_size(), 512);
        assert_eq!(Zone::new(0, 32768).block_count(), 64);
        assert_eq!(Zone::new(0x10000, 128).block_size(), 128);
        assert_eq!(Zone::new(0x10000, 128).block_count(), 1);
        assert_eq!(Zone::new(0x8200, 1536).block_count(), 3);
    }

    #[test]
    fn test_zone_masks() {
        for kind in ZoneKind::ALL {
            assert_eq!(ZoneKind::from_mask(kind.mask()).unwrap(), kind);
        }
        assert!(matches!(ZoneKind::from_mask(0x03), Err(Error::InvalidZone(0x03))));
        assert!(matches!(ZoneKind::from_mask(0x00), Err(Error::InvalidZone(0x00))));
    }

    #[test]
    fn test_zone_names() {
        assert_eq!(ZoneKind::from_name("MTP"), Some(ZoneKind::Mtp));
        assert_eq!(ZoneKind::from_name("config"), Some(ZoneKind::Config));
        assert_eq!(ZoneKind::from_name("trim"), Some(ZoneKind::Trim));
        assert_eq!(ZoneKind::from_name("otp"), None);
    }

    #[test]
    fn test_parse_part() {
        assert_eq!(parse_part("NU1708"), Some(0x1708));
        assert_eq!(parse_part("nu1718"), Some(0x1718));
        assert_eq!(parse_part("1651"), Some(0x1651));
        assert_eq!(parse_part("0x1628"), Some(0x1628));
        assert_eq!(parse_part("NU"), None);
        assert_eq!(parse_part("NU17G8"), None);
    }

    #[test]
    fn test_from_models_rejects_overlap() {
        let mut chip = ChipRegistry::builtin().get(0x1708).unwrap().clone();
        chip.trim = Zone::new(0x7F00, 512);
        assert!(ChipRegistry::from_models(vec![chip]).is_err());
    }

    #[test]
    fn test_from_models_rejects_duplicates() {
        let chip = ChipRegistry::builtin().get(0x1708).unwrap().clone();
        assert!(ChipRegistry::from_models(vec![chip.clone(), chip]).is_err());
    }
}
