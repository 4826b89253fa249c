//! Raw binary firmware images.
//!
//! An image is the exact byte content of one zone, without headers. It must
//! fit the zone and be a whole number of 32-bit words; the programmer pads
//! the remainder of the zone with zeros.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::protocol::checksum;
use crate::target::Zone;

/// Bytes per hex dump line.
const DUMP_WIDTH: usize = 16;

/// A firmware image loaded into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    name: String,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Load an image from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading image from: {}", path.display());

        let data = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_bytes(name, data))
    }

    /// Wrap bytes already in memory.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// File name the image was loaded from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image content.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image has no content.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Additive checksum of the content.
    pub fn checksum(&self) -> u32 {
        checksum(&self.data)
    }

    /// Check that the image can be programmed into `zone`.
    pub fn validate_for(&self, zone: Zone) -> Result<()> {
        if self.data.is_empty() {
            return Err(Error::InvalidImage(format!("{} is empty", self.name)));
        }
        if self.data.len() > zone.size as usize {
            return Err(Error::ZoneOverflow {
                len: self.data.len(),
                size: zone.size,
            });
        }
        if self.data.len() % 4 != 0 {
            return Err(Error::InvalidImage(format!(
                "{} is {} bytes, not a multiple of 4",
                self.name,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Hex dump of the content.
    pub fn hexdump(&self) -> String {
        hexdump(&self.data)
    }

    /// Take the content.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Render `data` as lines of 16 bytes prefixed by their offset:
///
/// ```text
/// 0x00000000  00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f
/// ```
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() / DUMP_WIDTH * 60 + 60);
    for (line, chunk) in data.chunks(DUMP_WIDTH).enumerate() {
        let _ = write!(out, "0x{:08x} ", line * DUMP_WIDTH);
        for byte in chunk {
            let _ = write!(out, " {byte:02x}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MTP: Zone = Zone::new(0, 32 * 1024);

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let image = FirmwareImage::from_file(file.path()).unwrap();
        assert_eq!(image.len(), 8);
        assert_eq!(image.checksum(), 36);
        assert!(image.validate_for(MTP).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FirmwareImage::from_file(dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_validate_rejects_unaligned() {
        let image = FirmwareImage::from_bytes("fw.bin", vec![0; 6]);
        let err = image.validate_for(MTP).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(ref msg) if msg.contains("multiple of 4")));
    }

    #[test]
    fn test_validate_rejects_oversized() {
        let image = FirmwareImage::from_bytes("fw.bin", vec![0; 600]);
        let err = image.validate_for(Zone::new(0x8000, 512)).unwrap_err();
        assert!(matches!(err, Error::ZoneOverflow { len: 600, size: 512 }));
    }

    #[test]
    fn test_validate_rejects_empty() {
        let image = FirmwareImage::from_bytes("fw.bin", Vec::new());
        assert!(matches!(
            image.validate_for(MTP),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_hexdump() {
        let data: Vec<u8> = (0..20).collect();
        let dump = hexdump(&data);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "0x00000000  00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f"
        );
        assert_eq!(lines[1], "0x00000010  10 11 12 13");
        assert!(hexdump(&[]).is_empty());
    }
}
