//! Binary payload coding for block transfers.
//!
//! Block payloads travel as standard base64. Firmware that speaks the zoned
//! dialect additionally inverts every byte before encoding (and after
//! decoding); both ends of a session must agree on the coding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// How block payloads are turned into frame values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PayloadCoding {
    /// Plain base64.
    Plain,
    /// Bytewise `!b`, then base64.
    #[default]
    Inverted,
}

impl PayloadCoding {
    /// Encode raw bytes into a frame value.
    pub fn encode(self, data: &[u8]) -> String {
        match self {
            Self::Plain => STANDARD.encode(data),
            Self::Inverted => {
                let inverted: Vec<u8> = data.iter().map(|b| !b).collect();
                STANDARD.encode(inverted)
            },
        }
    }

    /// Decode a frame value back into raw bytes.
    ///
    /// Returns `None` when the value is not valid base64.
    pub fn decode(self, value: &str) -> Option<Vec<u8>> {
        let mut data = match STANDARD.decode(value.trim()) {
            Ok(data) => data,
            Err(e) => {
                log::debug!("Rejected payload: {e}");
                return None;
            },
        };
        if self == Self::Inverted {
            for byte in &mut data {
                *byte = !*byte;
            }
        }
        Some(data)
    }
}
