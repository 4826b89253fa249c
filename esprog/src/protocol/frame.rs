//! ESPROG text frame codec.
//!
//! ## Frame Format
//!
//! ```text
//! [<command>(,<status>)(,<value>)*]\r\n
//! ```
//!
//! - `command`: ASCII letters optionally followed by digits (`GetChip`, `Error`)
//! - `status`: present on responses only, `0` means success
//! - `value`: at most three fields; integers as `0x`-prefixed fixed-width hex,
//!   booleans as `1`/`0`, block payloads as base64
//!
//! Requests carry no status. A response without values still carries the
//! status (`[SetChip,0x00]`), and the unsolicited `[Error]` frame carries
//! nothing at all.

use std::fmt;

/// Maximum number of values a frame may carry.
pub const MAX_VALUES: usize = 3;

/// Frame terminator.
pub const FRAME_END: &[u8] = b"]\r\n";

/// A typed value rendered into a frame field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Rendered as `0x` + 2 hex digits.
    U8(u8),
    /// Rendered as `0x` + 4 hex digits.
    U16(u16),
    /// Rendered as `0x` + 8 hex digits.
    U32(u32),
    /// Rendered as `1` or `0`.
    Bool(bool),
    /// Rendered verbatim (pre-encoded payloads, text).
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8(v) => write!(f, "0x{v:02x}"),
            Self::U16(v) => write!(f, "0x{v:04x}"),
            Self::U32(v) => write!(f, "0x{v:08x}"),
            Self::Bool(v) => f.write_str(if *v { "1" } else { "0" }),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Self::U8(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::U16(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command name.
    pub command: String,
    /// Response status, `None` for requests and bare frames.
    pub status: Option<u8>,
    /// Rendered values.
    pub values: Vec<String>,
}

impl Frame {
    /// Create a request frame without values.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            status: None,
            values: Vec::new(),
        }
    }

    /// Append a value.
    #[must_use]
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into().to_string());
        self
    }

    /// Set the status field.
    #[must_use]
    pub fn with_status(mut self, status: u8) -> Self {
        self.status = Some(status);
        self
    }

    /// Render the frame as it goes on the wire, including `\r\n`.
    pub fn encode(&self) -> Vec<u8> {
        format!("{self}\r\n").into_bytes()
    }

    /// Parse one complete response line.
    ///
    /// The first field after the command name is the status. Returns `None`
    /// for anything outside the frame grammar; callers treat that as line
    /// noise.
    pub fn decode(line: &[u8]) -> Option<Self> {
        Self::parse(line, true)
    }

    /// Parse one complete request line, where every field is a value.
    pub fn decode_request(line: &[u8]) -> Option<Self> {
        Self::parse(line, false)
    }

    fn parse(line: &[u8], has_status: bool) -> Option<Self> {
        let text = std::str::from_utf8(line).ok()?;
        let inner = text.strip_prefix('[')?.strip_suffix("]\r\n")?;

        let mut fields = inner.split(',');
        let command = fields.next()?;
        if !is_command_name(command) {
            return None;
        }

        let status = if has_status {
            match fields.next() {
                Some(field) => Some(parse_u8(field)?),
                None => None,
            }
        } else {
            None
        };

        let mut values = Vec::new();
        for field in fields {
            if values.len() == MAX_VALUES || !is_value(field) {
                return None;
            }
            values.push(field.to_string());
        }

        Some(Self {
            command: command.to_string(),
            status,
            values,
        })
    }

    /// Whether this frame reports success.
    pub fn is_ok(&self) -> bool {
        self.status == Some(0)
    }

    /// Value at `index`, if present.
    pub fn value(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    /// Value at `index` parsed as a byte.
    pub fn u8_at(&self, index: usize) -> Option<u8> {
        self.value(index).and_then(parse_u8)
    }

    /// Value at `index` parsed as a 16-bit integer.
    pub fn u16_at(&self, index: usize) -> Option<u16> {
        self.value(index).and_then(parse_u16)
    }

    /// Value at `index` parsed as a 32-bit integer.
    pub fn u32_at(&self, index: usize) -> Option<u32> {
        self.value(index).and_then(parse_u32)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.command)?;
        if let Some(status) = self.status {
            write!(f, ",0x{status:02x}")?;
        }
        for value in &self.values {
            write!(f, ",{value}")?;
        }
        f.write_str("]")
    }
}

fn is_command_name(name: &str) -> bool {
    let digits_start = name
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(name.len());
    digits_start > 0 && name[digits_start..].bytes().all(|b| b.is_ascii_digit())
}

fn is_value(field: &str) -> bool {
    !field.is_empty()
        && field.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(b, b'-' | b':' | b'=' | b' ' | b'\t' | b'.' | b'+' | b'/')
        })
}

/// Parse a `0x`-prefixed hex or plain decimal byte.
pub fn parse_u8(s: &str) -> Option<u8> {
    parse_u32(s).and_then(|v| u8::try_from(v).ok())
}

/// Parse a `0x`-prefixed hex or plain decimal 16-bit integer.
pub fn parse_u16(s: &str) -> Option<u16> {
    parse_u32(s).and_then(|v| u16::try_from(v).ok())
}

/// Parse a `0x`-prefixed hex or plain decimal 32-bit integer.
pub fn parse_u32(s: &str) -> Option<u32> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            u32::from_str_radix(hex, 16).ok()
        },
        Some(_) => None,
        None if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s.parse().ok(),
        None => None,
    }
}
