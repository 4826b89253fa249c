//! Firmware image files.

pub mod firmware;

pub use firmware::{FirmwareImage, hexdump};
