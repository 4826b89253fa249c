//! # esprog
//!
//! Host-side protocol engine for ESPROG chip programmers.
//!
//! The programmer sits between the host's serial port and a target chip. It
//! buffers one memory zone at a time; the host uploads a zone in checksummed
//! blocks and then asks the programmer to commit it to the chip, or loads a
//! zone from the chip and downloads it again.
//!
//! The crate is layered:
//!
//! - [`protocol`]: the `[Name,v1,v2,v3]\r\n` frame codec, the frame buffer,
//!   the command table and payload coding
//! - [`transport`]: serial I/O with a background receive thread
//! - [`dispatcher`]: one request at a time, matched by command name, with
//!   fast, slow and heartbeat deadlines
//! - [`programmer`]: block transfers and the high-level session
//! - [`target`]: the chip registry
//!
//! ## Features
//!
//! - `native` (default): serial ports via the `serialport` crate
//! - `serde`: serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use esprog::{ChipRegistry, CommitTarget, FirmwareImage, Programmer, SessionConfig, ZoneKind};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ChipRegistry::builtin();
//!     let image = FirmwareImage::from_file("firmware.bin")?;
//!
//!     let mut programmer = Programmer::open("/dev/ttyUSB0", &SessionConfig::default())?;
//!     programmer.probe()?;
//!     let chip = programmer.select_chip_and_address(&registry, 0x1708, 0x51)?;
//!     image.validate_for(chip.zone(ZoneKind::Mtp))?;
//!
//!     programmer.program(ZoneKind::Mtp, image.data(), CommitTarget::Chip, |done, total| {
//!         println!("{done}/{total}");
//!     })?;
//!     programmer.close()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod image;
pub mod port;
pub mod programmer;
pub mod protocol;
pub mod target;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Request interruption for the calling test thread only.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::cell::Cell;

    thread_local! {
        static INTERRUPTED: Cell<bool> = const { Cell::new(false) };
    }
    static INSTALLED: OnceLock<()> = OnceLock::new();

    INSTALLED.get_or_init(|| set_interrupt_checker(|| INTERRUPTED.with(Cell::get)));
    INTERRUPTED.with(|flag| flag.set(value));
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use {
    host::detect_programmer,
    port::{NativePort, NativePortEnumerator},
    transport::Transport,
};
pub use {
    device::{DetectedPort, DeviceKind},
    dispatcher::Dispatcher,
    error::{Error, Result, StatusCode},
    host::discover_ports,
    image::FirmwareImage,
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    programmer::{
        ChipInfo, CommitTarget, DetectedChip, IoVoltage, PowerMode, PowerSettings, Programmer,
        ProgrammerInfo, SessionConfig, VddVoltage,
    },
    protocol::{Command, Frame, PayloadCoding, ProtocolRevision, ResponseClass, Timeouts},
    target::{ChipModel, ChipRegistry, Zone, ZoneKind},
    transport::Link,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_is_per_test_thread() {
        test_set_interrupted(true);
        let other = std::thread::spawn(is_interrupted_requested).join().unwrap();
        assert!(!other);
        test_set_interrupted(false);
    }
}
