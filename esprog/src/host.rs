//! Host-side discovery of a connected programmer.

use log::{debug, info};

use crate::device::{self, DetectedPort};
use crate::error::{Error, Result};

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    device::detect_ports()
}

/// Try `candidates` in order with `probe` and return the first success.
///
/// Link and device failures are logged and skipped; any other error, such
/// as [`Error::Interrupted`], stops the search.
pub fn find_first<T, F>(candidates: Vec<DetectedPort>, mut probe: F) -> Result<(DetectedPort, T)>
where
    F: FnMut(&DetectedPort) -> Result<T>,
{
    for port in candidates {
        if crate::is_interrupted_requested() {
            return Err(Error::Interrupted);
        }
        match probe(&port) {
            Ok(found) => return Ok((port, found)),
            Err(e) if e.is_communication() => debug!("No programmer on {}: {e}", port.name),
            Err(e) => return Err(e),
        }
    }
    Err(Error::DeviceNotFound)
}

/// Open each serial port in probe order and return the first one where a
/// programmer answers, together with its open session.
#[cfg(feature = "native")]
pub fn detect_programmer(
    config: &crate::programmer::SessionConfig,
) -> Result<(
    DetectedPort,
    crate::programmer::Programmer<crate::transport::Transport>,
)> {
    use crate::programmer::Programmer;

    let candidates = device::probe_order(discover_ports());
    debug!("Probing {} serial ports", candidates.len());

    let (port, programmer) = find_first(candidates, |port| {
        let mut programmer = Programmer::open(&port.name, config)?;
        programmer.probe()?;
        Ok(programmer)
    })?;
    info!("Found programmer on {}", port.name);
    Ok((port, programmer))
}
