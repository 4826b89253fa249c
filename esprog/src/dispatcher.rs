//! Command dispatcher.
//!
//! Sends one request at a time and waits for the response with the same
//! command name. Each command belongs to a [`ResponseClass`] that sets the
//! deadline:
//!
//! - `Fast` and `Slow`: a single deadline from the moment of sending.
//! - `Heartbeat`: the device keeps sending `status 0` frames whose single
//!   value is a progress byte. Each of them restarts the deadline; the frame
//!   carrying [`HEARTBEAT_DONE`] completes the command.
//!
//! Frames for other commands (including `[Error]`) are skipped. There are no
//! automatic retries.

use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result, StatusCode};
use crate::protocol::{Command, ERROR_FRAME, Frame, HEARTBEAT_DONE, ResponseClass, Timeouts};
use crate::transport::Link;

/// The single in-flight request.
#[derive(Debug)]
struct PendingCommand {
    command: Command,
    class: ResponseClass,
    window: Duration,
    deadline: Instant,
}

impl PendingCommand {
    fn new(command: Command, timeouts: &Timeouts) -> Self {
        let class = command.response_class();
        let window = timeouts.for_class(class);
        Self {
            command,
            class,
            window,
            deadline: Instant::now() + window,
        }
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
    }

    fn extend(&mut self) {
        self.deadline = Instant::now() + self.window;
    }

    /// Decide what a frame means for this request.
    fn accept(&mut self, frame: Frame) -> Result<Option<Frame>> {
        let name = self.command.name();
        if frame.command != name {
            if frame.command == ERROR_FRAME {
                warn!("Programmer reported an error while waiting for {name}");
            } else {
                debug!("Ignoring unrelated frame {frame} while waiting for {name}");
            }
            return Ok(None);
        }

        if !frame.is_ok() {
            return Err(Error::DeviceStatus {
                command: name.to_string(),
                status: StatusCode(frame.status),
            });
        }

        if let Some(expected) = self.command.response_values() {
            if frame.values.len() != expected {
                return Err(Error::UnexpectedResponse {
                    command: name.to_string(),
                    reason: format!("expected {expected} values, got {}", frame.values.len()),
                });
            }
        }

        if self.class == ResponseClass::Heartbeat {
            let Some(progress) = frame.u8_at(0) else {
                return Err(Error::UnexpectedResponse {
                    command: name.to_string(),
                    reason: format!("unparsable progress value in {frame}"),
                });
            };
            if progress != HEARTBEAT_DONE {
                trace!("{name} heartbeat {progress:#04x}");
                self.extend();
                return Ok(None);
            }
        }

        Ok(Some(frame))
    }
}

/// Request/response engine on top of a [`Link`].
pub struct Dispatcher<L: Link> {
    link: L,
    timeouts: Timeouts,
}

impl<L: Link> Dispatcher<L> {
    /// Create a dispatcher.
    pub fn new(link: L, timeouts: Timeouts) -> Self {
        Self { link, timeouts }
    }

    /// Response deadlines in use.
    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Replace the response deadlines.
    pub fn set_timeouts(&mut self, timeouts: Timeouts) {
        self.timeouts = timeouts;
    }

    /// Underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Underlying link, mutably.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Consume the dispatcher and return the link.
    pub fn into_link(self) -> L {
        self.link
    }

    /// Send `request` as `command` and wait for its validated response.
    pub fn execute(&mut self, command: Command, request: Frame) -> Result<Frame> {
        debug_assert_eq!(request.command, command.name());

        self.link.clear();
        let mut pending = PendingCommand::new(command, &self.timeouts);
        self.link.send(&request)?;

        loop {
            let Some(remaining) = pending.remaining() else {
                return Err(self.timeout_error(&pending));
            };

            let frames = match self.link.recv(remaining) {
                Ok(frames) => frames,
                Err(Error::Timeout(_)) => continue,
                Err(e) => return Err(e),
            };

            for frame in frames {
                if let Some(response) = pending.accept(frame)? {
                    return Ok(response);
                }
            }
        }
    }

    /// Send a raw line and collect whatever arrives within the fast window.
    pub fn execute_raw(&mut self, line: &str) -> Result<Vec<Frame>> {
        let mut bytes = line.trim_end().as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");

        self.link.clear();
        self.link.send_raw(&bytes)?;

        let deadline = Instant::now() + self.timeouts.fast;
        let mut received = Vec::new();
        while let Some(remaining) = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
        {
            match self.link.recv(remaining) {
                Ok(frames) => received.extend(frames),
                Err(Error::Timeout(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(received)
    }

    fn timeout_error(&self, pending: &PendingCommand) -> Error {
        let what = match pending.class {
            ResponseClass::Heartbeat => "no heartbeat",
            _ => "no response",
        };
        Error::Timeout(format!(
            "{} ({what} within {} ms)",
            pending.command,
            pending.window.as_millis()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLink;

    fn timeouts() -> Timeouts {
        Timeouts {
            fast: Duration::from_millis(100),
            slow: Duration::from_millis(150),
            heartbeat: Duration::from_millis(120),
        }
    }

    fn ok(command: &str) -> Frame {
        Frame::new(command).with_status(0)
    }

    #[test]
    fn test_fast_success() {
        let link = ScriptedLink::new(vec![(0, ok("GetChip").with(0x1708u16))]);
        let mut dispatcher = Dispatcher::new(link, timeouts());

        let frame = dispatcher
            .execute(Command::GetChip, Frame::new("GetChip").with(true))
            .unwrap();
        assert_eq!(frame.u16_at(0), Some(0x1708));
        assert_eq!(dispatcher.link().sent(), vec!["[GetChip,1]"]);
    }

    #[test]
    fn test_unrelated_frames_ignored() {
        let link = ScriptedLink::new(vec![
            (0, ok("SetZone")),
            (0, Frame::new("Error")),
            (5, ok("GetDevAddr").with(0x51u8)),
        ]);
        let mut dispatcher = Dispatcher::new(link, timeouts());

        let frame = dispatcher
            .execute(Command::GetDevAddr, Frame::new("GetDevAddr").with(true))
            .unwrap();
        assert_eq!(frame.u8_at(0), Some(0x51));
    }

    #[test]
    fn test_nonzero_status_fails() {
        let link = ScriptedLink::new(vec![(0, Frame::new("SetChip").with_status(2))]);
        let mut dispatcher = Dispatcher::new(link, timeouts());

        let err = dispatcher
            .execute(Command::SetChip, Frame::new("SetChip").with(0x1708u16))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceStatus {
                status: StatusCode(Some(2)),
                ..
            }
        ));
    }

    #[test]
    fn test_missing_status_fails() {
        let link = ScriptedLink::new(vec![(0, Frame::new("SetChip"))]);
        let mut dispatcher = Dispatcher::new(link, timeouts());

        let err = dispatcher
            .execute(Command::SetChip, Frame::new("SetChip").with(0x1708u16))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceStatus {
                status: StatusCode(None),
                ..
            }
        ));
    }

    #[test]
    fn test_wrong_value_count_fails() {
        let link = ScriptedLink::new(vec![(0, ok("GetAppVersion").with("1.0"))]);
        let mut dispatcher = Dispatcher::new(link, timeouts());

        let err = dispatcher
            .execute(Command::GetAppVersion, Frame::new("GetAppVersion").with(true))
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse { .. }));
    }

    #[test]
    fn test_fast_timeout() {
        let link = ScriptedLink::new(vec![(300, ok("GetChip").with(0x1708u16))]);
        let mut dispatcher = Dispatcher::new(link, timeouts());

        let start = Instant::now();
        let err = dispatcher
            .execute(Command::GetChip, Frame::new("GetChip").with(true))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn test_slow_class_uses_slow_deadline() {
        // 125 ms is past the fast window but inside the slow one.
        let link = ScriptedLink::new(vec![(125, ok("ReadReg").with(0x5au8))]);
        let mut dispatcher = Dispatcher::new(link, timeouts());

        let frame = dispatcher
            .execute(Command::ReadReg, Frame::new("ReadReg").with(0x10u8))
            .unwrap();
        assert_eq!(frame.u8_at(0), Some(0x5a));
    }

    #[test]
    fn test_heartbeats_extend_deadline() {
        // Five heartbeats 60 ms apart, total well past one 120 ms window.
        let mut script: Vec<(u64, Frame)> = (1..=5)
            .map(|i| (i * 60, ok("FlashFormat").with(i as u8)))
            .collect();
        script.push((360, ok("FlashFormat").with(HEARTBEAT_DONE)));
        let link = ScriptedLink::new(script);
        let mut dispatcher = Dispatcher::new(link, timeouts());

        let start = Instant::now();
        let frame = dispatcher
            .execute(Command::FlashFormat, Frame::new("FlashFormat").with(true))
            .unwrap();
        assert_eq!(frame.u8_at(0), Some(HEARTBEAT_DONE));
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_heartbeat_gap_times_out() {
        let link = ScriptedLink::new(vec![
            (50, ok("FwWriteStart").with(0x01u8)),
            (400, ok("FwWriteStart").with(HEARTBEAT_DONE)),
        ]);
        let mut dispatcher = Dispatcher::new(link, timeouts());

        let err = dispatcher
            .execute(Command::FwWriteStart, Frame::new("FwWriteStart").with(true))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(ref msg) if msg.contains("heartbeat")));
    }

    #[test]
    fn test_no_first_heartbeat_times_out() {
        let link = ScriptedLink::new(vec![(300, ok("SaveConfig").with(HEARTBEAT_DONE))]);
        let mut dispatcher = Dispatcher::new(link, timeouts());

        let err = dispatcher
            .execute(Command::SaveConfig, Frame::new("SaveConfig").with(true))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_heartbeat_failure_status() {
        let link = ScriptedLink::new(vec![
            (10, ok("FwWriteStart").with(0x10u8)),
            (20, Frame::new("FwWriteStart").with_status(5).with(0x10u8)),
        ]);
        let mut dispatcher = Dispatcher::new(link, timeouts());

        let err = dispatcher
            .execute(Command::FwWriteStart, Frame::new("FwWriteStart").with(true))
            .unwrap_err();
        assert!(matches!(err, Error::DeviceStatus { .. }));
    }

    #[test]
    fn test_execute_raw_collects_frames() {
        let link = ScriptedLink::new(vec![
            (0, ok("GetZone").with(0x01u8)),
            (10, Frame::new("Error")),
        ]);
        let mut dispatcher = Dispatcher::new(link, timeouts());

        let frames = dispatcher.execute_raw("[GetZone,1]").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(dispatcher.link().sent(), vec!["[GetZone,1]"]);
    }
}
