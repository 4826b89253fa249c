//! High-level programmer session.
//!
//! [`Programmer`] wraps a [`Dispatcher`] and exposes one method per
//! programmer operation, plus the composite flows used by front-ends:
//!
//! ```text
//! probe ──> power ──> select chip/address ──> program / read_chip
//!                                              │
//!                  SetZone ─> FwWriteBuf × N ─> FwWriteChecksum ─> FwWriteStart
//! ```
//!
//! The session does not retry. Any failed step aborts the flow and leaves
//! the programmer in whatever state it reached.

pub mod settings;
pub mod transfer;

use log::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::protocol::{Command, Frame, ProtocolRevision, Timeouts, checksum};
use crate::target::{ChipModel, ChipRegistry, ZoneKind};
use crate::transport::{DEFAULT_QUEUE_DEPTH, Link};

pub use settings::{IoVoltage, PowerMode, PowerSettings, VddVoltage};
pub use transfer::ZoneTransfer;

/// Session parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Firmware dialect.
    pub revision: ProtocolRevision,
    /// Response deadlines.
    pub timeouts: Timeouts,
    /// Depth of the received-frame queue.
    pub queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::for_revision(ProtocolRevision::default())
    }
}

impl SessionConfig {
    /// Defaults for `revision`.
    pub fn for_revision(revision: ProtocolRevision) -> Self {
        Self {
            revision,
            timeouts: revision.timeouts(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    /// Override the response deadlines.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Override the frame queue depth.
    #[must_use]
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }
}

/// Where [`Programmer::program`] commits the buffered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitTarget {
    /// Program the target chip (`FwWriteStart`).
    Chip,
    /// Persist in programmer flash for stand-alone use (`SaveConfig`).
    Programmer,
}

/// Programmer firmware identity.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ProgrammerInfo {
    /// Version triple as reported, e.g. `2.1.0 (ESPROG / B)`.
    pub version: String,
    /// Build timestamp, e.g. `Mar 12 2024, 10:22:01`.
    pub compile_time: String,
}

/// Part number and revision reported by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChipInfo {
    /// Part number byte.
    pub part_number: u8,
    /// Silicon revision.
    pub version: u8,
}

/// A chip found by [`Programmer::autodetect_chip`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedChip {
    /// Registry entry.
    pub chip: ChipModel,
    /// Bus address that answered.
    pub address: u8,
    /// Reported part and revision.
    pub info: ChipInfo,
    /// Unique ID.
    pub uid: u32,
}

#[derive(Debug, Clone)]
struct Selection {
    chip: ChipModel,
    address: u8,
}

/// One session with an ESPROG programmer.
pub struct Programmer<L: Link> {
    dispatcher: Dispatcher<L>,
    revision: ProtocolRevision,
    selection: Option<Selection>,
}

impl<L: Link> Programmer<L> {
    /// Start a session over `link`.
    pub fn new(link: L, config: &SessionConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(link, config.timeouts),
            revision: config.revision,
            selection: None,
        }
    }

    /// Firmware dialect of this session.
    pub fn revision(&self) -> ProtocolRevision {
        self.revision
    }

    /// Underlying link.
    pub fn link(&self) -> &L {
        self.dispatcher.link()
    }

    /// Underlying link, mutably.
    pub fn link_mut(&mut self) -> &mut L {
        self.dispatcher.link_mut()
    }

    /// End the session and return the link.
    pub fn into_link(self) -> L {
        self.dispatcher.into_link()
    }

    /// Chip selected with [`Programmer::select_chip_and_address`].
    pub fn selected_chip(&self) -> Option<&ChipModel> {
        self.selection.as_ref().map(|s| &s.chip)
    }

    /// Bus address selected with [`Programmer::select_chip_and_address`].
    pub fn selected_address(&self) -> Option<u8> {
        self.selection.as_ref().map(|s| s.address)
    }

    fn call(&mut self, command: Command, request: Frame) -> Result<Frame> {
        debug_assert_eq!(request.command, command.name());
        self.dispatcher.execute(command, request)
    }

    fn query(&mut self, command: Command) -> Result<Frame> {
        self.call(command, Frame::new(command.name()).with(true))
    }

    fn query_u8(&mut self, command: Command) -> Result<u8> {
        let frame = self.query(command)?;
        frame
            .u8_at(0)
            .ok_or_else(|| unparsable(command, &frame))
    }

    // Session

    /// Confirm a programmer is answering and read its identity.
    pub fn probe(&mut self) -> Result<ProgrammerInfo> {
        let version = self.programmer_version()?;
        let compile_time = self.compile_time()?;
        info!("Programmer {version}, built {compile_time}");
        Ok(ProgrammerInfo {
            version,
            compile_time,
        })
    }

    /// Firmware version of the programmer.
    pub fn programmer_version(&mut self) -> Result<String> {
        let frame = self.query(Command::GetAppVersion)?;
        Ok(format!(
            "{} ({} / {})",
            frame.values[0], frame.values[1], frame.values[2]
        ))
    }

    /// Build date and time of the programmer firmware.
    pub fn compile_time(&mut self) -> Result<String> {
        let frame = self.query(Command::GetAppCompileTime)?;
        Ok(format!("{}, {}", frame.values[0], frame.values[1]))
    }

    // Power

    /// Set the target supply voltage and switching mode.
    pub fn set_vdd_control(&mut self, voltage: VddVoltage, mode: PowerMode) -> Result<()> {
        debug!("VDD {voltage}, {mode}");
        let request = Frame::new(Command::SetVddCtrl.name())
            .with(voltage.value())
            .with(mode.value());
        self.call(Command::SetVddCtrl, request).map(drop)
    }

    /// Set the bus I/O level.
    pub fn set_io_voltage(&mut self, voltage: IoVoltage) -> Result<()> {
        debug!("I/O level {voltage}");
        let request = Frame::new(Command::SetIoVol.name()).with(voltage.value());
        self.call(Command::SetIoVol, request).map(drop)
    }

    /// Apply all supply settings.
    pub fn apply_power(&mut self, power: &PowerSettings) -> Result<()> {
        self.set_vdd_control(power.vdd, power.vdd_mode)?;
        self.set_io_voltage(power.io)
    }

    /// Set the gate control mode.
    pub fn set_gate_mode(&mut self, mode: PowerMode) -> Result<()> {
        let request = Frame::new(Command::SetGateCtrl.name()).with(mode.value());
        self.call(Command::SetGateCtrl, request).map(drop)
    }

    /// Current gate control mode.
    pub fn gate_mode(&mut self) -> Result<PowerMode> {
        let value = self.query_u8(Command::GetGateCtrl)?;
        PowerMode::from_value(value).ok_or_else(|| Error::UnexpectedResponse {
            command: Command::GetGateCtrl.name().to_string(),
            reason: format!("unknown gate mode {value:#04x}"),
        })
    }

    // Chip selection

    /// Select a chip and bus address after checking them against `registry`.
    ///
    /// Nothing is sent when the pair is invalid.
    pub fn select_chip_and_address(
        &mut self,
        registry: &ChipRegistry,
        part: u16,
        address: u8,
    ) -> Result<&ChipModel> {
        let chip = registry.validate(part, address)?.clone();

        let request = Frame::new(Command::SetChip.name()).with(self.revision.chip_value(part));
        self.call(Command::SetChip, request)?;
        let request = Frame::new(Command::SetDevAddr.name()).with(address);
        self.call(Command::SetDevAddr, request)?;

        debug!("Selected {chip} at {address:#04x}");
        let selection = self.selection.insert(Selection { chip, address });
        Ok(&selection.chip)
    }

    /// Chip part number the programmer has selected.
    pub fn current_chip(&mut self) -> Result<u16> {
        let frame = self.query(Command::GetChip)?;
        frame
            .u16_at(0)
            .ok_or_else(|| unparsable(Command::GetChip, &frame))
    }

    /// Bus address the programmer has selected.
    pub fn current_device_address(&mut self) -> Result<u8> {
        self.query_u8(Command::GetDevAddr)
    }

    /// Select the zone that subsequent buffer operations address.
    pub fn select_zone(&mut self, kind: ZoneKind) -> Result<()> {
        let request = Frame::new(Command::SetZone.name()).with(kind.mask());
        self.call(Command::SetZone, request).map(drop)
    }

    /// Zone the programmer has selected.
    pub fn current_zone(&mut self) -> Result<ZoneKind> {
        let mask = self.query_u8(Command::GetZone)?;
        ZoneKind::from_mask(mask)
    }

    // Target queries

    /// Part number and revision of the target.
    pub fn chip_info(&mut self) -> Result<ChipInfo> {
        let frame = self.query(Command::GetChipInfo)?;
        match (frame.u8_at(0), frame.u8_at(1)) {
            (Some(part_number), Some(version)) => Ok(ChipInfo {
                part_number,
                version,
            }),
            _ => Err(unparsable(Command::GetChipInfo, &frame)),
        }
    }

    /// Unique ID of the target.
    pub fn chip_uid(&mut self) -> Result<u32> {
        let frame = self.query(Command::GetChipUID)?;
        frame
            .u32_at(0)
            .ok_or_else(|| unparsable(Command::GetChipUID, &frame))
    }

    /// Read one target register.
    pub fn read_register(&mut self, address: u8) -> Result<u8> {
        let frame = self.call(
            Command::ReadReg,
            Frame::new(Command::ReadReg.name()).with(address),
        )?;
        frame
            .u8_at(0)
            .ok_or_else(|| unparsable(Command::ReadReg, &frame))
    }

    /// Write one target register.
    pub fn write_register(&mut self, address: u8, value: u8) -> Result<()> {
        let request = Frame::new(Command::WriteReg.name())
            .with(address)
            .with(value);
        self.call(Command::WriteReg, request).map(drop)
    }

    // Checksums

    /// Store the expected checksum of the image in the programmer buffer.
    pub fn write_checksum(&mut self, kind: ZoneKind, sum: u32) -> Result<()> {
        let mut request = Frame::new(Command::FwWriteChecksum.name());
        if self.revision.zoned_checksum() {
            request = request.with(kind.mask());
        }
        self.call(Command::FwWriteChecksum, request.with(sum))
            .map(drop)
    }

    /// Checksum of the image in the programmer buffer.
    pub fn read_checksum(&mut self) -> Result<u32> {
        let frame = self.query(Command::FwReadChecksum)?;
        frame
            .u32_at(0)
            .ok_or_else(|| unparsable(Command::FwReadChecksum, &frame))
    }

    // Long-running operations

    /// Program the buffered image into the target.
    pub fn commit_write(&mut self) -> Result<()> {
        self.query(Command::FwWriteStart).map(drop)
    }

    /// Load the selected target zone into the programmer buffer.
    pub fn read_start(&mut self) -> Result<()> {
        self.query(Command::FwReadStart).map(drop)
    }

    /// Persist the buffered image in programmer flash.
    pub fn save_to_programmer(&mut self) -> Result<()> {
        self.query(Command::SaveConfig).map(drop)
    }

    /// Erase the programmer flash.
    pub fn format_device(&mut self) -> Result<()> {
        warn!("Erasing programmer flash");
        self.query(Command::FlashFormat).map(drop)
    }

    // Zone transfer

    fn selected(&self) -> Result<&ChipModel> {
        self.selected_chip().ok_or(Error::NoChipSelected)
    }

    /// Upload `data` into the programmer buffer for zone `kind`.
    ///
    /// The zone must already be selected on the programmer.
    pub fn write_zone<F>(&mut self, kind: ZoneKind, data: &[u8], progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let zone = self.selected()?.zone(kind);
        ZoneTransfer::new(&mut self.dispatcher, self.revision.payload_coding())
            .write(zone, data, progress)
    }

    /// Download zone `kind` from the programmer buffer into `out`.
    pub fn read_zone_into<F>(&mut self, kind: ZoneKind, out: &mut [u8], progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let zone = self.selected()?.zone(kind);
        ZoneTransfer::new(&mut self.dispatcher, self.revision.payload_coding())
            .read_into(zone, out, progress)
    }

    /// Download zone `kind` from the programmer buffer.
    pub fn read_zone<F>(&mut self, kind: ZoneKind, progress: F) -> Result<Vec<u8>>
    where
        F: FnMut(usize, usize),
    {
        let zone = self.selected()?.zone(kind);
        ZoneTransfer::new(&mut self.dispatcher, self.revision.payload_coding())
            .read(zone, progress)
    }

    // Flows

    /// Upload `data` to zone `kind` and commit it.
    ///
    /// Expects the chip and address to be selected and power applied.
    /// `progress` covers the block upload; the commit step reports through
    /// heartbeats only.
    pub fn program<F>(
        &mut self,
        kind: ZoneKind,
        data: &[u8],
        target: CommitTarget,
        progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let zone = self.selected()?.zone(kind);
        if data.len() > zone.size as usize {
            return Err(Error::ZoneOverflow {
                len: data.len(),
                size: zone.size,
            });
        }

        self.select_zone(kind)?;
        self.write_zone(kind, data, progress)?;

        // The zero padding sent after `data` adds nothing to the sum.
        let sum = checksum(data);
        self.write_checksum(kind, sum)?;

        match target {
            CommitTarget::Chip => self.commit_write()?,
            CommitTarget::Programmer => self.save_to_programmer()?,
        }
        info!("Programmed {} bytes into {kind} (checksum {sum:#010x})", data.len());
        Ok(())
    }

    /// Load zone `kind` from the target and download it.
    pub fn read_chip<F>(&mut self, kind: ZoneKind, progress: F) -> Result<Vec<u8>>
    where
        F: FnMut(usize, usize),
    {
        self.selected()?;
        self.select_zone(kind)?;
        self.read_start()?;
        let data = self.read_zone(kind, progress)?;
        info!("Read {} bytes from {kind} (checksum {:#010x})", data.len(), checksum(&data));
        Ok(data)
    }

    /// Try every chip and address in `registry` until one answers both
    /// `GetChipInfo` and `GetChipUID`.
    ///
    /// The last probed pair stays selected when nothing answers.
    pub fn autodetect_chip(&mut self, registry: &ChipRegistry) -> Result<Option<DetectedChip>> {
        for chip in registry.iter() {
            for &address in &chip.addresses {
                if crate::is_interrupted_requested() {
                    return Err(Error::Interrupted);
                }
                self.select_chip_and_address(registry, chip.part, address)?;
                let probe = self
                    .chip_info()
                    .and_then(|info| self.chip_uid().map(|uid| (info, uid)));
                match probe {
                    Ok((info, uid)) => {
                        info!("Found {chip} at {address:#04x}, UID {uid:#010x}");
                        return Ok(Some(DetectedChip {
                            chip: chip.clone(),
                            address,
                            info,
                            uid,
                        }));
                    },
                    Err(e @ (Error::DeviceStatus { .. } | Error::Timeout(_))) => {
                        debug!("No {chip} at {address:#04x}: {e}");
                    },
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(None)
    }

    /// Send a raw protocol line and collect whatever comes back.
    pub fn send_raw(&mut self, line: &str) -> Result<Vec<Frame>> {
        self.dispatcher.execute_raw(line)
    }
}

#[cfg(feature = "native")]
impl Programmer<crate::transport::Transport> {
    /// Open `port` at the revision's default baud rate.
    pub fn open(port: &str, config: &SessionConfig) -> Result<Self> {
        let serial = crate::port::SerialConfig::new(port, config.revision.baud_rate());
        Self::open_with(&serial, config)
    }

    /// Open a port with explicit serial settings.
    pub fn open_with(serial: &crate::port::SerialConfig, config: &SessionConfig) -> Result<Self> {
        let transport = crate::transport::Transport::open(serial, config.queue_depth)?;
        info!(
            "Connected to {} at {} baud ({})",
            transport.name(),
            serial.baud_rate,
            config.revision
        );
        Ok(Self::new(transport, config))
    }

    /// Close the port. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.dispatcher.link_mut().close()
    }
}

fn unparsable(command: Command, frame: &Frame) -> Error {
    Error::UnexpectedResponse {
        command: command.name().to_string(),
        reason: format!("unparsable value in {frame}"),
    }
}
