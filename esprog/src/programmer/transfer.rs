//! Block transfer between the host and the programmer buffer.
//!
//! A zone moves in blocks of at most 512 bytes, each tagged with its
//! absolute address and additive checksum. Writes pad the tail of the image
//! with zeros up to the zone size; the programmer echoes the address of every
//! stored block. Reads walk the zone until it is full, checking each block's
//! address and checksum.

use log::{debug, trace};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::protocol::{Command, Frame, PayloadCoding, checksum};
use crate::target::Zone;
use crate::transport::Link;

/// Zone transfer bound to one dispatcher and payload coding.
pub struct ZoneTransfer<'a, L: Link> {
    dispatcher: &'a mut Dispatcher<L>,
    coding: PayloadCoding,
}

impl<'a, L: Link> ZoneTransfer<'a, L> {
    /// Create a transfer.
    pub fn new(dispatcher: &'a mut Dispatcher<L>, coding: PayloadCoding) -> Self {
        Self { dispatcher, coding }
    }

    /// Write `data` to `zone`, zero-filling the rest of the zone.
    ///
    /// `progress` receives the bytes sent so far and the zone size.
    pub fn write<F>(&mut self, zone: Zone, data: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let size = zone.size as usize;
        if data.len() > size {
            return Err(Error::ZoneOverflow {
                len: data.len(),
                size: zone.size,
            });
        }

        let block_size = zone.block_size() as usize;
        debug!(
            "Writing {} bytes to zone at {:#010x} ({} blocks)",
            data.len(),
            zone.offset,
            zone.block_count()
        );

        let mut block = vec![0u8; block_size];
        let mut sent = 0;
        while sent < size {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            let len = block_size.min(size - sent);
            let chunk = &mut block[..len];
            fill_block(data, sent, chunk);

            let address = zone.offset + sent as u32;
            self.write_block(address, chunk)?;

            sent += len;
            progress(sent, size);
        }
        Ok(())
    }

    /// Read `zone` into `out`, which must be exactly the zone size.
    ///
    /// On error the blocks already read stay in `out`.
    pub fn read_into<F>(&mut self, zone: Zone, out: &mut [u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let size = zone.size as usize;
        if out.len() != size {
            return Err(Error::BufferSize {
                expected: size,
                actual: out.len(),
            });
        }

        debug!("Reading {size} bytes from zone at {:#010x}", zone.offset);

        let mut received = 0;
        while received < size {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            let address = zone.offset + received as u32;
            let payload = self.read_block(address)?;
            let end = received + payload.len();
            if end > size {
                return Err(Error::ZoneOverflow {
                    len: end,
                    size: zone.size,
                });
            }

            out[received..end].copy_from_slice(&payload);
            received = end;
            progress(received, size);
        }
        Ok(())
    }

    /// Read `zone` into a new buffer.
    pub fn read<F>(&mut self, zone: Zone, progress: F) -> Result<Vec<u8>>
    where
        F: FnMut(usize, usize),
    {
        let mut out = vec![0u8; zone.size as usize];
        self.read_into(zone, &mut out, progress)?;
        Ok(out)
    }

    fn write_block(&mut self, address: u32, block: &[u8]) -> Result<()> {
        let sum = checksum(block);
        trace!("Block {address:#010x}: {} bytes, checksum {sum:#010x}", block.len());

        let request = Frame::new(Command::FwWriteBuf.name())
            .with(address)
            .with(sum)
            .with(self.coding.encode(block));
        let response = self.dispatcher.execute(Command::FwWriteBuf, request)?;

        let echoed = response
            .u32_at(0)
            .ok_or_else(|| unexpected(Command::FwWriteBuf, "unparsable address"))?;
        if echoed != address {
            return Err(Error::AddressMismatch {
                expected: address,
                actual: echoed,
            });
        }
        Ok(())
    }

    fn read_block(&mut self, address: u32) -> Result<Vec<u8>> {
        let request = Frame::new(Command::FwReadBuf.name()).with(address);
        let response = self.dispatcher.execute(Command::FwReadBuf, request)?;

        let returned = response
            .u32_at(0)
            .ok_or_else(|| unexpected(Command::FwReadBuf, "unparsable address"))?;
        if returned != address {
            return Err(Error::AddressMismatch {
                expected: address,
                actual: returned,
            });
        }

        let declared = response
            .u32_at(1)
            .ok_or_else(|| unexpected(Command::FwReadBuf, "unparsable checksum"))?;
        let payload = response
            .value(2)
            .and_then(|v| self.coding.decode(v))
            .ok_or_else(|| unexpected(Command::FwReadBuf, "payload is not valid base64"))?;
        if payload.is_empty() {
            return Err(unexpected(Command::FwReadBuf, "empty block"));
        }

        let actual = checksum(&payload);
        if actual != declared {
            return Err(Error::ChecksumMismatch {
                address,
                expected: declared,
                actual,
            });
        }
        trace!("Block {address:#010x}: {} bytes", payload.len());
        Ok(payload)
    }
}

/// Copy the part of `data` starting at `offset` into `block`, zero-filling
/// whatever lies past the end of `data`.
fn fill_block(data: &[u8], offset: usize, block: &mut [u8]) {
    let available = data.len().saturating_sub(offset).min(block.len());
    if available > 0 {
        block[..available].copy_from_slice(&data[offset..offset + available]);
    }
    block[available..].fill(0);
}

fn unexpected(command: Command, reason: &str) -> Error {
    Error::UnexpectedResponse {
        command: command.name().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Timeouts;
    use crate::target::{ChipRegistry, ZoneKind};
    use crate::testing::FakeProgrammer;
    use std::time::Duration;

    fn timeouts() -> Timeouts {
        Timeouts {
            fast: Duration::from_millis(50),
            slow: Duration::from_millis(50),
            heartbeat: Duration::from_millis(50),
        }
    }

    /// Fake with NU1708 selected and the MTP zone active.
    fn nu1708(coding: PayloadCoding) -> (Dispatcher<FakeProgrammer>, Zone) {
        let fake = FakeProgrammer::new(coding);
        {
            let state = fake.state();
            let mut state = state.lock().unwrap();
            state.chip = 0x1708;
            state.zone = ZoneKind::Mtp.mask();
        }
        let zone = ChipRegistry::builtin()
            .require(0x1708)
            .unwrap()
            .zone(ZoneKind::Mtp);
        (Dispatcher::new(fake, timeouts()), zone)
    }

    #[test]
    fn test_fill_block_pads_tail() {
        let data = [1u8, 2, 3, 4, 5];
        let mut block = [0xAAu8; 4];
        fill_block(&data, 4, &mut block);
        assert_eq!(block, [5, 0, 0, 0]);

        fill_block(&data, 8, &mut block);
        assert_eq!(block, [0; 4]);
    }

    #[test]
    fn test_write_pads_partial_image() {
        let (mut dispatcher, zone) = nu1708(PayloadCoding::Inverted);
        let state = dispatcher.link().state();
        let data: Vec<u8> = (0..32000u32).map(|i| (i % 251) as u8 + 1).collect();

        let mut calls = Vec::new();
        ZoneTransfer::new(&mut dispatcher, PayloadCoding::Inverted)
            .write(zone, &data, |done, total| calls.push((done, total)))
            .unwrap();

        let state = state.lock().unwrap();
        let writes: Vec<&Frame> = state
            .requests
            .iter()
            .filter(|f| f.command == "FwWriteBuf")
            .collect();
        assert_eq!(writes.len(), 64);
        assert_eq!(writes[62].u32_at(0), Some(31744));
        assert_eq!(writes[63].u32_at(0), Some(32256));

        // Block 62 carries the last 256 data bytes then zeros.
        let block62 = PayloadCoding::Inverted
            .decode(writes[62].value(2).unwrap())
            .unwrap();
        assert_eq!(block62.len(), 512);
        assert_eq!(&block62[..256], &data[31744..]);
        assert!(block62[256..].iter().all(|&b| b == 0));
        assert_eq!(writes[62].u32_at(1), Some(checksum(&block62)));

        let block63 = PayloadCoding::Inverted
            .decode(writes[63].value(2).unwrap())
            .unwrap();
        assert!(block63.iter().all(|&b| b == 0));

        assert_eq!(&state.memory[..32000], &data[..]);
        assert_eq!(calls.len(), 64);
        assert_eq!(calls.last(), Some(&(32768, 32768)));
    }

    #[test]
    fn test_write_overflow_sends_nothing() {
        let (mut dispatcher, zone) = nu1708(PayloadCoding::Plain);
        let state = dispatcher.link().state();
        let data = vec![0u8; zone.size as usize + 4];

        let err = ZoneTransfer::new(&mut dispatcher, PayloadCoding::Plain)
            .write(zone, &data, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::ZoneOverflow { len: 32772, size: 32768 }));
        assert!(state.lock().unwrap().requests.is_empty());
    }

    #[test]
    fn test_write_echo_mismatch_fails() {
        let (mut dispatcher, zone) = nu1708(PayloadCoding::Inverted);
        dispatcher.link().state().lock().unwrap().echo_offset = 0x200;

        let err = ZoneTransfer::new(&mut dispatcher, PayloadCoding::Inverted)
            .write(zone, &[1, 2, 3, 4], |_, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            Error::AddressMismatch {
                expected: 0,
                actual: 0x200
            }
        ));
    }

    #[test]
    fn test_read_zone() {
        let (mut dispatcher, zone) = nu1708(PayloadCoding::Inverted);
        {
            let state = dispatcher.link().state();
            let mut state = state.lock().unwrap();
            for (i, b) in state.memory[..32768].iter_mut().enumerate() {
                *b = (i % 7) as u8;
            }
        }

        let mut last = (0, 0);
        let data = ZoneTransfer::new(&mut dispatcher, PayloadCoding::Inverted)
            .read(zone, |done, total| last = (done, total))
            .unwrap();
        assert_eq!(data.len(), 32768);
        assert_eq!(data[13], 6);
        assert_eq!(last, (32768, 32768));
    }

    #[test]
    fn test_read_checksum_mismatch_keeps_earlier_blocks() {
        let (mut dispatcher, zone) = nu1708(PayloadCoding::Plain);
        {
            let state = dispatcher.link().state();
            let mut state = state.lock().unwrap();
            state.memory[..1024].fill(0x5A);
            state.corrupt_read_at = Some(512);
        }

        let mut out = vec![0u8; zone.size as usize];
        let err = ZoneTransfer::new(&mut dispatcher, PayloadCoding::Plain)
            .read_into(zone, &mut out, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { address: 512, .. }));
        assert!(out[..512].iter().all(|&b| b == 0x5A));
        assert!(out[512..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_overshoot_fails() {
        let (mut dispatcher, zone) = nu1708(PayloadCoding::Inverted);
        dispatcher.link().state().lock().unwrap().read_extra = 16;

        let err = ZoneTransfer::new(&mut dispatcher, PayloadCoding::Inverted)
            .read(zone, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::ZoneOverflow { .. }));
    }

    #[test]
    fn test_read_buffer_size_checked() {
        let (mut dispatcher, zone) = nu1708(PayloadCoding::Inverted);
        let mut out = vec![0u8; 16];
        let err = ZoneTransfer::new(&mut dispatcher, PayloadCoding::Inverted)
            .read_into(zone, &mut out, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::BufferSize { expected: 32768, actual: 16 }));
    }

    #[test]
    fn test_interrupt_stops_between_blocks() {
        let (mut dispatcher, zone) = nu1708(PayloadCoding::Inverted);
        let state = dispatcher.link().state();

        let mut blocks = 0;
        let err = ZoneTransfer::new(&mut dispatcher, PayloadCoding::Inverted)
            .write(zone, &[0; 2048], |_, _| {
                blocks += 1;
                if blocks == 2 {
                    crate::test_set_interrupted(true);
                }
            })
            .unwrap_err();
        crate::test_set_interrupted(false);

        assert!(matches!(err, Error::Interrupted));
        assert_eq!(state.lock().unwrap().requests.len(), 2);
    }

    #[test]
    fn test_coding_mismatch_is_rejected() {
        let (mut dispatcher, zone) = nu1708(PayloadCoding::Plain);
        // The programmer decodes plain base64; inverted text is not that.
        let err = ZoneTransfer::new(&mut dispatcher, PayloadCoding::Inverted)
            .write(zone, &[0x10, 0x20, 0x30, 0x40], |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::DeviceStatus { .. }));
    }
}
