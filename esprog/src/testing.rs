//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{Command, Frame, HEARTBEAT_DONE, PayloadCoding, checksum};
use crate::target::{ChipRegistry, ZoneKind};
use crate::transport::Link;

type Responder = Box<dyn FnMut(&Frame) -> Vec<Vec<u8>> + Send>;

/// Chunks waiting to be read. Readers block on it the way a serial read
/// blocks until data arrives or the port timeout expires.
#[derive(Default)]
pub(crate) struct Inbox {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
}

impl Inbox {
    /// Queue `chunk` and wake a blocked reader.
    pub(crate) fn push(&self, chunk: Vec<u8>) {
        self.chunks.lock().unwrap().push_back(chunk);
        self.ready.notify_all();
    }

    fn clear(&self) {
        self.chunks.lock().unwrap().clear();
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let chunks = self.chunks.lock().unwrap();
        let (mut chunks, _) = self
            .ready
            .wait_timeout_while(chunks, timeout, |chunks| chunks.is_empty())
            .unwrap();
        let Some(mut chunk) = chunks.pop_front() else {
            return Err(io::ErrorKind::TimedOut.into());
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunks.push_front(chunk.split_off(n));
        }
        Ok(n)
    }
}

/// In-memory port. Every complete request line written to it is handed to
/// the responder; the chunks it returns are queued for the reader, either
/// at once or one every `gap` from a delivery thread.
pub(crate) struct MockPort {
    responder: Responder,
    line: Vec<u8>,
    written: Arc<Mutex<Vec<u8>>>,
    inbox: Arc<Inbox>,
    timeout: Duration,
    gap: Option<Duration>,
}

impl MockPort {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: FnMut(&Frame) -> Vec<Vec<u8>> + Send + 'static,
    {
        Self {
            responder: Box::new(responder),
            line: Vec::new(),
            written: Arc::new(Mutex::new(Vec::new())),
            inbox: Arc::new(Inbox::default()),
            timeout: Duration::from_millis(20),
            gap: None,
        }
    }

    /// Deliver reply chunks one at a time, `gap` apart, after the write
    /// returns.
    pub(crate) fn with_chunk_gap(mut self, gap: Duration) -> Self {
        self.gap = Some(gap);
        self
    }

    /// Every byte written so far.
    pub(crate) fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }

    /// Chunks waiting to be read; tests may inject unsolicited input.
    pub(crate) fn inbox(&self) -> Arc<Inbox> {
        Arc::clone(&self.inbox)
    }

    fn deliver(&self, replies: Vec<Vec<u8>>) {
        match self.gap {
            None => replies.into_iter().for_each(|chunk| self.inbox.push(chunk)),
            Some(gap) => {
                let inbox = Arc::clone(&self.inbox);
                thread::spawn(move || {
                    for chunk in replies {
                        thread::sleep(gap);
                        inbox.push(chunk);
                    }
                });
            },
        }
    }
}

struct MockReader {
    inbox: Arc<Inbox>,
    timeout: Duration,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inbox.read(buf, self.timeout)
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inbox.read(buf, self.timeout)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        self.line.extend_from_slice(buf);

        while let Some(pos) = self.line.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = self.line.drain(..pos + 2).collect();
            if let Some(request) = Frame::decode_request(&line) {
                let replies = (self.responder)(&request);
                self.deliver(replies);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn baud_rate(&self) -> u32 {
        1_000_000
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn clear_input(&mut self) -> Result<()> {
        self.inbox.clear();
        Ok(())
    }

    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(MockReader {
            inbox: Arc::clone(&self.inbox),
            timeout: self.timeout,
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Link that plays back frames at fixed offsets from the first send.
pub(crate) struct ScriptedLink {
    script: VecDeque<(Duration, Frame)>,
    started: Option<Instant>,
    sent: Vec<String>,
}

impl ScriptedLink {
    pub(crate) fn new(script: Vec<(u64, Frame)>) -> Self {
        Self {
            script: script
                .into_iter()
                .map(|(ms, frame)| (Duration::from_millis(ms), frame))
                .collect(),
            started: None,
            sent: Vec::new(),
        }
    }

    /// Lines sent so far, without the terminator.
    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.clone()
    }
}

impl Link for ScriptedLink {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        self.started.get_or_insert_with(Instant::now);
        self.sent.push(frame.to_string());
        Ok(())
    }

    fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.started.get_or_insert_with(Instant::now);
        self.sent
            .push(String::from_utf8_lossy(bytes).trim_end().to_string());
        Ok(())
    }

    fn clear(&mut self) {}

    fn recv(&mut self, timeout: Duration) -> Result<Vec<Frame>> {
        let start = *self.started.get_or_insert_with(Instant::now);
        let deadline = Instant::now() + timeout;

        let due = match self.script.front() {
            Some((offset, _)) if start + *offset <= deadline => start + *offset,
            _ => {
                thread::sleep(deadline.saturating_duration_since(Instant::now()));
                return Err(Error::Timeout("script idle".into()));
            },
        };
        thread::sleep(due.saturating_duration_since(Instant::now()));

        let now = Instant::now();
        let mut frames = Vec::new();
        while let Some((offset, _)) = self.script.front() {
            if start + *offset > now {
                break;
            }
            if let Some((_, frame)) = self.script.pop_front() {
                frames.push(frame);
            }
        }
        Ok(frames)
    }
}

/// Observable state of a [`FakeProgrammer`].
#[derive(Debug)]
pub(crate) struct FakeState {
    pub coding: PayloadCoding,
    pub chip: u16,
    pub address: u8,
    pub zone: u8,
    /// Chip/address pair that answers `GetChipInfo`.
    pub present: Option<(u16, u8)>,
    pub memory: Vec<u8>,
    pub registers: [u8; 256],
    pub vdd: (u8, u8),
    pub io: u8,
    pub gate: u8,
    /// Last `FwWriteChecksum` arguments: zone (if sent) and checksum.
    pub written_checksum: Option<(Option<u8>, u32)>,
    /// Progress heartbeats sent before completion.
    pub heartbeats: u8,
    /// Added to the address echoed by `FwWriteBuf`.
    pub echo_offset: u32,
    /// Block whose read checksum is reported wrong.
    pub corrupt_read_at: Option<u32>,
    /// Extra bytes appended to every read block.
    pub read_extra: usize,
    /// Command answered with the given status instead of success.
    pub fail: Option<(Command, u8)>,
    pub requests: Vec<Frame>,
}

/// In-process programmer emulation with a 128 KiB memory.
pub(crate) struct FakeProgrammer {
    state: Arc<Mutex<FakeState>>,
    replies: VecDeque<Frame>,
}

impl FakeProgrammer {
    pub(crate) fn new(coding: PayloadCoding) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                coding,
                chip: 0,
                address: 0,
                zone: 0,
                present: None,
                memory: vec![0; 0x2_0000],
                registers: [0; 256],
                vdd: (0, 0),
                io: 0,
                gate: 0,
                written_checksum: None,
                heartbeats: 2,
                echo_offset: 0,
                corrupt_read_at: None,
                read_extra: 0,
                fail: None,
                requests: Vec::new(),
            })),
            replies: VecDeque::new(),
        }
    }

    pub(crate) fn state(&self) -> Arc<Mutex<FakeState>> {
        Arc::clone(&self.state)
    }

    /// Replies the programmer would send for `request`.
    pub(crate) fn respond(&self, request: &Frame) -> Vec<Frame> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        let Some(command) = Command::from_name(&request.command) else {
            return vec![Frame::new("Error")];
        };
        let reply = Frame::new(command.name());
        if let Some((failing, status)) = state.fail {
            if failing == command {
                return vec![reply.with_status(status)];
            }
        }
        let ok = reply.clone().with_status(0);
        let nak = reply.with_status(0x01);

        match command {
            Command::GetAppVersion => vec![ok.with("2.1.0").with("ESPROG").with("B")],
            Command::GetAppCompileTime => vec![ok.with("Mar 12 2024").with("10:22:01")],
            Command::SetVddCtrl => {
                state.vdd = (
                    request.u8_at(0).unwrap_or_default(),
                    request.u8_at(1).unwrap_or_default(),
                );
                vec![ok]
            },
            Command::SetIoVol => {
                state.io = request.u8_at(0).unwrap_or_default();
                vec![ok]
            },
            Command::SetGateCtrl => {
                state.gate = request.u8_at(0).unwrap_or_default();
                vec![ok]
            },
            Command::GetGateCtrl => vec![ok.with(state.gate)],
            Command::SetChip => {
                state.chip = request.u16_at(0).unwrap_or_default();
                vec![ok]
            },
            Command::GetChip => vec![ok.with(state.chip)],
            Command::SetDevAddr => {
                state.address = request.u8_at(0).unwrap_or_default();
                vec![ok]
            },
            Command::GetDevAddr => vec![ok.with(state.address)],
            Command::SetZone => {
                state.zone = request.u8_at(0).unwrap_or_default();
                vec![ok]
            },
            Command::GetZone => vec![ok.with(state.zone)],
            Command::ReadReg => {
                let reg = request.u8_at(0).unwrap_or_default();
                vec![ok.with(state.registers[usize::from(reg)])]
            },
            Command::WriteReg => {
                let reg = request.u8_at(0).unwrap_or_default();
                state.registers[usize::from(reg)] = request.u8_at(1).unwrap_or_default();
                vec![ok]
            },
            Command::GetChipInfo if state.present == Some((state.chip, state.address)) => {
                vec![ok.with(0x08u8).with(0x02u8)]
            },
            Command::GetChipUID if state.present == Some((state.chip, state.address)) => {
                vec![ok.with(0xdead_beefu32)]
            },
            Command::GetChipInfo | Command::GetChipUID => vec![nak],
            Command::FwWriteBuf => {
                let (Some(address), Some(declared)) = (request.u32_at(0), request.u32_at(1)) else {
                    return vec![nak];
                };
                let Some(data) = request.value(2).and_then(|v| state.coding.decode(v)) else {
                    return vec![nak];
                };
                let start = address as usize;
                if checksum(&data) != declared || start + data.len() > state.memory.len() {
                    return vec![nak];
                }
                state.memory[start..start + data.len()].copy_from_slice(&data);
                vec![ok.with(address.wrapping_add(state.echo_offset))]
            },
            Command::FwReadBuf => {
                let Some(address) = request.u32_at(0) else {
                    return vec![nak];
                };
                let zone = ChipRegistry::builtin().get(state.chip).and_then(|chip| {
                    ZoneKind::from_mask(state.zone)
                        .ok()
                        .map(|kind| chip.zone(kind))
                });
                let Some(zone) = zone else {
                    return vec![nak];
                };
                let start = address as usize;
                let len = (zone.block_size() as usize)
                    .min(zone.end().saturating_sub(address) as usize)
                    + state.read_extra;
                let end = (start + len).min(state.memory.len());
                let data = &state.memory[start.min(end)..end];
                let mut sum = checksum(data);
                if state.corrupt_read_at == Some(address) {
                    sum = sum.wrapping_add(1);
                }
                vec![ok.with(address).with(sum).with(state.coding.encode(data))]
            },
            Command::FwWriteChecksum => {
                state.written_checksum = match request.values.len() {
                    2 => request.u32_at(1).map(|sum| (request.u8_at(0), sum)),
                    _ => request.u32_at(0).map(|sum| (None, sum)),
                };
                vec![ok]
            },
            Command::FwReadChecksum => {
                let sum = state.written_checksum.map(|(_, sum)| sum).unwrap_or_default();
                vec![ok.with(sum)]
            },
            Command::FwWriteStart
            | Command::FwReadStart
            | Command::SaveConfig
            | Command::FlashFormat => {
                let mut frames: Vec<Frame> = (1..=state.heartbeats)
                    .map(|i| ok.clone().with(i))
                    .collect();
                frames.push(ok.with(HEARTBEAT_DONE));
                frames
            },
        }
    }
}

impl Link for FakeProgrammer {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        self.replies.clear();
        let wire = Frame::decode_request(&frame.encode())
            .ok_or_else(|| Error::UnexpectedResponse {
                command: frame.command.clone(),
                reason: "request does not decode".into(),
            })?;
        let replies = self.respond(&wire);
        self.replies.extend(replies);
        Ok(())
    }

    fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.replies.clear();
        match Frame::decode_request(bytes) {
            Some(request) => {
                let replies = self.respond(&request);
                self.replies.extend(replies);
            },
            None => self.replies.push_back(Frame::new("Error")),
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.replies.clear();
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<Frame>> {
        if self.replies.is_empty() {
            thread::sleep(timeout);
            return Err(Error::Timeout("fake programmer idle".into()));
        }
        Ok(self.replies.drain(..).collect())
    }
}
