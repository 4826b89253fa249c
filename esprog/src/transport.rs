//! Serial transport with a background receive thread.
//!
//! The receive thread owns a cloned read handle and the accumulation
//! buffer. Every decoded frame goes into a bounded channel that the
//! dispatcher drains; the channel receiver is the only consumer.
//!
//! Before each write the transport discards unread input (port, buffer and
//! queue) so a response left over from an abandoned exchange cannot be taken
//! for the answer to the next request. The accumulation buffer is shared with
//! the receive thread and reset before the request goes out, never after, so
//! the first chunk of the reply is kept.

use std::io::Read;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{Frame, FrameBuffer};

/// Default depth of the frame queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Pause after a zero-length read so closed mock streams do not spin.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Frame-level link used by the dispatcher.
pub trait Link {
    /// Discard queued frames and unread input, then send `frame`.
    fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Discard queued frames and unread input, then send raw bytes.
    fn send_raw(&mut self, bytes: &[u8]) -> Result<()>;

    /// Drop queued frames.
    fn clear(&mut self);

    /// Wait up to `timeout` for frames.
    ///
    /// Returns every frame that is available once the first one arrived,
    /// or [`Error::Timeout`] if none did.
    fn recv(&mut self, timeout: Duration) -> Result<Vec<Frame>>;
}

/// Serial transport to the programmer.
pub struct Transport {
    port: Box<dyn Port>,
    frames: Receiver<Frame>,
    buffer: Arc<Mutex<FrameBuffer>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl Transport {
    /// Start a transport over an already opened port.
    pub fn new<P: Port + 'static>(port: P, queue_depth: usize) -> Result<Self> {
        let reader = port.try_clone_reader()?;
        let (tx, rx) = mpsc::sync_channel(queue_depth.max(1));
        let buffer = Arc::new(Mutex::new(FrameBuffer::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let buffer = Arc::clone(&buffer);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("esprog-rx".into())
                .spawn(move || receive_loop(reader, &tx, &buffer, &stop))?
        };

        debug!("Transport started on {} at {} baud", port.name(), port.baud_rate());
        Ok(Self {
            port: Box::new(port),
            frames: rx,
            buffer,
            stop,
            reader: Some(handle),
        })
    }

    /// Open the native serial port described by `config`.
    #[cfg(feature = "native")]
    pub fn open(config: &crate::port::SerialConfig, queue_depth: usize) -> Result<Self> {
        let port = crate::port::NativePort::open(config)?;
        Self::new(port, queue_depth)
    }

    /// Port name.
    pub fn name(&self) -> &str {
        self.port.name()
    }

    /// Discard unread input, then write `bytes`.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.port.clear_input()?;
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.clear();
        self.port.write_all_bytes(bytes)
    }

    /// Wait up to `timeout` for the first frame, then drain the queue.
    pub fn read_available(&mut self, timeout: Duration) -> Result<Vec<Frame>> {
        let first = match self.frames.recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => {
                return Err(Error::Timeout(format!("no frame within {timeout:?}")));
            },
            Err(RecvTimeoutError::Disconnected) => return Err(Error::Disconnected),
        };

        let mut frames = vec![first];
        frames.extend(self.frames.try_iter());
        Ok(frames)
    }

    /// Drop every queued frame.
    pub fn clear(&mut self) {
        let dropped = self.frames.try_iter().count();
        if dropped > 0 {
            trace!("Discarded {dropped} stale frames");
        }
    }

    /// Stop the receive thread and release the port. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("Receive thread panicked");
            }
            debug!("Transport closed on {}", self.port.name());
        }
        self.port.close()
    }

    /// Whether the transport is still open.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::Disconnected)
        }
    }
}

impl Link for Transport {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        trace!("[S] {frame}");
        self.write(&frame.encode())
    }

    fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("[S] {}", String::from_utf8_lossy(bytes).trim_end());
        self.write(bytes)
    }

    fn clear(&mut self) {
        Transport::clear(self);
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<Frame>> {
        self.read_available(timeout)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn receive_loop(
    mut reader: Box<dyn Read + Send>,
    tx: &SyncSender<Frame>,
    buffer: &Mutex<FrameBuffer>,
    stop: &AtomicBool,
) {
    let mut chunk = [0u8; 1024];

    while !stop.load(Ordering::Acquire) {
        match reader.read(&mut chunk) {
            Ok(0) => thread::sleep(IDLE_BACKOFF),
            Ok(n) => {
                let frames = buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(&chunk[..n]);
                for frame in frames {
                    match tx.try_send(frame) {
                        Ok(()) => {},
                        Err(TrySendError::Full(frame)) => {
                            warn!("Frame queue full, dropping {frame}");
                        },
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
            },
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                ) => {},
            Err(e) => {
                if !stop.load(Ordering::Acquire) {
                    warn!("Receive error, stopping: {e}");
                }
                return;
            },
        }
    }
}
