//! Accumulation buffer for incoming frame bytes.
//!
//! Serial reads arrive in arbitrary chunks, so bytes are collected here and
//! every complete `[`…`]\r\n` line is handed to the frame decoder. After each
//! push the buffer is cut just past the last decoded frame; whatever follows
//! (usually a frame still arriving) stays for the next push.
//!
//! A line that never terminates would otherwise grow the buffer forever, so
//! the whole buffer is discarded once it exceeds [`MAX_BUFFERED`] bytes.

use log::trace;

use super::frame::{FRAME_END, Frame};

/// Upper bound on buffered, not yet parsed bytes.
pub const MAX_BUFFERED: usize = 8 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_BUFFERED),
        }
    }

    /// Append `data` and return every frame that became complete.
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        let mut consumed = 0;
        let mut pos = 0;

        while let Some(start) = find_byte(&self.buffer, b'[', pos) {
            let Some(end_rel) = find_seq(&self.buffer[start..], FRAME_END) else {
                break;
            };
            let end = start + end_rel + FRAME_END.len();

            // A later '[' before the terminator means the earlier start was noise.
            if let Some(inner) = self.buffer[start + 1..start + end_rel]
                .iter()
                .rposition(|&b| b == b'[')
            {
                pos = start + 1 + inner;
                continue;
            }

            let line = &self.buffer[start..end];
            match Frame::decode(line) {
                Some(frame) => {
                    trace!("[R] {frame}");
                    frames.push(frame);
                    consumed = end;
                },
                None => {
                    trace!("Dropped malformed line: {:?}", String::from_utf8_lossy(line));
                },
            }
            pos = end;
        }

        self.buffer.drain(..consumed);
        if self.buffer.len() > MAX_BUFFERED {
            trace!("Discarding {} unparsed bytes", self.buffer.len());
            self.buffer.clear();
        }

        frames
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

fn find_byte(haystack: &[u8], needle: u8, from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .iter()
        .position(|&b| b == needle)
        .map(|i| i + from)
}

fn find_seq(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b"[GetChip,0x00,0x1708]\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, "GetChip");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_frame() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(b"[GetCh").is_empty());
        assert!(buffer.push(b"ip,0x00,0x17").is_empty());
        assert!(buffer.push(b"08]\r").is_empty());
        let frames = buffer.push(b"\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].u16_at(0), Some(0x1708));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_and_tail() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b"[SetChip,0x00]\r\n[SetDevAddr,0x00]\r\n[GetZo");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].command, "SetDevAddr");
        assert_eq!(buffer.len(), b"[GetZo".len());

        let frames = buffer.push(b"ne,0x00,0x01]\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].u8_at(0), Some(0x01));
    }

    #[test]
    fn test_noise_between_frames() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b"\x00\xffboot log\r\n[SetChip,0x00]\r\n garbage [Error]\r\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, "SetChip");
        assert_eq!(frames[1].command, "Error");
        assert_eq!(frames[1].status, None);
    }

    #[test]
    fn test_unterminated_start_before_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b"[Set[GetChip,0x00,0x1718]\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, "GetChip");
    }

    #[test]
    fn test_malformed_frame_skipped() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b"[SetChip,bad]\r\n[SetDevAddr,0x00]\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, "SetDevAddr");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_resets() {
        let mut buffer = FrameBuffer::new();
        let noise = vec![b'['; MAX_BUFFERED + 1];
        assert!(buffer.push(&noise).is_empty());
        assert!(buffer.is_empty());

        let frames = buffer.push(b"[SetChip,0x00]\r\n");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut buffer = FrameBuffer::new();
        buffer.push(b"[SetCh");
        buffer.clear();
        let frames = buffer.push(b"ip,0x00]\r\n");
        assert!(frames.is_empty());
    }
}
