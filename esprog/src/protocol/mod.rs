//! ESPROG wire protocol.

pub mod checksum;
pub mod command;
pub mod frame;
pub mod frame_buffer;
pub mod payload;

// Re-export common types
pub use checksum::checksum;
pub use command::{Command, ERROR_FRAME, HEARTBEAT_DONE, ProtocolRevision, ResponseClass, Timeouts};
pub use frame::{Frame, Value};
pub use frame_buffer::FrameBuffer;
pub use payload::PayloadCoding;
