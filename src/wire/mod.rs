//! The framed wire protocol.
//!
//! Every message on the wire is a fixed 32-byte [`header::FrameHeader`]
//! followed by up to [`MAX_BODY_SIZE`] bytes of body. A frame is always read
//! as two distinct typed reads -- the header, then exactly `length` more
//! bytes -- never by aliasing one buffer through an incompatible type.

pub mod command;
pub mod header;
pub mod sensor_event;

/// Maximum body size, independent of the header.
pub const MAX_BODY_SIZE: usize = 32 * 1024 - header::FRAME_HEADER_SIZE;

/// Maximum total frame size (header + body).
pub const MAX_FRAME_SIZE: usize = 32 * 1024;

/// Well-known reply magic exchanged during the channel-ready handshake.
pub const HANDSHAKE_MAGIC: u32 = 0xCAFE_BEEF;
