//! The fixed 32-byte frame header.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use static_assertions::const_assert_eq;

use crate::error::FatalReason;

/// `u64 id | u32 type | u32 length | i32 err | 3 x u64 reserved`.
pub const FRAME_HEADER_SIZE: usize = 8 + 4 + 4 + 4 + 3 * 8;
const_assert_eq!(FRAME_HEADER_SIZE, 32);

/// The on-wire frame header. `reserved` is always zero on the wire today;
/// it is never interpreted, only round-tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
  pub id: u64,
  pub type_tag: u32,
  pub length: u32,
  pub err: i32,
  pub reserved: [u64; 3],
}

impl FrameHeader {
  pub fn new(id: u64, type_tag: u32, length: u32) -> Self {
    FrameHeader {
      id,
      type_tag,
      length,
      err: 0,
      reserved: [0; 3],
    }
  }

  pub fn with_err(mut self, err: i32) -> Self {
    self.err = err;
    self
  }

  pub fn encode(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
    out.write_u64::<LE>(self.id)?;
    out.write_u32::<LE>(self.type_tag)?;
    out.write_u32::<LE>(self.length)?;
    out.write_i32::<LE>(self.err)?;
    for r in self.reserved {
      out.write_u64::<LE>(r)?;
    }
    Ok(())
  }

  pub fn decode(mut buf: &[u8]) -> Result<Self, FatalReason> {
    if buf.len() < FRAME_HEADER_SIZE {
      return Err(FatalReason::Protocol("short header".to_string()));
    }
    let id = buf
      .read_u64::<LE>()
      .map_err(|e| FatalReason::Protocol(e.to_string()))?;
    let type_tag = buf
      .read_u32::<LE>()
      .map_err(|e| FatalReason::Protocol(e.to_string()))?;
    let length = buf
      .read_u32::<LE>()
      .map_err(|e| FatalReason::Protocol(e.to_string()))?;
    let err = buf
      .read_i32::<LE>()
      .map_err(|e| FatalReason::Protocol(e.to_string()))?;
    let mut reserved = [0u64; 3];
    for slot in &mut reserved {
      *slot = buf
        .read_u64::<LE>()
        .map_err(|e| FatalReason::Protocol(e.to_string()))?;
    }
    Ok(FrameHeader {
      id,
      type_tag,
      length,
      err,
      reserved,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips() {
    let h = FrameHeader::new(7, 3, 16).with_err(-22);
    let mut buf = Vec::new();
    h.encode(&mut buf).unwrap();
    assert_eq!(buf.len(), FRAME_HEADER_SIZE);
    let decoded = FrameHeader::decode(&buf).unwrap();
    assert_eq!(h, decoded);
  }

  #[test]
  fn rejects_short_buffer() {
    let buf = [0u8; 10];
    assert!(FrameHeader::decode(&buf).is_err());
  }
}
