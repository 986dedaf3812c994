//! The channel-ready handshake exchanged once per event channel, right after
//! `connect`/`accept`, before any command or event frames flow.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::{
  error::{ClientError, FatalReason},
  wire::HANDSHAKE_MAGIC,
};

use super::Channel;

/// Client side: send `{client_type, client_id}`, expect `{magic, client_id}`
/// echoed back.
pub fn client_handshake(channel: &Channel, client_type: i32, client_id: i32) -> Result<(), ClientError> {
  let mut body = Vec::new();
  body.write_i32::<LE>(client_type).unwrap();
  body.write_i32::<LE>(client_id).unwrap();
  let header = crate::wire::header::FrameHeader::new(0, 0, body.len() as u32);
  channel.send_frame(&header, &body).map_err(ClientError::Io)?;

  // handshake reply is read with a short busy-wait since the channel is
  // nonblocking and this happens once, synchronously, at connect time.
  loop {
    match channel.recv_frame() {
      Ok(Some((_, reply_body))) => {
        let mut reply_body = reply_body.as_slice();
        let magic = reply_body.read_u32::<LE>().map_err(|e| ClientError::Protocol(e.to_string()))?;
        let echoed_id = reply_body.read_i32::<LE>().map_err(|e| ClientError::Protocol(e.to_string()))?;
        if magic != HANDSHAKE_MAGIC || echoed_id != client_id {
          return Err(ClientError::Handshake);
        }
        return Ok(());
      }
      Ok(None) => std::thread::yield_now(),
      Err(FatalReason::PeerHangUp) => return Err(ClientError::ChannelClosed),
      Err(e) => return Err(ClientError::Protocol(e.to_string())),
    }
  }
}

/// Server side: read `{client_type, client_id}`, reply `{magic, client_id}`.
/// Returns `(client_type, client_id)`.
pub fn server_handshake(channel: &Channel) -> Result<(i32, i32), FatalReason> {
  loop {
    match channel.recv_frame()? {
      Some((_, body)) => {
        let mut body = body.as_slice();
        let client_type = body.read_i32::<LE>().map_err(|e| FatalReason::Protocol(e.to_string()))?;
        let client_id = body.read_i32::<LE>().map_err(|e| FatalReason::Protocol(e.to_string()))?;

        let mut reply = Vec::new();
        reply.write_u32::<LE>(HANDSHAKE_MAGIC).unwrap();
        reply.write_i32::<LE>(client_id).unwrap();
        let header = crate::wire::header::FrameHeader::new(0, 0, reply.len() as u32);
        channel.send_frame(&header, &reply)?;
        return Ok((client_type, client_id));
      }
      None => std::thread::yield_now(),
    }
  }
}
