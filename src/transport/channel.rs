//! A `SOCK_SEQPACKET` channel: one `send` yields exactly one `recv`.
//!
//! The channel is built on [`socket2::Socket`] rather than
//! `std::os::unix::net::UnixStream` so the socket type is genuinely
//! `SOCK_SEQPACKET` instead of `SOCK_STREAM`; mio registration goes through
//! `SourceFd` over the socket's raw descriptor.

use std::{
  io::{self, ErrorKind},
  os::fd::{AsRawFd, RawFd},
  os::unix::net::SocketAddr as UnixSocketAddr,
  path::Path,
};

use mio::{event::Source, unix::SourceFd, Interest, Registry, Token};
use socket2::{Domain, SockAddr, Socket, Type};

use crate::{
  error::FatalReason,
  wire::{header::FrameHeader, MAX_FRAME_SIZE},
};

/// Lifecycle state of a channel, per the external-interfaces design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
  Created,
  Connected,
  Transfer,
  Closed,
}

/// A single `SOCK_SEQPACKET` endpoint, either the listening side or an
/// accepted/connected peer.
pub struct Channel {
  socket: Socket,
  state: ChannelState,
}

impl Channel {
  /// Binds and listens at `path` (used by the server for each of the two
  /// well-known sockets).
  pub fn listen(path: impl AsRef<Path>) -> io::Result<Self> {
    let path = path.as_ref();
    let _ = std::fs::remove_file(path);
    let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
    socket.set_nonblocking(true)?;
    let addr = SockAddr::unix(path)?;
    socket.bind(&addr)?;
    socket.listen(128)?;
    Ok(Channel {
      socket,
      state: ChannelState::Created,
    })
  }

  /// Connects to `path` (used by clients).
  pub fn connect(path: impl AsRef<Path>) -> io::Result<Self> {
    let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
    let addr = SockAddr::unix(path.as_ref())?;
    socket.connect(&addr)?;
    socket.set_nonblocking(true)?;
    Ok(Channel {
      socket,
      state: ChannelState::Connected,
    })
  }

  /// Accepts one pending peer off a listening channel. Returns `Ok(None)`
  /// when nothing is pending yet (`EWOULDBLOCK`).
  pub fn accept(&self) -> io::Result<Option<(Channel, Option<UnixSocketAddr>)>> {
    match self.socket.accept() {
      Ok((socket, addr)) => {
        socket.set_nonblocking(true)?;
        Ok(Some((
          Channel {
            socket,
            state: ChannelState::Connected,
          },
          addr.as_unix().cloned(),
        )))
      }
      Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
      Err(e) => Err(e),
    }
  }

  pub fn state(&self) -> ChannelState {
    self.state
  }

  pub fn set_state(&mut self, state: ChannelState) {
    self.state = state;
  }

  /// Sends one frame as a single `send`. `SOCK_SEQPACKET` guarantees the
  /// peer's matching `recv` sees exactly these bytes as one message.
  pub fn send_frame(&self, header: &FrameHeader, body: &[u8]) -> io::Result<()> {
    let mut buf = Vec::with_capacity(body.len() + 32);
    header.encode(&mut buf)?;
    buf.extend_from_slice(body);
    if buf.len() > MAX_FRAME_SIZE {
      return Err(io::Error::new(ErrorKind::InvalidInput, "frame too large"));
    }
    let written = self.socket.send(&buf)?;
    if written != buf.len() {
      return Err(io::Error::new(ErrorKind::WriteZero, "partial seqpacket write"));
    }
    Ok(())
  }

  /// Receives one frame. Returns `Ok(None)` on a clean peer hang-up
  /// (zero-length `recv`), matching seqpacket semantics.
  pub fn recv_frame(&self) -> Result<Option<(FrameHeader, Vec<u8>)>, FatalReason> {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    let n = match self.socket.recv(as_maybe_uninit(&mut buf)) {
      Ok(n) => n,
      Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
      Err(e) => return Err(FatalReason::Io(e)),
    };
    if n == 0 {
      return Err(FatalReason::PeerHangUp);
    }
    let header = FrameHeader::decode(&buf[..n])?;
    let body_start = crate::wire::header::FRAME_HEADER_SIZE;
    let body_end = body_start + header.length as usize;
    if body_end > n {
      return Err(FatalReason::Protocol("body shorter than declared length".into()));
    }
    Ok(Some((header, buf[body_start..body_end].to_vec())))
  }

  pub fn raw_fd(&self) -> RawFd {
    self.socket.as_raw_fd()
  }

  /// Switches between non-blocking (server reactor, client handshake) and
  /// blocking (client reader thread) `recv` behavior.
  pub fn set_blocking(&self, blocking: bool) -> io::Result<()> {
    self.socket.set_nonblocking(!blocking)
  }

  /// Shuts down both directions of the underlying socket, unblocking any
  /// thread parked in a blocking `recv` on it with an error or a clean
  /// zero-length read.
  pub fn shutdown(&self) -> io::Result<()> {
    self.socket.shutdown(std::net::Shutdown::Both)
  }
}

// socket2::Socket::recv wants &mut [MaybeUninit<u8>]; our buffer is already
// zeroed so reinterpreting it is sound.
fn as_maybe_uninit(buf: &mut [u8]) -> &mut [std::mem::MaybeUninit<u8>] {
  unsafe { &mut *(buf as *mut [u8] as *mut [std::mem::MaybeUninit<u8>]) }
}

impl Source for Channel {
  fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
    SourceFd(&self.socket.as_raw_fd()).register(registry, token, interests)
  }

  fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
    SourceFd(&self.socket.as_raw_fd()).reregister(registry, token, interests)
  }

  fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
    SourceFd(&self.socket.as_raw_fd()).deregister(registry)
  }
}
