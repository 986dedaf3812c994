//! Error taxonomy shared by the server and the client library.
//!
//! The wire protocol only has room for a single `i32 err` field per reply
//! frame, so [`ServerError`] distinguishes *recoverable* failures (which map
//! onto a negative errno placed in that field) from *fatal* ones (which tear
//! down the whole channel). See the error handling design notes for the
//! rationale behind keeping these as two separate enums rather than one flat
//! list.

use thiserror::Error;

/// The negative errno values the wire protocol is allowed to carry in a
/// reply's `err` field. Only ever negative on the wire; the sign is applied
/// at encode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeErrno {
  /// Unknown sensor URI or malformed request arguments.
  Invalid,
  /// Caller lacks the privilege required by the target sensor.
  AccessDenied,
  /// The device shim reported an I/O failure.
  Io,
  /// Request rejected due to rate limiting.
  Again,
  /// Operation not permitted in the current channel state.
  NotPermitted,
}

impl NegativeErrno {
  /// The literal value placed in the wire header's `err` field.
  pub fn wire_value(self) -> i32 {
    match self {
      NegativeErrno::Invalid => -22,      // -EINVAL
      NegativeErrno::AccessDenied => -13, // -EACCES
      NegativeErrno::Io => -5,            // -EIO
      NegativeErrno::Again => -11,        // -EAGAIN
      NegativeErrno::NotPermitted => -1,  // -EPERM
    }
  }
}

/// Errors raised inside the daemon while servicing a single request.
#[derive(Debug, Error)]
pub enum ServerError {
  /// Reported to the requesting client; the channel stays open.
  #[error("recoverable request error: {0:?}")]
  Recoverable(NegativeErrno),

  /// The channel cannot continue and must be torn down.
  #[error("fatal channel error: {0}")]
  Fatal(#[from] FatalReason),
}

impl ServerError {
  pub fn invalid() -> Self {
    ServerError::Recoverable(NegativeErrno::Invalid)
  }

  pub fn access_denied() -> Self {
    ServerError::Recoverable(NegativeErrno::AccessDenied)
  }

  pub fn io() -> Self {
    ServerError::Recoverable(NegativeErrno::Io)
  }

  /// `true` if the channel carrying the request must be closed.
  pub fn is_fatal(&self) -> bool {
    matches!(self, ServerError::Fatal(_))
  }
}

/// Reasons a channel is torn down outright rather than merely answered with
/// an error reply.
#[derive(Debug, Error)]
pub enum FatalReason {
  #[error("peer closed the channel")]
  PeerHangUp,
  #[error("malformed frame: {0}")]
  Protocol(String),
  #[error("handshake mismatch")]
  HandshakeMismatch,
  #[error("underlying I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// Errors surfaced to users of the client library.
#[derive(Debug, Error)]
pub enum ClientError {
  #[error("could not connect to daemon: {0}")]
  Connect(#[source] std::io::Error),
  #[error("handshake with daemon failed")]
  Handshake,
  #[error("daemon rejected request: {0:?}")]
  Rejected(NegativeErrno),
  #[error("channel closed unexpectedly")]
  ChannelClosed,
  #[error("malformed reply from daemon: {0}")]
  Protocol(String),
  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),
}

impl From<FatalReason> for ClientError {
  fn from(reason: FatalReason) -> Self {
    match reason {
      FatalReason::PeerHangUp => ClientError::ChannelClosed,
      FatalReason::Protocol(s) => ClientError::Protocol(s),
      FatalReason::HandshakeMismatch => ClientError::Handshake,
      FatalReason::Io(e) => ClientError::Io(e),
    }
  }
}

impl From<i32> for NegativeErrno {
  /// Reconstructs a [`NegativeErrno`] from a wire `err` value. Unknown
  /// negative values collapse to `Invalid` since the client cannot act on
  /// them any differently.
  fn from(wire_value: i32) -> Self {
    match wire_value {
      -13 => NegativeErrno::AccessDenied,
      -5 => NegativeErrno::Io,
      -11 => NegativeErrno::Again,
      -1 => NegativeErrno::NotPermitted,
      _ => NegativeErrno::Invalid,
    }
  }
}
