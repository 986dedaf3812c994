//! mio-based readiness multiplexing plus a self-pipe style wake mechanism
//! used to break the wait on shutdown or rebind.

use std::io;

use mio::{Events, Poll, Token, Waker};

/// The token reserved for the internal waker; channel tokens start above
/// this value.
pub const WAKE_TOKEN: Token = Token(usize::MAX);

pub struct Poller {
  poll: Poll,
  waker: Waker,
  events: Events,
}

impl Poller {
  pub fn new(events_capacity: usize) -> io::Result<Self> {
    let poll = Poll::new()?;
    let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
    Ok(Poller {
      poll,
      waker,
      events: Events::with_capacity(events_capacity),
    })
  }

  pub fn registry(&self) -> &mio::Registry {
    self.poll.registry()
  }

  /// Breaks a concurrent or future `wait` call. Safe to call from any
  /// thread; used for shutdown and socket rebinds.
  pub fn wake(&self) -> io::Result<()> {
    self.waker.wake()
  }

  /// Blocks until at least one registered source is ready, or `wake` is
  /// called. Returns the list of `(Token, readable, writable)` triples that
  /// were ready; the `WAKE_TOKEN` entry (if present) signals a wake rather
  /// than I/O readiness, and callers should check for it explicitly.
  pub fn wait(&mut self, timeout: Option<std::time::Duration>) -> io::Result<Vec<(Token, bool, bool)>> {
    match self.poll.poll(&mut self.events, timeout) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
      Err(e) => return Err(e),
    }
    Ok(
      self
        .events
        .iter()
        .map(|ev| (ev.token(), ev.is_readable(), ev.is_writable()))
        .collect(),
    )
  }
}
