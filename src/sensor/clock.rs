//! Monotonic microsecond timestamps, shared by every handler and listener.

use std::{
  sync::OnceLock,
  time::Instant,
};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic microseconds since the first call to `now_us` in this process.
/// Never wall-clock time: timestamps are only ever compared to each other.
pub fn now_us() -> u64 {
  let epoch = EPOCH.get_or_init(Instant::now);
  epoch.elapsed().as_micros() as u64
}
