//! A bounded FIFO of handler-originated sample events.
//!
//! Producers (physical handler ticker threads, and fusion handlers emitting
//! synthesized output) block on `push` when the queue is full; the single
//! dispatch thread blocks on `pop` when it is empty. Readiness is coalesced:
//! a spurious wake just finds the queue empty and waits again.

use std::{
  collections::VecDeque,
  sync::{Arc, Condvar, Mutex},
};

use crate::wire::sensor_event::SensorEvent;

/// One raw event tagged with the URI of the handler that produced it. The
/// event's own `sensor_id` field is not yet meaningful here -- it is filled
/// in by each listener proxy with that proxy's own listener id as it is
/// forwarded out to a channel.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
  pub handler_uri: Arc<str>,
  pub event: SensorEvent,
}

struct Inner {
  items: VecDeque<QueuedEvent>,
  closed: bool,
}

/// A bounded multi-producer single-consumer queue with blocking push/pop.
pub struct EventQueue {
  capacity: usize,
  inner: Mutex<Inner>,
  not_empty: Condvar,
  not_full: Condvar,
}

impl EventQueue {
  pub fn new(capacity: usize) -> Self {
    EventQueue {
      capacity,
      inner: Mutex::new(Inner {
        items: VecDeque::with_capacity(capacity),
        closed: false,
      }),
      not_empty: Condvar::new(),
      not_full: Condvar::new(),
    }
  }

  /// Blocks while the queue is full. Returns `false` if the queue was
  /// closed before room became available.
  pub fn push(&self, item: QueuedEvent) -> bool {
    let mut guard = self.inner.lock().unwrap();
    while guard.items.len() >= self.capacity && !guard.closed {
      guard = self.not_full.wait(guard).unwrap();
    }
    if guard.closed {
      return false;
    }
    guard.items.push_back(item);
    self.not_empty.notify_one();
    true
  }

  /// Blocks while the queue is empty. Returns `None` once the queue is
  /// closed and drained.
  pub fn pop(&self) -> Option<QueuedEvent> {
    let mut guard = self.inner.lock().unwrap();
    loop {
      if let Some(item) = guard.items.pop_front() {
        self.not_full.notify_one();
        return Some(item);
      }
      if guard.closed {
        return None;
      }
      guard = self.not_empty.wait(guard).unwrap();
    }
  }

  /// Wakes every blocked producer/consumer and makes subsequent `pop`s
  /// return `None` once drained; subsequent `push`es return `false`.
  pub fn close(&self) {
    let mut guard = self.inner.lock().unwrap();
    guard.closed = true;
    self.not_empty.notify_all();
    self.not_full.notify_all();
  }

  pub fn len(&self) -> usize {
    self.inner.lock().unwrap().items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ev() -> QueuedEvent {
    QueuedEvent {
      handler_uri: Arc::from("sensor://accel/0"),
      event: SensorEvent::new(0, 0, 0, vec![]),
    }
  }

  #[test]
  fn fifo_order() {
    let q = EventQueue::new(4);
    q.push(ev());
    q.push(ev());
    assert_eq!(q.len(), 2);
    assert!(q.pop().is_some());
    assert_eq!(q.len(), 1);
  }

  #[test]
  fn close_drains_then_returns_none() {
    let q = EventQueue::new(4);
    q.push(ev());
    q.close();
    assert!(q.pop().is_some());
    assert!(q.pop().is_none());
  }

  #[test]
  fn push_after_close_fails() {
    let q = EventQueue::new(4);
    q.close();
    assert!(!q.push(ev()));
  }
}
