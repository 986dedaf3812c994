//! The per-handler arbitration engine: the reducer that collapses every
//! active listener's request into one effective operating mode.
//!
//! Ported from the add_interval/delete_interval/add_batch/delete_batch/
//! add_wakeup/delete_wakeup logic of the original sensor_base: every mutation
//! recomputes the effective scalars and reports whether anything changed, so
//! the caller can decide whether to push new settings down to the device.

use std::collections::HashMap;

use super::info::IDLE_FLOOR_INTERVAL_MS;

pub type ListenerId = i32;

/// One listener's standing request against a handler. `is_processor`
/// distinguishes a downstream fusion handler's request from an external
/// client's; `passive` listeners are tracked for `client_count` but excluded
/// from the min/max reduction (Open Question, resolved in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerRequest {
  pub interval_ms: u32,
  pub latency_ms: u32,
  pub wakeup: bool,
  pub is_processor: bool,
  pub passive: bool,
}

impl Default for ListenerRequest {
  fn default() -> Self {
    ListenerRequest {
      interval_ms: IDLE_FLOOR_INTERVAL_MS,
      latency_ms: 0,
      wakeup: false,
      is_processor: false,
      passive: false,
    }
  }
}

/// The effective, arbitrated operating mode of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveMode {
  pub interval_ms: u32,
  pub latency_ms: u32,
  pub wakeup_on: bool,
  pub started: bool,
}

/// What changed as a result of a single arbitration mutation. The caller
/// applies driver setters in this order: interval, then latency, then
/// wakeup, then start/stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeDelta {
  pub interval_changed: bool,
  pub latency_changed: bool,
  pub wakeup_changed: bool,
  pub started_changed: bool,
}

impl ModeDelta {
  pub fn is_empty(&self) -> bool {
    *self == ModeDelta::default()
  }
}

/// Per-handler arbitration state: the multiset of listener requests plus the
/// scalars reduced from them.
#[derive(Debug)]
pub struct Arbitration {
  requests: HashMap<ListenerId, ListenerRequest>,
  mode: EffectiveMode,
  min_interval_ms: u32,
}

impl Arbitration {
  pub fn new(min_interval_ms: u32) -> Self {
    Arbitration {
      requests: HashMap::new(),
      mode: EffectiveMode {
        interval_ms: IDLE_FLOOR_INTERVAL_MS.max(min_interval_ms),
        latency_ms: 0,
        wakeup_on: false,
        started: false,
      },
      min_interval_ms,
    }
  }

  pub fn mode(&self) -> EffectiveMode {
    self.mode
  }

  pub fn client_count(&self) -> usize {
    self.requests.len()
  }

  pub fn contains(&self, listener_id: ListenerId) -> bool {
    self.requests.contains_key(&listener_id)
  }

  /// Adds (or replaces) a listener's request and recomputes the effective
  /// mode. Returns what changed so the caller can push the change down to
  /// the device in the mandated order.
  pub fn add_listener(&mut self, listener_id: ListenerId, request: ListenerRequest) -> ModeDelta {
    self.requests.insert(listener_id, request);
    self.recompute()
  }

  /// Removes a listener's request entirely (used on disconnect, or when a
  /// fusion handler withdraws its upstream subscription on stop).
  pub fn remove_listener(&mut self, listener_id: ListenerId) -> ModeDelta {
    self.requests.remove(&listener_id);
    self.recompute()
  }

  pub fn set_interval(&mut self, listener_id: ListenerId, interval_ms: u32) -> ModeDelta {
    if let Some(req) = self.requests.get_mut(&listener_id) {
      req.interval_ms = interval_ms.max(1);
    }
    self.recompute()
  }

  pub fn set_latency(&mut self, listener_id: ListenerId, latency_ms: u32) -> ModeDelta {
    if let Some(req) = self.requests.get_mut(&listener_id) {
      req.latency_ms = latency_ms;
    }
    self.recompute()
  }

  pub fn set_wakeup(&mut self, listener_id: ListenerId, wakeup: bool) -> ModeDelta {
    if let Some(req) = self.requests.get_mut(&listener_id) {
      req.wakeup = wakeup;
    }
    self.recompute()
  }

  fn recompute(&mut self) -> ModeDelta {
    let active: Vec<&ListenerRequest> = self.requests.values().filter(|r| !r.passive).collect();

    let interval_ms = active
      .iter()
      .map(|r| r.interval_ms.max(self.min_interval_ms))
      .min()
      .unwrap_or(IDLE_FLOOR_INTERVAL_MS.max(self.min_interval_ms));
    let latency_ms = active.iter().map(|r| r.latency_ms).max().unwrap_or(0);
    let wakeup_on = active.iter().any(|r| r.wakeup);
    let started = !self.requests.is_empty();

    let delta = ModeDelta {
      interval_changed: interval_ms != self.mode.interval_ms,
      latency_changed: latency_ms != self.mode.latency_ms,
      wakeup_changed: wakeup_on != self.mode.wakeup_on,
      started_changed: started != self.mode.started,
    };

    self.mode = EffectiveMode {
      interval_ms,
      latency_ms,
      wakeup_on,
      started,
    };
    delta
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn req(interval_ms: u32) -> ListenerRequest {
    ListenerRequest {
      interval_ms,
      ..Default::default()
    }
  }

  #[test]
  fn min_interval_two_listeners() {
    let mut arb = Arbitration::new(1);
    arb.add_listener(1, req(100));
    let delta = arb.add_listener(2, req(20));
    assert!(delta.interval_changed);
    assert_eq!(arb.mode().interval_ms, 20);

    // Removing the faster listener restores the slower rate, not the floor.
    let delta = arb.remove_listener(2);
    assert!(delta.interval_changed);
    assert_eq!(arb.mode().interval_ms, 100);
  }

  #[test]
  fn max_latency_two_listeners() {
    let mut arb = Arbitration::new(1);
    arb.add_listener(
      1,
      ListenerRequest {
        latency_ms: 500,
        ..req(50)
      },
    );
    arb.add_listener(
      2,
      ListenerRequest {
        latency_ms: 1500,
        ..req(50)
      },
    );
    assert_eq!(arb.mode().latency_ms, 1500);
  }

  #[test]
  fn empty_falls_back_to_idle_floor() {
    let arb = Arbitration::new(5);
    assert_eq!(arb.mode().interval_ms, IDLE_FLOOR_INTERVAL_MS);
    assert_eq!(arb.mode().latency_ms, 0);
    assert!(!arb.mode().started);
  }

  #[test]
  fn add_remove_pair_is_idempotent() {
    let mut arb = Arbitration::new(1);
    let before = arb.mode();
    arb.add_listener(1, req(10));
    arb.add_listener(2, req(30));
    arb.remove_listener(2);
    arb.remove_listener(1);
    assert_eq!(arb.mode(), before);
  }

  #[test]
  fn started_tracks_client_count() {
    let mut arb = Arbitration::new(1);
    assert!(!arb.mode().started);
    arb.add_listener(1, req(10));
    assert!(arb.mode().started);
    assert_eq!(arb.client_count(), 1);
    arb.remove_listener(1);
    assert!(!arb.mode().started);
  }

  #[test]
  fn passive_listener_excluded_from_reduction_but_counted() {
    let mut arb = Arbitration::new(1);
    arb.add_listener(
      1,
      ListenerRequest {
        passive: true,
        ..req(5)
      },
    );
    assert_eq!(arb.mode().interval_ms, IDLE_FLOOR_INTERVAL_MS);
    assert_eq!(arb.client_count(), 1);
    assert!(arb.mode().started);
  }
}
