//! Fusion ("virtual") sensor handlers: same arbitration surface as a
//! physical handler, but driven by upstream handler events instead of a
//! device shim, through a [`Synthesizer`].

use std::sync::{Arc, Mutex, Weak};

use log::warn;

use crate::{
  reactor::queue::{EventQueue, QueuedEvent},
  sensor::{
    arbitration::{Arbitration, ListenerId, ListenerRequest, ModeDelta},
    handler::{HandlerKind, SensorHandler, SensorObserver},
    info::SensorInfo,
    registry::Registry,
  },
  wire::sensor_event::SensorEvent,
};

/// The de-bounce factor applied to a fusion handler's effective interval: an
/// output is only emitted if at least this fraction of the interval has
/// elapsed since the previous one, even if upstream runs faster.
pub const DEBOUNCE_FACTOR: f64 = 0.75;

/// A synthesizer consumes one upstream event at a time and optionally
/// produces a derived output. Implementations keep their own rolling state
/// (most-recent accel sample, integrated quaternion, ...); the trait takes
/// `&mut self` because the caller already holds the fusion handler's lock
/// for the whole transaction.
pub trait Synthesizer: Send {
  fn ingest(&mut self, event: &SensorEvent) -> Option<SensorEvent>;
}

struct State {
  arbitration: Arbitration,
  observers: std::collections::HashMap<ListenerId, Arc<dyn SensorObserver>>,
  synthesizer: Box<dyn Synthesizer>,
  cached: Option<SensorEvent>,
  last_emit_us: u64,
}

pub struct FusionHandler {
  info: SensorInfo,
  uri: Arc<str>,
  upstream_uris: Vec<String>,
  own_listener_id: ListenerId,
  registry: Weak<Registry>,
  self_weak: Weak<FusionHandler>,
  state: Mutex<State>,
}

impl FusionHandler {
  /// Constructed through [`Arc::new_cyclic`] so the handler can hand its own
  /// `Arc<dyn SensorObserver>` to its upstreams without a second owning
  /// reference living outside the registry.
  pub fn new_in_registry(
    registry: &Arc<Registry>,
    info: SensorInfo,
    upstream_uris: Vec<String>,
    own_listener_id: ListenerId,
    synthesizer: Box<dyn Synthesizer>,
  ) -> Arc<FusionHandler> {
    let min_interval = info.min_interval_ms;
    let uri: Arc<str> = Arc::from(info.uri.as_str());
    Arc::new_cyclic(|self_weak| FusionHandler {
      info,
      uri,
      upstream_uris,
      own_listener_id,
      registry: Arc::downgrade(registry),
      self_weak: self_weak.clone(),
      state: Mutex::new(State {
        arbitration: Arbitration::new(min_interval),
        observers: std::collections::HashMap::new(),
        synthesizer,
        cached: None,
        last_emit_us: 0,
      }),
    })
  }

  fn propagate_upstream(&self, mode: crate::sensor::arbitration::EffectiveMode) {
    let Some(registry) = self.registry.upgrade() else {
      return;
    };
    let Some(self_arc) = self.self_weak.upgrade() else {
      return;
    };
    for uri in &self.upstream_uris {
      if let Some(upstream) = registry.get(uri) {
        if mode.started {
          let result = upstream.add_listener(
            self.own_listener_id,
            ListenerRequest {
              interval_ms: mode.interval_ms,
              latency_ms: mode.latency_ms,
              wakeup: mode.wakeup_on,
              is_processor: true,
              passive: false,
            },
            self_arc.clone() as Arc<dyn SensorObserver>,
          );
          if let Err(e) = result {
            warn!("fusion handler {} failed to start upstream {}: {}", self.uri, uri, e);
          }
        } else {
          upstream.remove_listener(self.own_listener_id);
        }
      }
    }
  }
}

impl SensorHandler for FusionHandler {
  fn info(&self) -> &SensorInfo {
    &self.info
  }

  fn kind(&self) -> HandlerKind {
    HandlerKind::Fusion
  }

  fn add_listener(
    &self,
    listener_id: ListenerId,
    request: ListenerRequest,
    observer: Arc<dyn SensorObserver>,
  ) -> std::io::Result<ModeDelta> {
    let mut state = self.state.lock().unwrap();
    let delta = state.arbitration.add_listener(listener_id, request);
    state.observers.insert(listener_id, observer);
    let mode = state.arbitration.mode();
    drop(state);
    if !delta.is_empty() {
      self.propagate_upstream(mode);
    }
    Ok(delta)
  }

  fn remove_listener(&self, listener_id: ListenerId) -> ModeDelta {
    let mut state = self.state.lock().unwrap();
    state.observers.remove(&listener_id);
    let delta = state.arbitration.remove_listener(listener_id);
    let mode = state.arbitration.mode();
    drop(state);
    if !delta.is_empty() {
      self.propagate_upstream(mode);
    }
    delta
  }

  fn set_interval(&self, listener_id: ListenerId, interval_ms: u32) -> ModeDelta {
    let mut state = self.state.lock().unwrap();
    let delta = state.arbitration.set_interval(listener_id, interval_ms);
    let mode = state.arbitration.mode();
    drop(state);
    if !delta.is_empty() {
      self.propagate_upstream(mode);
    }
    delta
  }

  fn set_latency(&self, listener_id: ListenerId, latency_ms: u32) -> ModeDelta {
    let mut state = self.state.lock().unwrap();
    let delta = state.arbitration.set_latency(listener_id, latency_ms);
    let mode = state.arbitration.mode();
    drop(state);
    if !delta.is_empty() {
      self.propagate_upstream(mode);
    }
    delta
  }

  fn set_wakeup(&self, listener_id: ListenerId, wakeup: bool) -> ModeDelta {
    let mut state = self.state.lock().unwrap();
    let delta = state.arbitration.set_wakeup(listener_id, wakeup);
    let mode = state.arbitration.mode();
    drop(state);
    if !delta.is_empty() {
      self.propagate_upstream(mode);
    }
    delta
  }

  fn get_cached(&self) -> Option<SensorEvent> {
    self.state.lock().unwrap().cached.clone()
  }

  fn notify_observers(&self, event: &SensorEvent) {
    let observers: Vec<Arc<dyn SensorObserver>> = {
      let state = self.state.lock().unwrap();
      state.observers.values().cloned().collect()
    };
    for observer in observers {
      observer.on_event(event);
    }
  }
}

/// Attached to each upstream handler as that handler's observer for this
/// fusion handler's subscription; runs on whatever thread delivers the
/// upstream event (the shared dispatch thread).
impl SensorObserver for FusionHandler {
  fn on_event(&self, event: &SensorEvent) {
    let emitted = {
      let mut state = self.state.lock().unwrap();
      let mode = state.arbitration.mode();
      if !mode.started {
        return;
      }
      let Some(output) = state.synthesizer.ingest(event) else {
        return;
      };
      let min_gap_us = ((mode.interval_ms as f64) * DEBOUNCE_FACTOR * 1000.0) as u64;
      if output.timestamp_us.saturating_sub(state.last_emit_us) < min_gap_us {
        return;
      }
      state.last_emit_us = output.timestamp_us;
      state.cached = Some(output.clone());
      output
    };
    // The sample enqueues for the shared dispatch thread to fan out through
    // this handler's own `notify_observers`, exactly like a physical tick.
    if let Some(registry) = self.registry.upgrade() {
      registry.push_event(QueuedEvent {
        handler_uri: self.uri.clone(),
        event: emitted,
      });
    }
  }
}
