//! Physical sensor handlers: the arbitration surface over a [`DeviceShim`].
//!
//! There is no real per-handler thread here. A single reactor-owned ticker
//! walks every running physical handler and asks whether it is due; this
//! plays the role the original per-device poll file descriptor played, with
//! [`super::clock::now_us`] standing in for the fd becoming readable.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex},
};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
  reactor::queue::{EventQueue, QueuedEvent},
  sensor::{
    arbitration::{Arbitration, ListenerId, ListenerRequest, ModeDelta},
    clock::now_us,
    handler::{DeviceShim, HandlerKind, SensorHandler, SensorObserver},
    info::SensorInfo,
  },
  wire::sensor_event::{event_type, SensorEvent, SensorType, ACCURACY_GOOD, SUB_EVENT_RAW},
};

struct State {
  arbitration: Arbitration,
  observers: HashMap<ListenerId, Arc<dyn SensorObserver>>,
  shim: Box<dyn DeviceShim>,
  cached: Option<SensorEvent>,
  next_due_us: u64,
}

/// A sensor backed by a [`DeviceShim`]: its arbitrated interval/latency/
/// wakeup are pushed down to the shim; its samples flow back up through the
/// shared event queue.
pub struct PhysicalHandler {
  info: SensorInfo,
  uri: Arc<str>,
  state: Mutex<State>,
}

impl PhysicalHandler {
  pub fn new(info: SensorInfo, shim: Box<dyn DeviceShim>) -> Self {
    let min_interval = info.min_interval_ms;
    let uri: Arc<str> = Arc::from(info.uri.as_str());
    PhysicalHandler {
      info,
      uri,
      state: Mutex::new(State {
        arbitration: Arbitration::new(min_interval),
        observers: HashMap::new(),
        shim,
        cached: None,
        next_due_us: 0,
      }),
    }
  }

  /// Pushes an arbitration delta down to the shim in the mandated order:
  /// interval, latency, wakeup, then start/stop. A failure to `open` the
  /// shim on a stop->start transition is propagated to the caller, which
  /// must undo the speculative arbitration change that caused it.
  fn apply_delta(&self, state: &mut State, delta: ModeDelta) -> std::io::Result<()> {
    let mode = state.arbitration.mode();
    if delta.interval_changed {
      state.shim.set_interval_ms(mode.interval_ms);
    }
    if delta.latency_changed {
      state.shim.set_batch_latency_ms(mode.latency_ms);
    }
    if delta.wakeup_changed {
      state.shim.set_wakeup(mode.wakeup_on);
    }
    if delta.started_changed {
      if mode.started {
        state.shim.open()?;
        state.next_due_us = now_us();
      } else {
        state.shim.close();
      }
    }
    Ok(())
  }

}

impl SensorHandler for PhysicalHandler {
  fn info(&self) -> &SensorInfo {
    &self.info
  }

  fn kind(&self) -> HandlerKind {
    HandlerKind::Physical
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
    if let Err(e) = self.apply_delta(&mut state, delta) {
      state.observers.remove(&listener_id);
      state.arbitration.remove_listener(listener_id);
      return Err(e);
    }
    Ok(delta)
  }

  fn remove_listener(&self, listener_id: ListenerId) -> ModeDelta {
    let mut state = self.state.lock().unwrap();
    state.observers.remove(&listener_id);
    let delta = state.arbitration.remove_listener(listener_id);
    let _ = self.apply_delta(&mut state, delta);
    delta
  }

  fn set_interval(&self, listener_id: ListenerId, interval_ms: u32) -> ModeDelta {
    let mut state = self.state.lock().unwrap();
    let delta = state.arbitration.set_interval(listener_id, interval_ms);
    let _ = self.apply_delta(&mut state, delta);
    delta
  }

  fn set_latency(&self, listener_id: ListenerId, latency_ms: u32) -> ModeDelta {
    let mut state = self.state.lock().unwrap();
    let delta = state.arbitration.set_latency(listener_id, latency_ms);
    let _ = self.apply_delta(&mut state, delta);
    delta
  }

  fn set_wakeup(&self, listener_id: ListenerId, wakeup: bool) -> ModeDelta {
    let mut state = self.state.lock().unwrap();
    let delta = state.arbitration.set_wakeup(listener_id, wakeup);
    let _ = self.apply_delta(&mut state, delta);
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

  /// No-op unless the handler is running and its arbitrated interval has
  /// elapsed.
  fn tick(&self, now: u64, queue: &EventQueue) {
    let sample = {
      let mut state = self.state.lock().unwrap();
      if !state.arbitration.mode().started || now < state.next_due_us {
        return;
      }
      let interval_us = (state.arbitration.mode().interval_ms as u64) * 1000;
      state.next_due_us = now + interval_us;
      let sample = state.shim.read(now);
      if let Some(ref event) = sample {
        state.cached = Some(event.clone());
      }
      sample
    };
    if let Some(event) = sample {
      queue.push(QueuedEvent {
        handler_uri: self.uri.clone(),
        event,
      });
    }
  }
}

/// A deterministic, in-process stand-in for a kernel sensor driver. Seeded
/// from the sensor's own URI so repeated runs (and tests) are reproducible.
pub struct SyntheticShim {
  rng: StdRng,
  sensor_type: SensorType,
  opened: bool,
}

impl SyntheticShim {
  pub fn new(uri: &str, sensor_type: SensorType) -> Self {
    let seed = uri.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    SyntheticShim {
      rng: StdRng::seed_from_u64(seed),
      sensor_type,
      opened: false,
    }
  }

  fn value_count(&self) -> usize {
    match self.sensor_type {
      SensorType::Accelerometer
      | SensorType::Gyroscope
      | SensorType::Geomagnetic
      | SensorType::Gravity
      | SensorType::LinearAccel => 3,
      SensorType::RotationVector | SensorType::GamingRv | SensorType::GeomagneticRv => 4,
      SensorType::Orientation => 3,
      SensorType::Proximity | SensorType::Pressure | SensorType::Temperature | SensorType::Light => 1,
      _ => 1,
    }
  }
}

impl DeviceShim for SyntheticShim {
  fn open(&mut self) -> std::io::Result<()> {
    self.opened = true;
    Ok(())
  }

  fn close(&mut self) {
    self.opened = false;
  }

  fn set_interval_ms(&mut self, _interval_ms: u32) {}
  fn set_batch_latency_ms(&mut self, _latency_ms: u32) {}
  fn set_wakeup(&mut self, _on: bool) {}

  fn read(&mut self, now_us: u64) -> Option<SensorEvent> {
    if !self.opened {
      return None;
    }
    let n = self.value_count();
    let values: Vec<f32> = (0..n).map(|_| self.rng.random_range(-1.0f32..1.0f32)).collect();
    Some(
      SensorEvent::new(0, event_type(self.sensor_type, SUB_EVENT_RAW), now_us, values)
        .with_accuracy(ACCURACY_GOOD),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sensor::info::SensorInfo;

  struct NullObserver;
  impl SensorObserver for NullObserver {
    fn on_event(&self, _event: &SensorEvent) {}
  }

  fn info() -> SensorInfo {
    SensorInfo {
      uri: "sensor://accel/0".to_string(),
      type_tag: SensorType::Accelerometer as u32,
      vendor: "test".to_string(),
      name: "test-accel".to_string(),
      min_range: -19.6,
      max_range: 19.6,
      resolution: 0.01,
      min_interval_ms: 5,
      fifo_count: 0,
      max_batch_count: 0,
      wakeup_supported: false,
      privilege: String::new(),
    }
  }

  #[test]
  fn start_stop_opens_and_closes_shim() {
    let info = info();
    let shim = SyntheticShim::new(&info.uri, SensorType::Accelerometer);
    let handler = PhysicalHandler::new(info, Box::new(shim));
    let queue = EventQueue::new(8);

    handler.add_listener(1, ListenerRequest::default(), Arc::new(NullObserver)).unwrap();
    handler.tick(now_us() + 10_000_000, &queue);
    assert!(queue.len() >= 1);

    handler.remove_listener(1);
    let before = queue.len();
    handler.tick(now_us() + 20_000_000, &queue);
    assert_eq!(queue.len(), before);
  }
}
