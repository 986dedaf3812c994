//! The handler capability set shared by physical and fusion sensors, and the
//! device-shim seam that stands in for the out-of-scope kernel drivers.
//!
//! The original class hierarchy (`sensor_base -> physical_sensor /
//! virtual_sensor / fusion_sensor`) is re-expressed here as one trait that
//! names the capability set plus a tagged `HandlerKind`, rather than as an
//! inheritance chain.

use std::sync::Arc;

use crate::{
  sensor::{
    arbitration::{ListenerId, ListenerRequest, ModeDelta},
    info::SensorInfo,
  },
  wire::sensor_event::SensorEvent,
};

/// Receives events from a handler it is attached to. Implemented by listener
/// proxies (which forward to a client channel) and by fusion handlers
/// (which forward into their synthesizer).
pub trait SensorObserver: Send + Sync {
  fn on_event(&self, event: &SensorEvent);
}

/// The capability set every sensor handler -- physical or fusion -- exposes
/// to the registry, the dispatcher and (for fusion) to its upstreams.
pub trait SensorHandler: Send + Sync {
  fn info(&self) -> &SensorInfo;

  fn kind(&self) -> HandlerKind;

  /// Registers `listener_id`'s request and attaches `observer` to receive
  /// events for as long as the listener stays attached. Returns whatever
  /// changed in the effective mode so the caller can apply it.
  ///
  /// If this transitions the handler from stopped to started and the
  /// underlying device shim's `open` fails, the just-added request is rolled
  /// back (the handler is left exactly as it was before the call) and the
  /// shim's error is returned.
  fn add_listener(
    &self,
    listener_id: ListenerId,
    request: ListenerRequest,
    observer: Arc<dyn SensorObserver>,
  ) -> std::io::Result<ModeDelta>;

  fn remove_listener(&self, listener_id: ListenerId) -> ModeDelta;

  fn set_interval(&self, listener_id: ListenerId, interval_ms: u32) -> ModeDelta;
  fn set_latency(&self, listener_id: ListenerId, latency_ms: u32) -> ModeDelta;
  fn set_wakeup(&self, listener_id: ListenerId, wakeup: bool) -> ModeDelta;

  /// The most recently observed sample, served to synchronous `get_data`
  /// queries.
  fn get_cached(&self) -> Option<SensorEvent>;

  /// Delivers `event` to every currently attached observer, in emission
  /// order, under the handler's own lock discipline.
  fn notify_observers(&self, event: &SensorEvent);

  /// Called by the reactor's ticker on every running handler. Only
  /// [`super::physical::PhysicalHandler`] does anything with this; fusion
  /// handlers are driven purely by upstream events.
  fn tick(&self, _now_us: u64, _queue: &crate::reactor::queue::EventQueue) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
  Physical,
  Fusion,
}

/// The seam a real kernel-driver binding would implement. The crate ships
/// only [`super::physical::SyntheticShim`], a deterministic in-process
/// generator used both by the standalone daemon binary and by tests.
pub trait DeviceShim: Send {
  fn open(&mut self) -> std::io::Result<()>;
  fn close(&mut self);
  fn set_interval_ms(&mut self, interval_ms: u32);
  fn set_batch_latency_ms(&mut self, latency_ms: u32);
  fn set_wakeup(&mut self, on: bool);

  /// Produces the next sample at time `now_us`. Called by the handler's
  /// ticker at the arbitrated interval; `None` means no sample is ready yet
  /// (used by shims that honor batch latency internally).
  fn read(&mut self, now_us: u64) -> Option<SensorEvent>;
}
