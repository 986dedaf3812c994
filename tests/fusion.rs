//! Verifies a fusion handler's arbitration state cascades to its upstream
//! physical handler, and that an upstream sample flows all the way through
//! the synthesizer and back onto the shared queue under the fusion sensor's
//! own URI.

use std::sync::{Arc, Mutex};

use sensord::{
  reactor::queue::EventQueue,
  sensor::{
    arbitration::ListenerRequest,
    fusion::FusionHandler,
    fusion_algorithms::GravityFilter,
    handler::{DeviceShim, SensorHandler, SensorObserver},
    info::SensorInfo,
    physical::PhysicalHandler,
    registry::Registry,
  },
  wire::sensor_event::{SensorEvent, SensorType},
};

#[derive(Default)]
struct ShimState {
  opened: bool,
  interval_ms: u32,
}

struct RecordingShim(Arc<Mutex<ShimState>>);

impl DeviceShim for RecordingShim {
  fn open(&mut self) -> std::io::Result<()> {
    self.0.lock().unwrap().opened = true;
    Ok(())
  }
  fn close(&mut self) {
    self.0.lock().unwrap().opened = false;
  }
  fn set_interval_ms(&mut self, interval_ms: u32) {
    self.0.lock().unwrap().interval_ms = interval_ms;
  }
  fn set_batch_latency_ms(&mut self, _latency_ms: u32) {}
  fn set_wakeup(&mut self, _on: bool) {}
  fn read(&mut self, now_us: u64) -> Option<SensorEvent> {
    Some(SensorEvent::new(
      0,
      (SensorType::Accelerometer as u32) << 16 | 1,
      now_us,
      vec![0.0, 0.0, 9.8],
    ))
  }
}

fn accel_info() -> SensorInfo {
  SensorInfo {
    uri: "sensor://accel/0".to_string(),
    type_tag: SensorType::Accelerometer as u32,
    vendor: "test".to_string(),
    name: "test-accel".to_string(),
    min_range: -19.6,
    max_range: 19.6,
    resolution: 0.01,
    min_interval_ms: 1,
    fifo_count: 0,
    max_batch_count: 0,
    wakeup_supported: false,
    privilege: String::new(),
  }
}

fn gravity_info() -> SensorInfo {
  SensorInfo {
    uri: "sensor://gravity/0".to_string(),
    type_tag: SensorType::Gravity as u32,
    vendor: "test".to_string(),
    name: "test-gravity".to_string(),
    min_range: -19.6,
    max_range: 19.6,
    resolution: 0.01,
    min_interval_ms: 1,
    fifo_count: 0,
    max_batch_count: 0,
    wakeup_supported: false,
    privilege: String::new(),
  }
}

struct NullObserver;
impl SensorObserver for NullObserver {
  fn on_event(&self, _event: &SensorEvent) {}
}

#[test]
fn cascades_interval_to_upstreams() {
  let shim_state = Arc::new(Mutex::new(ShimState::default()));
  let queue = Arc::new(EventQueue::new(8));
  let registry = Registry::new(queue);

  registry.register(Arc::new(PhysicalHandler::new(accel_info(), Box::new(RecordingShim(shim_state.clone())))));

  let gravity = FusionHandler::new_in_registry(
    &registry,
    gravity_info(),
    vec!["sensor://accel/0".to_string()],
    -1,
    Box::new(GravityFilter::new(0.9)),
  );
  registry.register(gravity.clone());

  assert!(!shim_state.lock().unwrap().opened, "accel is idle until something subscribes to gravity");

  let observer: Arc<dyn SensorObserver> = Arc::new(NullObserver);
  gravity.add_listener(1, ListenerRequest { interval_ms: 20, ..Default::default() }, observer).unwrap();

  assert!(shim_state.lock().unwrap().opened, "a gravity listener must start the upstream accelerometer");
  assert_eq!(shim_state.lock().unwrap().interval_ms, 20, "the fusion listener's interval cascades to accel");

  gravity.remove_listener(1);
  assert!(!shim_state.lock().unwrap().opened, "withdrawing the last listener withdraws the upstream subscription too");
}

#[test]
fn upstream_sample_flows_through_synthesizer_back_onto_queue() {
  let queue = Arc::new(EventQueue::new(8));
  let registry = Registry::new(queue.clone());

  let accel = Arc::new(PhysicalHandler::new(
    accel_info(),
    Box::new(RecordingShim(Arc::new(Mutex::new(ShimState::default())))),
  ));
  registry.register(accel.clone());

  let gravity = FusionHandler::new_in_registry(
    &registry,
    gravity_info(),
    vec!["sensor://accel/0".to_string()],
    -1,
    Box::new(GravityFilter::new(0.9)),
  );
  registry.register(gravity.clone());

  let observer: Arc<dyn SensorObserver> = Arc::new(NullObserver);
  gravity.add_listener(1, ListenerRequest { interval_ms: 20, ..Default::default() }, observer).unwrap();

  // A timestamp well past the fusion handler's de-bounce gap (see
  // `DEBOUNCE_FACTOR`), so this test doesn't depend on how much wall-clock
  // time has elapsed since the process started.
  let sample = SensorEvent::new(0, (SensorType::Accelerometer as u32) << 16 | 1, 10_000_000, vec![0.0, 0.0, 9.8]);
  // What the (would-be) dispatch thread does after an accel tick: fan the
  // sample out to whatever is observing accel, which now includes the
  // gravity handler registered as an upstream listener above.
  accel.notify_observers(&sample);

  let fused = queue.pop().expect("gravity's synthesizer re-enqueued a fused sample");
  assert_eq!(&*fused.handler_uri, "sensor://gravity/0");
}
