//! End-to-end arbitration scenarios driven through a real
//! [`PhysicalHandler`], not the bare reducer: two listeners attach, and the
//! handler's ticking and device-shim calls are observed directly.

use std::sync::{Arc, Mutex};

use sensord::{
  reactor::queue::EventQueue,
  sensor::{
    arbitration::ListenerRequest,
    clock::now_us,
    handler::{DeviceShim, SensorHandler, SensorObserver},
    info::SensorInfo,
    physical::{PhysicalHandler, SyntheticShim},
  },
  wire::sensor_event::{SensorEvent, SensorType},
};

struct NullObserver;
impl SensorObserver for NullObserver {
  fn on_event(&self, _event: &SensorEvent) {}
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

fn req(interval_ms: u32) -> ListenerRequest {
  ListenerRequest { interval_ms, ..Default::default() }
}

#[test]
fn min_interval_two_listeners() {
  let info = accel_info();
  let shim = SyntheticShim::new(&info.uri, SensorType::Accelerometer);
  let handler = PhysicalHandler::new(info, Box::new(shim));
  let queue = EventQueue::new(8);
  let observer: Arc<dyn SensorObserver> = Arc::new(NullObserver);

  handler.add_listener(1, req(100), observer.clone()).unwrap();
  handler.add_listener(2, req(20), observer.clone()).unwrap();

  let t0 = now_us();
  handler.tick(t0, &queue);
  assert_eq!(queue.len(), 1, "a freshly started handler always fires on its first tick");

  handler.tick(t0 + 15_000, &queue);
  assert_eq!(queue.len(), 1, "15ms has not reached the 20ms effective interval yet");

  handler.tick(t0 + 25_000, &queue);
  assert_eq!(queue.len(), 2, "25ms has passed the 20ms effective interval");

  // Removing the faster listener relaxes the effective interval back to
  // the slower one; the next scheduled wakeup (already past) still fires
  // once, after which the slower cadence takes over.
  handler.remove_listener(2);
  handler.tick(t0 + 45_000, &queue);
  assert_eq!(queue.len(), 3);
  handler.tick(t0 + 60_000, &queue);
  assert_eq!(queue.len(), 3, "60ms is under the 100ms floor now in force from listener 1 alone");
}

#[derive(Default)]
struct ShimState {
  opened: bool,
  interval_ms: u32,
  latency_ms: u32,
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

  fn set_batch_latency_ms(&mut self, latency_ms: u32) {
    self.0.lock().unwrap().latency_ms = latency_ms;
  }

  fn set_wakeup(&mut self, _on: bool) {}

  fn read(&mut self, now_us: u64) -> Option<SensorEvent> {
    Some(SensorEvent::new(0, (SensorType::Accelerometer as u32) << 16 | 1, now_us, vec![0.0, 0.0, 0.0]))
  }
}

#[test]
fn max_latency_two_listeners() {
  let state = Arc::new(Mutex::new(ShimState::default()));
  let handler = PhysicalHandler::new(accel_info(), Box::new(RecordingShim(state.clone())));
  let observer: Arc<dyn SensorObserver> = Arc::new(NullObserver);

  handler.add_listener(1, ListenerRequest { latency_ms: 500, ..req(50) }, observer.clone()).unwrap();
  assert_eq!(state.lock().unwrap().latency_ms, 500);

  handler.add_listener(2, ListenerRequest { latency_ms: 1500, ..req(50) }, observer.clone()).unwrap();
  assert_eq!(state.lock().unwrap().latency_ms, 1500, "max over listeners, not the most recently added");

  handler.remove_listener(2);
  assert_eq!(state.lock().unwrap().latency_ms, 500, "falls back to the remaining listener's request");
}
