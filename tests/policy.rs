//! A policy-driven pause must suspend a running listener without losing the
//! user's intent to have it running, and a subsequent policy resume must
//! restore it -- without the user ever calling start/stop again.

use std::sync::{Arc, Mutex};

use sensord::{
  listener::ListenerProxy,
  policy::{PausePolicy, PolicyMonitor},
  sensor::{
    handler::{DeviceShim, SensorHandler},
    info::SensorInfo,
    physical::PhysicalHandler,
  },
  transport::Channel,
  wire::sensor_event::{SensorEvent, SensorType},
};

#[derive(Default)]
struct ShimState {
  opened: bool,
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
  fn set_interval_ms(&mut self, _interval_ms: u32) {}
  fn set_batch_latency_ms(&mut self, _latency_ms: u32) {}
  fn set_wakeup(&mut self, _on: bool) {}
  fn read(&mut self, now_us: u64) -> Option<SensorEvent> {
    Some(SensorEvent::new(0, (SensorType::Accelerometer as u32) << 16 | 1, now_us, vec![0.0, 0.0, 9.8]))
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

#[test]
fn pause_then_resume() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("policy.sock");
  let _listener = Channel::listen(&path).unwrap();
  let channel = Arc::new(Channel::connect(&path).unwrap());

  let shim_state = Arc::new(Mutex::new(ShimState::default()));
  let target: Arc<dyn SensorHandler> = Arc::new(PhysicalHandler::new(accel_info(), Box::new(RecordingShim(shim_state.clone()))));

  let monitor = PolicyMonitor::new();
  let proxy = ListenerProxy::new(1, "sensor://accel/0".to_string(), target, channel);
  monitor.add_listener(proxy.as_policy_listener());
  proxy.set_pause_policy_mask(PausePolicy::Display.into());

  proxy.start(false).unwrap();
  assert!(shim_state.lock().unwrap().opened, "user start opens the device");

  monitor.broadcast(PausePolicy::Display.into());
  assert!(!shim_state.lock().unwrap().opened, "the pause policy the listener opted into suspends it");

  monitor.broadcast(enumflags2::BitFlags::empty());
  assert!(shim_state.lock().unwrap().opened, "clearing the pause policy resumes it without a fresh user start");
}

#[test]
fn policy_leaves_a_never_started_listener_alone() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("policy-idle.sock");
  let _listener = Channel::listen(&path).unwrap();
  let channel = Arc::new(Channel::connect(&path).unwrap());

  let shim_state = Arc::new(Mutex::new(ShimState::default()));
  let target: Arc<dyn SensorHandler> = Arc::new(PhysicalHandler::new(accel_info(), Box::new(RecordingShim(shim_state.clone()))));

  let monitor = PolicyMonitor::new();
  let proxy = ListenerProxy::new(1, "sensor://accel/0".to_string(), target, channel);
  monitor.add_listener(proxy.as_policy_listener());
  proxy.set_pause_policy_mask(PausePolicy::Display.into());

  monitor.broadcast(PausePolicy::Display.into());
  assert!(!shim_state.lock().unwrap().opened, "a listener the user never started has nothing to pause");
}
