//! Exercises the server-side [`ListenerProxy`] against a real connected pair
//! of channels: display-frame axis rotation and accuracy-change
//! de-duplication, both read back off the wire rather than inspected
//! in-process.

use std::sync::Arc;

use sensord::{
  listener::{AxisOrientation, ListenerProxy},
  sensor::{
    handler::{SensorHandler, SensorObserver},
    info::SensorInfo,
    physical::{PhysicalHandler, SyntheticShim},
  },
  transport::Channel,
  wire::{
    command::CommandTag,
    sensor_event::{event_type, SensorEvent, SensorType, ACCURACY_GOOD, ACCURACY_VERYGOOD, SUB_EVENT_RAW},
  },
};

fn channel_pair(dir: &std::path::Path, name: &str) -> (Arc<Channel>, Channel) {
  let path = dir.join(name);
  let listener = Channel::listen(&path).unwrap();
  let client = Channel::connect(&path).unwrap();
  client.set_blocking(true).unwrap();
  let mut accepted = None;
  for _ in 0..10_000 {
    if let Some((channel, _)) = listener.accept().unwrap() {
      accepted = Some(channel);
      break;
    }
    std::thread::yield_now();
  }
  (Arc::new(accepted.expect("peer connected within the spin budget")), client)
}

fn accel_target() -> Arc<dyn SensorHandler> {
  let info = SensorInfo {
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
  };
  let shim = SyntheticShim::new(&info.uri, SensorType::Accelerometer);
  Arc::new(PhysicalHandler::new(info, Box::new(shim)))
}

fn accel_event(x: f32, y: f32, z: f32, accuracy: i32) -> SensorEvent {
  SensorEvent::new(0, event_type(SensorType::Accelerometer, SUB_EVENT_RAW), 1, vec![x, y, z]).with_accuracy(accuracy)
}

#[test]
fn rotates_90_degrees() {
  let dir = tempfile::tempdir().unwrap();
  let (server_side, client) = channel_pair(dir.path(), "rotate.sock");

  let proxy = ListenerProxy::new(1, "sensor://accel/0".to_string(), accel_target(), server_side);
  proxy.set_axis_orientation(AxisOrientation::Display);
  proxy.set_display_rotation(90);

  proxy.on_event(&accel_event(1.0, 2.0, 3.0, ACCURACY_GOOD));

  // First event ever seen: an accuracy frame precedes the sample frame.
  let (acc_header, _) = client.recv_frame().unwrap().unwrap();
  assert_eq!(acc_header.type_tag, CommandTag::ListenerAccEvent.to_wire());

  let (sample_header, body) = client.recv_frame().unwrap().unwrap();
  assert_eq!(sample_header.type_tag, CommandTag::ListenerEvent.to_wire());
  let event = SensorEvent::decode(&body).unwrap();
  // rotate(1, 2, 90) == (-2, 1); z is untouched.
  assert!((event.values[0] - -2.0).abs() < 1e-6);
  assert!((event.values[1] - 1.0).abs() < 1e-6);
  assert!((event.values[2] - 3.0).abs() < 1e-6);
}

#[test]
fn accuracy_events_only_on_change() {
  let dir = tempfile::tempdir().unwrap();
  let (server_side, client) = channel_pair(dir.path(), "accuracy.sock");

  let proxy = ListenerProxy::new(2, "sensor://accel/0".to_string(), accel_target(), server_side);

  proxy.on_event(&accel_event(0.0, 0.0, 9.8, ACCURACY_GOOD));
  let (first, _) = client.recv_frame().unwrap().unwrap();
  assert_eq!(first.type_tag, CommandTag::ListenerAccEvent.to_wire(), "accuracy is new on the very first event");
  let (second, _) = client.recv_frame().unwrap().unwrap();
  assert_eq!(second.type_tag, CommandTag::ListenerEvent.to_wire());

  // Same accuracy, different values: no accuracy frame this time, just one
  // sample frame.
  proxy.on_event(&accel_event(0.1, 0.0, 9.8, ACCURACY_GOOD));
  let (third, _) = client.recv_frame().unwrap().unwrap();
  assert_eq!(third.type_tag, CommandTag::ListenerEvent.to_wire());

  // Accuracy changes: an accuracy frame reappears ahead of the sample.
  proxy.on_event(&accel_event(0.2, 0.0, 9.8, ACCURACY_VERYGOOD));
  let (fourth, _) = client.recv_frame().unwrap().unwrap();
  assert_eq!(fourth.type_tag, CommandTag::ListenerAccEvent.to_wire());
  let (fifth, _) = client.recv_frame().unwrap().unwrap();
  assert_eq!(fifth.type_tag, CommandTag::ListenerEvent.to_wire());
}
