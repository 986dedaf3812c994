//! Rotates a sensor's (x, y) pair to the display frame.

use crate::wire::sensor_event::{split_event_type, SensorEvent, SensorType};

/// Sensor types whose first two values are meaningful as an (x, y) pair in
/// the device frame and therefore eligible for display-frame rotation.
fn is_axis_rotatable(sensor_type: u32) -> bool {
  sensor_type == SensorType::Accelerometer as u32
    || sensor_type == SensorType::Gyroscope as u32
    || sensor_type == SensorType::Gravity as u32
    || sensor_type == SensorType::LinearAccel as u32
}

/// Rotates `(x, y)` by `degrees` (must be one of 0/90/180/270; any other
/// value is treated as 0). Matches the standard device-to-display rotation:
/// a 90 degree rotation maps (x, y) -> (-y, x).
pub fn rotate(x: f32, y: f32, degrees: u32) -> (f32, f32) {
  match degrees % 360 {
    90 => (-y, x),
    180 => (-x, -y),
    270 => (y, -x),
    _ => (x, y),
  }
}

/// Applies [`rotate`] to `event.values[0..2]` in place, if `event`'s sensor
/// type is rotatable and it carries at least two values.
pub fn rotate_event_in_place(event: &mut SensorEvent, degrees: u32) {
  let (sensor_type, _) = split_event_type(event.event_type);
  if degrees % 360 == 0 || !is_axis_rotatable(sensor_type) || event.values.len() < 2 {
    return;
  }
  let (x, y) = rotate(event.values[0], event.values[1], degrees);
  event.values[0] = x;
  event.values[1] = y;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::wire::sensor_event::{event_type, SUB_EVENT_RAW};

  #[test]
  fn zero_degrees_is_identity() {
    assert_eq!(rotate(1.0, 2.0, 0), (1.0, 2.0));
  }

  #[test]
  fn four_quarter_turns_is_identity() {
    let (mut x, mut y) = (1.0, 2.0);
    for _ in 0..4 {
      let (nx, ny) = rotate(x, y, 90);
      x = nx;
      y = ny;
    }
    assert!((x - 1.0).abs() < 1e-6);
    assert!((y - 2.0).abs() < 1e-6);
  }

  #[test]
  fn non_rotatable_type_is_left_alone() {
    let mut event = SensorEvent::new(0, event_type(SensorType::Light, SUB_EVENT_RAW), 0, vec![5.0]);
    rotate_event_in_place(&mut event, 90);
    assert_eq!(event.values, vec![5.0]);
  }
}
