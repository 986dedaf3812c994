//! Sensor type catalog and the `sensor_event` wire body.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::error::FatalReason;

/// The sensor type catalog. `event_type = (sensor_type << 16) | sub_event`;
/// `sub_event` 0x0001 is always the canonical raw stream for that type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum SensorType {
  Accelerometer = 1,
  Gyroscope = 2,
  Geomagnetic = 3,
  Proximity = 4,
  Pressure = 5,
  Temperature = 6,
  Light = 7,
  RotationVector = 8,
  UncalGyro = 9,
  AutoRotation = 10,
  Gravity = 11,
  LinearAccel = 12,
  Orientation = 13,
  Tilt = 14,
  GeomagneticRv = 15,
  GamingRv = 16,
  Fusion = 17,
}

impl SensorType {
  pub fn from_tag(tag: u32) -> Option<Self> {
    FromPrimitive::from_u32(tag)
  }
}

/// `sub_event` values shared across sensor types.
pub const SUB_EVENT_RAW: u32 = 0x0001;
pub const SUB_EVENT_CALIBRATION_NEEDED: u32 = 0x0002;

pub const AUTO_ROTATION_DEGREE_0: u32 = 0x0001;
pub const AUTO_ROTATION_DEGREE_90: u32 = 0x0002;
pub const AUTO_ROTATION_DEGREE_180: u32 = 0x0003;
pub const AUTO_ROTATION_DEGREE_270: u32 = 0x0004;
pub const AUTO_ROTATION_UNKNOWN: u32 = 0x0005;

pub fn event_type(sensor_type: SensorType, sub_event: u32) -> u32 {
  ((sensor_type as u32) << 16) | sub_event
}

pub fn split_event_type(event_type: u32) -> (u32, u32) {
  (event_type >> 16, event_type & 0xFFFF)
}

/// Maximum number of float values carried by one event.
pub const MAX_VALUE_COUNT: usize = 16;

/// `accuracy` values, shared with the original sensord protocol.
pub const ACCURACY_UNDEFINED: i32 = -1;
pub const ACCURACY_BAD: i32 = 0;
pub const ACCURACY_NORMAL: i32 = 1;
pub const ACCURACY_GOOD: i32 = 2;
pub const ACCURACY_VERYGOOD: i32 = 3;

/// One timestamped sample, with up to [`MAX_VALUE_COUNT`] float values.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
  pub sensor_id: i32,
  pub event_type: u32,
  pub timestamp_us: u64,
  pub accuracy: i32,
  pub values: Vec<f32>,
}

impl SensorEvent {
  pub fn new(sensor_id: i32, event_type: u32, timestamp_us: u64, values: Vec<f32>) -> Self {
    SensorEvent {
      sensor_id,
      event_type,
      timestamp_us,
      accuracy: ACCURACY_UNDEFINED,
      values,
    }
  }

  pub fn with_accuracy(mut self, accuracy: i32) -> Self {
    self.accuracy = accuracy;
    self
  }

  pub fn encode(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
    out.write_i32::<LE>(self.sensor_id)?;
    out.write_u32::<LE>(self.event_type)?;
    out.write_u64::<LE>(self.timestamp_us)?;
    out.write_i32::<LE>(self.accuracy)?;
    let count = self.values.len().min(MAX_VALUE_COUNT) as u8;
    out.write_u8(count)?;
    for v in self.values.iter().take(MAX_VALUE_COUNT) {
      out.write_f32::<LE>(*v)?;
    }
    Ok(())
  }

  pub fn decode(mut buf: &[u8]) -> Result<Self, FatalReason> {
    let err = |e: std::io::Error| FatalReason::Protocol(e.to_string());
    let sensor_id = buf.read_i32::<LE>().map_err(err)?;
    let event_type = buf.read_u32::<LE>().map_err(err)?;
    let timestamp_us = buf.read_u64::<LE>().map_err(err)?;
    let accuracy = buf.read_i32::<LE>().map_err(err)?;
    let count = buf.read_u8().map_err(err)? as usize;
    if count > MAX_VALUE_COUNT {
      return Err(FatalReason::Protocol("value_count exceeds maximum".into()));
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
      values.push(buf.read_f32::<LE>().map_err(err)?);
    }
    Ok(SensorEvent {
      sensor_id,
      event_type,
      timestamp_us,
      accuracy,
      values,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn event_type_packs_and_unpacks() {
    let tag = event_type(SensorType::Gyroscope, SUB_EVENT_RAW);
    assert_eq!(split_event_type(tag), (SensorType::Gyroscope as u32, SUB_EVENT_RAW));
  }

  #[test]
  fn round_trips() {
    let ev = SensorEvent::new(3, event_type(SensorType::Accelerometer, SUB_EVENT_RAW), 1234, vec![1.0, 2.0, 3.0])
      .with_accuracy(ACCURACY_GOOD);
    let mut buf = Vec::new();
    ev.encode(&mut buf).unwrap();
    let decoded = SensorEvent::decode(&buf).unwrap();
    assert_eq!(ev, decoded);
  }
}
