//! Command tags and the body layout for each request/reply pair.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::{error::FatalReason, sensor::info::SensorInfo};

const MAX_URI_LEN: usize = 256;

/// The command tags carried in a frame header's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum CommandTag {
  ManagerSensorList = 1,
  ListenerConnect = 2,
  ListenerDisconnect = 3,
  ListenerStart = 4,
  ListenerStop = 5,
  ListenerAttrInt = 6,
  ListenerAttrStr = 7,
  ListenerGetData = 8,
  ListenerEvent = 9,
  ListenerAccEvent = 10,
  HasPrivilege = 11,
  /// Dynamic-sensor provider commands: tags reserved, dispatcher rejects
  /// these with `-EINVAL` since provider support is out of core scope.
  ProviderConnect = 12,
}

impl CommandTag {
  pub fn from_wire(tag: u32) -> Option<Self> {
    FromPrimitive::from_u32(tag)
  }

  pub fn to_wire(self) -> u32 {
    self as u32
  }
}

fn write_uri(out: &mut Vec<u8>, uri: &str) -> std::io::Result<()> {
  let bytes = uri.as_bytes();
  let len = bytes.len().min(MAX_URI_LEN - 1);
  out.write_u16::<LE>(len as u16)?;
  out.extend_from_slice(&bytes[..len]);
  Ok(())
}

fn read_uri(buf: &mut &[u8]) -> Result<String, FatalReason> {
  let err = |e: std::io::Error| FatalReason::Protocol(e.to_string());
  let len = buf.read_u16::<LE>().map_err(err)? as usize;
  if len > MAX_URI_LEN || buf.len() < len {
    return Err(FatalReason::Protocol("uri field out of bounds".into()));
  }
  let (uri_bytes, rest) = buf.split_at(len);
  let uri = String::from_utf8(uri_bytes.to_vec())
    .map_err(|_| FatalReason::Protocol("uri is not valid utf-8".into()))?;
  *buf = rest;
  Ok(uri)
}

/// `LISTENER_CONNECT` request body. The listener id is assigned by the
/// server (a process-wide counter) and returned in
/// [`ListenerConnectReply`]; the client never picks its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConnectBody {
  pub sensor_uri: String,
}

impl ListenerConnectBody {
  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::new();
    write_uri(&mut out, &self.sensor_uri).unwrap();
    out
  }

  pub fn decode(mut buf: &[u8]) -> Result<Self, FatalReason> {
    let sensor_uri = read_uri(&mut buf)?;
    Ok(ListenerConnectBody { sensor_uri })
  }
}

/// `LISTENER_CONNECT` reply body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerConnectReply {
  pub listener_id: i32,
}

impl ListenerConnectReply {
  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_i32::<LE>(self.listener_id).unwrap();
    out
  }

  pub fn decode(mut buf: &[u8]) -> Result<Self, FatalReason> {
    let listener_id = buf
      .read_i32::<LE>()
      .map_err(|e| FatalReason::Protocol(e.to_string()))?;
    Ok(ListenerConnectReply { listener_id })
  }
}

/// Body shared by `LISTENER_DISCONNECT`, `LISTENER_START`, `LISTENER_STOP`
/// and `LISTENER_GET_DATA` requests: just the target listener id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerIdBody {
  pub listener_id: i32,
}

impl ListenerIdBody {
  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_i32::<LE>(self.listener_id).unwrap();
    out
  }

  pub fn decode(mut buf: &[u8]) -> Result<Self, FatalReason> {
    let listener_id = buf
      .read_i32::<LE>()
      .map_err(|e| FatalReason::Protocol(e.to_string()))?;
    Ok(ListenerIdBody { listener_id })
  }
}

/// `LISTENER_ATTR_INT` request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrIntBody {
  pub listener_id: i32,
  pub attr: i32,
  pub value: i32,
}

/// Integer attribute tags handled locally by the listener proxy; anything
/// else is delegated to the target handler.
pub const ATTR_PAUSE_POLICY: i32 = 1;
pub const ATTR_AXIS_ORIENTATION: i32 = 2;
pub const ATTR_FLUSH: i32 = 3;
pub const ATTR_INTERVAL: i32 = 4;
pub const ATTR_BATCH_LATENCY: i32 = 5;
pub const ATTR_PASSIVE_MODE: i32 = 6;
pub const ATTR_WAKEUP: i32 = 7;

impl AttrIntBody {
  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_i32::<LE>(self.listener_id).unwrap();
    out.write_i32::<LE>(self.attr).unwrap();
    out.write_i32::<LE>(self.value).unwrap();
    out
  }

  pub fn decode(mut buf: &[u8]) -> Result<Self, FatalReason> {
    let err = |e: std::io::Error| FatalReason::Protocol(e.to_string());
    Ok(AttrIntBody {
      listener_id: buf.read_i32::<LE>().map_err(err)?,
      attr: buf.read_i32::<LE>().map_err(err)?,
      value: buf.read_i32::<LE>().map_err(err)?,
    })
  }
}

/// `LISTENER_ATTR_STR` request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrStrBody {
  pub listener_id: i32,
  pub attr: i32,
  pub value: Vec<u8>,
}

impl AttrStrBody {
  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_i32::<LE>(self.listener_id).unwrap();
    out.write_i32::<LE>(self.attr).unwrap();
    out.write_u32::<LE>(self.value.len() as u32).unwrap();
    out.extend_from_slice(&self.value);
    out
  }

  pub fn decode(mut buf: &[u8]) -> Result<Self, FatalReason> {
    let err = |e: std::io::Error| FatalReason::Protocol(e.to_string());
    let listener_id = buf.read_i32::<LE>().map_err(err)?;
    let attr = buf.read_i32::<LE>().map_err(err)?;
    let len = buf.read_u32::<LE>().map_err(err)? as usize;
    if buf.len() < len {
      return Err(FatalReason::Protocol("attr value out of bounds".into()));
    }
    let value = buf[..len].to_vec();
    Ok(AttrStrBody {
      listener_id,
      attr,
      value,
    })
  }
}

/// `HAS_PRIVILEGE` request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasPrivilegeBody {
  pub sensor_uri: String,
}

impl HasPrivilegeBody {
  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::new();
    write_uri(&mut out, &self.sensor_uri).unwrap();
    out
  }

  pub fn decode(mut buf: &[u8]) -> Result<Self, FatalReason> {
    let sensor_uri = read_uri(&mut buf)?;
    Ok(HasPrivilegeBody { sensor_uri })
  }
}

fn encode_sensor_info(info: &SensorInfo, out: &mut Vec<u8>) {
  write_uri(out, &info.uri).unwrap();
  out.write_u32::<LE>(info.type_tag).unwrap();
  write_uri(out, &info.vendor).unwrap();
  write_uri(out, &info.name).unwrap();
  out.write_f32::<LE>(info.min_range).unwrap();
  out.write_f32::<LE>(info.max_range).unwrap();
  out.write_f32::<LE>(info.resolution).unwrap();
  out.write_u32::<LE>(info.min_interval_ms).unwrap();
  out.write_u32::<LE>(info.fifo_count).unwrap();
  out.write_u32::<LE>(info.max_batch_count).unwrap();
  out.write_u8(info.wakeup_supported as u8).unwrap();
  write_uri(out, &info.privilege).unwrap();
}

fn decode_sensor_info(buf: &mut &[u8]) -> Result<SensorInfo, FatalReason> {
  let err = |e: std::io::Error| FatalReason::Protocol(e.to_string());
  let uri = read_uri(buf)?;
  let type_tag = buf.read_u32::<LE>().map_err(err)?;
  let vendor = read_uri(buf)?;
  let name = read_uri(buf)?;
  let min_range = buf.read_f32::<LE>().map_err(err)?;
  let max_range = buf.read_f32::<LE>().map_err(err)?;
  let resolution = buf.read_f32::<LE>().map_err(err)?;
  let min_interval_ms = buf.read_u32::<LE>().map_err(err)?;
  let fifo_count = buf.read_u32::<LE>().map_err(err)?;
  let max_batch_count = buf.read_u32::<LE>().map_err(err)?;
  let wakeup_supported = buf.read_u8().map_err(err)? != 0;
  let privilege = read_uri(buf)?;
  Ok(SensorInfo {
    uri,
    type_tag,
    vendor,
    name,
    min_range,
    max_range,
    resolution,
    min_interval_ms,
    fifo_count,
    max_batch_count,
    wakeup_supported,
    privilege,
  })
}

/// `MANAGER_SENSOR_LIST` reply body.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorListReply {
  pub sensors: Vec<SensorInfo>,
}

impl SensorListReply {
  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_i32::<LE>(self.sensors.len() as i32).unwrap();
    for info in &self.sensors {
      encode_sensor_info(info, &mut out);
    }
    out
  }

  pub fn decode(mut buf: &[u8]) -> Result<Self, FatalReason> {
    let err = |e: std::io::Error| FatalReason::Protocol(e.to_string());
    let count = buf.read_i32::<LE>().map_err(err)?;
    if count < 0 {
      return Err(FatalReason::Protocol("negative sensor count".into()));
    }
    let mut sensors = Vec::with_capacity(count as usize);
    for _ in 0..count {
      sensors.push(decode_sensor_info(&mut buf)?);
    }
    Ok(SensorListReply { sensors })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn connect_body_round_trips() {
    let body = ListenerConnectBody {
      sensor_uri: "sensor://accel/0".to_string(),
    };
    let decoded = ListenerConnectBody::decode(&body.encode()).unwrap();
    assert_eq!(body, decoded);
  }

  #[test]
  fn connect_reply_round_trips() {
    let reply = ListenerConnectReply { listener_id: 42 };
    let decoded = ListenerConnectReply::decode(&reply.encode()).unwrap();
    assert_eq!(reply, decoded);
  }

  #[test]
  fn sensor_list_round_trips() {
    let reply = SensorListReply {
      sensors: vec![SensorInfo {
        uri: "sensor://accel/0".to_string(),
        type_tag: 1,
        vendor: "synthetic".to_string(),
        name: "synthetic-accel".to_string(),
        min_range: -19.6,
        max_range: 19.6,
        resolution: 0.01,
        min_interval_ms: 5,
        fifo_count: 0,
        max_batch_count: 0,
        wakeup_supported: false,
        privilege: String::new(),
      }],
    };
    let decoded = SensorListReply::decode(&reply.encode()).unwrap();
    assert_eq!(reply, decoded);
  }
}
