//! Top-level client API: connect to the daemon, list sensors, and open
//! per-sensor handles.

use std::{
  collections::HashMap,
  path::Path,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, Weak,
  },
};

use crate::{
  client::{handle::SensorHandle, listener::EventListener},
  error::{ClientError, NegativeErrno},
  sensor::{arbitration::ListenerId, info::SensorInfo},
  transport::{handshake, Channel},
  wire::{
    command::{
      CommandTag, HasPrivilegeBody, ListenerConnectBody, ListenerConnectReply, ListenerIdBody, SensorListReply,
    },
    header::FrameHeader,
  },
};

/// Sensor clients connecting to the daemon identify as this client type in
/// the channel handshake.
const CLIENT_TYPE_SENSOR_CLIENT: i32 = 1;

/// A connected client: one command channel (request/reply, serialized) plus
/// one event channel (owned by the lazily-started [`EventListener`]).
pub struct Client {
  client_id: i32,
  command: Mutex<Channel>,
  next_request_id: AtomicU64,
  handles: Arc<Mutex<HashMap<ListenerId, Weak<SensorHandle>>>>,
  event_listener: Mutex<Option<Arc<EventListener>>>,
  event_socket_path: std::path::PathBuf,
}

impl Client {
  /// Connects the command channel and performs its handshake. The event
  /// channel (and its reader/deliverer threads) is established lazily, on
  /// the first call to [`Client::connect_sensor`].
  pub fn connect(command_socket_path: impl AsRef<Path>, event_socket_path: impl AsRef<Path>) -> Result<Arc<Self>, ClientError> {
    let client_id = (rand::random::<u32>() & 0x7fff_ffff) as i32;

    let command = Channel::connect(command_socket_path.as_ref()).map_err(ClientError::Connect)?;
    handshake::client_handshake(&command, CLIENT_TYPE_SENSOR_CLIENT, client_id)?;

    Ok(Arc::new(Client {
      client_id,
      command: Mutex::new(command),
      next_request_id: AtomicU64::new(1),
      handles: Arc::new(Mutex::new(HashMap::new())),
      event_listener: Mutex::new(None),
      event_socket_path: event_socket_path.as_ref().to_path_buf(),
    }))
  }

  pub fn list_sensors(&self) -> Result<Vec<SensorInfo>, ClientError> {
    let (_, body) = self.request(CommandTag::ManagerSensorList, &[])?;
    let reply = SensorListReply::decode(&body).map_err(|e| ClientError::Protocol(e.to_string()))?;
    Ok(reply.sensors)
  }

  pub fn has_privilege(&self, sensor_uri: &str) -> Result<bool, ClientError> {
    let body = HasPrivilegeBody {
      sensor_uri: sensor_uri.to_string(),
    }
    .encode();
    match self.request(CommandTag::HasPrivilege, &body) {
      Ok(_) => Ok(true),
      Err(ClientError::Rejected(NegativeErrno::AccessDenied)) => Ok(false),
      Err(e) => Err(e),
    }
  }

  /// Opens a subscription to `sensor_uri`, lazily starting the event
  /// listener on the first call.
  pub fn connect_sensor(self: &Arc<Self>, sensor_uri: &str) -> Result<Arc<SensorHandle>, ClientError> {
    self.ensure_event_listener()?;

    let body = ListenerConnectBody {
      sensor_uri: sensor_uri.to_string(),
    }
    .encode();
    let (_, reply_body) = self.request(CommandTag::ListenerConnect, &body)?;
    let reply = ListenerConnectReply::decode(&reply_body).map_err(|e| ClientError::Protocol(e.to_string()))?;

    let handle = Arc::new(SensorHandle::new(reply.listener_id, sensor_uri.to_string()));
    self.handles.lock().unwrap().insert(reply.listener_id, Arc::downgrade(&handle));
    Ok(handle)
  }

  pub fn start_sensor(&self, handle: &SensorHandle) -> Result<(), ClientError> {
    let body = ListenerIdBody {
      listener_id: handle.listener_id(),
    }
    .encode();
    self.request(CommandTag::ListenerStart, &body)?;
    handle.mark_started(true);
    Ok(())
  }

  pub fn stop_sensor(&self, handle: &SensorHandle) -> Result<(), ClientError> {
    let body = ListenerIdBody {
      listener_id: handle.listener_id(),
    }
    .encode();
    self.request(CommandTag::ListenerStop, &body)?;
    handle.mark_started(false);
    Ok(())
  }

  pub fn disconnect_sensor(&self, handle: &SensorHandle) -> Result<(), ClientError> {
    let body = ListenerIdBody {
      listener_id: handle.listener_id(),
    }
    .encode();
    self.request(CommandTag::ListenerDisconnect, &body)?;
    self.handles.lock().unwrap().remove(&handle.listener_id());
    Ok(())
  }

  fn ensure_event_listener(self: &Arc<Self>) -> Result<(), ClientError> {
    let mut slot = self.event_listener.lock().unwrap();
    if slot.is_some() {
      return Ok(());
    }
    let event_channel = Channel::connect(&self.event_socket_path).map_err(ClientError::Connect)?;
    handshake::client_handshake(&event_channel, CLIENT_TYPE_SENSOR_CLIENT, self.client_id)?;
    event_channel.set_blocking(true).map_err(ClientError::Io)?;
    *slot = Some(EventListener::start(event_channel, self.handles.clone()));
    Ok(())
  }

  /// Sends one request and blocks (busy-waiting on the non-blocking command
  /// channel, matching the blocking request/reply contract the protocol
  /// assumes) for its matching reply.
  fn request(&self, tag: CommandTag, body: &[u8]) -> Result<(u32, Vec<u8>), ClientError> {
    let command = self.command.lock().unwrap();
    let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
    let header = FrameHeader::new(id, tag.to_wire(), body.len() as u32);
    command.send_frame(&header, body).map_err(ClientError::Io)?;

    loop {
      match command.recv_frame() {
        Ok(Some((reply_header, reply_body))) => {
          if reply_header.id != id {
            continue; // stale reply from a previous, abandoned request
          }
          if reply_header.err != 0 {
            return Err(ClientError::Rejected(NegativeErrno::from(reply_header.err)));
          }
          return Ok((reply_header.type_tag, reply_body));
        }
        Ok(None) => std::thread::yield_now(),
        Err(e) => return Err(e.into()),
      }
    }
  }
}
