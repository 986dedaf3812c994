//! Maps each received command frame to the corresponding listener-proxy or
//! manager operation and builds the reply frame. One [`Dispatcher`] owns the
//! listener proxies created over one client's pair of channels; commands on
//! a single channel are processed sequentially, one worker thread per
//! connected command channel.

use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicI32, Ordering},
    Arc, Mutex,
  },
};

use enumflags2::BitFlags;
use log::{debug, warn};

use crate::{
  error::ServerError,
  listener::{AxisOrientation, ListenerProxy},
  policy::PolicyMonitor,
  sensor::{arbitration::ListenerId, registry::Registry},
  transport::Channel,
  wire::{
    command::{
      AttrIntBody, AttrStrBody, CommandTag, HasPrivilegeBody, ListenerConnectBody, ListenerConnectReply,
      ListenerIdBody, SensorListReply, ATTR_AXIS_ORIENTATION, ATTR_BATCH_LATENCY, ATTR_FLUSH, ATTR_INTERVAL,
      ATTR_PASSIVE_MODE, ATTR_PAUSE_POLICY, ATTR_WAKEUP,
    },
    header::FrameHeader,
  },
};

pub struct Dispatcher {
  registry: Arc<Registry>,
  policy_monitor: Arc<PolicyMonitor>,
  event_channel: Arc<Channel>,
  proxies: Mutex<HashMap<ListenerId, Arc<ListenerProxy>>>,
  next_listener_id: Arc<AtomicI32>,
}

impl Dispatcher {
  pub fn new(
    registry: Arc<Registry>,
    policy_monitor: Arc<PolicyMonitor>,
    event_channel: Arc<Channel>,
    next_listener_id: Arc<AtomicI32>,
  ) -> Self {
    Dispatcher {
      registry,
      policy_monitor,
      event_channel,
      proxies: Mutex::new(HashMap::new()),
      next_listener_id,
    }
  }

  /// Handles one request frame and returns the reply body plus the wire
  /// `err` value to place in its header. A [`ServerError::Fatal`] should be
  /// treated by the caller as "tear down this channel" rather than answered.
  pub fn handle(&self, header: &FrameHeader, body: &[u8]) -> Result<(u32, Vec<u8>), ServerError> {
    let Some(tag) = CommandTag::from_wire(header.type_tag) else {
      return Err(ServerError::invalid());
    };
    debug!("dispatching {:?} (id={})", tag, header.id);

    match tag {
      CommandTag::ManagerSensorList => {
        let sensors = self.registry.list_infos();
        Ok((tag.to_wire(), SensorListReply { sensors }.encode()))
      }

      CommandTag::ListenerConnect => {
        let req = ListenerConnectBody::decode(body).map_err(|_| ServerError::invalid())?;
        let handler = self.registry.get(&req.sensor_uri).ok_or_else(ServerError::invalid)?;
        let listener_id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        let proxy = ListenerProxy::new(listener_id, req.sensor_uri, handler, self.event_channel.clone());
        self.policy_monitor.add_listener(proxy.as_policy_listener());
        self.proxies.lock().unwrap().insert(listener_id, proxy);
        Ok((tag.to_wire(), ListenerConnectReply { listener_id }.encode()))
      }

      CommandTag::ListenerDisconnect => {
        let req = ListenerIdBody::decode(body).map_err(|_| ServerError::invalid())?;
        let proxy = self
          .proxies
          .lock()
          .unwrap()
          .remove(&req.listener_id)
          .ok_or_else(ServerError::invalid)?;
        proxy.stop(false);
        Ok((tag.to_wire(), Vec::new()))
      }

      CommandTag::ListenerStart => {
        let proxy = self.proxy_for(body)?;
        proxy.start(false).map_err(|_| ServerError::io())?;
        Ok((tag.to_wire(), Vec::new()))
      }

      CommandTag::ListenerStop => {
        let proxy = self.proxy_for(body)?;
        proxy.stop(false);
        Ok((tag.to_wire(), Vec::new()))
      }

      CommandTag::ListenerAttrInt => {
        let req = AttrIntBody::decode(body).map_err(|_| ServerError::invalid())?;
        let proxy = self.lookup(req.listener_id)?;
        match req.attr {
          ATTR_PAUSE_POLICY => {
            let mask = BitFlags::from_bits(req.value as u8).unwrap_or_else(|_| BitFlags::empty());
            proxy.set_pause_policy_mask(mask);
          }
          ATTR_AXIS_ORIENTATION => {
            let orientation = if req.value == 0 {
              AxisOrientation::Device
            } else {
              AxisOrientation::Display
            };
            proxy.set_axis_orientation(orientation);
          }
          ATTR_FLUSH => proxy.flush(),
          ATTR_INTERVAL => {
            if req.value <= 0 {
              return Err(ServerError::invalid());
            }
            proxy.set_interval(req.value as u32);
          }
          ATTR_BATCH_LATENCY => proxy.set_max_batch_latency(req.value.max(0) as u32),
          ATTR_PASSIVE_MODE => proxy.set_passive_mode(req.value != 0),
          ATTR_WAKEUP => proxy.set_wakeup(req.value != 0),
          _ => return Err(ServerError::invalid()),
        }
        Ok((tag.to_wire(), Vec::new()))
      }

      CommandTag::ListenerAttrStr => {
        let _req = AttrStrBody::decode(body).map_err(|_| ServerError::invalid())?;
        // No generic string attribute is handled locally or passed through
        // to a device shim; this is the out-of-scope driver-attribute
        // passthrough.
        Err(ServerError::invalid())
      }

      CommandTag::ListenerGetData => {
        let proxy = self.proxy_for(body)?;
        let event = proxy.get_data().ok_or_else(ServerError::invalid)?;
        let mut buf = Vec::new();
        event.encode(&mut buf).map_err(|_| ServerError::io())?;
        Ok((tag.to_wire(), buf))
      }

      CommandTag::HasPrivilege => {
        let req = HasPrivilegeBody::decode(body).map_err(|_| ServerError::invalid())?;
        let handler = self.registry.get(&req.sensor_uri).ok_or_else(ServerError::invalid)?;
        if handler.info().privilege.is_empty() {
          Ok((tag.to_wire(), Vec::new()))
        } else {
          Err(ServerError::access_denied())
        }
      }

      CommandTag::ProviderConnect => {
        warn!("rejecting out-of-scope provider command");
        Err(ServerError::invalid())
      }

      CommandTag::ListenerEvent | CommandTag::ListenerAccEvent => Err(ServerError::invalid()),
    }
  }

  fn proxy_for(&self, body: &[u8]) -> Result<Arc<ListenerProxy>, ServerError> {
    let req = ListenerIdBody::decode(body).map_err(|_| ServerError::invalid())?;
    self.lookup(req.listener_id)
  }

  fn lookup(&self, listener_id: ListenerId) -> Result<Arc<ListenerProxy>, ServerError> {
    self
      .proxies
      .lock()
      .unwrap()
      .get(&listener_id)
      .cloned()
      .ok_or_else(ServerError::invalid)
  }

  /// Detaches and drops every proxy owned by this dispatcher. Called when
  /// its channel is torn down.
  pub fn teardown(&self) {
    let proxies: Vec<Arc<ListenerProxy>> = self.proxies.lock().unwrap().drain().map(|(_, p)| p).collect();
    for proxy in proxies {
      proxy.stop(false);
    }
  }
}
