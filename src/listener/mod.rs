//! The listener proxy: the server-side representation of one client
//! subscription to one sensor.

pub mod axis;

use std::sync::{
  atomic::{AtomicBool, AtomicU32, Ordering},
  Arc, Mutex, Weak,
};

use enumflags2::BitFlags;
use log::{trace, warn};

use crate::{
  policy::{PausePolicy, PolicyListener},
  sensor::{
    arbitration::{ListenerId, ListenerRequest},
    handler::{SensorHandler, SensorObserver},
    info::IDLE_FLOOR_INTERVAL_MS,
  },
  transport::Channel,
  wire::{
    command::CommandTag,
    header::FrameHeader,
    sensor_event::{SensorEvent, ACCURACY_BAD},
  },
};

/// `AXIS_ORIENTATION` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOrientation {
  Device,
  Display,
}

struct State {
  interval_ms: u32,
  latency_ms: u32,
  wakeup: bool,
  passive: bool,
  axis_orientation: AxisOrientation,
  display_rotation_deg: u32,
  last_accuracy: i32,
  pause_policy_mask: BitFlags<PausePolicy>,
  next_frame_id: u64,
}

/// One client subscription to one sensor. Created on `LISTENER_CONNECT`,
/// destroyed on `LISTENER_DISCONNECT`; may be started and stopped many times
/// in between, by the user or by the policy monitor.
pub struct ListenerProxy {
  listener_id: ListenerId,
  target_sensor_uri: String,
  target: Arc<dyn SensorHandler>,
  channel: Arc<Channel>,
  user_started: AtomicBool,
  self_weak: Weak<ListenerProxy>,
  state: Mutex<State>,
}

impl ListenerProxy {
  pub fn new(
    listener_id: ListenerId,
    target_sensor_uri: String,
    target: Arc<dyn SensorHandler>,
    channel: Arc<Channel>,
  ) -> Arc<Self> {
    Arc::new_cyclic(|self_weak| ListenerProxy {
      listener_id,
      target_sensor_uri,
      target,
      channel,
      user_started: AtomicBool::new(false),
      self_weak: self_weak.clone(),
      state: Mutex::new(State {
        interval_ms: IDLE_FLOOR_INTERVAL_MS,
        latency_ms: 0,
        wakeup: false,
        passive: false,
        axis_orientation: AxisOrientation::Device,
        display_rotation_deg: 0,
        last_accuracy: crate::wire::sensor_event::ACCURACY_UNDEFINED,
        pause_policy_mask: BitFlags::all(),
        next_frame_id: 1,
      }),
    })
  }

  pub fn listener_id(&self) -> ListenerId {
    self.listener_id
  }

  pub fn target_sensor_uri(&self) -> &str {
    &self.target_sensor_uri
  }

  fn current_request(&self, state: &State) -> ListenerRequest {
    ListenerRequest {
      interval_ms: state.interval_ms,
      latency_ms: state.latency_ms,
      wakeup: state.wakeup,
      is_processor: false,
      passive: state.passive,
    }
  }

  fn self_observer(&self) -> Arc<dyn SensorObserver> {
    self
      .self_weak
      .upgrade()
      .expect("proxy observes its own handler only while it is alive")
  }

  /// Attaches (or re-attaches) to the target handler. `policy == false`
  /// records that the user wants this listener running; `policy == true`
  /// leaves that intent untouched (used for policy-driven resume).
  ///
  /// Fails if this is the transition that starts the underlying handler and
  /// its device shim's `open` fails; user intent is left unset in that case.
  pub fn start(&self, policy: bool) -> std::io::Result<()> {
    let request = {
      let state = self.state.lock().unwrap();
      self.current_request(&state)
    };
    self.target.add_listener(self.listener_id, request, self.self_observer())?;
    if !policy {
      self.user_started.store(true, Ordering::SeqCst);
    }
    Ok(())
  }

  /// Detaches from the target handler. `policy == false` clears user intent
  /// and resets staged attributes back to their defaults; `policy == true`
  /// (a pause) leaves user intent as-is so a later resume restores it.
  pub fn stop(&self, policy: bool) {
    self.target.remove_listener(self.listener_id);
    if !policy {
      self.user_started.store(false, Ordering::SeqCst);
      let mut state = self.state.lock().unwrap();
      state.interval_ms = IDLE_FLOOR_INTERVAL_MS;
      state.latency_ms = 0;
    }
  }

  pub fn set_interval(&self, interval_ms: u32) {
    self.state.lock().unwrap().interval_ms = interval_ms;
    self.target.set_interval(self.listener_id, interval_ms);
  }

  pub fn set_max_batch_latency(&self, latency_ms: u32) {
    self.state.lock().unwrap().latency_ms = latency_ms;
    self.target.set_latency(self.listener_id, latency_ms);
  }

  /// A wakeup request against a sensor that doesn't support wakeup is
  /// accepted but downgraded to non-wakeup rather than rejected.
  pub fn set_wakeup(&self, wakeup: bool) {
    let effective = wakeup && self.target.info().wakeup_supported;
    if wakeup && !effective {
      warn!(
        "listener {} requested wakeup on non-wakeup sensor {}, downgrading",
        self.listener_id, self.target_sensor_uri
      );
    }
    self.state.lock().unwrap().wakeup = effective;
    self.target.set_wakeup(self.listener_id, effective);
  }

  pub fn delete_batch_latency(&self) {
    self.set_max_batch_latency(0);
  }

  pub fn set_passive_mode(&self, passive: bool) {
    self.state.lock().unwrap().passive = passive;
    if self.user_started.load(Ordering::SeqCst) {
      if let Err(e) = self.start(true) {
        warn!("listener {} failed to restart in passive mode: {}", self.listener_id, e);
      }
    }
  }

  pub fn set_axis_orientation(&self, orientation: AxisOrientation) {
    self.state.lock().unwrap().axis_orientation = orientation;
  }

  pub fn set_display_rotation(&self, degrees: u32) {
    self.state.lock().unwrap().display_rotation_deg = degrees;
  }

  /// Forces immediate delivery of the target's last cached sample,
  /// bypassing the fusion de-bounce (there is none on the listener side, so
  /// this is purely "ask for the cached value right now").
  pub fn flush(&self) {
    if let Some(event) = self.target.get_cached() {
      self.on_event(&event);
    }
  }

  pub fn get_data(&self) -> Option<SensorEvent> {
    self.target.get_cached()
  }

  fn next_frame_id(&self) -> u64 {
    let mut state = self.state.lock().unwrap();
    let id = state.next_frame_id;
    state.next_frame_id += 1;
    id
  }

  fn send_accuracy_event(&self, accuracy: i32) {
    let body = SensorEvent::new(self.listener_id, 0, crate::sensor::clock::now_us(), vec![]).with_accuracy(accuracy);
    let mut buf = Vec::new();
    if body.encode(&mut buf).is_err() {
      return;
    }
    let header = FrameHeader::new(self.next_frame_id(), CommandTag::ListenerAccEvent.to_wire(), buf.len() as u32);
    let _ = self.channel.send_frame(&header, &buf);
  }

  fn send_sample_event(&self, event: &SensorEvent) {
    let mut buf = Vec::new();
    if event.encode(&mut buf).is_err() {
      return;
    }
    let header = FrameHeader::new(self.next_frame_id(), CommandTag::ListenerEvent.to_wire(), buf.len() as u32);
    let _ = self.channel.send_frame(&header, &buf);
  }
}

impl SensorObserver for ListenerProxy {
  fn on_event(&self, event: &SensorEvent) {
    let mut event = event.clone();
    event.sensor_id = self.listener_id;

    let (axis_orientation, rotation_deg, accuracy_changed) = {
      let mut state = self.state.lock().unwrap();
      let changed = event.accuracy != state.last_accuracy;
      if changed {
        state.last_accuracy = event.accuracy;
      }
      (state.axis_orientation, state.display_rotation_deg, changed)
    };

    if axis_orientation == AxisOrientation::Display {
      axis::rotate_event_in_place(&mut event, rotation_deg);
    }

    if accuracy_changed {
      trace!("listener {} accuracy changed to {}", self.listener_id, event.accuracy);
      self.send_accuracy_event(event.accuracy);
      if event.accuracy == ACCURACY_BAD {
        trace!("listener {} accuracy dropped to BAD", self.listener_id);
      }
    }

    self.send_sample_event(&event);
  }
}

impl PolicyListener for ListenerProxy {
  fn on_policy_changed(&self, new_state: BitFlags<PausePolicy>) {
    if !self.user_started.load(Ordering::SeqCst) {
      return;
    }
    let mask = self.state.lock().unwrap().pause_policy_mask;
    if mask.is_empty() {
      return;
    }
    if !(new_state & mask).is_empty() {
      self.stop(true);
    } else if let Err(e) = self.start(true) {
      warn!("listener {} failed to resume after policy change: {}", self.listener_id, e);
    }
  }
}

impl ListenerProxy {
  pub fn set_pause_policy_mask(&self, mask: BitFlags<PausePolicy>) {
    self.state.lock().unwrap().pause_policy_mask = mask;
  }

  pub fn as_policy_listener(self: &Arc<Self>) -> Weak<dyn PolicyListener> {
    Arc::downgrade(self) as Weak<dyn PolicyListener>
  }
}
