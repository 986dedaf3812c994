//! A client's subscription to one sensor: the reg-event record plus the
//! callbacks the deliverer thread invokes.

use std::sync::{
  atomic::{AtomicBool, AtomicI32, Ordering},
  Arc, Mutex,
};

use crate::{sensor::arbitration::ListenerId, wire::sensor_event::{SensorEvent, ACCURACY_BAD, ACCURACY_UNDEFINED}};

pub type SensorCallback = Arc<dyn Fn(&SensorEvent) + Send + Sync>;
pub type AccuracyCallback = Arc<dyn Fn(i32, u64) + Send + Sync>;
pub type CalibrationCallback = Arc<dyn Fn() + Send + Sync>;

struct Callbacks {
  data: Option<SensorCallback>,
  accuracy: Option<AccuracyCallback>,
  calibration: Option<CalibrationCallback>,
}

/// One `LISTENER_CONNECT`'d subscription. Dropping the last `Arc` does not
/// disconnect it server-side; call [`crate::client::manager::Client::disconnect`]
/// explicitly.
pub struct SensorHandle {
  listener_id: ListenerId,
  sensor_uri: String,
  started: AtomicBool,
  bad_accuracy: AtomicBool,
  last_accuracy: AtomicI32,
  callbacks: Mutex<Callbacks>,
}

impl SensorHandle {
  pub(crate) fn new(listener_id: ListenerId, sensor_uri: String) -> Self {
    SensorHandle {
      listener_id,
      sensor_uri,
      started: AtomicBool::new(false),
      bad_accuracy: AtomicBool::new(false),
      last_accuracy: AtomicI32::new(ACCURACY_UNDEFINED),
      callbacks: Mutex::new(Callbacks {
        data: None,
        accuracy: None,
        calibration: None,
      }),
    }
  }

  pub fn listener_id(&self) -> ListenerId {
    self.listener_id
  }

  pub fn sensor_uri(&self) -> &str {
    &self.sensor_uri
  }

  pub fn set_event_cb(&self, cb: SensorCallback) {
    self.callbacks.lock().unwrap().data = Some(cb);
  }

  pub fn set_accuracy_cb(&self, cb: AccuracyCallback) {
    self.callbacks.lock().unwrap().accuracy = Some(cb);
  }

  /// Fires once when accuracy drops to `BAD` for the first time since the
  /// last time it was good, mirroring the calibration-needed sidecar event.
  pub fn set_calibration_needed_cb(&self, cb: CalibrationCallback) {
    self.callbacks.lock().unwrap().calibration = Some(cb);
  }

  pub(crate) fn mark_started(&self, started: bool) {
    self.started.store(started, Ordering::SeqCst);
  }

  pub fn is_started(&self) -> bool {
    self.started.load(Ordering::SeqCst)
  }

  pub(crate) fn dispatch_accuracy(&self, accuracy: i32, timestamp_us: u64) {
    self.last_accuracy.store(accuracy, Ordering::SeqCst);
    let callbacks = self.callbacks.lock().unwrap();
    if let Some(cb) = &callbacks.accuracy {
      cb(accuracy, timestamp_us);
    }
    if accuracy == ACCURACY_BAD {
      if !self.bad_accuracy.swap(true, Ordering::SeqCst) {
        if let Some(cb) = &callbacks.calibration {
          cb();
        }
      }
    } else {
      self.bad_accuracy.store(false, Ordering::SeqCst);
    }
  }

  pub(crate) fn dispatch_sample(&self, event: &SensorEvent) {
    if !self.is_started() {
      return;
    }
    if let Some(cb) = &self.callbacks.lock().unwrap().data {
      cb(event);
    }
  }
}
