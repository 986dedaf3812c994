//! The handler registry: URI -> handler lookup, enumeration and lifecycle.
//!
//! Registration is closed after startup for physical sensors; fusion
//! registrations happen once, during daemon startup, from the compiled-in
//! blueprint table (see [`crate::sensor::fusion_algorithms::builtin_blueprints`]).
//! Lookups are hot on every client command, so the map is read-mostly
//! locked.

use std::{collections::HashMap, sync::Arc, sync::RwLock};

use crate::{
  reactor::queue::{EventQueue, QueuedEvent},
  sensor::{handler::SensorHandler, info::SensorInfo},
};

pub struct Registry {
  handlers: RwLock<HashMap<String, Arc<dyn SensorHandler>>>,
  queue: Arc<EventQueue>,
}

impl Registry {
  pub fn new(queue: Arc<EventQueue>) -> Arc<Self> {
    Arc::new(Registry {
      handlers: RwLock::new(HashMap::new()),
      queue,
    })
  }

  pub fn register(&self, handler: Arc<dyn SensorHandler>) {
    let uri = handler.info().uri.clone();
    self.handlers.write().unwrap().insert(uri, handler);
  }

  pub fn unregister(&self, uri: &str) {
    self.handlers.write().unwrap().remove(uri);
  }

  pub fn get(&self, uri: &str) -> Option<Arc<dyn SensorHandler>> {
    self.handlers.read().unwrap().get(uri).cloned()
  }

  pub fn enumerate(&self, type_tag: Option<u32>) -> Vec<Arc<dyn SensorHandler>> {
    self
      .handlers
      .read()
      .unwrap()
      .values()
      .filter(|h| type_tag.map(|t| h.info().type_tag == t).unwrap_or(true))
      .cloned()
      .collect()
  }

  pub fn list_infos(&self) -> Vec<SensorInfo> {
    self.handlers.read().unwrap().values().map(|h| h.info().clone()).collect()
  }

  pub fn queue(&self) -> &Arc<EventQueue> {
    &self.queue
  }

  pub fn push_event(&self, event: QueuedEvent) {
    self.queue.push(event);
  }

  /// Drives every registered handler's ticker once. Called in a loop by the
  /// reactor thread with a short sleep between iterations.
  pub fn tick_all(&self, now_us: u64) {
    let handlers: Vec<Arc<dyn SensorHandler>> = self.handlers.read().unwrap().values().cloned().collect();
    for handler in handlers {
      handler.tick(now_us, &self.queue);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sensor::{info::SensorInfo, physical::{PhysicalHandler, SyntheticShim}, clock::now_us};
  use crate::wire::sensor_event::SensorType;

  fn info(uri: &str) -> SensorInfo {
    SensorInfo {
      uri: uri.to_string(),
      type_tag: SensorType::Accelerometer as u32,
      vendor: "test".to_string(),
      name: "test".to_string(),
      min_range: -1.0,
      max_range: 1.0,
      resolution: 0.01,
      min_interval_ms: 5,
      fifo_count: 0,
      max_batch_count: 0,
      wakeup_supported: false,
      privilege: String::new(),
    }
  }

  #[test]
  fn register_and_lookup() {
    let queue = Arc::new(EventQueue::new(8));
    let registry = Registry::new(queue);
    let info = info("sensor://accel/0");
    let shim = SyntheticShim::new(&info.uri, SensorType::Accelerometer);
    let handler = Arc::new(PhysicalHandler::new(info.clone(), Box::new(shim)));
    registry.register(handler);
    assert!(registry.get(&info.uri).is_some());
    assert!(registry.get("sensor://unknown/0").is_none());
    assert_eq!(registry.list_infos().len(), 1);
    registry.tick_all(now_us());
  }
}
