//! Daemon configuration.
//!
//! The original system loads its sensor catalog from XML; that loader is out
//! of scope here. Instead the daemon reads a small TOML file describing the
//! two socket paths and the set of synthetic physical sensors to register at
//! startup.

use std::{fs, path::Path};

use serde::Deserialize;
use thiserror::Error;

use crate::sensor::info::SensorInfo;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("could not read config file {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("could not parse config file: {0}")]
  Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
  pub daemon: DaemonSection,
  #[serde(rename = "sensor", default)]
  pub sensors: Vec<SensorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSection {
  pub command_socket_path: String,
  pub event_socket_path: String,
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

fn default_log_level() -> String {
  "info".to_string()
}

/// A single `[[sensor]]` table; the non-XML stand-in for the out-of-scope
/// device-config loader. Feeds [`SensorInfo`] construction at registry
/// population time.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
  pub uri: String,
  pub type_tag: u32,
  pub vendor: String,
  pub name: String,
  pub min_range: f32,
  pub max_range: f32,
  pub resolution: f32,
  pub min_interval_ms: u32,
  #[serde(default)]
  pub fifo_count: u32,
  #[serde(default)]
  pub max_batch_count: u32,
  #[serde(default)]
  pub wakeup_supported: bool,
  #[serde(default)]
  pub privilege: String,
}

impl SensorConfig {
  pub fn to_sensor_info(&self) -> SensorInfo {
    SensorInfo {
      uri: self.uri.clone(),
      type_tag: self.type_tag,
      vendor: self.vendor.clone(),
      name: self.name.clone(),
      min_range: self.min_range,
      max_range: self.max_range,
      resolution: self.resolution,
      min_interval_ms: self.min_interval_ms,
      fifo_count: self.fifo_count,
      max_batch_count: self.max_batch_count,
      wakeup_supported: self.wakeup_supported,
      privilege: self.privilege.clone(),
    }
  }
}

impl DaemonConfig {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.display().to_string(),
      source,
    })?;
    let config: DaemonConfig = toml::from_str(&text)?;
    Ok(config)
  }

  /// An in-memory configuration with a couple of synthetic sensors, used by
  /// unit and integration tests so they never touch the filesystem.
  pub fn default_for_tests() -> Self {
    DaemonConfig {
      daemon: DaemonSection {
        command_socket_path: "/tmp/sensord-test-command.sock".to_string(),
        event_socket_path: "/tmp/sensord-test-event.sock".to_string(),
        log_level: "debug".to_string(),
      },
      sensors: vec![
        SensorConfig {
          uri: "sensor://accel/0".to_string(),
          type_tag: crate::wire::sensor_event::SensorType::Accelerometer as u32,
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
        },
        SensorConfig {
          uri: "sensor://gyro/0".to_string(),
          type_tag: crate::wire::sensor_event::SensorType::Gyroscope as u32,
          vendor: "synthetic".to_string(),
          name: "synthetic-gyro".to_string(),
          min_range: -34.9,
          max_range: 34.9,
          resolution: 0.001,
          min_interval_ms: 5,
          fifo_count: 0,
          max_batch_count: 0,
          wakeup_supported: false,
          privilege: String::new(),
        },
        SensorConfig {
          uri: "sensor://geomagnetic/0".to_string(),
          type_tag: crate::wire::sensor_event::SensorType::Geomagnetic as u32,
          vendor: "synthetic".to_string(),
          name: "synthetic-geomagnetic".to_string(),
          min_range: -1200.0,
          max_range: 1200.0,
          resolution: 0.0625,
          min_interval_ms: 10,
          fifo_count: 0,
          max_batch_count: 0,
          wakeup_supported: false,
          privilege: String::new(),
        },
      ],
    }
  }
}
