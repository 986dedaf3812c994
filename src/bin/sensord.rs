//! Daemon entry point: loads configuration, builds the sensor registry, and
//! runs the server's reactor, ticker and dispatch loops until killed.

use std::{sync::Arc, time::Duration};

use log::{error, info};
use sensord::{
  config::DaemonConfig,
  policy::PolicyMonitor,
  reactor::queue::EventQueue,
  sensor::{
    fusion::FusionHandler,
    fusion_algorithms::builtin_blueprints,
    physical::{PhysicalHandler, SyntheticShim},
    registry::Registry,
  },
  server::Server,
  wire::sensor_event::SensorType,
};

const EVENT_QUEUE_CAPACITY: usize = 256;
const TICK_PERIOD: Duration = Duration::from_millis(2);

fn init_logging(level: &str) {
  use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
  };

  let level = level.parse().unwrap_or(log::LevelFilter::Info);
  let stdout = ConsoleAppender::builder()
    .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%dT%H:%M:%S%.3f)} {l} [{T}] {m}{n}")))
    .build();
  let config = log4rs::Config::builder()
    .appender(Appender::builder().build("stdout", Box::new(stdout)))
    .build(Root::builder().appender("stdout").build(level))
    .expect("logging configuration is static and always valid");
  let _ = log4rs::init_config(config);
}

fn build_registry(config: &DaemonConfig) -> Arc<Registry> {
  let queue = Arc::new(EventQueue::new(EVENT_QUEUE_CAPACITY));
  let registry = Registry::new(queue);

  for sensor in &config.sensors {
    let info = sensor.to_sensor_info();
    let Some(sensor_type) = SensorType::from_tag(info.type_tag) else {
      error!("skipping configured sensor {} with unknown type_tag {}", info.uri, info.type_tag);
      continue;
    };
    let shim = SyntheticShim::new(&info.uri, sensor_type);
    registry.register(Arc::new(PhysicalHandler::new(info, Box::new(shim))));
  }

  // Fusion handlers are assigned negative listener ids on their upstreams so
  // they never collide with the positive, server-assigned ids real clients
  // receive from `ListenerConnect`.
  let mut next_fusion_listener_id = -1i32;
  for blueprint in builtin_blueprints() {
    if registry.get(blueprint.uri).is_some() {
      continue;
    }
    let missing_upstream = blueprint.upstream_uris.iter().find(|uri| registry.get(uri).is_none());
    if let Some(missing) = missing_upstream {
      info!("skipping fusion sensor {} (upstream {} not registered)", blueprint.uri, missing);
      continue;
    }
    let info = sensord::sensor::info::SensorInfo {
      uri: blueprint.uri.to_string(),
      type_tag: blueprint.type_tag,
      vendor: "sensord".to_string(),
      name: blueprint.name.to_string(),
      min_range: 0.0,
      max_range: 0.0,
      resolution: 0.0,
      min_interval_ms: sensord::sensor::info::IDLE_FLOOR_INTERVAL_MS,
      fifo_count: 0,
      max_batch_count: 0,
      wakeup_supported: false,
      privilege: String::new(),
    };
    let upstream_uris = blueprint.upstream_uris.iter().map(|u| u.to_string()).collect();
    let handler = FusionHandler::new_in_registry(&registry, info, upstream_uris, next_fusion_listener_id, (blueprint.make)());
    next_fusion_listener_id -= 1;
    registry.register(handler);
  }

  registry
}

fn main() {
  let config_path = std::env::args().nth(1).unwrap_or_else(|| "/etc/sensord/sensord.toml".to_string());
  let config = match DaemonConfig::load(&config_path) {
    Ok(config) => config,
    Err(e) => {
      eprintln!("failed to load config from {config_path}: {e}");
      std::process::exit(1);
    }
  };

  init_logging(&config.daemon.log_level);
  info!("starting sensord with config from {config_path}");

  let registry = build_registry(&config);
  let policy_monitor = PolicyMonitor::new();

  let server = match Server::new(&config, registry, policy_monitor) {
    Ok(server) => server,
    Err(e) => {
      error!("failed to bind listening sockets: {e}");
      std::process::exit(1);
    }
  };

  {
    let server = server.clone();
    std::thread::Builder::new()
      .name("sensord-ticker".into())
      .spawn(move || server.run_ticker(TICK_PERIOD))
      .expect("failed to spawn ticker thread");
  }
  {
    let server = server.clone();
    std::thread::Builder::new()
      .name("sensord-dispatch".into())
      .spawn(move || server.run_dispatch_loop())
      .expect("failed to spawn dispatch thread");
  }

  info!("listening on {} and {}", config.daemon.command_socket_path, config.daemon.event_socket_path);
  server.run_poller_loop();
}
