//! Ties the registry, reactor, dispatcher and policy monitor together into a
//! running daemon: two listening sockets, one poller thread servicing every
//! accepted channel, a ticker thread driving physical handlers, and a
//! dispatch thread fanning queued events out to listener proxies.

use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicBool, AtomicI32, Ordering},
    Arc, Mutex,
  },
  time::Duration,
};

use log::{debug, error, warn};
use mio::{Interest, Token};

use crate::{
  config::DaemonConfig,
  dispatcher::Dispatcher,
  error::FatalReason,
  policy::PolicyMonitor,
  reactor::poller::{Poller, WAKE_TOKEN},
  sensor::{clock::now_us, registry::Registry},
  transport::{handshake, Channel},
};

const COMMAND_LISTEN_TOKEN: Token = Token(0);
const EVENT_LISTEN_TOKEN: Token = Token(1);
const FIRST_CHANNEL_TOKEN: usize = 2;

/// The half of a client's channel pair still waiting for its sibling to
/// finish its own handshake.
enum PendingHalf {
  Command(Arc<Channel>),
  Event(Arc<Channel>),
}

enum ChannelRole {
  /// Accepted, handshake not yet received.
  Handshaking { is_command_side: bool },
  /// Handshaken, waiting for the sibling channel to show up.
  AwaitingPeer,
  /// Paired: this is the command half, owning the dispatcher.
  Command { dispatcher: Arc<Dispatcher> },
  /// Paired: this is the event half, read only for hang-up detection.
  Event,
}

struct ChannelSlot {
  channel: Arc<Channel>,
  role: ChannelRole,
}

/// The running daemon. Construct with [`Server::new`], then run
/// [`Server::run_poller_loop`], [`Server::run_ticker`] and
/// [`Server::run_dispatch_loop`] each on their own thread.
pub struct Server {
  registry: Arc<Registry>,
  policy_monitor: Arc<PolicyMonitor>,
  command_listener: Channel,
  event_listener: Channel,
  next_listener_id: Arc<AtomicI32>,
  shutting_down: Arc<AtomicBool>,
  poller: Mutex<Poller>,
}

impl Server {
  pub fn new(config: &DaemonConfig, registry: Arc<Registry>, policy_monitor: Arc<PolicyMonitor>) -> std::io::Result<Arc<Self>> {
    let mut command_listener = Channel::listen(&config.daemon.command_socket_path)?;
    let mut event_listener = Channel::listen(&config.daemon.event_socket_path)?;
    let poller = Poller::new(256)?;
    poller.registry().register(&mut command_listener, COMMAND_LISTEN_TOKEN, Interest::READABLE)?;
    poller.registry().register(&mut event_listener, EVENT_LISTEN_TOKEN, Interest::READABLE)?;
    Ok(Arc::new(Server {
      registry,
      policy_monitor,
      command_listener,
      event_listener,
      next_listener_id: Arc::new(AtomicI32::new(1)),
      shutting_down: Arc::new(AtomicBool::new(false)),
      poller: Mutex::new(poller),
    }))
  }

  pub fn registry(&self) -> &Arc<Registry> {
    &self.registry
  }

  /// Signals every loop owned by this server to stop; safe to call from any
  /// thread.
  pub fn shutdown(&self) {
    self.shutting_down.store(true, Ordering::SeqCst);
    self.registry.queue().close();
    let _ = self.poller.lock().unwrap().wake();
  }

  /// Drives the ticker that walks every running physical handler. Intended
  /// to run on its own thread.
  pub fn run_ticker(&self, tick_period: Duration) {
    while !self.shutting_down.load(Ordering::SeqCst) {
      self.registry.tick_all(now_us());
      std::thread::sleep(tick_period);
    }
  }

  /// Drains the shared event queue and fans each event out to its handler's
  /// attached observers. Intended to run on its own thread; returns once the
  /// queue is closed and drained.
  pub fn run_dispatch_loop(&self) {
    while let Some(queued) = self.registry.queue().pop() {
      if let Some(handler) = self.registry.get(&queued.handler_uri) {
        handler.notify_observers(&queued.event);
      }
    }
    debug!("dispatch loop exiting: queue closed");
  }

  /// The poller loop: accepts new channels, completes handshakes, pairs
  /// command and event halves by client id, and services command channels.
  /// Intended to run on its own thread; blocks until [`Server::shutdown`].
  pub fn run_poller_loop(&self) {
    let mut slots: HashMap<Token, ChannelSlot> = HashMap::new();
    let mut pending: HashMap<i32, PendingHalf> = HashMap::new();
    let mut next_token = FIRST_CHANNEL_TOKEN;

    loop {
      if self.shutting_down.load(Ordering::SeqCst) {
        break;
      }
      let ready = match self.poller.lock().unwrap().wait(Some(Duration::from_millis(200))) {
        Ok(r) => r,
        Err(e) => {
          error!("poller wait failed: {e}");
          continue;
        }
      };

      for (token, readable, _writable) in ready {
        if token == WAKE_TOKEN {
          continue;
        }
        if token == COMMAND_LISTEN_TOKEN {
          self.accept_loop(&self.command_listener, true, &mut slots, &mut next_token);
          continue;
        }
        if token == EVENT_LISTEN_TOKEN {
          self.accept_loop(&self.event_listener, false, &mut slots, &mut next_token);
          continue;
        }
        if readable {
          self.service_channel(token, &mut slots, &mut pending);
        }
      }
    }
  }

  fn accept_loop(&self, listener: &Channel, is_command_side: bool, slots: &mut HashMap<Token, ChannelSlot>, next_token: &mut usize) {
    loop {
      match listener.accept() {
        Ok(Some((mut channel, _addr))) => {
          let token = Token(*next_token);
          *next_token += 1;
          if let Err(e) = self.poller.lock().unwrap().registry().register(&mut channel, token, Interest::READABLE) {
            warn!("failed to register accepted channel: {e}");
            continue;
          }
          slots.insert(
            token,
            ChannelSlot {
              channel: Arc::new(channel),
              role: ChannelRole::Handshaking { is_command_side },
            },
          );
          debug!("accepted {} channel as {:?}", if is_command_side { "command" } else { "event" }, token);
        }
        Ok(None) => break,
        Err(e) => {
          warn!("accept failed: {e}");
          break;
        }
      }
    }
  }

  fn service_channel(&self, token: Token, slots: &mut HashMap<Token, ChannelSlot>, pending: &mut HashMap<i32, PendingHalf>) {
    let Some(slot) = slots.get(&token) else {
      return;
    };

    let is_command_side = match &slot.role {
      ChannelRole::Handshaking { is_command_side } => Some(*is_command_side),
      _ => None,
    };

    if let Some(is_command_side) = is_command_side {
      let channel = slot.channel.clone();
      match handshake::server_handshake(&channel) {
        Ok((_client_type, client_id)) => self.pair_channel(token, client_id, is_command_side, channel, slots, pending),
        Err(FatalReason::PeerHangUp) => {
          slots.remove(&token);
        }
        Err(e) => {
          warn!("handshake failed on {:?}: {e}", token);
          slots.remove(&token);
        }
      }
      return;
    }

    match &slot.role {
      ChannelRole::Command { dispatcher } => {
        let dispatcher = dispatcher.clone();
        let channel = slot.channel.clone();
        self.service_command_channel(token, &channel, &dispatcher, slots);
      }
      ChannelRole::Event | ChannelRole::AwaitingPeer => {
        let channel = slot.channel.clone();
        // Clients never send on the event channel after the handshake, nor
        // on a channel still awaiting its sibling; any readiness here is a
        // stray frame (ignored) or a hang-up (drop the slot).
        if channel.recv_frame().is_err() {
          slots.remove(&token);
        }
      }
      ChannelRole::Handshaking { .. } => unreachable!(),
    }
  }

  fn service_command_channel(&self, token: Token, channel: &Arc<Channel>, dispatcher: &Arc<Dispatcher>, slots: &mut HashMap<Token, ChannelSlot>) {
    match channel.recv_frame() {
      Ok(Some((header, body))) => match dispatcher.handle(&header, &body) {
        Ok((reply_type, reply_body)) => {
          let reply_header = crate::wire::header::FrameHeader::new(header.id, reply_type, reply_body.len() as u32);
          let _ = channel.send_frame(&reply_header, &reply_body);
        }
        Err(crate::error::ServerError::Recoverable(errno)) => {
          let reply_header = crate::wire::header::FrameHeader::new(header.id, header.type_tag, 0).with_err(errno.wire_value());
          let _ = channel.send_frame(&reply_header, &[]);
        }
        Err(crate::error::ServerError::Fatal(reason)) => {
          warn!("fatal error on command channel: {reason}");
          dispatcher.teardown();
          slots.remove(&token);
        }
      },
      Ok(None) => {}
      Err(FatalReason::PeerHangUp) => {
        dispatcher.teardown();
        slots.remove(&token);
      }
      Err(e) => {
        warn!("command channel error: {e}");
        dispatcher.teardown();
        slots.remove(&token);
      }
    }
  }

  /// Either completes pairing of a client's two channels (if its sibling
  /// already finished its handshake) or stashes this half as pending.
  fn pair_channel(
    &self,
    token: Token,
    client_id: i32,
    is_command_side: bool,
    channel: Arc<Channel>,
    slots: &mut HashMap<Token, ChannelSlot>,
    pending: &mut HashMap<i32, PendingHalf>,
  ) {
    let sibling = pending.remove(&client_id);
    match (is_command_side, sibling) {
      (true, Some(PendingHalf::Event(event_channel))) => {
        self.finish_pairing(token, channel, event_channel, slots);
      }
      (false, Some(PendingHalf::Command(command_channel))) => {
        // We were handed the event half's token; find the command slot's
        // token by scanning isn't needed since `finish_pairing` only needs
        // the two channels and updates both roles via the token map below.
        self.finish_pairing_event_first(token, channel, command_channel, slots);
      }
      (true, Some(PendingHalf::Command(_))) | (false, Some(PendingHalf::Event(_))) => {
        warn!("two {} channels arrived for client {client_id}, dropping the newer one", if is_command_side { "command" } else { "event" });
        slots.remove(&token);
      }
      (true, None) => {
        pending.insert(client_id, PendingHalf::Command(channel));
        slots.get_mut(&token).unwrap().role = ChannelRole::AwaitingPeer;
      }
      (false, None) => {
        pending.insert(client_id, PendingHalf::Event(channel));
        slots.get_mut(&token).unwrap().role = ChannelRole::AwaitingPeer;
      }
    }
  }

  fn finish_pairing(&self, command_token: Token, command_channel: Arc<Channel>, event_channel: Arc<Channel>, slots: &mut HashMap<Token, ChannelSlot>) {
    let dispatcher = Arc::new(Dispatcher::new(
      self.registry.clone(),
      self.policy_monitor.clone(),
      event_channel.clone(),
      self.next_listener_id.clone(),
    ));
    slots.get_mut(&command_token).unwrap().role = ChannelRole::Command { dispatcher };
    if let Some(event_token) = find_token_for_channel(slots, &event_channel) {
      slots.get_mut(&event_token).unwrap().role = ChannelRole::Event;
    }
    let _ = command_channel;
  }

  fn finish_pairing_event_first(&self, event_token: Token, event_channel: Arc<Channel>, command_channel: Arc<Channel>, slots: &mut HashMap<Token, ChannelSlot>) {
    let dispatcher = Arc::new(Dispatcher::new(
      self.registry.clone(),
      self.policy_monitor.clone(),
      event_channel.clone(),
      self.next_listener_id.clone(),
    ));
    slots.get_mut(&event_token).unwrap().role = ChannelRole::Event;
    if let Some(command_token) = find_token_for_channel(slots, &command_channel) {
      slots.get_mut(&command_token).unwrap().role = ChannelRole::Command { dispatcher };
    }
  }
}

fn find_token_for_channel(slots: &HashMap<Token, ChannelSlot>, channel: &Arc<Channel>) -> Option<Token> {
  slots
    .iter()
    .find(|(_, slot)| Arc::ptr_eq(&slot.channel, channel))
    .map(|(token, _)| *token)
}
