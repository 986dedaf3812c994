//! The client-side event listener: a reader thread that blocks on the event
//! channel and a deliverer thread that fans parsed frames out to handles.
//! One instance per connected [`crate::client::manager::Client`]; lazily
//! started on first `connect`, stopped cooperatively on disconnect.

use std::{
  collections::HashMap,
  sync::{
    mpsc,
    Arc, Condvar, Mutex, Weak,
  },
  thread::JoinHandle,
  time::Duration,
};

use log::{debug, error, warn};

use crate::{
  client::handle::SensorHandle,
  error::FatalReason,
  sensor::arbitration::ListenerId,
  transport::Channel,
  wire::{command::CommandTag, sensor_event::SensorEvent},
};

const THREAD_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadState {
  Terminate,
  Start,
  Stop,
}

struct ParsedFrame {
  listener_id: ListenerId,
  is_accuracy: bool,
  event: SensorEvent,
}

struct Shared {
  state: Mutex<ThreadState>,
  cond: Condvar,
}

/// Owns the event channel and the reader/deliverer thread pair for one
/// connected client.
pub struct EventListener {
  shared: Arc<Shared>,
  channel: Arc<Channel>,
  reader: Mutex<Option<JoinHandle<()>>>,
  deliverer: Mutex<Option<JoinHandle<()>>>,
}

impl EventListener {
  /// Starts the reader and deliverer threads over an already-handshaken
  /// event channel. `handles` is shared with the owning [`Client`] so newly
  /// registered handles become visible to the deliverer without restarting
  /// anything.
  ///
  /// [`Client`]: crate::client::manager::Client
  pub fn start(event_channel: Channel, handles: Arc<Mutex<HashMap<ListenerId, Weak<SensorHandle>>>>) -> Arc<Self> {
    let shared = Arc::new(Shared {
      state: Mutex::new(ThreadState::Start),
      cond: Condvar::new(),
    });
    let channel = Arc::new(event_channel);
    let (tx, rx) = mpsc::channel::<ParsedFrame>();

    let reader_shared = shared.clone();
    let reader_channel = channel.clone();
    let reader = std::thread::Builder::new()
      .name("sensord-client-reader".into())
      .spawn(move || Self::run_reader(reader_channel, reader_shared, tx))
      .expect("failed to spawn event listener reader thread");

    let deliverer_handles = handles.clone();
    let deliverer = std::thread::Builder::new()
      .name("sensord-client-deliverer".into())
      .spawn(move || Self::run_deliverer(rx, deliverer_handles))
      .expect("failed to spawn event listener deliverer thread");

    Arc::new(EventListener {
      shared,
      channel,
      reader: Mutex::new(Some(reader)),
      deliverer: Mutex::new(Some(deliverer)),
    })
  }

  fn run_reader(channel: Arc<Channel>, shared: Arc<Shared>, tx: mpsc::Sender<ParsedFrame>) {
    loop {
      {
        let state = shared.state.lock().unwrap();
        if *state != ThreadState::Start {
          break;
        }
      }

      match channel.recv_frame() {
        Ok(Some((header, body))) => {
          let is_accuracy = header.type_tag == CommandTag::ListenerAccEvent.to_wire();
          match SensorEvent::decode(&body) {
            Ok(event) => {
              let frame = ParsedFrame {
                listener_id: event.sensor_id,
                is_accuracy,
                event,
              };
              if tx.send(frame).is_err() {
                break; // deliverer already gone
              }
            }
            Err(e) => warn!("malformed event frame from daemon: {e}"),
          }
        }
        Ok(None) => continue, // should not happen once blocking, but harmless
        Err(FatalReason::PeerHangUp) => {
          debug!("event channel closed by daemon");
          break;
        }
        Err(e) => {
          error!("event channel error: {e}");
          break;
        }
      }
    }

    let mut state = shared.state.lock().unwrap();
    *state = ThreadState::Terminate;
    shared.cond.notify_all();
  }

  fn run_deliverer(rx: mpsc::Receiver<ParsedFrame>, handles: Arc<Mutex<HashMap<ListenerId, Weak<SensorHandle>>>>) {
    while let Ok(frame) = rx.recv() {
      let handle = handles.lock().unwrap().get(&frame.listener_id).and_then(Weak::upgrade);
      let Some(handle) = handle else {
        continue;
      };
      if frame.is_accuracy {
        handle.dispatch_accuracy(frame.event.accuracy, frame.event.timestamp_us);
      } else {
        handle.dispatch_sample(&frame.event);
      }
    }
  }

  /// Flips the thread state to `Stop` and waits up to two seconds for the
  /// reader to notice and terminate. The reader is parked in a blocking
  /// `recv` and only re-checks the thread state after that call returns, so
  /// a timeout shuts the channel down to force it to return before joining;
  /// otherwise a silent daemon could leave the reader blocked forever. Safe
  /// to call more than once.
  pub fn stop(&self) {
    {
      let mut state = self.shared.state.lock().unwrap();
      if *state == ThreadState::Terminate {
        return;
      }
      *state = ThreadState::Stop;
      let (_state, timeout_result) = self.shared.cond.wait_timeout_while(state, THREAD_STOP_TIMEOUT, |s| *s != ThreadState::Terminate).unwrap();
      if timeout_result.timed_out() {
        warn!("event listener reader thread did not terminate within {THREAD_STOP_TIMEOUT:?}, shutting down its channel");
        if let Err(e) = self.channel.shutdown() {
          warn!("failed to shut down event channel: {e}");
        }
      }
    }
    if let Some(handle) = self.reader.lock().unwrap().take() {
      let _ = handle.join();
    }
    if let Some(handle) = self.deliverer.lock().unwrap().take() {
      let _ = handle.join();
    }
  }
}

impl Drop for EventListener {
  fn drop(&mut self) {
    self.stop();
  }
}
