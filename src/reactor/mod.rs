//! The event queue and the mio-based poller that drives the server's
//! channel I/O.

pub mod poller;
pub mod queue;

pub use poller::Poller;
pub use queue::{EventQueue, QueuedEvent};
