//! A multi-reactor event dispatch library for non-blocking TCP services.
//!
//! One reactor accepts connections, a second dispatches per-connection
//! readiness on its own thread, and a fixed worker pool absorbs
//! CPU-bound frame processing. At most one thread manipulates a single
//! connection's I/O state at a time, while many connections make
//! progress in parallel.
//!
//! The pieces compose as follows:
//!
//! * [`Demultiplexer`] — waits on many handles at once, behind two
//!   interchangeable back-ends: a level-triggered scan over `poll(2)`
//!   and an edge-triggered `epoll(7)` ([`Backend`]).
//! * [`Reactor`] — couples a demultiplexer to a registry of
//!   [`EventHandler`]s and a cross-thread task queue, woken through an
//!   eventfd whenever another thread injects work.
//! * [`ConnHandler`] — the per-socket state machine: read/write
//!   buffers, newline framing, write-interest toggling, teardown.
//! * [`Acceptor`] — accepts sockets and registers connection handlers
//!   on the designated sub-reactor.
//! * [`WorkerPool`] / [`Service`] — where the application plugs in.
//!
//! # Example
//!
//! An echo server: frames arrive newline-delimited, workers hand each
//! frame back to the connection it came from.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::{Arc, Mutex};
//!
//! use relay_io::{Config, ConnHandler, Handle, Server, Service};
//!
//! #[derive(Default)]
//! struct Echo {
//!     clients: Mutex<HashMap<Handle, Arc<ConnHandler>>>,
//! }
//!
//! impl Service for Echo {
//!     fn on_connected(&self, conn: &Arc<ConnHandler>) {
//!         self.clients.lock().unwrap().insert(conn.handle(), conn.clone());
//!     }
//!
//!     fn on_disconnected(&self, handle: Handle) {
//!         self.clients.lock().unwrap().remove(&handle);
//!     }
//!
//!     fn process_message(&self, handle: Handle, frame: Vec<u8>) {
//!         if let Some(conn) = self.clients.lock().unwrap().get(&handle) {
//!             conn.send_message(&frame);
//!         }
//!     }
//! }
//!
//! fn main() -> std::io::Result<()> {
//!     let server = Server::bind(Config::default(), Arc::new(Echo::default()))?;
//!     server.run();
//!     Ok(())
//! }
//! ```

mod sys;

mod acceptor;
mod conn;
mod demux;
mod handle;
mod handler;
mod reactor;
mod ready;
mod server;
mod service;
mod wakeup;
mod workers;

pub use acceptor::Acceptor;

pub use conn::{ConnHandler, DELIMITER};

pub use demux::{Backend, Demultiplexer, EpollDemux, PollDemux};

pub use handle::Handle;

pub use handler::EventHandler;

pub use reactor::{Reactor, Remote, Task};

pub use ready::Ready;

pub use server::{Config, Server, DEFAULT_PORT};

pub use service::Service;

pub use wakeup::Wakeup;

pub use workers::WorkerPool;
