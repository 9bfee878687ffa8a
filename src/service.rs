use std::sync::Arc;

use crate::conn::ConnHandler;
use crate::handle::Handle;

/// Application hooks observing connection lifecycle and inbound frames.
///
/// `on_connected` and `on_disconnected` run on reactor threads and must
/// not block. `process_message` runs on worker threads; implementations
/// route any results back through [`Remote::queue_in_loop`] or
/// [`ConnHandler::send_message`] — never by mutating reactor state
/// directly.
///
/// [`Remote::queue_in_loop`]: crate::Remote::queue_in_loop
/// [`ConnHandler::send_message`]: crate::ConnHandler::send_message
pub trait Service: Send + Sync {
    /// A connection handler has been constructed for a fresh socket.
    fn on_connected(&self, conn: &Arc<ConnHandler>);

    /// The connection has been removed from its reactor.
    fn on_disconnected(&self, handle: Handle);

    /// A complete frame arrived on `handle`. Invoked on a worker thread.
    fn process_message(&self, handle: Handle, frame: Vec<u8>);
}
