use crate::handle::Handle;

/// A value bound to one handle, receiving readiness callbacks from the
/// reactor it is registered with.
///
/// Handlers own all per-connection state. A handler is registered with
/// exactly one reactor at a time; the reactor's registry holds the owning
/// reference, and removal from the registry is the sole legitimate
/// trigger of the handler's destruction. [`on_close`] is invoked exactly
/// once, before the reactor releases the handler.
///
/// Callbacks run on the reactor thread and must not block: the reactor
/// dispatches serially, so a blocking callback stalls every handle it
/// owns. Within one loop iteration, readable is delivered before
/// writable for the same handle, and an error condition supersedes both.
///
/// [`on_close`]: EventHandler::on_close
pub trait EventHandler: Send + Sync {
    /// The handle this handler is bound to.
    fn handle(&self) -> Handle;

    /// The handle became readable.
    fn on_readable(&self);

    /// The handle became writable.
    fn on_writable(&self) {}

    /// An error condition fired for the handle.
    fn on_error(&self) {}

    /// The handler has been removed from its reactor and is about to be
    /// released.
    fn on_close(&self) {}
}
