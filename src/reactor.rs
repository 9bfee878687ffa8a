use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use concurrent_queue::ConcurrentQueue;
use indexmap::IndexMap;
use log::{debug, error, trace, warn};

use crate::demux::{new_demultiplexer, Backend, Demultiplexer};
use crate::handle::Handle;
use crate::handler::EventHandler;
use crate::ready::Ready;
use crate::wakeup::Wakeup;

/// A deferred callable executed on the reactor thread.
pub type Task = Box<dyn FnOnce() + Send>;

/// An event loop coupling a demultiplexer to a handler registry and a
/// cross-thread task queue.
///
/// `Reactor` is a cheap clone; every clone refers to the same loop.
/// All operations are callable from any thread. Work that must touch
/// reactor-thread-owned state (handler fields, interest toggling) is
/// submitted through [`queue_in_loop`] and runs between loop iterations,
/// in submission order.
///
/// The reactor owns registered handlers: [`remove`] deregisters the
/// handle, invokes the handler's `on_close` exactly once, and releases
/// it. When the last clone of a reactor drops, every remaining handler
/// is closed the same way.
///
/// [`queue_in_loop`]: Reactor::queue_in_loop
/// [`remove`]: Reactor::remove
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<Inner>,
}

struct Inner {
    demux: Box<dyn Demultiplexer>,
    registry: Mutex<IndexMap<Handle, Arc<dyn EventHandler>>>,
    pending: ConcurrentQueue<Task>,
    wakeup: Wakeup,
    running: AtomicBool,
}

/// Drains the wakeup counter whenever it fires.
struct WakeupHandler {
    wakeup: Wakeup,
}

impl EventHandler for WakeupHandler {
    fn handle(&self) -> Handle {
        self.wakeup.handle()
    }

    fn on_readable(&self) {
        trace!("reactor: woken");
        if let Err(err) = self.wakeup.drain() {
            warn!("reactor: wakeup drain failed: {}", err);
        }
    }
}

impl Reactor {
    /// Creates a reactor over the default back-end.
    pub fn new() -> io::Result<Reactor> {
        Reactor::with_backend(Backend::default())
    }

    /// Creates a reactor over the given back-end, with its wakeup channel
    /// registered for readable interest from the outset.
    pub fn with_backend(backend: Backend) -> io::Result<Reactor> {
        let demux = new_demultiplexer(backend)?;
        let wakeup = Wakeup::new()?;

        let reactor = Reactor {
            inner: Arc::new(Inner {
                demux,
                registry: Mutex::new(IndexMap::new()),
                pending: ConcurrentQueue::unbounded(),
                wakeup: wakeup.clone(),
                running: AtomicBool::new(true),
            }),
        };

        reactor.register(Arc::new(WakeupHandler { wakeup }), Ready::readable())?;

        Ok(reactor)
    }

    /// A weak submission handle suitable for storing inside handlers
    /// registered with this reactor.
    pub fn remote(&self) -> Remote {
        Remote {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Inserts `handler` into the registry and the demultiplexer.
    ///
    /// Fails with `AlreadyExists` if a handler is already registered for
    /// the same handle; the existing registration is left untouched.
    pub fn register(&self, handler: Arc<dyn EventHandler>, interest: Ready) -> io::Result<()> {
        self.inner.register(handler, interest)
    }

    /// Replaces the interest set of an already-registered handle.
    ///
    /// Fails with `NotFound` for an unknown handle, without side effects.
    pub fn modify(&self, handle: Handle, interest: Ready) -> io::Result<()> {
        self.inner.modify(handle, interest)
    }

    /// Drops `handle` from the registry and the demultiplexer, invokes
    /// the handler's `on_close`, then releases the handler.
    pub fn remove(&self, handle: Handle) -> io::Result<()> {
        self.inner.remove(handle)
    }

    /// Whether a handler is registered for `handle`.
    pub fn contains(&self, handle: Handle) -> bool {
        self.inner.contains(handle)
    }

    /// Number of registered handlers, the wakeup channel included.
    pub fn len(&self) -> usize {
        self.inner.registry.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `task` to the pending queue and wakes the loop.
    pub fn queue_in_loop<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue_in_loop(Box::new(task));
    }

    /// Runs the event loop on the calling thread until [`quit`] is
    /// observed. Demultiplexer failures are logged and survived.
    ///
    /// [`quit`]: Reactor::quit
    pub fn event_loop(&self) {
        debug!("reactor: starting event loop");

        while self.inner.running.load(Ordering::Acquire) {
            self.inner.turn(None);
        }

        debug!("reactor: event loop finished");
    }

    /// Runs a single loop iteration with the given wait timeout.
    pub fn turn(&self, timeout: Option<Duration>) {
        self.inner.turn(timeout);
    }

    /// Requests loop exit. The loop finishes the current iteration,
    /// pending tasks included, then returns.
    pub fn quit(&self) {
        self.inner.quit();
    }
}

impl Inner {
    fn register(&self, handler: Arc<dyn EventHandler>, interest: Ready) -> io::Result<()> {
        let handle = handler.handle();
        let mut registry = self.registry.lock().unwrap();

        if registry.contains_key(&handle) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a handler is already registered for this handle",
            ));
        }

        self.demux.register(handle, interest)?;
        registry.insert(handle, handler);
        drop(registry);

        debug!("reactor: registered {:?} for {:?}", handle, interest);

        // A scan back-end blocked in wait() must rebuild its snapshot.
        let _ = self.wakeup.wake();

        Ok(())
    }

    fn modify(&self, handle: Handle, interest: Ready) -> io::Result<()> {
        let registry = self.registry.lock().unwrap();

        if !registry.contains_key(&handle) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "handle not registered",
            ));
        }

        self.demux.modify(handle, interest)?;
        drop(registry);

        trace!("reactor: modified {:?} to {:?}", handle, interest);
        let _ = self.wakeup.wake();

        Ok(())
    }

    fn remove(&self, handle: Handle) -> io::Result<()> {
        let handler = {
            let mut registry = self.registry.lock().unwrap();
            match registry.swap_remove(&handle) {
                Some(handler) => {
                    if let Err(err) = self.demux.remove(handle) {
                        warn!("reactor: demultiplexer remove for {:?} failed: {}", handle, err);
                    }
                    handler
                }
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        "handle not registered",
                    ))
                }
            }
        };

        // The registry lock is released before the close callback so the
        // callback may call back into the reactor.
        handler.on_close();
        drop(handler);

        debug!("reactor: removed {:?}", handle);
        let _ = self.wakeup.wake();

        Ok(())
    }

    fn contains(&self, handle: Handle) -> bool {
        self.registry.lock().unwrap().contains_key(&handle)
    }

    fn queue_in_loop(&self, task: Task) {
        if self.pending.push(task).is_err() {
            debug!("reactor: shutting down, task dropped");
            return;
        }

        if let Err(err) = self.wakeup.wake() {
            warn!("reactor: wakeup signal failed: {}", err);
        }
    }

    fn quit(&self) {
        self.running.store(false, Ordering::Release);

        if let Err(err) = self.wakeup.wake() {
            warn!("reactor: wakeup signal failed: {}", err);
        }
    }

    fn turn(&self, timeout: Option<Duration>) {
        let fired = match self.demux.wait(timeout) {
            Ok(fired) => fired,
            Err(err) => {
                error!("reactor: demultiplexer wait failed: {}", err);
                Vec::new()
            }
        };

        self.dispatch(fired);
        self.run_pending_tasks();
    }

    fn dispatch(&self, fired: Vec<(Handle, Ready)>) {
        if fired.is_empty() {
            return;
        }

        // Resolve every pair up front so a callback that schedules its
        // own removal cannot invalidate the iteration.
        let resolved: Vec<(Arc<dyn EventHandler>, Ready)> = {
            let registry = self.registry.lock().unwrap();
            fired
                .into_iter()
                .filter_map(|(handle, ready)| registry.get(&handle).map(|h| (h.clone(), ready)))
                .collect()
        };

        for (handler, ready) in resolved {
            let handle = handler.handle();
            trace!("reactor: dispatch {:?} on {:?}", ready, handle);

            if ready.is_error() {
                handler.on_error();
                continue;
            }

            if ready.is_readable() {
                handler.on_readable();
            }

            if ready.is_writable() {
                // The readable callback may have torn this handle down.
                if ready.is_readable() && !self.contains(handle) {
                    continue;
                }
                handler.on_writable();
            }
        }
    }

    fn run_pending_tasks(&self) {
        // Length snapshot: tasks enqueued while draining defer to the
        // next iteration.
        let n = self.pending.len();
        if n == 0 {
            return;
        }

        trace!("reactor: executing {} pending tasks", n);

        for _ in 0..n {
            match self.pending.pop() {
                Ok(task) => task(),
                Err(_) => break,
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.pending.close();

        let registry = self.registry.get_mut().unwrap();
        for (handle, handler) in registry.drain(..) {
            let _ = self.demux.remove(handle);
            handler.on_close();
        }
    }
}

/// A non-owning submission handle to a [`Reactor`].
///
/// Handlers registered with a reactor are owned by its registry; holding
/// a full `Reactor` clone inside such a handler would cycle the
/// ownership. `Remote` carries a weak reference instead: once the
/// reactor is gone every call becomes a logged no-op.
#[derive(Clone)]
pub struct Remote {
    inner: Weak<Inner>,
}

impl Remote {
    pub fn queue_in_loop<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.inner.upgrade() {
            Some(inner) => inner.queue_in_loop(Box::new(task)),
            None => debug!("reactor is gone, task dropped"),
        }
    }

    pub fn register(&self, handler: Arc<dyn EventHandler>, interest: Ready) -> io::Result<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.register(handler, interest),
            None => {
                debug!("reactor is gone, register dropped");
                Ok(())
            }
        }
    }

    pub fn modify(&self, handle: Handle, interest: Ready) -> io::Result<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.modify(handle, interest),
            None => {
                debug!("reactor is gone, modify dropped");
                Ok(())
            }
        }
    }

    pub fn remove(&self, handle: Handle) -> io::Result<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.remove(handle),
            None => {
                debug!("reactor is gone, remove dropped");
                Ok(())
            }
        }
    }

    pub fn quit(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.quit();
        }
    }
}
