use std::io;
use std::time::Duration;

use crate::handle::Handle;
use crate::ready::Ready;

mod epoll;
mod poll;

pub use epoll::EpollDemux;
pub use poll::PollDemux;

/// Selects the readiness back-end at reactor construction time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Level-triggered scan over the registered handles, via `poll(2)`.
    /// A handle stays ready across iterations until the condition clears.
    Poll,
    /// Edge-triggered kernel notification via `epoll(7)`. Handlers must
    /// drain completely on each notification.
    Epoll,
}

impl Default for Backend {
    fn default() -> Backend {
        Backend::Epoll
    }
}

/// Waits on many handles at once and reports which fired.
///
/// Both back-ends honour the same contract:
///
/// * [`register`] fails with `AlreadyExists` for a known handle.
/// * [`modify`] and [`remove`] fail with `NotFound` for an unknown one;
///   callers must not rely on a double `remove` succeeding.
/// * [`wait`] blocks until at least one handle is ready or the timeout
///   elapses (`None` waits indefinitely, `Some(Duration::ZERO)` polls)
///   and returns the fired `(handle, readiness)` pairs, empty on
///   timeout. Error readiness is always watched and, when it fires,
///   supersedes readable and writable and is reported alone.
///
/// [`register`]: Demultiplexer::register
/// [`modify`]: Demultiplexer::modify
/// [`remove`]: Demultiplexer::remove
/// [`wait`]: Demultiplexer::wait
pub trait Demultiplexer: Send + Sync {
    fn register(&self, handle: Handle, interest: Ready) -> io::Result<()>;

    fn modify(&self, handle: Handle, interest: Ready) -> io::Result<()>;

    fn remove(&self, handle: Handle) -> io::Result<()>;

    fn wait(&self, timeout: Option<Duration>) -> io::Result<Vec<(Handle, Ready)>>;
}

pub(crate) fn new_demultiplexer(backend: Backend) -> io::Result<Box<dyn Demultiplexer>> {
    match backend {
        Backend::Poll => Ok(Box::new(PollDemux::new())),
        Backend::Epoll => Ok(Box::new(EpollDemux::new()?)),
    }
}
