use std::io;
use std::sync::Mutex;
use std::time::Duration;

use crate::handle::Handle;
use crate::ready::Ready;
use crate::sys::epoll::{Epoll, Events};

use super::Demultiplexer;

const INITIAL_EVENTS: usize = 1024;

/// The edge-triggered kernel-notification back-end.
///
/// Interest is recorded per handle inside the kernel object; a handle is
/// reported only at the transition to ready, so handlers must drain
/// completely on each notification.
pub struct EpollDemux {
    epoll: Epoll,
    events: Mutex<Events>,
}

impl EpollDemux {
    pub fn new() -> io::Result<EpollDemux> {
        Ok(EpollDemux {
            epoll: Epoll::new()?,
            events: Mutex::new(Events::with_capacity(INITIAL_EVENTS)),
        })
    }
}

impl Demultiplexer for EpollDemux {
    fn register(&self, handle: Handle, interest: Ready) -> io::Result<()> {
        // EEXIST surfaces as AlreadyExists through last_os_error.
        self.epoll.add(handle.0, interest)
    }

    fn modify(&self, handle: Handle, interest: Ready) -> io::Result<()> {
        // ENOENT surfaces as NotFound.
        self.epoll.modify(handle.0, interest)
    }

    fn remove(&self, handle: Handle) -> io::Result<()> {
        self.epoll.delete(handle.0)
    }

    fn wait(&self, timeout: Option<Duration>) -> io::Result<Vec<(Handle, Ready)>> {
        let mut events = self.events.lock().unwrap();

        if let Err(err) = self.epoll.wait(&mut events, timeout) {
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut fired = Vec::with_capacity(events.len());

        for i in 0..events.len() {
            if let Some(pair) = events.get(i) {
                fired.push(pair);
            }
        }

        // A saturated wait may have left events behind in the kernel.
        if events.len() == events.capacity() {
            events.grow();
        }

        Ok(fired)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::TcpListener;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn duplicate_register() {
        let demux = EpollDemux::new().unwrap();
        let sock = TcpListener::bind("127.0.0.1:0").unwrap();
        let handle = Handle(sock.as_raw_fd());

        demux.register(handle, Ready::readable()).unwrap();

        let err = demux.register(handle, Ready::readable()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn unknown_handle() {
        let demux = EpollDemux::new().unwrap();
        let sock = TcpListener::bind("127.0.0.1:0").unwrap();
        let handle = Handle(sock.as_raw_fd());

        let err = demux.modify(handle, Ready::readable()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let err = demux.remove(handle).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
