use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use crate::handle::Handle;
use crate::sys::eventfd::EventFd;

/// Cross-thread signal that interrupts a blocked demultiplexer wait.
///
/// The reactor registers the wakeup handle for readable interest from the
/// outset; any thread may then call [`wake`] to force the next `wait` to
/// return, and the reactor [`drain`]s the accumulated signals, discarding
/// the value.
///
/// [`wake`]: Wakeup::wake
/// [`drain`]: Wakeup::drain
#[derive(Debug, Clone)]
pub struct Wakeup {
    inner: Arc<EventFd>,
}

impl Wakeup {
    pub fn new() -> io::Result<Wakeup> {
        let eventfd = EventFd::new()?;

        Ok(Wakeup {
            inner: Arc::new(eventfd),
        })
    }

    pub fn handle(&self) -> Handle {
        Handle(self.inner.as_raw_fd())
    }

    pub fn wake(&self) -> io::Result<()> {
        match self.inner.write(1) {
            Ok(_) => Ok(()),
            Err(e) => {
                // A saturated counter is as awake as it gets.
                if e.kind() == io::ErrorKind::WouldBlock {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    pub fn drain(&self) -> io::Result<()> {
        match self.inner.read() {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.kind() == io::ErrorKind::WouldBlock {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }
}

impl AsRawFd for Wakeup {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod test {
    use super::Wakeup;

    #[test]
    fn wake_from_another_thread() {
        let wakeup = Wakeup::new().unwrap();
        let remote = wakeup.clone();

        std::thread::spawn(move || remote.wake().unwrap())
            .join()
            .unwrap();

        wakeup.drain().unwrap();
        // Draining an already-drained wakeup is not an error.
        wakeup.drain().unwrap();
    }
}
