use std::cmp;
use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, POLLPRI};

use crate::handle::Handle;
use crate::ready::Ready;

use super::Demultiplexer;

/// The level-triggered scan back-end.
///
/// Keeps an ordered interest table; every `wait` snapshots the table into
/// a `pollfd` array and emits fired handles in ascending handle order.
pub struct PollDemux {
    interests: Mutex<BTreeMap<Handle, Ready>>,
}

impl PollDemux {
    pub fn new() -> PollDemux {
        PollDemux {
            interests: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for PollDemux {
    fn default() -> PollDemux {
        PollDemux::new()
    }
}

impl Demultiplexer for PollDemux {
    fn register(&self, handle: Handle, interest: Ready) -> io::Result<()> {
        let mut interests = self.interests.lock().unwrap();

        if interests.contains_key(&handle) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "handle already registered",
            ));
        }

        interests.insert(handle, interest);

        Ok(())
    }

    fn modify(&self, handle: Handle, interest: Ready) -> io::Result<()> {
        let mut interests = self.interests.lock().unwrap();

        match interests.get_mut(&handle) {
            Some(slot) => {
                *slot = interest;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "handle not registered",
            )),
        }
    }

    fn remove(&self, handle: Handle) -> io::Result<()> {
        let mut interests = self.interests.lock().unwrap();

        match interests.remove(&handle) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "handle not registered",
            )),
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> io::Result<Vec<(Handle, Ready)>> {
        let timeout = timeout
            .map(|to| cmp::min(to.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        // Snapshot in ascending handle order; the table may change while
        // the thread is blocked below.
        let mut pollfds: Vec<libc::pollfd> = {
            let interests = self.interests.lock().unwrap();
            interests
                .iter()
                .map(|(handle, interest)| libc::pollfd {
                    fd: handle.0,
                    events: interest_to_poll(*interest),
                    revents: 0,
                })
                .collect()
        };

        // With an empty table poll(2) still honours the timeout.
        let ret = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len().try_into().unwrap(),
                timeout,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut fired = Vec::with_capacity(ret as usize);

        if ret > 0 {
            for pollfd in &pollfds {
                let ready = poll_to_ready(pollfd.revents);
                if !ready.is_empty() {
                    fired.push((Handle(pollfd.fd), ready));
                }
            }
        }

        Ok(fired)
    }
}

fn interest_to_poll(interest: Ready) -> libc::c_short {
    let mut events = 0;

    if interest.is_readable() {
        events |= POLLIN;
    }

    if interest.is_writable() {
        events |= POLLOUT;
    }

    // POLLERR and POLLHUP are reported unconditionally.
    events
}

fn poll_to_ready(revents: libc::c_short) -> Ready {
    // An error condition supersedes plain readiness.
    if revents & (POLLERR | POLLHUP | POLLNVAL) != 0 {
        return Ready::error();
    }

    let mut ready = Ready::empty();

    if revents & (POLLIN | POLLPRI) != 0 {
        ready.insert(Ready::readable());
    }

    if revents & POLLOUT != 0 {
        ready.insert(Ready::writable());
    }

    ready
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn duplicate_register() {
        let demux = PollDemux::new();
        demux.register(Handle(1), Ready::readable()).unwrap();

        let err = demux.register(Handle(1), Ready::readable()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn unknown_handle() {
        let demux = PollDemux::new();

        let err = demux.modify(Handle(7), Ready::readable()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let err = demux.remove(Handle(7)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn error_supersedes() {
        assert_eq!(poll_to_ready(POLLIN | POLLERR), Ready::error());
        assert_eq!(poll_to_ready(POLLOUT | POLLHUP), Ready::error());
        assert_eq!(
            poll_to_ready(POLLIN | POLLOUT),
            Ready::readable() | Ready::writable()
        );
    }
}
