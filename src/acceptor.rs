use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use log::{debug, error, warn};

use crate::conn::ConnHandler;
use crate::handle::Handle;
use crate::handler::EventHandler;
use crate::reactor::Remote;
use crate::ready::Ready;
use crate::service::Service;
use crate::sys::socket;
use crate::workers::WorkerPool;

/// Accepts connections and registers a [`ConnHandler`] for each on the
/// designated sub-reactor.
///
/// The listening socket is opened with address reuse, bound to the
/// configured address, set non-blocking, and listening with a backlog of
/// 1024.
pub struct Acceptor {
    listener: TcpListener,
    handle: Handle,
    reactor: Remote,
    sub_reactor: Remote,
    pool: WorkerPool,
    service: Arc<dyn Service>,
}

impl Acceptor {
    /// `reactor` is the reactor this acceptor will be registered with;
    /// `sub_reactor` receives the accepted connections.
    pub fn bind(
        addr: &SocketAddr,
        reactor: Remote,
        sub_reactor: Remote,
        pool: WorkerPool,
        service: Arc<dyn Service>,
    ) -> io::Result<Acceptor> {
        let listener = socket::listener(addr)?;
        let handle = Handle::of(&listener);

        debug!("listening on {}", listener.local_addr()?);

        Ok(Acceptor {
            listener,
            handle,
            reactor,
            sub_reactor,
            pool,
            service,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl EventHandler for Acceptor {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn on_readable(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    debug!("accepted connection from {}", addr);

                    let conn = match ConnHandler::new(
                        stream,
                        self.sub_reactor.clone(),
                        self.pool.clone(),
                        self.service.clone(),
                    ) {
                        Ok(conn) => conn,
                        Err(err) => {
                            warn!("connection setup for {} failed: {}", addr, err);
                            continue;
                        }
                    };

                    if let Err(err) = self.sub_reactor.register(conn, Ready::readable()) {
                        warn!("registering connection from {} failed: {}", addr, err);
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref err) if err.raw_os_error() == Some(libc::ECONNABORTED) => {
                    // The peer gave up between SYN and accept.
                    continue;
                }
                Err(err) => {
                    // Keep draining: an edge-triggered back-end will not
                    // re-fire for peers already sitting in the backlog.
                    warn!("accept failed: {}", err);
                    continue;
                }
            }
        }
    }

    fn on_error(&self) {
        error!("listener {:?}: error condition, shutting down", self.handle);

        let remote = self.reactor.clone();
        let handle = self.handle;
        self.reactor.queue_in_loop(move || {
            let _ = remote.remove(handle);
        });
    }

    fn on_close(&self) {
        debug!("listener {:?}: closed", self.handle);
        // The listening socket closes when the acceptor drops.
    }
}
