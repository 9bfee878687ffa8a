use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;

use log::debug;

use crate::acceptor::Acceptor;
use crate::demux::Backend;
use crate::reactor::Reactor;
use crate::ready::Ready;
use crate::service::Service;
use crate::workers::WorkerPool;

/// The port served when the configuration does not name one.
pub const DEFAULT_PORT: u16 = 9527;

#[derive(Clone, Debug)]
pub struct Config {
    /// Address the acceptor binds to.
    pub addr: SocketAddr,
    /// Demultiplexer back-end for both reactors.
    pub backend: Backend,
    /// Worker threads consuming the frame-processing queue.
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            backend: Backend::default(),
            workers: 4,
        }
    }
}

/// Wires the two reactors, the worker pool, and the acceptor together.
///
/// The sub-reactor runs on its own thread from construction; [`run`]
/// executes the main (accepting) reactor's loop on the calling thread
/// until [`quit`]. [`shutdown`] stops both loops, joins the sub-reactor
/// thread, and drains the worker pool.
///
/// [`run`]: Server::run
/// [`quit`]: Server::quit
/// [`shutdown`]: Server::shutdown
pub struct Server {
    main_reactor: Reactor,
    sub_reactor: Reactor,
    pool: WorkerPool,
    addr: SocketAddr,
    sub_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Server {
    pub fn bind(config: Config, service: Arc<dyn Service>) -> io::Result<Server> {
        let pool = WorkerPool::new(config.workers)?;

        let sub_reactor = Reactor::with_backend(config.backend)?;
        let sub_thread = thread::Builder::new().name("sub-reactor".into()).spawn({
            let sub_reactor = sub_reactor.clone();
            move || sub_reactor.event_loop()
        })?;

        let main_reactor = Reactor::with_backend(config.backend)?;
        let acceptor = Acceptor::bind(
            &config.addr,
            main_reactor.remote(),
            sub_reactor.remote(),
            pool.clone(),
            service,
        )?;
        let addr = acceptor.local_addr()?;

        main_reactor.register(Arc::new(acceptor), Ready::readable())?;

        debug!("server bound to {}", addr);

        Ok(Server {
            main_reactor,
            sub_reactor,
            pool,
            addr,
            sub_thread: Mutex::new(Some(sub_thread)),
        })
    }

    /// The address the acceptor actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn main_reactor(&self) -> &Reactor {
        &self.main_reactor
    }

    pub fn sub_reactor(&self) -> &Reactor {
        &self.sub_reactor
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Runs the main reactor loop on the calling thread until [`quit`].
    ///
    /// [`quit`]: Server::quit
    pub fn run(&self) {
        self.main_reactor.event_loop();
    }

    /// Requests exit of the main loop.
    pub fn quit(&self) {
        self.main_reactor.quit();
    }

    /// Stops both reactors and the pool, joining the sub-reactor thread.
    pub fn shutdown(&self) {
        self.main_reactor.quit();
        self.sub_reactor.quit();

        if let Some(join_handle) = self.sub_thread.lock().unwrap().take() {
            let _ = join_handle.join();
        }

        self.pool.shutdown();

        debug!("server shut down");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
