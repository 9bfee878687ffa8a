use std::io::{self, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, trace};

use crate::handle::Handle;
use crate::handler::EventHandler;
use crate::reactor::Remote;
use crate::ready::Ready;
use crate::service::Service;
use crate::workers::WorkerPool;

/// The framing delimiter separating records on the byte stream.
pub const DELIMITER: u8 = 0x0A;

const CHUNK_SIZE: usize = 4096;

/// Per-socket state machine for one accepted connection.
///
/// The reactor thread drains the socket into `read_buf`, splits complete
/// frames out, and hands each to the worker pool. Any thread may call
/// [`send_message`]; bytes land in `write_buf` under its own lock and a
/// deferred reactor task enables write interest. Once the reactor has
/// flushed the buffer, interest reverts to readable only.
///
/// [`send_message`]: ConnHandler::send_message
pub struct ConnHandler {
    stream: TcpStream,
    handle: Handle,
    reactor: Remote,
    pool: WorkerPool,
    service: Arc<dyn Service>,
    read_buf: Mutex<Vec<u8>>,
    write_buf: Mutex<Vec<u8>>,
    metadata: Mutex<Option<String>>,
    closing: AtomicBool,
}

impl ConnHandler {
    /// Wraps an accepted stream. The stream is switched to non-blocking
    /// and the service is told about the new connection.
    pub fn new(
        stream: TcpStream,
        reactor: Remote,
        pool: WorkerPool,
        service: Arc<dyn Service>,
    ) -> io::Result<Arc<ConnHandler>> {
        stream.set_nonblocking(true)?;
        let handle = Handle::of(&stream);

        let conn = Arc::new(ConnHandler {
            stream,
            handle,
            reactor,
            pool,
            service,
            read_buf: Mutex::new(Vec::new()),
            write_buf: Mutex::new(Vec::new()),
            metadata: Mutex::new(None),
            closing: AtomicBool::new(false),
        });

        conn.service.on_connected(&conn);

        Ok(conn)
    }

    /// The handle this connection is bound to.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Application metadata slot (opaque to the core).
    pub fn metadata(&self) -> Option<String> {
        self.metadata.lock().unwrap().clone()
    }

    pub fn set_metadata<S: Into<String>>(&self, value: S) {
        *self.metadata.lock().unwrap() = Some(value.into());
    }

    /// Bytes accepted by [`send_message`] but not yet handed to the
    /// kernel.
    ///
    /// [`send_message`]: ConnHandler::send_message
    pub fn pending_bytes(&self) -> usize {
        self.write_buf.lock().unwrap().len()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Appends `bytes` plus the framing delimiter to the write buffer
    /// and schedules write interest. Safe from any thread; concurrent
    /// calls append whole, in lock-acquisition order.
    pub fn send_message(&self, bytes: &[u8]) {
        if self.is_closing() {
            trace!("conn {:?}: send on closing connection ignored", self.handle);
            return;
        }

        {
            let mut write_buf = self.write_buf.lock().unwrap();
            write_buf.extend_from_slice(bytes);
            write_buf.push(DELIMITER);
        }

        self.request_interest(Ready::readable() | Ready::writable());
    }

    /// Interest changes always go through the reactor thread; the caller
    /// may be anywhere.
    fn request_interest(&self, interest: Ready) {
        let remote = self.reactor.clone();
        let handle = self.handle;

        self.reactor.queue_in_loop(move || {
            if let Err(err) = remote.modify(handle, interest) {
                debug!("conn {:?}: modify to {:?} failed: {}", handle, interest, err);
            }
        });
    }

    /// Transitions to closing and schedules removal. Only the first
    /// caller schedules; the destruction point stays unambiguous.
    fn teardown(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        let remote = self.reactor.clone();
        let handle = self.handle;

        self.reactor.queue_in_loop(move || {
            if let Err(err) = remote.remove(handle) {
                debug!("conn {:?}: removal failed: {}", handle, err);
            }
        });
    }

    fn enqueue_frames(&self) {
        let frames = split_frames(&mut self.read_buf.lock().unwrap());

        for frame in frames {
            trace!("conn {:?}: frame of {} bytes", self.handle, frame.len());

            let service = self.service.clone();
            let handle = self.handle;
            self.pool.enqueue(move || service.process_message(handle, frame));
        }
    }
}

/// Extracts the complete delimiter-terminated records, dropping empty
/// ones. Partial trailing data stays in `buf`.
fn split_frames(buf: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();

    while let Some(pos) = buf.iter().position(|&b| b == DELIMITER) {
        let mut frame: Vec<u8> = buf.drain(..=pos).collect();
        frame.pop();

        if !frame.is_empty() {
            frames.push(frame);
        }
    }

    frames
}

impl EventHandler for ConnHandler {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn on_readable(&self) {
        if self.is_closing() {
            return;
        }

        let mut chunk = [0u8; CHUNK_SIZE];

        loop {
            match (&self.stream).read(&mut chunk) {
                Ok(0) => {
                    debug!("conn {:?}: peer closed", self.handle);
                    self.on_error();
                    return;
                }
                Ok(n) => {
                    self.read_buf.lock().unwrap().extend_from_slice(&chunk[..n]);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("conn {:?}: recv failed: {}", self.handle, err);
                    self.on_error();
                    return;
                }
            }
        }

        self.enqueue_frames();
    }

    fn on_writable(&self) {
        if self.is_closing() {
            return;
        }

        let mut to_send = {
            let mut write_buf = self.write_buf.lock().unwrap();

            if write_buf.is_empty() {
                drop(write_buf);
                self.request_interest(Ready::readable());
                return;
            }

            mem::take(&mut *write_buf)
        };

        let mut sent = 0;
        while sent < to_send.len() {
            match (&self.stream).write(&to_send[sent..]) {
                Ok(n) => sent += n,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("conn {:?}: send failed: {}", self.handle, err);
                    self.on_error();
                    return;
                }
            }
        }

        if sent < to_send.len() {
            // Unsent bytes go back in front of anything appended since.
            let mut rest = to_send.split_off(sent);
            let mut write_buf = self.write_buf.lock().unwrap();
            rest.extend_from_slice(&write_buf);
            *write_buf = rest;
        } else {
            let write_buf = self.write_buf.lock().unwrap();
            if write_buf.is_empty() {
                drop(write_buf);
                self.request_interest(Ready::readable());
            }
        }
    }

    fn on_error(&self) {
        self.teardown();
    }

    fn on_close(&self) {
        self.closing.store(true, Ordering::Release);
        debug!("conn {:?}: closed", self.handle);

        self.service.on_disconnected(self.handle);

        // The descriptor itself closes when the last reference drops.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
