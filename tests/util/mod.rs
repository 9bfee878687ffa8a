// Not all helpers are used by every test binary.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Read;
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use relay_io::{ConnHandler, Handle, Service};

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Spins until `cond` holds, panicking after `timeout`.
pub fn wait_until<F>(timeout: Duration, what: &str, mut cond: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;

    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Reads one newline-terminated frame from a blocking stream.
pub fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let mut frame = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match stream.read(&mut byte) {
            Ok(0) => panic!("peer closed before a complete frame arrived"),
            Ok(_) => {
                if byte[0] == b'\n' {
                    return frame;
                }
                frame.push(byte[0]);
            }
            Err(err) => panic!("read failed: {}", err),
        }
    }
}

/// Tracks connections and echoes every frame back prefixed with
/// `echo: `.
#[derive(Default)]
pub struct EchoService {
    pub clients: Mutex<HashMap<Handle, Arc<ConnHandler>>>,
    pub connected: AtomicUsize,
    pub disconnected: AtomicUsize,
}

impl EchoService {
    pub fn client(&self, handle: Handle) -> Option<Arc<ConnHandler>> {
        self.clients.lock().unwrap().get(&handle).cloned()
    }

    pub fn any_client(&self) -> Option<Arc<ConnHandler>> {
        self.clients.lock().unwrap().values().next().cloned()
    }

    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl Service for EchoService {
    fn on_connected(&self, conn: &Arc<ConnHandler>) {
        self.connected.fetch_add(1, Ordering::SeqCst);
        self.clients
            .lock()
            .unwrap()
            .insert(conn.handle(), conn.clone());
    }

    fn on_disconnected(&self, handle: Handle) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
        self.clients.lock().unwrap().remove(&handle);
    }

    fn process_message(&self, handle: Handle, frame: Vec<u8>) {
        if let Some(conn) = self.client(handle) {
            let mut reply = b"echo: ".to_vec();
            reply.extend_from_slice(&frame);
            conn.send_message(&reply);
        }
    }
}
