use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use relay_io::{Backend, Config, Server};

mod util;

use util::{init, read_frame, wait_until, EchoService};

fn start_server(backend: Backend) -> (Arc<Server>, Arc<EchoService>, thread::JoinHandle<()>) {
    init();

    let service = Arc::new(EchoService::default());
    let config = Config {
        addr: "127.0.0.1:0".parse().unwrap(),
        backend,
        workers: 4,
    };

    let server = Arc::new(Server::bind(config, service.clone()).unwrap());
    let main_thread = thread::spawn({
        let server = server.clone();
        move || server.run()
    });

    (server, service, main_thread)
}

fn stop_server(server: Arc<Server>, main_thread: thread::JoinHandle<()>) {
    server.shutdown();
    main_thread.join().unwrap();
}

#[test]
fn accepts_a_connection() {
    for backend in [Backend::Poll, Backend::Epoll] {
        let (server, service, main_thread) = start_server(backend);

        // Only the wakeup channel is registered before anyone connects.
        assert_eq!(server.sub_reactor().len(), 1);

        let _client = TcpStream::connect(server.local_addr()).unwrap();

        wait_until(Duration::from_secs(5), "the connection to register", || {
            service.connected() == 1 && server.sub_reactor().len() == 2
        });

        stop_server(server, main_thread);
    }
}

#[test]
fn echoes_a_frame() {
    for backend in [Backend::Poll, Backend::Epoll] {
        let (server, _service, main_thread) = start_server(backend);

        let mut client = TcpStream::connect(server.local_addr()).unwrap();
        client.write_all(b"hello\n").unwrap();

        assert_eq!(read_frame(&mut client), b"echo: hello");

        stop_server(server, main_thread);
    }
}

#[test]
fn frames_split_across_writes_reassemble() {
    let (server, _service, main_thread) = start_server(Backend::Epoll);

    let mut client = TcpStream::connect(server.local_addr()).unwrap();

    // One frame delivered a byte at a time, plus empty records around it.
    client.write_all(b"\n").unwrap();
    for b in b"slow" {
        client.write_all(&[*b]).unwrap();
        thread::sleep(Duration::from_millis(10));
    }
    client.write_all(b"\n\n").unwrap();

    assert_eq!(read_frame(&mut client), b"echo: slow");

    stop_server(server, main_thread);
}

#[test]
fn sends_preserve_submission_order() {
    let (server, service, main_thread) = start_server(Backend::Epoll);

    let mut client = TcpStream::connect(server.local_addr()).unwrap();
    wait_until(Duration::from_secs(5), "the connection to register", || {
        service.connected() == 1
    });

    let conn = service.any_client().unwrap();
    conn.send_message(b"first");
    conn.send_message(b"second");
    conn.send_message(b"third");

    assert_eq!(read_frame(&mut client), b"first");
    assert_eq!(read_frame(&mut client), b"second");
    assert_eq!(read_frame(&mut client), b"third");

    stop_server(server, main_thread);
}

#[test]
fn peer_close_removes_the_handler() {
    for backend in [Backend::Poll, Backend::Epoll] {
        let (server, service, main_thread) = start_server(backend);

        let client = TcpStream::connect(server.local_addr()).unwrap();
        wait_until(Duration::from_secs(5), "the connection to register", || {
            service.connected() == 1
        });

        drop(client);

        wait_until(Duration::from_secs(5), "the disconnect to propagate", || {
            service.disconnected() == 1 && server.sub_reactor().len() == 1
        });

        // Exactly once: no second notification shows up later.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(service.disconnected(), 1);

        stop_server(server, main_thread);
    }
}

#[test]
fn broadcast_reaches_every_client_once() {
    for backend in [Backend::Poll, Backend::Epoll] {
        let (server, service, main_thread) = start_server(backend);

        let mut clients: Vec<TcpStream> = (0..10)
            .map(|_| TcpStream::connect(server.local_addr()).unwrap())
            .collect();

        wait_until(Duration::from_secs(5), "ten connections to register", || {
            service.connected() == 10
        });

        // A worker-style broadcast: handler state is only touched from
        // the reactor thread, via a queued task.
        let broadcast = service.clone();
        server.sub_reactor().queue_in_loop(move || {
            for conn in broadcast.clients.lock().unwrap().values() {
                conn.send_message(b"x");
            }
        });

        for client in &mut clients {
            assert_eq!(read_frame(client), b"x");

            // And nothing more.
            client
                .set_read_timeout(Some(Duration::from_millis(100)))
                .unwrap();
            let mut extra = [0u8; 1];
            match client.read(&mut extra) {
                Ok(n) => panic!("unexpected {} extra bytes", n),
                Err(err) => assert!(
                    err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut
                ),
            }
        }

        stop_server(server, main_thread);
    }
}

#[test]
fn large_send_to_a_stalled_peer_completes() {
    for backend in [Backend::Poll, Backend::Epoll] {
        let (server, service, main_thread) = start_server(backend);

        let mut client = TcpStream::connect(server.local_addr()).unwrap();
        wait_until(Duration::from_secs(5), "the connection to register", || {
            service.connected() == 1
        });

        let conn = service.any_client().unwrap();

        let payload: Vec<u8> = (0..8 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        conn.send_message(&payload);

        // The stalled peer cannot absorb it all; unsent bytes must be
        // re-queued rather than dropped.
        wait_until(Duration::from_secs(5), "the kernel buffers to fill", || {
            conn.pending_bytes() > 0
        });

        // Now drain from the client side and verify every byte, in order.
        let mut received = vec![0u8; payload.len() + 1];
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.read_exact(&mut received).unwrap();

        assert_eq!(&received[..payload.len()], &payload[..]);
        assert_eq!(received[payload.len()], b'\n');

        wait_until(Duration::from_secs(5), "the write buffer to empty", || {
            conn.pending_bytes() == 0
        });

        // Interest is back to readable-only: a fresh frame still echoes.
        client.write_all(b"ping\n").unwrap();
        assert_eq!(read_frame(&mut client), b"echo: ping");

        stop_server(server, main_thread);
    }
}
