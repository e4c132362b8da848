//! Scenario 6: once a listener's `max_requests` slots are all occupied, a
//! new connection is left unaccepted until a slot frees up.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use embedhttpd::config::{BindSpec, Config};
use embedhttpd::Server;

fn start_server(config: Config) {
    let mut server = Server::new(config).expect("server should bind");
    thread::spawn(move || {
        let _ = server.run();
    });
    thread::sleep(Duration::from_millis(100));
}

#[test]
fn extra_connection_waits_for_a_free_slot() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"ok").unwrap();

    let mut config = Config::default();
    config.document_root = dir.path().to_path_buf();
    config.max_requests = 1;
    config.binds = vec![BindSpec { addr: "127.0.0.1".parse().unwrap(), port: 18120, tls: false }];

    start_server(config);

    // Occupy the single slot with a connection that never sends a
    // complete request, so the server holds it open indefinitely.
    let mut holder = TcpStream::connect(("127.0.0.1", 18120)).expect("connect holder");
    holder.write_all(b"GET / HTTP/1.0\r\n").unwrap();
    thread::sleep(Duration::from_millis(100));

    // A second connection is accepted by the kernel backlog but the
    // server will not `accept()` it until the slot frees, so no response
    // arrives within a short window.
    let mut second = TcpStream::connect(("127.0.0.1", 18120)).expect("connect second");
    second.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
    second.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    let mut buf = [0u8; 64];
    let starved = second.read(&mut buf);
    assert!(starved.is_err(), "second connection should not have been served yet");

    // Freeing the first connection lets the server accept the second.
    drop(holder);
    thread::sleep(Duration::from_millis(200));

    second.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut response = Vec::new();
    loop {
        match second.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                response.extend_from_slice(&buf[..n]);
                if response.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");
}
