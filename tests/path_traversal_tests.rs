//! Scenario 4: a symlink that escapes the document root is rejected when
//! `follow_symlinks` is disabled.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::fs::symlink;
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

fn request(port: u16, raw: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    stream.write_all(raw.as_bytes()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[test]
fn symlink_escaping_root_is_forbidden() {
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("secret.txt"), b"classified").unwrap();

    let root = tempfile::tempdir().unwrap();
    symlink(outside.path().join("secret.txt"), root.path().join("link.txt")).unwrap();

    let mut config = Config::default();
    config.document_root = root.path().to_path_buf();
    config.follow_symlinks = false;
    config.binds = vec![BindSpec { addr: "127.0.0.1".parse().unwrap(), port: 18110, tls: false }];

    start_server(config);

    let response = request(18110, "GET /link.txt HTTP/1.0\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 403"), "unexpected response: {response}");
}
