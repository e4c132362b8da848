//! Scenario 3: a Basic-auth realm challenges an unauthenticated request
//! and admits a correctly authenticated one.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use base64::Engine;
use embedhttpd::config::{AuthRealm, BindSpec, Config};
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

fn base_config(dir: &std::path::Path, port: u16) -> Config {
    let mut config = Config::default();
    config.document_root = dir.to_path_buf();
    config.binds = vec![BindSpec { addr: "127.0.0.1".parse().unwrap(), port, tls: false }];
    config.auth_realms.push(AuthRealm {
        url_prefix: "/private".to_string(),
        username: "admin".to_string(),
        password_entry: "secret".to_string(),
    });
    config
}

#[test]
fn missing_credentials_are_challenged() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("private")).unwrap();
    std::fs::write(dir.path().join("private/index.html"), b"top secret").unwrap();

    start_server(base_config(dir.path(), 18090));

    let response = request(18090, "GET /private/ HTTP/1.0\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 401"), "unexpected response: {response}");
    assert!(response.contains("WWW-Authenticate: Basic realm=\"Protected Area\""));
}

#[test]
fn correct_credentials_are_admitted() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("private")).unwrap();
    std::fs::write(dir.path().join("private/index.html"), b"top secret").unwrap();

    start_server(base_config(dir.path(), 18091));

    let encoded = base64::engine::general_purpose::STANDARD.encode("admin:secret");
    let response = request(
        18091,
        &format!("GET /private/ HTTP/1.0\r\nAuthorization: Basic {encoded}\r\n\r\n"),
    );
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");
}
