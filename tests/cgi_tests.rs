//! Scenario 2: a POST to a CGI script echoes request headers and body
//! back through the gateway.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::fs::PermissionsExt;
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

fn request(port: u16, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    stream.write_all(raw).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn write_script(dir: &std::path::Path) -> std::path::PathBuf {
    let cgi_dir = dir.join("cgi-bin");
    std::fs::create_dir(&cgi_dir).unwrap();
    let script_path = cgi_dir.join("echo.sh");
    std::fs::write(
        &script_path,
        "#!/bin/sh\necho \"Content-Type: text/plain\"\necho\ncat\n",
    )
    .unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();
    script_path
}

#[test]
fn echoes_request_body_through_cgi() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path());

    let mut config = Config::default();
    config.document_root = dir.path().to_path_buf();
    config.binds = vec![BindSpec { addr: "127.0.0.1".parse().unwrap(), port: 18100, tls: false }];

    start_server(config);

    let body = b"hello from client";
    let raw = format!(
        "POST /cgi-bin/echo.sh HTTP/1.0\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    let mut payload = raw.into_bytes();
    payload.extend_from_slice(body);

    let response = request(18100, &payload);
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");
    assert!(response.contains("Content-Type: text/plain"));
    assert!(response.ends_with("hello from client"), "body missing: {response}");
}
