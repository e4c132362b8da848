//! Scenario 5: a CGI script that ignores SIGTERM is eventually SIGKILLed
//! and the client receives a synthetic 504.

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

fn write_hanging_script(dir: &std::path::Path) {
    let cgi_dir = dir.join("cgi-bin");
    std::fs::create_dir(&cgi_dir).unwrap();
    let script_path = cgi_dir.join("hang.sh");
    std::fs::write(&script_path, "#!/bin/sh\ntrap '' TERM\nsleep 30\n").unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();
}

#[test]
fn hung_script_is_killed_and_client_gets_504() {
    let dir = tempfile::tempdir().unwrap();
    write_hanging_script(dir.path());

    let mut config = Config::default();
    config.document_root = dir.path().to_path_buf();
    config.script_timeout_s = 1;
    config.binds = vec![BindSpec { addr: "127.0.0.1".parse().unwrap(), port: 18130, tls: false }];

    start_server(config);

    let mut stream = TcpStream::connect(("127.0.0.1", 18130)).expect("connect");
    stream.write_all(b"GET /cgi-bin/hang.sh HTTP/1.0\r\n\r\n").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    let response = String::from_utf8_lossy(&buf);
    assert!(response.starts_with("HTTP/1.1 504"), "unexpected response: {response}");
}
