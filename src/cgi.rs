//! CGI/1.1 gateway: spawns a child process per request, plumbs its
//! stdin/stdout through the event loop via a `UnixStream` pair, and
//! enforces the script timeout / SIGTERM-then-SIGKILL escalation.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::process::{Child, Command, Stdio};
use std::time::Instant;

use mio::net::UnixStream;

use crate::config::Config;
use crate::http::HttpRequest;
use crate::path::PathInfo;

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[derive(Debug, PartialEq, Eq)]
pub enum CgiParseState {
    Headers,
    Body,
}

/// A live CGI child and its two pipe ends, registered with the event
/// loop under their own tokens (tracked by the caller via `stdin_token`/
/// `stdout_token`).
pub struct CgiChild {
    pub child: Child,
    pub stdin: Option<UnixStream>,
    pub stdout: UnixStream,
    pub parse_state: CgiParseState,
    pub header_buf: Vec<u8>,
    pub spawned_at: Instant,
    pub sigterm_sent: bool,
    pub headers_sent: bool,
    pub status: u16,
    /// Bytes of body still owed to the client, if the script declared a
    /// `Content-Length`. `None` means pass through unbounded, delimited
    /// by the child closing its stdout.
    pub body_remaining: Option<u64>,
}

pub fn spawn(
    config: &Config,
    request: &HttpRequest,
    path: &PathInfo,
    peer: SocketAddr,
    local: SocketAddr,
    is_tls: bool,
) -> std::io::Result<CgiChild> {
    let (server_stdin, child_stdin) = std::os::unix::net::UnixStream::pair()?;
    let (child_stdout, server_stdout) = std::os::unix::net::UnixStream::pair()?;

    server_stdin.set_nonblocking(true)?;
    server_stdout.set_nonblocking(true)?;

    let extension = path.phys.extension().and_then(|e| e.to_str()).map(|e| format!(".{e}"));
    let interpreter = extension.and_then(|e| config.interpreter_for(&e));

    let mut cmd = match interpreter {
        Some(interp) => {
            let mut c = Command::new(&interp.binary);
            c.arg(&path.phys);
            c
        }
        None => Command::new(&path.phys),
    };

    if let Some(dir) = path.phys.parent() {
        cmd.current_dir(dir);
    }

    for (key, value) in build_env(config, request, path, peer, local, is_tls) {
        cmd.env(key, value);
    }

    // `UnixStream` has no `From` impl for `Stdio`; hand the raw fd across
    // instead, same as the reference daemon's direct fd wiring.
    cmd.stdin(unsafe { Stdio::from_raw_fd(child_stdin.into_raw_fd()) });
    cmd.stdout(unsafe { Stdio::from_raw_fd(child_stdout.into_raw_fd()) });
    cmd.stderr(Stdio::inherit());

    let child = cmd.spawn()?;

    Ok(CgiChild {
        child,
        stdin: Some(UnixStream::from_std(server_stdin)),
        stdout: UnixStream::from_std(server_stdout),
        parse_state: CgiParseState::Headers,
        header_buf: Vec::new(),
        spawned_at: Instant::now(),
        sigterm_sent: false,
        headers_sent: false,
        status: 200,
        body_remaining: None,
    })
}

pub fn build_env(
    config: &Config,
    request: &HttpRequest,
    path: &PathInfo,
    peer: SocketAddr,
    local: SocketAddr,
    is_tls: bool,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    let (url_path, query) = crate::http::request::split_url(&request.url);

    env.insert("GATEWAY_INTERFACE".into(), "CGI/1.1".into());
    env.insert("SERVER_PROTOCOL".into(), request.version.as_str().to_string());
    env.insert("SERVER_SOFTWARE".into(), "embedhttpd".into());
    env.insert("REQUEST_METHOD".into(), request.method.as_str().to_string());
    env.insert("REQUEST_URI".into(), request.url.clone());
    env.insert("QUERY_STRING".into(), query.unwrap_or("").to_string());
    env.insert("SCRIPT_NAME".into(), url_path.to_string());
    env.insert("SCRIPT_FILENAME".into(), path.phys.display().to_string());
    env.insert("PATH_INFO".into(), url_path.to_string());
    env.insert("SERVER_NAME".into(), local.ip().to_string());
    env.insert("SERVER_PORT".into(), local.port().to_string());
    env.insert("REMOTE_ADDR".into(), peer.ip().to_string());
    env.insert("REMOTE_PORT".into(), peer.port().to_string());
    env.insert("REDIRECT_STATUS".into(), request.redirect_status.to_string());
    if is_tls {
        env.insert("HTTPS".into(), "on".into());
    }

    if let Some(ct) = request.header("content-type") {
        env.insert("CONTENT_TYPE".into(), ct.to_string());
    }
    if let Some(cl) = request.header("content-length") {
        env.insert("CONTENT_LENGTH".into(), cl.to_string());
    }

    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("content-type") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        let key = format!("HTTP_{}", name.to_uppercase().replace('-', "_"));
        env.insert(key, value.clone());
    }

    let _ = config; // reserved for future per-deployment env additions
    env
}

/// Feeds freshly-read CGI stdout bytes through the header/body state
/// machine, appending client-facing bytes to `out`. The body is passed
/// through unchanged: if the script declared a `Content-Length`, output
/// stops once that many bytes have been forwarded; otherwise everything
/// is forwarded until the child closes its end.
pub fn process_stdout(child: &mut CgiChild, new_data: &[u8], out: &mut Vec<u8>) {
    match child.parse_state {
        CgiParseState::Headers => {
            child.header_buf.extend_from_slice(new_data);
            let terminator = find_subsequence(&child.header_buf, b"\r\n\r\n")
                .map(|p| (p, 4))
                .or_else(|| find_subsequence(&child.header_buf, b"\n\n").map(|p| (p, 2)));

            if let Some((pos, delim_len)) = terminator {
                let header_bytes = child.header_buf[..pos].to_vec();
                let body_start = child.header_buf[pos + delim_len..].to_vec();
                let (status, headers, content_length) = parse_headers(&header_bytes);
                child.status = status;
                child.body_remaining = content_length;
                child.parse_state = CgiParseState::Body;

                let mut head = format!("HTTP/1.1 {} {}\r\n", status, crate::http::response::reason_phrase(status));
                for (k, v) in &headers {
                    head.push_str(&format!("{k}: {v}\r\n"));
                }
                head.push_str("\r\n");
                out.extend_from_slice(head.as_bytes());
                child.headers_sent = true;

                if !body_start.is_empty() {
                    push_body(&mut child.body_remaining, out, &body_start);
                }
            }
        }
        CgiParseState::Body => push_body(&mut child.body_remaining, out, new_data),
    }
}

/// Appends `data` to `out`, truncating at `remaining` when it is bounded
/// by a declared `Content-Length` and decrementing it as bytes are spent.
fn push_body(remaining: &mut Option<u64>, out: &mut Vec<u8>, data: &[u8]) {
    match remaining {
        Some(left) => {
            let take = (*left).min(data.len() as u64) as usize;
            out.extend_from_slice(&data[..take]);
            *left -= take as u64;
        }
        None => out.extend_from_slice(data),
    }
}

fn parse_headers(bytes: &[u8]) -> (u16, Vec<(String, String)>, Option<u64>) {
    let mut status = 200;
    let mut headers = Vec::new();
    let mut content_length = None;
    for line in String::from_utf8_lossy(bytes).lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim();
        let value = value.trim().to_string();
        if key.eq_ignore_ascii_case("status") {
            status = value.split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(200);
        } else if key.eq_ignore_ascii_case("location") {
            headers.push(("Location".to_string(), value));
            status = 302;
        } else {
            if key.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().ok();
            }
            headers.push((key.to_string(), value));
        }
    }
    (status, headers, content_length)
}

/// Non-blocking single read from the child's stdout into `out`. Returns
/// `Ok(true)` if the child closed its end (EOF).
pub fn pump_stdout(child: &mut CgiChild, out: &mut Vec<u8>) -> std::io::Result<bool> {
    let mut buf = [0u8; 4096];
    loop {
        match child.stdout.read(&mut buf) {
            Ok(0) => return Ok(true),
            Ok(n) => process_stdout(child, &buf[..n], out),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }
    }
}

/// Non-blocking drain of `stdin_buf` into the child's stdin, closing the
/// pipe once `body_done && stdin_buf.is_empty()`.
pub fn pump_stdin(child: &mut CgiChild, stdin_buf: &mut Vec<u8>, body_done: bool) -> std::io::Result<()> {
    if let Some(pipe) = child.stdin.as_mut() {
        while !stdin_buf.is_empty() {
            match pipe.write(stdin_buf) {
                Ok(0) => break,
                Ok(n) => {
                    stdin_buf.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        if body_done && stdin_buf.is_empty() {
            child.stdin = None; // dropping closes the pipe: signals EOF to the script
        }
    }
    Ok(())
}

pub fn try_reap(child: &mut CgiChild) -> std::io::Result<bool> {
    Ok(child.child.try_wait()?.is_some())
}

/// SIGTERM the child; called when `script_timeout_s` elapses. The caller
/// re-arms a `ScriptKill` timer for the escalation to SIGKILL a second
/// later.
pub fn send_sigterm(child: &mut CgiChild) {
    if !child.sigterm_sent {
        unsafe {
            libc_kill(child.child.id() as i32, libc_sigterm());
        }
        child.sigterm_sent = true;
    }
}

pub fn force_kill(child: &mut CgiChild) {
    let _ = child.child.kill();
    let _ = child.child.wait();
}

/// Writes a synthetic 504 if no response had been sent yet, then
/// force-kills. If headers were already sent, the body was either
/// already complete (bounded by `Content-Length`) or relies on the
/// connection close the caller performs after this to mark its end, so
/// nothing further needs writing here.
pub fn force_timeout(child: &mut CgiChild, out: &mut Vec<u8>) {
    force_kill(child);
    if !child.headers_sent {
        out.extend_from_slice(b"HTTP/1.1 504 Gateway Timeout\r\nContent-Length: 0\r\n\r\n");
    }
}

// Minimal raw-syscall shims so this module doesn't need to pull in all of
// `libc` for two calls; `kill(2)` and `SIGTERM`'s value are both stable
// ABI on every Unix this crate targets.
unsafe fn libc_kill(pid: i32, sig: i32) {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    let _ = kill(pid, sig);
}

fn libc_sigterm() -> i32 {
    15
}
