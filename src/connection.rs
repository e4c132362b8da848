//! Per-connection state: the transport, the streaming request parser,
//! whatever response source is currently active, and the bookkeeping the
//! timer sweep needs (idle deadline, CGI child, generation counter).

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::net::SocketAddr;
use std::time::Instant;

use mio::Token;

use crate::cgi::CgiChild;
use crate::config::Config;
use crate::http::request::{ParseOutcome, RequestParser};
use crate::http::HttpRequest;
use crate::transport::Transport;

/// What the connection is currently doing to produce a response body,
/// beyond draining `write_buf`.
pub enum ActiveAction {
    None,
    StaticFile { file: File, remaining: u64 },
    Cgi(CgiChild),
}

pub struct Connection {
    pub token: Token,
    pub transport: Box<dyn Transport>,
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub is_tls: bool,
    pub listener_token: Token,

    pub parser: RequestParser,
    pub request: Option<HttpRequest>,
    /// Bytes of the request body still expected from the client, per
    /// `Content-Length`. Zero once the whole body has arrived.
    pub body_remaining: usize,
    /// Body bytes received but not yet handed to the CGI child's stdin.
    pub cgi_stdin_buf: Vec<u8>,

    pub write_buf: Vec<u8>,
    pub action: ActiveAction,

    pub cgi_stdin_token: Option<Token>,
    pub cgi_stdout_token: Option<Token>,

    pub closed: bool,
    pub last_activity: Instant,
    /// Bumped every time the connection starts waiting on something new
    /// (a fresh request, a fresh CGI child); lets the timer sweep ignore
    /// a timer entry armed for a state the connection has since left.
    pub generation: u64,
    pub headers_complete_at: Option<Instant>,
}

impl Connection {
    pub fn new(
        token: Token,
        listener_token: Token,
        transport: Box<dyn Transport>,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        is_tls: bool,
    ) -> Self {
        Self {
            token,
            transport,
            peer_addr,
            local_addr,
            is_tls,
            listener_token,
            parser: RequestParser::new(),
            request: None,
            body_remaining: 0,
            cgi_stdin_buf: Vec::new(),
            write_buf: Vec::new(),
            action: ActiveAction::None,
            cgi_stdin_token: None,
            cgi_stdout_token: None,
            closed: false,
            last_activity: Instant::now(),
            generation: 0,
            headers_complete_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Pulls bytes off the socket and feeds the parser until either a
    /// full request is available, the connection errors/EOFs, or the
    /// socket would block.
    pub fn read_into_parser(&mut self) -> ParseOutcome {
        if self.request.is_some() {
            return ParseOutcome::Incomplete;
        }
        let mut buf = [0u8; 4096];
        loop {
            match self.transport.recv(&mut buf) {
                Ok(0) => {
                    self.closed = true;
                    return ParseOutcome::Incomplete;
                }
                Ok(n) => {
                    self.touch();
                    match self.parser.feed(&buf[..n]) {
                        ParseOutcome::Incomplete => continue,
                        other => return other,
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return ParseOutcome::Incomplete,
                Err(_) => {
                    self.closed = true;
                    return ParseOutcome::Incomplete;
                }
            }
        }
    }

    /// Drains `write_buf`, then pulls more bytes from whatever
    /// `ActiveAction` is in flight until the socket would block.
    pub fn flush_writes(&mut self) -> std::io::Result<()> {
        loop {
            while !self.write_buf.is_empty() {
                match self.transport.send(&self.write_buf) {
                    Ok(0) => return Ok(()),
                    Ok(n) => {
                        self.write_buf.drain(..n);
                        self.touch();
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                    Err(e) => return Err(e),
                }
            }

            match &mut self.action {
                ActiveAction::StaticFile { file, remaining } if *remaining > 0 => {
                    let mut chunk = vec![0u8; 64 * 1024];
                    let to_read = chunk.len().min(*remaining as usize);
                    let n = file.read(&mut chunk[..to_read])?;
                    if n == 0 {
                        *remaining = 0;
                        continue;
                    }
                    *remaining -= n as u64;
                    self.write_buf.extend_from_slice(&chunk[..n]);
                }
                ActiveAction::StaticFile { remaining, .. } if *remaining == 0 => {
                    self.action = ActiveAction::None;
                    self.finish_response();
                    return Ok(());
                }
                _ => return Ok(()),
            }
        }
    }

    /// Reads further request-body bytes (for a POST whose body didn't
    /// fully arrive with the headers) directly into the CGI stdin
    /// staging buffer, bypassing the header parser.
    pub fn read_body_chunk(&mut self) {
        if self.body_remaining == 0 {
            return;
        }
        let mut buf = vec![0u8; self.body_remaining.min(64 * 1024)];
        loop {
            match self.transport.recv(&mut buf) {
                Ok(0) => {
                    self.closed = true;
                    return;
                }
                Ok(n) => {
                    self.touch();
                    let take = n.min(self.body_remaining);
                    self.cgi_stdin_buf.extend_from_slice(&buf[..take]);
                    self.body_remaining -= take;
                    if self.body_remaining == 0 || n < buf.len() {
                        return;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(_) => {
                    self.closed = true;
                    return;
                }
            }
        }
    }

    /// Establishes body-length bookkeeping right after a request is
    /// parsed: whatever arrived past the header terminator already
    /// counts against `Content-Length`.
    pub fn start_body_tracking(&mut self) {
        let request = self.request.as_ref().expect("request set before body tracking starts");
        let total = request.content_length().unwrap_or(0);
        let prefix_len = request.body_prefix.len().min(total);
        self.body_remaining = total.saturating_sub(prefix_len);
        self.cgi_stdin_buf = request.body_prefix[..prefix_len].to_vec();
    }

    /// Resets the connection for the next pipelined request (if any
    /// bytes beyond the header terminator are already buffered) or marks
    /// it for close, matching the non-goal that only already-buffered
    /// pipelined requests are served back-to-back.
    pub fn finish_response(&mut self) {
        let had_pipelined = self.parser.buffered_len() > 0;
        self.request = None;
        self.generation += 1;
        if !had_pipelined {
            self.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Connection requires a live socket to construct meaningfully; its
    // parser/finish_response bookkeeping is covered indirectly through
    // the request parser's own unit tests and the integration tests in
    // tests/.
    #[test]
    fn module_compiles() {
        let _ = Instant::now();
    }
}
