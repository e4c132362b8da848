//! The single-threaded event loop: registers listeners, connections, and
//! CGI pipes with one `mio::Poll`, and dispatches readiness, timer, and
//! shutdown-signal events to the right handler. Nothing here blocks
//! except the `Poll::poll` call itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Events, Interest, Token};
use tracing::{debug, info, warn};

use crate::auth::{CredentialChecker, DefaultCredentialChecker};
use crate::cgi::{self, CgiChild};
use crate::config::Config;
use crate::connection::{ActiveAction, Connection};
use crate::dispatch::{self, Outcome};
use crate::error::Result;
use crate::http::request::ParseOutcome;
use crate::http::HttpResponse;
use crate::listener::{self, Listener};
use crate::signal::{self, SignalSource, SIGNAL_TOKEN};
use crate::timers::{TimerKind, TimerWheel};
use crate::transport::PlainTransport;

pub struct Server {
    config: Arc<Config>,
    poll: mio::Poll,
    listeners: Vec<Listener>,
    connections: HashMap<Token, Connection>,
    cgi_to_client: HashMap<Token, Token>,
    timers: TimerWheel,
    signals: SignalSource,
    checker: Box<dyn CredentialChecker>,
    next_token: usize,
    shutdown: bool,
}

const SERVER_BANNER: &str = "embedhttpd";

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let poll = mio::Poll::new().map_err(crate::error::Error::Transport)?;
        let config = Arc::new(config);

        let mut next_token = 0usize;
        let mut alloc = || {
            let t = Token(next_token);
            next_token += 1;
            t
        };

        let mut listeners = listener::bind_all(&config, &mut alloc)?;
        for l in &mut listeners {
            poll.registry()
                .register(&mut l.socket, l.token, Interest::READABLE)
                .map_err(crate::error::Error::Transport)?;
        }

        let mut signals = signal::register()?;
        poll.registry()
            .register(&mut signals.signals, SIGNAL_TOKEN, Interest::READABLE)
            .map_err(crate::error::Error::Transport)?;

        Ok(Self {
            config,
            poll,
            listeners,
            connections: HashMap::new(),
            cgi_to_client: HashMap::new(),
            timers: TimerWheel::new(),
            signals,
            checker: Box::new(DefaultCredentialChecker),
            next_token,
            shutdown: false,
        })
    }

    fn alloc_token(&mut self) -> Token {
        let t = Token(self.next_token);
        self.next_token += 1;
        t
    }

    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        info!(listeners = self.listeners.len(), "server starting");

        while !self.shutdown {
            let now = Instant::now();
            let timeout = self.timers.next_timeout(now);
            match self.poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(crate::error::Error::Transport(e)),
            }

            for event in events.iter() {
                let token = event.token();
                if token == SIGNAL_TOKEN {
                    if self.signals.drain_is_shutdown() {
                        info!("shutdown signal received");
                        self.shutdown = true;
                    }
                    continue;
                }

                if let Some(listener_idx) = self.listeners.iter().position(|l| l.token == token) {
                    self.accept_ready(listener_idx);
                    continue;
                }

                if let Some(&client_token) = self.cgi_to_client.get(&token) {
                    self.handle_cgi_event(client_token, token, event.is_readable(), event.is_writable());
                    continue;
                }

                self.handle_connection_event(token, event.is_readable(), event.is_writable());
            }

            self.sweep_timers(Instant::now());
            self.reap_closed();
        }

        info!("event loop exited");
        Ok(())
    }

    fn accept_ready(&mut self, listener_idx: usize) {
        loop {
            let listener = &mut self.listeners[listener_idx];
            if !listener.has_capacity() {
                return;
            }
            let accepted = listener.socket.accept();
            match accepted {
                Ok((mut stream, peer_addr)) => {
                    let local_addr = stream.local_addr().unwrap_or(listener.addr);
                    let token = self.alloc_token();
                    let tls = listener.tls;
                    self.listeners[listener_idx].active += 1;
                    let listener_token = self.listeners[listener_idx].token;

                    self.poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
                        .ok();

                    let transport = Box::new(PlainTransport::new(stream));
                    let mut conn = Connection::new(token, listener_token, transport, peer_addr, local_addr, tls);
                    conn.touch();
                    self.arm_idle_timer(&conn);
                    self.connections.insert(token, conn);
                    debug!(?token, %peer_addr, "accepted connection");
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(_) => return,
            }
        }
    }

    fn arm_idle_timer(&mut self, conn: &Connection) {
        let deadline = Instant::now() + Duration::from_secs(self.config.network_timeout_s);
        self.timers.arm(deadline, conn.token, TimerKind::Idle, conn.generation);
    }

    fn handle_connection_event(&mut self, token: Token, readable: bool, writable: bool) {
        let Some(conn) = self.connections.get_mut(&token) else { return };

        if readable {
            if conn.request.is_none() {
                match conn.read_into_parser() {
                    ParseOutcome::Incomplete => {}
                    ParseOutcome::Complete(request) => {
                        conn.request = Some(request);
                        conn.start_body_tracking();
                        self.dispatch_request(token);
                    }
                    ParseOutcome::Failed(err) => {
                        let status = err.status_code();
                        conn.write_buf.extend_from_slice(&HttpResponse::canned_error(status).to_bytes(
                            "HTTP/1.1",
                            &httpdate::fmt_http_date(std::time::SystemTime::now()),
                            SERVER_BANNER,
                        ));
                        conn.closed = true;
                    }
                }
            } else if matches!(conn.action, ActiveAction::Cgi(_)) {
                conn.read_body_chunk();
                self.pump_cgi_stdin(token);
            }
        }

        if writable {
            if let Some(conn) = self.connections.get_mut(&token) {
                if let Err(e) = conn.flush_writes() {
                    debug!(?token, error = %e, "write error, closing connection");
                    conn.closed = true;
                }
            }
        }
    }

    fn dispatch_request(&mut self, token: Token) {
        let Some(conn) = self.connections.get(&token) else { return };
        let request = conn.request.clone().expect("dispatch called with request present");
        let peer = conn.peer_addr;
        let local = conn.local_addr;
        let is_tls = conn.is_tls;

        let outcome = dispatch::dispatch(&self.config, &request, peer, local, is_tls, self.checker.as_ref());

        let Some(conn) = self.connections.get_mut(&token) else { return };
        match outcome {
            Outcome::Continue100 => {
                conn.write_buf.extend_from_slice(b"HTTP/1.1 100 Continue\r\n\r\n");
                conn.request = None;
                // Discard whatever's buffered past the header terminator;
                // the client will re-send starting from the body.
                conn.parser.reset_with(Vec::new());
                conn.body_remaining = 0;
                conn.cgi_stdin_buf.clear();
            }
            Outcome::Respond { response, action } => {
                let date = httpdate::fmt_http_date(std::time::SystemTime::now());
                conn.write_buf.extend_from_slice(&response.head_bytes("HTTP/1.1", &date, SERVER_BANNER));
                conn.action = action;
                if matches!(conn.action, ActiveAction::None) {
                    if request.method != crate::http::request::Method::Head {
                        conn.write_buf.extend_from_slice(&response.body);
                    }
                    conn.finish_response();
                }
            }
            Outcome::SpawnCgi(child) => self.attach_cgi(token, child),
        }
    }

    fn attach_cgi(&mut self, client_token: Token, mut child: CgiChild) {
        let stdout_token = self.alloc_token();
        let stdin_token = self.alloc_token();

        self.poll.registry().register(&mut child.stdout, stdout_token, Interest::READABLE).ok();
        if let Some(stdin) = child.stdin.as_mut() {
            self.poll.registry().register(stdin, stdin_token, Interest::WRITABLE).ok();
        }

        self.cgi_to_client.insert(stdout_token, client_token);
        self.cgi_to_client.insert(stdin_token, client_token);

        let deadline = Instant::now() + Duration::from_secs(self.config.script_timeout_s);
        if let Some(conn) = self.connections.get_mut(&client_token) {
            conn.cgi_stdout_token = Some(stdout_token);
            conn.cgi_stdin_token = Some(stdin_token);
            self.timers.arm(deadline, client_token, TimerKind::ScriptTerm, conn.generation);
            conn.action = ActiveAction::Cgi(child);
        }
        self.pump_cgi_stdin(client_token);
    }

    fn pump_cgi_stdin(&mut self, client_token: Token) {
        let Some(conn) = self.connections.get_mut(&client_token) else { return };
        let body_done = conn.body_remaining == 0;
        if let ActiveAction::Cgi(child) = &mut conn.action {
            let _ = cgi::pump_stdin(child, &mut conn.cgi_stdin_buf, body_done);
        }
    }

    fn handle_cgi_event(&mut self, client_token: Token, pipe_token: Token, readable: bool, writable: bool) {
        let Some(conn) = self.connections.get_mut(&client_token) else { return };
        if !matches!(conn.action, ActiveAction::Cgi(_)) {
            return;
        }

        if readable && Some(pipe_token) == conn.cgi_stdout_token {
            if let ActiveAction::Cgi(child) = &mut conn.action {
                if cgi::pump_stdout(child, &mut conn.write_buf).is_err() {
                    conn.closed = true;
                }
            }
        }

        if writable && Some(pipe_token) == conn.cgi_stdin_token {
            let body_done = conn.body_remaining == 0;
            if let ActiveAction::Cgi(child) = &mut conn.action {
                let _ = cgi::pump_stdin(child, &mut conn.cgi_stdin_buf, body_done);
                if child.stdin.is_none() {
                    conn.cgi_stdin_token = None;
                }
            }
        }

        // Capture the reap outcome without holding `conn`'s borrow across
        // the `self.cleanup_cgi` call below.
        let reaped = match &mut conn.action {
            ActiveAction::Cgi(child) => match cgi::try_reap(child) {
                Ok(true) => Some(child.headers_sent),
                Ok(false) => None,
                Err(_) => {
                    conn.closed = true;
                    None
                }
            },
            _ => None,
        };

        if let Some(headers_sent) = reaped {
            self.cleanup_cgi(client_token);
            if let Some(conn) = self.connections.get_mut(&client_token) {
                conn.action = ActiveAction::None;
                if !headers_sent {
                    // The child exited before producing a valid CGI header
                    // block; nothing's been written to the client yet.
                    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
                    let response = HttpResponse::canned_error(502);
                    conn.write_buf.extend_from_slice(&response.to_bytes("HTTP/1.1", &date, SERVER_BANNER));
                }
                conn.finish_response();
            }
        }
    }

    fn cleanup_cgi(&mut self, client_token: Token) {
        if let Some(conn) = self.connections.get_mut(&client_token) {
            if let Some(t) = conn.cgi_stdin_token.take() {
                self.cgi_to_client.remove(&t);
            }
            if let Some(t) = conn.cgi_stdout_token.take() {
                self.cgi_to_client.remove(&t);
            }
        }
    }

    fn sweep_timers(&mut self, now: Instant) {
        for (token, kind, generation) in self.timers.drain_expired(now) {
            let Some(conn) = self.connections.get_mut(&token) else { continue };
            if conn.generation != generation {
                continue; // stale entry for a state the connection already left
            }

            match kind {
                TimerKind::Idle => {
                    if conn.request.is_none() && conn.write_buf.is_empty() {
                        warn!(?token, "idle timeout");
                        if !matches!(conn.action, ActiveAction::Cgi(_)) {
                            conn.write_buf.extend_from_slice(b"HTTP/1.1 408 Request Timeout\r\nContent-Length: 0\r\n\r\n");
                        }
                        conn.closed = true;
                    }
                }
                TimerKind::ScriptTerm => {
                    if let ActiveAction::Cgi(child) = &mut conn.action {
                        warn!(?token, "CGI script timed out, sending SIGTERM");
                        cgi::send_sigterm(child);
                        self.timers.arm(now + Duration::from_secs(1), token, TimerKind::ScriptKill, generation);
                    }
                }
                TimerKind::ScriptKill => {
                    if let ActiveAction::Cgi(child) = &mut conn.action {
                        warn!(?token, "CGI script still alive after SIGTERM, sending SIGKILL");
                        cgi::force_timeout(child, &mut conn.write_buf);
                        self.cleanup_cgi(token);
                        if let Some(conn) = self.connections.get_mut(&token) {
                            conn.action = ActiveAction::None;
                            conn.closed = true;
                        }
                    }
                }
                TimerKind::Sweep => {}
            }
        }
    }

    fn reap_closed(&mut self) {
        let done: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| c.closed && c.write_buf.is_empty() && !matches!(c.action, ActiveAction::Cgi(_)))
            .map(|(t, _)| *t)
            .collect();

        for token in done {
            if let Some(mut conn) = self.connections.remove(&token) {
                self.cleanup_cgi(token);
                self.poll.registry().deregister(conn.transport.source()).ok();
                conn.transport.shutdown();
                if let Some(listener) = self.listeners.iter_mut().find(|l| l.token == conn.listener_token) {
                    listener.active = listener.active.saturating_sub(1);
                }
            }
        }
    }
}
