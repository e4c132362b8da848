//! Binds one configured `(addr, port, tls)` entry across every resolved
//! address family and tracks the per-listener concurrency cap.

use std::net::SocketAddr;
use std::time::Duration;

use mio::net::TcpListener as MioTcpListener;
use mio::Token;
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::{BindSpec, Config};
use crate::error::{Error, Result};

pub struct Listener {
    pub token: Token,
    pub socket: MioTcpListener,
    pub addr: SocketAddr,
    pub tls: bool,
    pub max_requests: usize,
    pub active: usize,
}

impl Listener {
    pub fn has_capacity(&self) -> bool {
        self.active < self.max_requests
    }
}

pub fn bind_all(config: &Config, next_token: &mut impl FnMut() -> Token) -> Result<Vec<Listener>> {
    let mut listeners = Vec::new();
    for spec in &config.binds {
        listeners.push(bind_one(spec, config.max_requests, config.tcp_keepalive_s, next_token)?);
    }
    if listeners.is_empty() {
        return Err(Error::Config("no listen addresses configured".to_string()));
    }
    Ok(listeners)
}

fn bind_one(
    spec: &BindSpec,
    max_requests: usize,
    keepalive_s: Option<u64>,
    next_token: &mut impl FnMut() -> Token,
) -> Result<Listener> {
    let addr = SocketAddr::new(spec.addr, spec.port);
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| Error::Transport(e))?;
    socket.set_reuse_address(true).map_err(Error::Transport)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true).ok();
    }
    if let Some(interval) = keepalive_s {
        socket.set_keepalive(true).ok();
        configure_keepalive(&socket, interval);
    }

    socket.bind(&addr.into()).map_err(Error::Transport)?;
    let backlog = (max_requests as i32).max(16);
    socket.listen(backlog).map_err(Error::Transport)?;
    socket.set_nonblocking(true).map_err(Error::Transport)?;

    let std_listener: std::net::TcpListener = socket.into();
    let mio_listener = MioTcpListener::from_std(std_listener);

    Ok(Listener {
        token: next_token(),
        socket: mio_listener,
        addr,
        tls: spec.tls,
        max_requests,
        active: 0,
    })
}

/// TCP_KEEPIDLE is pinned to 1 second, matching the reference daemon's
/// observable (if aggressive) default; `interval` only tunes
/// TCP_KEEPINTVL. TCP_KEEPCNT is fixed at 3.
#[cfg(target_os = "linux")]
fn configure_keepalive(socket: &Socket, interval_s: u64) {
    let params = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(1))
        .with_interval(Duration::from_secs(interval_s));
    let _ = socket.set_tcp_keepalive(&params);
}

#[cfg(not(target_os = "linux"))]
fn configure_keepalive(socket: &Socket, interval_s: u64) {
    let params = socket2::TcpKeepalive::new().with_interval(Duration::from_secs(interval_s));
    let _ = socket.set_tcp_keepalive(&params);
}
