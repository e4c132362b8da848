//! Narrow transport seam between the connection state machine and the
//! actual byte source. Plaintext sockets and (optionally) TLS sessions
//! both speak this interface so nothing above it branches on which one
//! it has.

use std::io::{self, Read, Write};

use mio::net::TcpStream;

pub trait Transport: Send {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn peer_addr(&self) -> io::Result<std::net::SocketAddr>;
    fn local_addr(&self) -> io::Result<std::net::SocketAddr>;
    fn shutdown(&mut self);
    /// The underlying socket the event loop registers for readiness.
    fn source(&mut self) -> &mut TcpStream;
}

pub struct PlainTransport {
    stream: TcpStream,
}

impl PlainTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Transport for PlainTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.stream.local_addr()
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    fn source(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

#[cfg(feature = "tls")]
pub mod tls {
    use super::*;
    use rustls::ServerConnection;
    use std::sync::Arc;

    /// Wraps a `rustls::ServerConnection` over a non-blocking socket,
    /// translating rustls's "needs more I/O" conditions onto the same
    /// `WouldBlock` the rest of the engine already understands.
    pub struct RustlsTransport {
        stream: TcpStream,
        conn: ServerConnection,
    }

    impl RustlsTransport {
        pub fn new(stream: TcpStream, config: Arc<rustls::ServerConfig>) -> io::Result<Self> {
            let conn = ServerConnection::new(config)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            Ok(Self { stream, conn })
        }

        fn pump(&mut self) -> io::Result<()> {
            if self.conn.wants_write() {
                self.conn.write_tls(&mut self.stream)?;
            }
            if self.conn.wants_read() {
                let n = self.conn.read_tls(&mut self.stream)?;
                if n > 0 {
                    self.conn
                        .process_new_packets()
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                }
            }
            Ok(())
        }
    }

    impl Transport for RustlsTransport {
        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.pump()?;
            match self.conn.reader().read(buf) {
                Ok(0) if self.conn.wants_read() => Err(io::ErrorKind::WouldBlock.into()),
                other => other,
            }
        }

        fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.conn.writer().write(buf)?;
            self.conn.write_tls(&mut self.stream)?;
            Ok(n)
        }

        fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
            self.stream.peer_addr()
        }

        fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
            self.stream.local_addr()
        }

        fn shutdown(&mut self) {
            self.conn.send_close_notify();
            let _ = self.conn.write_tls(&mut self.stream);
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
        }

        fn source(&mut self) -> &mut TcpStream {
            &mut self.stream
        }
    }
}
