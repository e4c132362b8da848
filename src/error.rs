use std::io;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy used across the connection lifecycle.
///
/// Every variant here is recovered at connection scope; nothing propagates
/// out of the event loop except the startup-time `Transport`/`Resource`
/// failures surfaced from `main`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed request: {0}")]
    ClientProtocol(String),

    #[error("authentication failed")]
    ClientAuth,

    #[error("forbidden: {0}")]
    ClientPolicy(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Maps a client/protocol-facing error onto the status code the
    /// static responder or dispatcher should emit, where one applies.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::ClientProtocol(_) => Some(400),
            Error::ClientAuth => Some(401),
            Error::ClientPolicy(_) => Some(403),
            Error::NotFound(_) => Some(404),
            Error::Upstream(_) => Some(502),
            Error::Timeout => Some(504),
            Error::Transport(_) | Error::Resource(_) | Error::Config(_) => None,
        }
    }
}
