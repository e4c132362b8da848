//! SIGINT/SIGTERM surfaced as a readable `mio` source via `signal-hook-mio`,
//! so the event loop's `Poll::poll` timeout stays driven purely by the
//! timer wheel instead of a separately-polled flag.

use mio::Token;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_mio::v1_0::Signals;

use crate::error::{Error, Result};

pub struct SignalSource {
    pub signals: Signals,
}

pub fn register() -> Result<SignalSource> {
    let signals = Signals::new([SIGINT, SIGTERM]).map_err(Error::Transport)?;
    Ok(SignalSource { signals })
}

impl SignalSource {
    /// Drains pending signals; returns true if a shutdown signal arrived.
    /// SIGPIPE needs no handling here: libstd already ignores it before
    /// `main` runs, so a write to a closed peer surfaces as a normal
    /// `BrokenPipe` I/O error instead of terminating the process.
    pub fn drain_is_shutdown(&mut self) -> bool {
        self.signals.pending().any(|s| s == SIGINT || s == SIGTERM)
    }
}

pub const SIGNAL_TOKEN: Token = Token(usize::MAX - 1);
