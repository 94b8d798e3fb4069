//! Startup and wiring errors.

use std::io;

use thiserror::Error;

/// Errors that stop the relay from starting.
///
/// Per-connection and per-datagram failures never surface here; they are
/// logged where they happen.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A listener or bridge socket could not be bound.
    #[error("failed to bind {what} on {addr}: {source}")]
    Bind {
        /// Which socket (e.g. `"group A listener"`).
        what: &'static str,
        /// The address that was requested.
        addr: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A setting could not be used (e.g. an unparseable bridge address).
    #[error(transparent)]
    Settings(#[from] crossbar_settings::SettingsError),
    /// Other I/O failure during startup.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RelayError {
    pub(crate) fn bind(what: &'static str, addr: impl ToString, source: io::Error) -> Self {
        Self::Bind {
            what,
            addr: addr.to_string(),
            source,
        }
    }
}

/// Result alias for relay startup.
pub type Result<T> = std::result::Result<T, RelayError>;
