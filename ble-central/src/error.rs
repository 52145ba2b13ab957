//! Error types for this crate.

use std::fmt::Display;

use ble_link::{AttError, LinkError};
use futures_channel::oneshot;

/// A convenience type alias for a `Result` with an [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in this crate.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind }
    }
}

impl From<LinkError> for Error {
    fn from(error: LinkError) -> Self {
        Error {
            kind: ErrorKind::Transport(error),
        }
    }
}

impl From<AttError> for Error {
    fn from(error: AttError) -> Self {
        Error {
            kind: ErrorKind::Att(error),
        }
    }
}

impl From<oneshot::Canceled> for Error {
    fn from(_: oneshot::Canceled) -> Self {
        Error {
            kind: ErrorKind::Canceled,
        }
    }
}

impl From<async_broadcast::RecvError> for Error {
    fn from(_: async_broadcast::RecvError) -> Self {
        Error {
            kind: ErrorKind::Lagged,
        }
    }
}

/// The kind of error that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The radio is powered off, unauthorized, or otherwise unusable.
    RadioUnavailable,
    /// The operation requires a connection that is not established.
    NotConnected,
    /// The operation did not complete within its deadline.
    TimedOut,
    /// The requested service is not in the discovered inventory.
    InvalidService,
    /// The requested characteristic is not in the discovered inventory.
    InvalidCharacteristic,
    /// A request of the same kind is already in flight.
    Busy,
    /// The operation was canceled before it could complete.
    Canceled,
    /// The radio link reported a connection-level failure.
    Transport(LinkError),
    /// The peripheral rejected the request.
    Att(AttError),
    /// The receiver lagged too far behind a broadcast channel.
    Lagged,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::RadioUnavailable => f.write_str("radio unavailable"),
            ErrorKind::NotConnected => f.write_str("not connected"),
            ErrorKind::TimedOut => f.write_str("timed out"),
            ErrorKind::InvalidService => f.write_str("unknown service"),
            ErrorKind::InvalidCharacteristic => f.write_str("unknown characteristic"),
            ErrorKind::Busy => f.write_str("request already in flight"),
            ErrorKind::Canceled => f.write_str("canceled"),
            ErrorKind::Transport(error) => error.fmt(f),
            ErrorKind::Att(error) => error.fmt(f),
            ErrorKind::Lagged => f.write_str("lagged"),
        }
    }
}
