//! Shared status code and error wrapper used across every `wheelnet` crate.
//!
//! `original_source` funnels almost every fallible operation — memory,
//! sockets, ioctls, the tun device, the netlink control plane — through one
//! `ERRCODE` enum. We keep that shape: a plain `Copy` status code that
//! crosses crate boundaries cheaply, plus [`WheelnetError`] for the call
//! sites that want to attach a message or an underlying `std::io::Error`.

use std::fmt;

/// Status codes returned by `wheelnet` operations.
///
/// Mirrors the taxonomy of the source toolkit's `ERRCODE`. Soft failures
/// (`SoftFail`, `TooMuchData`) are retryable and never imply the object
/// they were returned from has closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Success,
    /// Retryable later — wait for readiness (EAGAIN/EWOULDBLOCK).
    SoftFail,
    /// The kernel buffer grew since the last read; retry the read.
    TooMuchData,
    Timeout,
    Closed,
    NotInitialized,
    InvalidParameter,
    MemoryError,
    AlreadyExists,
    NotFound,
    IoctlFailed,
    OpenFailed,
    SocketFailed,
    ReadFailed,
    WriteFailed,
    IncompleteWrite,
    IncompleteData,
    ConnectInProgress,
    ConnectFailed,
}

impl Code {
    /// True for codes that represent a transient condition the caller
    /// should simply retry once readiness (or time) allows, as opposed to
    /// one that means the underlying object is no longer usable.
    pub fn is_soft(self) -> bool {
        matches!(self, Code::SoftFail | Code::TooMuchData | Code::ConnectInProgress)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Code::Success => "success",
            Code::SoftFail => "soft failure, retry on readiness",
            Code::TooMuchData => "kernel buffer grew, retry read",
            Code::Timeout => "timed out",
            Code::Closed => "closed",
            Code::NotInitialized => "not initialized",
            Code::InvalidParameter => "invalid parameter",
            Code::MemoryError => "memory error",
            Code::AlreadyExists => "already exists",
            Code::NotFound => "not found",
            Code::IoctlFailed => "ioctl failed",
            Code::OpenFailed => "open failed",
            Code::SocketFailed => "socket failed",
            Code::ReadFailed => "read failed",
            Code::WriteFailed => "write failed",
            Code::IncompleteWrite => "incomplete write",
            Code::IncompleteData => "incomplete data",
            Code::ConnectInProgress => "connect in progress",
            Code::ConnectFailed => "connect failed",
        };
        f.write_str(s)
    }
}

/// An error carrying a [`Code`] plus optional context.
///
/// Used at call sites that want a `std::error::Error` impl (e.g. to use
/// `?` against `anyhow`-free leaf crates) instead of bare codes.
#[derive(Debug, thiserror::Error)]
pub enum WheelnetError {
    #[error("{code}: {message}")]
    Context { code: Code, message: String },

    #[error("{0}")]
    Code(Code),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WheelnetError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        WheelnetError::Context {
            code,
            message: message.into(),
        }
    }

    /// Best-effort mapping back to a plain [`Code`] for callers that only
    /// branch on the status, not the message.
    pub fn code(&self) -> Code {
        match self {
            WheelnetError::Context { code, .. } => *code,
            WheelnetError::Code(code) => *code,
            WheelnetError::Io(e) => match e.kind() {
                std::io::ErrorKind::WouldBlock => Code::SoftFail,
                std::io::ErrorKind::TimedOut => Code::Timeout,
                std::io::ErrorKind::NotFound => Code::NotFound,
                std::io::ErrorKind::AlreadyExists => Code::AlreadyExists,
                _ => Code::SocketFailed,
            },
        }
    }
}

impl From<Code> for WheelnetError {
    fn from(code: Code) -> Self {
        WheelnetError::Code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_codes() {
        assert!(Code::SoftFail.is_soft());
        assert!(Code::TooMuchData.is_soft());
        assert!(!Code::Closed.is_soft());
    }

    #[test]
    fn io_error_maps_would_block_to_soft_fail() {
        let err = WheelnetError::from(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert_eq!(err.code(), Code::SoftFail);
    }

    #[test]
    fn context_error_round_trips_code() {
        let err = WheelnetError::new(Code::InvalidParameter, "bad mtu");
        assert_eq!(err.code(), Code::InvalidParameter);
        assert_eq!(err.to_string(), "invalid parameter: bad mtu");
    }
}
