// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Error types for the fast-setup daemon.

use std::io;

/// Errors surfaced by fast-setup components.
///
/// Covers the failure kinds of the whole daemon: configuration loading,
/// IPC handshakes with the Wi-Fi stack, discovery sockets, malformed wire
/// events and lifecycle violations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    /// Config file missing, unreadable or unparseable. Fatal at init.
    ConfigUnavailable(String),

    // ========================================================================
    // IPC handshakes
    // ========================================================================
    /// The Wi-Fi stack did not answer within the request deadline.
    IpcTimeout,
    /// The Wi-Fi stack answered with a failure code.
    IpcRejected(i32),

    // ========================================================================
    // Discovery / data plane
    // ========================================================================
    /// SSDP or mesh data socket create/bind/send failure.
    Socket(io::Error),
    /// Role event failed the magic/size check. Dropped silently by the
    /// dispatcher; surfaced only from explicit decode calls.
    EventMalformed,
    /// Event delivered to a state that has no transition for it.
    ProtocolViolation(String),

    // ========================================================================
    // Lifecycle
    // ========================================================================
    /// A concurrent synchronous operation is already in flight.
    Busy,
    /// Cancellation signal observed while waiting.
    Shutdown,
    /// Operation not valid in the current state.
    InvalidState(String),
    /// Generic I/O error with underlying cause.
    Io(io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ConfigUnavailable(msg) => write!(f, "Configuration unavailable: {}", msg),
            Error::IpcTimeout => write!(f, "IPC request timed out"),
            Error::IpcRejected(code) => write!(f, "IPC request rejected (err_code {})", code),
            Error::Socket(e) => write!(f, "Socket error: {}", e),
            Error::EventMalformed => write!(f, "Malformed role event"),
            Error::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            Error::Busy => write!(f, "Operation already in flight"),
            Error::Shutdown => write!(f, "Cancelled by shutdown"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Socket(e) | Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::ConfigUnavailable("fast_setup.conf".into()).to_string(),
            "Configuration unavailable: fast_setup.conf"
        );
        assert_eq!(Error::IpcTimeout.to_string(), "IPC request timed out");
        assert_eq!(
            Error::IpcRejected(-3).to_string(),
            "IPC request rejected (err_code -3)"
        );
        assert_eq!(Error::Busy.to_string(), "Operation already in flight");
    }

    #[test]
    fn test_io_error_source() {
        let err: Error = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(std::error::Error::source(&err).is_some());
        assert!(std::error::Error::source(&Error::IpcTimeout).is_none());
    }
}
