//! Error types for POOL sessions.
//!
//! Every failure reported by the driver goes through [`map_errno`]; nothing
//! else in the crate turns an OS error into an [`Error`].

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by connections, channels, listeners and the device.
#[derive(Debug, Error)]
pub enum Error {
    /// The driver's session table has no free slot.
    #[error("session table full")]
    SessionTableFull,

    /// The peer rejected the handshake.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// A deadline expired, locally or inside the driver.
    #[error("operation timed out")]
    Timeout,

    /// Payload exceeds the protocol maximum.
    #[error("message too large")]
    MessageTooLarge,

    /// Receive buffer is smaller than the pending message.
    #[error("buffer too small")]
    BufferTooSmall,

    /// The peer cannot be routed to.
    #[error("network unreachable")]
    NetworkUnreachable,

    /// The handle, connection, channel or listener is already closed.
    #[error("connection closed")]
    Closed,

    /// The session is no longer present in the driver's table.
    #[error("session not established")]
    NotEstablished,

    /// The channel is the connection's own or already has an open handle.
    #[error("channel {0} already in use")]
    ChannelInUse(u8),

    /// The character device is missing or inaccessible.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(#[source] io::Error),

    /// The network token is not one of `pool`, `pool4` or `pool6`.
    #[error("unsupported network {0:?}")]
    UnsupportedNetwork(String),

    /// The address text could not be parsed.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        /// The offending input.
        address: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Name resolution produced no usable address.
    #[error("cannot resolve {host:?}: {source}")]
    Resolve {
        /// Host that failed to resolve.
        host: String,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },

    /// Any other driver failure, kept for diagnostics.
    #[error("driver error: {0}")]
    Unknown(#[source] io::Error),
}

impl Error {
    /// Whether this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Whether the failed call may be retried on the same connection.
    ///
    /// Only timeouts qualify; the connection stays usable after one.
    pub fn is_retryable(&self) -> bool {
        self.is_timeout()
    }

    /// The OS error code carried by this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::DeviceUnavailable(e) | Error::Unknown(e) => e.raw_os_error(),
            Error::Resolve { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// The kind of control call that produced an OS error.
///
/// Some codes mean different things depending on the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Opening the character device.
    Open,
    /// A receive; EMSGSIZE means the caller's buffer is short.
    Recv,
    /// Any other control call.
    Control,
}

/// Translate a driver failure into an [`Error`].
///
/// The mapping is total: codes without a dedicated kind come back as
/// [`Error::Unknown`] with the original error attached.
pub fn map_errno(err: io::Error, op: Op) -> Error {
    let Some(code) = err.raw_os_error() else {
        return Error::Unknown(err);
    };

    match (code, op) {
        (libc::ENOENT | libc::ENODEV | libc::ENXIO | libc::EACCES | libc::EPERM, Op::Open) => {
            Error::DeviceUnavailable(err)
        }
        (libc::EMSGSIZE, Op::Recv) => Error::BufferTooSmall,
        (libc::EMSGSIZE, _) => Error::MessageTooLarge,
        (libc::ENOSPC, _) => Error::SessionTableFull,
        (libc::ECONNREFUSED, _) => Error::AuthenticationFailed,
        (libc::ETIMEDOUT, _) => Error::Timeout,
        (libc::ENETUNREACH | libc::EHOSTUNREACH, _) => Error::NetworkUnreachable,
        (libc::EBADF, _) => Error::Closed,
        (libc::ENOTCONN, _) => Error::NotEstablished,
        _ => Error::Unknown(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errno(code: i32) -> io::Error {
        io::Error::from_raw_os_error(code)
    }

    #[test]
    fn test_map_known_codes() {
        assert!(matches!(
            map_errno(errno(libc::ENOSPC), Op::Control),
            Error::SessionTableFull
        ));
        assert!(matches!(
            map_errno(errno(libc::ECONNREFUSED), Op::Control),
            Error::AuthenticationFailed
        ));
        assert!(matches!(
            map_errno(errno(libc::ETIMEDOUT), Op::Control),
            Error::Timeout
        ));
        assert!(matches!(
            map_errno(errno(libc::ENETUNREACH), Op::Control),
            Error::NetworkUnreachable
        ));
        assert!(matches!(
            map_errno(errno(libc::EBADF), Op::Recv),
            Error::Closed
        ));
        assert!(matches!(
            map_errno(errno(libc::ENOTCONN), Op::Control),
            Error::NotEstablished
        ));
    }

    #[test]
    fn test_emsgsize_depends_on_op() {
        assert!(matches!(
            map_errno(errno(libc::EMSGSIZE), Op::Control),
            Error::MessageTooLarge
        ));
        assert!(matches!(
            map_errno(errno(libc::EMSGSIZE), Op::Recv),
            Error::BufferTooSmall
        ));
    }

    #[test]
    fn test_open_failures_are_device_unavailable() {
        for code in [libc::ENOENT, libc::EACCES, libc::ENODEV] {
            let err = map_errno(errno(code), Op::Open);
            assert!(matches!(err, Error::DeviceUnavailable(_)));
            assert_eq!(err.raw_os_error(), Some(code));
        }
        // Outside of open, a missing file is just an unknown failure.
        assert!(matches!(
            map_errno(errno(libc::ENOENT), Op::Control),
            Error::Unknown(_)
        ));
    }

    #[test]
    fn test_unmapped_code_keeps_original() {
        let err = map_errno(errno(libc::EPROTO), Op::Control);
        assert!(matches!(err, Error::Unknown(_)));
        assert_eq!(err.raw_os_error(), Some(libc::EPROTO));
        assert!(err.to_string().starts_with("driver error"));
    }

    #[test]
    fn test_error_without_code_is_unknown() {
        let err = map_errno(io::Error::other("weird"), Op::Control);
        assert!(matches!(err, Error::Unknown(_)));
        assert_eq!(err.raw_os_error(), None);
    }

    #[test]
    fn test_only_timeouts_are_retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(!Error::Closed.is_retryable());
        assert!(!Error::MessageTooLarge.is_timeout());
    }
}
