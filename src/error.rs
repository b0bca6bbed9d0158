//! Error types for DL/T 645 communication
//!
//! All fallible operations in this crate return [`Dlt645Result`], with
//! [`Dlt645Error`] covering transport failures, frame-level violations,
//! data-domain decoding problems and authentication failures.
//!
//! Transport and frame errors are non-fatal: the connection flag is cleared
//! and the next request reconnects, so callers may simply retry.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Dlt645Result<T> = std::result::Result<T, Dlt645Error>;

/// Errors that can occur during DL/T 645 communication.
#[derive(Debug, Error)]
pub enum Dlt645Error {
    /// Connection establishment or maintenance failed.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// An operation exceeded its deadline.
    #[error("Timeout during {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Low-level I/O failure on the socket or serial port.
    #[error("IO error: {message}")]
    Io { message: String },

    /// Frame-level violation: missing markers, checksum mismatch,
    /// inconsistent length, truncated buffer.
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Protocol violation in an otherwise well-formed frame
    /// (unexpected control code, short data domain).
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Data-domain value problem: invalid BCD nibble, value outside the
    /// range its format allows, malformed format mask.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// The data identifier is not present in the catalog.
    #[error("Unknown data identifier: 0x{di:08X}")]
    UnknownDi { di: u32 },

    /// Password verification failed.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// A response arrived from an address the client does not accept.
    #[error("Address mismatch: expected {expected}, got {actual}")]
    AddressMismatch { expected: String, actual: String },

    /// Configuration problem (bad catalog file, invalid serial parameter).
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl Dlt645Error {
    /// Create a connection error.
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Dlt645Error::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Dlt645Error::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an I/O error.
    pub fn io<S: Into<String>>(message: S) -> Self {
        Dlt645Error::Io {
            message: message.into(),
        }
    }

    /// Create a frame error.
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Dlt645Error::Frame {
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Dlt645Error::Protocol {
            message: message.into(),
        }
    }

    /// Create an invalid-data error.
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Dlt645Error::InvalidData {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Dlt645Error::Auth {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Dlt645Error::Config {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the operation after this error.
    ///
    /// Transport, frame and data errors are recoverable; configuration
    /// errors are not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Dlt645Error::Config { .. })
    }
}

impl From<std::io::Error> for Dlt645Error {
    fn from(err: std::io::Error) -> Self {
        Dlt645Error::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Dlt645Error {
    fn from(err: serde_json::Error) -> Self {
        Dlt645Error::Config {
            message: format!("JSON parse error: {}", err),
        }
    }
}
