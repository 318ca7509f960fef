//! # Error Types
//!
//! Comprehensive error handling for the wire protocol client.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from low-level socket failures to handshake and framing
//! violations.
//!
//! ## Error Categories
//! - **Transport faults**: socket-level failures, always terminal for a session
//! - **Decode errors**: malformed frames, bounds violations on typed reads
//! - **Handshake errors**: invalid Diffie-Hellman parameters from the peer
//! - **Crypto errors**: RSA verification and padding unpacking failures
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common cases.
pub mod constants {
    /// Handshake parameter errors
    pub const ERR_PRIME_TOO_SMALL: &str = "DH prime must be greater than 2";
    pub const ERR_GENERATOR_TOO_LARGE: &str = "DH generator must be less than the prime";
    pub const ERR_DH_NOT_INITIALIZED: &str = "DH key pair has not been generated";

    /// Crypto errors
    pub const ERR_MISSING_TERMINATOR: &str = "Padded block is missing its zero terminator";
    pub const ERR_NOT_DECIMAL: &str = "Unpadded block is not a decimal integer";
    pub const ERR_NOT_HEX: &str = "Value is not a valid hexadecimal integer";
    pub const ERR_NO_PRIVATE_EXPONENT: &str = "Operation requires a private exponent";

    /// Proxy errors
    pub const ERR_PROXY_METHOD_REJECTED: &str = "SOCKS5 proxy rejected all offered auth methods";
    pub const ERR_PROXY_AUTH_FAILED: &str = "SOCKS5 username/password authentication failed";
    pub const ERR_PROXY_CONNECT_FAILED: &str = "SOCKS5 CONNECT request was refused";

    /// Session errors
    pub const ERR_GIFT_IN_FLIGHT: &str = "A gift request is already awaiting its notification";
    pub const ERR_NOT_CONNECTED: &str = "Session is not connected";
}

/// Primary error type for all protocol operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Corrupted frame: declared length {declared} does not cover {actual} bytes")]
    CorruptedFrame { declared: i32, actual: usize },

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Read of {wanted} bytes at offset {offset} exceeds body of {len} bytes")]
    OutOfBounds {
        offset: usize,
        wanted: usize,
        len: usize,
    },

    #[error("Invalid handshake parameters: {0}")]
    InvalidHandshakeParameters(String),

    #[error("Crypto verification failed: {0}")]
    CryptoVerification(String),

    #[error("Proxy negotiation failed: {0}")]
    ProxyError(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Unknown message name: {0}")]
    UnknownMessage(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error is a socket-level fault. Only the initial
    /// connect loop is permitted to retry on these.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::TransportError(_)
                | ProtocolError::ConnectionClosed
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
