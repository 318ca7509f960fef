//! # Protocol Logic
//!
//! Handshake cryptography, message-id resolution, and frame routing.
//!
//! ## Components
//! - **Key Exchange**: RSA-signed Diffie-Hellman with PKCS-style padding
//! - **Headers**: external name → id lookup table
//! - **Dispatcher**: id → route registry for the receive loop

pub mod dispatcher;
pub mod headers;
pub mod key_exchange;
