//! # Utility Modules
//!
//! Supporting utilities for the cipher, logging, timeouts, and client
//! identification.
//!
//! ## Components
//! - **Cipher**: RC4-class keystream with peek support
//! - **Logging**: structured logging configuration
//! - **Timeout**: async deadline wrappers
//! - **Fingerprint**: machine-hash and random-token helpers

pub mod cipher;
pub mod fingerprint;
pub mod logging;
pub mod timeout;

pub use cipher::Rc4;
