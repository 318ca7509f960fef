//! # Session Service
//!
//! The high-level client surface: connection lifecycle, handshake
//! orchestration, and the command API issued over an authenticated
//! session.

pub mod session;

pub use session::{ConnectionState, GameSession};
