//! # Transport Layer
//!
//! Stream connectivity for the client: TCP with an optional SOCKS5
//! tunnel, length-prefixed framing, and per-direction keystream
//! ciphers installed once the handshake derives a shared key.
//!
//! ## Components
//! - **Node**: framed, optionally ciphered stream access
//! - **SOCKS5**: proxy negotiation run before any protocol bytes

pub mod node;
pub mod socks5;

pub use node::{Node, NodeReader, NodeWriter, TcpNode};
