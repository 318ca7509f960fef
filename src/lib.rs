//! # evawire
//!
//! Asynchronous client core for a big-endian, length-prefixed game wire
//! protocol with an RSA-signed Diffie-Hellman handshake.
//!
//! ## Layers
//! - **core**: frame codec and the mutable [`Packet`](core::packet::Packet) buffer
//! - **protocol**: key exchange, message header table, frame dispatch
//! - **transport**: TCP node with framing, SOCKS5, per-direction ciphers
//! - **service**: the [`GameSession`] lifecycle and command surface
//! - **utils**: stream cipher, logging, timeouts, client fingerprint
//!
//! ## Wire Format
//! ```text
//! [Length(4, BE)] [Id(2, BE)] [Body(N)]      Length = 2 + N
//! ```
//!
//! ## Quick Start
//! ```no_run
//! use evawire::config::NetworkConfig;
//! use evawire::protocol::headers::HeaderMap;
//! use evawire::service::GameSession;
//!
//! # async fn run() -> evawire::error::Result<()> {
//! let config = NetworkConfig::from_file("evawire.toml")?;
//! let headers = HeaderMap::from_file("headers.json")?;
//!
//! let session = GameSession::connect(config, headers, "sso-ticket").await?;
//! session.load_room(637_392).await?;
//! session.add_friend("somebody").await?;
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::NetworkConfig;
pub use core::packet::{Field, Packet};
pub use error::{ProtocolError, Result};
pub use protocol::headers::HeaderMap;
pub use service::{ConnectionState, GameSession};
pub use transport::Node;
