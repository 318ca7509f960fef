//! # Core Protocol Components
//!
//! Low-level packet handling and binary field encoding.
//!
//! This module provides the foundation for the protocol: the big-endian
//! byte codec and the mutable [`packet::Packet`] buffer built on it.
//!
//! ## Wire Format
//! ```text
//! [Length(4)] [MessageTypeId(2)] [Body(N)]
//! ```
//!
//! The length prefix always equals `2 + body length`; frames violating
//! this are classified corrupted and preserved verbatim.

pub mod codec;
pub mod packet;
