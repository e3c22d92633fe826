#![forbid(unsafe_code)]
#![warn(clippy::all)]

//! Building blocks for a DTLS stack over UDP.
//!
//! The main component is [`udp::Listener`], a connection multiplexer that
//! turns a single UDP socket into many independent per-peer connections with
//! accept/read/write/close semantics. On top of that, [`crypto::KeyExchange`]
//! provides ECDHE keypair generation for the handshake, and [`message`] holds
//! the wire types consumed by the record layer.

mod error;
pub use error::Error;

pub mod crypto;
pub use crypto::KeyExchange;

pub mod message;
pub use message::{ApplicationData, NamedCurve};

pub mod udp;
pub use udp::{Conn, Listener};
