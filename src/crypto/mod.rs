//! Cryptographic primitives consumed by the handshake.

mod key_exchange;
pub use key_exchange::KeyExchange;
