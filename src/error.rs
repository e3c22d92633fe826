use std::io;

use thiserror::Error;

use crate::message::NamedCurve;

#[derive(Debug, Error)]
pub enum Error {
    /// Socket level errors. Binding the listener socket and sending
    /// datagrams surface these directly.
    #[error("{0}")]
    Io(#[from] io::Error),

    /// The listener has been shut down.
    #[error("listener closed")]
    ListenerClosed,

    /// The connection has been closed. This is normal stream termination,
    /// not a fault.
    #[error("end of file")]
    Eof,

    /// Key exchange was requested for a curve we cannot generate keys for.
    #[error("unsupported curve: {0:?}")]
    UnsupportedCurve(NamedCurve),

    /// The peer's public key could not be parsed as a point on the
    /// negotiated curve.
    #[error("invalid peer public key")]
    InvalidPublicKey,
}
