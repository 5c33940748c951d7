//! Client error types.

use muxrpc_protocol::WireErrorKind;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] muxrpc_protocol::ProtocolError),

    /// The client was closed or its reader terminated; no further calls.
    #[error("connection is shut down")]
    Shutdown,

    #[error("connect timeout")]
    ConnectTimeout,

    /// The bounded wait in [`Client::call`] elapsed.
    #[error("call timeout")]
    Timeout,

    /// The call was abandoned before a reply arrived.
    #[error("call cancelled")]
    Cancelled,

    #[error("unknown codec type: {0}")]
    UnknownCodec(String),

    /// The reply body did not decode into the requested type.
    #[error("reading body {0}")]
    ReadBody(String),

    /// The connection failed mid-call; every pending call gets this.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server reported an error for this call.
    #[error("remote error: {message}")]
    Remote {
        kind: WireErrorKind,
        message: String,
    },
}

impl ClientError {
    /// Classification of a server-reported error, when there is one.
    pub fn wire_kind(&self) -> Option<WireErrorKind> {
        match self {
            ClientError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
