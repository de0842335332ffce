//! Transport and RPC error types.

use std::io;

use corral_core::errno;
use thiserror::Error;

use crate::message::MessageType;

/// Result type alias for transport operations.
pub type ProtoResult<T> = Result<T, TransportError>;

/// Result type alias for request/response calls made through the client.
pub type RpcResult<T> = Result<T, RpcError>;

/// Failures of the byte stream itself, kept distinct so operators can tell
/// "peer unreachable" apart from "peer rejected the request".
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to send message: {0}")]
    Send(#[source] io::Error),

    #[error("failed to receive message: {0}")]
    Receive(String),

    #[error("connection closed by peer")]
    PeerClosed,

    #[error("unexpected message type {0}")]
    UnexpectedMessageType(MessageType),

    #[error("failed to shut down connection: {0}")]
    Shutdown(#[source] io::Error),

    #[error("malformed message: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Integer code reported to CLI callers.
    pub fn code(&self) -> i32 {
        match self {
            TransportError::Connect { .. } => errno::COMMUNICATIONS_CONNECTION_ERROR,
            TransportError::Send(_) => errno::COMMUNICATIONS_SEND_ERROR,
            TransportError::Receive(_) => errno::COMMUNICATIONS_RECEIVE_ERROR,
            TransportError::PeerClosed => errno::PEER_CLOSED_ERROR,
            TransportError::UnexpectedMessageType(_) => errno::UNEXPECTED_MSG_ERROR,
            TransportError::Shutdown(_) => errno::COMMUNICATIONS_SHUTDOWN_ERROR,
            TransportError::Malformed(_) => errno::PROTOCOL_MALFORMED_ERROR,
        }
    }
}

/// Errors surfaced by [`ControllerClient`](crate::ControllerClient) calls.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The caller asked for a controller that can never be addressed.
    /// No network operation was attempted.
    #[error("invalid controller role: {0}")]
    InvalidRole(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The controller answered with a nonzero return code.
    #[error("request rejected: {} (code {})", describe(.0), .0)]
    Rejected(i32),
}

impl RpcError {
    pub fn code(&self) -> i32 {
        match self {
            RpcError::InvalidRole(_) => errno::INVALID_ARGUMENT,
            RpcError::Transport(e) => e.code(),
            RpcError::Rejected(code) => *code,
        }
    }
}

fn describe(code: &i32) -> &'static str {
    errno::strerror(*code)
}
