//! One-shot request/response exchanges.

use std::time::Duration;

use corral_core::errno;
use tracing::debug;

use crate::error::{ProtoResult, RpcError, RpcResult, TransportError};
use crate::message::{Envelope, Payload};
use crate::transport::Connection;

/// Open a connection, send `request`, read exactly one response, close.
pub fn send_recv(addr: &str, request: Payload, timeout: Duration) -> ProtoResult<Envelope> {
    let msg_type = request.message_type();
    let mut conn = Connection::connect(addr, timeout)?;
    conn.send(&Envelope::new(request))?;
    let response = conn.receive(timeout);
    let closed = conn.shutdown();

    let response = response?;
    closed?;
    debug!(%addr, request = %msg_type, response = %response.message_type(), "rpc complete");
    Ok(response)
}

/// Like [`send_recv`] for requests answered with `RESPONSE_SLURM_RC`.
///
/// A nonzero return code becomes [`RpcError::Rejected`]; any other
/// response type is a protocol mismatch.
pub fn send_recv_rc(addr: &str, request: Payload, timeout: Duration) -> RpcResult<()> {
    let response = send_recv(addr, request, timeout)?;
    expect_rc(response.payload)
}

/// Classify a response that should be a return code.
pub fn expect_rc(payload: Payload) -> RpcResult<()> {
    match payload {
        Payload::ReturnCode(rc) if rc.return_code == errno::SUCCESS => Ok(()),
        Payload::ReturnCode(rc) => Err(RpcError::Rejected(rc.return_code)),
        other => Err(TransportError::UnexpectedMessageType(other.message_type()).into()),
    }
}
