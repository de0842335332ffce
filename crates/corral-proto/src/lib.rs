//! corral-proto — the RPC layer every client and daemon uses to reach the
//! controller.
//!
//! # Architecture
//!
//! ```text
//! ControllerClient::ping(role)
//!   → rpc::send_recv_rc(addr, Payload::Ping)
//!     → Connection::connect → send(Envelope) → receive(timeout) → shutdown
//!       → frame: [u16 version][u16 message_type][u32 body_len][JSON body]
//! ```
//!
//! A connection carries exactly one request and one response. The
//! body's concrete type is selected by the frame's message type alone.

pub mod client;
pub mod error;
pub mod frame;
pub mod message;
pub mod rpc;
pub mod transport;

pub use client::ControllerClient;
pub use error::{ProtoResult, RpcError, RpcResult, TransportError};
pub use message::*;
pub use rpc::{send_recv, send_recv_rc};
pub use transport::Connection;
