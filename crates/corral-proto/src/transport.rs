//! Blocking TCP connection carrying framed envelopes.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{ProtoResult, TransportError};
use crate::frame::{self, FrameError};
use crate::message::{Envelope, MessageType, Payload};

/// One end of a request/response exchange.
///
/// Connections are never pooled: the client opens one per call and
/// closes it after the single response.
pub struct Connection {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish()
    }
}

impl Connection {
    /// Open a connection to `addr` (`host:port`), trying each resolved
    /// address in turn.
    pub fn connect(addr: &str, timeout: Duration) -> ProtoResult<Self> {
        let connect_err = |source: io::Error| TransportError::Connect {
            addr: addr.to_string(),
            source,
        };

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing");
        for sock_addr in addr.to_socket_addrs().map_err(connect_err)? {
            match TcpStream::connect_timeout(&sock_addr, timeout) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    debug!(%sock_addr, "connected");
                    return Ok(Self {
                        stream,
                        peer: Some(sock_addr),
                    });
                }
                Err(e) => last_err = e,
            }
        }
        Err(connect_err(last_err))
    }

    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self { stream, peer }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Send one envelope as a single frame.
    pub fn send(&mut self, envelope: &Envelope) -> ProtoResult<()> {
        let msg_type = envelope.message_type();
        let body = envelope
            .payload
            .encode_body()
            .map_err(|e| TransportError::Malformed(format!("encode {msg_type}: {e}")))?;
        frame::write_frame(&mut self.stream, msg_type.as_u16(), &body)
            .map_err(TransportError::Send)?;
        trace!(%msg_type, bytes = body.len(), "message sent");
        Ok(())
    }

    /// Receive one envelope, waiting at most `timeout`.
    pub fn receive(&mut self, timeout: Duration) -> ProtoResult<Envelope> {
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| TransportError::Receive(format!("set timeout: {e}")))?;

        let (raw_type, body) = frame::read_frame(&mut self.stream).map_err(|e| match e {
            FrameError::Closed => TransportError::PeerClosed,
            FrameError::Io(io_err)
                if matches!(
                    io_err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                TransportError::Receive(format!("timed out after {timeout:?}"))
            }
            FrameError::Io(io_err) => TransportError::Receive(io_err.to_string()),
            other @ FrameError::Truncated { .. } => TransportError::Receive(other.to_string()),
            other => TransportError::Malformed(other.to_string()),
        })?;

        let msg_type = MessageType::from_u16(raw_type)
            .ok_or_else(|| TransportError::Malformed(format!("unknown message type {raw_type}")))?;
        let payload = Payload::decode(msg_type, &body)
            .map_err(|e| TransportError::Malformed(format!("decode {msg_type}: {e}")))?;
        trace!(%msg_type, bytes = body.len(), "message received");

        Ok(Envelope {
            payload,
            source: self.peer,
        })
    }

    /// Close both directions. A peer that already hung up is not an error.
    pub fn shutdown(self) -> ProtoResult<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::Shutdown(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    use crate::message::ShutdownMsg;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[test]
    fn send_and_receive_envelope() {
        let (listener, addr) = listener();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut conn = Connection::from_stream(stream);
            let env = conn.receive(TIMEOUT).unwrap();
            assert!(env.source.is_some());
            conn.send(&Envelope::new(Payload::rc(0))).unwrap();
            env.payload
        });

        let mut conn = Connection::connect(&addr, TIMEOUT).unwrap();
        conn.send(&Envelope::new(Payload::Shutdown(ShutdownMsg { core: true })))
            .unwrap();
        let reply = conn.receive(TIMEOUT).unwrap();
        assert_eq!(reply.payload, Payload::rc(0));
        conn.shutdown().unwrap();

        assert_eq!(
            server.join().unwrap(),
            Payload::Shutdown(ShutdownMsg { core: true })
        );
    }

    #[test]
    fn connect_refused_is_connect_error() {
        let (listener, addr) = listener();
        drop(listener);
        let err = Connection::connect(&addr, TIMEOUT).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }), "{err}");
    }

    #[test]
    fn peer_close_is_peer_closed() {
        let (listener, addr) = listener();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let mut conn = Connection::connect(&addr, TIMEOUT).unwrap();
        let err = conn.receive(TIMEOUT).unwrap_err();
        assert!(matches!(err, TransportError::PeerClosed), "{err}");
    }

    #[test]
    fn silent_peer_times_out() {
        let (listener, addr) = listener();
        std::thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_secs(2));
        });

        let mut conn = Connection::connect(&addr, TIMEOUT).unwrap();
        let err = conn.receive(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, TransportError::Receive(_)), "{err}");
    }

    #[test]
    fn unknown_message_type_is_malformed() {
        let (listener, addr) = listener();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let header = frame::encode_header(4242, 0).unwrap();
            stream.write_all(&header).unwrap();
            std::thread::sleep(Duration::from_millis(200));
        });

        let mut conn = Connection::connect(&addr, TIMEOUT).unwrap();
        let err = conn.receive(TIMEOUT).unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)), "{err}");
    }
}
