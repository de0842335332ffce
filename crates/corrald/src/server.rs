//! Blocking RPC listener.
//!
//! One accept thread; each accepted connection gets its own thread that
//! reads one request, hands it to the handler, writes the response and
//! closes.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use corral_proto::{Connection, Envelope, Payload};
use tracing::{debug, error, info, warn};

/// Turns one request into one response.
pub type Handler = Arc<dyn Fn(Envelope) -> Payload + Send + Sync>;

/// A bound, not yet serving, listener.
pub struct RpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    timeout: Duration,
}

impl RpcServer {
    pub fn bind(addr: &str, timeout: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "rpc listener bound");
        Ok(Self {
            listener,
            local_addr,
            timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the accept loop.
    pub fn spawn(self, handler: Handler) -> io::Result<ServerHandle> {
        let stopping = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopping);
        let Self {
            listener,
            local_addr,
            timeout,
        } = self;
        let thread = std::thread::Builder::new()
            .name("rpc-accept".to_string())
            .spawn(move || accept_loop(&listener, &flag, timeout, &handler))?;
        Ok(ServerHandle {
            local_addr,
            stopping,
            thread: Some(thread),
        })
    }
}

fn accept_loop(listener: &TcpListener, stopping: &AtomicBool, timeout: Duration, handler: &Handler) {
    for stream in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let handler = Arc::clone(handler);
        let spawned = std::thread::Builder::new()
            .name("rpc-conn".to_string())
            .spawn(move || serve_connection(stream, timeout, handler.as_ref()));
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn connection thread");
        }
    }
    debug!("rpc accept loop exited");
}

fn serve_connection(
    stream: TcpStream,
    timeout: Duration,
    handler: &(dyn Fn(Envelope) -> Payload + Send + Sync),
) {
    let _ = stream.set_write_timeout(Some(timeout));
    let mut conn = Connection::from_stream(stream);
    let peer = conn.peer_addr();

    let response = match conn.receive(timeout) {
        Ok(request) => {
            let msg_type = request.message_type();
            debug!(?peer, %msg_type, "request received");
            handler(request)
        }
        Err(e) => {
            warn!(?peer, error = %e, "failed to receive request");
            // Best effort; the peer may already be gone.
            Payload::rc(e.code())
        }
    };

    if let Err(e) = conn.send(&Envelope::new(response)) {
        warn!(?peer, error = %e, "failed to send response");
    }
    if let Err(e) = conn.shutdown() {
        debug!(?peer, error = %e, "connection shutdown failed");
    }
}

/// A running listener.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and join the accept thread. Connections already
    /// being served finish on their own threads.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stopping.store(true, Ordering::SeqCst);
        // Unblock accept().
        let wake = wake_addr(self.local_addr);
        if let Err(e) = TcpStream::connect_timeout(&wake, Duration::from_secs(1)) {
            warn!(addr = %wake, error = %e, "failed to wake rpc listener");
        }
        if thread.join().is_err() {
            error!("rpc accept thread panicked");
        }
        info!(addr = %self.local_addr, "rpc listener stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A wildcard bind address cannot be connected to; use loopback instead.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    let mut wake = addr;
    if wake.ip().is_unspecified() {
        match wake {
            SocketAddr::V4(_) => wake.set_ip([127, 0, 0, 1].into()),
            SocketAddr::V6(_) => wake.set_ip(std::net::Ipv6Addr::LOCALHOST.into()),
        }
    }
    wake
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_proto::{send_recv, send_recv_rc};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn echo_server() -> ServerHandle {
        let server = RpcServer::bind("127.0.0.1:0", TIMEOUT).unwrap();
        server
            .spawn(Arc::new(|env: Envelope| match env.payload {
                Payload::Ping => Payload::rc(0),
                _ => Payload::rc(22),
            }))
            .unwrap()
    }

    #[test]
    fn answers_requests() {
        let mut server = echo_server();
        let addr = server.local_addr().to_string();
        send_recv_rc(&addr, Payload::Ping, TIMEOUT).unwrap();
        let reply = send_recv(&addr, Payload::Reconfigure, TIMEOUT).unwrap();
        assert_eq!(reply.payload, Payload::rc(22));
        server.stop();
    }

    #[test]
    fn stop_refuses_new_connections() {
        let mut server = echo_server();
        let addr = server.local_addr().to_string();
        server.stop();
        server.stop();
        assert!(send_recv_rc(&addr, Payload::Ping, TIMEOUT).is_err());
    }

    #[test]
    fn wildcard_wakes_on_loopback() {
        let addr: SocketAddr = "0.0.0.0:6817".parse().unwrap();
        assert_eq!(wake_addr(addr), "127.0.0.1:6817".parse().unwrap());
    }
}
