use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{CloseReason, Socket, SocketDriver, Transport};

/// In-process transport.
///
/// Every [`Transport::open`] creates a socket pair and hands the far end to
/// the paired [`MemoryServer`], which decides when (and whether) the socket
/// opens, what it delivers, and when it closes.
#[derive(Clone)]
pub struct MemoryTransport {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    opened: Arc<AtomicUsize>,
    refusing: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Create a transport and the server end that receives its sockets.
    pub fn new() -> (Self, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            accepted: tx,
            opened: Arc::new(AtomicUsize::new(0)),
            refusing: Arc::new(AtomicBool::new(false)),
        };
        (transport, MemoryServer { accepted: rx })
    }

    /// Number of sockets acquired so far (including refused attempts).
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Make subsequent `open` calls fail.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

impl Transport for MemoryTransport {
    fn open(&self) -> Result<Socket> {
        let attempt = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Open {
                target: "memory".to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (socket, driver) = Socket::channel();
        self.accepted
            .send(MemoryPeer { driver, attempt })
            .map_err(|_| TransportError::Shutdown)?;
        debug!(attempt, "memory socket acquired");
        Ok(socket)
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

/// Receives the far end of every socket a [`MemoryTransport`] opens.
pub struct MemoryServer {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    /// Wait for the next socket.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }

    /// Take the next socket if one has already been opened.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.try_recv().ok()
    }
}

/// The server end of one in-memory socket.
pub struct MemoryPeer {
    driver: SocketDriver,
    attempt: usize,
}

impl MemoryPeer {
    /// Which `open` call produced this socket (1-based).
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Complete the connection.
    pub fn open(&self) {
        self.driver.emit_open();
    }

    /// Deliver one text frame to the client.
    pub fn send(&self, text: impl Into<String>) {
        self.driver.emit_message(text);
    }

    /// Close the socket from the server side.
    pub fn close(&self, reason: impl Into<String>) {
        self.driver.emit_close(CloseReason::new(reason));
    }

    /// Wait for the next frame the client wrote; `None` once the client has
    /// dropped the socket.
    pub async fn recv(&mut self) -> Option<String> {
        self.driver.recv_outbound().await
    }

    /// Take the next frame the client wrote, if any is queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.driver.try_recv_outbound()
    }

    /// Drain every frame the client has written so far.
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = self.driver.try_recv_outbound() {
            frames.push(frame);
        }
        frames
    }

    /// Whether the client has abandoned this socket.
    pub fn is_detached(&self) -> bool {
        self.driver.is_detached()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::SocketEvent;

    #[tokio::test]
    async fn open_hands_peer_to_server() {
        let (transport, mut server) = MemoryTransport::new();
        let socket = transport.open().expect("open should succeed");
        let (sender, mut events) = socket.into_parts();

        let mut peer = server.accept().await.expect("peer should be accepted");
        assert_eq!(peer.attempt(), 1);
        assert_eq!(transport.open_count(), 1);

        peer.open();
        peer.send("conn,chat,{}");
        assert_eq!(events.recv().await, Some(SocketEvent::Open));
        assert_eq!(
            events.recv().await,
            Some(SocketEvent::Message("conn,chat,{}".to_string()))
        );

        sender.send("sub,chat".to_string()).unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("sub,chat"));
    }

    #[tokio::test]
    async fn refusing_transport_fails_open() {
        let (transport, mut server) = MemoryTransport::new();
        transport.set_refusing(true);

        assert!(matches!(
            transport.open(),
            Err(TransportError::Open { .. })
        ));
        assert_eq!(transport.open_count(), 1);
        assert!(server.try_accept().is_none());
    }

    #[test]
    fn dropped_server_shuts_transport_down() {
        let (transport, server) = MemoryTransport::new();
        drop(server);
        assert!(matches!(transport.open(), Err(TransportError::Shutdown)));
    }

    #[tokio::test]
    async fn drain_collects_written_frames() {
        let (transport, mut server) = MemoryTransport::new();
        let (sender, _events) = transport.open().unwrap().into_parts();
        let mut peer = server.try_accept().expect("peer should be queued");

        sender.send("sub,a".to_string()).unwrap();
        sender.send("sub,b".to_string()).unwrap();
        assert_eq!(peer.drain(), vec!["sub,a".to_string(), "sub,b".to_string()]);
        assert!(peer.try_recv().is_none());

        drop(sender);
        assert!(peer.recv().await.is_none());
    }
}
