use std::fmt;

use tokio::sync::mpsc;

use crate::error::{Result, TransportError};

/// A source of duplex text sockets.
///
/// `open` must not block: it hands back a socket immediately and reports the
/// outcome of the actual connection through [`SocketEvent::Open`] or
/// [`SocketEvent::Close`].
pub trait Transport: Send + Sync + 'static {
    /// Acquire a new socket.
    fn open(&self) -> Result<Socket>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

/// Why a socket closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Human-readable description.
    pub message: String,
    /// Protocol close code, if the transport has one.
    pub code: Option<u16>,
}

impl CloseReason {
    /// Create a close reason with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create a close reason with a message and close code.
    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code: {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

/// Events delivered by a socket, in transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The socket is ready to carry frames.
    Open,
    /// One whole text frame.
    Message(String),
    /// The socket is gone; no further events follow.
    Close(CloseReason),
}

/// Client side of a socket: an outbound writer plus the inbound event stream.
pub struct Socket {
    sender: SocketSender,
    events: mpsc::UnboundedReceiver<SocketEvent>,
}

impl Socket {
    /// Create a socket together with the driver a transport implementation
    /// uses to feed it.
    pub fn channel() -> (Socket, SocketDriver) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let socket = Socket {
            sender: SocketSender { tx: outbound_tx },
            events: events_rx,
        };
        let driver = SocketDriver {
            outbound: outbound_rx,
            events: events_tx,
        };
        (socket, driver)
    }

    /// Split into the writer half and the event stream.
    pub fn into_parts(self) -> (SocketSender, mpsc::UnboundedReceiver<SocketEvent>) {
        (self.sender, self.events)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// Writes whole text frames to a socket.
#[derive(Debug, Clone)]
pub struct SocketSender {
    tx: mpsc::UnboundedSender<String>,
}

impl SocketSender {
    /// Queue one text frame on the socket.
    pub fn send(&self, text: String) -> Result<()> {
        self.tx.send(text).map_err(|_| TransportError::Closed)
    }

    /// Whether the transport side has dropped the socket.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Transport side of a socket.
///
/// Emitting after the client dropped its [`Socket`] is a silent no-op: the
/// client has already moved to a newer socket.
#[derive(Debug)]
pub struct SocketDriver {
    outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl SocketDriver {
    /// Report that the socket is open.
    pub fn emit_open(&self) {
        let _ = self.events.send(SocketEvent::Open);
    }

    /// Deliver one inbound text frame.
    pub fn emit_message(&self, text: impl Into<String>) {
        let _ = self.events.send(SocketEvent::Message(text.into()));
    }

    /// Report that the socket closed.
    pub fn emit_close(&self, reason: CloseReason) {
        let _ = self.events.send(SocketEvent::Close(reason));
    }

    /// Next outbound frame written by the client; `None` once the client has
    /// dropped every sender.
    pub async fn recv_outbound(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Next outbound frame if one is already queued.
    pub fn try_recv_outbound(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Whether the client has dropped its event stream.
    pub fn is_detached(&self) -> bool {
        self.events.is_closed()
    }
}
