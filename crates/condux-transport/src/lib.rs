//! Duplex text transport boundary.
//!
//! The client core never touches sockets directly. It asks a [`Transport`]
//! for a fresh [`Socket`] on every (re)connect, reads [`SocketEvent`]s from
//! it, and writes whole text frames through its [`SocketSender`].
//!
//! Implementations:
//! - [`MemoryTransport`]: in-process pair, driven by tests and demos
//! - [`WebSocketTransport`]: `tokio-tungstenite` client (behind `websocket`)

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use memory::{MemoryPeer, MemoryServer, MemoryTransport};
pub use traits::{CloseReason, Socket, SocketDriver, SocketEvent, SocketSender, Transport};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
