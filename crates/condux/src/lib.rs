//! Topic-multiplexed publish/subscribe over a single duplex connection.
//!
//! condux keeps one socket open to a server and carries many logical topics
//! over it, each with a cached snapshot, listeners, and request/response
//! correlation. Reconnection, resubscription, and late topic registration
//! are handled by the client.
//!
//! # Crate Structure
//!
//! - [`frame`]: `<type>,<topic>,<payload>` text frame codec
//! - [`transport`]: duplex socket boundary (in-memory; WebSocket behind `websocket`)
//! - [`client`]: connection manager, channels, and dispatch (behind `client`)

/// Re-export frame types.
pub mod frame {
    pub use condux_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use condux_transport::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use condux_client::*;
}
