//! Topic-multiplexed publish/subscribe client.
//!
//! One duplex connection carries many independent topics. Each topic is a
//! [`Channel`] with a cached snapshot, its own listeners, and optional
//! request/response correlation. The [`Client`] owns the connection
//! lifecycle: queueing while disconnected, resubscribing every topic after a
//! reconnect, and retrying topics the server was not ready to serve.
//!
//! ```no_run
//! use condux_client::{Client, Handlers};
//! use condux_transport::MemoryTransport;
//!
//! # async fn example() -> condux_client::Result<()> {
//! let (transport, _server) = MemoryTransport::new();
//! let client = Client::new(transport);
//! client.connect()?;
//!
//! let chat = client.register_topic("/chat")?;
//! chat.add_listener(Handlers::new().on_message(|message, data| {
//!     println!("{message} -> {data}");
//! }));
//!
//! client.action("post").dispatch(serde_json::json!({ "text": "hi" }))?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod registry;

mod connection;
mod topics;

pub use channel::{merge_values, Channel, ChannelOptions, ChannelStatus};
pub use client::{Action, Client};
pub use config::{
    ClientConfig, Hook, Interval, LifecycleHooks, Persistence, DEFAULT_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_GRACE, DEFAULT_RECONNECT_INTERVAL, DEFAULT_REQUEST_TIMEOUT,
};
pub use connection::{ClientStats, ConnectionState};
pub use control::{ActionMessage, RegistrationNotice, RequestEnvelope};
pub use dispatcher::{ChannelEvent, Handlers, ListenerToken};
pub use error::{ClientError, Result};
pub use registry::ClientRegistry;
