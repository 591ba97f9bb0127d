use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use condux_frame::{Frame, FrameType, CLIENT_ACTIONS};
use condux_transport::Transport;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::channel::{Channel, ChannelOptions};
use crate::config::{ClientConfig, Persistence};
use crate::connection::{ClientStats, Connection, ConnectionState};
use crate::control::ActionMessage;
use crate::error::Result;

/// Handle to one multiplexed connection and its topics.
///
/// Cloning is cheap; clones share the connection. Must be created inside a
/// Tokio runtime.
#[derive(Clone)]
pub struct Client {
    connection: Arc<Connection>,
}

impl Client {
    /// Create a client with default configuration. Does not connect.
    pub fn new(transport: impl Transport) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Create a client with explicit configuration. Does not connect.
    pub fn with_config(transport: impl Transport, config: ClientConfig) -> Self {
        Self {
            connection: Connection::new(Box::new(transport), config),
        }
    }

    /// Whether two handles share the same connection.
    pub fn ptr_eq(&self, other: &Client) -> bool {
        Arc::ptr_eq(&self.connection, &other.connection)
    }

    pub fn transport_name(&self) -> &'static str {
        self.connection.transport_name()
    }

    // ---- connection lifecycle ----

    /// Start connecting. A logged no-op if already connecting or connected.
    ///
    /// Returns once the transport has handed out a socket; use
    /// [`ready`](Self::ready) to wait for the connection itself.
    pub fn connect(&self) -> Result<()> {
        self.connection.connect()
    }

    /// Resolves once the client is connected.
    pub async fn ready(&self) {
        self.connection.ready().await;
    }

    /// Drop the connection and cancel any reconnection in progress.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Start the reconnection loop. Returns false if one is already running
    /// or the client is connected.
    pub fn reconnect(&self) -> bool {
        self.connection.reconnect()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state() == ConnectionState::Connecting
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    // ---- persistence ----

    pub fn persistence(&self) -> Persistence {
        self.connection.persistence()
    }

    /// Modify the reconnection policy in place and return the result.
    ///
    /// If `on_connecting` is replaced while a connection attempt is in
    /// progress, the new hook runs immediately.
    pub fn update_persistence(&self, update: impl FnOnce(&mut Persistence)) -> Persistence {
        self.connection.update_persistence(update)
    }

    pub fn enable_persistence(&self) -> Persistence {
        self.update_persistence(|persistence| persistence.enabled = true)
    }

    pub fn disable_persistence(&self) -> Persistence {
        self.update_persistence(|persistence| persistence.enabled = false)
    }

    // ---- topics ----

    /// Get or create the channel for `topic` with default options.
    pub fn register_topic(&self, topic: &str) -> Result<Channel> {
        self.register_topic_with(topic, ChannelOptions::default())
    }

    /// Get or create the channel for `topic`.
    ///
    /// `options` only apply when the channel is created; an existing channel
    /// is returned as is.
    pub fn register_topic_with(&self, topic: &str, options: ChannelOptions) -> Result<Channel> {
        self.connection.register_topic(topic, options)
    }

    /// The registered channel for `topic`, if any.
    pub fn topic(&self, topic: &str) -> Option<Channel> {
        self.connection.topic(topic)
    }

    /// Every registered channel, in registration order.
    pub fn topics(&self) -> Vec<Channel> {
        self.connection.topics()
    }

    /// Topics the server rejected and that are waiting for a registration
    /// notice.
    pub fn pending_registrations(&self) -> Vec<String> {
        self.connection.rejected_topics()
    }

    // ---- actions ----

    pub fn action(&self, name: impl Into<String>) -> Action {
        Action {
            name: name.into(),
            client: self.clone(),
        }
    }

    pub fn actions(&self, names: &[&str]) -> HashMap<String, Action> {
        names
            .iter()
            .map(|name| (name.to_string(), self.action(*name)))
            .collect()
    }

    // ---- diagnostics ----

    pub fn stats(&self) -> ClientStats {
        self.connection.stats()
    }

    /// Resolves once every listener notification scheduled so far has run.
    pub async fn flush(&self) {
        self.connection.flush().await;
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.transport_name())
            .field("state", &self.state())
            .field("topics", &self.topics().len())
            .finish()
    }
}

/// A named action sent to the server on `/CLIENT_ACTIONS`.
#[derive(Clone)]
pub struct Action {
    name: String,
    client: Client,
}

impl Action {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send the action with `payload`, or queue it until connected.
    pub fn dispatch(&self, payload: Value) -> Result<()> {
        let message = ActionMessage::new(self.name.clone(), payload);
        let frame = Frame::json(FrameType::Message, CLIENT_ACTIONS, &message)?;
        debug!(action = %self.name, "dispatching action");
        self.client.connection.send_frame(&frame)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish()
    }
}
