//! Connection lifecycle, outbound queueing, and inbound demultiplexing.
//!
//! Every (re)connect acquires a fresh socket from the transport and starts a
//! new epoch. A reader task per epoch feeds socket events back here; events
//! from an epoch that has since been replaced are ignored.
//!
//! Lock order is `core` -> `topics` -> channel state. Listener callbacks and
//! lifecycle hooks never run while any of them is held.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use condux_frame::{
    decode_frame, decode_payload, encode_frame, is_reserved, validate_topic, Frame, FrameConfig,
    FrameType, CLIENT_ACTIONS, REGISTRATIONS,
};
use condux_transport::{CloseReason, SocketEvent, SocketSender, Transport};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, ChannelOptions, ChannelStatus};
use crate::config::{ClientConfig, Hook, Interval, LifecycleHooks, Persistence};
use crate::control::RegistrationNotice;
use crate::dispatcher::{invoke_hook, Dispatcher};
use crate::error::{ClientError, Result};
use crate::topics::TopicRegistry;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Counters for inbound frames the client dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Frames that could not be decoded at all.
    pub malformed_frames: u64,
    /// Frames for a topic with no registered channel.
    pub unknown_topic_frames: u64,
}

struct ReconnectSlot {
    id: u64,
    cancel: CancellationToken,
}

struct Core {
    state: ConnectionState,
    epoch: u64,
    /// Whether the current epoch ever reached `Connected`.
    reached_connected: bool,
    sender: Option<SocketSender>,
    queue: VecDeque<String>,
    reconnect: Option<ReconnectSlot>,
    next_reconnect_id: u64,
}

impl Core {
    /// Write `text` on the live socket. Returns false if not connected or the
    /// socket is gone.
    fn write_now(&self, text: &str) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        match &self.sender {
            Some(sender) => sender.send(text.to_string()).is_ok(),
            None => false,
        }
    }

    /// Abandon the current socket. Returns whether it had reached `Connected`.
    fn drop_socket(&mut self) -> bool {
        self.sender = None;
        self.state = ConnectionState::Disconnected;
        std::mem::replace(&mut self.reached_connected, false)
    }
}

pub(crate) struct Connection {
    transport: Box<dyn Transport>,
    frame_config: FrameConfig,
    request_timeout: Option<Duration>,
    reconnect_grace: Duration,
    persistence: Mutex<Persistence>,
    core: Mutex<Core>,
    topics: Mutex<TopicRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    dispatcher: Dispatcher,
    malformed_frames: AtomicU64,
    unknown_topic_frames: AtomicU64,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>, config: ClientConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            transport,
            frame_config: config.frame,
            request_timeout: config.request_timeout,
            reconnect_grace: config.reconnect_grace,
            persistence: Mutex::new(config.persistence),
            core: Mutex::new(Core {
                state: ConnectionState::Disconnected,
                epoch: 0,
                reached_connected: false,
                sender: None,
                queue: VecDeque::new(),
                reconnect: None,
                next_reconnect_id: 0,
            }),
            topics: Mutex::new(TopicRegistry::default()),
            state_tx,
            dispatcher: Dispatcher::spawn(),
            malformed_frames: AtomicU64::new(0),
            unknown_topic_frames: AtomicU64::new(0),
        })
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.transport_name()
    }

    pub fn state(&self) -> ConnectionState {
        self.core.lock().state
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Resolves once the connection is established.
    pub async fn ready(&self) {
        let mut state = self.state_tx.subscribe();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Connected)
            .await;
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            unknown_topic_frames: self.unknown_topic_frames.load(Ordering::Relaxed),
        }
    }

    pub async fn flush(&self) {
        self.dispatcher.flush().await;
    }

    // ---- lifecycle -------------------------------------------------------

    /// Start connecting. A no-op unless currently disconnected.
    pub fn connect(self: &Arc<Self>) -> Result<()> {
        if !self.open_epoch(false)? {
            debug!(state = %self.state(), "connect ignored; connection already active");
        }
        Ok(())
    }

    /// Acquire a fresh socket and start a new epoch.
    ///
    /// With `replace_pending`, a socket that is still connecting is abandoned
    /// in favour of the new one. Returns false if nothing was started.
    fn open_epoch(self: &Arc<Self>, replace_pending: bool) -> Result<bool> {
        let (epoch, events) = {
            let mut core = self.core.lock();
            match core.state {
                ConnectionState::Connected => return Ok(false),
                ConnectionState::Connecting if !replace_pending => return Ok(false),
                _ => {}
            }

            let socket = self.transport.open()?;
            let (sender, events) = socket.into_parts();
            core.epoch += 1;
            core.sender = Some(sender);
            core.state = ConnectionState::Connecting;
            core.reached_connected = false;
            self.state_tx.send_replace(ConnectionState::Connecting);
            (core.epoch, events)
        };

        info!(epoch, transport = self.transport_name(), "connecting");
        self.fire("on_connecting", |hooks| hooks.on_connecting.clone());
        tokio::spawn(read_socket(Arc::downgrade(self), epoch, events));
        Ok(true)
    }

    /// Drop the connection without triggering reconnection.
    pub fn disconnect(&self) {
        let was_connected = {
            let mut core = self.core.lock();
            if let Some(slot) = core.reconnect.take() {
                slot.cancel.cancel();
            }
            if core.state == ConnectionState::Disconnected {
                return;
            }
            core.epoch += 1;
            let was_connected = core.drop_socket();
            self.state_tx.send_replace(ConnectionState::Disconnected);
            for channel in self.topics.lock().ordered() {
                channel.connection_lost();
            }
            was_connected
        };

        info!("disconnected");
        if was_connected {
            self.fire("on_disconnect", |hooks| hooks.on_disconnect.clone());
        }
    }

    /// Start the reconnection loop. Returns false if one is already running
    /// or the connection is up.
    pub fn reconnect(self: &Arc<Self>) -> bool {
        let (id, cancel) = {
            let mut core = self.core.lock();
            if core.reconnect.is_some() {
                debug!("reconnect already in progress");
                return false;
            }
            if core.state == ConnectionState::Connected {
                debug!("reconnect ignored; already connected");
                return false;
            }
            core.next_reconnect_id += 1;
            let cancel = CancellationToken::new();
            core.reconnect = Some(ReconnectSlot {
                id: core.next_reconnect_id,
                cancel: cancel.clone(),
            });
            (core.next_reconnect_id, cancel)
        };

        let (attempts, interval) = {
            let persistence = self.persistence.lock();
            (persistence.attempts, persistence.interval.clone())
        };
        info!(attempts, "starting reconnection");
        tokio::spawn(reconnect_loop(
            Arc::downgrade(self),
            id,
            cancel,
            attempts,
            interval,
            self.reconnect_grace,
        ));
        true
    }

    fn reconnected(self: &Arc<Self>, id: u64) {
        let still_connected = {
            let mut core = self.core.lock();
            if !matches!(&core.reconnect, Some(slot) if slot.id == id) {
                return;
            }
            core.reconnect = None;
            core.state == ConnectionState::Connected
        };

        info!("reconnected");
        self.fire("on_reconnect", |hooks| hooks.on_reconnect.clone());

        // Dropped again before the loop finished; the close handler saw the
        // loop still running and did not start another.
        let enabled = self.persistence.lock().enabled;
        if !still_connected && enabled {
            self.reconnect();
        }
    }

    fn reconnect_exhausted(&self, id: u64, attempts: u32) {
        {
            let mut core = self.core.lock();
            if !matches!(&core.reconnect, Some(slot) if slot.id == id) {
                return;
            }
            core.reconnect = None;
            if core.state == ConnectionState::Connecting {
                core.epoch += 1;
                core.drop_socket();
                self.state_tx.send_replace(ConnectionState::Disconnected);
            }
        }

        warn!(attempts, "reconnection attempts exhausted");
        self.fire("on_timeout", |hooks| hooks.on_timeout.clone());
    }

    // ---- persistence -----------------------------------------------------

    pub fn persistence(&self) -> Persistence {
        self.persistence.lock().clone()
    }

    pub fn update_persistence(&self, update: impl FnOnce(&mut Persistence)) -> Persistence {
        let (snapshot, replaced_hook) = {
            let mut persistence = self.persistence.lock();
            let before = persistence.hooks.on_connecting.clone();
            update(&mut persistence);
            let after = persistence.hooks.on_connecting.clone();
            let replaced = match (&before, &after) {
                (Some(before), Some(after)) => !Arc::ptr_eq(before, after),
                (None, Some(_)) => true,
                _ => false,
            };
            (persistence.clone(), if replaced { after } else { None })
        };

        if let Some(hook) = replaced_hook {
            if self.state() == ConnectionState::Connecting {
                invoke_hook("on_connecting", &hook);
            }
        }
        snapshot
    }

    fn fire(&self, name: &'static str, pick: impl FnOnce(&LifecycleHooks) -> Option<Hook>) {
        let hook = pick(&self.persistence.lock().hooks);
        if let Some(hook) = hook {
            invoke_hook(name, &hook);
        }
    }

    // ---- outbound --------------------------------------------------------

    /// Write `frame` now if connected, otherwise queue it for the next
    /// connection.
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        let text = encode_frame(frame)?;
        let mut core = self.core.lock();
        if core.write_now(&text) {
            return Ok(());
        }
        core.queue.push_back(text);
        trace!(
            kind = %frame.kind,
            topic = %frame.topic,
            queued = core.queue.len(),
            "frame queued until connected"
        );
        Ok(())
    }

    /// Write `frame` only if connected.
    pub fn write_if_connected(&self, frame: &Frame) -> Result<()> {
        let text = encode_frame(frame)?;
        let core = self.core.lock();
        match (&core.sender, core.state) {
            (Some(sender), ConnectionState::Connected) => Ok(sender.send(text)?),
            _ => Err(ClientError::NotConnected(frame.topic.clone())),
        }
    }

    // ---- topics ----------------------------------------------------------

    /// Get or create the channel for `name`.
    ///
    /// A new channel is subscribed right away when connected; otherwise the
    /// next `Connected` transition subscribes it.
    pub fn register_topic(self: &Arc<Self>, name: &str, options: ChannelOptions) -> Result<Channel> {
        if is_reserved(name) {
            return Err(ClientError::ReservedTopic(name.to_string()));
        }
        validate_topic(name)?;

        let core = self.core.lock();
        let mut topics = self.topics.lock();
        if let Some(existing) = topics.get(name) {
            if existing.status() != ChannelStatus::Closed {
                return Ok(existing.clone());
            }
        }

        let channel = Channel::new(
            name,
            topics.next_seq(),
            options,
            self.request_timeout,
            Arc::downgrade(self),
            self.dispatcher.clone(),
        );
        topics.insert(channel.clone());
        if core.write_now(&Frame::subscribe(name).to_string()) {
            channel.set_status(ChannelStatus::Subscribing);
        }
        debug!(topic = %name, state = %core.state, "topic registered");
        Ok(channel)
    }

    pub fn topic(&self, name: &str) -> Option<Channel> {
        self.topics.lock().get(name).cloned()
    }

    pub fn topics(&self) -> Vec<Channel> {
        self.topics.lock().ordered()
    }

    pub fn rejected_topics(&self) -> Vec<String> {
        self.topics.lock().rejected()
    }

    // ---- inbound ---------------------------------------------------------

    fn is_current(&self, epoch: u64) -> bool {
        self.core.lock().epoch == epoch
    }

    fn handle_open(&self, epoch: u64) {
        {
            let mut core = self.core.lock();
            if core.epoch != epoch || core.state != ConnectionState::Connecting {
                return;
            }
            core.state = ConnectionState::Connected;
            core.reached_connected = true;

            core.write_now(&Frame::subscribe(CLIENT_ACTIONS).to_string());
            core.write_now(&Frame::subscribe(REGISTRATIONS).to_string());

            // A fresh `sub` supersedes any registration still awaited from
            // the previous epoch.
            let mut topics = self.topics.lock();
            let mut subscribed = 0usize;
            for channel in topics.ordered() {
                if channel.status() == ChannelStatus::Closed {
                    continue;
                }
                if core.write_now(&Frame::subscribe(channel.topic()).to_string()) {
                    channel.set_status(ChannelStatus::Subscribing);
                    topics.take_rejected(channel.topic());
                    subscribed += 1;
                }
            }
            drop(topics);

            let mut flushed = 0usize;
            while let Some(text) = core.queue.pop_front() {
                if !core.write_now(&text) {
                    core.queue.push_front(text);
                    break;
                }
                flushed += 1;
            }

            self.state_tx.send_replace(ConnectionState::Connected);
            info!(epoch, subscribed, flushed, "connected");
        }

        self.fire("on_connection", |hooks| hooks.on_connection.clone());
    }

    fn handle_close(self: &Arc<Self>, epoch: u64, reason: CloseReason) {
        let was_connected = {
            let mut core = self.core.lock();
            if core.epoch != epoch {
                return;
            }
            let was_connected = core.drop_socket();
            self.state_tx.send_replace(ConnectionState::Disconnected);
            for channel in self.topics.lock().ordered() {
                channel.connection_lost();
            }
            was_connected
        };

        if !was_connected {
            info!(epoch, reason = %reason, "connection attempt closed");
            return;
        }

        warn!(epoch, reason = %reason, "connection lost");
        self.fire("on_disconnect", |hooks| hooks.on_disconnect.clone());
        let enabled = self.persistence.lock().enabled;
        if enabled {
            self.reconnect();
        }
    }

    fn handle_text(&self, epoch: u64, text: &str) {
        let frame = match decode_frame(text, &self.frame_config) {
            Ok(frame) => frame,
            Err(err) => {
                self.malformed_frames.fetch_add(1, Ordering::Relaxed);
                warn!(epoch, error = %err, "dropping undecodable frame");
                return;
            }
        };
        let (kind, payload) = decode_payload(&frame);
        trace!(epoch, kind = %kind, topic = %frame.topic, "frame received");

        match frame.topic.as_str() {
            REGISTRATIONS => return self.handle_registration(&payload),
            CLIENT_ACTIONS => {
                debug!(kind = %kind, "ignoring frame on the actions topic");
                return;
            }
            _ => {}
        }

        let topic = frame.topic.as_str();
        match kind {
            FrameType::Unsubscribe => self.handle_remote_close(topic),
            FrameType::Rejected => self.handle_rejected(topic),
            FrameType::Subscribe | FrameType::Request => {
                debug!(kind = %kind, topic = %topic, "ignoring client-only frame type");
            }
            FrameType::Connection | FrameType::Message | FrameType::Response | FrameType::Error => {
                let Some(channel) = self.topic(topic) else {
                    self.unknown_topic(topic, kind);
                    return;
                };
                match kind {
                    FrameType::Connection => channel.hydrate(payload),
                    FrameType::Message => channel.update(payload),
                    FrameType::Response => channel.respond(payload),
                    _ => channel.fail(payload),
                }
            }
        }
    }

    fn handle_registration(&self, payload: &Value) {
        let Some(notice) = RegistrationNotice::parse(payload) else {
            debug!("ignoring unrecognised registration notice");
            return;
        };
        let Some(topic) = notice.registered_topic() else {
            return;
        };

        let core = self.core.lock();
        let mut topics = self.topics.lock();
        if !topics.take_rejected(topic) {
            trace!(topic = %topic, "registration for a topic that was not waiting");
            return;
        }
        let Some(channel) = topics.get(topic) else {
            return;
        };
        if channel.status() == ChannelStatus::Closed {
            return;
        }
        if core.write_now(&Frame::subscribe(topic).to_string()) {
            channel.set_status(ChannelStatus::Subscribing);
            info!(topic = %topic, "topic registered on server; resubscribed");
        } else {
            debug!(topic = %topic, "topic registered while offline; next connection subscribes");
        }
    }

    fn handle_rejected(&self, topic: &str) {
        let mut topics = self.topics.lock();
        let Some(channel) = topics.get(topic).cloned() else {
            drop(topics);
            self.unknown_topic(topic, FrameType::Rejected);
            return;
        };
        let queued = topics.queue_rejected(topic);
        drop(topics);

        channel.set_status(ChannelStatus::Unsubscribed);
        info!(topic = %topic, queued, "subscription rejected; waiting for registration");
    }

    fn handle_remote_close(&self, topic: &str) {
        let removed = self.topics.lock().remove(topic);
        match removed {
            Some(channel) => {
                channel.close_remote();
                info!(topic = %topic, "topic closed by server");
            }
            None => self.unknown_topic(topic, FrameType::Unsubscribe),
        }
    }

    fn unknown_topic(&self, topic: &str, kind: FrameType) {
        self.unknown_topic_frames.fetch_add(1, Ordering::Relaxed);
        debug!(topic = %topic, kind = %kind, "dropping frame for unregistered topic");
    }
}

async fn read_socket(
    link: Weak<Connection>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(connection) = link.upgrade() else {
            return;
        };
        if !connection.is_current(epoch) {
            trace!(epoch, "socket superseded; reader exiting");
            return;
        }
        match event {
            SocketEvent::Open => connection.handle_open(epoch),
            SocketEvent::Message(text) => connection.handle_text(epoch, &text),
            SocketEvent::Close(reason) => {
                connection.handle_close(epoch, reason);
                return;
            }
        }
    }

    if let Some(connection) = link.upgrade() {
        connection.handle_close(epoch, CloseReason::new("transport dropped the socket"));
    }
}

async fn reconnect_loop(
    link: Weak<Connection>,
    id: u64,
    cancel: CancellationToken,
    attempts: u32,
    interval: Interval,
    grace: Duration,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(grace) => {}
    }

    let mut state = match link.upgrade() {
        Some(connection) => connection.watch_state(),
        None => return,
    };

    for made in 0..attempts {
        {
            let Some(connection) = link.upgrade() else {
                return;
            };
            if cancel.is_cancelled() {
                return;
            }
            match connection.open_epoch(true) {
                Ok(_) => debug!(attempt = made + 1, attempts, "reconnect attempt started"),
                Err(err) => warn!(attempt = made + 1, attempts, error = %err, "reconnect attempt failed"),
            }
        }

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            connected = wait_connected(&mut state) => connected,
            _ = tokio::time::sleep(interval.delay(made)) => false,
        };
        if connected {
            if let Some(connection) = link.upgrade() {
                connection.reconnected(id);
            }
            return;
        }
    }

    if let Some(connection) = link.upgrade() {
        connection.reconnect_exhausted(id, attempts);
    }
}

async fn wait_connected(state: &mut watch::Receiver<ConnectionState>) -> bool {
    state
        .wait_for(|state| *state == ConnectionState::Connected)
        .await
        .is_ok()
}
