use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use condux_frame::{invalid_payload, Frame, FrameType};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::connection::Connection;
use crate::control::{request_token, RequestEnvelope};
use crate::dispatcher::{
    invoke_isolated, panic_message, Batch, ChannelEvent, Dispatcher, Handlers, ListenerToken,
};
use crate::error::{ClientError, Result};

/// Default number of prior snapshots a channel keeps.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

pub type HydrateFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
pub type UpdateFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// Subscription status of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// No subscription is in effect on the current connection.
    Unsubscribed,
    /// A `sub` frame was written; waiting for hydration.
    Subscribing,
    /// Hydrated and receiving messages.
    Subscribed,
    /// Closed for good.
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelStatus::Unsubscribed => "unsubscribed",
            ChannelStatus::Subscribing => "subscribing",
            ChannelStatus::Subscribed => "subscribed",
            ChannelStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How a channel maintains its snapshot.
#[derive(Clone)]
pub struct ChannelOptions {
    /// Prior snapshots to keep. `None` keeps every one.
    pub history_limit: Option<usize>,
    /// Maps a hydration payload to the snapshot. Default: identity.
    pub hydrate: Option<HydrateFn>,
    /// Computes the next snapshot from `(previous, message)`. Default: the
    /// message replaces the snapshot.
    pub update: Option<UpdateFn>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            history_limit: Some(DEFAULT_HISTORY_LIMIT),
            hydrate: None,
            update: None,
        }
    }
}

impl ChannelOptions {
    /// Options that deep-merge each message into the snapshot (see
    /// [`merge_values`]).
    pub fn merging() -> Self {
        Self::default().with_update(merge_values)
    }

    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_hydrate(mut self, hydrate: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.hydrate = Some(Arc::new(hydrate));
        self
    }

    pub fn with_update(
        mut self,
        update: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.update = Some(Arc::new(update));
        self
    }
}

impl fmt::Debug for ChannelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelOptions")
            .field("history_limit", &self.history_limit)
            .field("hydrate", &self.hydrate.is_some())
            .field("update", &self.update.is_some())
            .finish()
    }
}

/// Deep-merge `next` into `previous`.
///
/// - object + object: keys merge recursively
/// - array + array: concatenation, duplicates dropped
/// - array + anything else: appended unless already present
/// - otherwise `next` replaces `previous`
pub fn merge_values(previous: &Value, next: &Value) -> Value {
    match (previous, next) {
        (Value::Object(prev), Value::Object(incoming)) => {
            let mut merged = prev.clone();
            for (key, value) in incoming {
                let entry = match merged.get(key) {
                    Some(existing) => merge_values(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), entry);
            }
            Value::Object(merged)
        }
        (Value::Array(prev), Value::Array(incoming)) => {
            let mut merged: Vec<Value> = Vec::with_capacity(prev.len() + incoming.len());
            for value in prev.iter().chain(incoming) {
                if !merged.contains(value) {
                    merged.push(value.clone());
                }
            }
            Value::Array(merged)
        }
        (Value::Array(prev), value) => {
            let mut merged = prev.clone();
            if !merged.contains(value) {
                merged.push(value.clone());
            }
            Value::Array(merged)
        }
        (_, value) => value.clone(),
    }
}

type PendingReply = oneshot::Sender<Result<Value>>;

struct ChannelState {
    status: ChannelStatus,
    data: Value,
    hydrated: bool,
    history: VecDeque<Value>,
    version: u64,
    next_token: u64,
    listeners: BTreeMap<ListenerToken, Handlers>,
    pending: HashMap<String, PendingReply>,
}

struct ChannelInner {
    topic: String,
    seq: u64,
    options: ChannelOptions,
    request_timeout: Option<Duration>,
    link: Weak<Connection>,
    dispatcher: Dispatcher,
    state: Mutex<ChannelState>,
}

/// One topic's view of the shared connection.
///
/// Handles are cheap to clone; every clone refers to the same channel.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn new(
        topic: impl Into<String>,
        seq: u64,
        options: ChannelOptions,
        request_timeout: Option<Duration>,
        link: Weak<Connection>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                topic: topic.into(),
                seq,
                options,
                request_timeout,
                link,
                dispatcher,
                state: Mutex::new(ChannelState {
                    status: ChannelStatus::Unsubscribed,
                    data: Value::Null,
                    hydrated: false,
                    history: VecDeque::new(),
                    version: 0,
                    next_token: 0,
                    listeners: BTreeMap::new(),
                    pending: HashMap::new(),
                }),
            }),
        }
    }

    /// Whether two handles refer to the same channel.
    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Current snapshot (`Null` before the first hydration).
    pub fn data(&self) -> Value {
        self.inner.state.lock().data.clone()
    }

    /// Retained prior snapshot at `index`; 0 is the oldest.
    pub fn history(&self, index: usize) -> Option<Value> {
        self.inner.state.lock().history.get(index).cloned()
    }

    pub fn history_len(&self) -> usize {
        self.inner.state.lock().history.len()
    }

    /// Number of messages applied to the snapshot.
    pub fn version(&self) -> u64 {
        self.inner.state.lock().version
    }

    pub fn status(&self) -> ChannelStatus {
        self.inner.state.lock().status
    }

    pub fn is_subscribed(&self) -> bool {
        self.status() == ChannelStatus::Subscribed
    }

    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    /// Register listener callbacks.
    ///
    /// If the channel is already subscribed, `connection` runs right away
    /// with the current snapshot.
    pub fn add_listener(&self, handlers: Handlers) -> ListenerToken {
        let (token, hydration) = {
            let mut state = self.inner.state.lock();
            state.next_token += 1;
            let token = ListenerToken(state.next_token);
            let hydration = (state.status == ChannelStatus::Subscribed && handlers.has_connection())
                .then(|| (handlers.clone(), state.data.clone()));
            state.listeners.insert(token, handlers);
            (token, hydration)
        };

        if let Some((handlers, data)) = hydration {
            let event = ChannelEvent::Connection { data };
            invoke_isolated(self.topic(), event.name(), Some(token), || {
                handlers.handle(&event)
            });
        }
        token
    }

    /// Remove a listener. Batches already scheduled still reach it.
    pub fn remove_listener(&self, token: ListenerToken) -> bool {
        self.inner.state.lock().listeners.remove(&token).is_some()
    }

    /// Send a correlated request and wait for its `res`.
    ///
    /// Fails without writing anything when the channel is closed or the
    /// client is not connected. A matching `err` frame fails the request with
    /// [`ClientError::Remote`].
    pub async fn request(&self, constraints: Value) -> Result<Value> {
        let connection = self.inner.link.upgrade().ok_or(ClientError::ClientDropped)?;
        let token = Uuid::new_v4().to_string();
        let frame = Frame::json(
            FrameType::Request,
            self.topic(),
            &RequestEnvelope {
                request_token: token.clone(),
                constraints,
            },
        )?;

        let (reply, response) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            if state.status == ChannelStatus::Closed {
                return Err(ClientError::ChannelClosed(self.inner.topic.clone()));
            }
            state.pending.insert(token.clone(), reply);
        }

        if let Err(err) = connection.write_if_connected(&frame) {
            self.forget_request(&token);
            return Err(err);
        }
        drop(connection);
        trace!(topic = %self.inner.topic, token = %token, "request sent");

        let outcome = match self.inner.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, response).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.forget_request(&token);
                    return Err(ClientError::Timeout(limit));
                }
            },
            None => response.await,
        };
        outcome.unwrap_or(Err(ClientError::ClientDropped))
    }

    /// Close the channel: pending requests fail, listeners get `close` and are
    /// removed, and the server is told to stop sending.
    pub fn close(&self) {
        if !self.shut() {
            return;
        }
        let Some(connection) = self.inner.link.upgrade() else {
            return;
        };
        if let Err(err) = connection.send_frame(&Frame::unsubscribe(self.topic())) {
            debug!(topic = %self.inner.topic, error = %err, "failed to send unsubscribe");
        }
    }

    pub(crate) fn seq(&self) -> u64 {
        self.inner.seq
    }

    pub(crate) fn set_status(&self, status: ChannelStatus) {
        let mut state = self.inner.state.lock();
        if state.status != ChannelStatus::Closed {
            state.status = status;
        }
    }

    /// Closed by the server (inbound `uns`).
    pub(crate) fn close_remote(&self) {
        self.shut();
    }

    /// The connection this channel was subscribed on went away.
    pub(crate) fn connection_lost(&self) {
        let pending = {
            let mut state = self.inner.state.lock();
            if state.status != ChannelStatus::Closed {
                state.status = ChannelStatus::Unsubscribed;
            }
            std::mem::take(&mut state.pending)
        };
        for (_, reply) in pending {
            let _ = reply.send(Err(ClientError::Disconnected));
        }
    }

    /// Seed the snapshot from a `conn` payload.
    pub(crate) fn hydrate(&self, payload: Value) {
        let next = match &self.inner.options.hydrate {
            Some(hydrate) => match self.run_snapshot_fn("hydrate", || hydrate(&payload)) {
                Some(next) => next,
                None => {
                    self.fail(invalid_payload());
                    return;
                }
            },
            None => payload,
        };

        let mut state = self.inner.state.lock();
        if state.status == ChannelStatus::Closed {
            return;
        }
        if state.hydrated {
            let previous = std::mem::replace(&mut state.data, next);
            self.push_history(&mut state, previous);
        } else {
            state.data = next;
            state.hydrated = true;
        }
        state.status = ChannelStatus::Subscribed;

        let event = ChannelEvent::Connection {
            data: state.data.clone(),
        };
        self.schedule(&state, event);
    }

    /// Apply a `msg` payload to the snapshot.
    pub(crate) fn update(&self, message: Value) {
        let next = match &self.inner.options.update {
            Some(update) => {
                let previous = {
                    let state = self.inner.state.lock();
                    if state.status == ChannelStatus::Closed {
                        return;
                    }
                    state.data.clone()
                };
                match self.run_snapshot_fn("update", || update(&previous, &message)) {
                    Some(next) => next,
                    None => {
                        self.fail(invalid_payload());
                        return;
                    }
                }
            }
            None => message.clone(),
        };

        let mut state = self.inner.state.lock();
        if state.status == ChannelStatus::Closed {
            return;
        }
        let previous = std::mem::replace(&mut state.data, next);
        self.push_history(&mut state, previous);
        state.version += 1;

        let event = ChannelEvent::Message {
            message,
            data: state.data.clone(),
        };
        self.schedule(&state, event);
    }

    /// A `res` payload: resolve the matching request and notify listeners.
    pub(crate) fn respond(&self, payload: Value) {
        let state = self.take_reply(&payload, |reply, payload| {
            let _ = reply.send(Ok(payload.clone()));
        });
        if let Some(state) = state {
            self.schedule(&state, ChannelEvent::Response(payload));
        }
    }

    /// An `err` payload: fail the matching request and notify listeners.
    pub(crate) fn fail(&self, payload: Value) {
        let topic = self.inner.topic.clone();
        let state = self.take_reply(&payload, |reply, payload| {
            let _ = reply.send(Err(ClientError::Remote {
                topic,
                payload: payload.clone(),
            }));
        });
        if let Some(state) = state {
            self.schedule(&state, ChannelEvent::Error(payload));
        }
    }

    /// Run a caller-supplied snapshot function with no lock held. A panic
    /// is logged and reported as `None`.
    fn run_snapshot_fn(&self, name: &'static str, f: impl FnOnce() -> Value) -> Option<Value> {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(next) => Some(next),
            Err(panic) => {
                warn!(
                    topic = %self.inner.topic,
                    function = name,
                    panic = panic_message(panic.as_ref()),
                    "snapshot function panicked; frame treated as invalid"
                );
                None
            }
        }
    }

    fn take_reply(
        &self,
        payload: &Value,
        resolve: impl FnOnce(PendingReply, &Value),
    ) -> Option<parking_lot::MutexGuard<'_, ChannelState>> {
        let mut state = self.inner.state.lock();
        if state.status == ChannelStatus::Closed {
            return None;
        }
        if let Some(reply) = request_token(payload).and_then(|token| state.pending.remove(token)) {
            resolve(reply, payload);
        }
        Some(state)
    }

    /// Transition to `Closed`. Returns false if already closed.
    fn shut(&self) -> bool {
        let pending = {
            let mut state = self.inner.state.lock();
            if state.status == ChannelStatus::Closed {
                return false;
            }
            state.status = ChannelStatus::Closed;
            self.schedule(&state, ChannelEvent::Close);
            state.listeners.clear();
            std::mem::take(&mut state.pending)
        };
        debug!(topic = %self.inner.topic, "channel closed");
        for (_, reply) in pending {
            let _ = reply.send(Err(ClientError::ChannelClosed(self.inner.topic.clone())));
        }
        true
    }

    fn push_history(&self, state: &mut ChannelState, snapshot: Value) {
        if self.inner.options.history_limit == Some(0) {
            return;
        }
        state.history.push_back(snapshot);
        if let Some(limit) = self.inner.options.history_limit {
            while state.history.len() > limit {
                state.history.pop_front();
            }
        }
    }

    /// Queue `event` for the listeners registered right now.
    fn schedule(&self, state: &ChannelState, event: ChannelEvent) {
        let targets = state
            .listeners
            .iter()
            .map(|(token, handlers)| (*token, handlers.clone()))
            .collect();
        self.inner.dispatcher.schedule(Batch {
            topic: self.inner.topic.clone(),
            event,
            targets,
        });
    }

    fn forget_request(&self, token: &str) {
        self.inner.state.lock().pending.remove(token);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Channel")
            .field("topic", &self.inner.topic)
            .field("status", &state.status)
            .field("version", &state.version)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}
