//! Deferred listener fan-out.
//!
//! Inbound frames update channel state on the connection's reader task, but
//! listeners never run there. Each event becomes one batch (the event plus a
//! snapshot of the listeners registered at that moment) handed to a single
//! dispatch task. Batches run in the order they were scheduled. A panicking
//! listener is logged and the rest of its batch still runs.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub type ConnectionHandler = Arc<dyn Fn(&Value) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(&Value, &Value) + Send + Sync>;
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;
pub type PayloadHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one listener within a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(pub(crate) u64);

impl fmt::Display for ListenerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// An event delivered to channel listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The channel was hydrated; `data` is the new snapshot.
    Connection { data: Value },
    /// A data message arrived; `data` is the snapshot after applying it.
    Message { message: Value, data: Value },
    /// The channel closed.
    Close,
    /// A `res` frame arrived.
    Response(Value),
    /// An `err` frame arrived (or an inbound payload failed to parse).
    Error(Value),
}

impl ChannelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelEvent::Connection { .. } => "connection",
            ChannelEvent::Message { .. } => "message",
            ChannelEvent::Close => "close",
            ChannelEvent::Response(_) => "response",
            ChannelEvent::Error(_) => "error",
        }
    }
}

/// Listener callbacks, one optional handler per event kind.
#[derive(Clone, Default)]
pub struct Handlers {
    connection: Option<ConnectionHandler>,
    message: Option<MessageHandler>,
    close: Option<CloseHandler>,
    response: Option<PayloadHandler>,
    error: Option<PayloadHandler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the snapshot on hydration, and immediately on
    /// `add_listener` if the channel is already subscribed.
    pub fn on_connection(mut self, handler: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.connection = Some(Arc::new(handler));
        self
    }

    /// Called with the message and the updated snapshot.
    pub fn on_message(mut self, handler: impl Fn(&Value, &Value) + Send + Sync + 'static) -> Self {
        self.message = Some(Arc::new(handler));
        self
    }

    pub fn on_close(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.close = Some(Arc::new(handler));
        self
    }

    pub fn on_response(mut self, handler: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.response = Some(Arc::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(handler));
        self
    }

    pub(crate) fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Run the handler for `event`, if one is set.
    pub fn handle(&self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Connection { data } => {
                if let Some(handler) = &self.connection {
                    handler(data);
                }
            }
            ChannelEvent::Message { message, data } => {
                if let Some(handler) = &self.message {
                    handler(message, data);
                }
            }
            ChannelEvent::Close => {
                if let Some(handler) = &self.close {
                    handler();
                }
            }
            ChannelEvent::Response(payload) => {
                if let Some(handler) = &self.response {
                    handler(payload);
                }
            }
            ChannelEvent::Error(payload) => {
                if let Some(handler) = &self.error {
                    handler(payload);
                }
            }
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("connection", &self.connection.is_some())
            .field("message", &self.message.is_some())
            .field("close", &self.close.is_some())
            .field("response", &self.response.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// One event and the listeners it goes to.
pub(crate) struct Batch {
    pub topic: String,
    pub event: ChannelEvent,
    pub targets: Vec<(ListenerToken, Handlers)>,
}

impl Batch {
    fn deliver(self) {
        for (token, handlers) in &self.targets {
            invoke_isolated(&self.topic, self.event.name(), Some(*token), || {
                handlers.handle(&self.event)
            });
        }
    }
}

enum Job {
    Deliver(Batch),
    Barrier(oneshot::Sender<()>),
}

/// Handle to the dispatch task. Cloning shares the same task.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    /// Spawn the dispatch task on the current Tokio runtime.
    ///
    /// The task exits once every handle has been dropped.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Deliver(batch) => batch.deliver(),
                    Job::Barrier(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("listener dispatch task stopped");
        });
        Self { tx }
    }

    pub fn schedule(&self, batch: Batch) {
        if batch.targets.is_empty() {
            return;
        }
        if self.tx.send(Job::Deliver(batch)).is_err() {
            debug!("listener dispatch task gone; dropping batch");
        }
    }

    /// Resolves once every batch scheduled before this call has run.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Job::Barrier(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

/// Run a user callback, containing any panic it raises.
pub(crate) fn invoke_isolated(
    topic: &str,
    event: &'static str,
    token: Option<ListenerToken>,
    callback: impl FnOnce(),
) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
        let token = token.map(|t| t.to_string());
        warn!(
            topic = %topic,
            event,
            token = token.as_deref().unwrap_or("-"),
            panic = panic_message(panic.as_ref()),
            "listener panicked"
        );
    }
}

/// Run a lifecycle hook, containing any panic it raises.
pub(crate) fn invoke_hook(name: &'static str, hook: &crate::config::Hook) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook())) {
        warn!(
            hook = name,
            panic = panic_message(panic.as_ref()),
            "lifecycle hook panicked"
        );
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
