use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use condux_frame::FrameConfig;

/// Default number of reconnection attempts.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;
/// Default delay between reconnection attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);
/// Delay between a dropped connection and the first reconnection attempt.
pub const DEFAULT_RECONNECT_GRACE: Duration = Duration::from_millis(200);
/// Default time a channel request waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A lifecycle callback.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Reconnection policy and lifecycle hooks.
    pub persistence: Persistence,
    /// How long `Channel::request` waits for a response. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Delay before the first reconnection attempt after a drop.
    pub reconnect_grace: Duration,
    /// Inbound frame limits.
    pub frame: FrameConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            persistence: Persistence::default(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            reconnect_grace: DEFAULT_RECONNECT_GRACE,
            frame: FrameConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Replace the persistence settings.
    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }

    /// Set the request timeout (`None` disables it).
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the delay before the first reconnection attempt.
    pub fn with_reconnect_grace(mut self, grace: Duration) -> Self {
        self.reconnect_grace = grace;
        self
    }
}

/// Reconnection policy.
#[derive(Debug, Clone)]
pub struct Persistence {
    /// Reconnect automatically when an established connection closes.
    pub enabled: bool,
    /// Reconnection attempts before giving up.
    pub attempts: u32,
    /// Delay schedule between attempts.
    pub interval: Interval,
    /// Lifecycle callbacks.
    pub hooks: LifecycleHooks,
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: DEFAULT_RECONNECT_ATTEMPTS,
            interval: Interval::default(),
            hooks: LifecycleHooks::default(),
        }
    }
}

impl Persistence {
    /// A policy that never reconnects on its own.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

/// Delay between reconnection attempts.
#[derive(Clone)]
pub enum Interval {
    /// The same delay after every attempt.
    Fixed(Duration),
    /// Delay computed from the number of attempts already made.
    Backoff(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Interval {
    /// A caller-supplied schedule.
    pub fn backoff<F>(schedule: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Interval::Backoff(Arc::new(schedule))
    }

    /// `base`, `2 * base`, `3 * base`, ...
    pub fn linear(base: Duration) -> Self {
        Self::backoff(move |made| base.saturating_mul(made.saturating_add(1)))
    }

    /// `base`, `2 * base`, `4 * base`, ... capped at `max`.
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self::backoff(move |made| {
            let factor = 1u32.checked_shl(made).unwrap_or(u32::MAX);
            base.saturating_mul(factor).min(max)
        })
    }

    /// Delay to wait after an attempt, given the attempts made before it.
    pub fn delay(&self, attempts_made: u32) -> Duration {
        match self {
            Interval::Fixed(delay) => *delay,
            Interval::Backoff(schedule) => schedule(attempts_made),
        }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval::Fixed(DEFAULT_RECONNECT_INTERVAL)
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Interval::Backoff(_) => f.write_str("Backoff(..)"),
        }
    }
}

/// Connection lifecycle callbacks. Unset hooks are no-ops.
///
/// Hooks run inline on the task that observed the transition, never while a
/// client lock is held.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    /// An established connection closed.
    pub on_disconnect: Option<Hook>,
    /// A connection attempt started.
    pub on_connecting: Option<Hook>,
    /// A connection was established.
    pub on_connection: Option<Hook>,
    /// The reconnection loop re-established the connection.
    pub on_reconnect: Option<Hook>,
    /// The reconnection loop ran out of attempts.
    pub on_timeout: Option<Hook>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_disconnect(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    pub fn on_connecting(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connecting = Some(Arc::new(hook));
        self
    }

    pub fn on_connection(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connection = Some(Arc::new(hook));
        self
    }

    pub fn on_reconnect(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reconnect = Some(Arc::new(hook));
        self
    }

    pub fn on_timeout(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_connecting", &self.on_connecting.is_some())
            .field("on_connection", &self.on_connection.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .field("on_timeout", &self.on_timeout.is_some())
            .finish()
    }
}
