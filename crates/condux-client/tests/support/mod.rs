#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use condux_client::{Client, ClientConfig, Handlers, Interval, LifecycleHooks, Persistence};
use condux_transport::{MemoryPeer, MemoryServer};
use parking_lot::Mutex;
use tokio::time::{sleep, timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(2);

pub const SYSTEM_SUBSCRIPTIONS: [&str; 2] = ["sub,/CLIENT_ACTIONS", "sub,/REGISTRATIONS"];

/// Accept the next socket the client opens.
pub async fn accept(server: &mut MemoryServer) -> MemoryPeer {
    timeout(WAIT, server.accept())
        .await
        .expect("client should open a socket in time")
        .expect("transport should still be alive")
}

/// Connect `client` and complete the handshake on the server side.
pub async fn connect(client: &Client, server: &mut MemoryServer) -> MemoryPeer {
    client.connect().expect("connect should start");
    let peer = accept(server).await;
    peer.open();
    timeout(WAIT, client.ready())
        .await
        .expect("client should reach connected");
    peer
}

/// Next frame the client writes on `peer`.
pub async fn next_frame(peer: &mut MemoryPeer) -> String {
    timeout(WAIT, peer.recv())
        .await
        .expect("frame should arrive in time")
        .expect("client should keep the socket open")
}

/// Poll `condition` until it holds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        if Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(5)).await;
    }
}

/// Config with fast reconnection timings.
pub fn fast_config(attempts: u32, hooks: LifecycleHooks) -> ClientConfig {
    ClientConfig::default()
        .with_reconnect_grace(Duration::from_millis(10))
        .with_persistence(
            Persistence::default()
                .with_attempts(attempts)
                .with_interval(Interval::Fixed(Duration::from_millis(60)))
                .with_hooks(hooks),
        )
}

/// A hook that counts its invocations.
pub fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let hook_count = Arc::clone(&count);
    (count, move || {
        hook_count.fetch_add(1, Ordering::SeqCst);
    })
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Listener callbacks that record every event as a line of text.
pub fn recorder() -> (Arc<Mutex<Vec<String>>>, Handlers) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (a, b, c, d, e) = (
        Arc::clone(&seen),
        Arc::clone(&seen),
        Arc::clone(&seen),
        Arc::clone(&seen),
        Arc::clone(&seen),
    );
    let handlers = Handlers::new()
        .on_connection(move |data| a.lock().push(format!("connection {data}")))
        .on_message(move |message, data| b.lock().push(format!("message {message} {data}")))
        .on_close(move || c.lock().push("close".to_string()))
        .on_response(move |payload| d.lock().push(format!("response {payload}")))
        .on_error(move |payload| e.lock().push(format!("error {payload}")));
    (seen, handlers)
}
