use std::collections::HashMap;

use parking_lot::Mutex;

use crate::client::Client;

/// Keyed set of clients, owned by the caller.
///
/// Constructing through the registry twice with the same key yields the
/// first client; the second constructor never runs.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, Client>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The client stored under `key`, creating it with `make` if absent.
    pub fn get_or_init(&self, key: &str, make: impl FnOnce() -> Client) -> Client {
        self.clients
            .lock()
            .entry(key.to_string())
            .or_insert_with(make)
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<Client> {
        self.clients.lock().get(key).cloned()
    }

    /// Remove and return the client under `key`.
    pub fn remove(&self, key: &str) -> Option<Client> {
        self.clients.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}
