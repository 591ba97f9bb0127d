//! Topic name to channel mapping, plus the queue of topics the server has
//! rejected until it announces them as registered.

use std::collections::{HashMap, VecDeque};

use crate::channel::Channel;

#[derive(Default)]
pub(crate) struct TopicRegistry {
    channels: HashMap<String, Channel>,
    next_seq: u64,
    pending: VecDeque<String>,
}

impl TopicRegistry {
    pub fn get(&self, topic: &str) -> Option<&Channel> {
        self.channels.get(topic)
    }

    /// Sequence number for the next channel; orders resubscription.
    pub fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Store `channel`, replacing any previous entry for its topic.
    pub fn insert(&mut self, channel: Channel) -> Option<Channel> {
        self.channels.insert(channel.topic().to_string(), channel)
    }

    pub fn remove(&mut self, topic: &str) -> Option<Channel> {
        self.pending.retain(|queued| queued != topic);
        self.channels.remove(topic)
    }

    /// Every registered channel, oldest registration first.
    pub fn ordered(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.channels.values().cloned().collect();
        channels.sort_by_key(Channel::seq);
        channels
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Remember a rejected topic. Returns false if it was already queued.
    pub fn queue_rejected(&mut self, topic: &str) -> bool {
        if self.pending.iter().any(|queued| queued == topic) {
            return false;
        }
        self.pending.push_back(topic.to_string());
        true
    }

    /// Remove `topic` from the rejected queue. Returns whether it was queued.
    pub fn take_rejected(&mut self, topic: &str) -> bool {
        match self.pending.iter().position(|queued| queued == topic) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn rejected(&self) -> Vec<String> {
        self.pending.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use super::*;
    use crate::channel::ChannelOptions;
    use crate::dispatcher::Dispatcher;

    fn channel(registry: &mut TopicRegistry, topic: &str, dispatcher: &Dispatcher) -> Channel {
        let seq = registry.next_seq();
        Channel::new(
            topic,
            seq,
            ChannelOptions::default(),
            None,
            Weak::new(),
            dispatcher.clone(),
        )
    }

    #[tokio::test]
    async fn ordered_follows_registration() {
        let dispatcher = Dispatcher::spawn();
        let mut registry = TopicRegistry::default();
        for topic in ["zeta", "alpha", "mid"] {
            let channel = channel(&mut registry, topic, &dispatcher);
            registry.insert(channel);
        }

        let topics: Vec<String> = registry
            .ordered()
            .iter()
            .map(|c| c.topic().to_string())
            .collect();
        assert_eq!(topics, vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn rejected_queue_is_deduplicated() {
        let mut registry = TopicRegistry::default();
        assert!(registry.queue_rejected("chat"));
        assert!(!registry.queue_rejected("chat"));
        assert!(registry.queue_rejected("news"));
        assert_eq!(registry.rejected(), vec!["chat", "news"]);

        assert!(registry.take_rejected("chat"));
        assert!(!registry.take_rejected("chat"));
        assert_eq!(registry.rejected(), vec!["news"]);
    }

    #[tokio::test]
    async fn remove_drops_queued_rejection() {
        let dispatcher = Dispatcher::spawn();
        let mut registry = TopicRegistry::default();
        let chat = channel(&mut registry, "chat", &dispatcher);
        registry.insert(chat);
        registry.queue_rejected("chat");

        assert!(registry.remove("chat").is_some());
        assert!(registry.get("chat").is_none());
        assert!(registry.rejected().is_empty());
    }
}
