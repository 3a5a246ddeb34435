//! Pub/Sub registry: channel and pattern subscriptions, fanned out to each
//! subscriber's connection task over an mpsc channel.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::resp::Reply;

pub type SubscriberId = u64;

#[derive(Debug, Clone)]
pub enum PubSubMessage {
    Message { channel: Bytes, payload: Bytes },
    PMessage { pattern: Bytes, channel: Bytes, payload: Bytes },
}

impl PubSubMessage {
    pub fn into_reply(self) -> Reply {
        match self {
            PubSubMessage::Message { channel, payload } => Reply::Array(vec![
                Reply::bulk_str("message"),
                Reply::Bulk(channel),
                Reply::Bulk(payload),
            ]),
            PubSubMessage::PMessage { pattern, channel, payload } => Reply::Array(vec![
                Reply::bulk_str("pmessage"),
                Reply::Bulk(pattern),
                Reply::Bulk(channel),
                Reply::Bulk(payload),
            ]),
        }
    }
}

pub type Sender = mpsc::UnboundedSender<PubSubMessage>;

#[derive(Default)]
pub struct Registry {
    channels: DashMap<Bytes, DashMap<SubscriberId, Sender>>,
    patterns: DashMap<Bytes, DashMap<SubscriberId, Sender>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new_subscriber_id(&self) -> SubscriberId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn subscribe(&self, channel: Bytes, id: SubscriberId, sender: Sender) {
        self.channels.entry(channel).or_default().insert(id, sender);
    }

    pub fn unsubscribe(&self, channel: &[u8], id: SubscriberId) {
        if let Some(subs) = self.channels.get(channel) {
            subs.remove(&id);
        }
    }

    pub fn psubscribe(&self, pattern: Bytes, id: SubscriberId, sender: Sender) {
        self.patterns.entry(pattern).or_default().insert(id, sender);
    }

    pub fn punsubscribe(&self, pattern: &[u8], id: SubscriberId) {
        if let Some(subs) = self.patterns.get(pattern) {
            subs.remove(&id);
        }
    }

    pub fn unsubscribe_all(&self, id: SubscriberId) {
        for entry in self.channels.iter() {
            entry.value().remove(&id);
        }
        for entry in self.patterns.iter() {
            entry.value().remove(&id);
        }
    }

    /// Delivers to direct channel subscribers and pattern matchers, returning
    /// the number of distinct connections the message reached (a connection
    /// subscribed both directly and via a matching pattern counts once).
    pub fn publish(&self, channel: &[u8], payload: Bytes) -> usize {
        let mut delivered = HashSet::new();
        if let Some(subs) = self.channels.get(channel) {
            for sub in subs.iter() {
                if sub
                    .value()
                    .send(PubSubMessage::Message { channel: Bytes::copy_from_slice(channel), payload: payload.clone() })
                    .is_ok()
                {
                    delivered.insert(*sub.key());
                }
            }
        }
        for entry in self.patterns.iter() {
            if crate::glob::glob_match(entry.key(), channel) {
                for sub in entry.value().iter() {
                    if sub
                        .value()
                        .send(PubSubMessage::PMessage {
                            pattern: entry.key().clone(),
                            channel: Bytes::copy_from_slice(channel),
                            payload: payload.clone(),
                        })
                        .is_ok()
                    {
                        delivered.insert(*sub.key());
                    }
                }
            }
        }
        delivered.len()
    }

    pub fn channels_matching(&self, pattern: Option<&[u8]>) -> Vec<Bytes> {
        self.channels
            .iter()
            .filter(|kv| !kv.value().is_empty())
            .map(|kv| kv.key().clone())
            .filter(|c| pattern.map(|p| crate::glob::glob_match(p, c)).unwrap_or(true))
            .collect()
    }

    pub fn numsub(&self, channel: &[u8]) -> usize {
        self.channels.get(channel).map(|s| s.len()).unwrap_or(0)
    }

    pub fn numpat(&self) -> usize {
        self.patterns.iter().filter(|kv| !kv.value().is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_direct_and_pattern_subscribers() {
        let reg = Registry::default();
        let id1 = reg.new_subscriber_id();
        let id2 = reg.new_subscriber_id();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        reg.subscribe(Bytes::from_static(b"news"), id1, tx1);
        reg.psubscribe(Bytes::from_static(b"news.*"), id2, tx2);

        let delivered = reg.publish(b"news", Bytes::from_static(b"hello"));
        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());

        let delivered = reg.publish(b"news.sports", Bytes::from_static(b"goal"));
        assert_eq!(delivered, 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn publish_counts_dual_subscriber_once() {
        let reg = Registry::default();
        let id = reg.new_subscriber_id();
        let (tx_direct, mut rx_direct) = mpsc::unbounded_channel();
        let (tx_pattern, mut rx_pattern) = mpsc::unbounded_channel();
        reg.subscribe(Bytes::from_static(b"news.sports"), id, tx_direct);
        reg.psubscribe(Bytes::from_static(b"news.*"), id, tx_pattern);

        // "news.sports" matches both the direct subscription and the pattern
        // subscription registered under the same id, so it must count once.
        let delivered = reg.publish(b"news.sports", Bytes::from_static(b"goal"));
        assert_eq!(delivered, 1);
        assert!(rx_direct.try_recv().is_ok());
        assert!(rx_pattern.try_recv().is_ok());
    }

    #[test]
    fn unsubscribe_all_clears_everything() {
        let reg = Registry::default();
        let id = reg.new_subscriber_id();
        let (tx, _rx) = mpsc::unbounded_channel();
        reg.subscribe(Bytes::from_static(b"c"), id, tx);
        reg.unsubscribe_all(id);
        assert_eq!(reg.numsub(b"c"), 0);
    }
}
