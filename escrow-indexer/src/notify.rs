// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fire-and-forget fan-out of mirror changes to topic subscribers.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Escrow(Uuid),
    User(String),
    Bridge,
    Disputes,
}

impl Topic {
    /// Low-cardinality name used as a metric label
    pub fn label(&self) -> &'static str {
        match self {
            Topic::Escrow(_) => "escrow",
            Topic::User(_) => "user",
            Topic::Bridge => "bridge",
            Topic::Disputes => "disputes",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Escrow(id) => write!(f, "escrow:{}", id),
            Topic::User(address) => write!(f, "user:{}", address.to_lowercase()),
            Topic::Bridge => write!(f, "bridge"),
            Topic::Disputes => write!(f, "disputes"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

/// Publishing never fails and never blocks the caller
pub trait Notifier: Send + Sync {
    fn publish(&self, topic: &Topic, event: &str, payload: Value);
}

/// In-process hub: one broadcast channel per topic with at least one
/// subscriber. Slow subscribers lag and lose the oldest notifications.
pub struct NotificationHub {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<Notification>>>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<Notification> {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drops channels nobody listens to anymore
    pub fn prune(&self) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn topic_count(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Notifier for NotificationHub {
    fn publish(&self, topic: &Topic, event: &str, payload: Value) {
        let topic = topic.to_string();
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = channels.get(&topic) else {
            trace!("[Notify] No subscribers for {}", topic);
            return;
        };
        let notification = Notification {
            topic,
            event: event.to_string(),
            payload,
        };
        // Err only when every receiver is gone
        let _ = sender.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_names() {
        let id = Uuid::nil();
        assert_eq!(
            Topic::Escrow(id).to_string(),
            "escrow:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(Topic::User("0xABcd".into()).to_string(), "user:0xabcd");
        assert_eq!(Topic::Bridge.to_string(), "bridge");
        assert_eq!(Topic::Disputes.label(), "disputes");
    }

    #[tokio::test]
    async fn test_subscribers_receive_their_topic_only() {
        let hub = NotificationHub::new(8);
        let mut bridge = hub.subscribe(&Topic::Bridge);
        let mut disputes = hub.subscribe(&Topic::Disputes);

        hub.publish(&Topic::Bridge, "bridge_transfer_confirmed", json!({"confirmations": 1}));
        let received = bridge.recv().await.unwrap();
        assert_eq!(received.topic, "bridge");
        assert_eq!(received.event, "bridge_transfer_confirmed");
        assert_eq!(received.payload["confirmations"], 1);
        assert!(disputes.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_and_prune() {
        let hub = NotificationHub::new(8);
        hub.publish(&Topic::Bridge, "noop", Value::Null);
        assert_eq!(hub.topic_count(), 0);

        let rx = hub.subscribe(&Topic::User("0x1".into()));
        assert_eq!(hub.topic_count(), 1);
        drop(rx);
        hub.prune();
        assert_eq!(hub.topic_count(), 0);
    }
}
