//! Message bus abstraction and the in-memory implementation.
//!
//! The bus models an at-least-once broker: point-to-point topic queues,
//! redelivery through [`Subscription::requeue`], and a dead-letter
//! destination for deliveries that exhausted their attempts. Messages
//! published before a subscriber attaches are buffered, the way a broker
//! retains them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};

use crate::envelope::EventEnvelope;
use crate::error::BusError;

/// One delivery of an envelope, carrying its attempt number (1-based).
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: EventEnvelope,
    pub attempt: u32,
}

impl Delivery {
    /// First delivery of an envelope.
    pub fn first(envelope: EventEnvelope) -> Self {
        Self {
            envelope,
            attempt: 1,
        }
    }

    /// The next redelivery of this envelope.
    pub fn next_attempt(&self) -> Self {
        Self {
            envelope: self.envelope.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// A delivery that exhausted its attempts, kept for manual inspection.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub topic: String,
    pub envelope: EventEnvelope,
    pub attempts: u32,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Receiving end of a topic queue.
///
/// Holds a loopback sender so the consumer can requeue a failed delivery
/// onto the same queue.
pub struct Subscription {
    topic: String,
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    /// Waits for the next delivery. Returns None once the queue is closed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Takes the next delivery if one is already queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// Puts a delivery back on the queue for another attempt.
    pub fn requeue(&self, delivery: Delivery) -> Result<(), BusError> {
        self.sender
            .send(delivery)
            .map_err(|_| BusError::TopicClosed(self.topic.clone()))
    }

    /// The topic this subscription drains.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Minimal broker-client surface the publisher and consumers need.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Enqueues an envelope on a topic.
    async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<(), BusError>;

    /// Attaches the single consumer of a topic.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError>;

    /// Routes an exhausted delivery to the dead-letter destination.
    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), BusError>;
}

struct Topic {
    sender: mpsc::UnboundedSender<Delivery>,
    // Present until someone subscribes; buffered messages wait here.
    receiver: Option<mpsc::UnboundedReceiver<Delivery>>,
}

impl Topic {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

/// In-process message bus.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
    dead: Arc<Mutex<Vec<DeadLetter>>>,
}

impl InMemoryBus {
    /// Creates a new bus with no topics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all dead letters accumulated so far.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.lock().await.clone()
    }
}

impl Default for Topic {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<(), BusError> {
        let mut topics = self.topics.lock().await;
        let entry = topics.entry(topic.to_string()).or_default();
        entry
            .sender
            .send(Delivery::first(envelope))
            .map_err(|_| BusError::TopicClosed(topic.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let mut topics = self.topics.lock().await;
        let entry = topics.entry(topic.to_string()).or_default();
        let receiver = entry
            .receiver
            .take()
            .ok_or_else(|| BusError::AlreadySubscribed(topic.to_string()))?;
        Ok(Subscription {
            topic: topic.to_string(),
            sender: entry.sender.clone(),
            receiver,
        })
    }

    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), BusError> {
        tracing::error!(
            topic = %letter.topic,
            event_id = %letter.envelope.event_id,
            attempts = letter.attempts,
            reason = %letter.reason,
            "delivery dead-lettered"
        );
        metrics::counter!("bus_dead_letters_total").increment(1);
        self.dead.lock().await.push(letter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::EventId;

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(),
            event_type: event_type.to_string(),
            event_timestamp: Utc::now(),
            correlation_id: None,
            aggregate_id: "agg".to_string(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn publish_then_subscribe_buffers_messages() {
        let bus = InMemoryBus::new();
        bus.publish("orders", envelope("OrderCreated")).await.unwrap();
        bus.publish("orders", envelope("OrderCreated")).await.unwrap();

        let mut sub = bus.subscribe("orders").await.unwrap();
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn second_subscriber_is_rejected() {
        let bus = InMemoryBus::new();
        let _sub = bus.subscribe("orders").await.unwrap();
        let result = bus.subscribe("orders").await;
        assert!(matches!(result, Err(BusError::AlreadySubscribed(_))));
    }

    #[tokio::test]
    async fn requeue_increments_attempt() {
        let bus = InMemoryBus::new();
        bus.publish("orders", envelope("OrderCreated")).await.unwrap();

        let mut sub = bus.subscribe("orders").await.unwrap();
        let delivery = sub.try_recv().unwrap();
        assert_eq!(delivery.attempt, 1);

        sub.requeue(delivery.next_attempt()).unwrap();
        let redelivered = sub.try_recv().unwrap();
        assert_eq!(redelivered.attempt, 2);
        assert_eq!(redelivered.envelope.event_id, delivery.envelope.event_id);
    }

    #[tokio::test]
    async fn dead_letters_are_kept_for_inspection() {
        let bus = InMemoryBus::new();
        let env = envelope("ItemsReserved");
        bus.dead_letter(DeadLetter {
            topic: "inventory".to_string(),
            envelope: env.clone(),
            attempts: 5,
            reason: "handler kept failing".to_string(),
            failed_at: Utc::now(),
        })
        .await
        .unwrap();

        let letters = bus.dead_letters().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].envelope.event_id, env.event_id);
        assert_eq!(letters[0].attempts, 5);
    }
}
