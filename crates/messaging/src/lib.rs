//! Messaging layer: at-least-once delivery with idempotent effects.
//!
//! Facts leave a service through its durable outbox (written inside the
//! business transaction) and a periodic [`OutboxPublisher`] that pushes
//! them onto the bus. Facts enter a service through an [`EventConsumer`]
//! that discards duplicates via the processed-event ledger and sends
//! poisoned deliveries to a dead-letter queue after bounded retries.

pub mod bus;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod publisher;

pub use bus::{DeadLetter, Delivery, InMemoryBus, MessageBus, Subscription};
pub use consumer::{ConsumerConfig, EventConsumer, EventHandler};
pub use envelope::EventEnvelope;
pub use error::{BusError, HandlerError};
pub use publisher::{OutboxPublisher, PublisherConfig, topic_for};
