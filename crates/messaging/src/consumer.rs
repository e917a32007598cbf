//! Idempotent event consumer.

use chrono::Utc;
use store::ProcessedEventStore;
use tokio::sync::watch;

use async_trait::async_trait;

use crate::bus::{DeadLetter, Delivery, MessageBus, Subscription};
use crate::envelope::EventEnvelope;
use crate::error::{BusError, HandlerError};

/// Business reaction to one envelope.
///
/// Implementations commit their effects AND the processed-event marker in
/// one store transaction, so a crash between handling and marking cannot
/// happen. A `DuplicateEvent` from that commit means a concurrent
/// duplicate delivery already won; handlers map it to `Ok`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name, for logs and spans.
    fn name(&self) -> &'static str;

    /// Handles one envelope. Must be safe to re-invoke with identical
    /// input up to the point of commit.
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

/// Consumer tuning knobs.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Topic to drain.
    pub topic: String,

    /// Delivery attempts before a message is dead-lettered.
    pub max_attempts: u32,
}

impl ConsumerConfig {
    /// Config for a topic with the default attempt ceiling.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            max_attempts: 5,
        }
    }
}

/// Worker that drains one topic with de-duplicated, retryable handling.
pub struct EventConsumer<P, B, H> {
    processed: P,
    bus: B,
    handler: H,
    config: ConsumerConfig,
}

impl<P, B, H> EventConsumer<P, B, H>
where
    P: ProcessedEventStore,
    B: MessageBus,
    H: EventHandler,
{
    /// Creates a consumer for one topic.
    pub fn new(processed: P, bus: B, handler: H, config: ConsumerConfig) -> Self {
        Self {
            processed,
            bus,
            handler,
            config,
        }
    }

    /// Subscribes and processes deliveries until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BusError> {
        let mut sub = self.bus.subscribe(&self.config.topic).await?;
        loop {
            tokio::select! {
                delivery = sub.recv() => match delivery {
                    Some(delivery) => self.process_delivery(&sub, delivery).await,
                    None => break,
                },
                _ = shutdown.changed() => {
                    tracing::info!(handler = self.handler.name(), "consumer shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Processes everything already queued on `sub`; returns the number of
    /// deliveries handled. Redeliveries requeued along the way are picked
    /// up too, so this settles retry chains as far as the attempt ceiling.
    pub async fn drain(&self, sub: &mut Subscription) -> usize {
        let mut handled = 0;
        while let Some(delivery) = sub.try_recv() {
            self.process_delivery(sub, delivery).await;
            handled += 1;
        }
        handled
    }

    /// Handles a single delivery: duplicate check, handler invocation, and
    /// the redeliver-or-dead-letter decision.
    #[tracing::instrument(
        skip(self, sub, delivery),
        fields(
            handler = self.handler.name(),
            event_id = %delivery.envelope.event_id,
            event_type = %delivery.envelope.event_type,
            attempt = delivery.attempt,
        )
    )]
    pub async fn process_delivery(&self, sub: &Subscription, delivery: Delivery) {
        match self.processed.is_processed(delivery.envelope.event_id).await {
            Ok(true) => {
                // Already handled; acknowledge and discard.
                metrics::counter!("consumer_duplicate_events_total").increment(1);
                tracing::debug!("duplicate event discarded");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                self.retry_or_dead_letter(sub, delivery, e.to_string()).await;
                return;
            }
        }

        match self.handler.handle(&delivery.envelope).await {
            Ok(()) => {
                metrics::counter!("consumer_events_processed_total").increment(1);
            }
            Err(HandlerError::Transient(reason)) => {
                self.retry_or_dead_letter(sub, delivery, reason).await;
            }
            Err(HandlerError::Permanent(reason)) => {
                tracing::error!(%reason, "permanent handler failure");
                self.send_dead_letter(delivery, reason).await;
            }
        }
    }

    async fn retry_or_dead_letter(&self, sub: &Subscription, delivery: Delivery, reason: String) {
        if delivery.attempt < self.config.max_attempts {
            metrics::counter!("consumer_redeliveries_total").increment(1);
            tracing::warn!(%reason, "handler failed, requeueing delivery");
            if let Err(e) = sub.requeue(delivery.next_attempt()) {
                tracing::error!(error = %e, "requeue failed, delivery lost to topic closure");
            }
        } else {
            tracing::error!(%reason, "attempt ceiling reached");
            self.send_dead_letter(delivery, reason).await;
        }
    }

    async fn send_dead_letter(&self, delivery: Delivery, reason: String) {
        let letter = DeadLetter {
            topic: self.config.topic.clone(),
            envelope: delivery.envelope,
            attempts: delivery.attempt,
            reason,
            failed_at: Utc::now(),
        };
        if let Err(e) = self.bus.dead_letter(letter).await {
            tracing::error!(error = %e, "dead-letter routing failed");
        }
    }
}

/// Builds an envelope by hand; useful in tests and adapters.
pub fn envelope_for_payload(
    event_type: &str,
    aggregate_id: &str,
    payload: serde_json::Value,
) -> EventEnvelope {
    EventEnvelope {
        event_id: common::EventId::new(),
        event_type: event_type.to_string(),
        event_timestamp: Utc::now(),
        correlation_id: None,
        aggregate_id: aggregate_id.to_string(),
        payload,
    }
}
