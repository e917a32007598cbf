//! Outbox publisher: drains durable outbox rows onto the bus.

use std::time::Duration;

use domain::events;
use store::OutboxStore;
use tokio::sync::watch;

use crate::bus::MessageBus;
use crate::envelope::EventEnvelope;

/// Routes an event type to its bus topic.
pub fn topic_for(event_type: &str) -> &'static str {
    match event_type {
        events::ORDER_CREATED => "orders",
        events::ITEMS_RESERVED | events::RESERVATION_FAILED => "inventory",
        _ => "events",
    }
}

/// Publisher tuning knobs.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Poll interval between cycles.
    pub interval: Duration,

    /// Maximum rows fetched per cycle.
    pub batch_size: usize,

    /// Delivery attempts before a row is left for operator attention.
    pub max_retries: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 100,
            max_retries: 5,
        }
    }
}

/// Periodic task publishing outbox rows in creation order.
///
/// Publication failures never reach business callers: a failed row is
/// marked and retried on a later cycle until the retry ceiling, after
/// which it is surfaced through the `outbox_exhausted_events` gauge and an
/// error log instead of being dropped.
pub struct OutboxPublisher<S, B> {
    store: S,
    bus: B,
    config: PublisherConfig,
}

impl<S: OutboxStore, B: MessageBus> OutboxPublisher<S, B> {
    /// Creates a publisher over a service's outbox.
    pub fn new(store: S, bus: B, config: PublisherConfig) -> Self {
        Self { store, bus, config }
    }

    /// Runs the poll loop until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "outbox cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("outbox publisher shutting down");
                    break;
                }
            }
        }
    }

    /// Publishes one batch; returns how many rows were delivered.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<usize, store::StoreError> {
        let rows = self
            .store
            .publishable_events(self.config.batch_size, self.config.max_retries)
            .await?;

        let mut published = 0;
        for row in rows {
            let envelope = EventEnvelope::from_outbox(&row);
            let topic = topic_for(&row.event_type);
            match self.bus.publish(topic, envelope).await {
                Ok(()) => {
                    self.store.mark_published(row.id).await?;
                    metrics::counter!("outbox_published_total").increment(1);
                    published += 1;
                }
                Err(e) => {
                    // Left for a later cycle; retry_count guards the ceiling.
                    self.store.mark_failed(row.id).await?;
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    tracing::warn!(
                        event_id = %row.id,
                        event_type = %row.event_type,
                        retry_count = row.retry_count,
                        error = %e,
                        "outbox publish failed"
                    );
                }
            }
        }

        let exhausted = self.store.exhausted_events(self.config.max_retries).await?;
        metrics::gauge!("outbox_exhausted_events").set(exhausted as f64);
        if exhausted > 0 {
            tracing::error!(exhausted, "outbox rows stuck at the retry ceiling");
        }

        Ok(published)
    }
}
