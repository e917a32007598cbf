use thiserror::Error;

/// Errors raised by a message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The topic already has a subscriber attached.
    #[error("topic {0} is already subscribed")]
    AlreadySubscribed(String),

    /// The topic's queue is gone (receiver dropped).
    #[error("topic {0} is closed")]
    TopicClosed(String),
}

/// Outcome classification for event handlers.
///
/// The consumer decides between redelivery and the dead-letter queue based
/// on this; the handler itself never talks to the bus.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Retryable failure: the delivery is requeued (at-least-once) until
    /// the attempt ceiling, then dead-lettered.
    #[error("transient handler failure: {0}")]
    Transient(String),

    /// Non-retryable failure: the delivery goes straight to the
    /// dead-letter queue.
    #[error("permanent handler failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    /// Maps a store error: version conflicts and other retryable store
    /// failures become transient, the rest permanent.
    pub fn from_store(err: store::StoreError) -> Self {
        if err.is_retryable() {
            HandlerError::Transient(err.to_string())
        } else {
            match err {
                store::StoreError::Database(_) => HandlerError::Transient(err.to_string()),
                _ => HandlerError::Permanent(err.to_string()),
            }
        }
    }
}
