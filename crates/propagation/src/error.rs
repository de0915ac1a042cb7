use projections::ProjectionError;
use store::StoreError;
use thiserror::Error;

/// Errors raised by the message broker clients.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker cannot be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// A client-side error reported by Kafka.
    #[error("Kafka error: {0}")]
    Kafka(String),

    /// No broker client can serve the requested setup.
    #[error("Broker not configured: {0}")]
    NotConfigured(String),

    /// The message does not belong to this consumer.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for BrokerError {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        BrokerError::Kafka(e.to_string())
    }
}

/// Errors raised by event sources.
#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    /// The source cannot run with the given settings.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for propagation operations.
pub type Result<T> = std::result::Result<T, PropagationError>;
