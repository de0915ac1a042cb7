//! The event source capability and the shared consume loop.

use std::time::Duration;

use async_trait::async_trait;
use projections::ProjectionReport;
use tokio::sync::watch;

use crate::{BrokerMessage, MessageConsumer, Result};

/// Something that turns committed writes into projected notifications.
///
/// `run` returns once `shutdown` flips to `true` (or its sender is dropped),
/// after finishing the unit of work in flight.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()>;
}

/// Settings shared by broker-driven sources.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// How long one poll waits for a message.
    pub poll_timeout: Duration,
    /// Pause after a transient failure before the message is retried.
    pub retry_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// What happened to one consumed message. Every outcome is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Projected(ProjectionReport),
    /// Filtered out (update, delete or deleted row).
    Skipped,
    /// Could not be used and never will be; logged and acknowledged.
    Dropped(String),
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Projected(_) => "projected",
            MessageOutcome::Skipped => "skipped",
            MessageOutcome::Dropped(_) => "dropped",
        }
    }
}

/// Handles one consumed message.
///
/// `Err` is reserved for transient failures: the message is rejected and
/// redelivered.
#[async_trait]
pub(crate) trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &BrokerMessage) -> Result<MessageOutcome>;
}

/// Sleeps for `duration` unless shutdown is signalled first.
/// Returns `true` if the caller should stop.
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
    }
}

/// Polls `consumer` until shutdown, acknowledging only handled messages.
pub(crate) async fn consume<C, H>(
    source: &'static str,
    consumer: &C,
    handler: &H,
    config: &ConsumerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    C: MessageConsumer + ?Sized,
    H: MessageHandler + ?Sized,
{
    tracing::info!(source, "Consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let polled = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            polled = consumer.poll(config.poll_timeout) => polled,
        };

        let message = match polled {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(source, error = %e, "Poll failed");
                if pause(config.retry_backoff, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        match handler.handle(&message).await {
            Ok(outcome) => {
                metrics::counter!(
                    "consumed_messages_total",
                    "source" => source,
                    "outcome" => outcome.as_str()
                )
                .increment(1);

                if let MessageOutcome::Dropped(reason) = &outcome {
                    tracing::warn!(
                        source,
                        topic = %message.topic,
                        offset = message.offset,
                        reason = %reason,
                        "Message dropped"
                    );
                }

                if let Err(e) = consumer.commit(&message).await {
                    tracing::warn!(
                        source,
                        topic = %message.topic,
                        offset = message.offset,
                        error = %e,
                        "Commit failed; message may be redelivered"
                    );
                }
            }
            Err(e) => {
                metrics::counter!(
                    "consumed_messages_total",
                    "source" => source,
                    "outcome" => "retried"
                )
                .increment(1);
                tracing::warn!(
                    source,
                    topic = %message.topic,
                    offset = message.offset,
                    error = %e,
                    "Message handling failed; will be redelivered"
                );

                if let Err(e) = consumer.reject(&message).await {
                    tracing::error!(source, error = %e, "Rewind failed");
                }
                if pause(config.retry_backoff, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    tracing::info!(source, "Consumer stopped");
    Ok(())
}
