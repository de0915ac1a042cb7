//! Direct publish path: best-effort publish after commit, plus the consumer
//! that projects what was published.

use async_trait::async_trait;
use domain::{CommitHook, HookError};
use events::{
    ChangeNotification, DecodeError, EventEnvelope, PrescriptionCreatedData, PrescriptionEvent,
};
use projections::Projection;
use store::Prescription;
use tokio::sync::watch;

use crate::source::{self, MessageHandler};
use crate::{
    BrokerMessage, ConsumerConfig, EventSource, MessageConsumer, MessageOutcome, MessagePublisher,
    Result,
};

/// Publishes a `prescription.created` envelope right after commit.
///
/// Nothing is staged; if the publish fails the event is lost for the read
/// models.
pub struct DirectPublisher<P> {
    publisher: P,
    topic: String,
}

impl<P: MessagePublisher> DirectPublisher<P> {
    pub fn new(publisher: P, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl<P: MessagePublisher> CommitHook for DirectPublisher<P> {
    #[tracing::instrument(skip(self, prescription), fields(prescription_id = %prescription.id))]
    async fn after_commit(&self, prescription: &Prescription) -> std::result::Result<(), HookError> {
        let event = PrescriptionEvent::Created(PrescriptionCreatedData::from(prescription));
        let payload = EventEnvelope::new(&event)?.to_vec()?;

        let delivery = self
            .publisher
            .publish(&self.topic, &prescription.id.message_key(), &payload)
            .await
            .map_err(|e| HookError::Publish(e.to_string()))?;

        tracing::debug!(
            partition = delivery.partition,
            offset = delivery.offset,
            "Prescription event published"
        );
        Ok(())
    }
}

/// Turns a broker event envelope into a change notification.
///
/// `Err` carries the reason the message can never be projected.
pub(crate) fn decode_envelope(payload: &[u8]) -> std::result::Result<ChangeNotification, DecodeError> {
    let envelope = EventEnvelope::from_slice(payload)?;
    match envelope.decode()? {
        PrescriptionEvent::Created(data) => Ok(ChangeNotification::from(data)),
    }
}

/// Consumes published envelopes and hands them to the projection.
pub struct BrokerEventSource<C, P> {
    consumer: C,
    projection: P,
    config: ConsumerConfig,
}

impl<C, P> BrokerEventSource<C, P>
where
    C: MessageConsumer,
    P: Projection,
{
    pub fn new(consumer: C, projection: P, config: ConsumerConfig) -> Self {
        Self {
            consumer,
            projection,
            config,
        }
    }
}

#[async_trait]
impl<C, P> MessageHandler for BrokerEventSource<C, P>
where
    C: MessageConsumer,
    P: Projection,
{
    async fn handle(&self, message: &BrokerMessage) -> Result<MessageOutcome> {
        let notification = match decode_envelope(&message.payload) {
            Ok(notification) => notification,
            Err(e) => return Ok(MessageOutcome::Dropped(e.to_string())),
        };

        match self.projection.project(&notification).await {
            Ok(report) => Ok(MessageOutcome::Projected(report)),
            Err(e) if e.is_transient() => Err(e.into()),
            Err(e) => Ok(MessageOutcome::Dropped(e.to_string())),
        }
    }
}

#[async_trait]
impl<C, P> EventSource for BrokerEventSource<C, P>
where
    C: MessageConsumer,
    P: Projection,
{
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        source::consume(self.name(), &self.consumer, self, &self.config, shutdown).await
    }
}
