//! Builds the configured propagation strategy.

use std::sync::Arc;

use domain::WritePath;
use projections::EventProjector;
use propagation::{
    BrokerError, BrokerEventSource, CdcAdapter, DirectPublisher, EventSource, InMemoryBroker,
    MessageConsumer, MessagePublisher, OutboxRelay,
};
use store::Store;

use crate::config::{Config, Strategy};

/// The write-side half and the read-side half of one strategy.
pub struct Propagation {
    pub write_path: WritePath,
    pub source: Box<dyn EventSource>,
}

/// Broker clients shared by the producer and consumer sides.
#[derive(Clone)]
pub enum Broker {
    InMemory(InMemoryBroker),
    #[cfg(feature = "kafka")]
    Kafka { brokers: String },
}

impl Broker {
    /// Kafka when `KAFKA_BROKERS` is set and the `kafka` feature is built in.
    ///
    /// Without brokers the `direct` and `outbox` strategies fall back to an
    /// in-process broker, since this process is their only producer. Change
    /// capture is produced outside the process and has no such fallback.
    pub fn from_config(config: &Config) -> Result<Self, BrokerError> {
        match config.kafka_brokers.as_deref() {
            #[cfg(feature = "kafka")]
            Some(brokers) => Ok(Broker::Kafka {
                brokers: brokers.to_string(),
            }),
            #[cfg(not(feature = "kafka"))]
            Some(brokers) => Err(BrokerError::NotConfigured(format!(
                "KAFKA_BROKERS={brokers} is set but this build has no Kafka support"
            ))),
            None if config.strategy == Strategy::Cdc => Err(BrokerError::NotConfigured(
                "the cdc strategy needs KAFKA_BROKERS".to_string(),
            )),
            None => {
                tracing::warn!("No broker configured; using the in-process broker");
                Ok(Broker::InMemory(InMemoryBroker::new()))
            }
        }
    }

    pub fn publisher(&self) -> Result<Arc<dyn MessagePublisher>, BrokerError> {
        match self {
            Broker::InMemory(broker) => Ok(Arc::new(broker.clone())),
            #[cfg(feature = "kafka")]
            Broker::Kafka { brokers } => Ok(Arc::new(propagation::KafkaPublisher::new(brokers)?)),
        }
    }

    pub async fn consumer(
        &self,
        group_id: &str,
        topics: &[&str],
    ) -> Result<Box<dyn MessageConsumer>, BrokerError> {
        match self {
            Broker::InMemory(broker) => Ok(Box::new(broker.consumer(group_id, topics).await)),
            #[cfg(feature = "kafka")]
            Broker::Kafka { brokers } => Ok(Box::new(propagation::KafkaConsumer::new(
                brokers, group_id, topics,
            )?)),
        }
    }
}

/// Wires the write path and the event source for `config.strategy`.
pub async fn build<S>(config: &Config, store: S, broker: &Broker) -> Result<Propagation, BrokerError>
where
    S: Store + Clone + 'static,
{
    let projector = EventProjector::new(store.clone());

    let propagation = match config.strategy {
        Strategy::Direct => {
            let hook = DirectPublisher::new(broker.publisher()?, config.events_topic.clone());
            let consumer = broker
                .consumer(&config.kafka_group_id, &[config.events_topic.as_str()])
                .await?;
            Propagation {
                write_path: WritePath::DirectPublish(Arc::new(hook)),
                source: Box::new(BrokerEventSource::new(
                    consumer,
                    projector,
                    config.consumer_config(),
                )),
            }
        }
        Strategy::Outbox => Propagation {
            write_path: WritePath::Outbox,
            source: Box::new(OutboxRelay::new(
                store,
                broker.publisher()?,
                projector,
                config.relay_config(),
            )),
        },
        Strategy::Cdc => {
            if matches!(broker, Broker::InMemory(_)) {
                return Err(BrokerError::NotConfigured(
                    "the cdc strategy cannot consume from the in-process broker".to_string(),
                ));
            }
            let cdc = config.cdc_config();
            let topics: Vec<&str> = cdc.topics.iter().map(String::as_str).collect();
            let consumer = broker.consumer(&config.kafka_group_id, &topics).await?;
            Propagation {
                write_path: WritePath::ChangeCapture,
                source: Box::new(CdcAdapter::new(store, consumer, projector, cdc.consumer)),
            }
        }
    };

    tracing::info!(
        strategy = ?config.strategy,
        source = propagation.source.name(),
        write_path = propagation.write_path.name(),
        "Propagation strategy wired"
    );
    Ok(propagation)
}
