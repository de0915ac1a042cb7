//! Event sources that keep the read models in step with the write side.
//!
//! Every strategy implements [`EventSource`] and delivers a
//! [`events::ChangeNotification`] to the same [`projections::Projection`]:
//! - direct publish: [`DirectPublisher`] publishes after commit and
//!   [`BrokerEventSource`] consumes what it published
//! - [`OutboxRelay`]: polls the transactional outbox with bounded retries
//! - [`CdcAdapter`]: consumes row changes captured from the database log
//!
//! Broker access goes through [`MessagePublisher`] and [`MessageConsumer`].
//! [`InMemoryBroker`] implements both in process; the `kafka` feature adds
//! rdkafka-backed clients.

pub mod broker;
pub mod cdc;
pub mod direct;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod outbox_relay;
pub mod source;

pub use broker::{
    BrokerMessage, Delivery, InMemoryBroker, InMemoryConsumer, MessageConsumer, MessagePublisher,
};
pub use cdc::{CdcAdapter, CdcConfig};
pub use direct::{BrokerEventSource, DirectPublisher};
pub use error::{BrokerError, PropagationError, Result};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumer, KafkaPublisher};
pub use outbox_relay::{CycleReport, OutboxRelay, RelayConfig};
pub use source::{ConsumerConfig, EventSource, MessageOutcome};
