//! Outbox relay: publishes staged outbox rows with bounded retries.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use events::DecodeError;
use projections::Projection;
use store::{OutboxRecord, OutboxStore};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::direct::decode_envelope;
use crate::{EventSource, MessagePublisher, PropagationError, Result};

/// Relay scheduling and retry settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Topic every outbox row is published to.
    pub topic: String,
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Rows that failed this many times are never selected again.
    pub max_retries: u32,
    /// Processed rows older than this are deleted by housekeeping.
    pub retention: Duration,
    pub cleanup_interval: Duration,
    pub monitor_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            topic: "prescriptions".to_string(),
            poll_interval: Duration::from_secs(2),
            batch_size: 100,
            max_retries: 5,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            monitor_interval: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    /// Rejects settings under which no row would ever be relayed.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("poll_interval", self.poll_interval.is_zero()),
            ("cleanup_interval", self.cleanup_interval.is_zero()),
            ("monitor_interval", self.monitor_interval.is_zero()),
            ("batch_size", self.batch_size == 0),
            ("max_retries", self.max_retries == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(PropagationError::InvalidConfig(format!(
                "{field} must be greater than zero"
            ))),
            None => Ok(()),
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub selected: usize,
    pub published: usize,
    pub failed: usize,
}

/// Polls the outbox, publishes each pending row, projects it locally and
/// marks it processed.
///
/// Rows are handled one at a time in creation order. There is no row claim,
/// so only one relay may run against a given outbox table.
pub struct OutboxRelay<S, B, P> {
    store: S,
    publisher: B,
    projection: P,
    config: RelayConfig,
}

impl<S, B, P> OutboxRelay<S, B, P>
where
    S: OutboxStore,
    B: MessagePublisher,
    P: Projection,
{
    pub fn new(store: S, publisher: B, projection: P, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            projection,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Runs one poll cycle.
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let records = self
            .store
            .fetch_pending(self.config.batch_size, self.config.max_retries)
            .await?;

        let mut report = CycleReport {
            selected: records.len(),
            ..CycleReport::default()
        };

        for record in &records {
            if self.relay(record).await {
                report.published += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.selected > 0 {
            tracing::info!(
                selected = report.selected,
                published = report.published,
                failed = report.failed,
                "Outbox cycle finished"
            );
        }
        Ok(report)
    }

    /// Deletes processed rows older than the retention window.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<u64> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let deleted = self.store.delete_processed_before(cutoff).await?;
        metrics::counter!("outbox_events_deleted_total").increment(deleted);
        if deleted > 0 {
            tracing::info!(deleted, %cutoff, "Old outbox rows deleted");
        }
        Ok(deleted)
    }

    /// Reports the number of rows not yet processed, dead-lettered ones included.
    pub async fn report_pending(&self) -> Result<u64> {
        let pending = self.store.pending_count().await?;
        metrics::gauge!("outbox_pending_events").set(pending as f64);
        tracing::info!(pending, "Outbox backlog");
        Ok(pending)
    }

    /// Returns `true` once the row is published and marked processed.
    async fn relay(&self, record: &OutboxRecord) -> bool {
        let key = record.message_key();

        if let Err(e) = self
            .publisher
            .publish(&self.config.topic, &key, &record.payload)
            .await
        {
            metrics::counter!("outbox_publish_failures_total").increment(1);
            self.record_failure(record, &e.to_string()).await;
            return false;
        }
        let published_at = Utc::now();

        self.project_locally(record).await;

        match self
            .store
            .mark_processed(record.id, Utc::now(), published_at)
            .await
        {
            Ok(()) => {
                metrics::counter!("outbox_events_published_total").increment(1);
                tracing::debug!(outbox_id = %record.id, %key, "Outbox row published");
                true
            }
            Err(e) => {
                self.record_failure(record, &format!("published but not marked processed: {e}"))
                    .await;
                false
            }
        }
    }

    async fn record_failure(&self, record: &OutboxRecord, error: &str) {
        let attempts = record.retry_count + 1;
        if let Err(e) = self.store.mark_failed(record.id, error).await {
            tracing::error!(
                outbox_id = %record.id,
                error = %e,
                "Could not record failed attempt"
            );
            return;
        }

        if attempts >= self.config.max_retries {
            tracing::error!(
                outbox_id = %record.id,
                aggregate_id = %record.aggregate_id,
                event_type = %record.event_type,
                attempts,
                error,
                "Outbox row exhausted its retries and will not be published"
            );
        } else {
            tracing::warn!(
                outbox_id = %record.id,
                attempts,
                error,
                "Outbox publish failed; will retry"
            );
        }
    }

    /// Projection failures here are logged only; publish success alone
    /// decides whether the row is done.
    async fn project_locally(&self, record: &OutboxRecord) {
        let notification = match decode_envelope(&record.payload) {
            Ok(notification) => notification,
            Err(DecodeError::UnknownEventType(event_type)) => {
                tracing::info!(
                    outbox_id = %record.id,
                    %event_type,
                    "Published event type has no projection"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(outbox_id = %record.id, error = %e, "Published payload not projectable");
                return;
            }
        };

        if let Err(e) = self.projection.project(&notification).await {
            tracing::warn!(
                outbox_id = %record.id,
                prescription_id = %notification.prescription_id,
                error = %e,
                "Local projection failed"
            );
        }
    }
}

#[async_trait]
impl<S, B, P> EventSource for OutboxRelay<S, B, P>
where
    S: OutboxStore,
    B: MessagePublisher,
    P: Projection,
{
    fn name(&self) -> &'static str {
        "outbox"
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.config.validate()?;

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cleanup = tokio::time::interval_at(
            Instant::now() + self.config.cleanup_interval,
            self.config.cleanup_interval,
        );
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut monitor = tokio::time::interval_at(
            Instant::now() + self.config.monitor_interval,
            self.config.monitor_interval,
        );
        monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_retries = self.config.max_retries,
            "Outbox relay started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = poll.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        tracing::error!(error = %e, "Outbox cycle failed");
                    }
                }
                _ = cleanup.tick() => {
                    if let Err(e) = self.cleanup().await {
                        tracing::error!(error = %e, "Outbox cleanup failed");
                    }
                }
                _ = monitor.tick() => {
                    if let Err(e) = self.report_pending().await {
                        tracing::error!(error = %e, "Outbox monitor failed");
                    }
                }
            }
        }

        tracing::info!("Outbox relay stopped");
        Ok(())
    }
}
