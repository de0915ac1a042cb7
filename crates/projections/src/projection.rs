//! Core projection trait.

use std::sync::Arc;

use async_trait::async_trait;
use events::ChangeNotification;

use crate::Result;

/// Outcome of projecting one notification.
///
/// View write failures are isolated and counted here instead of failing the
/// call; they are not retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionReport {
    /// The notification was filtered out and nothing was attempted.
    pub skipped: bool,
    pub pharmacy_rows: usize,
    pub chart_rows: usize,
    pub failures: usize,
}

impl ProjectionReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn rows_written(&self) -> usize {
        self.pharmacy_rows + self.chart_rows
    }

    pub fn is_complete(&self) -> bool {
        self.failures == 0
    }
}

impl std::fmt::Display for ProjectionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.skipped {
            return f.write_str("skipped");
        }
        write!(
            f,
            "pharmacy={} chart={} failures={}",
            self.pharmacy_rows, self.chart_rows, self.failures
        )
    }
}

/// Fans a change notification out to the read models.
///
/// An `Err` means the notification as a whole could not be projected
/// (missing reference data or an infrastructure error before any write).
#[async_trait]
pub trait Projection: Send + Sync {
    /// Returns the name of this projection.
    fn name(&self) -> &'static str;

    async fn project(&self, notification: &ChangeNotification) -> Result<ProjectionReport>;
}

#[async_trait]
impl<P: Projection + ?Sized> Projection for Arc<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn project(&self, notification: &ChangeNotification) -> Result<ProjectionReport> {
        (**self).project(notification).await
    }
}
