use std::sync::Arc;

use async_trait::async_trait;
use store::Prescription;

use crate::HookError;

/// Runs after a prescription has been committed.
///
/// A failing hook never undoes the commit.
#[async_trait]
pub trait CommitHook: Send + Sync {
    async fn after_commit(&self, prescription: &Prescription) -> Result<(), HookError>;
}

/// How a committed prescription leaves the write side.
#[derive(Clone, Default)]
pub enum WritePath {
    /// Commit, then hand the aggregate to a hook. Best effort.
    DirectPublish(Arc<dyn CommitHook>),
    /// Commit the aggregate and an outbox record atomically.
    #[default]
    Outbox,
    /// Commit only; log capture picks the rows up.
    ChangeCapture,
}

impl WritePath {
    pub fn name(&self) -> &'static str {
        match self {
            WritePath::DirectPublish(_) => "direct",
            WritePath::Outbox => "outbox",
            WritePath::ChangeCapture => "cdc",
        }
    }
}

impl std::fmt::Debug for WritePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
