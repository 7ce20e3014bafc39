use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use nearbux_core::flows::FlowSnapshot;

pub mod memory;
pub mod snapshot;

pub use memory::InMemoryFlowSnapshotRepository;
pub use snapshot::SqlFlowSnapshotRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Per-session resume points. At most one snapshot is kept per session id.
#[async_trait]
pub trait FlowSnapshotRepository: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<FlowSnapshot>, RepositoryError>;
    async fn save(&self, snapshot: FlowSnapshot) -> Result<(), RepositoryError>;
    async fn delete(&self, session_id: &str) -> Result<(), RepositoryError>;
    /// Removes snapshots last updated before `cutoff`; returns how many went.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
