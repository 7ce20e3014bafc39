use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use nearbux_core::flows::FlowSnapshot;

use super::{FlowSnapshotRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryFlowSnapshotRepository {
    snapshots: RwLock<HashMap<String, FlowSnapshot>>,
}

#[async_trait::async_trait]
impl FlowSnapshotRepository for InMemoryFlowSnapshotRepository {
    async fn load(&self, session_id: &str) -> Result<Option<FlowSnapshot>, RepositoryError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(session_id).cloned())
    }

    async fn save(&self, snapshot: FlowSnapshot) -> Result<(), RepositoryError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.session_id.clone(), snapshot);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), RepositoryError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.remove(session_id);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut snapshots = self.snapshots.write().await;
        let before = snapshots.len();
        snapshots.retain(|_, snapshot| snapshot.updated_at >= cutoff);
        Ok((before - snapshots.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use nearbux_core::flows::{FlowKind, FlowSnapshot, Step};

    use super::InMemoryFlowSnapshotRepository;
    use crate::repositories::FlowSnapshotRepository;

    fn snapshot(session_id: &str, step: Step) -> FlowSnapshot {
        FlowSnapshot {
            session_id: session_id.to_string(),
            flow: FlowKind::PasswordReset,
            step,
            phone: None,
            identity: None,
            shop: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_replaces_the_previous_snapshot_for_a_session() {
        let repo = InMemoryFlowSnapshotRepository::default();
        repo.save(snapshot("sess-1", Step::OtpEntry)).await.expect("save");
        repo.save(snapshot("sess-1", Step::NewCredential)).await.expect("save");

        let loaded = repo.load("sess-1").await.expect("load").expect("present");
        assert_eq!(loaded.step, Step::NewCredential);

        repo.delete("sess-1").await.expect("delete");
        assert_eq!(repo.load("sess-1").await.expect("load"), None);
    }

    #[tokio::test]
    async fn purge_drops_only_stale_snapshots() {
        let repo = InMemoryFlowSnapshotRepository::default();
        let mut stale = snapshot("stale", Step::NewCredential);
        stale.updated_at = Utc::now() - Duration::days(30);
        repo.save(stale).await.expect("save");
        repo.save(snapshot("fresh", Step::OtpEntry)).await.expect("save");

        let purged =
            repo.purge_older_than(Utc::now() - Duration::hours(1)).await.expect("purge");
        assert_eq!(purged, 1);
        assert_eq!(repo.load("stale").await.expect("load"), None);
        assert!(repo.load("fresh").await.expect("load").is_some());
    }
}
