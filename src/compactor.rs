use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that rewrites a workspace's log once enough records pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Returns true if a compaction ran and succeeded. A threshold of 0 disables compaction.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    if threshold == 0 {
        return false;
    }
    let appends = engine.appends_since_compact().await;
    if appends < threshold {
        tracing::debug!("compactor skip: {appends} appends below {threshold}");
        return false;
    }
    match engine.compact().await {
        Ok(()) => {
            info!("compacted log after {appends} appends");
            metrics::counter!(crate::observability::COMPACTIONS_TOTAL).increment(1);
            true
        }
        Err(e) => {
            warn!("compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::repository::{InMemoryRepository, WalRepository};
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("crewcal_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn add_blocks(engine: &Engine, n: u32) {
        for i in 0..n {
            let draft = BookingDraft::new(
                format!("Block {i}"),
                NaiveDate::from_ymd_opt(2025, 7, 1 + i).unwrap(),
                "09:00",
                "17:00",
                BookingStatus::Held,
            );
            engine.create_booking("sara", draft).await.unwrap();
        }
    }

    #[tokio::test]
    async fn compacts_once_threshold_reached() {
        let path = test_wal_path("threshold.wal");
        let repo = Arc::new(WalRepository::open(path).unwrap());
        let engine = Engine::new(repo, Arc::new(NotifyHub::new()));

        add_blocks(&engine, 3).await;
        assert!(!compact_if_needed(&engine, 5).await);
        assert_eq!(engine.appends_since_compact().await, 3);

        add_blocks(&engine, 2).await;
        assert!(compact_if_needed(&engine, 5).await);
        assert_eq!(engine.appends_since_compact().await, 0);
    }

    #[tokio::test]
    async fn zero_threshold_disables() {
        let path = test_wal_path("disabled.wal");
        let repo = Arc::new(WalRepository::open(path).unwrap());
        let engine = Engine::new(repo, Arc::new(NotifyHub::new()));
        add_blocks(&engine, 2).await;
        assert!(!compact_if_needed(&engine, 0).await);
    }

    #[tokio::test]
    async fn memory_repository_never_compacts() {
        let engine = Engine::new(Arc::new(InMemoryRepository::new()), Arc::new(NotifyHub::new()));
        add_blocks(&engine, 2).await;
        assert!(!compact_if_needed(&engine, 1).await);
    }
}
