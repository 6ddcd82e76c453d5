use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::MemoryStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL to the live reservation set once
/// `threshold` appends have accumulated since the last compaction.
pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&store, threshold).await {
            warn!("compaction failed: {e}");
        }
    }
}

/// One compaction check. Returns the number of live reservations written, if it ran.
pub async fn compact_if_due(
    store: &MemoryStore,
    threshold: u64,
) -> Result<Option<usize>, crate::store::StoreError> {
    let appends = store.appends_since_compact().await?;
    if appends < threshold {
        return Ok(None);
    }
    let live = store.compact().await?;
    info!("compacted WAL: {appends} appends folded into {live} reservations");
    Ok(Some(live))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::{Directory, ReservationStore};
    use chrono::NaiveDateTime;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tablematch_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn new_reservation(table_id: TableId) -> NewReservation {
        NewReservation {
            table_id,
            restaurant_id: 1,
            diner_ids: vec![1],
            time: NaiveDateTime::parse_from_str("2024-05-01 19:00:00", STORE_TIME_FORMAT).unwrap(),
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = MemoryStore::open(&path, Directory::default()).unwrap();

        let keep = store.insert_reservation(new_reservation(1)).await.unwrap();
        for _ in 0..3 {
            let id = store.insert_reservation(new_reservation(2)).await.unwrap();
            assert_eq!(store.delete_reservation(id).await.unwrap(), 1);
        }

        assert_eq!(compact_if_due(&store, 100).await.unwrap(), None);
        assert_eq!(compact_if_due(&store, 7).await.unwrap(), Some(1));
        assert_eq!(store.appends_since_compact().await.unwrap(), 0);

        drop(store);
        let reopened = MemoryStore::open(&path, Directory::default()).unwrap();
        assert_eq!(reopened.reservation_count().await, 1);
        assert!(reopened.reservation(keep).await.is_some());
    }
}
