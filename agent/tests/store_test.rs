//! Integration tests for the durable record store.

mod common;

use attend_agent::error::StoreError;
use attend_agent::store::RecordStore;
use attend_engine::{
    AttendanceRecord, LedgerSnapshot, RecordFilter, SortOrder, StateFilter, SyncState,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join("attendance.json")
}

async fn open(path: &Path, capacity: usize) -> RecordStore {
    RecordStore::open(path, capacity, common::device(), Duration::from_secs(1))
        .await
        .unwrap()
}

#[cfg(test)]
mod durability_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let store = open(&store_path(&dir), 10).await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.last_id, 0);
    }

    #[tokio::test]
    async fn test_restart_between_appends() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);

        let mut returned = Vec::new();
        for round in 0..3u64 {
            let store = open(&path, 100).await;
            for i in 0..4u64 {
                let receipt = store
                    .append(&format!("card-{}-{}", round, i), 1000 + round * 10 + i)
                    .await
                    .unwrap();
                returned.push(receipt.id);
            }
        }

        let store = open(&path, 100).await;
        let page = store
            .snapshot(&RecordFilter::all().with_order(SortOrder::Oldest))
            .await
            .unwrap();
        let stored: Vec<u64> = page.records.iter().map(|r| r.id).collect();

        assert_eq!(stored, returned);
        assert_eq!(stored, (1..=12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_ids_continue_after_clear_and_restart() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);

        {
            let store = open(&path, 10).await;
            store.append("A", 1000).await.unwrap();
            store.append("B", 1001).await.unwrap();
            store.mark_synced(&[1, 2], 2000).await.unwrap();
            assert_eq!(store.clear_synced().await.unwrap(), 2);
        }

        let store = open(&path, 10).await;
        let receipt = store.append("C", 3000).await.unwrap();
        assert_eq!(receipt.id, 3);
    }

    #[tokio::test]
    async fn test_sync_state_survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);

        {
            let store = open(&path, 10).await;
            for code in ["A", "B", "C"] {
                store.append(code, 1000).await.unwrap();
            }
            store.mark_synced(&[1], 2000).await.unwrap();
            store.mark_failed(&[2], 2000).await.unwrap();
        }

        let store = open(&path, 10).await;
        assert_eq!(store.get(1).await.unwrap().unwrap().sync_state, SyncState::Synced);
        assert_eq!(
            store.get(2).await.unwrap().unwrap().sync_state,
            SyncState::Failed { attempts: 1 }
        );
        assert_eq!(store.get(3).await.unwrap().unwrap().sync_state, SyncState::Pending);
    }

    #[tokio::test]
    async fn test_stale_tmp_file_removed() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        let tmp = dir.path().join("attendance.json.tmp");
        std::fs::write(&tmp, "{ half written").unwrap();

        let store = open(&path, 10).await;

        assert!(!tmp.exists());
        assert_eq!(store.stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        std::fs::write(&path, "not json at all").unwrap();

        let result = RecordStore::open(&path, 10, common::device(), Duration::from_secs(1)).await;

        assert!(matches!(result, Err(StoreError::Corrupt(_))));
        // Never silently replaced
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json at all");
    }

    #[tokio::test]
    async fn test_invalid_snapshot_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        std::fs::write(
            &path,
            r#"{"formatVersion":1,"lastId":1,"lossCount":0,"records":[
                {"id":5,"identifier":"A","capturedAt":1,"deviceId":"d","deviceName":"n","location":"l","state":"pending"}
            ]}"#,
        )
        .unwrap();

        let result = RecordStore::open(&path, 10, common::device(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_file_is_plain_json_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        let store = open(&path, 10).await;
        store.append("04A1B2C3", 1706745600000).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(json["formatVersion"], 1);
        assert_eq!(json["lastId"], 1);
        assert_eq!(json["lossCount"], 0);
        assert_eq!(json["records"][0]["identifier"], "04A1B2C3");
        assert_eq!(json["records"][0]["deviceId"], "gate-01");
        assert_eq!(json["records"][0]["state"], "pending");
    }

    #[tokio::test]
    async fn test_abandoned_append_keeps_disk_and_memory_in_step() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        let preloaded = 50_000u64;
        let records: Vec<AttendanceRecord> = (1..=preloaded)
            .map(|id| {
                AttendanceRecord::new(id, format!("{:08X}", id), 1_000 + id, common::device())
            })
            .collect();
        let snapshot = LedgerSnapshot::new(preloaded, 0, records);
        std::fs::write(&path, snapshot.to_json().unwrap()).unwrap();
        let store = open(&path, 100_000).await;

        // Large file, so the write is still running when the caller gives up
        let _ = tokio::time::timeout(
            Duration::from_millis(1),
            store.append("XXXX", 2_000_000),
        )
        .await;
        let next = store.append("YYYY", 2_000_001).await.unwrap();

        let reopened = open(&path, 100_000).await;
        assert_eq!(
            reopened.stats().await.unwrap().last_id,
            store.stats().await.unwrap().last_id
        );
        for id in preloaded + 1..=next.id {
            assert_eq!(store.get(id).await.unwrap(), reopened.get(id).await.unwrap());
        }
        assert_eq!(reopened.get(next.id).await.unwrap().unwrap().identifier, "YYYY");
        if next.id == preloaded + 2 {
            assert_eq!(
                reopened.get(preloaded + 1).await.unwrap().unwrap().identifier,
                "XXXX"
            );
        } else {
            assert_eq!(next.id, preloaded + 1);
        }
    }
}

#[cfg(test)]
mod capacity_tests {
    use super::*;

    #[tokio::test]
    async fn test_capacity_three_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let store = open(&store_path(&dir), 3).await;
        for code in ["A", "B", "C"] {
            store.append(code, 1000).await.unwrap();
        }

        let receipt = store.append("D", 1001).await.unwrap();

        let evicted = receipt.evicted.unwrap();
        assert_eq!(evicted.record.identifier, "A");
        assert!(evicted.lossy);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.loss_count, 1);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.usage_percent, 100.0);

        let page = store
            .snapshot(&RecordFilter::all().with_order(SortOrder::Oldest))
            .await
            .unwrap();
        let codes: Vec<_> = page.records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(codes, vec!["B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_reopen_with_smaller_capacity_evicts_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        {
            let store = open(&path, 10).await;
            for code in ["A", "B", "C", "D", "E"] {
                store.append(code, 1000).await.unwrap();
            }
            store.mark_synced(&[2], 2000).await.unwrap();
        }

        let store = open(&path, 3).await;
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.loss_count, 1);
        drop(store);

        // Eviction at open was written back
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["records"].as_array().unwrap().len(), 3);
        assert_eq!(json["lossCount"], 1);
    }

    #[tokio::test]
    async fn test_set_capacity_at_runtime() {
        let dir = TempDir::new().unwrap();
        let store = open(&store_path(&dir), 10).await;
        for code in ["A", "B", "C", "D"] {
            store.append(code, 1000).await.unwrap();
        }

        let evicted = store.set_capacity(2).await.unwrap();
        assert_eq!(evicted.len(), 2);
        assert_eq!(store.stats().await.unwrap().capacity, 2);

        assert!(matches!(
            store.set_capacity(0).await,
            Err(StoreError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_filters_and_pages() {
        let dir = TempDir::new().unwrap();
        let store = open(&store_path(&dir), 10).await;
        for code in ["aa01", "BB02", "AA03", "cc04"] {
            store.append(code, 1000).await.unwrap();
        }
        store.mark_synced(&[3], 2000).await.unwrap();

        let page = store
            .snapshot(&RecordFilter::default().with_search("aa"))
            .await
            .unwrap();
        let ids: Vec<u64> = page.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1]);

        let page = store
            .snapshot(
                &RecordFilter::default()
                    .with_state(StateFilter::Pending)
                    .with_page(2, 0),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.records.len(), 2);
        assert!(page.has_more);
    }
}
