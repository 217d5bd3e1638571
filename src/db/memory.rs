//! In-process store used by unit tests.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use super::{MarketAggregate, Snapshot, SnapshotStore};
use crate::error::StoreError;

#[derive(Default)]
pub(crate) struct MemoryStore {
    snapshots: Mutex<BTreeMap<u64, Snapshot>>,
    /// Number of upcoming `put` calls that fail with `Unavailable`.
    failing_puts: AtomicU32,
    pub(crate) put_calls: AtomicU32,
}

impl MemoryStore {
    pub(crate) fn fail_next_puts(&self, n: u32) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    pub(crate) fn stored_blocks(&self) -> Vec<u64> {
        self.snapshots.lock().unwrap().keys().copied().collect()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    /// Assets are keyed by symbol inside each snapshot; there is nothing to register.
    async fn ensure_schema(&self, _known_symbols: &[String]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn put(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing_puts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_puts.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.block_number(), snapshot.clone());
        Ok(())
    }

    async fn get_recent(&self, limit: i64) -> Result<Vec<MarketAggregate>, StoreError> {
        let snapshots = self.snapshots.lock().unwrap();
        Ok(snapshots
            .values()
            .rev()
            .take(limit.max(0) as usize)
            .map(|s| s.market.clone())
            .collect())
    }

    async fn get_snapshot_at_block(&self, block_number: u64) -> Result<Snapshot, StoreError> {
        self.snapshots
            .lock()
            .unwrap()
            .get(&block_number)
            .cloned()
            .ok_or(StoreError::NotFound(block_number))
    }

    async fn latest_block(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.snapshots.lock().unwrap().keys().next_back().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::transform::{
        tests::{raw_market, reserve},
        transform,
    };

    fn snapshot(block: u64) -> Snapshot {
        transform(&raw_market(block, vec![reserve("WETH", 1000, 400, 200)]))
    }

    #[tokio::test]
    async fn test_memory_store_follows_store_contract() {
        let store = MemoryStore::default();
        store.ensure_schema(&["WETH".to_string()]).await.unwrap();
        assert_eq!(store.latest_block().await.unwrap(), None);

        for block in [7, 9, 8] {
            store.put(&snapshot(block)).await.unwrap();
        }
        store.put(&snapshot(9)).await.unwrap();

        let recent: Vec<u64> = store
            .get_recent(2)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.block_number)
            .collect();
        assert_eq!(recent, vec![9, 8]);
        assert_eq!(store.latest_block().await.unwrap(), Some(9));
        assert_eq!(store.get_snapshot_at_block(8).await.unwrap(), snapshot(8));
        assert_eq!(
            store.get_snapshot_at_block(5).await.unwrap_err(),
            StoreError::NotFound(5)
        );
        assert_eq!(store.put_calls.load(Ordering::SeqCst), 4);
    }
}
