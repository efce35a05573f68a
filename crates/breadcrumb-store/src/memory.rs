//! In-memory implementation of the LedgerStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use breadcrumb_core::{verify_chain, BlockHash, CellId, ChainBlock, TrustRecord};

use crate::error::{Result, StoreError};
use crate::traits::{replay_cell_visits, CellVisit, LedgerStore, LedgerSummary};

/// In-memory ledger store.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock: an
/// append holds the write lock for the block and cell index together.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Blocks ordered by index.
    blocks: BTreeMap<u64, ChainBlock>,

    /// Hash index: block_hash -> index.
    hashes: HashMap<BlockHash, u64>,

    /// Unique-cell index, in first-visit order.
    cells: Vec<CellVisit>,

    trust: Option<TrustRecord>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append(&self, block: &ChainBlock) -> Result<()> {
        let mut guard = self.write()?;
        let inner = &mut *guard;
        let index = block.index();

        if inner.blocks.contains_key(&index) {
            return Err(StoreError::DuplicateIndex(index));
        }
        if inner.hashes.contains_key(block.block_hash()) {
            return Err(StoreError::DuplicateHash(block.block_hash().to_hex()));
        }

        inner.blocks.insert(index, block.clone());
        inner.hashes.insert(*block.block_hash(), index);

        match inner.cells.iter_mut().find(|v| &v.cell == block.cell()) {
            Some(visit) => visit.visit_count += 1,
            None => inner.cells.push(CellVisit {
                cell: block.cell().clone(),
                first_visited_at: block.timestamp(),
                visit_count: 1,
            }),
        }

        Ok(())
    }

    async fn latest(&self) -> Result<Option<ChainBlock>> {
        Ok(self.read()?.blocks.values().next_back().cloned())
    }

    async fn first(&self) -> Result<Option<ChainBlock>> {
        Ok(self.read()?.blocks.values().next().cloned())
    }

    async fn by_index(&self, index: u64) -> Result<Option<ChainBlock>> {
        Ok(self.read()?.blocks.get(&index).cloned())
    }

    async fn by_hash(&self, hash: &BlockHash) -> Result<Option<ChainBlock>> {
        let inner = self.read()?;
        Ok(inner
            .hashes
            .get(hash)
            .and_then(|index| inner.blocks.get(index))
            .cloned())
    }

    async fn range(&self, start: u64, end: u64) -> Result<Vec<ChainBlock>> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self.read()?.blocks.range(start..=end).map(|(_, b)| b.clone()).collect())
    }

    async fn all(&self) -> Result<Vec<ChainBlock>> {
        Ok(self.read()?.blocks.values().cloned().collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChainBlock>> {
        Ok(self.read()?.blocks.values().rev().take(limit).cloned().collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.read()?.blocks.len() as u64)
    }

    async fn unique_cell_count(&self) -> Result<u64> {
        Ok(self.read()?.cells.len() as u64)
    }

    async fn cell_visit(&self, cell: &CellId) -> Result<Option<CellVisit>> {
        Ok(self.read()?.cells.iter().find(|v| &v.cell == cell).cloned())
    }

    async fn cell_visits(&self) -> Result<Vec<CellVisit>> {
        let mut visits = self.read()?.cells.clone();
        visits.sort_by(|a, b| {
            a.first_visited_at
                .cmp(&b.first_visited_at)
                .then_with(|| a.cell.as_str().cmp(b.cell.as_str()))
        });
        Ok(visits)
    }

    async fn rebuild_cell_index(&self) -> Result<()> {
        let mut inner = self.write()?;
        let visits = replay_cell_visits(inner.blocks.values());
        inner.cells = visits;
        Ok(())
    }

    async fn save_trust_record(&self, record: &TrustRecord) -> Result<()> {
        self.write()?.trust = Some(record.clone());
        Ok(())
    }

    async fn trust_record(&self) -> Result<Option<TrustRecord>> {
        Ok(self.read()?.trust.clone())
    }

    async fn delete_all(&self) -> Result<()> {
        *self.write()? = MemoryStoreInner::default();
        Ok(())
    }

    async fn summary(&self) -> Result<LedgerSummary> {
        let inner = self.read()?;
        let blocks: Vec<ChainBlock> = inner.blocks.values().cloned().collect();
        Ok(LedgerSummary {
            count: blocks.len() as u64,
            unique_cells: inner.cells.len() as u64,
            first_at: blocks.first().map(ChainBlock::timestamp),
            last_at: blocks.last().map(ChainBlock::timestamp),
            verification: verify_chain(&blocks),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breadcrumb_core::{cell_of, BlockBuilder, Keypair, Resolution};
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn make_chain(keypair: &Keypair, cells: &[CellId]) -> Vec<ChainBlock> {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let mut blocks: Vec<ChainBlock> = Vec::new();
        for (i, c) in cells.iter().enumerate() {
            let block = BlockBuilder::next(blocks.last(), c.clone())
                .timestamp(start + Duration::minutes(10 * i as i64))
                .sign(keypair);
            blocks.push(block);
        }
        blocks
    }

    fn cell(lat: f64, lon: f64) -> CellId {
        cell_of(lat, lon, Resolution::DEFAULT).unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let blocks = make_chain(&Keypair::generate(), &[cell(1.0, 1.0), cell(1.1, 1.0)]);
        for b in &blocks {
            store.append(b).await.unwrap();
        }

        assert_eq!(store.latest().await.unwrap().as_ref(), Some(&blocks[1]));
        assert_eq!(
            store.by_hash(blocks[0].block_hash()).await.unwrap().as_ref(),
            Some(&blocks[0])
        );
        assert_eq!(store.recent(5).await.unwrap().len(), 2);
        assert!(store.verify().await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_memory_store_duplicates() {
        let store = MemoryStore::new();
        let blocks = make_chain(&Keypair::generate(), &[cell(1.0, 1.0)]);
        store.append(&blocks[0]).await.unwrap();

        let err = store.append(&blocks[0]).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIndex(0)));
        assert_eq!(store.accepted_count_at(blocks[0].cell()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_all_resets_everything() {
        let store = MemoryStore::new();
        let blocks = make_chain(&Keypair::generate(), &[cell(1.0, 1.0), cell(1.0, 1.0)]);
        for b in &blocks {
            store.append(b).await.unwrap();
        }
        store.delete_all().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.unique_cell_count().await.unwrap(), 0);
        assert!(store.first().await.unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_cell_index_equals_replay(picks in prop::collection::vec(0usize..4, 1..30)) {
            let spots = [cell(10.0, 10.0), cell(10.1, 10.0), cell(10.2, 10.0), cell(10.3, 10.0)];
            let cells: Vec<CellId> = picks.iter().map(|&i| spots[i].clone()).collect();
            let blocks = make_chain(&Keypair::from_seed(&[3; 32]), &cells);

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = MemoryStore::new();
                for b in &blocks {
                    store.append(b).await.unwrap();
                }
                let incremental = store.cell_visits().await.unwrap();
                store.rebuild_cell_index().await.unwrap();
                let rebuilt = store.cell_visits().await.unwrap();

                let mut distinct = cells.clone();
                distinct.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                distinct.dedup();

                assert_eq!(incremental, rebuilt);
                assert_eq!(store.unique_cell_count().await.unwrap(), distinct.len() as u64);
                let total: u64 = rebuilt.iter().map(|v| v.visit_count).sum();
                assert_eq!(total, blocks.len() as u64);
            });
        }
    }
}
