//! Store doubles for failure paths.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use breadcrumb_core::{BlockHash, CellId, ChainBlock, TrustRecord};
use breadcrumb_store::{
    CellVisit, LedgerStore, LedgerSummary, MemoryStore, Result, StoreError,
};

/// A [`MemoryStore`] whose trust-record writes can be switched to fail.
///
/// Blocks still append normally, which is what exercises the
/// "appended but score not refreshed" path.
#[derive(Default)]
pub struct TrustWriteFailingStore {
    inner: MemoryStore,
    fail_trust_writes: AtomicBool,
}

impl TrustWriteFailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_trust_writes.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for TrustWriteFailingStore {
    async fn append(&self, block: &ChainBlock) -> Result<()> {
        self.inner.append(block).await
    }

    async fn latest(&self) -> Result<Option<ChainBlock>> {
        self.inner.latest().await
    }

    async fn first(&self) -> Result<Option<ChainBlock>> {
        self.inner.first().await
    }

    async fn by_index(&self, index: u64) -> Result<Option<ChainBlock>> {
        self.inner.by_index(index).await
    }

    async fn by_hash(&self, hash: &BlockHash) -> Result<Option<ChainBlock>> {
        self.inner.by_hash(hash).await
    }

    async fn range(&self, start: u64, end: u64) -> Result<Vec<ChainBlock>> {
        self.inner.range(start, end).await
    }

    async fn all(&self) -> Result<Vec<ChainBlock>> {
        self.inner.all().await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChainBlock>> {
        self.inner.recent(limit).await
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }

    async fn unique_cell_count(&self) -> Result<u64> {
        self.inner.unique_cell_count().await
    }

    async fn cell_visit(&self, cell: &CellId) -> Result<Option<CellVisit>> {
        self.inner.cell_visit(cell).await
    }

    async fn cell_visits(&self) -> Result<Vec<CellVisit>> {
        self.inner.cell_visits().await
    }

    async fn rebuild_cell_index(&self) -> Result<()> {
        self.inner.rebuild_cell_index().await
    }

    async fn save_trust_record(&self, record: &TrustRecord) -> Result<()> {
        if self.fail_trust_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("trust_state is read-only".into()));
        }
        self.inner.save_trust_record(record).await
    }

    async fn trust_record(&self) -> Result<Option<TrustRecord>> {
        self.inner.trust_record().await
    }

    async fn delete_all(&self) -> Result<()> {
        self.inner.delete_all().await
    }

    async fn summary(&self) -> Result<LedgerSummary> {
        self.inner.summary().await
    }
}
