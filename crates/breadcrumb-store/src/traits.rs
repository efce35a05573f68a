//! LedgerStore trait: the abstract interface for breadcrumb persistence.
//!
//! The engine only talks to this trait. Implementations include SQLite
//! (primary) and in-memory (for tests).

use async_trait::async_trait;
use breadcrumb_core::{BlockHash, CellId, ChainBlock, ChainVerification, TrustRecord};
use chrono::{DateTime, Utc};

use crate::error::Result;

/// One row of the unique-cell index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellVisit {
    pub cell: CellId,
    /// Timestamp of the first block accepted at this cell.
    pub first_visited_at: DateTime<Utc>,
    /// Number of blocks accepted at this cell.
    pub visit_count: u64,
}

/// Counts, time span and integrity of the ledger, read as one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSummary {
    pub count: u64,
    pub unique_cells: u64,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
    /// Includes an `Undecodable` issue for every row that could not be
    /// read back as a block.
    pub verification: ChainVerification,
}

/// The LedgerStore trait: async, append-only block persistence.
///
/// # Invariants
///
/// - Block indices and block hashes are each unique.
/// - `append` inserts the block and updates the unique-cell index as one
///   atomic step; a reader never sees one without the other.
/// - Blocks are never edited. The only removal is [`LedgerStore::delete_all`].
/// - The unique-cell index is derived data and can be rebuilt from blocks.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // Blocks

    /// Append a block.
    ///
    /// Fails with `DuplicateIndex` or `DuplicateHash` without writing
    /// anything if either already exists.
    async fn append(&self, block: &ChainBlock) -> Result<()>;

    /// The highest-index block.
    async fn latest(&self) -> Result<Option<ChainBlock>>;

    /// The lowest-index block (genesis in a healthy chain).
    async fn first(&self) -> Result<Option<ChainBlock>>;

    async fn by_index(&self, index: u64) -> Result<Option<ChainBlock>>;

    async fn by_hash(&self, hash: &BlockHash) -> Result<Option<ChainBlock>>;

    /// Blocks with `start <= index <= end`, ascending.
    async fn range(&self, start: u64, end: u64) -> Result<Vec<ChainBlock>>;

    /// Every block, ascending by index.
    async fn all(&self) -> Result<Vec<ChainBlock>>;

    /// The `limit` most recent blocks, descending by index.
    async fn recent(&self, limit: usize) -> Result<Vec<ChainBlock>>;

    async fn count(&self) -> Result<u64>;

    // Unique-cell index

    /// Number of distinct cells with at least one accepted block.
    async fn unique_cell_count(&self) -> Result<u64>;

    async fn cell_visit(&self, cell: &CellId) -> Result<Option<CellVisit>>;

    /// All visited cells, ordered by first visit.
    async fn cell_visits(&self) -> Result<Vec<CellVisit>>;

    /// Blocks accepted at `cell` so far (0 for an unvisited cell).
    async fn accepted_count_at(&self, cell: &CellId) -> Result<u64> {
        Ok(self.cell_visit(cell).await?.map_or(0, |v| v.visit_count))
    }

    /// Recompute the unique-cell index by replaying every block.
    async fn rebuild_cell_index(&self) -> Result<()>;

    // Trust record

    async fn save_trust_record(&self, record: &TrustRecord) -> Result<()>;

    async fn trust_record(&self) -> Result<Option<TrustRecord>>;

    // Maintenance

    /// Irreversibly remove every block, the cell index and the trust record.
    async fn delete_all(&self) -> Result<()>;

    /// Walk the whole chain once under a single read and summarize it.
    ///
    /// Rows that cannot be decoded are reported, not returned as errors.
    async fn summary(&self) -> Result<LedgerSummary>;

    /// Walk the whole chain and report every integrity issue found.
    async fn verify(&self) -> Result<ChainVerification> {
        Ok(self.summary().await?.verification)
    }
}

/// Fold blocks (ascending) into unique-cell rows.
///
/// Shared by both backends so that rebuilding the index means exactly the
/// same thing everywhere.
pub fn replay_cell_visits<'a>(blocks: impl IntoIterator<Item = &'a ChainBlock>) -> Vec<CellVisit> {
    let mut visits: Vec<CellVisit> = Vec::new();
    for block in blocks {
        match visits.iter_mut().find(|v| &v.cell == block.cell()) {
            Some(visit) => visit.visit_count += 1,
            None => visits.push(CellVisit {
                cell: block.cell().clone(),
                first_visited_at: block.timestamp(),
                visit_count: 1,
            }),
        }
    }
    visits
}
