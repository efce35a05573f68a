//! SQLite implementation of the LedgerStore trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking. The single
//! connection mutex serializes appends, and each append runs in one
//! transaction so the block row and its unique-cell row land together.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use breadcrumb_core::{
    BlockContent, BlockHash, CellId, ChainBlock, ChainWalker, ContextDigest, Ed25519PublicKey,
    Ed25519Signature, MetaFlags, Resolution, TrustRecord,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{replay_cell_visits, CellVisit, LedgerStore, LedgerSummary};

const BLOCK_COLUMNS: &str = "block_index, block_hash, identity, timestamp_ms, loc_cell, \
                             loc_res, context_digest, prev_hash, meta, signature";

/// SQLite-based ledger store.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("connection mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }

    #[cfg(test)]
    fn raw(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

/// A block row as stored, before decoding.
struct BlockRow {
    index: i64,
    block_hash: Vec<u8>,
    identity: Vec<u8>,
    timestamp_ms: i64,
    cell: String,
    resolution: i64,
    context_digest: Vec<u8>,
    prev_hash: Option<Vec<u8>>,
    meta: String,
    signature: Vec<u8>,
}

impl BlockRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            index: row.get("block_index")?,
            block_hash: row.get("block_hash")?,
            identity: row.get("identity")?,
            timestamp_ms: row.get("timestamp_ms")?,
            cell: row.get("loc_cell")?,
            resolution: row.get("loc_res")?,
            context_digest: row.get("context_digest")?,
            prev_hash: row.get("prev_hash")?,
            meta: row.get("meta")?,
            signature: row.get("signature")?,
        })
    }

    fn into_block(self) -> Result<ChainBlock> {
        let index = self.index;
        self.decode()
            .map_err(|what| StoreError::InvalidData(format!("block {}: {}", index, what)))
    }

    /// Decode into a block, or say which column is unusable.
    fn decode(self) -> std::result::Result<ChainBlock, String> {
        let index = u64::try_from(self.index).map_err(|_| "negative block index".to_string())?;

        let identity: [u8; 32] = self
            .identity
            .as_slice()
            .try_into()
            .map_err(|_| "identity is not 32 bytes".to_string())?;

        let signature: [u8; 64] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| "signature is not 64 bytes".to_string())?;

        let block_hash = BlockHash::try_from(self.block_hash.as_slice())
            .map_err(|_| "block hash is not 32 bytes".to_string())?;

        let previous_hash = self
            .prev_hash
            .map(|bytes| BlockHash::try_from(bytes.as_slice()))
            .transpose()
            .map_err(|_| "previous hash is not 32 bytes".to_string())?;

        let context_digest = ContextDigest::try_from(self.context_digest.as_slice())
            .map_err(|_| "context digest is not 32 bytes".to_string())?;

        let resolution = u8::try_from(self.resolution)
            .map_err(|_| format!("resolution {} out of range", self.resolution))
            .and_then(|r| Resolution::new(r).map_err(|e| e.to_string()))?;

        let content = BlockContent {
            index,
            identity: Ed25519PublicKey::from(identity),
            timestamp: millis_to_datetime(self.timestamp_ms).map_err(|e| e.to_string())?,
            location_cell: CellId::parse(&self.cell).map_err(|e| e.to_string())?,
            location_resolution: resolution,
            context_digest,
            previous_hash,
            meta: serde_json::from_str::<MetaFlags>(&self.meta)
                .map_err(|e| format!("meta: {}", e))?,
        };

        Ok(ChainBlock::from_stored(
            content,
            Ed25519Signature::from(signature),
            block_hash,
        ))
    }
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::InvalidData(format!("timestamp out of range: {}", ms)))
}

fn query_blocks<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<ChainBlock>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, BlockRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(BlockRow::into_block).collect()
}

fn query_block<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Option<ChainBlock>> {
    conn.query_row(sql, params, BlockRow::from_row)
        .optional()?
        .map(BlockRow::into_block)
        .transpose()
}

fn row_to_visit(row: &Row<'_>) -> rusqlite::Result<(String, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_visit((cell, first_ms, count): (String, i64, i64)) -> Result<CellVisit> {
    Ok(CellVisit {
        cell: CellId::parse(&cell).map_err(|e| StoreError::InvalidData(e.to_string()))?,
        first_visited_at: millis_to_datetime(first_ms)?,
        visit_count: count.max(0) as u64,
    })
}

fn insert_visit(conn: &Connection, visit: &CellVisit) -> Result<()> {
    conn.execute(
        "INSERT INTO unique_cells (cell, first_visited_at, visit_count) VALUES (?1, ?2, ?3)",
        params![
            visit.cell.as_str(),
            visit.first_visited_at.timestamp_millis(),
            visit.visit_count as i64
        ],
    )?;
    Ok(())
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn append(&self, block: &ChainBlock) -> Result<()> {
        let block = block.clone();
        let meta = serde_json::to_string(block.meta())?;

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let index = block.index();

            let index_taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM blocks WHERE block_index = ?1)",
                params![index as i64],
                |row| row.get(0),
            )?;
            if index_taken {
                return Err(StoreError::DuplicateIndex(index));
            }

            let hash_taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM blocks WHERE block_hash = ?1)",
                params![block.block_hash().as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            if hash_taken {
                return Err(StoreError::DuplicateHash(block.block_hash().to_hex()));
            }

            let content = block.content();
            let timestamp_ms = content.timestamp.timestamp_millis();

            tx.execute(
                "INSERT INTO blocks (
                    block_index, block_hash, identity, timestamp_ms, loc_cell, loc_res,
                    context_digest, prev_hash, meta, signature, appended_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    index as i64,
                    block.block_hash().as_bytes().as_slice(),
                    content.identity.0.as_slice(),
                    timestamp_ms,
                    content.location_cell.as_str(),
                    content.location_resolution.get(),
                    content.context_digest.as_bytes().as_slice(),
                    content.previous_hash.as_ref().map(|h| h.as_bytes().to_vec()),
                    meta,
                    block.signature().0.as_slice(),
                    Utc::now().timestamp_millis(),
                ],
            )?;

            tx.execute(
                "INSERT INTO unique_cells (cell, first_visited_at, visit_count)
                 VALUES (?1, ?2, 1)
                 ON CONFLICT(cell) DO UPDATE SET visit_count = visit_count + 1",
                params![content.location_cell.as_str(), timestamp_ms],
            )?;

            tx.commit()?;
            debug!(index, cell = %content.location_cell, "appended block");
            Ok(())
        })
        .await
    }

    async fn latest(&self) -> Result<Option<ChainBlock>> {
        self.run(|conn| {
            let sql = format!(
                "SELECT {} FROM blocks ORDER BY block_index DESC LIMIT 1",
                BLOCK_COLUMNS
            );
            query_block(conn, &sql, [])
        })
        .await
    }

    async fn first(&self) -> Result<Option<ChainBlock>> {
        self.run(|conn| {
            let sql = format!(
                "SELECT {} FROM blocks ORDER BY block_index ASC LIMIT 1",
                BLOCK_COLUMNS
            );
            query_block(conn, &sql, [])
        })
        .await
    }

    async fn by_index(&self, index: u64) -> Result<Option<ChainBlock>> {
        self.run(move |conn| {
            let sql = format!("SELECT {} FROM blocks WHERE block_index = ?1", BLOCK_COLUMNS);
            query_block(conn, &sql, params![index as i64])
        })
        .await
    }

    async fn by_hash(&self, hash: &BlockHash) -> Result<Option<ChainBlock>> {
        let hash = *hash;
        self.run(move |conn| {
            let sql = format!("SELECT {} FROM blocks WHERE block_hash = ?1", BLOCK_COLUMNS);
            query_block(conn, &sql, params![hash.as_bytes().as_slice()])
        })
        .await
    }

    async fn range(&self, start: u64, end: u64) -> Result<Vec<ChainBlock>> {
        if start > end {
            return Ok(Vec::new());
        }
        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM blocks WHERE block_index >= ?1 AND block_index <= ?2
                 ORDER BY block_index ASC",
                BLOCK_COLUMNS
            );
            query_blocks(conn, &sql, params![start as i64, end.min(i64::MAX as u64) as i64])
        })
        .await
    }

    async fn all(&self) -> Result<Vec<ChainBlock>> {
        self.run(|conn| {
            let sql = format!("SELECT {} FROM blocks ORDER BY block_index ASC", BLOCK_COLUMNS);
            query_blocks(conn, &sql, [])
        })
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChainBlock>> {
        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM blocks ORDER BY block_index DESC LIMIT ?1",
                BLOCK_COLUMNS
            );
            query_blocks(conn, &sql, params![limit.min(i64::MAX as usize) as i64])
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.run(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
            Ok(n as u64)
        })
        .await
    }

    async fn unique_cell_count(&self) -> Result<u64> {
        self.run(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM unique_cells", [], |row| row.get(0))?;
            Ok(n as u64)
        })
        .await
    }

    async fn cell_visit(&self, cell: &CellId) -> Result<Option<CellVisit>> {
        let cell = cell.clone();
        self.run(move |conn| {
            conn.query_row(
                "SELECT cell, first_visited_at, visit_count FROM unique_cells WHERE cell = ?1",
                params![cell.as_str()],
                row_to_visit,
            )
            .optional()?
            .map(into_visit)
            .transpose()
        })
        .await
    }

    async fn cell_visits(&self) -> Result<Vec<CellVisit>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT cell, first_visited_at, visit_count FROM unique_cells
                 ORDER BY first_visited_at ASC, cell ASC",
            )?;
            let rows = stmt
                .query_map([], row_to_visit)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(into_visit).collect()
        })
        .await
    }

    async fn accepted_count_at(&self, cell: &CellId) -> Result<u64> {
        let cell = cell.clone();
        self.run(move |conn| {
            let n: Option<i64> = conn
                .query_row(
                    "SELECT visit_count FROM unique_cells WHERE cell = ?1",
                    params![cell.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(n.unwrap_or(0).max(0) as u64)
        })
        .await
    }

    async fn rebuild_cell_index(&self) -> Result<()> {
        self.run(|conn| {
            let tx = conn.transaction()?;
            let sql = format!("SELECT {} FROM blocks ORDER BY block_index ASC", BLOCK_COLUMNS);
            let blocks = query_blocks(&tx, &sql, [])?;
            let visits = replay_cell_visits(&blocks);

            tx.execute("DELETE FROM unique_cells", [])?;
            for visit in &visits {
                insert_visit(&tx, visit)?;
            }
            tx.commit()?;

            info!(cells = visits.len(), "rebuilt unique-cell index");
            Ok(())
        })
        .await
    }

    async fn save_trust_record(&self, record: &TrustRecord) -> Result<()> {
        let record = record.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO trust_state (id, score, breadcrumb_count, unique_cells, computed_at)
                 VALUES (1, ?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    score = excluded.score,
                    breadcrumb_count = excluded.breadcrumb_count,
                    unique_cells = excluded.unique_cells,
                    computed_at = excluded.computed_at",
                params![
                    record.score,
                    record.breadcrumb_count as i64,
                    record.unique_cells as i64,
                    record.computed_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn trust_record(&self) -> Result<Option<TrustRecord>> {
        self.run(|conn| {
            let row: Option<(f64, i64, i64, i64)> = conn
                .query_row(
                    "SELECT score, breadcrumb_count, unique_cells, computed_at
                     FROM trust_state WHERE id = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            let Some((score, count, cells, at)) = row else {
                return Ok(None);
            };
            Ok(Some(TrustRecord {
                score,
                breadcrumb_count: count.max(0) as u64,
                unique_cells: cells.max(0) as u64,
                computed_at: millis_to_datetime(at)?,
            }))
        })
        .await
    }

    async fn delete_all(&self) -> Result<()> {
        self.run(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM blocks", [])?;
            tx.execute("DELETE FROM unique_cells", [])?;
            tx.execute("DELETE FROM trust_state", [])?;
            tx.commit()?;
            info!(removed, "ledger wiped");
            Ok(())
        })
        .await
    }

    async fn summary(&self) -> Result<LedgerSummary> {
        self.run(|conn| {
            let mut walker = ChainWalker::new();
            let mut count = 0u64;
            let mut first_at = None;
            let mut last_at = None;

            {
                let sql = format!("SELECT {} FROM blocks ORDER BY block_index ASC", BLOCK_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let index: i64 = row.get("block_index")?;
                    let at = row
                        .get::<_, i64>("timestamp_ms")
                        .ok()
                        .and_then(|ms| millis_to_datetime(ms).ok());

                    let decoded = BlockRow::from_row(row)
                        .map_err(|e| e.to_string())
                        .and_then(BlockRow::decode);
                    match decoded {
                        Ok(block) => walker.push(&block),
                        Err(reason) => {
                            warn!(index, %reason, "undecodable block row");
                            walker.push_undecodable(index.max(0) as u64, reason);
                        }
                    }

                    if count == 0 {
                        first_at = at;
                    }
                    last_at = at;
                    count += 1;
                }
            }

            let unique_cells: i64 =
                conn.query_row("SELECT COUNT(*) FROM unique_cells", [], |row| row.get(0))?;

            Ok(LedgerSummary {
                count,
                unique_cells: unique_cells.max(0) as u64,
                first_at,
                last_at,
                verification: walker.finish(),
            })
        })
        .await
    }
}
