//! Database schema migrations for SQLite.
//!
//! Each migration transforms the schema from version N to N+1. Applied
//! versions are recorded in `schema_migrations`.

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            debug!(version, "applying schema migration");
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, chrono::Utc::now().timestamp_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: blocks, unique cells, trust record.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Append-only block table
        CREATE TABLE blocks (
            block_index INTEGER PRIMARY KEY,   -- 0 = genesis
            block_hash BLOB NOT NULL UNIQUE,   -- 32 bytes, SHA-256
            identity BLOB NOT NULL,            -- 32 bytes, Ed25519 public key
            timestamp_ms INTEGER NOT NULL,     -- Unix ms, UTC
            loc_cell TEXT NOT NULL,
            loc_res INTEGER NOT NULL,
            context_digest BLOB NOT NULL,      -- 32 bytes
            prev_hash BLOB,                    -- NULL for genesis
            meta TEXT NOT NULL,                -- JSON meta flags
            signature BLOB NOT NULL,           -- 64 bytes
            appended_at INTEGER NOT NULL       -- local time of append
        );

        -- Derived index: one row per distinct visited cell
        CREATE TABLE unique_cells (
            cell TEXT PRIMARY KEY,
            first_visited_at INTEGER NOT NULL,
            visit_count INTEGER NOT NULL
        );

        -- Single-row trust score record
        CREATE TABLE trust_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            score REAL NOT NULL,
            breadcrumb_count INTEGER NOT NULL,
            unique_cells INTEGER NOT NULL,
            computed_at INTEGER NOT NULL
        );

        CREATE INDEX idx_blocks_cell ON blocks(loc_cell);
        CREATE INDEX idx_unique_cells_first ON unique_cells(first_visited_at);
        "#,
    )?;

    Ok(())
}
