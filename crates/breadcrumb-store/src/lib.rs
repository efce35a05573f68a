//! # Breadcrumb Store
//!
//! Append-only persistence for the breadcrumb ledger. Provides a
//! trait-based interface with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`LedgerStore`] - The async trait for all ledger operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`CellVisit`] - One row of the unique-cell index
//! - [`LedgerSummary`] - Counts and verification from one consistent read
//!
//! ## Usage
//!
//! ```rust,no_run
//! use breadcrumb_store::{LedgerStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("ledger.db").unwrap();
//!
//!     if let Some(tip) = store.latest().await.unwrap() {
//!         println!("tip #{} at {}", tip.index(), tip.cell());
//!     }
//!
//!     let report = store.verify().await.unwrap();
//!     for issue in report.messages() {
//!         println!("{}", issue);
//!     }
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Strict appends**: a duplicate index or hash fails the append with
//!   nothing written
//! - **Derived cell index**: updated in the same step as the block, and
//!   rebuildable from the blocks alone
//! - **Verification as data**: `verify` reports issues, it never fails on
//!   a corrupt chain

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{replay_cell_visits, CellVisit, LedgerStore, LedgerSummary};
