//! # Breadcrumb Engine
//!
//! The collection engine for proof-of-trajectory identities: it turns
//! location fixes into signed, hash-linked breadcrumbs and keeps the trust
//! score current.
//!
//! ## Overview
//!
//! - **Sensing**: a [`LocationProvider`] (and optionally a
//!   [`MotionProvider`]) supplies fixes; slow fixes become `NoFix`
//! - **Policy**: the drop policy decides whether a fix extends the chain
//! - **Signing**: blocks are signed with the identity from a [`KeyStore`]
//! - **Persistence**: blocks are appended to any [`LedgerStore`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use breadcrumb_engine::{CollectionEngine, EngineConfig, FileKeyStore, LocationProvider};
//! use breadcrumb_engine::store::SqliteStore;
//!
//! async fn example(gps: Arc<dyn LocationProvider>) {
//!     let store = SqliteStore::open("ledger.db").unwrap();
//!     let keys = Arc::new(FileKeyStore::new("identity.key"));
//!
//!     let engine = CollectionEngine::builder(store, gps, keys)
//!         .config(EngineConfig::default())
//!         .build();
//!
//!     engine.initialize().await.unwrap();
//!     let result = engine.drop_breadcrumb(true).await.unwrap();
//!     println!("accepted: {}", result.is_accepted());
//!
//!     let stats = engine.get_stats().await.unwrap();
//!     println!("trust score {:.1} over {} breadcrumbs", stats.trust_score, stats.count);
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `breadcrumb_engine::core` - Pure primitives (blocks, policy, scoring)
//! - `breadcrumb_engine::store` - Ledger storage and SQLite

pub mod config;
pub mod engine;
pub mod error;
pub mod keystore;
pub mod sensors;

// Re-export component crates
pub use breadcrumb_core as core;
pub use breadcrumb_store as store;

pub use config::EngineConfig;
pub use engine::{CollectionEngine, DropResult, EngineBuilder, EngineState, LedgerStats};
pub use error::{EngineError, Result};
pub use keystore::{FileKeyStore, KeyStore, MemoryKeyStore};
pub use sensors::{FixError, LocationFix, LocationProvider, MotionProvider};

// Re-export commonly used core types
pub use breadcrumb_core::{
    BlockHash, CellId, ChainBlock, ChainVerification, DropBasis, DropPolicyConfig, Keypair,
    MotionSnapshot, RejectReason, Resolution,
};
