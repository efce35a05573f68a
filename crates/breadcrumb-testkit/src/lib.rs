//! # Breadcrumb Testkit
//!
//! Testing utilities for the breadcrumb ledger.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a keypair plus memory store, fixed clocks, chain builders
//! - **Scripted sensors**: location and motion providers that replay a script
//! - **Store doubles**: a store whose trust-record writes can be made to fail
//! - **Generators**: Proptest strategies for points, keys and trajectories
//!
//! ## Test Fixtures
//!
//! ```rust
//! use breadcrumb_testkit::fixtures::{origin, TestFixture};
//!
//! let fixture = TestFixture::with_seed([1; 32]);
//! let here = origin();
//! let blocks = fixture.make_chain(&[here, here.offset_m(500.0, 0.0)], 600);
//! assert_eq!(blocks[1].index(), 1);
//! ```
//!
//! ## Engine Harness
//!
//! ```rust,ignore
//! use breadcrumb_testkit::{fix_at, origin, EngineHarness};
//!
//! let harness = EngineHarness::new();
//! harness.engine.initialize().await?;
//! let result = harness.drop_at(fix_at(origin(), 0)).await;
//! assert!(result.is_accepted());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use breadcrumb_testkit::generators::{geo_point, resolution};
//!
//! proptest! {
//!     #[test]
//!     fn cell_is_deterministic(p in geo_point(), r in resolution()) {
//!         prop_assert_eq!(cell_of_point(&p, r), cell_of_point(&p, r));
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod sensors;
pub mod stores;

pub use fixtures::{at, base_time, fix_at, fixes_along, origin, EngineHarness, TestFixture};
pub use generators::{track, TrackStep};
pub use sensors::{FixedMotion, ScriptedLocation};
pub use stores::TrustWriteFailingStore;
