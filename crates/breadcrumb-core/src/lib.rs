//! # Breadcrumb Core
//!
//! Pure primitives for the breadcrumb ledger: the proof-of-trajectory chain.
//!
//! This crate contains no I/O, no storage, no clocks beyond what callers
//! pass in. It is pure computation over location cells and signed blocks.
//!
//! ## Key Types
//!
//! - [`CellId`] / [`Resolution`] - Quantized location and its granularity
//! - [`ChainBlock`] - One signed, hash-linked breadcrumb
//! - [`BlockBuilder`] - Builds and signs the next block
//! - [`DropPolicyConfig`] / [`evaluate`] - Accept/reject rules for new drops
//! - [`verify_chain`] - Whole-chain integrity report
//! - [`trust_score`] - Bounded score over ledger statistics
//!
//! ## Canonicalization
//!
//! Blocks are signed over a canonical JSON pre-image. See [`canonical`].

pub mod block;
pub mod canonical;
pub mod context;
pub mod crypto;
pub mod error;
pub mod geo;
pub mod policy;
pub mod trust;
pub mod types;
pub mod verification;

pub use block::{BlockBuilder, BlockContent, ChainBlock, MetaFlags};
pub use canonical::{canonical_preimage, format_timestamp, GENESIS_SENTINEL};
pub use context::{context_digest, MotionSnapshot, MotionState};
pub use crypto::{sha256, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, GeoError};
pub use geo::{cell_of, cell_of_point, center_of, haversine_m, CellId, GeoPoint, Resolution};
pub use policy::{
    evaluate, DropAssessment, DropBasis, DropCandidate, DropDecision, DropPolicyConfig,
    RejectReason,
};
pub use trust::{trust_score, TrustInputs, TrustRecord};
pub use types::{BlockHash, ContextDigest};
pub use verification::{verify_chain, ChainIssue, ChainVerification, ChainWalker};
