//! Chain block: the immutable unit of the breadcrumb ledger.
//!
//! A block is signed content plus a hash over content and signature. Once
//! built, it cannot be edited; the ledger only ever grows by new blocks.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::{block_hash, canonical_preimage};
use crate::context::{context_digest, MotionSnapshot, MotionState};
use crate::crypto::{Ed25519PublicKey, Ed25519Signature, Keypair};
use crate::error::CoreError;
use crate::geo::{CellId, Resolution};
use crate::policy::DropBasis;
use crate::types::{BlockHash, ContextDigest};

/// Auxiliary attributes bound into the signed pre-image.
///
/// A closed set of typed fields keeps the pre-image stable across writer
/// versions. Absent optionals are omitted from the encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFlags {
    /// GPS horizontal accuracy, rounded to whole meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<u32>,
    /// Which policy path accepted the drop.
    pub basis: DropBasis,
    /// True when the user triggered the drop by hand.
    pub manual: bool,
    /// Coarse motion state at drop time, if a snapshot was available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion: Option<MotionState>,
}

impl MetaFlags {
    /// Automatic drop with no sensor extras.
    pub fn new(basis: DropBasis) -> Self {
        Self {
            accuracy_m: None,
            basis,
            manual: false,
            motion: None,
        }
    }

    /// Convert a raw accuracy reading (meters) into the stored form.
    pub fn accuracy_from_meters(accuracy: f64) -> Option<u32> {
        if accuracy.is_finite() && accuracy >= 0.0 {
            Some(accuracy.round().min(u32::MAX as f64) as u32)
        } else {
            None
        }
    }
}

/// Everything covered by a block's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContent {
    /// Position in the chain, starting at 0.
    pub index: u64,

    /// The signer's public key. Constant across a chain.
    pub identity: Ed25519PublicKey,

    /// Creation time, millisecond precision.
    pub timestamp: DateTime<Utc>,

    /// Quantized location.
    pub location_cell: CellId,

    /// Resolution the cell was quantized at.
    pub location_resolution: Resolution,

    /// Digest of cell, timestamp and motion snapshot.
    pub context_digest: ContextDigest,

    /// Hash of the preceding block (None for genesis).
    pub previous_hash: Option<BlockHash>,

    /// Typed auxiliary flags.
    pub meta: MetaFlags,
}

/// A signed, hash-linked block.
///
/// Fields are private: the hash is computed once at construction and
/// cannot be set independently of the content it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    content: BlockContent,
    signature: Ed25519Signature,
    block_hash: BlockHash,
}

impl ChainBlock {
    /// Sign content and compute its hash.
    pub fn sign(content: BlockContent, keypair: &Keypair) -> Self {
        let preimage = canonical_preimage(&content);
        let signature = keypair.sign(&preimage);
        let block_hash = block_hash(&preimage, &signature);
        Self {
            content,
            signature,
            block_hash,
        }
    }

    /// Reassemble a block from persisted parts.
    ///
    /// The stored hash is kept as-is; use [`ChainBlock::hash_matches`] or the
    /// chain verifier to detect tampering.
    pub fn from_stored(
        content: BlockContent,
        signature: Ed25519Signature,
        block_hash: BlockHash,
    ) -> Self {
        Self {
            content,
            signature,
            block_hash,
        }
    }

    pub fn content(&self) -> &BlockContent {
        &self.content
    }

    pub fn index(&self) -> u64 {
        self.content.index
    }

    pub fn identity(&self) -> &Ed25519PublicKey {
        &self.content.identity
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.content.timestamp
    }

    pub fn cell(&self) -> &CellId {
        &self.content.location_cell
    }

    pub fn previous_hash(&self) -> Option<&BlockHash> {
        self.content.previous_hash.as_ref()
    }

    pub fn meta(&self) -> &MetaFlags {
        &self.content.meta
    }

    pub fn signature(&self) -> &Ed25519Signature {
        &self.signature
    }

    /// The stored block hash.
    pub fn block_hash(&self) -> &BlockHash {
        &self.block_hash
    }

    /// Check if this is the first block of a chain.
    pub fn is_genesis(&self) -> bool {
        self.content.index == 0
    }

    /// The canonical pre-image (the signed message).
    pub fn preimage(&self) -> Vec<u8> {
        canonical_preimage(&self.content)
    }

    /// Recompute the hash from content and signature.
    pub fn compute_hash(&self) -> BlockHash {
        block_hash(&self.preimage(), &self.signature)
    }

    /// Check that the stored hash matches the recomputed one.
    pub fn hash_matches(&self) -> bool {
        self.compute_hash() == self.block_hash
    }

    /// Verify the signature against the block's own identity.
    pub fn verify_signature(&self) -> Result<(), CoreError> {
        self.content
            .identity
            .verify(&self.preimage(), &self.signature)
    }

    /// Check the link to the preceding block.
    ///
    /// Genesis must have no previous hash. Any other block must reference
    /// exactly `previous.block_hash()`; with no previous block it is invalid.
    pub fn verify_chain_link(&self, previous: Option<&ChainBlock>) -> bool {
        if self.is_genesis() {
            return self.content.previous_hash.is_none();
        }
        match (previous, &self.content.previous_hash) {
            (Some(prev), Some(hash)) => *hash == prev.block_hash,
            _ => false,
        }
    }
}

/// Builder for creating blocks.
pub struct BlockBuilder {
    index: u64,
    cell: CellId,
    previous_hash: Option<BlockHash>,
    timestamp: DateTime<Utc>,
    motion: Option<MotionSnapshot>,
    meta: MetaFlags,
}

impl BlockBuilder {
    /// Start building the first block of a chain.
    pub fn genesis(cell: CellId) -> Self {
        Self {
            index: 0,
            cell,
            previous_hash: None,
            timestamp: Utc::now(),
            motion: None,
            meta: MetaFlags::new(DropBasis::Genesis),
        }
    }

    /// Start building the block that follows `previous`.
    pub fn after(previous: &ChainBlock, cell: CellId) -> Self {
        Self {
            index: previous.index() + 1,
            cell,
            previous_hash: Some(previous.block_hash),
            timestamp: Utc::now(),
            motion: None,
            meta: MetaFlags::new(DropBasis::Movement),
        }
    }

    /// Start from the current chain tip, or genesis if there is none.
    pub fn next(previous: Option<&ChainBlock>, cell: CellId) -> Self {
        match previous {
            Some(prev) => Self::after(prev, cell),
            None => Self::genesis(cell),
        }
    }

    /// Set the timestamp. Sub-millisecond precision is dropped at signing.
    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }

    /// Attach a motion snapshot (digested, never stored raw).
    pub fn motion(mut self, snapshot: MotionSnapshot) -> Self {
        self.motion = Some(snapshot);
        self
    }

    /// Set the meta flags.
    pub fn meta(mut self, meta: MetaFlags) -> Self {
        self.meta = meta;
        self
    }

    /// Build and sign the block.
    pub fn sign(self, keypair: &Keypair) -> ChainBlock {
        let timestamp = self.timestamp.trunc_subsecs(3);
        let context = context_digest(&self.cell, &timestamp, self.motion.as_ref());

        let mut meta = self.meta;
        if meta.motion.is_none() {
            meta.motion = self.motion.as_ref().map(MotionSnapshot::classify);
        }

        let content = BlockContent {
            index: self.index,
            identity: keypair.public_key(),
            timestamp,
            location_resolution: self.cell.resolution(),
            location_cell: self.cell,
            context_digest: context,
            previous_hash: self.previous_hash,
            meta,
        };

        ChainBlock::sign(content, keypair)
    }
}
