//! Whole-chain integrity verification.
//!
//! Verification never fails fast: every problem found is reported so that
//! partial corruption can be diagnosed. The result is data, not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::block::ChainBlock;
use crate::crypto::Ed25519PublicKey;
use crate::types::BlockHash;

/// A single integrity problem, tagged with the offending block index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainIssue {
    /// The index does not follow its predecessor by exactly one.
    IndexSequence { expected: u64, found: u64 },
    /// Genesis carries a previous hash.
    GenesisHasPrevious { index: u64 },
    /// A non-genesis block has no previous hash.
    MissingPrevious { index: u64 },
    /// `previous_hash` does not equal the preceding block's hash.
    BrokenLink { index: u64 },
    /// Stored hash differs from the hash recomputed over content + signature.
    HashMismatch { index: u64 },
    /// Signature does not verify against the block's identity.
    BadSignature { index: u64 },
    /// Identity differs from the genesis identity.
    IdentityChanged { index: u64 },
    /// Timestamp earlier than the preceding block's.
    TimestampRegression { index: u64 },
    /// The stored record could not be decoded into a block at all.
    Undecodable { index: u64, reason: String },
}

impl ChainIssue {
    /// The block index this issue refers to.
    pub fn index(&self) -> u64 {
        match self {
            Self::IndexSequence { found, .. } => *found,
            Self::GenesisHasPrevious { index }
            | Self::MissingPrevious { index }
            | Self::BrokenLink { index }
            | Self::HashMismatch { index }
            | Self::BadSignature { index }
            | Self::IdentityChanged { index }
            | Self::TimestampRegression { index }
            | Self::Undecodable { index, .. } => *index,
        }
    }
}

impl fmt::Display for ChainIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexSequence { expected, found } => {
                write!(f, "block {}: index gap (expected {})", found, expected)
            }
            Self::GenesisHasPrevious { index } => {
                write!(f, "block {}: genesis has a previous hash", index)
            }
            Self::MissingPrevious { index } => {
                write!(f, "block {}: missing previous hash", index)
            }
            Self::BrokenLink { index } => {
                write!(f, "block {}: previous hash does not match block {}", index, index.saturating_sub(1))
            }
            Self::HashMismatch { index } => write!(f, "block {}: hash mismatch", index),
            Self::BadSignature { index } => write!(f, "block {}: invalid signature", index),
            Self::IdentityChanged { index } => {
                write!(f, "block {}: identity differs from genesis", index)
            }
            Self::TimestampRegression { index } => {
                write!(f, "block {}: timestamp earlier than previous block", index)
            }
            Self::Undecodable { index, reason } => {
                write!(f, "block {}: undecodable ({})", index, reason)
            }
        }
    }
}

/// Result of walking a chain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub blocks_checked: u64,
    pub issues: Vec<ChainIssue>,
}

impl ChainVerification {
    /// Human-readable issue list.
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

/// What the walk knows about the record before the current one.
#[derive(Debug, Default)]
enum Tip {
    #[default]
    Start,
    Block { index: u64, hash: BlockHash },
    Undecodable { index: u64 },
}

/// Verifies a chain one record at a time, in ascending index order.
///
/// Storage backends feed it every stored record, including ones that no
/// longer decode; those become [`ChainIssue::Undecodable`] and the walk
/// carries on. The link of the block right after an undecodable record
/// cannot be checked and is skipped.
#[derive(Debug, Default)]
pub struct ChainWalker {
    issues: Vec<ChainIssue>,
    checked: u64,
    tip: Tip,
    genesis_identity: Option<Ed25519PublicKey>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl ChainWalker {
    pub fn new() -> Self {
        Self::default()
    }

    fn expected_index(&self) -> u64 {
        match self.tip {
            Tip::Start => 0,
            Tip::Block { index, .. } | Tip::Undecodable { index } => index + 1,
        }
    }

    fn check_sequence(&mut self, index: u64) {
        let expected = self.expected_index();
        if index != expected {
            self.issues.push(ChainIssue::IndexSequence {
                expected,
                found: index,
            });
        }
    }

    /// Check one decoded block against everything seen so far.
    pub fn push(&mut self, block: &ChainBlock) {
        let index = block.index();
        self.check_sequence(index);

        let link = match (&self.tip, block.previous_hash()) {
            (_, previous) if block.is_genesis() => previous
                .is_some()
                .then_some(ChainIssue::GenesisHasPrevious { index }),
            (_, None) => Some(ChainIssue::MissingPrevious { index }),
            (Tip::Start, Some(_)) => Some(ChainIssue::BrokenLink { index }),
            (Tip::Block { hash, .. }, Some(previous)) => {
                (previous != hash).then_some(ChainIssue::BrokenLink { index })
            }
            (Tip::Undecodable { .. }, Some(_)) => None,
        };
        self.issues.extend(link);

        if !block.hash_matches() {
            self.issues.push(ChainIssue::HashMismatch { index });
        }

        if block.verify_signature().is_err() {
            self.issues.push(ChainIssue::BadSignature { index });
        }

        let genesis = *self.genesis_identity.get_or_insert(*block.identity());
        if &genesis != block.identity() {
            self.issues.push(ChainIssue::IdentityChanged { index });
        }

        if let Some(last) = self.last_timestamp {
            if block.timestamp() < last {
                self.issues.push(ChainIssue::TimestampRegression { index });
            }
        }

        self.last_timestamp = Some(block.timestamp());
        self.tip = Tip::Block {
            index,
            hash: *block.block_hash(),
        };
        self.checked += 1;
    }

    /// Record a stored entry at `index` that could not be decoded.
    pub fn push_undecodable(&mut self, index: u64, reason: impl Into<String>) {
        self.check_sequence(index);
        self.issues.push(ChainIssue::Undecodable {
            index,
            reason: reason.into(),
        });
        self.tip = Tip::Undecodable { index };
        self.checked += 1;
    }

    pub fn finish(self) -> ChainVerification {
        ChainVerification {
            valid: self.issues.is_empty(),
            blocks_checked: self.checked,
            issues: self.issues,
        }
    }
}

/// Verify a chain given in ascending index order.
///
/// Reports index gaps, broken links, hash mismatches, bad signatures,
/// identity changes, and timestamp regressions. An empty chain is valid.
pub fn verify_chain(blocks: &[ChainBlock]) -> ChainVerification {
    let mut walker = ChainWalker::new();
    for block in blocks {
        walker.push(block);
    }
    walker.finish()
}
