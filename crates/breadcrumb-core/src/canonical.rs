//! Canonical pre-image encoding for chain blocks.
//!
//! The pre-image is compact JSON with these rules:
//! - Object keys sorted by byte-wise comparison, at every nesting level
//! - No insignificant whitespace
//! - Integers in plain decimal, no floats anywhere
//! - Timestamps as RFC 3339 UTC with millisecond precision and a `Z` suffix
//! - Optional meta fields omitted when absent, never `null`
//! - `prev_hash` is the literal `"genesis"` for index 0
//!
//! Top-level key order is therefore:
//! `context, identity, index, loc_cell, loc_res, meta, prev_hash, timestamp`.
//!
//! **This encoding is part of the signed payload.** Changing any rule here
//! invalidates every existing signature.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::block::{BlockContent, MetaFlags};
use crate::crypto::{sha256, Ed25519Signature};
use crate::types::BlockHash;

/// Value of `prev_hash` in the genesis pre-image.
pub const GENESIS_SENTINEL: &str = "genesis";

/// Separator between pre-image and signature in the block hash input.
pub const HASH_SEPARATOR: &[u8] = b":";

/// Pre-image key names.
mod keys {
    pub const CONTEXT: &str = "context";
    pub const IDENTITY: &str = "identity";
    pub const INDEX: &str = "index";
    pub const LOC_CELL: &str = "loc_cell";
    pub const LOC_RES: &str = "loc_res";
    pub const META: &str = "meta";
    pub const PREV_HASH: &str = "prev_hash";
    pub const TIMESTAMP: &str = "timestamp";

    pub mod meta {
        pub const ACCURACY_M: &str = "accuracy_m";
        pub const BASIS: &str = "basis";
        pub const MANUAL: &str = "manual";
        pub const MOTION: &str = "motion";
    }
}

/// Format a timestamp the way it appears in pre-images and digests.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Encode block content to canonical pre-image bytes (the signed message).
pub fn canonical_preimage(content: &BlockContent) -> Vec<u8> {
    let prev = match &content.previous_hash {
        Some(h) => h.to_hex(),
        None => GENESIS_SENTINEL.to_string(),
    };

    let mut obj = CanonicalObject::new();
    obj.text(keys::CONTEXT, &content.context_digest.to_hex());
    obj.text(keys::IDENTITY, &content.identity.to_hex());
    obj.uint(keys::INDEX, content.index);
    obj.text(keys::LOC_CELL, content.location_cell.as_str());
    obj.uint(keys::LOC_RES, u64::from(content.location_resolution.get()));
    obj.raw(keys::META, meta_object(&content.meta));
    obj.text(keys::PREV_HASH, &prev);
    obj.text(keys::TIMESTAMP, &format_timestamp(&content.timestamp));
    obj.finish().into_bytes()
}

/// Compute the block hash: `SHA-256(preimage || ":" || hex(signature))`.
pub fn block_hash(preimage: &[u8], signature: &Ed25519Signature) -> BlockHash {
    let sig_hex = signature.to_hex();
    BlockHash(sha256(&[preimage, HASH_SEPARATOR, sig_hex.as_bytes()]))
}

fn meta_object(meta: &MetaFlags) -> String {
    let mut obj = CanonicalObject::new();
    if let Some(acc) = meta.accuracy_m {
        obj.uint(keys::meta::ACCURACY_M, u64::from(acc));
    }
    obj.text(keys::meta::BASIS, meta.basis.as_str());
    obj.raw(keys::meta::MANUAL, meta.manual.to_string());
    if let Some(motion) = meta.motion {
        obj.text(keys::meta::MOTION, motion.as_str());
    }
    obj.finish()
}

/// A JSON object whose entries are emitted in sorted key order.
struct CanonicalObject {
    entries: Vec<(&'static str, String)>,
}

impl CanonicalObject {
    fn new() -> Self {
        Self {
            entries: Vec::with_capacity(8),
        }
    }

    fn text(&mut self, key: &'static str, value: &str) {
        self.entries.push((key, quote(value)));
    }

    fn uint(&mut self, key: &'static str, value: u64) {
        self.entries.push((key, value.to_string()));
    }

    /// Insert an already-encoded JSON value.
    fn raw(&mut self, key: &'static str, encoded: String) {
        self.entries.push((key, encoded));
    }

    fn finish(mut self) -> String {
        self.entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        let mut out = String::from("{");
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&quote(key));
            out.push(':');
            out.push_str(value);
        }
        out.push('}');
        out
    }
}

/// JSON string literal with standard escaping.
fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
