//! Trust score: a bounded summary of a ledger's history.
//!
//! ```text
//! score = 100 * (0.4 * min(count / 200, 1)
//!              + 0.3 * min(unique_cells / 50, 1)
//!              + 0.2 * min(days_since_first / 365, 1))
//!       + (10 if chain_valid)
//! ```
//!
//! clamped to `[0, 100]`. Always recomputed from scratch, never updated
//! incrementally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const WEIGHT_COUNT: f64 = 0.4;
const WEIGHT_UNIQUE_CELLS: f64 = 0.3;
const WEIGHT_AGE: f64 = 0.2;

/// Breadcrumbs needed to saturate the count component.
const TARGET_COUNT: f64 = 200.0;
/// Distinct cells needed to saturate the diversity component.
const TARGET_UNIQUE_CELLS: f64 = 50.0;
/// History length needed to saturate the age component.
const TARGET_DAYS: f64 = 365.0;

/// Bonus for a chain that passes verification.
const VALID_CHAIN_BONUS: f64 = 10.0;

pub const MAX_SCORE: f64 = 100.0;

/// Inputs to the trust score, all read from ledger statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustInputs {
    pub breadcrumb_count: u64,
    pub unique_cell_count: u64,
    pub days_since_first: f64,
    pub chain_valid: bool,
}

impl TrustInputs {
    /// Fractional days between the first breadcrumb and `now`.
    ///
    /// Zero for an empty ledger or a first breadcrumb in the future.
    pub fn days_between(first_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        match first_at {
            Some(first) => ((now - first).num_milliseconds().max(0) as f64) / 86_400_000.0,
            None => 0.0,
        }
    }
}

fn saturate(value: f64, target: f64) -> f64 {
    if value.is_finite() {
        (value / target).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Compute the trust score in `[0, 100]`.
pub fn trust_score(inputs: &TrustInputs) -> f64 {
    let weighted = WEIGHT_COUNT * saturate(inputs.breadcrumb_count as f64, TARGET_COUNT)
        + WEIGHT_UNIQUE_CELLS * saturate(inputs.unique_cell_count as f64, TARGET_UNIQUE_CELLS)
        + WEIGHT_AGE * saturate(inputs.days_since_first, TARGET_DAYS);

    let bonus = if inputs.chain_valid {
        VALID_CHAIN_BONUS
    } else {
        0.0
    };

    (MAX_SCORE * weighted + bonus).clamp(0.0, MAX_SCORE)
}

/// A persisted trust score. Not part of the hash chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub score: f64,
    pub breadcrumb_count: u64,
    pub unique_cells: u64,
    pub computed_at: DateTime<Utc>,
}
