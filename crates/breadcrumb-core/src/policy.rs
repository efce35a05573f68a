//! Drop policy: decides whether a candidate breadcrumb may extend the chain.
//!
//! Evaluation order:
//! 1. No fix at all → `NoFix`.
//! 2. No previous block → accept as genesis.
//! 3. Candidate at least `min_distance_m` from the previous cell center →
//!    movement; rejected as `ImplausibleSpeed` if the implied speed exceeds
//!    `max_plausible_speed_kmh`.
//! 4. Otherwise the candidate is stationary: rejected as
//!    `SameLocationLimitReached` once its cell holds
//!    `max_same_location_drops` accepted blocks, then as `TooSoon` inside
//!    `min_time_between_drops_secs`, else accepted via the time fallback.
//!
//! A candidate older than the previous block is never accepted: far away it
//! has infinite speed, nearby it is `TooSoon` even with no minimum interval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::block::ChainBlock;
use crate::error::CoreError;
use crate::geo::{cell_of_point, center_of, CellId, GeoPoint, Resolution};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Why a candidate was accepted. Recorded in the block's meta flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropBasis {
    Genesis,
    Movement,
    TimeFallback,
}

impl DropBasis {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Genesis => "genesis",
            Self::Movement => "movement",
            Self::TimeFallback => "time_fallback",
        }
    }
}

impl fmt::Display for DropBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a candidate was rejected.
///
/// These are expected outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// No location fix could be obtained (including timeouts).
    NoFix,
    /// The location provider refused access.
    PermissionDenied,
    /// The provider returned NaN or out-of-range coordinates.
    InvalidCoordinate,
    /// The candidate's cell already holds the maximum number of drops.
    SameLocationLimitReached,
    /// Stationary candidate inside the minimum interval.
    TooSoon,
    /// Displacement implies an impossible travel speed.
    ImplausibleSpeed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoFix => "no location fix",
            Self::PermissionDenied => "location permission denied",
            Self::InvalidCoordinate => "invalid coordinate",
            Self::SameLocationLimitReached => "same-location limit reached",
            Self::TooSoon => "too soon since last drop",
            Self::ImplausibleSpeed => "implausible speed",
        };
        f.write_str(s)
    }
}

/// Thresholds for the drop policy. Supplied by the caller.
///
/// Missing fields deserialize to the production values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropPolicyConfig {
    /// Minimum interval between stationary drops, in seconds.
    pub min_time_between_drops_secs: u64,
    /// Minimum displacement from the previous cell center that counts as movement.
    pub min_distance_m: f64,
    /// Maximum believable travel speed.
    pub max_plausible_speed_kmh: f64,
    /// Maximum accepted drops at one cell before location-based rejection.
    pub max_same_location_drops: u64,
}

impl DropPolicyConfig {
    /// Short intervals for tests and demos.
    pub fn testing() -> Self {
        Self {
            min_time_between_drops_secs: 180,
            min_distance_m: 50.0,
            max_plausible_speed_kmh: 200.0,
            max_same_location_drops: 10,
        }
    }

    pub fn production() -> Self {
        Self {
            min_time_between_drops_secs: 900,
            min_distance_m: 100.0,
            max_plausible_speed_kmh: 250.0,
            max_same_location_drops: 48,
        }
    }

    /// Reject thresholds that would make the policy meaningless.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.min_distance_m.is_finite() && self.min_distance_m > 0.0) {
            return Err(CoreError::InvalidPolicy(format!(
                "min_distance_m must be positive, got {}",
                self.min_distance_m
            )));
        }
        if !(self.max_plausible_speed_kmh.is_finite() && self.max_plausible_speed_kmh > 0.0) {
            return Err(CoreError::InvalidPolicy(format!(
                "max_plausible_speed_kmh must be positive, got {}",
                self.max_plausible_speed_kmh
            )));
        }
        if self.max_same_location_drops == 0 {
            return Err(CoreError::InvalidPolicy(
                "max_same_location_drops must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DropPolicyConfig {
    fn default() -> Self {
        Self::production()
    }
}

/// A located, timestamped candidate for the next block.
#[derive(Debug, Clone, PartialEq)]
pub struct DropCandidate {
    pub point: GeoPoint,
    pub cell: CellId,
    pub timestamp: DateTime<Utc>,
}

impl DropCandidate {
    /// Quantize `point` at `resolution` and pair it with `timestamp`.
    pub fn new(point: GeoPoint, timestamp: DateTime<Utc>, resolution: Resolution) -> Self {
        Self {
            cell: cell_of_point(&point, resolution),
            point,
            timestamp,
        }
    }
}

/// Outcome of the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropDecision {
    Accept(DropBasis),
    Reject(RejectReason),
}

impl DropDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept(_))
    }
}

/// A decision plus the measurements it was based on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropAssessment {
    pub decision: DropDecision,
    pub distance_m: Option<f64>,
    pub elapsed_secs: Option<f64>,
    pub speed_kmh: Option<f64>,
}

impl DropAssessment {
    fn bare(decision: DropDecision) -> Self {
        Self {
            decision,
            distance_m: None,
            elapsed_secs: None,
            speed_kmh: None,
        }
    }
}

/// Evaluate a candidate against the previous block.
///
/// `accepted_at_cell` is the number of blocks already accepted at the
/// candidate's cell, read from the durable unique-cell index.
pub fn evaluate(
    candidate: Option<&DropCandidate>,
    previous: Option<&ChainBlock>,
    accepted_at_cell: u64,
    config: &DropPolicyConfig,
) -> DropAssessment {
    let Some(candidate) = candidate else {
        return DropAssessment::bare(DropDecision::Reject(RejectReason::NoFix));
    };

    let Some(previous) = previous else {
        return DropAssessment::bare(DropDecision::Accept(DropBasis::Genesis));
    };

    let distance_m = candidate.point.distance_m(&center_of(previous.cell()));
    // Negative when the clock went backwards.
    let elapsed_ms = (candidate.timestamp - previous.timestamp()).num_milliseconds();
    let elapsed_secs = elapsed_ms.max(0) as f64 / 1000.0;

    let mut assessment = DropAssessment {
        decision: DropDecision::Accept(DropBasis::Movement),
        distance_m: Some(distance_m),
        elapsed_secs: Some(elapsed_secs),
        speed_kmh: None,
    };

    if distance_m >= config.min_distance_m {
        let hours = elapsed_ms as f64 / MS_PER_HOUR;
        let speed_kmh = if hours > 0.0 {
            (distance_m / 1000.0) / hours
        } else {
            f64::INFINITY
        };
        assessment.speed_kmh = Some(speed_kmh);
        if speed_kmh > config.max_plausible_speed_kmh {
            assessment.decision = DropDecision::Reject(RejectReason::ImplausibleSpeed);
        }
        return assessment;
    }

    assessment.decision = if accepted_at_cell >= config.max_same_location_drops {
        DropDecision::Reject(RejectReason::SameLocationLimitReached)
    } else if i128::from(elapsed_ms) < i128::from(config.min_time_between_drops_secs) * 1000 {
        DropDecision::Reject(RejectReason::TooSoon)
    } else {
        DropDecision::Accept(DropBasis::TimeFallback)
    };
    assessment
}
