//! Fuzzy sensor context: motion snapshots and the context digest.
//!
//! Raw sensor readings never enter the ledger. Only a digest binding the
//! cell, the timestamp and the (optional) motion vector is recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::canonical::format_timestamp;
use crate::crypto::sha256;
use crate::geo::CellId;
use crate::types::ContextDigest;

/// Standard gravity, m/s^2.
const GRAVITY: f64 = 9.80665;

/// Accelerometer deviation from gravity below which the device is at rest.
const STATIONARY_ACCEL: f64 = 0.4;

/// Rotation rate (rad/s) below which the device is at rest.
const STATIONARY_GYRO: f64 = 0.15;

/// Accelerometer deviation above which movement looks like walking rather
/// than a smooth vehicle ride.
const WALKING_ACCEL: f64 = 1.5;

/// A single accelerometer + gyroscope reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSnapshot {
    /// Acceleration in m/s^2 (x, y, z), gravity included.
    pub accel: [f64; 3],
    /// Angular velocity in rad/s (x, y, z).
    pub gyro: [f64; 3],
}

/// Coarse device motion state, recorded in block meta flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    Stationary,
    Walking,
    Vehicle,
}

impl MotionState {
    /// Stable wire name, as used in the canonical pre-image.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stationary => "stationary",
            Self::Walking => "walking",
            Self::Vehicle => "vehicle",
        }
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MotionSnapshot {
    pub fn new(accel: [f64; 3], gyro: [f64; 3]) -> Self {
        Self { accel, gyro }
    }

    fn magnitude(v: &[f64; 3]) -> f64 {
        (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
    }

    /// Classify the snapshot into a coarse motion state.
    ///
    /// A single snapshot cannot reliably tell walking from driving; this is
    /// a hint recorded for later analysis, not used by the drop policy.
    pub fn classify(&self) -> MotionState {
        let accel_dev = (Self::magnitude(&self.accel) - GRAVITY).abs();
        let rotation = Self::magnitude(&self.gyro);

        if accel_dev < STATIONARY_ACCEL && rotation < STATIONARY_GYRO {
            MotionState::Stationary
        } else if accel_dev >= WALKING_ACCEL {
            MotionState::Walking
        } else {
            MotionState::Vehicle
        }
    }

    /// Fixed-precision text form used in the context digest.
    fn digest_text(&self) -> String {
        let [ax, ay, az] = self.accel;
        let [gx, gy, gz] = self.gyro;
        format!(
            "{:.3},{:.3},{:.3},{:.3},{:.3},{:.3}",
            ax, ay, az, gx, gy, gz
        )
    }
}

/// Compute the context digest for a block.
///
/// `SHA-256("<cell>|<timestamp>|<motion>")`, where motion is `none` when no
/// snapshot is available.
pub fn context_digest(
    cell: &CellId,
    timestamp: &DateTime<Utc>,
    motion: Option<&MotionSnapshot>,
) -> ContextDigest {
    let motion_text = motion
        .map(MotionSnapshot::digest_text)
        .unwrap_or_else(|| "none".to_string());
    let text = format!("{}|{}|{}", cell, format_timestamp(timestamp), motion_text);
    ContextDigest(sha256(&[text.as_bytes()]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_classify_at_rest() {
        let s = MotionSnapshot::new([0.0, 0.0, 9.81], [0.01, 0.0, 0.02]);
        assert_eq!(s.classify(), MotionState::Stationary);
    }

    #[test]
    fn test_classify_walking() {
        let s = MotionSnapshot::new([2.5, 1.0, 12.0], [0.8, 0.3, 0.1]);
        assert_eq!(s.classify(), MotionState::Walking);
    }

    #[test]
    fn test_classify_vehicle() {
        let s = MotionSnapshot::new([0.5, 0.2, 10.1], [0.05, 0.3, 0.0]);
        assert_eq!(s.classify(), MotionState::Vehicle);
    }

    #[test]
    fn test_digest_binds_all_inputs() {
        let cell = CellId::parse("u4pruydq").unwrap();
        let other = CellId::parse("u4pruydr").unwrap();
        let motion = MotionSnapshot::new([0.0, 0.0, 9.81], [0.0; 3]);

        let base = context_digest(&cell, &ts(), None);
        assert_eq!(base, context_digest(&cell, &ts(), None));
        assert_ne!(base, context_digest(&other, &ts(), None));
        assert_ne!(base, context_digest(&cell, &(ts() + chrono::Duration::seconds(1)), None));
        assert_ne!(base, context_digest(&cell, &ts(), Some(&motion)));
    }

    #[test]
    fn test_digest_known_value() {
        let cell = CellId::parse("u4pruydq").unwrap();
        let expected = sha256(&[b"u4pruydq|2025-01-15T12:00:00.000Z|none".as_slice()]);
        assert_eq!(context_digest(&cell, &ts(), None).0, expected);
    }
}
