//! Sensor collaborators: where location fixes and motion snapshots come from.
//!
//! The platform layer implements these traits. The engine never retries;
//! a failed or slow fix becomes a `NoFix` rejection for that drop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use breadcrumb_core::{MotionSnapshot, RejectReason};

/// A single location reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub lat: f64,
    pub lon: f64,
    /// Horizontal accuracy in meters, if the provider reports one.
    pub accuracy_m: Option<f64>,
    /// When the fix was taken. Becomes the block timestamp.
    pub timestamp: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(lat: f64, lon: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            lat,
            lon,
            accuracy_m: None,
            timestamp,
        }
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }
}

/// Why a location fix could not be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FixError {
    #[error("location unavailable")]
    Unavailable,

    #[error("location permission denied")]
    PermissionDenied,

    #[error("location fix timed out")]
    Timeout,
}

impl From<FixError> for RejectReason {
    fn from(e: FixError) -> Self {
        match e {
            FixError::PermissionDenied => RejectReason::PermissionDenied,
            FixError::Unavailable | FixError::Timeout => RejectReason::NoFix,
        }
    }
}

/// Supplies location fixes.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Acquire a fix. May be slow; the engine bounds it with a timeout.
    async fn current_fix(&self) -> Result<LocationFix, FixError>;
}

/// Supplies accelerometer/gyroscope snapshots. Optional.
#[async_trait]
pub trait MotionProvider: Send + Sync {
    /// The most recent snapshot, or `None` if sensors are unavailable.
    async fn snapshot(&self) -> Option<MotionSnapshot>;
}
