//! Proptest generators for property-based testing.

use proptest::prelude::*;

use breadcrumb_core::{GeoPoint, Keypair, MotionSnapshot, Resolution};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Latitude away from the poles, where flat-earth offsets stay sane.
pub fn latitude() -> impl Strategy<Value = f64> {
    -80.0f64..80.0
}

pub fn longitude() -> impl Strategy<Value = f64> {
    -179.0f64..179.0
}

/// Generate a valid point.
pub fn geo_point() -> impl Strategy<Value = GeoPoint> {
    (latitude(), longitude()).prop_map(|(lat, lon)| GeoPoint::new(lat, lon).unwrap())
}

/// Generate a supported quantizer resolution.
pub fn resolution() -> impl Strategy<Value = Resolution> {
    (Resolution::MIN..=Resolution::MAX).prop_map(|r| Resolution::new(r).unwrap())
}

/// Generate an accelerometer/gyroscope snapshot.
pub fn motion_snapshot() -> impl Strategy<Value = MotionSnapshot> {
    (
        prop::array::uniform3(-20.0f64..20.0),
        prop::array::uniform3(-5.0f64..5.0),
    )
        .prop_map(|(accel, gyro)| MotionSnapshot::new(accel, gyro))
}

/// One leg of a generated trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackStep {
    pub north_m: f64,
    pub east_m: f64,
    pub after_secs: i64,
}

/// A single step: anything from standing still to a few hundred meters,
/// between one minute and an hour after the previous fix.
pub fn track_step() -> impl Strategy<Value = TrackStep> {
    (-400.0f64..400.0, -400.0f64..400.0, 60i64..3_600).prop_map(
        |(north_m, east_m, after_secs)| TrackStep {
            north_m,
            east_m,
            after_secs,
        },
    )
}

/// A trajectory of up to `max_len` steps.
pub fn track(max_len: usize) -> impl Strategy<Value = Vec<TrackStep>> {
    prop::collection::vec(track_step(), 0..=max_len)
}
