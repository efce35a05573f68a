//! Error types for the breadcrumb core.

use thiserror::Error;

/// Errors raised by the geospatial quantizer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("resolution {0} outside supported range 1..=12")]
    InvalidResolution(u8),

    #[error("invalid cell identifier: {0:?}")]
    InvalidCell(String),
}

/// Core errors that can occur during block operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("geo error: {0}")]
    Geo(#[from] GeoError),

    #[error("invalid drop policy: {0}")]
    InvalidPolicy(String),

    #[error("malformed block: {0}")]
    MalformedBlock(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}
