//! Geospatial quantization: coordinates to discrete cells and back.
//!
//! Cells are geohashes. A cell's resolution is its length in base-32
//! characters; longer cells are smaller. The default resolution (8) yields
//! cells of roughly 38 m x 19 m, which keeps any point inside a cell within
//! ~25 m of the cell center.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::GeoError;

/// Geohash base-32 alphabet (no `a`, `i`, `l`, `o`).
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Mean Earth radius used for haversine distances, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Quantizer resolution: the number of geohash characters in a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Resolution(u8);

impl Resolution {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 12;

    /// City-block scale.
    pub const DEFAULT: Self = Self(8);

    /// Create a resolution, rejecting values outside `MIN..=MAX`.
    pub fn new(value: u8) -> Result<Self, GeoError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(GeoError::InvalidResolution(value))
        }
    }

    /// Get the raw value.
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for Resolution {
    type Error = GeoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Resolution> for u8 {
    fn from(r: Resolution) -> Self {
        r.0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Create a point. NaN, infinite, or out-of-range values are rejected.
    pub fn new(lat: f64, lon: f64) -> Result<Self, GeoError> {
        if !lat.is_finite() || !lon.is_finite() || !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon)
        {
            return Err(GeoError::InvalidCoordinate { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    /// Great-circle distance to another point, in meters.
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        haversine_m(self, other)
    }

    /// Point reached by moving `north_m` meters north and `east_m` meters east.
    ///
    /// Flat-earth approximation, accurate for offsets of a few kilometers.
    /// The result is clamped to valid ranges.
    pub fn offset_m(&self, north_m: f64, east_m: f64) -> GeoPoint {
        let dlat = (north_m / EARTH_RADIUS_M).to_degrees();
        let dlon = (east_m / (EARTH_RADIUS_M * self.lat.to_radians().cos().max(1e-9))).to_degrees();
        GeoPoint {
            lat: (self.lat + dlat).clamp(-90.0, 90.0),
            lon: (self.lon + dlon).clamp(-180.0, 180.0),
        }
    }
}

/// A quantized location cell (a geohash string).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellId(String);

impl CellId {
    /// Parse a cell identifier, validating alphabet and length.
    pub fn parse(s: &str) -> Result<Self, GeoError> {
        let len = s.len();
        if len < Resolution::MIN as usize || len > Resolution::MAX as usize {
            return Err(GeoError::InvalidCell(s.to_string()));
        }
        if !s.bytes().all(|b| BASE32.contains(&b)) {
            return Err(GeoError::InvalidCell(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The resolution this cell was produced at.
    pub fn resolution(&self) -> Resolution {
        // Length is validated on construction.
        Resolution(self.0.len() as u8)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellId({})", self.0)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CellId {
    type Error = GeoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CellId> for String {
    fn from(c: CellId) -> Self {
        c.0
    }
}

/// Quantize a coordinate into a cell at the given resolution.
pub fn cell_of(lat: f64, lon: f64, resolution: Resolution) -> Result<CellId, GeoError> {
    let point = GeoPoint::new(lat, lon)?;
    Ok(cell_of_point(&point, resolution))
}

/// Quantize an already validated point.
pub fn cell_of_point(point: &GeoPoint, resolution: Resolution) -> CellId {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut out = String::with_capacity(resolution.get() as usize);

    // Bits alternate starting with longitude.
    let mut even = true;
    let mut bit = 0;
    let mut ch = 0usize;

    while out.len() < resolution.get() as usize {
        let (range, value) = if even {
            (&mut lon_range, point.lon)
        } else {
            (&mut lat_range, point.lat)
        };
        let mid = (range.0 + range.1) / 2.0;
        if value >= mid {
            ch = (ch << 1) | 1;
            range.0 = mid;
        } else {
            ch <<= 1;
            range.1 = mid;
        }
        even = !even;

        bit += 1;
        if bit == 5 {
            out.push(BASE32[ch] as char);
            bit = 0;
            ch = 0;
        }
    }

    CellId(out)
}

/// Bounding box of a cell: `(min_lat, min_lon, max_lat, max_lon)`.
pub fn bounds_of(cell: &CellId) -> (f64, f64, f64, f64) {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut even = true;

    for b in cell.0.bytes() {
        // Alphabet is validated on construction.
        let idx = BASE32.iter().position(|&c| c == b).unwrap_or(0);
        for shift in (0..5).rev() {
            let bit = (idx >> shift) & 1;
            let range = if even { &mut lon_range } else { &mut lat_range };
            let mid = (range.0 + range.1) / 2.0;
            if bit == 1 {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even = !even;
        }
    }

    (lat_range.0, lon_range.0, lat_range.1, lon_range.1)
}

/// Approximate center point of a cell.
///
/// Used for distance estimation only; the original coordinate is not
/// recoverable from a cell.
pub fn center_of(cell: &CellId) -> GeoPoint {
    let (min_lat, min_lon, max_lat, max_lon) = bounds_of(cell);
    GeoPoint {
        lat: (min_lat + max_lat) / 2.0,
        lon: (min_lon + max_lon) / 2.0,
    }
}

/// Haversine great-circle distance in meters.
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lon - a.lon).to_radians();

    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}
