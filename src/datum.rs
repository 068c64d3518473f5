//! WGS84 geodetic <-> ECEF cartesian conversion.
//!
//! ECEF coordinates are the Euclidean embedding the kd-tree indexes. Geodetic
//! positions use degrees for latitude/longitude and meters for altitude.

use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis in meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 first eccentricity squared.
pub const WGS84_E2: f64 = 6.694_379_990_141_317e-3;

/// Mean earth radius used to turn long ECEF chords into arc lengths.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Points closer than this to the geocenter have no meaningful geodetic
/// position; `ecef_to_wgs84` returns [`GeoPos::DEGENERATE`] for them.
pub const MIN_GEODETIC_RADIUS: f64 = 100_000.0;

/// Altitude reported for degenerate ECEF inputs.
pub const DEGENERATE_ALTITUDE: f64 = -1.0e7;

/// Geodetic position (degrees, degrees, meters above the ellipsoid).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPos {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl GeoPos {
    pub const DEGENERATE: GeoPos = GeoPos {
        lat: 0.0,
        lon: 0.0,
        alt: DEGENERATE_ALTITUDE,
    };

    pub const fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }

    pub fn to_ecef(&self) -> Ecef {
        wgs84_to_ecef(self.lat, self.lon, self.alt)
    }

    pub fn is_degenerate(&self) -> bool {
        self.alt == DEGENERATE_ALTITUDE
    }
}

/// `geo` points carry longitude in `x` and latitude in `y`.
impl From<geo::Point> for GeoPos {
    fn from(p: geo::Point) -> Self {
        GeoPos::new(p.y(), p.x(), 0.0)
    }
}

impl From<GeoPos> for geo::Point {
    fn from(pos: GeoPos) -> Self {
        geo::Point::new(pos.lon, pos.lat)
    }
}

/// Earth-centered, earth-fixed cartesian coordinates in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Ecef {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Ecef {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Coordinate along kd-tree axis `axis` (0 = x, 1 = y, 2 = z).
    #[inline]
    pub fn axis(&self, axis: usize) -> f64 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    #[inline]
    pub fn set_axis(&mut self, axis: usize, v: f64) {
        match axis {
            0 => self.x = v,
            1 => self.y = v,
            _ => self.z = v,
        }
    }

    #[inline]
    pub fn distance_squared(&self, other: &Ecef) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    #[inline]
    pub fn distance(&self, other: &Ecef) -> f64 {
        self.distance_squared(other).sqrt()
    }

    pub fn to_wgs84(&self) -> GeoPos {
        ecef_to_wgs84(self.x, self.y, self.z)
    }
}

/// Closed-form WGS84 to ECEF conversion.
pub fn wgs84_to_ecef(lat_deg: f64, lon_deg: f64, alt: f64) -> Ecef {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();

    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();

    Ecef {
        x: (n + alt) * cos_lat * cos_lon,
        y: (n + alt) * cos_lat * sin_lon,
        z: (n * (1.0 - WGS84_E2) + alt) * sin_lat,
    }
}

/// Non-iterative ECEF to WGS84 conversion after Olson (1996).
///
/// Inputs within [`MIN_GEODETIC_RADIUS`] of the geocenter (and non-finite
/// inputs) yield [`GeoPos::DEGENERATE`].
pub fn ecef_to_wgs84(x: f64, y: f64, z: f64) -> GeoPos {
    const A1: f64 = WGS84_A * WGS84_E2;
    const A2: f64 = A1 * A1;
    const A3: f64 = A1 * WGS84_E2 / 2.0;
    const A4: f64 = 2.5 * A2;
    const A5: f64 = A1 + A3;
    const A6: f64 = 1.0 - WGS84_E2;

    let zp = z.abs();
    let w2 = x * x + y * y;
    let w = w2.sqrt();
    let r2 = w2 + z * z;
    let r = r2.sqrt();

    if !r.is_finite() || r < MIN_GEODETIC_RADIUS {
        return GeoPos::DEGENERATE;
    }

    let lon = y.atan2(x);

    let s2 = z * z / r2;
    let c2 = w2 / r2;
    let mut u = A2 / r;
    let mut v = A3 - A4 / r;

    let (mut lat, s, c, ss) = if c2 > 0.3 {
        let s = (zp / r) * (1.0 + c2 * (A1 + u + s2 * v) / r);
        let ss = s * s;
        (s.asin(), s, (1.0 - ss).sqrt(), ss)
    } else {
        let c = (w / r) * (1.0 - s2 * (A5 - u - c2 * v) / r);
        let ss = 1.0 - c * c;
        (c.acos(), ss.sqrt(), c, ss)
    };

    let g = 1.0 - WGS84_E2 * ss;
    let rg = WGS84_A / g.sqrt();
    let rf = A6 * rg;
    u = w - rg * c;
    v = zp - rf * s;
    let f = c * u + s * v;
    let m = c * v - s * u;
    let p = m / (rf / g + f);

    lat += p;
    let alt = f + m * p / 2.0;
    if z < 0.0 {
        lat = -lat;
    }

    GeoPos {
        lat: lat.to_degrees(),
        lon: lon.to_degrees(),
        alt,
    }
}

/// Distance in meters for a straight ECEF separation of `chord` meters.
///
/// Below `long_range_threshold` the chord itself is returned. Above it the
/// chord is converted to the great-circle arc it subtends, which is what
/// callers expect for long separations. The mapping is monotonic, so it
/// preserves the ordering of chords and can be applied to pruning bounds.
#[inline]
pub fn corrected_distance(chord: f64, long_range_threshold: f64) -> f64 {
    if chord <= long_range_threshold {
        chord
    } else {
        let half = (chord / (2.0 * EARTH_RADIUS_METERS)).min(1.0);
        2.0 * EARTH_RADIUS_METERS * half.asin()
    }
}
