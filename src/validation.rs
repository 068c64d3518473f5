//! Validation for geodetic item coordinates.

use crate::datum::GeoPos;
use crate::error::{GisError, Result};

/// Lowest accepted altitude in meters.
pub const MIN_ALTITUDE: f64 = -11_000.0;
/// Highest accepted altitude in meters.
pub const MAX_ALTITUDE: f64 = 1_000_000.0;

/// Validates latitude, longitude and altitude of a geodetic position.
///
/// Latitude: [-90.0, 90.0], longitude: [-180.0, 180.0], altitude within
/// [`MIN_ALTITUDE`, `MAX_ALTITUDE`].
///
/// # Examples
///
/// ```
/// use rgis::GeoPos;
/// use rgis::validation::validate_position;
///
/// assert!(validate_position(&GeoPos::new(37.62, -122.38, 4.0)).is_ok());
/// assert!(validate_position(&GeoPos::new(95.0, 0.0, 0.0)).is_err());
/// ```
pub fn validate_position(pos: &GeoPos) -> Result<()> {
    validate_finite(pos)?;

    if !(-90.0..=90.0).contains(&pos.lat) {
        return Err(GisError::InvalidInput(format!(
            "Latitude out of range [-90.0, 90.0]: {}",
            pos.lat
        )));
    }

    if !(-180.0..=180.0).contains(&pos.lon) {
        return Err(GisError::InvalidInput(format!(
            "Longitude out of range [-180.0, 180.0]: {}",
            pos.lon
        )));
    }

    if !(MIN_ALTITUDE..=MAX_ALTITUDE).contains(&pos.alt) {
        return Err(GisError::InvalidInput(format!(
            "Altitude out of range [{}, {}] meters: {}",
            MIN_ALTITUDE, MAX_ALTITUDE, pos.alt
        )));
    }

    Ok(())
}

/// Rejects NaN and infinite coordinates. Checked for every item, whether
/// or not range validation is enabled.
pub fn validate_finite(pos: &GeoPos) -> Result<()> {
    if !pos.lat.is_finite() {
        return Err(GisError::InvalidInput(format!(
            "Latitude must be finite, got: {}",
            pos.lat
        )));
    }

    if !pos.lon.is_finite() {
        return Err(GisError::InvalidInput(format!(
            "Longitude must be finite, got: {}",
            pos.lon
        )));
    }

    if !pos.alt.is_finite() {
        return Err(GisError::InvalidInput(format!(
            "Altitude must be finite, got: {}",
            pos.alt
        )));
    }

    Ok(())
}

/// Validates an item name: non-empty and free of NUL bytes, since names are
/// stored as zero-terminated strings.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GisError::InvalidInput("Item name must not be empty".into()));
    }
    if name.contains('\0') {
        return Err(GisError::InvalidInput(format!(
            "Item name contains NUL byte: {:?}",
            name
        )));
    }
    Ok(())
}
