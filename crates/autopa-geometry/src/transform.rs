//! Equatorial <-> horizontal coordinate transforms
//!
//! Azimuth is measured from north through east. Hour angle is positive
//! west of the meridian.

use autopa_core::units::{wrap_180, wrap_360};
use autopa_core::{EquatorialPosition, GeometryError, HorizontalPosition, SiteTime};

use crate::sidereal::{hour_angle_degrees, local_sidereal_degrees};

/// Convert an equatorial position to azimuth/altitude for the given site and instant
pub fn equatorial_to_horizontal(
    position: &EquatorialPosition,
    at: &SiteTime,
) -> HorizontalPosition {
    let lat = at.site.latitude_deg().to_radians();
    let dec = position.dec_degrees().to_radians();
    let ha = hour_angle_degrees(position, at).to_radians();

    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_dec, cos_dec) = dec.sin_cos();
    let (sin_ha, cos_ha) = ha.sin_cos();

    let sin_alt = (sin_dec * sin_lat + cos_dec * cos_lat * cos_ha).clamp(-1.0, 1.0);
    let y = -cos_dec * sin_ha;
    let x = sin_dec * cos_lat - cos_dec * sin_lat * cos_ha;

    HorizontalPosition {
        azimuth_deg: wrap_360(y.atan2(x).to_degrees()),
        altitude_deg: sin_alt.asin().to_degrees(),
    }
}

/// Convert azimuth/altitude back to an equatorial position
pub fn horizontal_to_equatorial(
    position: &HorizontalPosition,
    at: &SiteTime,
) -> Result<EquatorialPosition, GeometryError> {
    if !position.azimuth_deg.is_finite() || !position.altitude_deg.is_finite() {
        return Err(GeometryError::NonFinite("horizontal position"));
    }

    let lat = at.site.latitude_deg().to_radians();
    let az = position.azimuth_deg.to_radians();
    let alt = position.altitude_deg.to_radians();

    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_az, cos_az) = az.sin_cos();
    let (sin_alt, cos_alt) = alt.sin_cos();

    let sin_dec = (sin_alt * sin_lat + cos_alt * cos_lat * cos_az).clamp(-1.0, 1.0);
    let y = -sin_az * cos_alt;
    let x = sin_alt * cos_lat - cos_alt * sin_lat * cos_az;
    let ha_deg = wrap_180(y.atan2(x).to_degrees());

    let ra_deg = wrap_360(local_sidereal_degrees(at) - ha_deg);
    EquatorialPosition::from_degrees(ra_deg, sin_dec.asin().to_degrees())
}
