//! Angular unit conversions
//!
//! Jogs are exchanged in arcminutes and total error in arcseconds. Every
//! conversion between degrees, hours, arcminutes and arcseconds goes through
//! this module.

/// Arcminutes per degree
pub const ARCMIN_PER_DEG: f64 = 60.0;

/// Arcseconds per arcminute
pub const ARCSEC_PER_ARCMIN: f64 = 60.0;

/// Arcseconds per degree
pub const ARCSEC_PER_DEG: f64 = ARCMIN_PER_DEG * ARCSEC_PER_ARCMIN;

/// Degrees of right ascension per hour
pub const DEG_PER_HOUR: f64 = 15.0;

#[inline]
pub fn deg_to_arcmin(deg: f64) -> f64 {
    deg * ARCMIN_PER_DEG
}

#[inline]
pub fn arcmin_to_deg(arcmin: f64) -> f64 {
    arcmin / ARCMIN_PER_DEG
}

#[inline]
pub fn arcmin_to_arcsec(arcmin: f64) -> f64 {
    arcmin * ARCSEC_PER_ARCMIN
}

#[inline]
pub fn arcsec_to_arcmin(arcsec: f64) -> f64 {
    arcsec / ARCSEC_PER_ARCMIN
}

#[inline]
pub fn hours_to_deg(hours: f64) -> f64 {
    hours * DEG_PER_HOUR
}

#[inline]
pub fn deg_to_hours(deg: f64) -> f64 {
    deg / DEG_PER_HOUR
}

/// Wrap an angle in degrees to [0, 360)
#[inline]
pub fn wrap_360(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wrap an angle in degrees to (-180, 180]
#[inline]
pub fn wrap_180(deg: f64) -> f64 {
    let wrapped = wrap_360(deg);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}
