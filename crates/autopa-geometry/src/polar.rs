//! Polar error computation
//!
//! A mount whose polar axis is misaligned carries its whole equatorial frame
//! with it: where the mount believes it points (the reported position) and
//! where the plate solve says it actually points differ by the tilt of the
//! base. Expressed in horizontal coordinates that difference is the polar
//! error, split into a base-heading (azimuth) and a base-elevation
//! (altitude) component.
//!
//! Sign convention, fixed for the whole crate:
//! - positive azimuth error: the mount axis is rotated east of the true pole
//! - positive altitude error: the mount axis is above the true pole
//!
//! The correction for either axis is always the negated error.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use autopa_core::units::{arcmin_to_arcsec, deg_to_arcmin, arcmin_to_deg, wrap_180, wrap_360};
use autopa_core::{EquatorialPosition, GeometryError, HorizontalPosition, SiteTime};

use crate::transform::{equatorial_to_horizontal, horizontal_to_equatorial};

/// Default distance from the zenith, in degrees, inside which azimuth is
/// considered undefined
pub const DEFAULT_ALTITUDE_GUARD_DEG: f64 = 0.05;

/// Polar alignment error, recomputed every cycle
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PolarError {
    az_arcmin: f64,
    alt_arcmin: f64,
    total_arcsec: f64,
    aligned: bool,
}

impl PolarError {
    /// Build an error from its components; `aligned` is `total <= target_arcsec`
    pub fn from_components(
        az_arcmin: f64,
        alt_arcmin: f64,
        target_arcsec: f64,
    ) -> Result<Self, GeometryError> {
        check_threshold(target_arcsec)?;
        if !az_arcmin.is_finite() || !alt_arcmin.is_finite() {
            return Err(GeometryError::NonFinite("polar error"));
        }

        let total_arcsec = arcmin_to_arcsec(az_arcmin.hypot(alt_arcmin));
        Ok(PolarError {
            az_arcmin,
            alt_arcmin,
            total_arcsec,
            aligned: total_arcsec <= target_arcsec,
        })
    }

    /// Signed azimuth error in arcminutes
    #[inline]
    pub fn az_arcmin(&self) -> f64 {
        self.az_arcmin
    }

    /// Signed altitude error in arcminutes
    #[inline]
    pub fn alt_arcmin(&self) -> f64 {
        self.alt_arcmin
    }

    /// Total error magnitude in arcseconds
    #[inline]
    pub fn total_arcsec(&self) -> f64 {
        self.total_arcsec
    }

    #[inline]
    pub fn aligned(&self) -> bool {
        self.aligned
    }

    /// Same error with both axis signs flipped
    pub fn negated(&self) -> Self {
        PolarError {
            az_arcmin: -self.az_arcmin,
            alt_arcmin: -self.alt_arcmin,
            ..*self
        }
    }

    /// Re-evaluate `aligned` against another threshold
    pub fn with_target(&self, target_arcsec: f64) -> Result<Self, GeometryError> {
        check_threshold(target_arcsec)?;
        Ok(PolarError {
            aligned: self.total_arcsec <= target_arcsec,
            ..*self
        })
    }
}

impl fmt::Display for PolarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AZ: {:+.2}', ALT: {:+.2}', Total: {:.1}\"",
            self.az_arcmin, self.alt_arcmin, self.total_arcsec
        )
    }
}

fn check_threshold(target_arcsec: f64) -> Result<(), GeometryError> {
    if target_arcsec.is_finite() && target_arcsec > 0.0 {
        Ok(())
    } else {
        Err(GeometryError::InvalidThreshold(target_arcsec))
    }
}

fn check_azimuth_defined(
    position: &HorizontalPosition,
    guard_deg: f64,
) -> Result<(), GeometryError> {
    if 90.0 - position.altitude_deg.abs() < guard_deg {
        Err(GeometryError::DegenerateAzimuth {
            altitude_deg: position.altitude_deg,
        })
    } else {
        Ok(())
    }
}

/// Compute the polar error between where the mount actually points
/// (`solved`) and where it reports pointing (`reported`).
pub fn compute_polar_error(
    solved: &EquatorialPosition,
    reported: &EquatorialPosition,
    at: &SiteTime,
    target_arcsec: f64,
) -> Result<PolarError, GeometryError> {
    compute_polar_error_guarded(solved, reported, at, target_arcsec, DEFAULT_ALTITUDE_GUARD_DEG)
}

/// [`compute_polar_error`] with an explicit zenith guard in degrees
pub fn compute_polar_error_guarded(
    solved: &EquatorialPosition,
    reported: &EquatorialPosition,
    at: &SiteTime,
    target_arcsec: f64,
    altitude_guard_deg: f64,
) -> Result<PolarError, GeometryError> {
    check_threshold(target_arcsec)?;

    let actual = equatorial_to_horizontal(solved, at);
    let expected = equatorial_to_horizontal(reported, at);
    check_azimuth_defined(&actual, altitude_guard_deg)?;
    check_azimuth_defined(&expected, altitude_guard_deg)?;

    let az_arcmin = deg_to_arcmin(wrap_180(actual.azimuth_deg - expected.azimuth_deg));
    let alt_arcmin = deg_to_arcmin(actual.altitude_deg - expected.altitude_deg);

    debug!(
        actual_az = actual.azimuth_deg,
        actual_alt = actual.altitude_deg,
        expected_az = expected.azimuth_deg,
        expected_alt = expected.altitude_deg,
        "polar error components: az={:+.3}' alt={:+.3}'",
        az_arcmin,
        alt_arcmin
    );

    PolarError::from_components(az_arcmin, alt_arcmin, target_arcsec)
}

/// The position a mount with the given polar error would actually see when
/// reporting `reported`. Inverse of [`compute_polar_error`].
pub fn offset_position(
    reported: &EquatorialPosition,
    at: &SiteTime,
    az_arcmin: f64,
    alt_arcmin: f64,
) -> Result<EquatorialPosition, GeometryError> {
    let expected = equatorial_to_horizontal(reported, at);
    let actual = HorizontalPosition {
        azimuth_deg: wrap_360(expected.azimuth_deg + arcmin_to_deg(az_arcmin)),
        altitude_deg: expected.altitude_deg + arcmin_to_deg(alt_arcmin),
    };

    if !(-90.0..=90.0).contains(&actual.altitude_deg) {
        return Err(GeometryError::InvalidCoordinate {
            what: "altitude",
            value: actual.altitude_deg,
        });
    }

    horizontal_to_equatorial(&actual, at)
}
