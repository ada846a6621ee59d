//! Julian date and sidereal time

use chrono::{DateTime, Utc};

use autopa_core::units::{wrap_180, wrap_360};
use autopa_core::{EquatorialPosition, SiteTime};

/// Julian date of the J2000.0 epoch
pub const J2000_JD: f64 = 2_451_545.0;

/// Julian date of 1970-01-01T00:00:00Z
pub const UNIX_EPOCH_JD: f64 = 2_440_587.5;

const SECONDS_PER_DAY: f64 = 86_400.0;
const DAYS_PER_CENTURY: f64 = 36_525.0;

/// Julian date of a UTC instant
pub fn julian_date(utc: DateTime<Utc>) -> f64 {
    let seconds = utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_nanos()) * 1e-9;
    UNIX_EPOCH_JD + seconds / SECONDS_PER_DAY
}

/// Greenwich mean sidereal time in degrees [0, 360) (IAU 1982 expression)
pub fn gmst_degrees(jd: f64) -> f64 {
    let d = jd - J2000_JD;
    let t = d / DAYS_PER_CENTURY;
    wrap_360(
        280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t
            - t * t * t / 38_710_000.0,
    )
}

/// Local sidereal time in degrees [0, 360)
pub fn local_sidereal_degrees(at: &SiteTime) -> f64 {
    wrap_360(gmst_degrees(julian_date(at.utc)) + at.site.longitude_deg())
}

/// Local hour angle of a position in degrees (-180, 180], positive west of the meridian
pub fn hour_angle_degrees(position: &EquatorialPosition, at: &SiteTime) -> f64 {
    wrap_180(local_sidereal_degrees(at) - position.ra_degrees())
}
