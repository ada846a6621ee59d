//! Sky and site coordinates
//!
//! All types here are immutable values. Constructors validate their inputs and
//! return [`GeometryError`] for anything non-finite or out of range.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::units::{deg_to_hours, hours_to_deg, wrap_180};
use crate::GeometryError;

/// Mount axis used for polar-alignment adjustments
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Compass heading of the mount base
    Azimuth,
    /// Elevation of the mount base
    Altitude,
}

impl Axis {
    pub const ALL: [Axis; 2] = [Axis::Azimuth, Axis::Altitude];
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Azimuth => write!(f, "AZ"),
            Axis::Altitude => write!(f, "ALT"),
        }
    }
}

fn finite(value: f64, what: &'static str) -> Result<f64, GeometryError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(GeometryError::NonFinite(what))
    }
}

/// Equatorial position: right ascension in hours [0, 24), declination in degrees [-90, 90]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquatorialPosition {
    ra_hours: f64,
    dec_deg: f64,
}

impl EquatorialPosition {
    /// Create a position; right ascension is wrapped into [0, 24)
    pub fn new(ra_hours: f64, dec_deg: f64) -> Result<Self, GeometryError> {
        let ra_hours = finite(ra_hours, "right ascension")?;
        let dec_deg = finite(dec_deg, "declination")?;

        if !(-90.0..=90.0).contains(&dec_deg) {
            return Err(GeometryError::InvalidCoordinate {
                what: "declination",
                value: dec_deg,
            });
        }

        let mut ra_hours = ra_hours.rem_euclid(24.0);
        if ra_hours >= 24.0 {
            ra_hours = 0.0;
        }

        Ok(EquatorialPosition { ra_hours, dec_deg })
    }

    /// Create a position from right ascension in degrees
    pub fn from_degrees(ra_deg: f64, dec_deg: f64) -> Result<Self, GeometryError> {
        Self::new(deg_to_hours(finite(ra_deg, "right ascension")?), dec_deg)
    }

    #[inline]
    pub fn ra_hours(&self) -> f64 {
        self.ra_hours
    }

    #[inline]
    pub fn ra_degrees(&self) -> f64 {
        hours_to_deg(self.ra_hours)
    }

    #[inline]
    pub fn dec_degrees(&self) -> f64 {
        self.dec_deg
    }

    /// Right ascension as "HH:MM:SS.ss"
    pub fn ra_hms(&self) -> String {
        let (h, m, s) = split_sexagesimal(self.ra_hours, 2);
        format!("{:02}:{:02}:{:05.2}", h % 24, m, s)
    }

    /// Declination as "+DD:MM:SS.s"
    pub fn dec_dms(&self) -> String {
        let sign = if self.dec_deg < 0.0 { '-' } else { '+' };
        let (d, m, s) = split_sexagesimal(self.dec_deg.abs(), 1);
        format!("{}{:02}:{:02}:{:04.1}", sign, d, m, s)
    }
}

impl fmt::Display for EquatorialPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RA {} DEC {}", self.ra_hms(), self.dec_dms())
    }
}

/// Split into whole units, minutes and seconds, rounding seconds to `decimals`
/// places first so a value never prints as 60 seconds
fn split_sexagesimal(value: f64, decimals: i32) -> (u64, u64, f64) {
    let scale = 10f64.powi(decimals);
    let ticks = (value * 3600.0 * scale).round() as u64;
    let per_minute = (60.0 * scale) as u64;

    let seconds = (ticks % per_minute) as f64 / scale;
    let minutes = (ticks / per_minute) % 60;
    let whole = ticks / (per_minute * 60);
    (whole, minutes, seconds)
}

/// Horizontal position: azimuth from north through east [0, 360), altitude [-90, 90]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HorizontalPosition {
    pub azimuth_deg: f64,
    pub altitude_deg: f64,
}

/// Observer location. Longitude is positive east.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Site {
    latitude_deg: f64,
    longitude_deg: f64,
}

impl Site {
    pub fn new(latitude_deg: f64, longitude_deg: f64) -> Result<Self, GeometryError> {
        let latitude_deg = finite(latitude_deg, "latitude")?;
        let longitude_deg = finite(longitude_deg, "longitude")?;

        if !(-90.0..=90.0).contains(&latitude_deg) {
            return Err(GeometryError::InvalidSite {
                what: "latitude",
                value: latitude_deg,
            });
        }

        Ok(Site {
            latitude_deg,
            longitude_deg: wrap_180(longitude_deg),
        })
    }

    #[inline]
    pub fn latitude_deg(&self) -> f64 {
        self.latitude_deg
    }

    #[inline]
    pub fn longitude_deg(&self) -> f64 {
        self.longitude_deg
    }

    /// Pair this site with an observation instant
    pub fn at(self, utc: DateTime<Utc>) -> SiteTime {
        SiteTime { site: self, utc }
    }
}

/// Observer location plus the UTC instant of an observation.
/// Supplied explicitly to every computation; nothing reads a global clock.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiteTime {
    pub site: Site,
    pub utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sexagesimal_rounds_up() {
        let pos = EquatorialPosition::new(23.999_999_9, 45.999_999_9).unwrap();
        assert_eq!(pos.ra_hms(), "00:00:00.00");
        assert_eq!(pos.dec_dms(), "+46:00:00.0");
    }

    proptest! {
        #[test]
        fn test_text_fields_in_range(ra in -48.0f64..48.0, dec in -90.0f64..=90.0) {
            let pos = EquatorialPosition::new(ra, dec).unwrap();
            let hms = pos.ra_hms();
            let fields: Vec<f64> = hms.split(':').map(|f| f.parse().unwrap()).collect();
            prop_assert_eq!(fields.len(), 3);
            prop_assert!(fields[0] < 24.0 && fields[1] < 60.0 && fields[2] < 60.0);

            let dms = pos.dec_dms();
            let fields: Vec<f64> = dms[1..].split(':').map(|f| f.parse().unwrap()).collect();
            prop_assert!(fields[0] <= 90.0 && fields[1] < 60.0 && fields[2] < 60.0);
        }
    }

    #[test]
    fn test_ra_wraps() {
        let pos = EquatorialPosition::new(25.5, 10.0).unwrap();
        assert!((pos.ra_hours() - 1.5).abs() < 1e-12);

        let pos = EquatorialPosition::new(-1.0, 10.0).unwrap();
        assert!((pos.ra_hours() - 23.0).abs() < 1e-12);
    }

    #[test]
    fn test_declination_range() {
        assert!(EquatorialPosition::new(1.0, 90.0).is_ok());
        assert!(EquatorialPosition::new(1.0, -90.0).is_ok());
        assert!(matches!(
            EquatorialPosition::new(1.0, 90.5),
            Err(GeometryError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            EquatorialPosition::new(f64::NAN, 0.0),
            Err(GeometryError::NonFinite(_))
        ));
    }

    #[test]
    fn test_from_degrees() {
        let pos = EquatorialPosition::from_degrees(90.0, 45.0).unwrap();
        assert_eq!(pos.ra_hours(), 6.0);
        assert_eq!(pos.ra_degrees(), 90.0);
    }

    #[test]
    fn test_sexagesimal_format() {
        let pos = EquatorialPosition::new(2.5, -45.5).unwrap();
        assert_eq!(pos.ra_hms(), "02:30:00.00");
        assert_eq!(pos.dec_dms(), "-45:30:00.0");
    }

    #[test]
    fn test_site_validation() {
        let site = Site::new(40.0, 249.0).unwrap();
        assert_eq!(site.longitude_deg(), -111.0);
        assert!(Site::new(91.0, 0.0).is_err());
        assert!(Site::new(0.0, f64::INFINITY).is_err());
    }
}
