//! autopa Geometry - Polar error engine
//!
//! Pure functions, no I/O and no clock reads:
//! - Julian date and sidereal time from an explicit [`SiteTime`]
//! - Equatorial <-> horizontal transforms
//! - Polar error between the solved and the reported pointing
//! - Damped, bounded correction policy
//!
//! [`SiteTime`]: autopa_core::SiteTime

pub mod sidereal;
pub mod transform;
pub mod polar;
pub mod correction;

pub use autopa_core::units;

pub use sidereal::*;
pub use transform::*;
pub use polar::*;
pub use correction::*;
