//! autopa Core - Fundamental types and contracts
//!
//! This crate defines the types shared by every autopa crate:
//! - Angular units and conversions (arcminutes, arcseconds, hours)
//! - Sky and site coordinates (EquatorialPosition, HorizontalPosition, SiteTime)
//! - Plate-solve results
//! - Mount and solver adapter contracts
//! - The error taxonomy

pub mod units;
pub mod coords;
pub mod solve;
pub mod adapter;
pub mod error;

pub use coords::*;
pub use solve::*;
pub use adapter::*;
pub use error::*;
