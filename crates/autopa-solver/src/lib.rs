//! autopa Solver - Capture and plate-solve adapters
//!
//! - [`PlateSolver`]: solve an image on disk; implemented by [`AstapSolver`]
//!   (ASTAP command line, sidecar files) and [`AstrometrySolver`]
//!   (astrometry.net `solve-field`, WCS header behind the `fits` feature)
//! - [`ImageSource`]: camera contract, plus [`LatestFileSource`] for frames dropped
//!   into a directory
//! - [`CaptureSolver`]: capture -> solve, implementing [`SolveAdapter`]
//!
//! [`SolveAdapter`]: autopa_core::SolveAdapter

pub mod astap;
pub mod astrometry;
pub mod backend;
pub mod capture;

pub use astap::*;
pub use astrometry::*;
pub use backend::PlateSolver;
pub use capture::*;
