//! Plate-solve results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EquatorialPosition;

/// Solver-reported details that accompany a solved position
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveMetadata {
    /// Which solver produced the result
    pub solver: String,
    /// Arcseconds per pixel
    pub pixel_scale_arcsec: Option<f64>,
    /// Field rotation in degrees
    pub rotation_deg: Option<f64>,
    /// Field of view (width, height) in degrees
    pub fov_deg: Option<(f64, f64)>,
    /// Number of stars matched, when the solver reports it
    pub matched_stars: Option<u32>,
}

/// A successful plate solve: where the camera was actually pointing, and when.
/// Consumed once by the controller, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    pub position: EquatorialPosition,
    /// Instant the exposure was taken
    pub observed_at: DateTime<Utc>,
    pub metadata: SolveMetadata,
}

impl SolveResult {
    pub fn new(position: EquatorialPosition, observed_at: DateTime<Utc>) -> Self {
        SolveResult {
            position,
            observed_at,
            metadata: SolveMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: SolveMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}
