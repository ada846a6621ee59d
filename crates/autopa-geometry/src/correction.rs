//! Correction policy
//!
//! Turns a [`PolarError`] into per-axis jogs. The step is the negated error
//! scaled by a damping factor strictly below 1.0 and clamped to the largest
//! jog the mechanics accept.

use serde::{Deserialize, Serialize};

use autopa_core::Axis;

use crate::PolarError;

/// Assumed fraction of error left after each correction, for progress estimates
pub const ITERATION_REDUCTION: f64 = 0.6;

/// Upper bound on the iteration estimate
pub const MAX_ESTIMATED_ITERATIONS: u32 = 20;

/// Signed jog amounts in arcminutes
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub az_arcmin: f64,
    pub alt_arcmin: f64,
}

impl Correction {
    pub fn component(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Azimuth => self.az_arcmin,
            Axis::Altitude => self.alt_arcmin,
        }
    }
}

/// How much of the measured error to correct per cycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrectionPolicy {
    /// Fraction of the error corrected per cycle, in (0, 1)
    pub damping: f64,
    /// Largest jog per axis in arcminutes
    pub max_step_arcmin: f64,
    /// Steps smaller than this are skipped
    pub min_step_arcmin: f64,
}

impl Default for CorrectionPolicy {
    fn default() -> Self {
        CorrectionPolicy {
            damping: 0.8,
            max_step_arcmin: 60.0,
            min_step_arcmin: 0.01,
        }
    }
}

impl CorrectionPolicy {
    /// Check the policy; returns a description of the first violated bound
    pub fn validate(&self) -> Result<(), String> {
        if !(self.damping > 0.0 && self.damping < 1.0) {
            return Err(format!("damping must be in (0, 1), got {}", self.damping));
        }
        if !(self.max_step_arcmin.is_finite() && self.max_step_arcmin > 0.0) {
            return Err(format!(
                "max_step_arcmin must be positive, got {}",
                self.max_step_arcmin
            ));
        }
        if !(self.min_step_arcmin >= 0.0 && self.min_step_arcmin < self.max_step_arcmin) {
            return Err(format!(
                "min_step_arcmin must be in [0, max_step_arcmin), got {}",
                self.min_step_arcmin
            ));
        }
        Ok(())
    }

    /// Correction that moves each axis toward the true pole
    pub fn correction_for(&self, error: &PolarError) -> Correction {
        Correction {
            az_arcmin: self.step(error.az_arcmin()),
            alt_arcmin: self.step(error.alt_arcmin()),
        }
    }

    fn step(&self, error_arcmin: f64) -> f64 {
        let step =
            (-error_arcmin * self.damping).clamp(-self.max_step_arcmin, self.max_step_arcmin);
        if step.abs() < self.min_step_arcmin {
            0.0
        } else {
            step
        }
    }
}

/// Rough number of further cycles needed to reach `target_arcsec`
pub fn estimate_iterations(current_arcsec: f64, target_arcsec: f64) -> u32 {
    if !(current_arcsec > target_arcsec) || target_arcsec <= 0.0 {
        return 0;
    }

    let mut error = current_arcsec;
    let mut iterations = 0;
    while error > target_arcsec && iterations < MAX_ESTIMATED_ITERATIONS {
        error *= ITERATION_REDUCTION;
        iterations += 1;
    }
    iterations
}
