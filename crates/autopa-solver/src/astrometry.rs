//! astrometry.net plate solver
//!
//! Runs `solve-field <image> --no-plots --overwrite ...`. Success is signalled
//! by a `.solved` marker next to the image; the solution is the FITS header
//! in the `.wcs` file. Reading that header needs the `fits` feature.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use autopa_core::{EquatorialPosition, SolveFailure, SolveResult};

use crate::backend::{format_number, remove_stale, require_image, run_solver, wcs_solution};
use crate::PlateSolver;

pub const ASTROMETRY_SOLVER_NAME: &str = "astrometry";

/// Header keywords read from the `.wcs` file
pub const WCS_KEYS: [&str; 7] = [
    "CRVAL1", "CRVAL2", "CD1_1", "CD2_1", "IMAGEW", "IMAGEH", "CROTA2",
];

#[derive(Clone, Debug)]
pub struct AstrometryConfig {
    /// Path to `solve-field`
    pub executable: PathBuf,
    /// Search radius around the hint in degrees
    pub search_radius_deg: f64,
    /// Image width in degrees; searched within +-20 %
    pub fov_hint_deg: Option<f64>,
    pub timeout: Duration,
}

impl Default for AstrometryConfig {
    fn default() -> Self {
        AstrometryConfig {
            executable: PathBuf::from("/usr/bin/solve-field"),
            search_radius_deg: 30.0,
            fov_hint_deg: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// `solve-field` wrapper
#[derive(Clone, Debug, Default)]
pub struct AstrometrySolver {
    config: AstrometryConfig,
}

impl AstrometrySolver {
    pub fn new(config: AstrometryConfig) -> Self {
        AstrometrySolver { config }
    }

    pub fn config(&self) -> &AstrometryConfig {
        &self.config
    }

    pub fn command_args(&self, image: &Path, hint: Option<&EquatorialPosition>) -> Vec<String> {
        let mut args: Vec<String> = vec![
            image.display().to_string(),
            "--no-plots".to_string(),
            "--overwrite".to_string(),
            "--no-remove-lines".to_string(),
            "--uniformize".to_string(),
            "0".to_string(),
        ];

        if let Some(fov) = self.config.fov_hint_deg {
            args.extend([
                "--scale-low".to_string(),
                format_number(fov * 0.8),
                "--scale-high".to_string(),
                format_number(fov * 1.2),
                "--scale-units".to_string(),
                "degwidth".to_string(),
            ]);
        }

        if let Some(hint) = hint {
            args.extend([
                "--ra".to_string(),
                format_number(hint.ra_degrees()),
                "--dec".to_string(),
                format_number(hint.dec_degrees()),
                "--radius".to_string(),
                format_number(self.config.search_radius_deg),
            ]);
        }

        args
    }
}

#[async_trait]
impl PlateSolver for AstrometrySolver {
    async fn solve_file(
        &self,
        image: &Path,
        observed_at: DateTime<Utc>,
        hint: Option<&EquatorialPosition>,
    ) -> Result<SolveResult, SolveFailure> {
        require_image(image)?;

        let solved_path = image.with_extension("solved");
        let wcs_path = image.with_extension("wcs");
        remove_stale(&[solved_path.clone(), wcs_path.clone()]).await?;

        let args = self.command_args(image, hint);
        let output = run_solver(&self.config.executable, &args, self.config.timeout).await?;

        if !(solved_path.exists() && wcs_path.exists()) {
            warn!(
                "solve failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(SolveFailure::NoStarsDetected);
        }

        let keys = tokio::task::spawn_blocking(move || read_wcs_keys(&wcs_path))
            .await
            .map_err(|e| SolveFailure::InvalidOutput(e.to_string()))??;

        wcs_solution(
            |key| keys.iter().find(|(k, _)| *k == key).map(|(_, v)| *v),
            ASTROMETRY_SOLVER_NAME,
            observed_at,
        )
    }
}

#[cfg(feature = "fits")]
fn read_wcs_keys(path: &Path) -> Result<Vec<(&'static str, f64)>, SolveFailure> {
    use fitsio::FitsFile;

    let invalid = |e: fitsio::errors::Error| {
        SolveFailure::InvalidOutput(format!("{}: {}", path.display(), e))
    };

    let mut fptr = FitsFile::open(path).map_err(invalid)?;
    let hdu = fptr.primary_hdu().map_err(invalid)?;

    Ok(WCS_KEYS
        .iter()
        .filter_map(|key| hdu.read_key::<f64>(&mut fptr, key).ok().map(|v| (*key, v)))
        .collect())
}

#[cfg(not(feature = "fits"))]
fn read_wcs_keys(path: &Path) -> Result<Vec<(&'static str, f64)>, SolveFailure> {
    Err(SolveFailure::InvalidOutput(format!(
        "{}: reading WCS headers needs the `fits` feature",
        path.display()
    )))
}
