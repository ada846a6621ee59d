//! ASTAP plate solver
//!
//! Runs `astap_cli -f <image> -r <radius> -z <downsample>` and reads the
//! sidecar files it writes next to the image. A `.wcs` file means the solve
//! succeeded; the `.ini` file carries the solution keys:
//!
//! ```text
//! PLTSOLVD=T
//! CRVAL1=37.9541     (RA of reference pixel, degrees)
//! CRVAL2=89.2641     (DEC of reference pixel, degrees)
//! CD1_1=-1.4e-4      (CD matrix, degrees per pixel)
//! CD2_1=2.1e-6
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use autopa_core::{EquatorialPosition, SolveFailure, SolveResult};

use crate::backend::{format_number, remove_stale, require_image, run_solver, wcs_solution};
use crate::PlateSolver;

/// Solver name recorded in [`autopa_core::SolveMetadata`]
pub const ASTAP_SOLVER_NAME: &str = "astap";

/// ASTAP invocation settings
#[derive(Clone, Debug)]
pub struct AstapConfig {
    /// Path to the `astap_cli` executable
    pub executable: PathBuf,
    /// Search radius around the hint in degrees
    pub search_radius_deg: f64,
    /// Downsample factor, 0 lets ASTAP choose
    pub downsample: u32,
    /// Field-of-view hint in degrees
    pub fov_hint_deg: Option<f64>,
    /// Kill the solver after this long
    pub timeout: Duration,
}

impl Default for AstapConfig {
    fn default() -> Self {
        AstapConfig {
            executable: PathBuf::from("/usr/bin/astap_cli"),
            search_radius_deg: 30.0,
            downsample: 0,
            fov_hint_deg: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// ASTAP command-line wrapper
#[derive(Clone, Debug, Default)]
pub struct AstapSolver {
    config: AstapConfig,
}

impl AstapSolver {
    pub fn new(config: AstapConfig) -> Self {
        AstapSolver { config }
    }

    pub fn config(&self) -> &AstapConfig {
        &self.config
    }

    /// Arguments passed to the executable for `image`
    pub fn command_args(&self, image: &Path, hint: Option<&EquatorialPosition>) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            image.display().to_string(),
            "-r".to_string(),
            format_number(self.config.search_radius_deg),
            "-z".to_string(),
            self.config.downsample.to_string(),
        ];

        if let Some(fov) = self.config.fov_hint_deg {
            args.push("-fov".to_string());
            args.push(format_number(fov));
        }

        if let Some(hint) = hint {
            // ASTAP takes RA in hours and declination as south-pole distance
            args.push("-ra".to_string());
            args.push(format_number(hint.ra_hours()));
            args.push("-spd".to_string());
            args.push(format_number(hint.dec_degrees() + 90.0));
        }

        args
    }
}

#[async_trait]
impl PlateSolver for AstapSolver {
    async fn solve_file(
        &self,
        image: &Path,
        observed_at: DateTime<Utc>,
        hint: Option<&EquatorialPosition>,
    ) -> Result<SolveResult, SolveFailure> {
        require_image(image)?;

        let wcs_path = image.with_extension("wcs");
        let ini_path = image.with_extension("ini");
        remove_stale(&[wcs_path.clone(), ini_path.clone()]).await?;

        let args = self.command_args(image, hint);
        let output = run_solver(&self.config.executable, &args, self.config.timeout).await?;

        if !wcs_path.exists() {
            warn!(
                "solve failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(SolveFailure::NoStarsDetected);
        }

        let ini = tokio::fs::read_to_string(&ini_path)
            .await
            .map_err(|e| SolveFailure::InvalidOutput(format!("{}: {}", ini_path.display(), e)))?;

        parse_ini(&ini, observed_at)
    }
}

/// Parse an ASTAP `.ini` solution
pub fn parse_ini(text: &str, observed_at: DateTime<Utc>) -> Result<SolveResult, SolveFailure> {
    let keys: HashMap<&str, &str> = text
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect();

    if keys.get("PLTSOLVD").is_some_and(|v| *v != "T") {
        return Err(SolveFailure::NoStarsDetected);
    }

    wcs_solution(
        |key| keys.get(key).and_then(|v| v.parse().ok()),
        ASTAP_SOLVER_NAME,
        observed_at,
    )
}
