//! Plumbing shared by the solver backends

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use autopa_core::units::ARCSEC_PER_DEG;
use autopa_core::{EquatorialPosition, SolveFailure, SolveMetadata, SolveResult};

/// Plate-solve an image that is already on disk
#[async_trait]
pub trait PlateSolver: Send + Sync {
    async fn solve_file(
        &self,
        image: &Path,
        observed_at: DateTime<Utc>,
        hint: Option<&EquatorialPosition>,
    ) -> Result<SolveResult, SolveFailure>;
}

pub(crate) fn require_image(image: &Path) -> Result<(), SolveFailure> {
    if image.exists() {
        Ok(())
    } else {
        Err(SolveFailure::CaptureFailed(format!(
            "image not found: {}",
            image.display()
        )))
    }
}

/// Delete result files left over from an earlier run on the same image
pub(crate) async fn remove_stale(paths: &[PathBuf]) -> Result<(), SolveFailure> {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "removed stale solver output"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SolveFailure::InvalidOutput(format!(
                    "cannot remove stale {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
    Ok(())
}

/// Run a solver executable to completion, killing it after `limit`
pub(crate) async fn run_solver(
    executable: &Path,
    args: &[String],
    limit: Duration,
) -> Result<Output, SolveFailure> {
    info!("running {} {}", executable.display(), args.join(" "));

    let child = Command::new(executable)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                SolveFailure::SolverNotFound(executable.display().to_string())
            }
            _ => SolveFailure::InvalidOutput(format!("failed to start solver: {}", e)),
        })?;

    let output = timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| {
            warn!("solver timed out after {:?}", limit);
            SolveFailure::SolverTimeout(limit)
        })?
        .map_err(|e| SolveFailure::InvalidOutput(e.to_string()))?;

    debug!(status = %output.status, "solver exited");
    Ok(output)
}

/// Build a solution from WCS keywords (`CRVAL*`, `CD*_1`, `IMAGE*`, `CROTA2`)
pub(crate) fn wcs_solution(
    number: impl Fn(&str) -> Option<f64>,
    solver: &str,
    observed_at: DateTime<Utc>,
) -> Result<SolveResult, SolveFailure> {
    let ra_deg = number("CRVAL1")
        .ok_or_else(|| SolveFailure::InvalidOutput("missing CRVAL1".to_string()))?;
    let dec_deg = number("CRVAL2")
        .ok_or_else(|| SolveFailure::InvalidOutput("missing CRVAL2".to_string()))?;
    let position = EquatorialPosition::from_degrees(ra_deg, dec_deg)
        .map_err(|e| SolveFailure::InvalidOutput(e.to_string()))?;

    let mut metadata = SolveMetadata {
        solver: solver.to_string(),
        ..Default::default()
    };

    if let (Some(cd11), Some(cd21)) = (number("CD1_1"), number("CD2_1")) {
        let scale_deg = cd11.hypot(cd21);
        metadata.pixel_scale_arcsec = Some(scale_deg * ARCSEC_PER_DEG);
        metadata.rotation_deg = Some(cd21.atan2(cd11).to_degrees());

        if let (Some(w), Some(h)) = (number("IMAGEW"), number("IMAGEH")) {
            metadata.fov_deg = Some((w * scale_deg, h * scale_deg));
        }
    }
    if metadata.rotation_deg.is_none() {
        metadata.rotation_deg = number("CROTA2");
    }

    Ok(SolveResult::new(position, observed_at).with_metadata(metadata))
}

/// Shortest decimal text for a command-line number
pub(crate) fn format_number(value: f64) -> String {
    let text = format!("{:.6}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    text.to_string()
}
