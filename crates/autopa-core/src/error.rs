//! Error types for autopa

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Axis;

/// Malformed or degenerate geometry
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum GeometryError {
    #[error("Non-finite {0}")]
    NonFinite(&'static str),

    #[error("Coordinate out of range: {what} = {value}")]
    InvalidCoordinate { what: &'static str, value: f64 },

    #[error("Invalid site: {what} = {value}")]
    InvalidSite { what: &'static str, value: f64 },

    #[error("Azimuth undefined at altitude {altitude_deg:.4} deg")]
    DegenerateAzimuth { altitude_deg: f64 },

    #[error("Invalid accuracy threshold: {0} arcsec")]
    InvalidThreshold(f64),
}

/// Capture or plate-solve failure. Recoverable; the controller retries.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveFailure {
    #[error("No stars detected")]
    NoStarsDetected,

    #[error("Solver timed out after {0:?}")]
    SolverTimeout(Duration),

    #[error("Solver not found: {0}")]
    SolverNotFound(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Invalid solver output: {0}")]
    InvalidOutput(String),
}

/// Mount command failure
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountError {
    #[error("Mount not connected")]
    NotConnected,

    #[error("Mount motion timed out")]
    MotionTimeout,

    #[error("Command rejected: {0}")]
    CommandRejected(String),

    #[error("Mount I/O error: {0}")]
    Io(String),

    #[error("Mount protocol error: {0}")]
    Protocol(String),
}

/// Why a session ended in `Failed`. Reported verbatim through status.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum FailureReason {
    #[error("Measurement failed {attempts} times in a row: {last}")]
    SolveRetriesExhausted { attempts: u32, last: String },

    #[error("Error grew for {cycles} consecutive cycles (last {last_total_arcsec:.1} arcsec)")]
    DivergingError { cycles: u32, last_total_arcsec: f64 },

    #[error("Not converged after {cycles} cycles")]
    MaxCyclesExceeded { cycles: u32 },

    #[error("Mount fault: {0}")]
    MountFault(MountError),

    #[error("{axis} axis still moving before next jog")]
    MountTimeout { axis: Axis },

    #[error("Geometry error: {0}")]
    Geometry(GeometryError),
}

/// Rejected session-control request. Never mutates session state.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum ControlError {
    #[error("Alignment session already running")]
    SessionAlreadyRunning,

    #[error("Mount not connected")]
    MountNotConnected,

    #[error("Invalid target accuracy: {0} arcsec")]
    InvalidTarget(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Core autopa errors
#[derive(Error, Debug)]
pub enum AutopaError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Solve(#[from] SolveFailure),

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for autopa operations
pub type AutopaResult<T> = Result<T, AutopaError>;
