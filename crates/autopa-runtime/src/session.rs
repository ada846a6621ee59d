//! Alignment session state

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use autopa_core::{Axis, FailureReason};
use autopa_geometry::{estimate_iterations, Correction, PolarError};

/// Controller state machine
///
/// `Idle -> Solving -> Correcting -> Settling -> (Solving | Converged | Failed | Cancelled)`
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason")]
pub enum SessionState {
    Idle,
    Solving,
    Correcting,
    Settling,
    Converged,
    Failed(FailureReason),
    Cancelled,
}

impl SessionState {
    /// Converged, Failed or Cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Converged | SessionState::Failed(_) | SessionState::Cancelled
        )
    }

    /// A session is running
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Solving | SessionState::Correcting | SessionState::Settling
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Solving => "solving",
            SessionState::Correcting => "correcting",
            SessionState::Settling => "settling",
            SessionState::Converged => "converged",
            SessionState::Failed(_) => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// The only stateful entity of the controller
#[derive(Clone, Debug)]
pub struct AlignmentSession {
    pub id: u64,
    pub state: SessionState,
    pub target_arcsec: f64,
    pub current_error: Option<PolarError>,
    pub cycle_count: u32,
    pub last_correction: Option<Correction>,
    pub settle_warnings: u32,
    pub started_at: Option<DateTime<Utc>>,
}

impl AlignmentSession {
    pub fn idle() -> Self {
        AlignmentSession {
            id: 0,
            state: SessionState::Idle,
            target_arcsec: 0.0,
            current_error: None,
            cycle_count: 0,
            last_correction: None,
            settle_warnings: 0,
            started_at: None,
        }
    }

    /// Fresh session, entering Solving
    pub fn begin(id: u64, target_arcsec: f64) -> Self {
        AlignmentSession {
            id,
            state: SessionState::Solving,
            target_arcsec,
            started_at: Some(Utc::now()),
            ..Self::idle()
        }
    }

    pub fn status(&self) -> SessionStatus {
        let estimated_iterations = self
            .current_error
            .map(|e| estimate_iterations(e.total_arcsec(), self.target_arcsec))
            .unwrap_or(0);

        let failure = match &self.state {
            SessionState::Failed(reason) => Some(reason.clone()),
            _ => None,
        };

        SessionStatus {
            session_id: self.id,
            state: self.state.name(),
            target_arcsec: self.target_arcsec,
            current_error: self.current_error,
            cycle_count: self.cycle_count,
            last_correction: self.last_correction,
            failure,
            settle_warnings: self.settle_warnings,
            estimated_iterations,
            started_at: self.started_at,
        }
    }
}

/// Snapshot for the presentation layer
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: u64,
    pub state: &'static str,
    pub target_arcsec: f64,
    pub current_error: Option<PolarError>,
    pub cycle_count: u32,
    pub last_correction: Option<Correction>,
    pub failure: Option<FailureReason>,
    pub settle_warnings: u32,
    /// Further cycles expected before convergence
    pub estimated_iterations: u32,
    pub started_at: Option<DateTime<Utc>>,
}

/// Published on every notable step of a session
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlignmentEvent {
    StateChanged {
        session_id: u64,
        state: SessionState,
    },
    Measured {
        session_id: u64,
        cycle: u32,
        error: PolarError,
    },
    Corrected {
        session_id: u64,
        correction: Correction,
    },
    SolveRetry {
        session_id: u64,
        attempt: u32,
        reason: String,
    },
    SettleTimeout {
        session_id: u64,
        axis: Axis,
    },
}
