//! Contracts for the external collaborators driven by the controller
//!
//! Mount motion and capture+solve are implemented outside the core. The
//! controller only ever exchanges arcminutes with a mount.

use async_trait::async_trait;

use crate::{Axis, EquatorialPosition, MountError, SolveFailure, SolveResult};

/// Mount motion primitives used for polar alignment.
///
/// Sign convention: a positive azimuth jog rotates the mount base east
/// (increasing azimuth), a positive altitude jog raises the polar axis.
/// Adapters translate this into whatever their firmware expects.
///
/// A mount is a shared resource per physical connection. Callers must hold
/// it exclusively for the duration of a jog and its settle.
#[async_trait]
pub trait MountAdapter: Send + Sync {
    /// Whether the connection to the mount is established
    fn is_connected(&self) -> bool;

    /// Issue a bounded azimuth adjustment
    async fn jog_azimuth(&mut self, arcminutes: f64) -> Result<(), MountError>;

    /// Issue a bounded altitude adjustment
    async fn jog_altitude(&mut self, arcminutes: f64) -> Result<(), MountError>;

    /// Current reported pointing
    async fn position(&mut self) -> Result<EquatorialPosition, MountError>;

    /// Whether a prior jog on `axis` is still in motion
    async fn is_slewing(&mut self, axis: Axis) -> Result<bool, MountError>;

    /// Halt all motion. Used when a session ends on a mount fault.
    async fn stop(&mut self) -> Result<(), MountError> {
        Ok(())
    }

    async fn jog(&mut self, axis: Axis, arcminutes: f64) -> Result<(), MountError> {
        match axis {
            Axis::Azimuth => self.jog_azimuth(arcminutes).await,
            Axis::Altitude => self.jog_altitude(arcminutes).await,
        }
    }
}

/// Capture an image and plate-solve it
#[async_trait]
pub trait SolveAdapter: Send + Sync {
    async fn capture_and_solve(&self) -> Result<SolveResult, SolveFailure>;
}
