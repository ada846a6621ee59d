//! autopa Runtime - Auto-align controller
//!
//! One session at a time per mount connection. Each cycle:
//! 1. Solving: capture + plate solve, read the mount's reported pointing
//! 2. Measure the polar error at the exposure instant
//! 3. Converged, diverging or over the cycle cap ends the session
//! 4. Correcting: damped jog per axis, never while that axis is moving
//! 5. Settling: wait for both axes to stop, then loop
//!
//! The loop runs in a background task; status reads never touch the mount.

pub mod config;
pub mod session;
pub mod controller;
pub mod observability;

pub use config::*;
pub use session::*;
pub use controller::*;
pub use observability::*;
