//! autopa Mount - LX200 mount adapter
//!
//! - Meade LX200 command encoding with the OpenAstroTracker AZ/ALT extensions
//! - Reply framing and position/status parsing
//! - [`Lx200Mount`], a [`MountAdapter`] over any async byte stream
//!
//! [`MountAdapter`]: autopa_core::MountAdapter

pub mod lx200;
pub mod mount;

pub use lx200::*;
pub use mount::*;
