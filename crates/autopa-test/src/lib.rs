//! autopa Test Harness - Controller validation
//!
//! This crate provides:
//! - Recording mount and scripted solver mocks
//! - A simulated rig with a true polar misalignment, noise and slew times
//! - Scenario tests for the auto-align controller

pub mod mock;
pub mod simulator;
pub mod integration;

pub use mock::*;
pub use simulator::*;
pub use integration::*;
