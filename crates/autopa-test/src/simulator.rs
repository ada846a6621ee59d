//! Simulated polar-alignment rig
//!
//! A mount with a true polar misalignment. Jogs move the misalignment by
//! `gain * step` (or `-gain * step` when the azimuth wiring is reversed),
//! and solves report it with Gaussian noise. Mount and solver share state,
//! so the controller closes a real loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tokio::time::{sleep, Instant};
use tracing::debug;

use autopa_core::units::arcsec_to_arcmin;
use autopa_core::{
    Axis, ControlError, EquatorialPosition, MountAdapter, MountError, SolveAdapter, SolveFailure,
    SolveResult,
};
use autopa_runtime::{mount_handle, AutoAlignController, ControllerConfig, SessionStatus};

use crate::Scene;

/// Rig behaviour
#[derive(Clone, Debug)]
pub struct RigConfig {
    pub scene: Scene,
    /// Initial misalignment in arcminutes
    pub initial_az_arcmin: f64,
    pub initial_alt_arcmin: f64,
    /// Fraction of a commanded jog that actually happens
    pub gain: f64,
    /// Azimuth motor wired backwards
    pub reversed_azimuth: bool,
    /// Solve noise, one sigma, in arcseconds per axis
    pub noise_arcsec: f64,
    /// Probability that a solve finds no stars
    pub solve_failure_rate: f64,
    /// Axis speed during a jog
    pub slew_rate_arcmin_per_sec: f64,
    /// Exposure + solve duration
    pub solve_time: Duration,
    pub seed: u64,
}

impl Default for RigConfig {
    fn default() -> Self {
        RigConfig {
            scene: Scene::default(),
            initial_az_arcmin: 25.0,
            initial_alt_arcmin: -18.0,
            gain: 1.0,
            reversed_azimuth: false,
            noise_arcsec: 2.0,
            solve_failure_rate: 0.0,
            slew_rate_arcmin_per_sec: 10.0,
            solve_time: Duration::from_secs(4),
            seed: 42,
        }
    }
}

impl RigConfig {
    /// Loose mechanics, cloudy sky
    pub fn sloppy() -> Self {
        RigConfig {
            gain: 0.7,
            noise_arcsec: 6.0,
            solve_failure_rate: 0.2,
            slew_rate_arcmin_per_sec: 3.0,
            ..Default::default()
        }
    }

    /// Azimuth motor moves the wrong way; alignment cannot converge
    pub fn miswired() -> Self {
        RigConfig {
            reversed_azimuth: true,
            ..Default::default()
        }
    }
}

/// Counters for a rig run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RigStats {
    pub jogs: u32,
    pub solves: u32,
    pub failed_solves: u32,
}

struct RigState {
    az_arcmin: f64,
    alt_arcmin: f64,
    moving_until: [Option<Instant>; 2],
    rng: StdRng,
    /// Per-axis solve noise in arcminutes; `None` for a noiseless rig
    noise: Option<Normal<f64>>,
    started: Instant,
    stats: RigStats,
}

impl RigState {
    fn noise_sample(&mut self) -> f64 {
        match self.noise {
            Some(normal) => normal.sample(&mut self.rng),
            None => 0.0,
        }
    }
}

/// Mount + solver pair sharing one physical misalignment
#[derive(Clone)]
pub struct SimulatedRig {
    config: Arc<RigConfig>,
    state: Arc<Mutex<RigState>>,
}

impl SimulatedRig {
    pub fn new(config: RigConfig) -> Self {
        let state = RigState {
            az_arcmin: config.initial_az_arcmin,
            alt_arcmin: config.initial_alt_arcmin,
            moving_until: [None; 2],
            rng: StdRng::seed_from_u64(config.seed),
            noise: Normal::new(0.0, arcsec_to_arcmin(config.noise_arcsec))
                .ok()
                .filter(|_| config.noise_arcsec > 0.0),
            started: Instant::now(),
            stats: RigStats::default(),
        };
        SimulatedRig {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn mount(&self) -> SimMount {
        SimMount {
            rig: self.clone(),
            connected: true,
        }
    }

    pub fn solver(&self) -> SimSolver {
        SimSolver { rig: self.clone() }
    }

    /// Actual misalignment (az, alt) in arcminutes
    pub fn true_error(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.az_arcmin, state.alt_arcmin)
    }

    /// Actual misalignment magnitude in arcseconds
    pub fn true_total_arcsec(&self) -> f64 {
        let (az, alt) = self.true_error();
        az.hypot(alt) * 60.0
    }

    pub fn stats(&self) -> RigStats {
        self.state.lock().stats.clone()
    }
}

fn slot(axis: Axis) -> usize {
    match axis {
        Axis::Azimuth => 0,
        Axis::Altitude => 1,
    }
}

/// Mount half of a [`SimulatedRig`]
pub struct SimMount {
    rig: SimulatedRig,
    connected: bool,
}

impl SimMount {
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    fn apply_jog(&self, axis: Axis, arcminutes: f64) -> Result<(), MountError> {
        if !self.connected {
            return Err(MountError::NotConnected);
        }

        let config = &self.rig.config;
        let mut state = self.rig.state.lock();
        let moved = arcminutes * config.gain;
        match axis {
            Axis::Azimuth if config.reversed_azimuth => state.az_arcmin -= moved,
            Axis::Azimuth => state.az_arcmin += moved,
            Axis::Altitude => state.alt_arcmin += moved,
        }

        let travel = Duration::from_secs_f64(arcminutes.abs() / config.slew_rate_arcmin_per_sec);
        state.moving_until[slot(axis)] = Some(Instant::now() + travel);
        state.stats.jogs += 1;

        debug!(
            "sim {} jog {:+.2}', misalignment now az={:+.2}' alt={:+.2}'",
            axis, arcminutes, state.az_arcmin, state.alt_arcmin
        );
        Ok(())
    }
}

#[async_trait]
impl MountAdapter for SimMount {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn jog_azimuth(&mut self, arcminutes: f64) -> Result<(), MountError> {
        self.apply_jog(Axis::Azimuth, arcminutes)
    }

    async fn jog_altitude(&mut self, arcminutes: f64) -> Result<(), MountError> {
        self.apply_jog(Axis::Altitude, arcminutes)
    }

    async fn position(&mut self) -> Result<EquatorialPosition, MountError> {
        if !self.connected {
            return Err(MountError::NotConnected);
        }
        Ok(self.rig.config.scene.reported)
    }

    async fn is_slewing(&mut self, axis: Axis) -> Result<bool, MountError> {
        let state = self.rig.state.lock();
        Ok(state.moving_until[slot(axis)].is_some_and(|until| Instant::now() < until))
    }
}

/// Solver half of a [`SimulatedRig`]
pub struct SimSolver {
    rig: SimulatedRig,
}

#[async_trait]
impl SolveAdapter for SimSolver {
    async fn capture_and_solve(&self) -> Result<SolveResult, SolveFailure> {
        let config = Arc::clone(&self.rig.config);
        sleep(config.solve_time).await;

        let (az, alt, elapsed) = {
            let mut state = self.rig.state.lock();
            state.stats.solves += 1;

            if state.rng.gen_bool(config.solve_failure_rate.clamp(0.0, 1.0)) {
                state.stats.failed_solves += 1;
                return Err(SolveFailure::NoStarsDetected);
            }

            let az = state.az_arcmin + state.noise_sample();
            let alt = state.alt_arcmin + state.noise_sample();
            (az, alt, state.started.elapsed())
        };

        let elapsed = chrono::Duration::from_std(elapsed)
            .map_err(|e| SolveFailure::InvalidOutput(e.to_string()))?;
        config
            .scene
            .solve_for(az, alt, config.scene.epoch + elapsed)
    }
}

/// Outcome of [`run_rig`]
#[derive(Clone, Debug)]
pub struct RigReport {
    pub status: SessionStatus,
    pub stats: RigStats,
    /// Actual misalignment after the session, in arcseconds
    pub true_total_arcsec: f64,
}

/// Run one alignment session against a fresh rig
pub async fn run_rig(
    rig_config: RigConfig,
    controller_config: ControllerConfig,
    target_arcsec: f64,
) -> Result<RigReport, ControlError> {
    let rig = SimulatedRig::new(rig_config);
    let controller = AutoAlignController::new(
        mount_handle(rig.mount()),
        Arc::new(rig.solver()),
        controller_config,
    )?;

    controller.start(target_arcsec).await?;
    let status = controller.wait_finished().await;

    Ok(RigReport {
        status,
        stats: rig.stats(),
        true_total_arcsec: rig.true_total_arcsec(),
    })
}
