//! Mock adapters
//!
//! [`RecordingMount`] logs every call with its (tokio) timestamp and models
//! per-axis motion as a fixed slew time after each jog. [`ScriptedSolver`]
//! replays a list of polar errors as plate solves.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

use autopa_core::units::arcsec_to_arcmin;
use autopa_core::{
    Axis, EquatorialPosition, MountAdapter, MountError, Site, SolveAdapter, SolveFailure,
    SolveMetadata, SolveResult,
};
use autopa_geometry::offset_position;

/// Where and when the test mount is pointing
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scene {
    pub site: Site,
    /// What the mount reports; near the pole, as during polar alignment
    pub reported: EquatorialPosition,
    pub epoch: DateTime<Utc>,
}

impl Default for Scene {
    fn default() -> Self {
        Scene {
            site: Site::new(40.0, -111.0).expect("valid site"),
            reported: EquatorialPosition::new(5.0, 88.0).expect("valid position"),
            epoch: Utc
                .with_ymd_and_hms(2024, 10, 5, 3, 30, 0)
                .single()
                .expect("valid epoch"),
        }
    }
}

impl Scene {
    /// A solve for a mount carrying the given polar error (arcminutes)
    pub fn solve_for(
        &self,
        az_arcmin: f64,
        alt_arcmin: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<SolveResult, SolveFailure> {
        let at = self.site.at(observed_at);
        let position = offset_position(&self.reported, &at, az_arcmin, alt_arcmin)
            .map_err(|e| SolveFailure::InvalidOutput(e.to_string()))?;

        Ok(SolveResult::new(position, observed_at).with_metadata(SolveMetadata {
            solver: "scripted".to_string(),
            ..Default::default()
        }))
    }
}

fn slot(axis: Axis) -> usize {
    match axis {
        Axis::Azimuth => 0,
        Axis::Altitude => 1,
    }
}

/// One mount call
#[derive(Clone, Debug, PartialEq)]
pub enum MountCall {
    Jog { axis: Axis, arcminutes: f64 },
    IsSlewing { axis: Axis, moving: bool },
    Position,
    Stop,
}

#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub at: Instant,
    pub call: MountCall,
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<RecordedCall>,
    overlapping_jogs: u32,
}

/// Read side of a [`RecordingMount`], usable while the controller owns the mount
#[derive(Clone, Debug, Default)]
pub struct MountLog {
    inner: Arc<Mutex<Recorder>>,
}

impl MountLog {
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.lock().calls.clone()
    }

    /// Jogs in issue order
    pub fn jogs(&self) -> Vec<(Instant, Axis, f64)> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c.call {
                MountCall::Jog { axis, arcminutes } => Some((c.at, axis, arcminutes)),
                _ => None,
            })
            .collect()
    }

    pub fn jog_count(&self) -> usize {
        self.jogs().len()
    }

    /// Jogs issued while the same axis was still moving
    pub fn overlapping_jogs(&self) -> u32 {
        self.inner.lock().overlapping_jogs
    }

    fn record(&self, call: MountCall) {
        self.inner.lock().calls.push(RecordedCall {
            at: Instant::now(),
            call,
        });
    }
}

/// Mock mount behaviour
#[derive(Clone, Debug)]
pub struct MockMountConfig {
    pub connected: bool,
    /// How long an axis reports moving after a jog
    pub slew_time: Duration,
    /// Every jog fails with this error
    pub jog_error: Option<MountError>,
    /// Number of leading position reads that fail
    pub failing_position_reads: u32,
}

impl Default for MockMountConfig {
    fn default() -> Self {
        MockMountConfig {
            connected: true,
            slew_time: Duration::from_secs(2),
            jog_error: None,
            failing_position_reads: 0,
        }
    }
}

/// Mount that records calls and simulates per-axis motion
pub struct RecordingMount {
    config: MockMountConfig,
    reported: EquatorialPosition,
    moving_until: [Option<Instant>; 2],
    position_failures_left: u32,
    log: MountLog,
}

impl RecordingMount {
    pub fn new(scene: &Scene, config: MockMountConfig) -> Self {
        RecordingMount {
            position_failures_left: config.failing_position_reads,
            config,
            reported: scene.reported,
            moving_until: [None; 2],
            log: MountLog::default(),
        }
    }

    pub fn log(&self) -> MountLog {
        self.log.clone()
    }

    fn moving(&self, axis: Axis) -> bool {
        self.moving_until[slot(axis)].is_some_and(|until| Instant::now() < until)
    }

    fn jog_axis(&mut self, axis: Axis, arcminutes: f64) -> Result<(), MountError> {
        if !self.config.connected {
            return Err(MountError::NotConnected);
        }
        if self.moving(axis) {
            self.log.inner.lock().overlapping_jogs += 1;
        }
        self.log.record(MountCall::Jog { axis, arcminutes });

        if let Some(err) = &self.config.jog_error {
            return Err(err.clone());
        }
        self.moving_until[slot(axis)] = Some(Instant::now() + self.config.slew_time);
        Ok(())
    }
}

#[async_trait]
impl MountAdapter for RecordingMount {
    fn is_connected(&self) -> bool {
        self.config.connected
    }

    async fn jog_azimuth(&mut self, arcminutes: f64) -> Result<(), MountError> {
        self.jog_axis(Axis::Azimuth, arcminutes)
    }

    async fn jog_altitude(&mut self, arcminutes: f64) -> Result<(), MountError> {
        self.jog_axis(Axis::Altitude, arcminutes)
    }

    async fn position(&mut self) -> Result<EquatorialPosition, MountError> {
        self.log.record(MountCall::Position);
        if self.position_failures_left > 0 {
            self.position_failures_left -= 1;
            return Err(MountError::Io("serial read failed".to_string()));
        }
        Ok(self.reported)
    }

    async fn is_slewing(&mut self, axis: Axis) -> Result<bool, MountError> {
        let moving = self.moving(axis);
        self.log.record(MountCall::IsSlewing { axis, moving });
        Ok(moving)
    }

    async fn stop(&mut self) -> Result<(), MountError> {
        self.log.record(MountCall::Stop);
        self.moving_until = [None; 2];
        Ok(())
    }
}

/// One scripted solve outcome
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptStep {
    /// Solve showing this polar error in arcminutes
    Error { az_arcmin: f64, alt_arcmin: f64 },
    Fail(SolveFailure),
    /// Never returns
    Hang,
}

impl ScriptStep {
    pub fn error(az_arcmin: f64, alt_arcmin: f64) -> Self {
        ScriptStep::Error {
            az_arcmin,
            alt_arcmin,
        }
    }

    /// Error of the given total, split evenly across both axes
    pub fn total(total_arcsec: f64) -> Self {
        let component = arcsec_to_arcmin(total_arcsec) / std::f64::consts::SQRT_2;
        ScriptStep::error(component, component)
    }
}

/// Solver replaying a script; an exhausted script fails with `NoStarsDetected`
pub struct ScriptedSolver {
    scene: Scene,
    script: Mutex<VecDeque<ScriptStep>>,
    solve_time: Duration,
    attempts: AtomicU32,
}

impl ScriptedSolver {
    pub fn new(scene: Scene, script: impl IntoIterator<Item = ScriptStep>) -> Self {
        ScriptedSolver {
            scene,
            script: Mutex::new(script.into_iter().collect()),
            solve_time: Duration::from_secs(3),
            attempts: AtomicU32::new(0),
        }
    }

    /// Simulated exposure + solve duration
    pub fn with_solve_time(mut self, solve_time: Duration) -> Self {
        self.solve_time = solve_time;
        self
    }

    /// Number of capture_and_solve calls so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl SolveAdapter for ScriptedSolver {
    async fn capture_and_solve(&self) -> Result<SolveResult, SolveFailure> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(ScriptStep::Fail(SolveFailure::NoStarsDetected));

        sleep(self.solve_time).await;

        match step {
            ScriptStep::Error {
                az_arcmin,
                alt_arcmin,
            } => self.scene.solve_for(az_arcmin, alt_arcmin, self.scene.epoch),
            ScriptStep::Fail(failure) => Err(failure),
            ScriptStep::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopa_geometry::compute_polar_error;
    use proptest::prelude::*;

    #[test]
    fn test_scene_solves_reproduce_error() {
        let scene = Scene::default();
        let solve = scene.solve_for(12.0, -7.5, scene.epoch).unwrap();
        let at = scene.site.at(scene.epoch);
        let err = compute_polar_error(&solve.position, &scene.reported, &at, 60.0).unwrap();

        assert!((err.az_arcmin() - 12.0).abs() < 1e-6);
        assert!((err.alt_arcmin() + 7.5).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn test_scene_round_trips_any_small_error(az in -90.0f64..90.0, alt in -90.0f64..90.0) {
            let scene = Scene::default();
            let solve = scene.solve_for(az, alt, scene.epoch).unwrap();
            let at = scene.site.at(scene.epoch);
            let err = compute_polar_error(&solve.position, &scene.reported, &at, 60.0).unwrap();

            prop_assert!((err.az_arcmin() - az).abs() < 1e-5);
            prop_assert!((err.alt_arcmin() - alt).abs() < 1e-5);
        }
    }

    #[test]
    fn test_script_total() {
        let ScriptStep::Error {
            az_arcmin,
            alt_arcmin,
        } = ScriptStep::total(250.0)
        else {
            panic!("expected an error step");
        };
        assert!((az_arcmin.hypot(alt_arcmin) * 60.0 - 250.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_mount_motion() {
        let mut mount = RecordingMount::new(&Scene::default(), MockMountConfig::default());
        let log = mount.log();

        mount.jog_azimuth(1.0).await.unwrap();
        assert!(mount.is_slewing(Axis::Azimuth).await.unwrap());
        assert!(!mount.is_slewing(Axis::Altitude).await.unwrap());

        mount.jog_azimuth(1.0).await.unwrap();
        assert_eq!(log.overlapping_jogs(), 1);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!mount.is_slewing(Axis::Azimuth).await.unwrap());
        assert_eq!(log.jog_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_solver_exhausts() {
        let solver = ScriptedSolver::new(Scene::default(), [ScriptStep::total(100.0)]);
        assert!(solver.capture_and_solve().await.is_ok());
        assert_eq!(
            solver.capture_and_solve().await,
            Err(SolveFailure::NoStarsDetected)
        );
        assert_eq!(solver.attempts(), 2);
        assert_eq!(solver.remaining(), 0);
    }
}
