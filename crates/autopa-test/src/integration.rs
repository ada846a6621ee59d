//! Controller scenarios against the mock and simulated adapters

use std::sync::Arc;
use std::time::Duration;

use autopa_core::ControlError;
use autopa_runtime::{
    mount_handle, AlignmentEvent, AutoAlignController, ControllerConfig, SessionState,
    SessionStatus,
};

use crate::{
    MockMountConfig, MountCall, MountLog, RecordingMount, Scene, ScriptStep, ScriptedSolver,
};

/// Controller wired to a [`RecordingMount`] and a [`ScriptedSolver`]
pub struct ScriptHarness {
    pub controller: AutoAlignController<RecordingMount, ScriptedSolver>,
    pub solver: Arc<ScriptedSolver>,
    pub log: MountLog,
}

impl ScriptHarness {
    pub fn new(
        script: Vec<ScriptStep>,
        mount_config: MockMountConfig,
        config: ControllerConfig,
    ) -> Result<Self, ControlError> {
        let scene = Scene::default();
        let mount = RecordingMount::new(&scene, mount_config);
        let log = mount.log();
        let solver = Arc::new(ScriptedSolver::new(scene, script));
        let controller =
            AutoAlignController::new(mount_handle(mount), Arc::clone(&solver), config)?;

        Ok(ScriptHarness {
            controller,
            solver,
            log,
        })
    }

    /// Start a session and wait for it to end
    pub async fn run(&self, target_arcsec: f64) -> Result<SessionStatus, ControlError> {
        self.controller.start(target_arcsec).await?;
        Ok(self.controller.wait_finished().await)
    }

    /// Every jog was preceded by an idle report for its axis, and no jog
    /// landed while that axis was moving
    pub fn jogs_were_serialized(&self) -> bool {
        if self.log.overlapping_jogs() > 0 {
            return false;
        }

        let calls = self.log.calls();
        calls.iter().enumerate().all(|(i, call)| match call.call {
            MountCall::Jog { axis, .. } => calls[..i].iter().rev().find_map(|c| match c.call {
                MountCall::IsSlewing { axis: a, moving } if a == axis => Some(!moving),
                _ => None,
            }) == Some(true),
            _ => true,
        })
    }
}

/// Short waits so scenarios stay quick even without paused time
pub fn scenario_config() -> ControllerConfig {
    ControllerConfig {
        solve_retry_backoff: Duration::from_secs(1),
        settle_timeout: Duration::from_secs(10),
        settle_poll_interval: Duration::from_millis(250),
        post_settle_delay: Duration::from_millis(500),
        ..Default::default()
    }
}

/// Wait until the controller publishes `state`
pub async fn wait_for_state(
    events: &mut tokio::sync::broadcast::Receiver<AlignmentEvent>,
    state: SessionState,
) -> bool {
    while let Ok(event) = events.recv().await {
        if let AlignmentEvent::StateChanged { state: s, .. } = event {
            if s == state {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopa_core::{Axis, FailureReason, MountError, SolveFailure};

    use crate::{run_rig, RigConfig};

    fn harness(script: Vec<ScriptStep>) -> ScriptHarness {
        ScriptHarness::new(script, MockMountConfig::default(), scenario_config()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_at_third_cycle() {
        let h = harness(vec![
            ScriptStep::total(250.0),
            ScriptStep::total(40.0),
            ScriptStep::total(25.0),
        ]);
        let status = h.run(30.0).await.unwrap();

        assert_eq!(status.state, "converged");
        assert_eq!(status.cycle_count, 3);
        assert!((status.current_error.unwrap().total_arcsec() - 25.0).abs() < 0.01);
        assert_eq!(h.solver.attempts(), 3);

        // Two corrections, both axes each
        let jogs = h.log.jogs();
        assert_eq!(jogs.len(), 4);
        let first_az = 250.0 / 60.0 / std::f64::consts::SQRT_2;
        assert_eq!(jogs[0].1, Axis::Azimuth);
        assert!((jogs[0].2 + 0.8 * first_az).abs() < 1e-3);
        assert!(h.jogs_were_serialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_diverging_error_stops_jogs() {
        let h = harness(vec![
            ScriptStep::total(100.0),
            ScriptStep::total(150.0),
            ScriptStep::total(200.0),
            ScriptStep::total(250.0),
            ScriptStep::total(300.0),
        ]);
        let status = h.run(30.0).await.unwrap();

        assert_eq!(status.state, "failed");
        assert!(matches!(
            status.failure,
            Some(FailureReason::DivergingError { cycles: 3, .. })
        ));
        assert_eq!(status.cycle_count, 4);
        // Corrections after the first three measurements only
        assert_eq!(h.log.jog_count(), 6);
        assert_eq!(h.solver.remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected() {
        let h = harness(vec![
            ScriptStep::total(600.0),
            ScriptStep::total(200.0),
            ScriptStep::total(10.0),
        ]);
        let mut events = h.controller.subscribe();
        h.controller.start(30.0).await.unwrap();
        assert!(wait_for_state(&mut events, SessionState::Settling).await);

        let before = h.controller.status();
        assert_eq!(
            h.controller.start(30.0).await,
            Err(ControlError::SessionAlreadyRunning)
        );
        let after = h.controller.status();
        assert_eq!(before.cycle_count, after.cycle_count);
        assert_eq!(before.session_id, after.session_id);

        let status = h.controller.wait_finished().await;
        assert_eq!(status.state, "converged");
        assert_eq!(status.session_id, before.session_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_jog_while_axis_moving() {
        // Axes keep moving long after the settle timeout
        let mount = MockMountConfig {
            slew_time: Duration::from_secs(20),
            ..Default::default()
        };
        let config = ControllerConfig {
            settle_timeout: Duration::from_secs(5),
            ..scenario_config()
        };
        let h = ScriptHarness::new(
            vec![
                ScriptStep::total(900.0),
                ScriptStep::total(500.0),
                ScriptStep::total(200.0),
                ScriptStep::total(20.0),
            ],
            mount,
            config,
        )
        .unwrap();
        let status = h.run(30.0).await.unwrap();

        assert_eq!(status.state, "converged");
        assert_eq!(h.log.jog_count(), 6);
        assert_eq!(h.log.overlapping_jogs(), 0);
        assert!(h.jogs_were_serialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_timeout_is_a_warning() {
        let mount = MockMountConfig {
            slew_time: Duration::from_secs(30),
            ..Default::default()
        };
        let config = ControllerConfig {
            settle_timeout: Duration::from_secs(3),
            ..scenario_config()
        };
        let h = ScriptHarness::new(
            vec![ScriptStep::total(300.0), ScriptStep::total(12.0)],
            mount,
            config,
        )
        .unwrap();
        let mut events = h.controller.subscribe();
        let status = h.run(30.0).await.unwrap();

        assert_eq!(status.state, "converged");
        assert_eq!(status.settle_warnings, 1);

        let mut warned = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AlignmentEvent::SettleTimeout { axis, .. } = event {
                warned.push(axis);
            }
        }
        assert_eq!(warned, vec![Axis::Azimuth, Axis::Altitude]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_settle() {
        let mount = MockMountConfig {
            slew_time: Duration::from_secs(8),
            ..Default::default()
        };
        let h = ScriptHarness::new(
            vec![ScriptStep::total(600.0), ScriptStep::total(10.0)],
            mount,
            scenario_config(),
        )
        .unwrap();
        let mut events = h.controller.subscribe();
        h.controller.start(30.0).await.unwrap();
        assert!(wait_for_state(&mut events, SessionState::Settling).await);

        assert!(h.controller.stop());
        let status = h.controller.wait_finished().await;

        assert_eq!(status.state, "cancelled");
        assert_eq!(status.cycle_count, 1);
        assert_eq!(h.log.jog_count(), 2);
        // No capture after the cancel
        assert_eq!(h.solver.attempts(), 1);

        // The in-flight motion was allowed to finish
        let calls = h.log.calls();
        let last_status = calls.iter().rev().find_map(|c| match c.call {
            MountCall::IsSlewing { moving, .. } => Some(moving),
            _ => None,
        });
        assert_eq!(last_status, Some(false));
        assert!(!h.controller.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_solve_retries_exhausted() {
        let h = harness(vec![
            ScriptStep::Fail(SolveFailure::NoStarsDetected),
            ScriptStep::Fail(SolveFailure::NoStarsDetected),
            ScriptStep::Fail(SolveFailure::SolverNotFound("astap_cli".to_string())),
            ScriptStep::Fail(SolveFailure::NoStarsDetected),
        ]);
        let status = h.run(30.0).await.unwrap();

        assert_eq!(status.state, "failed");
        assert!(matches!(
            status.failure,
            Some(FailureReason::SolveRetriesExhausted { attempts: 4, .. })
        ));
        assert_eq!(h.solver.attempts(), 4);
        assert_eq!(h.log.jog_count(), 0);
        assert!(status.current_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_solver_times_out_and_retries() {
        let h = harness(vec![ScriptStep::Hang, ScriptStep::total(10.0)]);
        let status = h.run(30.0).await.unwrap();

        assert_eq!(status.state, "converged");
        assert_eq!(status.cycle_count, 1);
        assert_eq!(h.solver.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_read_failures_share_retry_budget() {
        let mount = MockMountConfig {
            failing_position_reads: 2,
            ..Default::default()
        };
        let h = ScriptHarness::new(
            vec![
                ScriptStep::total(100.0),
                ScriptStep::total(100.0),
                ScriptStep::total(10.0),
            ],
            mount,
            scenario_config(),
        )
        .unwrap();
        let status = h.run(30.0).await.unwrap();

        assert_eq!(status.state, "converged");
        assert_eq!(status.cycle_count, 1);
        assert_eq!(h.log.jog_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_cycles() {
        let config = ControllerConfig {
            max_cycles: 3,
            ..scenario_config()
        };
        let h = ScriptHarness::new(
            vec![
                ScriptStep::total(300.0),
                ScriptStep::total(290.0),
                ScriptStep::total(280.0),
                ScriptStep::total(10.0),
            ],
            MockMountConfig::default(),
            config,
        )
        .unwrap();
        let status = h.run(30.0).await.unwrap();

        assert_eq!(
            status.failure,
            Some(FailureReason::MaxCyclesExceeded { cycles: 3 })
        );
        assert_eq!(h.solver.remaining(), 1);
        // Last error stays visible after the failure
        assert!((status.current_error.unwrap().total_arcsec() - 280.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jog_rejection_fails_session() {
        let mount = MockMountConfig {
            jog_error: Some(MountError::CommandRejected("limit".to_string())),
            ..Default::default()
        };
        let h =
            ScriptHarness::new(vec![ScriptStep::total(300.0)], mount, scenario_config()).unwrap();
        let status = h.run(30.0).await.unwrap();

        assert_eq!(
            status.failure,
            Some(FailureReason::MountFault(MountError::CommandRejected(
                "limit".to_string()
            )))
        );
        assert_eq!(h.log.jog_count(), 1);
        let last = h.log.calls().last().map(|c| c.call.clone());
        assert_eq!(last, Some(MountCall::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_mount_rejects_start() {
        let mount = MockMountConfig {
            connected: false,
            ..Default::default()
        };
        let h = ScriptHarness::new(vec![], mount, scenario_config()).unwrap();
        assert_eq!(h.run(30.0).await, Err(ControlError::MountNotConnected));
        assert_eq!(h.controller.status().state, "idle");
        assert_eq!(h.solver.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_rig_converges() {
        let report = run_rig(RigConfig::default(), scenario_config(), 30.0)
            .await
            .unwrap();

        assert_eq!(report.status.state, "converged");
        assert!(report.status.cycle_count <= 6);
        assert!(report.true_total_arcsec < 40.0);
        assert_eq!(report.stats.failed_solves, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sloppy_rig_converges() {
        let config = ControllerConfig {
            max_solve_retries: 8,
            ..scenario_config()
        };
        let report = run_rig(RigConfig::sloppy(), config, 30.0).await.unwrap();

        assert_eq!(report.status.state, "converged");
        assert!(report.true_total_arcsec < 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_miswired_rig_diverges() {
        let report = run_rig(RigConfig::miswired(), scenario_config(), 30.0)
            .await
            .unwrap();

        assert!(matches!(
            report.status.failure,
            Some(FailureReason::DivergingError { .. })
        ));
        // One jog per axis per correction, none after the verdict
        assert_eq!(report.stats.jogs, 2 * (report.status.cycle_count - 1));
    }
}
