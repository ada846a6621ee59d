//! Auto-align controller
//!
//! Drives one [`AlignmentSession`] at a time in a background task.
//!
//! Mount access: the controller holds the mount lock for a position read,
//! and for the whole of a jog + settle. It never holds it across a capture.
//!
//! Cancellation is cooperative. [`AutoAlignController::stop`] raises a flag
//! that is checked before each measurement and before each correction, so an
//! in-flight jog and its settle always complete.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use autopa_core::{
    Axis, ControlError, FailureReason, MountAdapter, MountError, Site, SolveAdapter, SolveFailure,
};
use autopa_geometry::{compute_polar_error_guarded, Correction, PolarError};

use crate::{AlignmentEvent, AlignmentSession, ControllerConfig, SessionState, SessionStatus};

/// Shared, exclusively-locked mount connection
pub type MountHandle<M> = Arc<tokio::sync::Mutex<M>>;

/// Wrap a mount for sharing with a controller
pub fn mount_handle<M: MountAdapter>(mount: M) -> MountHandle<M> {
    Arc::new(tokio::sync::Mutex::new(mount))
}

/// Why one measurement attempt produced no error vector
enum MeasureFailure {
    /// Counts against the retry budget
    Retry(String),
    /// Ends the session
    Fatal(FailureReason),
}

struct Shared<M, S> {
    mount: MountHandle<M>,
    solver: Arc<S>,
    config: ControllerConfig,
    site: Site,
    session: Mutex<AlignmentSession>,
    cancel: AtomicBool,
    next_id: AtomicU64,
    events: broadcast::Sender<AlignmentEvent>,
    /// Id of the latest session whose task has ended
    finished: watch::Sender<u64>,
}

/// Auto-align controller
pub struct AutoAlignController<M, S> {
    shared: Arc<Shared<M, S>>,
}

/// Publishes the end of a session task, including on unwind
struct FinishGuard<'a> {
    finished: &'a watch::Sender<u64>,
    id: u64,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.finished.send_replace(self.id);
    }
}

impl<M, S> AutoAlignController<M, S>
where
    M: MountAdapter + 'static,
    S: SolveAdapter + 'static,
{
    pub fn new(
        mount: MountHandle<M>,
        solver: Arc<S>,
        config: ControllerConfig,
    ) -> Result<Self, ControlError> {
        config.validate()?;
        let site = config.site()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let (finished, _) = watch::channel(0);

        Ok(AutoAlignController {
            shared: Arc::new(Shared {
                mount,
                solver,
                config,
                site,
                session: Mutex::new(AlignmentSession::idle()),
                cancel: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                events,
                finished,
            }),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    pub fn mount(&self) -> &MountHandle<M> {
        &self.shared.mount
    }

    /// Start a session; returns its id.
    ///
    /// Rejected, without touching the current session, when the target is not
    /// a positive number, a session is already running, or the mount is not
    /// connected. Allowed from Idle and from any terminal state.
    pub async fn start(&self, target_arcsec: f64) -> Result<u64, ControlError> {
        if !(target_arcsec.is_finite() && target_arcsec > 0.0) {
            return Err(ControlError::InvalidTarget(target_arcsec));
        }
        if self.shared.session.lock().state.is_active() {
            return Err(ControlError::SessionAlreadyRunning);
        }
        if !self.shared.mount.lock().await.is_connected() {
            return Err(ControlError::MountNotConnected);
        }

        let id = {
            let mut session = self.shared.session.lock();
            if session.state.is_active() {
                return Err(ControlError::SessionAlreadyRunning);
            }
            let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            self.shared.cancel.store(false, Ordering::SeqCst);
            *session = AlignmentSession::begin(id, target_arcsec);
            id
        };

        info!(session = id, target_arcsec, "alignment session started");
        self.shared.emit(AlignmentEvent::StateChanged {
            session_id: id,
            state: SessionState::Solving,
        });

        let shared = Arc::clone(&self.shared);
        tokio::spawn(
            async move { shared.run(id, target_arcsec).await }
                .instrument(info_span!("session", id)),
        );

        Ok(id)
    }

    /// Request cancellation. Returns false when no session is running.
    pub fn stop(&self) -> bool {
        let session = self.shared.session.lock();
        if !session.state.is_active() {
            return false;
        }
        info!(session = session.id, "cancellation requested");
        self.shared.cancel.store(true, Ordering::SeqCst);
        true
    }

    /// Current snapshot; never waits on the mount
    pub fn status(&self) -> SessionStatus {
        self.shared.session.lock().status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlignmentEvent> {
        self.shared.events.subscribe()
    }

    /// Wait for the background task of the latest session to end.
    ///
    /// Safe to drop and call again; each call waits on the same session.
    pub async fn wait_finished(&self) -> SessionStatus {
        let id = {
            let session = self.shared.session.lock();
            if !session.state.is_active() {
                return session.status();
            }
            session.id
        };

        let mut finished = self.shared.finished.subscribe();
        if finished.wait_for(|done| *done >= id).await.is_err() {
            error!("session {} finish signal lost", id);
        }
        self.status()
    }
}

impl<M, S> Shared<M, S>
where
    M: MountAdapter,
    S: SolveAdapter,
{
    fn emit(&self, event: AlignmentEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn transition(&self, id: u64, state: SessionState) {
        {
            let mut session = self.session.lock();
            if session.state == state {
                return;
            }
            debug!("{} -> {}", session.state, state);
            session.state = state.clone();
        }
        self.emit(AlignmentEvent::StateChanged {
            session_id: id,
            state,
        });
    }

    async fn run(&self, id: u64, target_arcsec: f64) {
        let _finish = FinishGuard {
            finished: &self.finished,
            id,
        };
        let outcome = self.drive(id, target_arcsec).await;

        match &outcome {
            SessionState::Converged => {
                let session = self.session.lock();
                info!(cycles = session.cycle_count, "alignment converged");
            }
            SessionState::Failed(reason) => error!("alignment failed: {}", reason),
            SessionState::Cancelled => info!("alignment cancelled"),
            other => warn!("session ended in non-terminal state {}", other),
        }

        self.transition(id, outcome);
    }

    /// The solve -> measure -> correct -> settle loop; returns the terminal state
    async fn drive(&self, id: u64, target_arcsec: f64) -> SessionState {
        let config = &self.config;
        let mut failures: u32 = 0;
        let mut increases: u32 = 0;
        let mut previous_total: Option<f64> = None;

        loop {
            if self.cancel_requested() {
                return SessionState::Cancelled;
            }
            self.transition(id, SessionState::Solving);

            let error = match self.measure(target_arcsec).await {
                Ok(error) => {
                    failures = 0;
                    error
                }
                Err(MeasureFailure::Fatal(reason)) => return SessionState::Failed(reason),
                Err(MeasureFailure::Retry(reason)) => {
                    failures += 1;
                    if failures > config.max_solve_retries {
                        return SessionState::Failed(FailureReason::SolveRetriesExhausted {
                            attempts: failures,
                            last: reason,
                        });
                    }
                    warn!(
                        "measurement failed ({}/{}): {}",
                        failures, config.max_solve_retries, reason
                    );
                    self.emit(AlignmentEvent::SolveRetry {
                        session_id: id,
                        attempt: failures,
                        reason,
                    });
                    sleep(config.solve_retry_backoff).await;
                    continue;
                }
            };

            let cycle = {
                let mut session = self.session.lock();
                session.cycle_count += 1;
                session.current_error = Some(error);
                session.cycle_count
            };
            info!(cycle, "measured {}", error);
            self.emit(AlignmentEvent::Measured {
                session_id: id,
                cycle,
                error,
            });

            if error.aligned() {
                return SessionState::Converged;
            }

            let total = error.total_arcsec();
            increases = match previous_total {
                Some(previous) if total > previous => increases + 1,
                _ => 0,
            };
            previous_total = Some(total);

            if increases >= config.divergence_window {
                return SessionState::Failed(FailureReason::DivergingError {
                    cycles: increases,
                    last_total_arcsec: total,
                });
            }
            if cycle >= config.max_cycles {
                return SessionState::Failed(FailureReason::MaxCyclesExceeded { cycles: cycle });
            }
            if self.cancel_requested() {
                return SessionState::Cancelled;
            }

            self.transition(id, SessionState::Correcting);
            let correction = config.correction.correction_for(&error);
            {
                let mut mount = self.mount.lock().await;
                if let Err(reason) = self.apply_correction(&mut *mount, &correction).await {
                    if let Err(e) = mount.stop().await {
                        warn!("stop after mount fault failed: {}", e);
                    }
                    return SessionState::Failed(reason);
                }
                self.session.lock().last_correction = Some(correction);
                self.emit(AlignmentEvent::Corrected {
                    session_id: id,
                    correction,
                });

                self.transition(id, SessionState::Settling);
                self.settle(id, &mut *mount).await;
            }

            if !config.post_settle_delay.is_zero() {
                sleep(config.post_settle_delay).await;
            }
        }
    }

    /// Capture + solve, then read the reported pointing and compute the error
    async fn measure(&self, target_arcsec: f64) -> Result<PolarError, MeasureFailure> {
        let solve = match timeout(self.config.solve_timeout, self.solver.capture_and_solve()).await
        {
            Ok(Ok(solve)) => solve,
            Ok(Err(failure)) => return Err(MeasureFailure::Retry(failure.to_string())),
            Err(_) => {
                let failure = SolveFailure::SolverTimeout(self.config.solve_timeout);
                return Err(MeasureFailure::Retry(failure.to_string()));
            }
        };
        debug!(position = %solve.position, "solved");

        let reported = {
            let mut mount = self.mount.lock().await;
            mount
                .position()
                .await
                .map_err(|e| MeasureFailure::Retry(format!("position read failed: {}", e)))?
        };

        let at = self.site.at(solve.observed_at);
        compute_polar_error_guarded(
            &solve.position,
            &reported,
            &at,
            target_arcsec,
            self.config.altitude_guard_deg,
        )
        .map_err(|e| MeasureFailure::Fatal(FailureReason::Geometry(e)))
    }

    /// Jog each non-zero axis, waiting for it to stop moving first
    async fn apply_correction(
        &self,
        mount: &mut M,
        correction: &Correction,
    ) -> Result<(), FailureReason> {
        for axis in Axis::ALL {
            let step = correction.component(axis);
            if step == 0.0 {
                debug!("{} step below dead band, skipped", axis);
                continue;
            }

            self.wait_axis_idle(mount, axis).await?;

            info!("jog {} {:+.2} arcmin", axis, step);
            match timeout(self.config.jog_timeout, mount.jog(axis, step)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(FailureReason::MountFault(e)),
                Err(_) => return Err(FailureReason::MountFault(MountError::MotionTimeout)),
            }
        }
        Ok(())
    }

    async fn wait_axis_idle(&self, mount: &mut M, axis: Axis) -> Result<(), FailureReason> {
        let poll = self.config.settle_poll_interval;
        let wait = async {
            loop {
                match mount.is_slewing(axis).await {
                    Ok(false) => return Ok(()),
                    Ok(true) => sleep(poll).await,
                    Err(e) => return Err(FailureReason::MountFault(e)),
                }
            }
        };

        match timeout(self.config.axis_ready_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(FailureReason::MountTimeout { axis }),
        }
    }

    /// Poll both axes until idle. A timeout is a warning, not a failure.
    async fn settle(&self, id: u64, mount: &mut M) {
        let deadline = Instant::now() + self.config.settle_timeout;
        let mut moving: Vec<Axis> = Axis::ALL.to_vec();

        loop {
            let mut still_moving = Vec::with_capacity(moving.len());
            for axis in moving {
                match mount.is_slewing(axis).await {
                    Ok(false) => {}
                    Ok(true) => still_moving.push(axis),
                    Err(e) => {
                        debug!("{} status read failed while settling: {}", axis, e);
                        still_moving.push(axis);
                    }
                }
            }

            if still_moving.is_empty() {
                debug!("settled");
                return;
            }

            if Instant::now() >= deadline {
                self.session.lock().settle_warnings += 1;
                for axis in still_moving {
                    warn!(
                        "{} axis still moving after {:?}, continuing",
                        axis, self.config.settle_timeout
                    );
                    self.emit(AlignmentEvent::SettleTimeout {
                        session_id: id,
                        axis,
                    });
                }
                return;
            }

            moving = still_moving;
            sleep(self.config.settle_poll_interval).await;
        }
    }
}
