//! sim-align
//!
//! - `sim-align simulate`: align a simulated rig (no hardware)
//! - `sim-align align`: align an OpenAstroTracker over LX200/TCP, solving the
//!   newest frame a camera process writes into a capture directory
//!
//! Every session event is printed as one JSON line on stdout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use autopa_core::{AutopaResult, MountAdapter, SolveAdapter};
use autopa_mount::{Lx200Config, Lx200Mount};
use autopa_runtime::{
    init_tracing, mount_handle, AutoAlignController, ControllerConfig, LoggingConfig,
    SessionStatus,
};
use autopa_solver::{
    AstapConfig, AstapSolver, AstrometryConfig, AstrometrySolver, CaptureSolver, LatestFileSource,
};
use autopa_test::{RigConfig, SimulatedRig};

#[derive(Parser)]
#[command(name = "sim-align")]
#[command(version)]
#[command(about = "Automatic polar alignment")]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Controller configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target accuracy in arcseconds
    #[arg(long)]
    target: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Rig {
    Good,
    Sloppy,
    Miswired,
}

#[derive(Clone, Copy, ValueEnum)]
enum Solver {
    Astap,
    Astrometry,
}

#[derive(Subcommand)]
enum Commands {
    /// Align a simulated rig
    Simulate {
        #[arg(long, value_enum, default_value = "good")]
        rig: Rig,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Initial misalignment in arcminutes
        #[arg(long, num_args = 2, value_names = ["AZ", "ALT"], allow_negative_numbers = true)]
        misalignment: Option<Vec<f64>>,

        /// Run this many times faster than real time
        #[arg(long, default_value_t = 10.0)]
        speed: f64,
    },
    /// Align a real mount
    Align {
        /// Mount address, e.g. 192.168.4.1:4030
        #[arg(long)]
        mount: String,

        /// Directory the camera writes capture_* frames into
        #[arg(long)]
        captures: PathBuf,

        #[arg(long, value_enum, default_value = "astap")]
        solver: Solver,

        /// Solver executable; defaults to /usr/bin/astap_cli or /usr/bin/solve-field
        #[arg(long)]
        solver_path: Option<PathBuf>,

        /// Field of view hint in degrees
        #[arg(long)]
        fov: Option<f64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
        .to_string(),
        json: cli.json_logs,
    };
    if let Err(e) = init_tracing(&logging) {
        eprintln!("{}", e);
        std::process::exit(2);
    }

    match run(cli).await {
        Ok(status) if status.state == "converged" => {}
        Ok(_) => std::process::exit(1),
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> AutopaResult<SessionStatus> {
    let config = match &cli.config {
        Some(path) => ControllerConfig::from_json_file(path)?,
        None => ControllerConfig::default(),
    };
    let target = cli.target.unwrap_or(config.default_target_arcsec);

    match cli.command {
        Commands::Simulate {
            rig,
            seed,
            misalignment,
            speed,
        } => {
            let mut rig_config = match rig {
                Rig::Good => RigConfig::default(),
                Rig::Sloppy => RigConfig::sloppy(),
                Rig::Miswired => RigConfig::miswired(),
            };
            rig_config.seed = seed;
            if let Some([az, alt]) = misalignment.as_deref() {
                rig_config.initial_az_arcmin = *az;
                rig_config.initial_alt_arcmin = *alt;
            }

            let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };
            rig_config.solve_time = rig_config.solve_time.div_f64(speed);
            rig_config.slew_rate_arcmin_per_sec *= speed;

            let rig = SimulatedRig::new(rig_config);
            let status = drive(rig.mount(), rig.solver(), speed_up(config, speed), target).await?;
            info!(
                "true misalignment after session: {:.1} arcsec, {:?}",
                rig.true_total_arcsec(),
                rig.stats()
            );
            Ok(status)
        }
        Commands::Align {
            mount,
            captures,
            solver,
            solver_path,
            fov,
        } => {
            let stream = TcpStream::connect(&mount).await?;
            let mut lx200 = Lx200Mount::new(stream, Lx200Config::default());
            let product = lx200.connect().await?;
            info!("connected to {} at {}", product, mount);

            let camera = LatestFileSource::new(captures, "capture_");
            match solver {
                Solver::Astap => {
                    let mut astap = AstapConfig {
                        fov_hint_deg: fov,
                        timeout: config.solve_timeout,
                        ..Default::default()
                    };
                    if let Some(path) = solver_path {
                        astap.executable = path;
                    }
                    let solver = CaptureSolver::new(camera, AstapSolver::new(astap));
                    drive(lx200, solver, config, target).await
                }
                Solver::Astrometry => {
                    let mut astrometry = AstrometryConfig {
                        fov_hint_deg: fov,
                        timeout: config.solve_timeout,
                        ..Default::default()
                    };
                    if let Some(path) = solver_path {
                        astrometry.executable = path;
                    }
                    let solver = CaptureSolver::new(camera, AstrometrySolver::new(astrometry));
                    drive(lx200, solver, config, target).await
                }
            }
        }
    }
}

fn speed_up(mut config: ControllerConfig, speed: f64) -> ControllerConfig {
    for d in [
        &mut config.solve_retry_backoff,
        &mut config.solve_timeout,
        &mut config.jog_timeout,
        &mut config.axis_ready_timeout,
        &mut config.settle_timeout,
        &mut config.settle_poll_interval,
        &mut config.post_settle_delay,
    ] {
        *d = d.div_f64(speed).max(Duration::from_millis(1));
    }
    config
}

async fn drive<M, S>(
    mount: M,
    solver: S,
    config: ControllerConfig,
    target: f64,
) -> AutopaResult<SessionStatus>
where
    M: MountAdapter + 'static,
    S: SolveAdapter + 'static,
{
    let controller = AutoAlignController::new(mount_handle(mount), Arc::new(solver), config)?;
    let mut events = controller.subscribe();

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("cannot encode event: {}", e),
                },
                Err(RecvError::Lagged(n)) => warn!("dropped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    controller.start(target).await?;

    let status = tokio::select! {
        status = controller.wait_finished() => status,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping after the current step");
            controller.stop();
            controller.wait_finished().await
        }
    };

    drop(controller);
    let _ = printer.await;

    match serde_json::to_string(&status) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("cannot encode status: {}", e),
    }
    Ok(status)
}
