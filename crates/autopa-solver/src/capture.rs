//! Capture + solve

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

use autopa_core::{SolveAdapter, SolveFailure, SolveResult};

use crate::{AstapSolver, PlateSolver};

/// A frame written to disk by the camera
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedFrame {
    pub path: PathBuf,
    /// Exposure instant
    pub captured_at: DateTime<Utc>,
}

/// Camera contract
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Take (or fetch) one frame
    async fn capture(&self) -> Result<CapturedFrame, SolveFailure>;
}

/// Picks the newest matching file from a capture directory.
///
/// For setups where a separate camera process drops frames such as
/// `capture_0001.png` into a folder. A frame is handed out once; the next
/// capture waits up to the frame timeout for a newer one.
#[derive(Debug)]
pub struct LatestFileSource {
    dir: PathBuf,
    prefix: String,
    frame_timeout: Duration,
    poll_interval: Duration,
    /// Last frame handed out, with its modification time
    consumed: Mutex<Option<(SystemTime, PathBuf)>>,
}

impl LatestFileSource {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        LatestFileSource {
            dir: dir.into(),
            prefix: prefix.into(),
            frame_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            consumed: Mutex::new(None),
        }
    }

    /// How long to wait for a new frame, and how often to look
    pub fn with_wait(mut self, frame_timeout: Duration, poll_interval: Duration) -> Self {
        self.frame_timeout = frame_timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn newest(&self) -> Result<Option<(SystemTime, PathBuf)>, SolveFailure> {
        let failed = |e: std::io::Error| {
            SolveFailure::CaptureFailed(format!("{}: {}", self.dir.display(), e))
        };

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(failed)?;
        let mut newest: Option<(SystemTime, PathBuf)> = None;

        while let Some(entry) = entries.next_entry().await.map_err(failed)? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&self.prefix) {
                continue;
            }
            let meta = entry.metadata().await.map_err(failed)?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().map_err(failed)?;
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, entry.path()));
            }
        }
        Ok(newest)
    }
}

#[async_trait]
impl ImageSource for LatestFileSource {
    async fn capture(&self) -> Result<CapturedFrame, SolveFailure> {
        let deadline = Instant::now() + self.frame_timeout;

        loop {
            if let Some(frame) = self.newest().await? {
                let mut consumed = self.consumed.lock();
                if consumed.as_ref() != Some(&frame) {
                    let (modified, path) = frame.clone();
                    *consumed = Some(frame);
                    debug!(path = %path.display(), "using latest frame");
                    return Ok(CapturedFrame {
                        path,
                        captured_at: DateTime::<Utc>::from(modified),
                    });
                }
            }

            if Instant::now() >= deadline {
                return Err(SolveFailure::CaptureFailed(format!(
                    "no new {}* frame in {} after {:?}",
                    self.prefix,
                    self.dir.display(),
                    self.frame_timeout
                )));
            }
            sleep(self.poll_interval).await;
        }
    }
}

/// Capture a frame, then plate-solve it
pub struct CaptureSolver<C, P = AstapSolver> {
    camera: C,
    solver: P,
}

impl<C: ImageSource, P: PlateSolver> CaptureSolver<C, P> {
    pub fn new(camera: C, solver: P) -> Self {
        CaptureSolver { camera, solver }
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn solver(&self) -> &P {
        &self.solver
    }
}

#[async_trait]
impl<C: ImageSource, P: PlateSolver> SolveAdapter for CaptureSolver<C, P> {
    async fn capture_and_solve(&self) -> Result<SolveResult, SolveFailure> {
        let frame = self.camera.capture().await?;
        self.solver
            .solve_file(&frame.path, frame.captured_at, None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::AstapConfig;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("autopa-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_latest_file_source_picks_newest() {
        let dir = scratch_dir("latest");
        std::fs::write(dir.join("capture_0001.png"), b"a").unwrap();
        std::fs::write(dir.join("capture_0002.png"), b"b").unwrap();
        std::fs::File::options()
            .write(true)
            .open(dir.join("capture_0001.png"))
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();
        std::fs::write(dir.join("notes.txt"), b"c").unwrap();

        let frame = LatestFileSource::new(&dir, "capture_").capture().await.unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(frame.path.file_name().unwrap(), "capture_0002.png");
    }

    #[tokio::test]
    async fn test_latest_file_source_empty() {
        let dir = scratch_dir("empty");
        let result = LatestFileSource::new(&dir, "capture_")
            .with_wait(Duration::from_millis(50), Duration::from_millis(10))
            .capture()
            .await;
        std::fs::remove_dir_all(&dir).ok();

        assert!(matches!(result, Err(SolveFailure::CaptureFailed(_))));
    }

    #[tokio::test]
    async fn test_latest_file_source_hands_out_each_frame_once() {
        let dir = scratch_dir("once");
        std::fs::write(dir.join("capture_0001.png"), b"a").unwrap();
        std::fs::File::options()
            .write(true)
            .open(dir.join("capture_0001.png"))
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();

        let source = LatestFileSource::new(&dir, "capture_")
            .with_wait(Duration::from_millis(100), Duration::from_millis(10));
        let first = source.capture().await.unwrap();
        let again = source.capture().await;

        std::fs::write(dir.join("capture_0002.png"), b"b").unwrap();
        let second = source.capture().await;
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(first.path.file_name().unwrap(), "capture_0001.png");
        assert!(matches!(again, Err(SolveFailure::CaptureFailed(_))));
        assert_eq!(second.unwrap().path.file_name().unwrap(), "capture_0002.png");
    }

    #[tokio::test]
    async fn test_latest_file_source_waits_for_next_frame() {
        let dir = scratch_dir("wait");
        std::fs::write(dir.join("capture_0001.png"), b"a").unwrap();
        std::fs::File::options()
            .write(true)
            .open(dir.join("capture_0001.png"))
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();

        let source = LatestFileSource::new(&dir, "capture_")
            .with_wait(Duration::from_secs(5), Duration::from_millis(10));
        source.capture().await.unwrap();

        let writer_dir = dir.clone();
        let writer = tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            std::fs::write(writer_dir.join("capture_0002.png"), b"b").unwrap();
        });
        let frame = source.capture().await;
        writer.await.unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(frame.unwrap().path.file_name().unwrap(), "capture_0002.png");
    }

    struct FailingCamera;

    #[async_trait]
    impl ImageSource for FailingCamera {
        async fn capture(&self) -> Result<CapturedFrame, SolveFailure> {
            Err(SolveFailure::CaptureFailed("camera offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_capture_failure_propagates() {
        let solver = CaptureSolver::new(FailingCamera, AstapSolver::new(AstapConfig::default()));
        assert_eq!(
            solver.capture_and_solve().await,
            Err(SolveFailure::CaptureFailed("camera offline".to_string()))
        );
    }
}
