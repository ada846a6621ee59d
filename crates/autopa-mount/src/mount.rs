//! LX200 mount adapter over an async byte stream

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use autopa_core::{Axis, EquatorialPosition, MountAdapter, MountError};

use crate::lx200::{parse_dec, parse_ra, take_reply, Command, MountStatus, OAT_PRODUCT_TAG};

/// LX200 adapter configuration
#[derive(Clone, Debug)]
pub struct Lx200Config {
    /// How long to wait for a `#`-terminated reply
    pub reply_timeout: Duration,
    /// Negate azimuth jogs on the wire (OpenAstroTracker firmware convention)
    pub invert_azimuth: bool,
    /// Largest accepted jog per command, in arcminutes
    pub max_jog_arcmin: f64,
    /// Require the product name to identify OpenAstroTracker firmware
    pub require_oat: bool,
}

impl Default for Lx200Config {
    fn default() -> Self {
        Lx200Config {
            reply_timeout: Duration::from_secs(2),
            invert_azimuth: true,
            max_jog_arcmin: 120.0,
            require_oat: true,
        }
    }
}

/// LX200 mount over a serial-like stream
pub struct Lx200Mount<T> {
    stream: T,
    config: Lx200Config,
    rx: BytesMut,
    connected: bool,
    product: Option<String>,
    /// A reply timed out and may still arrive
    desynced: bool,
}

impl<T> Lx200Mount<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: T, config: Lx200Config) -> Self {
        Lx200Mount {
            stream,
            config,
            rx: BytesMut::with_capacity(64),
            connected: false,
            product: None,
            desynced: false,
        }
    }

    /// Verify the firmware by product name and mark the mount connected
    pub async fn connect(&mut self) -> Result<String, MountError> {
        if self.connected {
            warn!("mount already connected");
            return Ok(self.product.clone().unwrap_or_default());
        }

        let product = self.exchange(&Command::ProductName).await?;
        if self.config.require_oat && !product.contains(OAT_PRODUCT_TAG) {
            return Err(MountError::CommandRejected(format!(
                "unexpected product {:?}",
                product
            )));
        }

        info!(product = %product, "mount connected");
        self.connected = true;
        self.product = Some(product.clone());
        Ok(product)
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
        self.product = None;
        self.desynced = false;
        info!("mount disconnected");
    }

    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    /// Stop all motion
    pub async fn stop_all(&mut self) -> Result<(), MountError> {
        self.ensure_connected()?;
        self.send(&Command::StopAll).await
    }

    /// Full mount status
    pub async fn status(&mut self) -> Result<MountStatus, MountError> {
        self.ensure_connected()?;
        let reply = self.exchange(&Command::GetStatus).await?;
        MountStatus::parse(&reply)
    }

    fn ensure_connected(&self) -> Result<(), MountError> {
        if self.connected {
            Ok(())
        } else {
            Err(MountError::NotConnected)
        }
    }

    async fn send(&mut self, command: &Command) -> Result<(), MountError> {
        let wire = command.encode();
        debug!(command = %wire, "lx200 send");
        self.stream
            .write_all(wire.as_bytes())
            .await
            .map_err(|e| MountError::Io(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| MountError::Io(e.to_string()))
    }

    /// Send a command and wait for its reply.
    ///
    /// LX200 replies carry no correlation, so after a timeout the late reply
    /// would be taken as the answer to the next command. The stream is marked
    /// desynced and resynchronised before the next exchange.
    async fn exchange(&mut self, command: &Command) -> Result<String, MountError> {
        if self.desynced {
            self.resync().await?;
        }

        self.rx.clear();
        self.send(command).await?;

        match timeout(self.config.reply_timeout, self.read_reply()).await {
            Ok(reply) => {
                let reply = reply?;
                debug!(reply = %reply, "lx200 reply");
                Ok(reply)
            }
            Err(_) => {
                warn!(command = %command.encode(), "no reply from mount, stream desynced");
                self.desynced = true;
                Err(MountError::MotionTimeout)
            }
        }
    }

    /// Send `:GVP#` and discard replies until the product name comes back
    async fn resync(&mut self) -> Result<(), MountError> {
        let Some(product) = self.product.clone() else {
            // Not past the handshake yet; nothing to match against
            self.rx.clear();
            self.desynced = false;
            return Ok(());
        };

        self.rx.clear();
        self.send(&Command::ProductName).await?;

        let reply_timeout = self.config.reply_timeout;
        let wait = async {
            loop {
                let reply = self.read_reply().await?;
                if reply == product {
                    return Ok(());
                }
                debug!(reply = %reply, "discarding stale reply");
            }
        };

        match timeout(reply_timeout, wait).await {
            Ok(Ok(())) => {
                info!("mount stream resynchronised");
                self.desynced = false;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MountError::MotionTimeout),
        }
    }

    async fn read_reply(&mut self) -> Result<String, MountError> {
        loop {
            if let Some(reply) = take_reply(&mut self.rx)? {
                return Ok(reply);
            }

            let n = self
                .stream
                .read_buf(&mut self.rx)
                .await
                .map_err(|e| MountError::Io(e.to_string()))?;
            if n == 0 {
                self.connected = false;
                return Err(MountError::Io("connection closed".to_string()));
            }
        }
    }

    async fn move_axis(&mut self, axis: Axis, arcminutes: f64) -> Result<(), MountError> {
        self.ensure_connected()?;

        if !arcminutes.is_finite() || arcminutes.abs() > self.config.max_jog_arcmin {
            return Err(MountError::CommandRejected(format!(
                "{} jog of {} arcmin exceeds {} arcmin",
                axis, arcminutes, self.config.max_jog_arcmin
            )));
        }

        let wire_arcmin = match axis {
            Axis::Azimuth if self.config.invert_azimuth => -arcminutes,
            _ => arcminutes,
        };

        info!("moving {} by {:+.2} arcmin", axis, arcminutes);
        self.send(&Command::jog(axis, wire_arcmin)).await
    }
}

#[async_trait]
impl<T> MountAdapter for Lx200Mount<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn jog_azimuth(&mut self, arcminutes: f64) -> Result<(), MountError> {
        self.move_axis(Axis::Azimuth, arcminutes).await
    }

    async fn jog_altitude(&mut self, arcminutes: f64) -> Result<(), MountError> {
        self.move_axis(Axis::Altitude, arcminutes).await
    }

    async fn position(&mut self) -> Result<EquatorialPosition, MountError> {
        self.ensure_connected()?;
        let ra = parse_ra(&self.exchange(&Command::GetRa).await?)?;
        let dec = parse_dec(&self.exchange(&Command::GetDec).await?)?;
        EquatorialPosition::new(ra, dec).map_err(|e| MountError::Protocol(e.to_string()))
    }

    async fn is_slewing(&mut self, axis: Axis) -> Result<bool, MountError> {
        Ok(self.status().await?.is_moving(axis))
    }

    async fn stop(&mut self) -> Result<(), MountError> {
        self.stop_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::io::{duplex, DuplexStream};

    type Log = Mutex<Vec<String>>;

    /// Answer commands the way OpenAstroTracker firmware does
    fn spawn_firmware(io: DuplexStream, product: &'static str, status: &'static str) -> Arc<Log> {
        spawn_slow_firmware(io, product, status, Duration::ZERO)
    }

    /// Firmware whose first `:GX#` reply comes `first_status_delay` late
    fn spawn_slow_firmware(
        mut io: DuplexStream,
        product: &'static str,
        status: &'static str,
        first_status_delay: Duration,
    ) -> Arc<Log> {
        let log: Arc<Log> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&log);
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut byte = [0u8; 1];
            let mut delay = Some(first_status_delay).filter(|d| !d.is_zero());
            loop {
                match io.read(&mut byte).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => buf.push(byte[0]),
                }
                if byte[0] != b'#' {
                    continue;
                }
                let cmd = String::from_utf8_lossy(&buf).to_string();
                buf.clear();
                seen.lock().push(cmd.clone());
                let reply = match cmd.as_str() {
                    ":GVP#" => Some(format!("{}#", product)),
                    ":GR#" => Some("02:31:49#".to_string()),
                    ":GD#" => Some("+89*15:51#".to_string()),
                    ":GX#" => {
                        if let Some(delay) = delay.take() {
                            tokio::time::sleep(delay).await;
                        }
                        Some(format!("{}#", status))
                    }
                    _ => None,
                };
                if let Some(reply) = reply {
                    if io.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
        });
        log
    }

    async fn connected_mount(status: &'static str) -> (Lx200Mount<DuplexStream>, Arc<Log>) {
        let (client, server) = duplex(256);
        let log = spawn_firmware(server, "OpenAstroTracker", status);
        let mut mount = Lx200Mount::new(client, Lx200Config::default());
        mount.connect().await.unwrap();
        (mount, log)
    }

    #[tokio::test]
    async fn test_connect_handshake() {
        let (mount, _log) = connected_mount("Tracking,--T--,0,0").await;
        assert!(mount.is_connected());
        assert_eq!(mount.product(), Some("OpenAstroTracker"));
    }

    #[tokio::test]
    async fn test_connect_rejects_foreign_firmware() {
        let (client, server) = duplex(256);
        let _log = spawn_firmware(server, "LX200 Classic", "Tracking,--T--");
        let mut mount = Lx200Mount::new(client, Lx200Config::default());

        assert!(matches!(mount.connect().await, Err(MountError::CommandRejected(_))));
        assert!(!mount.is_connected());
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let (client, _server) = duplex(256);
        let mut mount = Lx200Mount::new(client, Lx200Config::default());

        assert_eq!(mount.jog_azimuth(1.0).await, Err(MountError::NotConnected));
        assert_eq!(mount.position().await.unwrap_err(), MountError::NotConnected);
    }

    #[tokio::test]
    async fn test_position() {
        let (mut mount, _log) = connected_mount("Tracking,--T--,0,0").await;
        let pos = mount.position().await.unwrap();

        assert!((pos.ra_hours() - (2.0 + 31.0 / 60.0 + 49.0 / 3600.0)).abs() < 1e-9);
        assert!((pos.dec_degrees() - (89.0 + 15.0 / 60.0 + 51.0 / 3600.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_jog_inverts_azimuth_on_wire() {
        let (mut mount, log) = connected_mount("Tracking,--T--,0,0").await;
        mount.jog_azimuth(2.5).await.unwrap();
        mount.jog_altitude(-1.25).await.unwrap();
        // Round trip so the firmware has consumed both jogs
        mount.status().await.unwrap();

        let commands = log.lock().clone();
        assert!(commands.contains(&":MAZ-2.50#".to_string()));
        assert!(commands.contains(&":MAL-1.25#".to_string()));
    }

    #[tokio::test]
    async fn test_jog_bounded() {
        let (mut mount, _log) = connected_mount("Tracking,--T--,0,0").await;
        assert!(matches!(
            mount.jog_altitude(500.0).await,
            Err(MountError::CommandRejected(_))
        ));
        assert!(matches!(
            mount.jog(Axis::Azimuth, f64::NAN).await,
            Err(MountError::CommandRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_is_slewing_per_axis() {
        let (mut mount, _log) = connected_mount("Adjusting,--TZ-,0,0").await;
        assert!(mount.is_slewing(Axis::Azimuth).await.unwrap());
        assert!(!mount.is_slewing(Axis::Altitude).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_does_not_shift_later_replies() {
        let (client, server) = duplex(256);
        let log = spawn_slow_firmware(
            server,
            "OpenAstroTracker",
            "Tracking,--T--,0,0",
            Duration::from_secs(3),
        );
        let mut mount = Lx200Mount::new(client, Lx200Config::default());
        mount.connect().await.unwrap();

        assert_eq!(
            mount.is_slewing(Axis::Azimuth).await,
            Err(MountError::MotionTimeout)
        );

        let pos = mount.position().await.unwrap();
        assert!((pos.ra_hours() - (2.0 + 31.0 / 60.0 + 49.0 / 3600.0)).abs() < 1e-9);
        assert!((pos.dec_degrees() - (89.0 + 15.0 / 60.0 + 51.0 / 3600.0)).abs() < 1e-9);
        assert!(!mount.is_slewing(Axis::Altitude).await.unwrap());

        let handshakes = log.lock().iter().filter(|c| *c == ":GVP#").count();
        assert_eq!(handshakes, 2);
    }

    #[tokio::test]
    async fn test_stop_sends_quit() {
        let (mut mount, log) = connected_mount("Slewing,--TZA,0,0").await;
        mount.stop().await.unwrap();
        mount.status().await.unwrap();
        assert!(log.lock().contains(&":Q#".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_timeout() {
        let (client, _server) = duplex(256);
        let mut mount = Lx200Mount::new(client, Lx200Config::default());
        assert_eq!(mount.connect().await, Err(MountError::MotionTimeout));
    }
}
