//! Controller configuration
//!
//! Durations are written as human-readable strings in JSON:
//!
//! ```json
//! { "settle_timeout": "30s", "settle_poll_interval": "500ms" }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use autopa_core::{ControlError, Site};
use autopa_geometry::{CorrectionPolicy, DEFAULT_ALTITUDE_GUARD_DEG};

/// Auto-align controller configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Observer latitude in degrees
    pub latitude_deg: f64,
    /// Observer longitude in degrees, positive east
    pub longitude_deg: f64,
    /// Target accuracy used when the caller does not pick one
    pub default_target_arcsec: f64,
    /// Per-cycle correction
    pub correction: CorrectionPolicy,
    /// Refuse to measure when either pointing is this close to the zenith
    pub altitude_guard_deg: f64,
    /// Consecutive error increases that end the session
    pub divergence_window: u32,
    /// Hard cap on measurement cycles
    pub max_cycles: u32,
    /// Consecutive failed measurements tolerated before giving up
    pub max_solve_retries: u32,
    #[serde(with = "duration_str")]
    pub solve_retry_backoff: Duration,
    #[serde(with = "duration_str")]
    pub solve_timeout: Duration,
    #[serde(with = "duration_str")]
    pub jog_timeout: Duration,
    /// Wait for an axis to stop before jogging it again
    #[serde(with = "duration_str")]
    pub axis_ready_timeout: Duration,
    #[serde(with = "duration_str")]
    pub settle_timeout: Duration,
    #[serde(with = "duration_str")]
    pub settle_poll_interval: Duration,
    /// Extra wait once motion has stopped, before the next capture
    #[serde(with = "duration_str")]
    pub post_settle_delay: Duration,
    /// Buffered events per subscriber
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            latitude_deg: 40.0,
            longitude_deg: -111.0,
            default_target_arcsec: 60.0,
            correction: CorrectionPolicy::default(),
            altitude_guard_deg: DEFAULT_ALTITUDE_GUARD_DEG,
            divergence_window: 3,
            max_cycles: 20,
            max_solve_retries: 3,
            solve_retry_backoff: Duration::from_secs(2),
            solve_timeout: Duration::from_secs(60),
            jog_timeout: Duration::from_secs(10),
            axis_ready_timeout: Duration::from_secs(30),
            settle_timeout: Duration::from_secs(30),
            settle_poll_interval: Duration::from_millis(500),
            post_settle_delay: Duration::from_secs(1),
            event_capacity: 64,
        }
    }
}

impl ControllerConfig {
    /// Small steps and generous waits for flexible or slow mechanics
    pub fn conservative() -> Self {
        ControllerConfig {
            correction: CorrectionPolicy {
                damping: 0.5,
                max_step_arcmin: 20.0,
                min_step_arcmin: 0.05,
            },
            max_cycles: 30,
            max_solve_retries: 5,
            solve_retry_backoff: Duration::from_secs(5),
            settle_timeout: Duration::from_secs(60),
            settle_poll_interval: Duration::from_secs(1),
            post_settle_delay: Duration::from_secs(3),
            ..Default::default()
        }
    }

    /// Rigid mounts with fast motors and a quick solver
    pub fn fast() -> Self {
        ControllerConfig {
            correction: CorrectionPolicy {
                damping: 0.9,
                max_step_arcmin: 90.0,
                min_step_arcmin: 0.01,
            },
            max_cycles: 12,
            solve_retry_backoff: Duration::from_millis(500),
            solve_timeout: Duration::from_secs(20),
            settle_timeout: Duration::from_secs(15),
            settle_poll_interval: Duration::from_millis(200),
            post_settle_delay: Duration::from_millis(250),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ControlError> {
        let config: ControllerConfig = serde_json::from_str(json)
            .map_err(|e| ControlError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ControlError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ControlError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn site(&self) -> Result<Site, ControlError> {
        Site::new(self.latitude_deg, self.longitude_deg)
            .map_err(|e| ControlError::InvalidConfig(e.to_string()))
    }

    /// Check every bound; the first violation is reported
    pub fn validate(&self) -> Result<(), ControlError> {
        let invalid = |msg: String| Err(ControlError::InvalidConfig(msg));

        self.site()?;
        self.correction.validate().map_err(ControlError::InvalidConfig)?;

        if !(self.default_target_arcsec.is_finite() && self.default_target_arcsec > 0.0) {
            return invalid(format!(
                "default_target_arcsec must be positive, got {}",
                self.default_target_arcsec
            ));
        }
        if !(0.0..90.0).contains(&self.altitude_guard_deg) {
            return invalid(format!(
                "altitude_guard_deg must be in [0, 90), got {}",
                self.altitude_guard_deg
            ));
        }
        if self.divergence_window == 0 {
            return invalid("divergence_window must be at least 1".to_string());
        }
        if self.max_cycles == 0 {
            return invalid("max_cycles must be at least 1".to_string());
        }
        if self.event_capacity == 0 {
            return invalid("event_capacity must be at least 1".to_string());
        }

        for (name, value) in [
            ("solve_timeout", self.solve_timeout),
            ("jog_timeout", self.jog_timeout),
            ("axis_ready_timeout", self.axis_ready_timeout),
            ("settle_timeout", self.settle_timeout),
            ("settle_poll_interval", self.settle_poll_interval),
        ] {
            if value.is_zero() {
                return invalid(format!("{} must be non-zero", name));
            }
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_target_arcsec, 60.0);
        assert_eq!(config.max_cycles, 20);
        assert_eq!(config.correction.damping, 0.8);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(ControllerConfig::conservative().validate().is_ok());
        assert!(ControllerConfig::fast().validate().is_ok());
        assert!(
            ControllerConfig::conservative().correction.damping
                < ControllerConfig::fast().correction.damping
        );
    }

    #[test]
    fn test_from_json_with_duration_strings() {
        let config = ControllerConfig::from_json_str(
            r#"{
                "latitude_deg": 51.5,
                "longitude_deg": -0.1,
                "settle_timeout": "45s",
                "settle_poll_interval": "250ms",
                "correction": { "damping": 0.6, "max_step_arcmin": 30.0, "min_step_arcmin": 0.1 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.latitude_deg, 51.5);
        assert_eq!(config.settle_timeout, Duration::from_secs(45));
        assert_eq!(config.settle_poll_interval, Duration::from_millis(250));
        assert_eq!(config.correction.damping, 0.6);
        // Unlisted fields keep their defaults
        assert_eq!(config.max_solve_retries, 3);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = ControllerConfig::fast();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"solve_retry_backoff\":\"500ms\""));
        assert_eq!(ControllerConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects() {
        let bad_damping = r#"{
            "correction": { "damping": 1.0, "max_step_arcmin": 60.0, "min_step_arcmin": 0.0 }
        }"#;
        assert!(matches!(
            ControllerConfig::from_json_str(bad_damping),
            Err(ControlError::InvalidConfig(_))
        ));
        assert!(ControllerConfig::from_json_str(r#"{ "latitude_deg": 95.0 }"#).is_err());
        assert!(ControllerConfig::from_json_str(r#"{ "max_cycles": 0 }"#).is_err());
        assert!(ControllerConfig::from_json_str(r#"{ "jog_timeout": "0s" }"#).is_err());
        assert!(ControllerConfig::from_json_str(r#"{ "settle_timeout": "soon" }"#).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ControllerConfig::from_json_file("/nonexistent/autopa.json"),
            Err(ControlError::InvalidConfig(_))
        ));
    }
}
