//! Tracing setup

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use autopa_core::ControlError;

use crate::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `config.level`. Returns `Ok(false)` when a subscriber
/// was already installed, so calling this twice is harmless.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, ControlError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ControlError::InvalidConfig(format!("log level {:?}: {}", config.level, e)))?;

    let layer = if config.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_tracing(&config).unwrap();
        assert!(!init_tracing(&config).unwrap());
    }

    #[test]
    fn test_rejects_bad_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "autopa=loud".to_string(),
            json: false,
        };
        assert!(matches!(
            init_tracing(&config),
            Err(ControlError::InvalidConfig(_))
        ));
    }
}
