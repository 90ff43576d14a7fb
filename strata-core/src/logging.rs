use crate::config::LoggingConfig;
use crate::core::{Result, StrataError};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to
/// stderr. Fails if a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| StrataError::InvalidConfig(format!("logging.level: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false);
    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };

    installed.map_err(|e| StrataError::InvalidConfig(format!("tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let config = LoggingConfig {
            format: "json".to_string(),
            ..Default::default()
        };
        init(&config).unwrap();

        let err = init(&LoggingConfig::default()).unwrap_err();
        assert!(matches!(err, StrataError::InvalidConfig(_)));
    }
}
