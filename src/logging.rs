/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LogConfig;
use crate::error::{Ds3Error, Result};

/// Initialize structured logging based on configuration
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let env_filter = build_filter(config)?;

    if let Some(ref log_path) = config.log_file {
        init_file_logging(log_path, env_filter)?;
    } else {
        init_stdout_logging(env_filter)?;
    }

    Ok(())
}

fn effective_level(config: &LogConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
    let log_level = effective_level(config);
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("ds3_client={}", log_level)))
        .map_err(|e| Ds3Error::InvalidConfig(format!("Failed to create log filter: {}", e)))
}

fn init_stdout_logging(env_filter: EnvFilter) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Ds3Error::InvalidConfig(format!("Failed to install logger: {}", e)))
}

fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path)
        .map_err(|e| Ds3Error::InvalidConfig(format!("Failed to create log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Ds3Error::InvalidConfig(format!("Failed to install logger: {}", e)))
}

/// Route log output to the test harness; safe to call from every test
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("ds3_client=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = LogConfig {
            log_level: LogLevel::Error,
            log_file: None,
            verbose: true,
        };
        assert_eq!(effective_level(&config), Level::DEBUG);
    }

    #[test]
    fn test_configured_level() {
        let config = LogConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::WARN);
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_init_test_logging_twice() {
        init_test_logging();
        init_test_logging();
        tracing::debug!("logging initialized");
    }
}
