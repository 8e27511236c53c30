//! Process-wide logging setup.
//!
//! Installs a `tracing-subscriber` fmt subscriber (plain or JSON lines) and
//! bridges `log` records into it through `tracing_log::LogTracer`, so store
//! code logging with `log::*` and runner spans end up in one stream.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Dependencies that are chatty at `info` and below.
const NOISY_TARGETS: [(&str, &str); 4] = [
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("reqwest", "warn"),
    ("rustls", "warn"),
];

/// `RUST_LOG` when set and valid, otherwise the configured level with the
/// noisy dependencies turned down.
pub fn build_env_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut directives = vec![level.to_ascii_lowercase()];
    for (target, lvl) in NOISY_TARGETS {
        directives.push(format!("{}={}", target, lvl));
    }
    let filter = directives.join(",");
    EnvFilter::try_new(&filter)
        .map_err(|e| ConfigError::Logging(format!("invalid filter '{}': {}", filter, e)))
}

/// Installs the global subscriber. Calling it again once a subscriber is in
/// place changes nothing.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = build_env_filter(&config.level)?;

    let installed = if config.json {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber).is_ok()
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber).is_ok()
    };

    if !installed {
        tracing::debug!("Logging already initialized");
        return Ok(());
    }

    // Another `log` logger may already be installed; tracing output still works.
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!("log bridge not installed: {}", e);
    }

    tracing::debug!(level = %config.level, json = config.json, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_filter_from_level() {
        std::env::remove_var("RUST_LOG");
        let filter = build_env_filter("DEBUG").unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("debug"));
        assert!(rendered.contains("reqwest=warn"));
    }

    #[test]
    #[serial]
    fn test_rust_log_wins() {
        std::env::set_var("RUST_LOG", "docjobs=trace");
        let filter = build_env_filter("error").unwrap();
        std::env::remove_var("RUST_LOG");
        assert_eq!(filter.to_string(), "docjobs=trace");
    }

    #[test]
    #[serial]
    fn test_invalid_level() {
        std::env::remove_var("RUST_LOG");
        assert!(matches!(
            build_env_filter("docjobs=loud"),
            Err(ConfigError::Logging(_))
        ));
    }

    #[test]
    #[serial]
    fn test_init_is_idempotent() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig::default();
        init(&config).unwrap();
        init(&config).unwrap();
        log::info!("bridged through tracing");
    }
}
