use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = serde_json::from_str(content)?;

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Applies `DOCJOBS_*` environment variables on top of the file values.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(url) = std::env::var("DOCJOBS_GOTENBERG_URL") {
        config.backends.gotenberg_url = url;
    }
    if let Ok(dir) = std::env::var("DOCJOBS_DATA_DIR") {
        config.data_directory = Some(dir);
    }
    if let Ok(count) = std::env::var("DOCJOBS_WORKER_COUNT") {
        config.worker_count = count.trim().parse().map_err(|_| ConfigError::Validation {
            message: format!("DOCJOBS_WORKER_COUNT must be a number, got '{}'", count),
        })?;
    }
    if let Ok(level) = std::env::var("DOCJOBS_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(key) = std::env::var("DOCJOBS_TRANSLATE_API_KEY") {
        config.backends.translate_api_key = Some(key);
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| invalid(format!("{} is not a valid URL ('{}'): {}", field, value, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!(
            "{} must use http or https, got '{}'",
            field,
            url.scheme()
        )));
    }
    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if !(1..=64).contains(&config.worker_count) {
        return Err(invalid(format!(
            "worker_count must be between 1 and 64, got {}",
            config.worker_count
        )));
    }

    if config.job_timeout_secs == 0 {
        return Err(invalid("job_timeout_secs must be greater than 0"));
    }

    let backends = &config.backends;
    validate_url("backends.gotenberg_url", &backends.gotenberg_url)?;
    validate_url("backends.translate_url", &backends.translate_url)?;
    if let Some(url) = &backends.pdf_to_word_url {
        validate_url("backends.pdf_to_word_url", url)?;
    }
    for (field, value) in [
        ("backends.pdfcpu_bin", &backends.pdfcpu_bin),
        ("backends.pdftoppm_bin", &backends.pdftoppm_bin),
        ("backends.qrencode_bin", &backends.qrencode_bin),
    ] {
        if value.trim().is_empty() {
            return Err(invalid(format!("{} must not be empty", field)));
        }
    }
    if backends.request_timeout_secs == 0 || backends.conversion_wait_timeout_secs == 0 {
        return Err(invalid("backend timeouts must be greater than 0"));
    }

    let limits = &config.rate_limit;
    if !(limits.requests_per_second.is_finite() && limits.requests_per_second > 0.0) {
        return Err(invalid("rate_limit.requests_per_second must be greater than 0"));
    }
    if limits.burst == 0 || limits.idle_eviction_secs == 0 || limits.max_clients == 0 {
        return Err(invalid(
            "rate_limit.burst, idle_eviction_secs and max_clients must be greater than 0",
        ));
    }

    if config.retention.max_age_days == Some(0) {
        return Err(invalid("retention.max_age_days must be at least 1 when set"));
    }

    if !LOG_LEVELS.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
        return Err(invalid(format!(
            "logging.level must be one of {}, got '{}'",
            LOG_LEVELS.join(", "),
            config.logging.level
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_load_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{ "version": "1.0", "worker_count": 2 }"#).unwrap();

        assert_eq!(config.worker_count, 2);
        assert_eq!(config.job_timeout_secs, 300);
        assert_eq!(config.backends.gotenberg_url, "http://localhost:3000");
        assert_eq!(config.backends.conversion_wait_timeout_secs, 30);
        assert_eq!(config.rate_limit.requests_per_second, 1.0);
        assert_eq!(config.rate_limit.burst, 100);
        assert_eq!(config.logging.level, "info");
        assert!(config.retention.max_age_days.is_none());
    }

    #[test]
    #[serial]
    fn test_load_full_config() {
        let config = load_config_from_str(
            r#"
            {
                "version": "1.0",
                "data_directory": "/srv/docjobs",
                "worker_count": 4,
                "job_timeout_secs": 60,
                "backends": {
                    "pdfcpu_bin": "/opt/bin/pdfcpu",
                    "gotenberg_url": "http://gotenberg:3000",
                    "pdf_to_word_url": "http://converter:8080/pdf-to-docx"
                },
                "rate_limit": { "requests_per_second": 5, "burst": 20 },
                "retention": { "max_age_days": 7 },
                "logging": { "level": "debug", "json": true }
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.backends.pdfcpu_bin, "/opt/bin/pdfcpu");
        assert_eq!(config.backends.pdftoppm_bin, "pdftoppm");
        assert_eq!(
            config.database_file().unwrap(),
            std::path::PathBuf::from("/srv/docjobs/docjobs.db")
        );
        assert_eq!(
            config.files_directory().unwrap(),
            std::path::PathBuf::from("/srv/docjobs/files")
        );
        assert_eq!(config.rate_limit.requests_per_second, 5.0);
        assert_eq!(config.retention.max_age_days, Some(7));
        assert!(config.logging.json);
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        let cases = [
            r#"{ "version": "2.0" }"#,
            r#"{ "version": "1.0", "worker_count": 0 }"#,
            r#"{ "version": "1.0", "worker_count": 1, "job_timeout_secs": 0 }"#,
            r#"{ "version": "1.0", "worker_count": 1, "backends": { "gotenberg_url": "ftp://x" } }"#,
            r#"{ "version": "1.0", "worker_count": 1, "backends": { "gotenberg_url": "not a url" } }"#,
            r#"{ "version": "1.0", "worker_count": 1, "rate_limit": { "requests_per_second": 0 } }"#,
            r#"{ "version": "1.0", "worker_count": 1, "retention": { "max_age_days": 0 } }"#,
            r#"{ "version": "1.0", "worker_count": 1, "logging": { "level": "loud" } }"#,
        ];
        for case in cases {
            match load_config_from_str(case) {
                Err(ConfigError::Validation { .. }) => {}
                other => panic!("Expected validation error for {}, got {:?}", case, other),
            }
        }
    }

    #[test]
    #[serial]
    fn test_malformed_json() {
        assert!(matches!(
            load_config_from_str("{ version: 1.0 }"),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("DOCJOBS_GOTENBERG_URL", "http://gotenberg.internal:3000");
        std::env::set_var("DOCJOBS_WORKER_COUNT", "3");
        std::env::set_var("DOCJOBS_LOG_LEVEL", "warn");

        let result = load_config_from_str(r#"{ "version": "1.0", "worker_count": 8 }"#);

        std::env::remove_var("DOCJOBS_GOTENBERG_URL");
        std::env::remove_var("DOCJOBS_WORKER_COUNT");
        std::env::remove_var("DOCJOBS_LOG_LEVEL");

        let config = result.unwrap();
        assert_eq!(config.backends.gotenberg_url, "http://gotenberg.internal:3000");
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    #[serial]
    fn test_bad_worker_count_override() {
        std::env::set_var("DOCJOBS_WORKER_COUNT", "many");
        let result = load_config_from_str(r#"{ "version": "1.0" }"#);
        std::env::remove_var("DOCJOBS_WORKER_COUNT");

        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    #[serial]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/docjobs.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
