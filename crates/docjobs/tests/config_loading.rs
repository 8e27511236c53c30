//! Table-driven tests for configuration loading and validation.

use docjobs::config::load_config_from_str;

/// Represents a single config loading test case.
struct ConfigTestCase {
    /// Test case name for identification.
    name: &'static str,
    config_json: &'static str,
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const JSON_CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        config_json: r#"{ "version": "1.0" }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full",
        config_json: r#"{
            "version": "1.0",
            "data_directory": "/var/lib/docjobs",
            "worker_count": 8,
            "job_timeout_secs": 120,
            "backends": {
                "pdfcpu_bin": "/usr/local/bin/pdfcpu",
                "gotenberg_url": "http://gotenberg:3000",
                "pdf_to_word_url": "https://convert.internal/pdf-to-docx",
                "request_timeout_secs": 60
            },
            "rate_limit": { "requests_per_second": 2.5, "burst": 20 },
            "retention": { "max_age_days": 7 },
            "logging": { "level": "debug", "json": true }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "invalid_version",
        config_json: r#"{ "version": "2.0" }"#,
        should_succeed: false,
        expected_error: Some("Unsupported config version"),
    },
    ConfigTestCase {
        name: "invalid_zero_workers",
        config_json: r#"{ "version": "1.0", "worker_count": 0 }"#,
        should_succeed: false,
        expected_error: Some("worker_count"),
    },
    ConfigTestCase {
        name: "invalid_zero_timeout",
        config_json: r#"{ "version": "1.0", "job_timeout_secs": 0 }"#,
        should_succeed: false,
        expected_error: Some("job_timeout_secs"),
    },
    ConfigTestCase {
        name: "invalid_gotenberg_scheme",
        config_json: r#"{ "version": "1.0", "backends": { "gotenberg_url": "ftp://gotenberg" } }"#,
        should_succeed: false,
        expected_error: Some("backends.gotenberg_url"),
    },
    ConfigTestCase {
        name: "invalid_pdf_to_word_url",
        config_json: r#"{ "version": "1.0", "backends": { "pdf_to_word_url": "not a url" } }"#,
        should_succeed: false,
        expected_error: Some("backends.pdf_to_word_url"),
    },
    ConfigTestCase {
        name: "invalid_empty_binary",
        config_json: r#"{ "version": "1.0", "backends": { "qrencode_bin": "  " } }"#,
        should_succeed: false,
        expected_error: Some("backends.qrencode_bin"),
    },
    ConfigTestCase {
        name: "invalid_rate",
        config_json: r#"{ "version": "1.0", "rate_limit": { "requests_per_second": 0 } }"#,
        should_succeed: false,
        expected_error: Some("requests_per_second"),
    },
    ConfigTestCase {
        name: "invalid_retention",
        config_json: r#"{ "version": "1.0", "retention": { "max_age_days": 0 } }"#,
        should_succeed: false,
        expected_error: Some("max_age_days"),
    },
    ConfigTestCase {
        name: "invalid_log_level",
        config_json: r#"{ "version": "1.0", "logging": { "level": "loud" } }"#,
        should_succeed: false,
        expected_error: Some("logging.level"),
    },
    ConfigTestCase {
        name: "malformed_json",
        config_json: r#"{ "version": "1.0", "#,
        should_succeed: false,
        expected_error: None,
    },
];

#[test]
fn test_json_config_loading() {
    for test_case in JSON_CONFIG_TESTS {
        let result = load_config_from_str(test_case.config_json);

        if test_case.should_succeed {
            assert!(
                result.is_ok(),
                "Test '{}': Expected success but got error: {:?}",
                test_case.name,
                result.err()
            );
        } else {
            assert!(
                result.is_err(),
                "Test '{}': Expected error but got success",
                test_case.name
            );

            if let Some(expected_error) = test_case.expected_error {
                let error_msg = result.err().unwrap().to_string();
                assert!(
                    error_msg.contains(expected_error),
                    "Test '{}': Expected error containing '{}', got: {}",
                    test_case.name,
                    expected_error,
                    error_msg
                );
            }
        }
    }
}

#[test]
fn test_full_config_values() {
    let config = load_config_from_str(JSON_CONFIG_TESTS[1].config_json).unwrap();
    assert_eq!(config.worker_count, 8);
    assert_eq!(config.job_timeout().as_secs(), 120);
    assert_eq!(
        config.database_file().unwrap(),
        std::path::PathBuf::from("/var/lib/docjobs/docjobs.db")
    );
    assert_eq!(config.backends.pdftoppm_bin, "pdftoppm");
    assert_eq!(config.rate_limit.burst, 20);
    assert_eq!(config.rate_limit.max_clients, 10_000);
    assert_eq!(config.retention.max_age_days, Some(7));
    assert!(config.logging.json);
}
