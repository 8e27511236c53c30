use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Root for file content. Defaults to the platform data directory.
    #[serde(default)]
    pub data_directory: Option<String>,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Per-job deadline enforced by the worker pool.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_job_timeout() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            data_directory: None,
            database_path: None,
            worker_count: default_worker_count(),
            job_timeout_secs: default_job_timeout(),
            backends: BackendsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retention: RetentionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Configured data directory, or `<platform data dir>/docjobs`.
    pub fn data_directory_path(&self) -> Option<PathBuf> {
        match &self.data_directory {
            Some(dir) => Some(PathBuf::from(dir)),
            None => crate::db::default_data_directory(),
        }
    }

    /// Configured database file, or `docjobs.db` inside the data directory.
    pub fn database_file(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => self.data_directory_path().map(|dir| dir.join("docjobs.db")),
        }
    }

    pub fn files_directory(&self) -> Option<PathBuf> {
        self.data_directory_path().map(|dir| dir.join("files"))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Where the external tools and services live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default = "default_pdfcpu")]
    pub pdfcpu_bin: String,
    #[serde(default = "default_pdftoppm")]
    pub pdftoppm_bin: String,
    #[serde(default = "default_qrencode")]
    pub qrencode_bin: String,
    /// Base URL of the Gotenberg conversion service.
    #[serde(default = "default_gotenberg_url")]
    pub gotenberg_url: String,
    /// Endpoint accepting a PDF upload and answering with a DOCX. Unset
    /// means pdf-to-word jobs fail as unavailable.
    #[serde(default)]
    pub pdf_to_word_url: Option<String>,
    #[serde(default = "default_translate_url")]
    pub translate_url: String,
    #[serde(default, skip_serializing)]
    pub translate_api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Forwarded to Gotenberg as `waitTimeout`.
    #[serde(default = "default_wait_timeout")]
    pub conversion_wait_timeout_secs: u64,
}

fn default_pdfcpu() -> String {
    "pdfcpu".to_string()
}

fn default_pdftoppm() -> String {
    "pdftoppm".to_string()
}

fn default_qrencode() -> String {
    "qrencode".to_string()
}

fn default_gotenberg_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_translate_url() -> String {
    "https://translation.googleapis.com/language/translate/v2".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_wait_timeout() -> u64 {
    30
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            pdfcpu_bin: default_pdfcpu(),
            pdftoppm_bin: default_pdftoppm(),
            qrencode_bin: default_qrencode(),
            gotenberg_url: default_gotenberg_url(),
            pdf_to_word_url: None,
            translate_url: default_translate_url(),
            translate_api_key: None,
            request_timeout_secs: default_request_timeout(),
            conversion_wait_timeout_secs: default_wait_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Buckets idle for this long are evicted.
    #[serde(default = "default_idle_eviction")]
    pub idle_eviction_secs: u64,
    #[serde(default = "default_max_clients")]
    pub max_clients: u64,
}

fn default_requests_per_second() -> f64 {
    1.0
}

fn default_burst() -> u32 {
    100
}

fn default_idle_eviction() -> u64 {
    600
}

fn default_max_clients() -> u64 {
    10_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            idle_eviction_secs: default_idle_eviction(),
            max_clients: default_max_clients(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Stored files older than this are removed by cleanup. Unset keeps
    /// everything.
    #[serde(default)]
    pub max_age_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
