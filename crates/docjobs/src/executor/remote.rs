//! Conversions performed by HTTP services: Gotenberg for office and HTML
//! documents, a configurable endpoint for PDF to Word, and a Google style
//! translation API.

use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

use super::InputFile;
use crate::config::BackendsConfig;
use crate::error::JobError;
use crate::sanitize;

const LIBREOFFICE_ROUTE: &str = "/forms/libreoffice/convert";
const HTML_ROUTE: &str = "/forms/html/convert";
/// Longest text sent in one translation request.
const TRANSLATE_CHUNK_CHARS: usize = 4500;
const MAX_EXCERPT_CHARS: usize = 500;

pub struct RemoteBackend {
    client: Client,
    gotenberg_url: String,
    pdf_to_word_url: Option<String>,
    translate_url: String,
    translate_api_key: Option<SecretString>,
    wait_timeout: String,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    format: &'static str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Deserialize)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_EXCERPT_CHARS).collect()
}

fn join_url(base: &str, route: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), route)
}

/// Maps a non-success status to a failure with the body excerpt.
fn check_status(response: Response, service: &str) -> Result<Response, JobError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(JobError::BackendExecutionFailed(format!(
        "{} returned {}: {}",
        service,
        status,
        excerpt(&body)
    )))
}

/// Splits text into chunks no longer than `max_chars`, preferring paragraph
/// and then line boundaries.
fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

impl RemoteBackend {
    pub fn new(config: &BackendsConfig) -> Result<Self, JobError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| JobError::BackendUnavailable(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            gotenberg_url: config.gotenberg_url.clone(),
            pdf_to_word_url: config.pdf_to_word_url.clone(),
            translate_url: config.translate_url.clone(),
            translate_api_key: config
                .translate_api_key
                .clone()
                .map(SecretString::from),
            wait_timeout: format!("{}s", config.conversion_wait_timeout_secs),
        })
    }

    /// Uploads `input` as the `files` part under `file_name` and returns the
    /// response body.
    fn convert(&self, url: &str, input: &InputFile, file_name: &str) -> Result<Vec<u8>, JobError> {
        let _span = info_span!("remote.convert", url = %sanitize::redact_url(url)).entered();

        let bytes = std::fs::read(&input.path).map_err(|e| {
            JobError::BackendExecutionFailed(format!("cannot read input {}: {}", input.name, e))
        })?;
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(&input.content_type)
            .map_err(|e| {
                JobError::BackendExecutionFailed(format!(
                    "invalid content type '{}': {}",
                    input.content_type, e
                ))
            })?;
        let form = Form::new()
            .text("waitTimeout", self.wait_timeout.clone())
            .part("files", part);

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .map_err(|e| {
                JobError::BackendUnavailable(format!(
                    "{} unreachable: {}",
                    sanitize::redact_url(url),
                    e.without_url()
                ))
            })?;
        let response = check_status(response, "conversion service")?;

        let body = response.bytes().map_err(|e| {
            JobError::BackendUnavailable(format!(
                "reading response from {} failed: {}",
                sanitize::redact_url(url),
                e.without_url()
            ))
        })?;
        if body.is_empty() {
            return Err(JobError::BackendExecutionFailed(
                "conversion service returned an empty document".to_string(),
            ));
        }
        debug!(bytes = body.len(), "Conversion finished");
        Ok(body.to_vec())
    }

    /// Word, Excel and PowerPoint documents through LibreOffice.
    pub fn office_to_pdf(&self, input: &InputFile) -> Result<Vec<u8>, JobError> {
        let url = join_url(&self.gotenberg_url, LIBREOFFICE_ROUTE);
        self.convert(&url, input, &input.name)
    }

    /// The service only accepts the main document under this exact name.
    pub fn html_to_pdf(&self, input: &InputFile) -> Result<Vec<u8>, JobError> {
        let url = join_url(&self.gotenberg_url, HTML_ROUTE);
        self.convert(&url, input, "index.html")
    }

    pub fn pdf_to_word(&self, input: &InputFile) -> Result<Vec<u8>, JobError> {
        let url = self.pdf_to_word_url.as_deref().ok_or_else(|| {
            JobError::BackendUnavailable("no PDF to Word conversion service configured".to_string())
        })?;
        self.convert(url, input, &input.name)
    }

    /// Translates `text` chunk by chunk. `source` of `auto` lets the service
    /// detect the language.
    pub fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, JobError> {
        let _span = info_span!("remote.translate", target = %target).entered();
        let source = Some(source.trim()).filter(|s| !s.is_empty() && *s != "auto");

        let mut translated = Vec::new();
        for chunk in chunk_text(text, TRANSLATE_CHUNK_CHARS) {
            let mut request = self.client.post(&self.translate_url).json(&TranslateRequest {
                q: &chunk,
                target,
                source,
                format: "text",
            });
            if let Some(key) = &self.translate_api_key {
                request = request.query(&[("key", key.expose_secret())]);
            }

            let response = request.send().map_err(|e| {
                JobError::BackendUnavailable(format!(
                    "translation service unreachable: {}",
                    e.without_url()
                ))
            })?;
            let response = check_status(response, "translation service")?;
            let parsed: TranslateResponse = response.json().map_err(|e| {
                JobError::BackendExecutionFailed(format!("unexpected translation response: {}", e))
            })?;
            let piece = parsed
                .data
                .translations
                .into_iter()
                .next()
                .ok_or_else(|| {
                    JobError::BackendExecutionFailed("no translations received".to_string())
                })?;
            translated.push(piece.translated_text);
        }

        if translated.is_empty() {
            return Err(JobError::BackendExecutionFailed(
                "nothing to translate".to_string(),
            ));
        }
        Ok(translated.join(""))
    }
}
