//! Runs a prepared job against its backend.
//!
//! [`BackendExecutor`] dispatches on the job parameters with one exhaustive
//! match: library kinds are handled in-process with `lopdf`, subprocess kinds
//! shell out to external tools, remote kinds call HTTP conversion services.
//! The executor never touches the job or file stores; it reads its inputs
//! from disk and hands back raw artifacts for the persister.

use std::path::{Path, PathBuf};

use tracing::info_span;

use crate::config::BackendsConfig;
use crate::error::JobError;
use crate::job::{JobKind, JobParameters};

pub mod library;
pub mod overlay;
pub mod remote;
pub mod subprocess;

pub use remote::RemoteBackend;
pub use subprocess::SubprocessBackend;

/// One produced file, not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Artifact named after the input with the kind's output extension.
    pub fn for_kind(kind: JobKind, input: &InputFile, suffix: &str, bytes: Vec<u8>) -> Self {
        let descriptor = kind.descriptor();
        Self::new(
            format!(
                "{}_{}.{}",
                input.stem(),
                suffix,
                descriptor.output_extension
            ),
            descriptor.output_content_type,
            bytes,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutput {
    Single(Artifact),
    Many(Vec<Artifact>),
}

impl ExecutionOutput {
    pub fn into_artifacts(self) -> Vec<Artifact> {
        match self {
            ExecutionOutput::Single(artifact) => vec![artifact],
            ExecutionOutput::Many(artifacts) => artifacts,
        }
    }
}

/// A resolved input: store metadata plus the path of its bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct InputFile {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub content_type: String,
}

impl InputFile {
    /// Logical name without extension, reduced to characters safe in file
    /// names.
    pub fn stem(&self) -> String {
        let stem = Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let cleaned: String = stem
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if cleaned.trim_matches('_').is_empty() {
            "document".to_string()
        } else {
            cleaned
        }
    }
}

/// Everything a backend needs to run one job.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub job_id: String,
    pub kind: JobKind,
    pub inputs: Vec<InputFile>,
    pub parameters: JobParameters,
    /// Parsed page selection, present when the parameters carry one.
    pub pages: Option<Vec<u32>>,
}

impl ExecutionRequest {
    fn first_input(&self) -> Result<&InputFile, JobError> {
        self.inputs
            .first()
            .ok_or_else(|| JobError::InvalidParameters("job has no inputs".to_string()))
    }

    fn input(&self, index: usize) -> Result<&InputFile, JobError> {
        self.inputs.get(index).ok_or_else(|| {
            JobError::InvalidParameters(format!("job needs input #{}", index + 1))
        })
    }

    fn required_pages(&self) -> Result<&[u32], JobError> {
        self.pages
            .as_deref()
            .ok_or_else(|| JobError::InvalidParameters("a page selection is required".to_string()))
    }
}

/// Performs one job's transformation.
pub trait TransformationExecutor: Send + Sync {
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutput, JobError>;
}

/// The production executor covering every kind.
pub struct BackendExecutor {
    subprocess: SubprocessBackend,
    remote: RemoteBackend,
}

impl BackendExecutor {
    pub fn new(config: &BackendsConfig) -> Result<Self, JobError> {
        Ok(Self {
            subprocess: SubprocessBackend::new(config),
            remote: RemoteBackend::new(config)?,
        })
    }
}

impl TransformationExecutor for BackendExecutor {
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutput, JobError> {
        let descriptor = request.kind.descriptor();
        let _span = info_span!(
            "execute",
            job_id = %request.job_id,
            kind = %request.kind,
            backend = ?descriptor.backend
        )
        .entered();

        let first = request.first_input()?;
        let pages = request.pages.as_deref();
        let single = |suffix: &str, bytes: Vec<u8>| -> Result<ExecutionOutput, JobError> {
            Ok(ExecutionOutput::Single(Artifact::for_kind(
                request.kind,
                first,
                suffix,
                bytes,
            )))
        };

        match &request.parameters {
            JobParameters::Merge => single("merged", library::merge(&request.inputs)?),
            JobParameters::Split { span } => {
                Ok(ExecutionOutput::Many(library::split(first, *span)?))
            }
            JobParameters::RemovePages { .. } => {
                single("trimmed", library::remove_pages(first, request.required_pages()?)?)
            }
            JobParameters::Extract { .. } => {
                single("extracted", library::extract_pages(first, request.required_pages()?)?)
            }
            JobParameters::Organize { .. } => single(
                "organized",
                self.subprocess.organize(first, request.required_pages()?)?,
            ),
            JobParameters::Compress { level } => {
                single("compressed", library::compress(first, *level)?)
            }
            JobParameters::Rotate { angle, .. } => {
                single("rotated", library::rotate(first, *angle, pages)?)
            }
            JobParameters::Crop { margins, .. } => {
                single("cropped", library::crop(first, margins, pages)?)
            }
            JobParameters::AddPageNumbers {
                format,
                position,
                font_size,
                ..
            } => single(
                "numbered",
                self.subprocess
                    .add_page_numbers(first, format, *position, *font_size, pages)?,
            ),
            JobParameters::Unlock { password } => {
                single("unlocked", self.subprocess.unlock(first, password)?)
            }
            JobParameters::Protect {
                user_password,
                owner_password,
            } => single(
                "protected",
                self.subprocess
                    .protect(first, user_password, owner_password.as_ref())?,
            ),
            JobParameters::JpgToPdf => single("images", library::images_to_pdf(&request.inputs)?),
            JobParameters::PdfToJpg { dpi } => {
                Ok(ExecutionOutput::Many(self.subprocess.rasterize(first, *dpi)?))
            }
            JobParameters::PdfToWord => single("converted", self.remote.pdf_to_word(first)?),
            JobParameters::WordToPdf | JobParameters::ExcelToPdf | JobParameters::PptToPdf => {
                single("converted", self.remote.office_to_pdf(first)?)
            }
            JobParameters::AddWatermark {
                text,
                font_size,
                opacity,
                rotation,
                ..
            } => {
                let watermark = overlay::Watermark {
                    text: text.clone(),
                    font_size: *font_size as f32,
                    opacity: *opacity,
                    rotation: *rotation,
                };
                single("watermarked", library::watermark(first, &watermark, pages)?)
            }
            JobParameters::AddBackground { opacity } => single(
                "background",
                self.subprocess
                    .add_background(first, request.input(1)?, *opacity)?,
            ),
            JobParameters::AddHeaderFooter {
                header,
                footer,
                font_size,
                ..
            } => single(
                "header-footer",
                library::header_footer(
                    first,
                    header.as_deref(),
                    footer.as_deref(),
                    *font_size as f32,
                    pages,
                )?,
            ),
            JobParameters::DetectBlankPages { min_text_length } => single(
                "blank-pages",
                library::detect_blank_pages(first, *min_text_length)?,
            ),
            JobParameters::QrCode {
                content,
                position,
                size,
                ..
            } => single(
                "qr",
                self.subprocess
                    .qr_code(first, content, *position, *size, pages)?,
            ),
            JobParameters::HtmlToPdf => single("converted", self.remote.html_to_pdf(first)?),
            JobParameters::TextSearch { query } => {
                single("text", library::text_search(first, query.as_deref())?)
            }
            JobParameters::Translate {
                source_lang,
                target_lang,
            } => {
                let text = library::extract_text(first)?;
                let translated = self.remote.translate(&text, source_lang, target_lang)?;
                single(
                    &format!("translated-{}", target_lang),
                    overlay::text_document(&translated, 11.0)?,
                )
            }
            JobParameters::Inspect => single("info", library::inspect(first)?),
        }
    }
}
