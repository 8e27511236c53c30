use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::kind::JobKind;
use crate::error::JobError;

const REDACTED: &str = "********";

/// A password parameter. Never printed and never persisted in clear text.
#[derive(Clone)]
pub struct Password(Arc<SecretString>);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::from(value.into())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password({})", REDACTED)
    }
}

impl Serialize for Password {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for Password {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Password::new)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Low,
    #[default]
    Medium,
    High,
}

/// Anchor for stamped content, in pdfcpu's position vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StampPosition {
    TopLeft,
    TopCenter,
    TopRight,
    Center,
    BottomLeft,
    #[default]
    BottomCenter,
    BottomRight,
}

impl StampPosition {
    pub fn pdfcpu_anchor(self) -> &'static str {
        match self {
            StampPosition::TopLeft => "tl",
            StampPosition::TopCenter => "tc",
            StampPosition::TopRight => "tr",
            StampPosition::Center => "c",
            StampPosition::BottomLeft => "bl",
            StampPosition::BottomCenter => "bc",
            StampPosition::BottomRight => "br",
        }
    }
}

/// Margins trimmed from each page edge, in points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CropMargins {
    #[serde(default)]
    pub top: f32,
    #[serde(default)]
    pub right: f32,
    #[serde(default)]
    pub bottom: f32,
    #[serde(default)]
    pub left: f32,
}

/// Kind-specific parameters. The tag doubles as the job kind, so a request
/// cannot pair one kind with another kind's parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobParameters {
    Merge,
    Split {
        /// Pages per output document.
        #[serde(default = "default_span")]
        span: u32,
    },
    RemovePages {
        pages: String,
    },
    Extract {
        pages: String,
    },
    Organize {
        /// New page order; repeated pages are duplicated.
        order: String,
    },
    Compress {
        #[serde(default)]
        level: CompressionLevel,
    },
    Rotate {
        angle: i32,
        #[serde(default)]
        pages: Option<String>,
    },
    Crop {
        #[serde(default)]
        margins: CropMargins,
        #[serde(default)]
        pages: Option<String>,
    },
    AddPageNumbers {
        /// pdfcpu stamp text; `%p` is the page number, `%P` the page count.
        #[serde(default = "default_number_format")]
        format: String,
        #[serde(default)]
        position: StampPosition,
        #[serde(default = "default_small_font")]
        font_size: u32,
        #[serde(default)]
        pages: Option<String>,
    },
    Unlock {
        password: Password,
    },
    Protect {
        user_password: Password,
        #[serde(default)]
        owner_password: Option<Password>,
    },
    JpgToPdf,
    PdfToJpg {
        #[serde(default = "default_dpi")]
        dpi: u32,
    },
    PdfToWord,
    WordToPdf,
    ExcelToPdf,
    PptToPdf,
    AddWatermark {
        text: String,
        #[serde(default = "default_watermark_font")]
        font_size: u32,
        #[serde(default = "default_watermark_opacity")]
        opacity: f32,
        #[serde(default = "default_watermark_rotation")]
        rotation: f32,
        #[serde(default)]
        pages: Option<String>,
    },
    AddBackground {
        #[serde(default = "default_opacity")]
        opacity: f32,
    },
    AddHeaderFooter {
        #[serde(default)]
        header: Option<String>,
        #[serde(default)]
        footer: Option<String>,
        #[serde(default = "default_small_font")]
        font_size: u32,
        #[serde(default)]
        pages: Option<String>,
    },
    DetectBlankPages {
        /// Pages with fewer visible characters than this count as blank.
        #[serde(default = "default_min_text_length")]
        min_text_length: usize,
    },
    QrCode {
        content: String,
        #[serde(default = "default_qr_position")]
        position: StampPosition,
        /// Module size in pixels handed to qrencode.
        #[serde(default = "default_qr_module_size")]
        size: u32,
        #[serde(default)]
        pages: Option<String>,
    },
    HtmlToPdf,
    TextSearch {
        #[serde(default)]
        query: Option<String>,
    },
    Translate {
        #[serde(default = "default_source_lang")]
        source_lang: String,
        target_lang: String,
    },
    Inspect,
}

fn default_span() -> u32 {
    1
}

fn default_number_format() -> String {
    "Page %p of %P".to_string()
}

fn default_small_font() -> u32 {
    10
}

fn default_dpi() -> u32 {
    150
}

fn default_watermark_font() -> u32 {
    48
}

fn default_watermark_opacity() -> f32 {
    0.3
}

fn default_watermark_rotation() -> f32 {
    45.0
}

fn default_opacity() -> f32 {
    1.0
}

fn default_min_text_length() -> usize {
    10
}

fn default_qr_position() -> StampPosition {
    StampPosition::BottomRight
}

fn default_qr_module_size() -> u32 {
    4
}

fn default_source_lang() -> String {
    "auto".to_string()
}

impl JobParameters {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParameters::Merge => JobKind::Merge,
            JobParameters::Split { .. } => JobKind::Split,
            JobParameters::RemovePages { .. } => JobKind::RemovePages,
            JobParameters::Extract { .. } => JobKind::Extract,
            JobParameters::Organize { .. } => JobKind::Organize,
            JobParameters::Compress { .. } => JobKind::Compress,
            JobParameters::Rotate { .. } => JobKind::Rotate,
            JobParameters::Crop { .. } => JobKind::Crop,
            JobParameters::AddPageNumbers { .. } => JobKind::AddPageNumbers,
            JobParameters::Unlock { .. } => JobKind::Unlock,
            JobParameters::Protect { .. } => JobKind::Protect,
            JobParameters::JpgToPdf => JobKind::JpgToPdf,
            JobParameters::PdfToJpg { .. } => JobKind::PdfToJpg,
            JobParameters::PdfToWord => JobKind::PdfToWord,
            JobParameters::WordToPdf => JobKind::WordToPdf,
            JobParameters::ExcelToPdf => JobKind::ExcelToPdf,
            JobParameters::PptToPdf => JobKind::PptToPdf,
            JobParameters::AddWatermark { .. } => JobKind::AddWatermark,
            JobParameters::AddBackground { .. } => JobKind::AddBackground,
            JobParameters::AddHeaderFooter { .. } => JobKind::AddHeaderFooter,
            JobParameters::DetectBlankPages { .. } => JobKind::DetectBlankPages,
            JobParameters::QrCode { .. } => JobKind::QrCode,
            JobParameters::HtmlToPdf => JobKind::HtmlToPdf,
            JobParameters::TextSearch { .. } => JobKind::TextSearch,
            JobParameters::Translate { .. } => JobKind::Translate,
            JobParameters::Inspect => JobKind::Inspect,
        }
    }

    /// The raw page selection, if this kind takes one and it was given.
    pub fn page_selection(&self) -> Option<&str> {
        match self {
            JobParameters::RemovePages { pages } | JobParameters::Extract { pages } => {
                Some(pages.as_str())
            }
            JobParameters::Organize { order } => Some(order.as_str()),
            JobParameters::Rotate { pages, .. }
            | JobParameters::Crop { pages, .. }
            | JobParameters::AddPageNumbers { pages, .. }
            | JobParameters::AddWatermark { pages, .. }
            | JobParameters::AddHeaderFooter { pages, .. }
            | JobParameters::QrCode { pages, .. } => pages.as_deref(),
            _ => None,
        }
    }

    /// Checks value ranges that do not depend on the input documents.
    pub fn validate(&self) -> Result<(), JobError> {
        match self {
            JobParameters::Split { span } if *span == 0 => invalid("span must be at least 1"),
            JobParameters::Rotate { angle, .. } if angle % 90 != 0 => invalid(format!(
                "rotation angle must be a multiple of 90, got {}",
                angle
            )),
            JobParameters::Crop { margins, .. } => {
                let values = [margins.top, margins.right, margins.bottom, margins.left];
                if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
                    return invalid("crop margins must be non-negative numbers");
                }
                if values.iter().all(|v| *v == 0.0) {
                    return invalid("at least one crop margin must be set");
                }
                Ok(())
            }
            JobParameters::AddPageNumbers {
                format, font_size, ..
            } => {
                if format.trim().is_empty() {
                    return invalid("page number format must not be empty");
                }
                check_font_size(*font_size)
            }
            JobParameters::Unlock { password } if password.is_empty() => {
                invalid("password must not be empty")
            }
            JobParameters::Protect {
                user_password,
                owner_password,
            } => {
                if user_password.is_empty() {
                    return invalid("user password must not be empty");
                }
                if owner_password.as_ref().is_some_and(Password::is_empty) {
                    return invalid("owner password must not be empty when given");
                }
                Ok(())
            }
            JobParameters::PdfToJpg { dpi } if !(36..=600).contains(dpi) => {
                invalid(format!("dpi must be between 36 and 600, got {}", dpi))
            }
            JobParameters::AddWatermark {
                text,
                font_size,
                opacity,
                rotation,
                ..
            } => {
                if text.trim().is_empty() {
                    return invalid("watermark text must not be empty");
                }
                if !rotation.is_finite() {
                    return invalid("watermark rotation must be a number");
                }
                check_opacity(*opacity)?;
                check_font_size(*font_size)
            }
            JobParameters::AddBackground { opacity } => check_opacity(*opacity),
            JobParameters::AddHeaderFooter {
                header,
                footer,
                font_size,
                ..
            } => {
                let has_text = |t: &Option<String>| t.as_deref().is_some_and(|s| !s.trim().is_empty());
                if !has_text(header) && !has_text(footer) {
                    return invalid("a header or a footer is required");
                }
                check_font_size(*font_size)
            }
            JobParameters::QrCode { content, size, .. } => {
                if content.is_empty() {
                    return invalid("QR code content must not be empty");
                }
                if !(1..=20).contains(size) {
                    return invalid(format!("QR module size must be between 1 and 20, got {}", size));
                }
                Ok(())
            }
            JobParameters::TextSearch { query: Some(query) } if query.trim().is_empty() => {
                invalid("search query must not be blank")
            }
            JobParameters::Translate { target_lang, .. } if target_lang.trim().is_empty() => {
                invalid("target language is required")
            }
            _ => Ok(()),
        }
    }

    /// JSON form stored on the job record, with secrets redacted.
    pub fn to_stored(&self) -> Result<serde_json::Value, JobError> {
        serde_json::to_value(self)
            .map_err(|e| JobError::InvalidParameters(format!("cannot encode parameters: {}", e)))
    }
}

fn invalid<T>(message: impl Into<String>) -> Result<T, JobError> {
    Err(JobError::InvalidParameters(message.into()))
}

fn check_font_size(size: u32) -> Result<(), JobError> {
    if (6..=144).contains(&size) {
        Ok(())
    } else {
        invalid(format!("font size must be between 6 and 144, got {}", size))
    }
}

fn check_opacity(opacity: f32) -> Result<(), JobError> {
    if (0.0..=1.0).contains(&opacity) {
        Ok(())
    } else {
        invalid(format!("opacity must be between 0 and 1, got {}", opacity))
    }
}
