use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Every operation the system can run as a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Merge,
    Split,
    RemovePages,
    Extract,
    Organize,
    Compress,
    Rotate,
    Crop,
    AddPageNumbers,
    Unlock,
    Protect,
    JpgToPdf,
    PdfToJpg,
    PdfToWord,
    WordToPdf,
    ExcelToPdf,
    PptToPdf,
    AddWatermark,
    AddBackground,
    AddHeaderFooter,
    DetectBlankPages,
    QrCode,
    HtmlToPdf,
    TextSearch,
    Translate,
    Inspect,
}

/// How a kind's outputs are laid out on its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputShape {
    Single,
    Multi,
    MultiBundle,
}

/// Mechanism a kind delegates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Library,
    Subprocess,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputArity {
    Exactly(usize),
    AtLeast(usize),
}

impl InputArity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            InputArity::Exactly(n) => count == n,
            InputArity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for InputArity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputArity::Exactly(1) => write!(f, "exactly 1 input"),
            InputArity::Exactly(n) => write!(f, "exactly {} inputs", n),
            InputArity::AtLeast(1) => write!(f, "at least 1 input"),
            InputArity::AtLeast(n) => write!(f, "at least {} inputs", n),
        }
    }
}

/// Static facts about a kind. The runner, resolver and aggregator all read
/// these instead of matching on kinds themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindDescriptor {
    pub kind: JobKind,
    pub inputs: InputArity,
    pub shape: OutputShape,
    pub backend: Backend,
    pub output_extension: &'static str,
    pub output_content_type: &'static str,
    /// Whether the parameters carry a page selection.
    pub page_selection: bool,
}

const PDF: &str = "application/pdf";
const JSON: &str = "application/json";
const JPEG: &str = "image/jpeg";
const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

impl JobKind {
    pub const ALL: [JobKind; 26] = [
        JobKind::Merge,
        JobKind::Split,
        JobKind::RemovePages,
        JobKind::Extract,
        JobKind::Organize,
        JobKind::Compress,
        JobKind::Rotate,
        JobKind::Crop,
        JobKind::AddPageNumbers,
        JobKind::Unlock,
        JobKind::Protect,
        JobKind::JpgToPdf,
        JobKind::PdfToJpg,
        JobKind::PdfToWord,
        JobKind::WordToPdf,
        JobKind::ExcelToPdf,
        JobKind::PptToPdf,
        JobKind::AddWatermark,
        JobKind::AddBackground,
        JobKind::AddHeaderFooter,
        JobKind::DetectBlankPages,
        JobKind::QrCode,
        JobKind::HtmlToPdf,
        JobKind::TextSearch,
        JobKind::Translate,
        JobKind::Inspect,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Merge => "merge",
            JobKind::Split => "split",
            JobKind::RemovePages => "remove-pages",
            JobKind::Extract => "extract",
            JobKind::Organize => "organize",
            JobKind::Compress => "compress",
            JobKind::Rotate => "rotate",
            JobKind::Crop => "crop",
            JobKind::AddPageNumbers => "add-page-numbers",
            JobKind::Unlock => "unlock",
            JobKind::Protect => "protect",
            JobKind::JpgToPdf => "jpg-to-pdf",
            JobKind::PdfToJpg => "pdf-to-jpg",
            JobKind::PdfToWord => "pdf-to-word",
            JobKind::WordToPdf => "word-to-pdf",
            JobKind::ExcelToPdf => "excel-to-pdf",
            JobKind::PptToPdf => "ppt-to-pdf",
            JobKind::AddWatermark => "add-watermark",
            JobKind::AddBackground => "add-background",
            JobKind::AddHeaderFooter => "add-header-footer",
            JobKind::DetectBlankPages => "detect-blank-pages",
            JobKind::QrCode => "qr-code",
            JobKind::HtmlToPdf => "html-to-pdf",
            JobKind::TextSearch => "text-search",
            JobKind::Translate => "translate",
            JobKind::Inspect => "inspect",
        }
    }

    pub fn descriptor(self) -> KindDescriptor {
        use Backend::*;
        use InputArity::*;
        use OutputShape::*;

        let (inputs, shape, backend, output_extension, output_content_type, page_selection) =
            match self {
                JobKind::Merge => (AtLeast(2), Single, Library, "pdf", PDF, false),
                JobKind::Split => (Exactly(1), Multi, Library, "pdf", PDF, false),
                JobKind::RemovePages => (Exactly(1), Single, Library, "pdf", PDF, true),
                JobKind::Extract => (Exactly(1), Single, Library, "pdf", PDF, true),
                JobKind::Organize => (Exactly(1), Single, Subprocess, "pdf", PDF, true),
                JobKind::Compress => (Exactly(1), Single, Library, "pdf", PDF, false),
                JobKind::Rotate => (Exactly(1), Single, Library, "pdf", PDF, true),
                JobKind::Crop => (Exactly(1), Single, Library, "pdf", PDF, true),
                JobKind::AddPageNumbers => (Exactly(1), Single, Subprocess, "pdf", PDF, true),
                JobKind::Unlock => (Exactly(1), Single, Subprocess, "pdf", PDF, false),
                JobKind::Protect => (Exactly(1), Single, Subprocess, "pdf", PDF, false),
                JobKind::JpgToPdf => (AtLeast(1), Single, Library, "pdf", PDF, false),
                JobKind::PdfToJpg => (Exactly(1), MultiBundle, Subprocess, "jpg", JPEG, false),
                JobKind::PdfToWord => (Exactly(1), Single, Remote, "docx", DOCX, false),
                JobKind::WordToPdf => (Exactly(1), Single, Remote, "pdf", PDF, false),
                JobKind::ExcelToPdf => (Exactly(1), Single, Remote, "pdf", PDF, false),
                JobKind::PptToPdf => (Exactly(1), Single, Remote, "pdf", PDF, false),
                JobKind::AddWatermark => (Exactly(1), Single, Library, "pdf", PDF, true),
                JobKind::AddBackground => (Exactly(2), Single, Subprocess, "pdf", PDF, false),
                JobKind::AddHeaderFooter => (Exactly(1), Single, Library, "pdf", PDF, true),
                JobKind::DetectBlankPages => (Exactly(1), Single, Library, "json", JSON, false),
                JobKind::QrCode => (Exactly(1), Single, Subprocess, "pdf", PDF, true),
                JobKind::HtmlToPdf => (Exactly(1), Single, Remote, "pdf", PDF, false),
                JobKind::TextSearch => (Exactly(1), Single, Library, "json", JSON, false),
                JobKind::Translate => (Exactly(1), Single, Remote, "pdf", PDF, false),
                JobKind::Inspect => (Exactly(1), Single, Library, "json", JSON, false),
            };

        KindDescriptor {
            kind: self,
            inputs,
            shape,
            backend,
            output_extension,
            output_content_type,
            page_selection,
        }
    }

    pub fn shape(self) -> OutputShape {
        self.descriptor().shape
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| JobError::UnsupportedJobKind(s.to_string()))
    }
}
