//! Operations delegated to external command-line tools.
//!
//! Each call works in its own temporary directory. A missing executable is
//! reported as [`JobError::BackendUnavailable`]; a non-zero exit or a missing
//! or empty output file is [`JobError::BackendExecutionFailed`] carrying the
//! tool's diagnostics.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use tempfile::TempDir;
use tracing::{debug, info_span};

use super::{Artifact, InputFile};
use crate::config::BackendsConfig;
use crate::error::JobError;
use crate::job::{Password, StampPosition};

const MAX_DIAGNOSTIC_CHARS: usize = 2000;

/// Captured result of one tool invocation.
#[derive(Debug)]
struct ToolOutput {
    tool: String,
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl ToolOutput {
    /// Trimmed stderr, falling back to stdout, capped in length.
    fn diagnostics(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        if text.is_empty() {
            return "no output".to_string();
        }
        text.chars().take(MAX_DIAGNOSTIC_CHARS).collect()
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

fn run_tool(program: &Path, args: &[&OsStr]) -> Result<ToolOutput, JobError> {
    let tool = tool_name(program);
    // Arguments may carry passwords; only their count is logged.
    debug!(tool = %tool, args = args.len(), "Running external tool");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                JobError::BackendUnavailable(format!("{} is not installed or not on PATH", tool))
            }
            _ => JobError::BackendExecutionFailed(format!("failed to start {}: {}", tool, e)),
        })?;

    let result = ToolOutput {
        tool,
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    if !result.status.success() {
        return Err(JobError::BackendExecutionFailed(format!(
            "{} exited with {}: {}",
            result.tool,
            result.status,
            result.diagnostics()
        )));
    }
    Ok(result)
}

fn read_output(path: &Path, run: &ToolOutput) -> Result<Vec<u8>, JobError> {
    match std::fs::read(path) {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        Ok(_) => Err(JobError::BackendExecutionFailed(format!(
            "{} produced an empty file: {}",
            run.tool,
            run.diagnostics()
        ))),
        Err(_) => Err(JobError::BackendExecutionFailed(format!(
            "{} did not produce an output file: {}",
            run.tool,
            run.diagnostics()
        ))),
    }
}

fn workspace() -> Result<TempDir, JobError> {
    tempfile::Builder::new()
        .prefix("docjobs-")
        .tempdir()
        .map_err(|e| JobError::BackendExecutionFailed(format!("cannot create work directory: {}", e)))
}

/// pdfcpu page selection syntax: comma separated page numbers.
fn page_list(pages: &[u32]) -> String {
    pages
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Page number of a pdftoppm output such as `page-07.jpg`.
fn rendered_page_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('-').next()?.parse().ok()
}

pub struct SubprocessBackend {
    pdfcpu: PathBuf,
    pdftoppm: PathBuf,
    qrencode: PathBuf,
}

impl SubprocessBackend {
    pub fn new(config: &BackendsConfig) -> Self {
        Self {
            pdfcpu: PathBuf::from(&config.pdfcpu_bin),
            pdftoppm: PathBuf::from(&config.pdftoppm_bin),
            qrencode: PathBuf::from(&config.qrencode_bin),
        }
    }

    /// Runs pdfcpu with `args` followed by the input and an output path, and
    /// returns the output file.
    fn pdfcpu_transform(&self, args: &[&OsStr], input: &InputFile) -> Result<Vec<u8>, JobError> {
        let dir = workspace()?;
        let out = dir.path().join("out.pdf");
        let mut full: Vec<&OsStr> = args.to_vec();
        full.push(input.path.as_os_str());
        full.push(out.as_os_str());

        let run = run_tool(&self.pdfcpu, &full)?;
        read_output(&out, &run)
    }

    /// Reorders pages; pages may repeat.
    pub fn organize(&self, input: &InputFile, order: &[u32]) -> Result<Vec<u8>, JobError> {
        let _span = info_span!("pdfcpu.collect", pages = order.len()).entered();
        let selection = page_list(order);
        self.pdfcpu_transform(
            &[OsStr::new("collect"), OsStr::new("-pages"), OsStr::new(&selection)],
            input,
        )
    }

    pub fn add_page_numbers(
        &self,
        input: &InputFile,
        format: &str,
        position: StampPosition,
        font_size: u32,
        pages: Option<&[u32]>,
    ) -> Result<Vec<u8>, JobError> {
        let _span = info_span!("pdfcpu.stamp", mode = "text").entered();
        let description = format!(
            "pos:{}, points:{}, scale:1 abs, rot:0, fillcolor:#000000",
            position.pdfcpu_anchor(),
            font_size
        );
        let selection = pages.map(page_list);

        let mut args = vec![OsStr::new("stamp"), OsStr::new("add")];
        if let Some(selection) = &selection {
            args.push(OsStr::new("-pages"));
            args.push(OsStr::new(selection));
        }
        args.extend([
            OsStr::new("-mode"),
            OsStr::new("text"),
            OsStr::new("--"),
            OsStr::new(format),
            OsStr::new(&description),
        ]);
        self.pdfcpu_transform(&args, input)
    }

    pub fn unlock(&self, input: &InputFile, password: &Password) -> Result<Vec<u8>, JobError> {
        let _span = info_span!("pdfcpu.decrypt").entered();
        self.pdfcpu_transform(
            &[
                OsStr::new("decrypt"),
                OsStr::new("-upw"),
                OsStr::new(password.expose()),
                OsStr::new("-opw"),
                OsStr::new(password.expose()),
            ],
            input,
        )
    }

    /// Encrypts with AES-256; the owner password defaults to the user
    /// password.
    pub fn protect(
        &self,
        input: &InputFile,
        user_password: &Password,
        owner_password: Option<&Password>,
    ) -> Result<Vec<u8>, JobError> {
        let _span = info_span!("pdfcpu.encrypt").entered();
        let owner = owner_password.unwrap_or(user_password);
        self.pdfcpu_transform(
            &[
                OsStr::new("encrypt"),
                OsStr::new("-mode"),
                OsStr::new("aes"),
                OsStr::new("-key"),
                OsStr::new("256"),
                OsStr::new("-upw"),
                OsStr::new(user_password.expose()),
                OsStr::new("-opw"),
                OsStr::new(owner.expose()),
            ],
            input,
        )
    }

    /// Places `image` behind the content of every page, scaled to the page.
    pub fn add_background(
        &self,
        input: &InputFile,
        image: &InputFile,
        opacity: f32,
    ) -> Result<Vec<u8>, JobError> {
        let _span = info_span!("pdfcpu.watermark", mode = "image").entered();
        let description = format!("pos:c, scale:1 rel, rot:0, opacity:{}", opacity);
        self.pdfcpu_transform(
            &[
                OsStr::new("watermark"),
                OsStr::new("add"),
                OsStr::new("-mode"),
                OsStr::new("image"),
                OsStr::new("--"),
                image.path.as_os_str(),
                OsStr::new(&description),
            ],
            input,
        )
    }

    /// Renders `content` as a QR code with qrencode and stamps it on the
    /// selected pages.
    pub fn qr_code(
        &self,
        input: &InputFile,
        content: &str,
        position: StampPosition,
        module_size: u32,
        pages: Option<&[u32]>,
    ) -> Result<Vec<u8>, JobError> {
        let _span = info_span!("qr_code").entered();
        let dir = workspace()?;
        let image = dir.path().join("qr.png");
        let size = module_size.to_string();

        let run = run_tool(
            &self.qrencode,
            &[
                OsStr::new("-o"),
                image.as_os_str(),
                OsStr::new("-s"),
                OsStr::new(&size),
                OsStr::new("-m"),
                OsStr::new("2"),
                OsStr::new("--"),
                OsStr::new(content),
            ],
        )?;
        read_output(&image, &run)?;

        let description = format!(
            "pos:{}, scale:0.15 rel, rot:0, offset:0 0",
            position.pdfcpu_anchor()
        );
        let selection = pages.map(page_list);
        let mut args = vec![OsStr::new("stamp"), OsStr::new("add")];
        if let Some(selection) = &selection {
            args.push(OsStr::new("-pages"));
            args.push(OsStr::new(selection));
        }
        args.extend([
            OsStr::new("-mode"),
            OsStr::new("image"),
            OsStr::new("--"),
            image.as_os_str(),
            OsStr::new(&description),
        ]);
        self.pdfcpu_transform(&args, input)
    }

    /// Renders every page to a JPEG at `dpi`, in page order.
    pub fn rasterize(&self, input: &InputFile, dpi: u32) -> Result<Vec<Artifact>, JobError> {
        let _span = info_span!("pdftoppm", dpi).entered();
        let dir = workspace()?;
        let prefix = dir.path().join("page");
        let resolution = dpi.to_string();

        let run = run_tool(
            &self.pdftoppm,
            &[
                OsStr::new("-jpeg"),
                OsStr::new("-r"),
                OsStr::new(&resolution),
                input.path.as_os_str(),
                prefix.as_os_str(),
            ],
        )?;

        let entries = std::fs::read_dir(dir.path()).map_err(|e| {
            JobError::BackendExecutionFailed(format!("cannot list rendered pages: {}", e))
        })?;
        let mut rendered: Vec<(u32, PathBuf)> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("jpg"))
            .filter_map(|path| rendered_page_number(&path).map(|n| (n, path)))
            .collect();
        rendered.sort_by_key(|(number, _)| *number);

        if rendered.is_empty() {
            return Err(JobError::BackendExecutionFailed(format!(
                "{} rendered no pages: {}",
                run.tool,
                run.diagnostics()
            )));
        }

        let stem = input.stem();
        rendered
            .into_iter()
            .map(|(number, path)| {
                Ok(Artifact::new(
                    format!("{}_page-{}.jpg", stem, number),
                    "image/jpeg",
                    read_output(&path, &run)?,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_with(program: &str) -> SubprocessBackend {
        SubprocessBackend::new(&BackendsConfig {
            pdfcpu_bin: program.to_string(),
            pdftoppm_bin: program.to_string(),
            qrencode_bin: program.to_string(),
            ..BackendsConfig::default()
        })
    }

    fn input() -> InputFile {
        InputFile {
            id: "f1".into(),
            name: "in.pdf".into(),
            path: PathBuf::from("/nonexistent/in.pdf"),
            content_type: "application/pdf".into(),
        }
    }

    #[test]
    fn test_page_list() {
        assert_eq!(page_list(&[3, 1, 2, 2]), "3,1,2,2");
    }

    #[test]
    fn test_rendered_page_number() {
        assert_eq!(rendered_page_number(Path::new("/tmp/x/page-1.jpg")), Some(1));
        assert_eq!(rendered_page_number(Path::new("/tmp/x/page-012.jpg")), Some(12));
        assert_eq!(rendered_page_number(Path::new("/tmp/x/other.jpg")), None);
    }

    #[test]
    fn test_missing_executable_is_unavailable() {
        let backend = backend_with("/nonexistent/bin/docjobs-tool");
        match backend.organize(&input(), &[1]) {
            Err(JobError::BackendUnavailable(msg)) => assert!(msg.contains("docjobs-tool")),
            other => panic!("Expected BackendUnavailable, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_carries_diagnostics() {
        let output = run_tool(
            Path::new("sh"),
            &[OsStr::new("-c"), OsStr::new("echo 'bad selection' >&2; exit 3")],
        );
        match output {
            Err(JobError::BackendExecutionFailed(msg)) => {
                assert!(msg.contains("bad selection"), "{}", msg);
            }
            other => panic!("Expected BackendExecutionFailed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_success_without_output_file_fails() {
        // `true` exits 0 and writes nothing.
        let backend = backend_with("true");
        match backend.organize(&input(), &[1]) {
            Err(JobError::BackendExecutionFailed(msg)) => {
                assert!(msg.contains("did not produce"), "{}", msg);
            }
            other => panic!("Expected BackendExecutionFailed, got {:?}", other),
        }
        assert!(matches!(
            backend.rasterize(&input(), 72),
            Err(JobError::BackendExecutionFailed(_))
        ));
    }

    #[test]
    fn test_diagnostics_prefers_stderr() {
        let run = ToolOutput {
            tool: "pdfcpu".into(),
            status: ExitStatus::default(),
            stdout: "progress".into(),
            stderr: "  fatal: bad password \n".into(),
        };
        assert_eq!(run.diagnostics(), "fatal: bad password");
    }
}
