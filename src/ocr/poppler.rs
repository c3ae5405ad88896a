//! PDF rendering through Poppler's command-line tools.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::command::{CommandFailure, run_binary};
use super::{PdfDocument, PdfRenderer};
use crate::config::OcrConfig;
use crate::error::DocumentError;

/// Renders with `pdfinfo` (page count) and `pdftoppm` (rasterization).
#[derive(Debug, Clone)]
pub struct PopplerRenderer {
    pdfinfo: PathBuf,
    pdftoppm: PathBuf,
}

impl PopplerRenderer {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            pdfinfo: config.pdfinfo_bin.clone(),
            pdftoppm: config.pdftoppm_bin.clone(),
        }
    }
}

fn unavailable(bin: &Path, failure: &CommandFailure) -> DocumentError {
    DocumentError::EngineUnavailable {
        binary: bin.display().to_string(),
        reason: failure.to_string(),
    }
}

/// Read the `Pages:` line of `pdfinfo` output.
fn parse_page_count(info: &str) -> Option<usize> {
    info.lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|n| n.trim().parse().ok())
}

#[async_trait]
impl PdfRenderer for PopplerRenderer {
    async fn open(&self, pdf: &[u8]) -> Result<Box<dyn PdfDocument>, DocumentError> {
        let file = tempfile::Builder::new()
            .prefix("mail-ocr-")
            .suffix(".pdf")
            .tempfile()
            .map_err(|e| DocumentError::Open(format!("could not stage PDF: {e}")))?;
        tokio::fs::write(file.path(), pdf)
            .await
            .map_err(|e| DocumentError::Open(format!("could not stage PDF: {e}")))?;

        let info = run_binary(&self.pdfinfo, [file.path()], None)
            .await
            .map_err(|f| {
                if f.is_not_found() {
                    unavailable(&self.pdfinfo, &f)
                } else {
                    DocumentError::Open(f.to_string())
                }
            })?;

        let info = String::from_utf8_lossy(&info);
        let pages = parse_page_count(&info)
            .ok_or_else(|| DocumentError::Open("pdfinfo reported no page count".into()))?;

        Ok(Box::new(PopplerDocument {
            file,
            pages,
            pdftoppm: self.pdftoppm.clone(),
        }))
    }
}

/// A PDF staged in a temp file. The file is removed on drop.
struct PopplerDocument {
    file: NamedTempFile,
    pages: usize,
    pdftoppm: PathBuf,
}

impl PopplerDocument {
    fn render_args(&self, page: usize, dpi: u32) -> Vec<OsString> {
        let page = page.to_string();
        let dpi = dpi.to_string();
        let mut args: Vec<OsString> = [
            "-f",
            page.as_str(),
            "-l",
            page.as_str(),
            "-r",
            dpi.as_str(),
            "-png",
            "-singlefile",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(self.file.path().into());
        args
    }
}

#[async_trait]
impl PdfDocument for PopplerDocument {
    fn page_count(&self) -> usize {
        self.pages
    }

    async fn render_page(&self, page: usize, dpi: u32) -> Result<Vec<u8>, DocumentError> {
        // No output root: pdftoppm writes the single page to stdout.
        let png = run_binary(&self.pdftoppm, self.render_args(page, dpi), None)
            .await
            .map_err(|f| {
                if f.is_not_found() {
                    unavailable(&self.pdftoppm, &f)
                } else {
                    DocumentError::Render {
                        page,
                        reason: f.to_string(),
                    }
                }
            })?;

        if png.is_empty() {
            return Err(DocumentError::Render {
                page,
                reason: "pdftoppm produced no image".into(),
            });
        }
        Ok(png)
    }
}
