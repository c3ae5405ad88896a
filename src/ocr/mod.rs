//! PDF to text via page rasterization and OCR.
//!
//! Rendering and recognition sit behind traits:
//! - [`PdfRenderer`] / [`PdfDocument`]: open a PDF and rasterize pages to PNG
//!   (production: Poppler's `pdfinfo` and `pdftoppm`)
//! - [`TextRecognizer`]: read text from a page image (production: `tesseract`)

mod command;
pub mod poppler;
pub mod tesseract;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::OcrConfig;
use crate::error::DocumentError;

pub use poppler::PopplerRenderer;
pub use tesseract::TesseractRecognizer;

/// Opens PDF documents for rendering.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn open(&self, pdf: &[u8]) -> Result<Box<dyn PdfDocument>, DocumentError>;
}

/// An opened PDF.
#[async_trait]
pub trait PdfDocument: Send + Sync {
    fn page_count(&self) -> usize;

    /// Rasterize a 1-based page to PNG at `dpi`.
    async fn render_page(&self, page: usize, dpi: u32) -> Result<Vec<u8>, DocumentError>;
}

/// Recognizes text in a page image.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// `page` is only used for error context.
    async fn recognize(
        &self,
        page: usize,
        png: &[u8],
        language: &str,
        dpi: u32,
    ) -> Result<String, DocumentError>;
}

/// Converts whole PDFs to text, one page at a time.
#[derive(Clone)]
pub struct OcrConverter {
    renderer: Arc<dyn PdfRenderer>,
    recognizer: Arc<dyn TextRecognizer>,
    dpi: u32,
    language: String,
}

impl OcrConverter {
    pub fn new(
        config: &OcrConfig,
        renderer: Arc<dyn PdfRenderer>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        Self {
            renderer,
            recognizer,
            dpi: config.dpi,
            language: config.language.clone(),
        }
    }

    /// Poppler for rendering, Tesseract for recognition.
    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(
            config,
            Arc::new(PopplerRenderer::new(config)),
            Arc::new(TesseractRecognizer::new(config)),
        )
    }

    /// Text of every page, in page order, joined with newlines.
    ///
    /// Any page failure fails the whole document.
    pub async fn convert(&self, pdf: &[u8]) -> Result<String, DocumentError> {
        let document = self.renderer.open(pdf).await?;
        let pages = document.page_count();
        debug!(pages, bytes = pdf.len(), "Opened PDF");

        let mut texts = Vec::with_capacity(pages);
        for page in 1..=pages {
            let image = document.render_page(page, self.dpi).await?;
            let text = self
                .recognizer
                .recognize(page, &image, &self.language, self.dpi)
                .await?;
            texts.push(text);
        }
        Ok(texts.join("\n"))
    }
}
