//! Text recognition through the `tesseract` CLI.

use std::path::PathBuf;

use async_trait::async_trait;

use super::TextRecognizer;
use super::command::run_binary;
use crate::config::OcrConfig;
use crate::error::DocumentError;

/// Pipes a PNG into `tesseract stdin stdout`.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    bin: PathBuf,
}

impl TesseractRecognizer {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            bin: config.tesseract_bin.clone(),
        }
    }
}

fn tesseract_args(language: &str, dpi: u32) -> Vec<String> {
    vec![
        "stdin".into(),
        "stdout".into(),
        "-l".into(),
        language.into(),
        "--dpi".into(),
        dpi.to_string(),
        // No form feed after each page.
        "-c".into(),
        "page_separator=".into(),
    ]
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(
        &self,
        page: usize,
        png: &[u8],
        language: &str,
        dpi: u32,
    ) -> Result<String, DocumentError> {
        let out = run_binary(&self.bin, tesseract_args(language, dpi), Some(png))
            .await
            .map_err(|f| {
                if f.is_not_found() {
                    DocumentError::EngineUnavailable {
                        binary: self.bin.display().to_string(),
                        reason: f.to_string(),
                    }
                } else {
                    DocumentError::Recognize {
                        page,
                        reason: f.to_string(),
                    }
                }
            })?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}
