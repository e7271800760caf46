//! OCR engine collaborator: recognise text on a rasterised page image.
//!
//! OCR sits at the end of the text-recovery fallback chain and is strictly
//! best-effort — a missing engine downgrades scanned documents rather than
//! failing the pipeline. The default implementation shells out to the
//! `tesseract` CLI, so nothing links against OCR libraries at build time.

use async_trait::async_trait;
use std::io::Write;
use thiserror::Error;
use tracing::{debug, warn};

/// Why OCR produced no text.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Engine missing or misconfigured — skip OCR entirely.
    #[error("OCR engine unavailable: {detail}")]
    Unavailable { detail: String },

    /// Engine ran and failed on this image.
    #[error("OCR failed: {detail}")]
    Failed { detail: String },
}

/// Recognise text from one PNG-encoded page image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, png: &[u8], language: &str) -> Result<String, OcrError>;
}

/// Tesseract CLI engine: writes the page to a temp file and runs
/// `tesseract <image> stdout -l <lang>`.
pub struct TesseractOcr {
    binary: String,
}

impl TesseractOcr {
    pub fn new() -> Self {
        Self {
            binary: "tesseract".to_string(),
        }
    }

    /// Use a non-default binary name/path.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Cheap availability probe (`tesseract --version`).
    pub async fn is_available(&self) -> bool {
        tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, png: &[u8], language: &str) -> Result<String, OcrError> {
        let mut tmp = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::Failed {
                detail: format!("temp image: {e}"),
            })?;
        tmp.write_all(png).map_err(|e| OcrError::Failed {
            detail: format!("temp image: {e}"),
        })?;

        let output = tokio::process::Command::new(&self.binary)
            .arg(tmp.path())
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OcrError::Unavailable {
                        detail: format!("'{}' not found on PATH", self.binary),
                    }
                } else {
                    OcrError::Failed {
                        detail: e.to_string(),
                    }
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("tesseract exited with {}: {}", output.status, stderr.trim());
            return Err(OcrError::Failed {
                detail: format!("exit {}: {}", output.status, stderr.trim()),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("OCR produced {} chars", text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_reports_unavailable() {
        let engine = TesseractOcr::with_binary("definitely-not-a-real-ocr-binary");
        assert!(!engine.is_available().await);
        let err = engine.recognize(b"not a png", "eng").await.unwrap_err();
        assert!(matches!(err, OcrError::Unavailable { .. }), "got {err:?}");
    }
}
