//! Text recovery: document bytes → plain text via an ordered fallback
//! chain of extraction strategies.
//!
//! The chain is a priority-ordered registry of [`TextStrategy`]
//! implementations sharing one capability: attempt extraction, return
//! result-or-none. Each strategy runs only if every earlier one returned
//! empty/near-empty text or raised; the first result above the
//! minimum-length threshold wins, so a successful early strategy
//! guarantees later ones are never invoked (fallback monotonicity).
//!
//! OCR is the terminal fallback — reaching it signals a scanned or
//! image-only document. A missing OCR engine is non-fatal: the document
//! is marked as failed recovery and the pipeline continues with empty
//! text rather than aborting the run.
//!
//! pdfium and the structural parsers run under `spawn_blocking`; they are
//! CPU-bound C/parse work that must not stall the async workers. A panic
//! inside a parser (pdf-extract is known to panic on exotic files)
//! surfaces as a failed attempt, not a crashed pipeline.

use crate::config::ExtractionConfig;
use crate::error::BranchError;
use crate::record::{
    AttemptOutcome, ExtractionAttempt, ExtractionMethod, RecoveredDocument, TextQuality,
};
use crate::services::{OcrEngine, OcrError};
use async_trait::async_trait;
use image::ImageFormat;
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why one strategy produced no text.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The strategy's backing engine is not installed/configured.
    /// The chain records this and moves on.
    #[error("strategy unavailable: {0}")]
    Unavailable(String),

    /// The strategy ran and failed on this document.
    #[error("strategy failed: {0}")]
    Failed(String),
}

/// One extraction strategy in the fallback chain.
#[async_trait]
pub trait TextStrategy: Send + Sync {
    fn method(&self) -> ExtractionMethod;
    async fn attempt(
        &self,
        bytes: &[u8],
        config: &ExtractionConfig,
    ) -> Result<String, StrategyError>;
}

/// The default chain: lopdf → pdf-extract → pdfium → OCR (when an engine
/// is supplied).
pub fn default_strategies(ocr: Option<Arc<dyn OcrEngine>>) -> Vec<Arc<dyn TextStrategy>> {
    let mut strategies: Vec<Arc<dyn TextStrategy>> = vec![
        Arc::new(LopdfStrategy),
        Arc::new(PdfExtractStrategy),
        Arc::new(PdfiumStrategy),
    ];
    if let Some(engine) = ocr {
        strategies.push(Arc::new(OcrStrategy::new(engine)));
    }
    strategies
}

/// Run the fallback chain over one document's bytes.
///
/// Always returns a [`RecoveredDocument`]; when every strategy fails the
/// document carries `TextQuality::Failed`, empty text, and the full
/// attempt log, and the accompanying [`BranchError`]s say what went wrong.
pub async fn recover_text(
    bytes: &[u8],
    source_ref: &str,
    strategies: &[Arc<dyn TextStrategy>],
    config: &ExtractionConfig,
) -> (RecoveredDocument, Vec<BranchError>) {
    let mut attempts = Vec::new();
    let mut branch_errors = Vec::new();

    for strategy in strategies {
        let method = strategy.method();
        match strategy.attempt(bytes, config).await {
            Ok(raw) => {
                let text = clean_text(&raw);
                if text.len() >= config.min_text_len {
                    info!(
                        "Recovered {} chars from '{}' via {}",
                        text.len(),
                        source_ref,
                        method
                    );
                    attempts.push(ExtractionAttempt {
                        method,
                        outcome: AttemptOutcome::Succeeded { chars: text.len() },
                    });
                    let quality = if method == ExtractionMethod::Ocr {
                        TextQuality::OcrUsed
                    } else {
                        TextQuality::Native
                    };
                    return (
                        RecoveredDocument {
                            source_ref: source_ref.to_string(),
                            attempts,
                            method: Some(method),
                            text,
                            quality,
                        },
                        branch_errors,
                    );
                }
                debug!(
                    "{} produced only {} chars for '{}', trying next strategy",
                    method,
                    text.len(),
                    source_ref
                );
                attempts.push(ExtractionAttempt {
                    method,
                    outcome: AttemptOutcome::Insufficient { chars: text.len() },
                });
            }
            Err(StrategyError::Unavailable(detail)) => {
                if method == ExtractionMethod::Ocr {
                    warn!("OCR unavailable for '{}': {}", source_ref, detail);
                    branch_errors.push(BranchError::OcrUnavailable {
                        detail: detail.clone(),
                    });
                } else {
                    debug!("{} unavailable: {}", method, detail);
                }
                attempts.push(ExtractionAttempt {
                    method,
                    outcome: AttemptOutcome::Unavailable { detail },
                });
            }
            Err(StrategyError::Failed(detail)) => {
                debug!("{} failed for '{}': {}", method, source_ref, detail);
                attempts.push(ExtractionAttempt {
                    method,
                    outcome: AttemptOutcome::Failed { detail },
                });
            }
        }
    }

    warn!("All text recovery strategies failed for '{}'", source_ref);
    branch_errors.push(BranchError::ExtractionFailed {
        source_ref: source_ref.to_string(),
    });
    (
        RecoveredDocument {
            source_ref: source_ref.to_string(),
            attempts,
            method: None,
            text: String::new(),
            quality: TextQuality::Failed,
        },
        branch_errors,
    )
}

// ── Text cleanup ─────────────────────────────────────────────────────────

static RE_CONTROL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f]").unwrap());
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static RE_BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n\s*\n+").unwrap());

/// Normalise raw extractor output: strip control characters, collapse
/// horizontal whitespace, cap blank-line runs at one, trim.
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = RE_CONTROL.replace_all(&text, "");
    let text = RE_SPACES.replace_all(&text, " ");
    let text = RE_BLANKS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

// ── Structural strategies ────────────────────────────────────────────────

/// Fast structural parse via lopdf.
pub struct LopdfStrategy;

#[async_trait]
impl TextStrategy for LopdfStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Lopdf
    }

    async fn attempt(
        &self,
        bytes: &[u8],
        _config: &ExtractionConfig,
    ) -> Result<String, StrategyError> {
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let doc = lopdf::Document::load_mem(&bytes)
                .map_err(|e| StrategyError::Failed(e.to_string()))?;
            let mut text = String::new();
            for (page_num, _) in doc.get_pages() {
                match doc.extract_text(&[page_num]) {
                    Ok(page_text) => {
                        text.push_str(&page_text);
                        text.push('\n');
                    }
                    Err(e) => debug!("lopdf page {} extraction failed: {}", page_num, e),
                }
            }
            Ok(text)
        })
        .await
        .map_err(|e| StrategyError::Failed(format!("lopdf task panicked: {e}")))?
    }
}

/// Alternative structural parse via pdf-extract.
pub struct PdfExtractStrategy;

#[async_trait]
impl TextStrategy for PdfExtractStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::PdfExtract
    }

    async fn attempt(
        &self,
        bytes: &[u8],
        _config: &ExtractionConfig,
    ) -> Result<String, StrategyError> {
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| StrategyError::Failed(e.to_string()))
        })
        .await
        // pdf-extract panics on some malformed files; the join error
        // becomes an ordinary failed attempt.
        .map_err(|e| StrategyError::Failed(format!("pdf-extract panicked: {e}")))?
    }
}

/// Layout-aware parse via pdfium. Requires the pdfium shared library on
/// the system; when it cannot be bound the strategy reports
/// `Unavailable` and the chain moves on.
pub struct PdfiumStrategy;

fn bind_pdfium() -> Result<Pdfium, StrategyError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| StrategyError::Unavailable(format!("pdfium binding: {e}")))?;
    Ok(Pdfium::new(bindings))
}

#[async_trait]
impl TextStrategy for PdfiumStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Pdfium
    }

    async fn attempt(
        &self,
        bytes: &[u8],
        _config: &ExtractionConfig,
    ) -> Result<String, StrategyError> {
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium()?;
            let document = pdfium
                .load_pdf_from_byte_slice(&bytes, None)
                .map_err(|e| StrategyError::Failed(format!("{e:?}")))?;
            let mut text = String::new();
            for page in document.pages().iter() {
                match page.text() {
                    Ok(page_text) => {
                        text.push_str(&page_text.all());
                        text.push('\n');
                    }
                    Err(e) => debug!("pdfium page text failed: {:?}", e),
                }
            }
            Ok(text)
        })
        .await
        .map_err(|e| StrategyError::Failed(format!("pdfium task panicked: {e}")))?
    }
}

// ── OCR strategy ─────────────────────────────────────────────────────────

/// Terminal fallback: rasterise pages via pdfium and hand each image to
/// the OCR engine.
pub struct OcrStrategy {
    engine: Arc<dyn OcrEngine>,
}

impl OcrStrategy {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl TextStrategy for OcrStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Ocr
    }

    async fn attempt(
        &self,
        bytes: &[u8],
        config: &ExtractionConfig,
    ) -> Result<String, StrategyError> {
        let pages = render_pages(bytes, config.max_ocr_pages).await?;
        if pages.is_empty() {
            return Err(StrategyError::Failed("no pages rendered".into()));
        }

        let mut text = String::new();
        for (idx, png) in pages.iter().enumerate() {
            match self.engine.recognize(png, &config.ocr_language).await {
                Ok(page_text) => {
                    text.push_str(&page_text);
                    text.push('\n');
                }
                Err(OcrError::Unavailable { detail }) => {
                    return Err(StrategyError::Unavailable(detail));
                }
                Err(OcrError::Failed { detail }) => {
                    debug!("OCR failed on page {}: {}", idx + 1, detail);
                }
            }
        }
        Ok(text)
    }
}

/// Rasterise up to `max_pages` pages to PNG bytes.
async fn render_pages(bytes: &[u8], max_pages: usize) -> Result<Vec<Vec<u8>>, StrategyError> {
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()
            .map_err(|_| StrategyError::Unavailable("pdfium needed to rasterise pages".into()))?;
        let document = pdfium
            .load_pdf_from_byte_slice(&bytes, None)
            .map_err(|e| StrategyError::Failed(format!("{e:?}")))?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(1654) // ~A4 at 200 DPI, plenty for OCR
            .set_maximum_height(2339);

        let mut pages = Vec::new();
        for page in document.pages().iter().take(max_pages) {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| StrategyError::Failed(format!("{e:?}")))?;
            let image = bitmap.as_image();
            let mut png = std::io::Cursor::new(Vec::new());
            image
                .write_to(&mut png, ImageFormat::Png)
                .map_err(|e| StrategyError::Failed(format!("png encode: {e}")))?;
            pages.push(png.into_inner());
        }
        Ok(pages)
    })
    .await
    .map_err(|e| StrategyError::Failed(format!("render task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedStrategy {
        method: ExtractionMethod,
        text: &'static str,
        calls: AtomicUsize,
    }

    impl FixedStrategy {
        fn new(method: ExtractionMethod, text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                method,
                text,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextStrategy for FixedStrategy {
        fn method(&self) -> ExtractionMethod {
            self.method
        }
        async fn attempt(
            &self,
            _bytes: &[u8],
            _config: &ExtractionConfig,
        ) -> Result<String, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.to_string())
        }
    }

    struct ErrStrategy(StrategyError);

    #[async_trait]
    impl TextStrategy for ErrStrategy {
        fn method(&self) -> ExtractionMethod {
            ExtractionMethod::Ocr
        }
        async fn attempt(
            &self,
            _bytes: &[u8],
            _config: &ExtractionConfig,
        ) -> Result<String, StrategyError> {
            match &self.0 {
                StrategyError::Unavailable(d) => Err(StrategyError::Unavailable(d.clone())),
                StrategyError::Failed(d) => Err(StrategyError::Failed(d.clone())),
            }
        }
    }

    fn long_text() -> &'static str {
        "Tender for the supply of cables with enough characters to pass the minimum recovered text threshold."
    }

    #[tokio::test]
    async fn first_sufficient_strategy_wins_and_later_ones_never_run() {
        let first = FixedStrategy::new(ExtractionMethod::Lopdf, long_text());
        let second = FixedStrategy::new(ExtractionMethod::PdfExtract, long_text());
        let strategies: Vec<Arc<dyn TextStrategy>> = vec![first.clone(), second.clone()];

        let config = ExtractionConfig::default();
        let (doc, errors) = recover_text(b"bytes", "doc.pdf", &strategies, &config).await;

        assert_eq!(doc.method, Some(ExtractionMethod::Lopdf));
        assert_eq!(doc.quality, TextQuality::Native);
        assert!(errors.is_empty());
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0, "later strategy ran");
    }

    #[tokio::test]
    async fn short_text_falls_through_to_next_strategy() {
        let short = FixedStrategy::new(ExtractionMethod::Lopdf, "tiny");
        let good = FixedStrategy::new(ExtractionMethod::PdfExtract, long_text());
        let strategies: Vec<Arc<dyn TextStrategy>> = vec![short, good.clone()];

        let config = ExtractionConfig::default();
        let (doc, _) = recover_text(b"bytes", "doc.pdf", &strategies, &config).await;

        assert_eq!(doc.method, Some(ExtractionMethod::PdfExtract));
        assert_eq!(doc.attempts.len(), 2);
        assert!(matches!(
            doc.attempts[0].outcome,
            AttemptOutcome::Insufficient { chars: 4 }
        ));
    }

    #[tokio::test]
    async fn ocr_success_is_flagged_on_quality() {
        let ocr = FixedStrategy::new(ExtractionMethod::Ocr, long_text());
        let strategies: Vec<Arc<dyn TextStrategy>> = vec![
            FixedStrategy::new(ExtractionMethod::Lopdf, ""),
            ocr,
        ];
        let config = ExtractionConfig::default();
        let (doc, _) = recover_text(b"bytes", "scan.pdf", &strategies, &config).await;
        assert_eq!(doc.quality, TextQuality::OcrUsed);
    }

    #[tokio::test]
    async fn all_failing_yields_marked_failure_not_abort() {
        let strategies: Vec<Arc<dyn TextStrategy>> = vec![
            Arc::new(ErrStrategy(StrategyError::Failed("bad xref".into()))),
            Arc::new(ErrStrategy(StrategyError::Unavailable(
                "no engine".into(),
            ))),
        ];
        let config = ExtractionConfig::default();
        let (doc, errors) = recover_text(b"bytes", "broken.pdf", &strategies, &config).await;

        assert_eq!(doc.quality, TextQuality::Failed);
        assert!(doc.text.is_empty());
        assert_eq!(doc.attempts.len(), 2);
        assert!(errors
            .iter()
            .any(|e| matches!(e, BranchError::ExtractionFailed { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, BranchError::OcrUnavailable { .. })));
    }

    #[test]
    fn clean_text_strips_control_and_collapses() {
        let cleaned = clean_text("a\x00b\x0b  c\r\nd\n\n\n\ne");
        assert_eq!(cleaned, "ab c\nd\n\ne");
    }
}
