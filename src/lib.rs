//! # tender-extract
//!
//! Extract structured tender records from unstructured PDF documents.
//!
//! Tender documents arrive as PDFs of wildly varying quality — born-digital,
//! scanned, or a mix — and bury the facts that matter (deadlines,
//! quantities, technical specifications, standards, warranty terms) in
//! free-form prose and bill-of-quantities tables. This crate recovers the
//! text, finds those facts heuristically, and produces one normalized
//! [`TenderRecord`] per document, with full traceability from every
//! extracted value back to the paragraph it came from.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Recover   fallback chain: lopdf → pdf-extract → pdfium → OCR
//!  ├─ 2. Links     discover hyperlinked PDFs, fetch + recover recursively
//!  ├─ 3. Segment   ordered paragraph units (pure, idempotent)
//!  ├─ 4. Classify  field rules: specs, deadline, quantities, warranty, …
//!  │    └─ Tender ID  extract from text, or generate from the
//!  │                  persisted counter (runs concurrently with 4)
//!  ├─ 5. Refine    optional LLM cleanup — fail-open, raw values kept
//!  └─ 6. Record    TenderRecord + degradation flags
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tender_extract::{process_document, Collaborators, ExtractionConfig, FsStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bytes = std::fs::read("tender.pdf")?;
//!     let collab = Collaborators::new(Arc::new(FsStore::new("./output")));
//!     let config = ExtractionConfig::default();
//!
//!     let record = process_document(&bytes, "tender.pdf", None, &collab, &config).await?;
//!     println!("{}", record.to_json()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Degradation, not absence
//!
//! Every document yields either a complete record or a record whose
//! [`Degradation`] flags say exactly what failed — unreadable text, a
//! missing OCR engine, dead hyperlinks, a failed refinement call. A silent
//! empty output is not a possible outcome. The single fatal error is an
//! unusable tender-counter store without the explicit degraded-ids opt-in.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod prompts;
pub mod record;
pub mod services;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CounterPolicy, ExtractionConfig, ExtractionConfigBuilder};
pub use error::{BranchError, TenderError};
pub use pipeline::classify::is_tender_text;
pub use pipeline::recover::{default_strategies, StrategyError, TextStrategy};
pub use pipeline::tender_id::{TenderCounter, COUNTER_KEY};
pub use process::{process_document, Collaborators};
pub use record::{
    Degradation, EmailContext, ExtractionMethod, FieldCandidate, FieldKind, IdProvenance,
    ParagraphUnit, RecoveredDocument, RefinedFields, TenderFields, TenderIdentifier,
    TenderRecord, TextQuality,
};
pub use services::{
    ArtifactStore, FetchError, FsStore, HttpFetcher, LlmError, LlmService, MemoryStore,
    NetworkFetcher, OcrEngine, OcrError, OpenAiCompatClient, TesseractOcr,
};
