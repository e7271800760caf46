//! Error types for the tender-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`TenderError`] — **Fatal**: the record cannot be produced at all
//!   (corrupt counter store without a degraded-mode fallback, invalid
//!   configuration). Returned as `Err(TenderError)` from the top-level
//!   `process_*` functions.
//!
//! * [`BranchError`] — **Non-fatal**: one branch of the work failed (a text
//!   recovery strategy chain came up empty, a linked document could not be
//!   fetched, the refinement call timed out) but the rest of the record is
//!   fine. Branch failures are logged and surfaced through
//!   [`crate::record::Degradation`] flags on the finished record, so callers
//!   always see *what* failed rather than receiving a silently empty output.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the tender-extract library.
///
/// Per-branch failures use [`BranchError`] and are recorded on the
/// [`crate::record::TenderRecord`] rather than propagated here.
#[derive(Debug, Error)]
pub enum TenderError {
    /// The persisted tender counter could not be read, parsed, or written.
    ///
    /// Fatal to identifier resolution unless
    /// [`crate::config::ExtractionConfig::allow_degraded_ids`] is set, in
    /// which case a timestamp-suffixed identifier is issued instead.
    #[error("Tender counter store error: {detail}")]
    CounterStore { detail: String },

    /// The counter lock could not be acquired within the configured window.
    ///
    /// Another process is holding the lock, or a crashed process left a
    /// stale lock file behind.
    #[error("Timed out acquiring tender counter lock '{key}' after {elapsed_ms}ms")]
    CounterLockTimeout { key: String, elapsed_ms: u64 },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not write a record or artifact to the output location.
    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for one branch of a document's processing.
///
/// One failing branch never aborts siblings: a dead hyperlink prunes only
/// its own subtree, a missing OCR binary only downgrades image-only
/// documents, and a broken LLM endpoint only withholds refined fields.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum BranchError {
    /// Every text recovery strategy failed or returned insufficient text.
    /// The document is marked unreadable and processing continues with
    /// empty text.
    #[error("No text recovery strategy succeeded for '{source_ref}'")]
    ExtractionFailed { source_ref: String },

    /// The OCR engine is missing or misconfigured. OCR is skipped; earlier
    /// strategies' results (if any) stand.
    #[error("OCR engine unavailable: {detail}")]
    OcrUnavailable { detail: String },

    /// A discovered hyperlink could not be retrieved. That branch of the
    /// document tree is simply absent from the result.
    #[error("Failed to fetch linked document '{url}': {reason}")]
    LinkFetchFailed { url: String, reason: String },

    /// The LLM refinement call failed, timed out, or is not configured.
    /// Raw heuristic values are used unchanged.
    #[error("Refinement unavailable: {reason}")]
    RefinementUnavailable { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_store_display() {
        let e = TenderError::CounterStore {
            detail: "corrupt json".into(),
        };
        assert!(e.to_string().contains("corrupt json"));
    }

    #[test]
    fn lock_timeout_display() {
        let e = TenderError::CounterLockTimeout {
            key: "tender_counter".into(),
            elapsed_ms: 5000,
        };
        let msg = e.to_string();
        assert!(msg.contains("tender_counter"));
        assert!(msg.contains("5000ms"));
    }

    #[test]
    fn link_fetch_display() {
        let e = BranchError::LinkFetchFailed {
            url: "https://example.com/spec.pdf".into(),
            reason: "HTTP 404".into(),
        };
        assert!(e.to_string().contains("spec.pdf"));
        assert!(e.to_string().contains("404"));
    }
}
