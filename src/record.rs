//! Output types: everything the pipeline produces, from per-document
//! recovery results down to the final [`TenderRecord`].
//!
//! All types here are plain serde-serialisable data. A record is assembled
//! once per top-level source document, append-only while the pipeline runs,
//! and never mutated after [`crate::process::process_document`] returns.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Text recovery ────────────────────────────────────────────────────────

/// Which extraction backend produced (or tried to produce) a document's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Structural parse via `lopdf` — fastest, first in the chain.
    Lopdf,
    /// Alternative structural parse via `pdf-extract`.
    PdfExtract,
    /// Layout-aware parse via pdfium.
    Pdfium,
    /// Optical recognition over rasterised pages. Terminal fallback.
    Ocr,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lopdf => write!(f, "lopdf"),
            Self::PdfExtract => write!(f, "pdf-extract"),
            Self::Pdfium => write!(f, "pdfium"),
            Self::Ocr => write!(f, "ocr"),
        }
    }
}

/// Outcome of one strategy's attempt, kept for auditability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AttemptOutcome {
    /// Strategy produced text above the minimum-length threshold.
    Succeeded { chars: usize },
    /// Strategy ran but produced empty or near-empty text.
    Insufficient { chars: usize },
    /// Strategy raised an error.
    Failed { detail: String },
    /// Strategy's backing engine is not installed or not configured.
    Unavailable { detail: String },
}

/// One entry in a document's ordered extraction-attempt log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub method: ExtractionMethod,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Overall quality of a document's recovered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextQuality {
    /// A structural parse succeeded; text is born-digital.
    Native,
    /// Only OCR produced usable text — the document is scanned/image-only.
    OcrUsed,
    /// Every strategy failed; `text` is empty.
    Failed,
}

/// A source document after text recovery. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveredDocument {
    /// Path or URL the bytes came from.
    pub source_ref: String,
    /// Every strategy tried, in order.
    pub attempts: Vec<ExtractionAttempt>,
    /// The strategy that won, if any.
    pub method: Option<ExtractionMethod>,
    /// Full recovered text (empty when `quality` is `Failed`).
    pub text: String,
    pub quality: TextQuality,
}

impl RecoveredDocument {
    pub fn is_readable(&self) -> bool {
        self.quality != TextQuality::Failed
    }
}

// ── Segmentation ─────────────────────────────────────────────────────────

/// One addressable paragraph/line unit of recovered text.
///
/// Indices are assigned in segmentation order across the whole corpus
/// (primary document first, then linked documents in traversal order) and
/// are never reassigned afterwards — field candidates reference them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphUnit {
    pub index: usize,
    pub text: String,
    /// Source reference of the document this unit came from.
    pub source_ref: String,
}

// ── Classification ───────────────────────────────────────────────────────

/// Target fields of the structured record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Spec,
    Deadline,
    Quantity,
    Warranty,
    Voltage,
    Standard,
    ItemDescription,
    Delivery,
}

impl FieldKind {
    /// List-valued fields preserve every unique match; the rest reduce to
    /// a single value by rule priority.
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Self::Spec | Self::Quantity | Self::Standard | Self::ItemDescription
        )
    }
}

/// A single extracted value proposed for a field, with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub kind: FieldKind,
    pub value: String,
    /// Index of the [`ParagraphUnit`] the value was found in.
    pub paragraph: usize,
    /// Name of the detection rule that fired.
    pub rule: String,
    /// Rule priority; higher-specificity rules outrank generic patterns
    /// when reducing scalar fields.
    pub priority: u8,
}

// ── Identifier ───────────────────────────────────────────────────────────

/// How the tender identifier was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdProvenance {
    /// Matched an identifier pattern in the email or document text.
    Extracted,
    /// Issued from the persisted sequential counter.
    Generated,
    /// Counter store was unusable; a timestamp-suffixed identifier was
    /// issued under explicitly enabled degraded mode.
    Degraded,
}

/// The resolved tender identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderIdentifier {
    /// `TDR-YYYY-NNNN` when generated, verbatim extracted form otherwise.
    pub value: String,
    pub provenance: IdProvenance,
    /// The counter value this identifier consumed, when generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter: Option<u64>,
}

// ── Reduced fields ───────────────────────────────────────────────────────

/// The reduced heuristic field values of a record.
///
/// Absent scalars are `None` and absent lists are empty — never an
/// empty-string "success". These values are produced purely by the
/// heuristic classifier; refinement output lives separately in
/// [`RefinedFields`] so the raw values stay auditable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderFields {
    /// Deterministic bullet-list rendering of `raw_specs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_text: Option<String>,
    pub raw_specs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warranty: Option<String>,
    pub quantities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<String>,
    pub standards: Vec<String>,
    pub item_descriptions: Vec<String>,
}

/// LLM-refined versions of text fields, stored alongside (never replacing)
/// the raw heuristic values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinedFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ministry: Option<String>,
}

impl RefinedFields {
    pub fn is_empty(&self) -> bool {
        self.spec_text.is_none()
            && self.delivery.is_none()
            && self.project_name.is_none()
            && self.ministry.is_none()
    }
}

// ── Degradation flags ────────────────────────────────────────────────────

/// Explicit markers for everything that failed while building a record.
///
/// A record is either complete or carries these flags — a silent empty
/// output with no indication of what failed is not a legal outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    /// All text recovery strategies failed for the primary document.
    pub text_recovery_failed: bool,
    /// OCR was needed but the engine was unavailable.
    pub ocr_unavailable: bool,
    /// Discovered links that could not be fetched; those branches are
    /// absent from `linked_refs`.
    pub failed_links: Vec<String>,
    /// Refinement was attempted and failed; raw values are authoritative.
    pub refinement_failed: bool,
    /// The identifier was issued in degraded (timestamp) mode.
    pub identifier_degraded: bool,
}

impl Degradation {
    pub fn is_clean(&self) -> bool {
        !self.text_recovery_failed
            && !self.ocr_unavailable
            && self.failed_links.is_empty()
            && !self.refinement_failed
            && !self.identifier_degraded
    }
}

// ── Record ───────────────────────────────────────────────────────────────

/// Optional email metadata accompanying a document; consumed by the
/// identifier resolver, which scans subject and body before the PDF text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailContext {
    pub subject: String,
    pub body: String,
}

/// The final structured output of the pipeline — one per top-level
/// source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenderRecord {
    pub tender_id: TenderIdentifier,
    pub source_ref: String,
    /// Source references of linked documents that were recovered,
    /// deduplicated, in traversal order.
    pub linked_refs: Vec<String>,
    pub fields: TenderFields,
    /// Present only when the refinement call succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refined: Option<RefinedFields>,
    /// Every field candidate that fired, for traceability back to
    /// paragraph units.
    pub candidates: Vec<FieldCandidate>,
    /// Number of paragraph units the corpus segmented into.
    pub paragraph_count: usize,
    /// Artifact-store key of the persisted raw text, when stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text_artifact: Option<String>,
    pub degraded: Degradation,
}

impl TenderRecord {
    /// Serialise the record as pretty JSON, the shape persisted per tender.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_fields() {
        assert!(FieldKind::Quantity.is_list());
        assert!(FieldKind::Standard.is_list());
        assert!(FieldKind::Spec.is_list());
        assert!(!FieldKind::Deadline.is_list());
        assert!(!FieldKind::Voltage.is_list());
    }

    #[test]
    fn degradation_clean_by_default() {
        assert!(Degradation::default().is_clean());
        let d = Degradation {
            failed_links: vec!["https://example.com/x.pdf".into()],
            ..Default::default()
        };
        assert!(!d.is_clean());
    }

    #[test]
    fn record_json_roundtrip() {
        let record = TenderRecord {
            tender_id: TenderIdentifier {
                value: "TDR-2025-0042".into(),
                provenance: IdProvenance::Generated,
                counter: Some(42),
            },
            source_ref: "portal/tender.pdf".into(),
            linked_refs: vec![],
            fields: TenderFields::default(),
            refined: None,
            candidates: vec![],
            paragraph_count: 0,
            raw_text_artifact: None,
            degraded: Degradation::default(),
        };
        let json = record.to_json().unwrap();
        assert!(json.contains("TDR-2025-0042"));
        let back: TenderRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tender_id, record.tender_id);
    }
}
