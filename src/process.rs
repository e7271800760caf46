//! Full-document processing entry point.
//!
//! Drives the stage modules in order for one top-level source document:
//! recover text, traverse hyperlinked documents (bounded, cycle-safe),
//! segment the corpus, classify fields while resolving the tender
//! identifier, refine, and assemble the final [`TenderRecord`].
//!
//! Branch failures never abort the record: a dead link prunes its own
//! subtree, a failed recovery yields an empty-text document, and a broken
//! refinement endpoint leaves the raw fields authoritative. Only an
//! unusable counter store (without the degraded-ids opt-in) is fatal.

use crate::config::ExtractionConfig;
use crate::error::{BranchError, TenderError};
use crate::pipeline::{classify, links, recover, refine, segment, tender_id};
use crate::record::{
    Degradation, EmailContext, ParagraphUnit, RecoveredDocument, TenderRecord,
};
use crate::services::{ArtifactStore, LlmService, NetworkFetcher, OcrEngine};
use crate::pipeline::recover::TextStrategy;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The pipeline's external collaborators, injected per run.
///
/// Only the artifact store is mandatory (raw-text persistence and the
/// tender counter live there). Everything else is optional and its
/// absence simply narrows what the pipeline can do: no fetcher means no
/// linked-document recursion, no LLM means no refinement, no OCR engine
/// means scanned documents stay unreadable.
pub struct Collaborators {
    pub store: Arc<dyn ArtifactStore>,
    pub fetcher: Option<Arc<dyn NetworkFetcher>>,
    pub llm: Option<Arc<dyn LlmService>>,
    pub strategies: Vec<Arc<dyn TextStrategy>>,
}

impl Collaborators {
    /// Store plus the default strategy chain, no OCR, no network, no LLM.
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            fetcher: None,
            llm: None,
            strategies: recover::default_strategies(None),
        }
    }

    /// Rebuild the strategy chain with an OCR engine as terminal fallback.
    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.strategies = recover::default_strategies(Some(engine));
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn NetworkFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmService>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Replace the recovery chain entirely (tests, exotic formats).
    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn TextStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }
}

/// Process one document's bytes into a [`TenderRecord`].
///
/// # Arguments
/// * `bytes` — raw document bytes (born-digital or scanned PDF)
/// * `source_ref` — path or URL the bytes came from; becomes the record's
///   source reference and the raw-text artifact key
/// * `email` — optional email metadata; scanned for an identifier before
///   the document text
///
/// # Errors
/// Returns `Err` only for fatal conditions (counter store unusable
/// without degraded mode). Everything else degrades into flags on the
/// returned record.
pub async fn process_document(
    bytes: &[u8],
    source_ref: &str,
    email: Option<&EmailContext>,
    collab: &Collaborators,
    config: &ExtractionConfig,
) -> Result<TenderRecord, TenderError> {
    let start = Instant::now();
    info!("Processing document: {}", source_ref);
    let mut degraded = Degradation::default();

    // ── Step 1: Recover primary text ─────────────────────────────────────
    let (primary, branch_errors) =
        recover::recover_text(bytes, source_ref, &collab.strategies, config).await;
    apply_branch_errors(&mut degraded, &branch_errors);

    let raw_text_artifact = persist_raw_text(&collab.store, &primary).await;

    // ── Step 2: Traverse hyperlinked documents ───────────────────────────
    let (linked_docs, failed_links) =
        traverse_links(&primary, bytes, collab, config).await;
    degraded.failed_links = failed_links;

    // ── Step 3: Segment the corpus ───────────────────────────────────────
    let mut units: Vec<ParagraphUnit> = segment::segment(&primary.text, source_ref, 0);
    for doc in &linked_docs {
        let next_index = units.len();
        units.extend(segment::segment(&doc.text, &doc.source_ref, next_index));
    }
    debug!("Corpus segmented into {} units", units.len());

    // ── Step 4: Classify fields + resolve identifier, concurrently ───────
    // Both stages read the immutable unit sequence / primary text only.
    let counter = tender_id::TenderCounter::new(collab.store.clone());
    let (candidates, identifier) = tokio::join!(
        async { classify::classify_units(&units) },
        tender_id::resolve_identifier(email, &primary.text, &counter, config),
    );
    let identifier = identifier?;
    if identifier.provenance == crate::record::IdProvenance::Degraded {
        degraded.identifier_degraded = true;
    }

    let fields = classify::reduce_candidates(&candidates);

    // ── Step 5: Refinement (fail-open) ───────────────────────────────────
    let corpus_text = if linked_docs.is_empty() {
        primary.text.clone()
    } else {
        let mut merged = primary.text.clone();
        for doc in &linked_docs {
            merged.push_str("\n\n");
            merged.push_str(&doc.text);
        }
        merged
    };
    let (refined, refine_err) =
        refine::refine_fields(collab.llm.as_ref(), &fields, &corpus_text).await;
    if let Some(BranchError::RefinementUnavailable { reason }) = &refine_err {
        // "Not configured" is a caller's choice, not a degradation.
        if collab.llm.is_some() {
            warn!("Refinement degraded: {}", reason);
            degraded.refinement_failed = true;
        }
    }

    // ── Step 6: Assemble the record ──────────────────────────────────────
    let record = TenderRecord {
        tender_id: identifier,
        source_ref: source_ref.to_string(),
        linked_refs: linked_docs.iter().map(|d| d.source_ref.clone()).collect(),
        fields,
        refined,
        candidates,
        paragraph_count: units.len(),
        raw_text_artifact,
        degraded,
    };

    info!(
        "Record {} assembled in {}ms ({} candidates, {} linked docs)",
        record.tender_id.value,
        start.elapsed().as_millis(),
        record.candidates.len(),
        record.linked_refs.len()
    );
    Ok(record)
}

fn apply_branch_errors(degraded: &mut Degradation, errors: &[BranchError]) {
    for e in errors {
        match e {
            BranchError::ExtractionFailed { .. } => degraded.text_recovery_failed = true,
            BranchError::OcrUnavailable { .. } => degraded.ocr_unavailable = true,
            BranchError::LinkFetchFailed { url, .. } => {
                degraded.failed_links.push(url.clone())
            }
            BranchError::RefinementUnavailable { .. } => degraded.refinement_failed = true,
        }
    }
}

/// Persist recovered raw text to the store's audit side-channel. Failure
/// to persist is logged, never fatal.
async fn persist_raw_text(
    store: &Arc<dyn ArtifactStore>,
    doc: &RecoveredDocument,
) -> Option<String> {
    if doc.text.is_empty() {
        return None;
    }
    let key = format!("raw_text/{}_raw.txt", source_stem(&doc.source_ref));
    match store.write(&key, doc.text.as_bytes()).await {
        Ok(()) => Some(key),
        Err(e) => {
            warn!("Failed to persist raw text for '{}': {}", doc.source_ref, e);
            None
        }
    }
}

/// Filesystem-safe stem of a path or URL.
fn source_stem(source_ref: &str) -> String {
    let last = source_ref
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_ref);
    let stem = last.strip_suffix(".pdf").or_else(|| last.strip_suffix(".PDF")).unwrap_or(last);
    let safe: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if safe.is_empty() {
        "document".to_string()
    } else {
        safe
    }
}

/// Breadth-first traversal of hyperlinked documents.
///
/// Bounded three ways: the normalized-URL visited set (cycle guard), the
/// per-record depth limit, and the total linked-document ceiling. Each
/// branch failure is isolated — siblings keep going.
async fn traverse_links(
    primary: &RecoveredDocument,
    primary_bytes: &[u8],
    collab: &Collaborators,
    config: &ExtractionConfig,
) -> (Vec<RecoveredDocument>, Vec<String>) {
    let mut linked: Vec<RecoveredDocument> = Vec::new();
    let mut failed: Vec<String> = Vec::new();

    let Some(fetcher) = collab.fetcher.as_ref() else {
        let discovered = links::discover_links(&primary.text, Some(primary_bytes));
        if !discovered.is_empty() {
            debug!(
                "No fetcher configured; {} discovered links left unresolved",
                discovered.len()
            );
        }
        return (linked, failed);
    };

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(links::normalize_url(&primary.source_ref));

    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    for url in links::discover_links(&primary.text, Some(primary_bytes)) {
        queue.push_back((url, 1));
    }

    while let Some((url, depth)) = queue.pop_front() {
        if linked.len() >= config.max_linked_docs {
            debug!("Linked-document ceiling reached, stopping traversal");
            break;
        }
        if depth > config.max_link_depth {
            continue;
        }
        if !visited.insert(links::normalize_url(&url)) {
            continue;
        }

        let bytes = match fetcher.fetch(&url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("{}", BranchError::LinkFetchFailed {
                    url: url.clone(),
                    reason: e.to_string(),
                });
                failed.push(url);
                continue;
            }
        };

        let (doc, branch_errors) =
            recover::recover_text(&bytes, &url, &collab.strategies, config).await;
        for e in &branch_errors {
            debug!("Linked document branch issue: {}", e);
        }

        if doc.is_readable() && depth < config.max_link_depth {
            for next in links::discover_links(&doc.text, Some(&bytes)) {
                queue.push_back((next, depth + 1));
            }
        }
        linked.push(doc);
    }

    (linked, failed)
}
