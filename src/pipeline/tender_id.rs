//! Tender identifier resolution: extract from text, or generate from the
//! persisted counter.
//!
//! The resolver is a small state machine over a single record:
//!
//! ```text
//! Unresolved ──▶ Extracted ──▶ Finalized
//!      │
//!      └───────▶ Generated ──▶ Finalized
//! ```
//!
//! Scan priority is email subject, then email body, then recovered PDF
//! text; the first pattern match wins verbatim. With no match, the
//! identifier comes from the persisted counter — the one piece of shared
//! mutable state in the system. Counter access is serialised through the
//! store's advisory lock, and the incremented value is durably persisted
//! *before* the identifier is considered valid (write-ahead), so a crash
//! between persist and return burns a number instead of ever issuing a
//! duplicate.

use crate::config::{CounterPolicy, ExtractionConfig};
use crate::error::TenderError;
use crate::record::{EmailContext, IdProvenance, TenderIdentifier};
use crate::services::ArtifactStore;
use once_cell::sync::Lazy;
use regex::RegexBuilder;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Store key under which counter state lives.
pub const COUNTER_KEY: &str = "tender_counter.json";

/// Labeled identifier patterns, most explicit first. The capture group is
/// the identifier code itself.
static ID_PATTERNS: Lazy<Vec<regex::Regex>> = Lazy::new(|| {
    [
        r"tender\s+(?:no|number|id)[.:\s]+([A-Z0-9][A-Z0-9\-/]{2,})",
        r"tender\s+reference[.:\s]+([A-Z0-9][A-Z0-9\-/]{2,})",
        r"bid\s+(?:no|number|id)[.:\s]+([A-Z0-9][A-Z0-9\-/]{2,})",
        r"rfq[.:\s]+([A-Z0-9][A-Z0-9\-/]{2,})",
        r"rfp[.:\s]+([A-Z0-9][A-Z0-9\-/]{2,})",
        // Bare code like TDR-2025-0012 anywhere in the text.
        r"\b([A-Z]{2,10}[-/]\d{4}[-/]\d{3,6})\b",
    ]
    .iter()
    .map(|p| {
        RegexBuilder::new(p)
            .case_insensitive(true)
            .build()
            .expect("identifier pattern")
    })
    .collect()
});

/// Scan one text for an identifier. Returns the matched code uppercased.
pub fn extract_identifier(text: &str) -> Option<String> {
    for re in ID_PATTERNS.iter() {
        if let Some(caps) = re.captures(text) {
            let value = caps[1].trim().trim_end_matches(['/', '-']).to_uppercase();
            if value.len() >= 3 {
                return Some(value);
            }
        }
    }
    None
}

// ── Persisted counter ────────────────────────────────────────────────────

/// The persisted counter over an [`ArtifactStore`].
///
/// State is a JSON object mapping scope (a year, or `"global"`) to the
/// last issued number. `next` performs the full locked read-modify-write
/// cycle and returns the freshly issued number.
pub struct TenderCounter {
    store: Arc<dyn ArtifactStore>,
    key: String,
}

impl TenderCounter {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            key: COUNTER_KEY.to_string(),
        }
    }

    pub fn with_key(store: Arc<dyn ArtifactStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    fn scope(policy: CounterPolicy, year: i32) -> String {
        match policy {
            CounterPolicy::PerYear => year.to_string(),
            CounterPolicy::Global => "global".to_string(),
        }
    }

    /// Issue the next counter value for the given scope.
    ///
    /// The incremented state is written back (atomically) before the lock
    /// is released and before the value is returned.
    pub async fn next(
        &self,
        policy: CounterPolicy,
        year: i32,
        lock_timeout_ms: u64,
    ) -> Result<u64, TenderError> {
        self.acquire_lock(lock_timeout_ms).await?;
        let result = self.next_locked(policy, year).await;
        // Release even when the read-modify-write failed.
        if let Err(e) = self.store.unlock(&self.key).await {
            warn!("Failed to release counter lock: {}", e);
        }
        result
    }

    /// Read the current value for the scope without consuming a number.
    pub async fn peek(&self, policy: CounterPolicy, year: i32) -> Result<u64, TenderError> {
        let state = self.load_state().await?;
        Ok(state
            .get(&Self::scope(policy, year))
            .copied()
            .unwrap_or(0))
    }

    async fn next_locked(&self, policy: CounterPolicy, year: i32) -> Result<u64, TenderError> {
        let mut state = self.load_state().await?;
        let scope = Self::scope(policy, year);
        let next = state.get(&scope).copied().unwrap_or(0) + 1;
        state.insert(scope, next);

        let bytes = serde_json::to_vec_pretty(&state).map_err(|e| TenderError::CounterStore {
            detail: format!("serialise counter state: {e}"),
        })?;
        self.store
            .write(&self.key, &bytes)
            .await
            .map_err(|e| TenderError::CounterStore {
                detail: format!("persist counter state: {e}"),
            })?;

        debug!("Counter advanced to {} for scope {}", next, year);
        Ok(next)
    }

    async fn load_state(&self) -> Result<BTreeMap<String, u64>, TenderError> {
        match self.store.read(&self.key).await {
            Ok(Some(bytes)) => {
                serde_json::from_slice(&bytes).map_err(|e| TenderError::CounterStore {
                    detail: format!("corrupt counter state: {e}"),
                })
            }
            Ok(None) => Ok(BTreeMap::new()),
            Err(e) => Err(TenderError::CounterStore {
                detail: format!("read counter state: {e}"),
            }),
        }
    }

    async fn acquire_lock(&self, lock_timeout_ms: u64) -> Result<(), TenderError> {
        let start = Instant::now();
        let mut backoff_ms = 5u64;
        loop {
            match self.store.try_lock(&self.key).await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    if start.elapsed() >= Duration::from_millis(lock_timeout_ms) {
                        return Err(TenderError::CounterLockTimeout {
                            key: self.key.clone(),
                            elapsed_ms: start.elapsed().as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(100);
                }
                Err(e) => {
                    return Err(TenderError::CounterStore {
                        detail: format!("acquire counter lock: {e}"),
                    })
                }
            }
        }
    }
}

// ── Resolution state machine ─────────────────────────────────────────────

/// Resolution progress for one record. Terminal state is `Finalized`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IdState {
    Unresolved,
    Extracted(String),
    Generated { value: String, counter: u64 },
    Degraded(String),
}

/// Resolve the tender identifier for one record.
///
/// Scans email subject/body first, then the recovered document text.
/// Falls back to generating from the counter; a broken counter store is
/// fatal unless `allow_degraded_ids` is set, in which case a
/// timestamp-suffixed identifier is issued with `Degraded` provenance.
pub async fn resolve_identifier(
    email: Option<&EmailContext>,
    document_text: &str,
    counter: &TenderCounter,
    config: &ExtractionConfig,
) -> Result<TenderIdentifier, TenderError> {
    let mut state = IdState::Unresolved;

    // Priority scan: subject, body, then PDF text.
    if let Some(email) = email {
        if let Some(id) = extract_identifier(&email.subject) {
            state = IdState::Extracted(id);
        } else if let Some(id) = extract_identifier(&email.body) {
            state = IdState::Extracted(id);
        }
    }
    if state == IdState::Unresolved {
        if let Some(id) = extract_identifier(document_text) {
            state = IdState::Extracted(id);
        }
    }

    if state == IdState::Unresolved {
        let year = config.effective_year();
        match counter
            .next(config.counter_policy, year, config.lock_timeout_ms)
            .await
        {
            Ok(n) => {
                state = IdState::Generated {
                    value: format!("{}-{}-{:04}", config.id_prefix, year, n),
                    counter: n,
                };
            }
            Err(e) if config.allow_degraded_ids => {
                warn!("Counter store unusable, issuing degraded identifier: {}", e);
                let nanos = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.subsec_nanos())
                    .unwrap_or(0);
                let secs = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                state = IdState::Degraded(format!(
                    "{}-{}-T{}{:03}",
                    config.id_prefix,
                    year,
                    secs,
                    nanos % 1000
                ));
            }
            Err(e) => return Err(e),
        }
    }

    // Finalize: attach provenance, never mutate afterwards.
    let identifier = match state {
        IdState::Extracted(value) => {
            info!("Extracted tender identifier: {}", value);
            TenderIdentifier {
                value,
                provenance: IdProvenance::Extracted,
                counter: None,
            }
        }
        IdState::Generated { value, counter } => {
            info!("Generated tender identifier: {}", value);
            TenderIdentifier {
                value,
                provenance: IdProvenance::Generated,
                counter: Some(counter),
            }
        }
        IdState::Degraded(value) => TenderIdentifier {
            value,
            provenance: IdProvenance::Degraded,
            counter: None,
        },
        IdState::Unresolved => unreachable!("identifier resolution always terminates"),
    };
    Ok(identifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryStore;

    #[test]
    fn extracts_labeled_tender_number() {
        assert_eq!(
            extract_identifier("Tender No: TDR-2024-0099 for cable supply"),
            Some("TDR-2024-0099".into())
        );
        assert_eq!(
            extract_identifier("bid number: GEM/2025/B/12345"),
            Some("GEM/2025/B/12345".into())
        );
        assert_eq!(
            extract_identifier("RFQ: ABC-123-XYZ follows"),
            Some("ABC-123-XYZ".into())
        );
    }

    #[test]
    fn extracts_bare_code() {
        assert_eq!(
            extract_identifier("reference code NTPC-2025-00371 applies"),
            Some("NTPC-2025-00371".into())
        );
    }

    #[test]
    fn no_identifier_in_plain_prose() {
        assert_eq!(extract_identifier("please supply cables soon"), None);
        assert_eq!(extract_identifier(""), None);
    }

    #[tokio::test]
    async fn counter_advances_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let counter = TenderCounter::new(store.clone());
        assert_eq!(
            counter.next(CounterPolicy::PerYear, 2025, 1000).await.unwrap(),
            1
        );
        assert_eq!(
            counter.next(CounterPolicy::PerYear, 2025, 1000).await.unwrap(),
            2
        );
        // Separate scope for another year.
        assert_eq!(
            counter.next(CounterPolicy::PerYear, 2026, 1000).await.unwrap(),
            1
        );
        assert_eq!(counter.peek(CounterPolicy::PerYear, 2025).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn corrupt_counter_state_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.write(COUNTER_KEY, b"not json at all").await.unwrap();
        let counter = TenderCounter::new(store);
        let err = counter
            .next(CounterPolicy::Global, 2025, 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, TenderError::CounterStore { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn resolver_prefers_email_subject() {
        let store = Arc::new(MemoryStore::new());
        let counter = TenderCounter::new(store);
        let config = ExtractionConfig::default();
        let email = EmailContext {
            subject: "RFP: SUBJ-2025-0001".into(),
            body: "see attachment, Tender No: BODY-2025-0002".into(),
        };
        let id = resolve_identifier(
            Some(&email),
            "Tender No: TEXT-2025-0003",
            &counter,
            &config,
        )
        .await
        .unwrap();
        assert_eq!(id.value, "SUBJ-2025-0001");
        assert_eq!(id.provenance, IdProvenance::Extracted);
        assert_eq!(id.counter, None);
    }

    #[tokio::test]
    async fn resolver_generates_write_ahead() {
        let store = Arc::new(MemoryStore::new());
        // Seed counter at 41 for 2025.
        store
            .write(COUNTER_KEY, br#"{"2025": 41}"#)
            .await
            .unwrap();
        let counter = TenderCounter::new(store.clone());
        let config = ExtractionConfig::builder().id_year(2025).build().unwrap();

        let id = resolve_identifier(None, "no code here", &counter, &config)
            .await
            .unwrap();
        assert_eq!(id.value, "TDR-2025-0042");
        assert_eq!(id.provenance, IdProvenance::Generated);
        assert_eq!(id.counter, Some(42));

        // Persisted state reflects the issued number.
        let state = store.read(COUNTER_KEY).await.unwrap().unwrap();
        let parsed: std::collections::BTreeMap<String, u64> =
            serde_json::from_slice(&state).unwrap();
        assert_eq!(parsed["2025"], 42);
    }

    #[tokio::test]
    async fn degraded_mode_requires_opt_in() {
        let store = Arc::new(MemoryStore::new());
        store.write(COUNTER_KEY, b"garbage").await.unwrap();
        let counter = TenderCounter::new(store.clone());

        let strict = ExtractionConfig::builder().id_year(2025).build().unwrap();
        assert!(resolve_identifier(None, "", &counter, &strict).await.is_err());

        let degraded_ok = ExtractionConfig::builder()
            .id_year(2025)
            .allow_degraded_ids(true)
            .build()
            .unwrap();
        let id = resolve_identifier(None, "", &counter, &degraded_ok)
            .await
            .unwrap();
        assert_eq!(id.provenance, IdProvenance::Degraded);
        assert!(id.value.starts_with("TDR-2025-T"));
    }

    #[tokio::test]
    async fn concurrent_generation_is_unique_and_gapless() {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(ExtractionConfig::builder().id_year(2025).build().unwrap());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            let config = config.clone();
            handles.push(tokio::spawn(async move {
                let counter = TenderCounter::new(store);
                resolve_identifier(None, "nothing extractable", &counter, config.as_ref())
                    .await
                    .unwrap()
                    .value
            }));
        }

        let mut values = Vec::new();
        for h in handles {
            values.push(h.await.unwrap());
        }
        values.sort();
        values.dedup();
        assert_eq!(values.len(), 10, "duplicate identifiers issued: {values:?}");

        let counter = TenderCounter::new(store);
        assert_eq!(
            counter.peek(CounterPolicy::PerYear, 2025).await.unwrap(),
            10
        );
    }
}
