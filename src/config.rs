//! Configuration types for the extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct
//! makes it trivial to share configs across concurrent pipeline runs and to
//! diff two runs to understand why their outputs differ.

use crate::error::TenderError;
use serde::{Deserialize, Serialize};

/// Scope of the persisted tender counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterPolicy {
    /// One counter per calendar year (default — the generated identifier
    /// format embeds the year, so numbering restarts each January).
    #[default]
    PerYear,
    /// A single counter shared across years.
    Global,
}

/// Configuration for a pipeline run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use tender_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .min_text_len(80)
///     .max_link_depth(1)
///     .llm_model("gpt-4o-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Minimum recovered-text length (chars, after cleanup) for a strategy
    /// to win the fallback chain. Default: 50.
    ///
    /// Below this, a structural parse almost certainly hit an image-only or
    /// garbled document and the next strategy should get its turn.
    pub min_text_len: usize,

    /// Maximum hyperlink recursion depth from the primary document.
    /// Default: 2.
    pub max_link_depth: usize,

    /// Hard ceiling on linked documents recovered per record, across all
    /// depths. Guarantees traversal termination together with the visited
    /// set. Default: 8.
    pub max_linked_docs: usize,

    /// Maximum pages rasterised and OCR'd for an image-only document.
    /// Default: 20.
    pub max_ocr_pages: usize,

    /// Language hint passed to the OCR engine. Default: "eng".
    pub ocr_language: String,

    /// Timeout for fetching one linked document. Default: 30 s.
    pub fetch_timeout_secs: u64,

    /// Per-LLM-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Retry attempts for a transient LLM failure. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (doubles per attempt).
    /// Default: 500.
    pub retry_backoff_ms: u64,

    /// Sampling temperature for refinement calls. Default: 0.3.
    pub temperature: f32,

    /// Maximum tokens per refinement completion. Default: 4000.
    pub max_tokens: usize,

    /// LLM model identifier, e.g. "gpt-4o-mini". `None` leaves the
    /// refinement stage unconfigured unless a service is injected directly.
    pub llm_model: Option<String>,

    /// Base URL of an OpenAI-compatible chat-completions endpoint.
    /// `None` uses the OpenAI default.
    pub llm_base_url: Option<String>,

    /// API key for the refinement endpoint.
    pub llm_api_key: Option<String>,

    /// Prefix used when generating identifiers. Default: "TDR".
    pub id_prefix: String,

    /// Calendar year embedded in generated identifiers and used by the
    /// per-year counter policy. `None` derives it from the system clock.
    pub id_year: Option<i32>,

    /// Counter scope. Default: [`CounterPolicy::PerYear`].
    pub counter_policy: CounterPolicy,

    /// How long to keep retrying counter-lock acquisition before giving
    /// up with a fatal error. Default: 5000 ms.
    pub lock_timeout_ms: u64,

    /// Issue a timestamp-suffixed identifier instead of failing when the
    /// counter store is unreadable. Explicit opt-in; the resulting record
    /// carries `identifier_degraded`. Default: false.
    pub allow_degraded_ids: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_len: 50,
            max_link_depth: 2,
            max_linked_docs: 8,
            max_ocr_pages: 20,
            ocr_language: "eng".to_string(),
            fetch_timeout_secs: 30,
            api_timeout_secs: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
            temperature: 0.3,
            max_tokens: 4000,
            llm_model: None,
            llm_base_url: None,
            llm_api_key: None,
            id_prefix: "TDR".to_string(),
            id_year: None,
            counter_policy: CounterPolicy::default(),
            lock_timeout_ms: 5000,
            allow_degraded_ids: false,
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The year used for generated identifiers: configured override, or
    /// the current year from the system clock.
    pub fn effective_year(&self) -> i32 {
        self.id_year.unwrap_or_else(current_year)
    }
}

/// Current calendar year derived from the system clock (UTC).
pub(crate) fn current_year() -> i32 {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    // Days-to-civil conversion (Howard Hinnant's algorithm), year part only.
    let days = (secs / 86_400) as i64 + 719_468;
    let era = days.div_euclid(146_097);
    let doe = days.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    (y + i64::from(mp >= 10)) as i32
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn min_text_len(mut self, n: usize) -> Self {
        self.config.min_text_len = n;
        self
    }

    pub fn max_link_depth(mut self, n: usize) -> Self {
        self.config.max_link_depth = n;
        self
    }

    pub fn max_linked_docs(mut self, n: usize) -> Self {
        self.config.max_linked_docs = n;
        self
    }

    pub fn max_ocr_pages(mut self, n: usize) -> Self {
        self.config.max_ocr_pages = n.max(1);
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn llm_model(mut self, model: impl Into<String>) -> Self {
        self.config.llm_model = Some(model.into());
        self
    }

    pub fn llm_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.llm_base_url = Some(url.into());
        self
    }

    pub fn llm_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.llm_api_key = Some(key.into());
        self
    }

    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.id_prefix = prefix.into();
        self
    }

    pub fn id_year(mut self, year: i32) -> Self {
        self.config.id_year = Some(year);
        self
    }

    pub fn counter_policy(mut self, policy: CounterPolicy) -> Self {
        self.config.counter_policy = policy;
        self
    }

    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.lock_timeout_ms = ms;
        self
    }

    pub fn allow_degraded_ids(mut self, v: bool) -> Self {
        self.config.allow_degraded_ids = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, TenderError> {
        let c = &self.config;
        if c.min_text_len == 0 {
            return Err(TenderError::InvalidConfig(
                "min_text_len must be ≥ 1".into(),
            ));
        }
        if c.id_prefix.is_empty() || !c.id_prefix.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(TenderError::InvalidConfig(format!(
                "id_prefix must be non-empty alphanumeric, got '{}'",
                c.id_prefix
            )));
        }
        if let Some(year) = c.id_year {
            if !(1970..=9999).contains(&year) {
                return Err(TenderError::InvalidConfig(format!(
                    "id_year out of range: {year}"
                )));
            }
        }
        Ok(self.config)
    }
}
