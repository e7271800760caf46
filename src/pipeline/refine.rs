//! Refinement: optional LLM cleanup of the heuristic extraction.
//!
//! Strictly fail-open. No configured service, a network error, a timeout,
//! or an unparseable response all degrade to passing the raw heuristic
//! values through unchanged — the pipeline's correctness never depends on
//! this stage. When a call succeeds, refined values are stored alongside
//! the raw ones, never in their place, so the heuristic output stays
//! auditable byte for byte.

use crate::error::BranchError;
use crate::prompts;
use crate::record::{RefinedFields, TenderFields};
use crate::services::LlmService;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Loose shape of the structured-extraction response. Models sometimes
/// return non-string values or omit keys; everything is optional and
/// non-strings are ignored.
#[derive(Debug, Default, Deserialize)]
struct StructuredExtras {
    #[serde(default)]
    technical_specs: Option<serde_json::Value>,
    #[serde(default)]
    delivery: Option<serde_json::Value>,
    #[serde(default)]
    project_name: Option<serde_json::Value>,
    #[serde(default)]
    ministry: Option<serde_json::Value>,
}

fn value_to_text(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
        serde_json::Value::Array(items) => {
            let joined = items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            if joined.trim().is_empty() {
                None
            } else {
                Some(joined)
            }
        }
        _ => None,
    }
}

/// First JSON object embedded in a completion, fences and prose ignored.
static RE_JSON_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

fn parse_extras(completion: &str) -> Option<StructuredExtras> {
    let block = RE_JSON_BLOCK.find(completion)?.as_str();
    serde_json::from_str(block).ok()
}

/// Run the refinement pass over the reduced fields.
///
/// Returns refined values when the service succeeded, or `None` plus a
/// [`BranchError::RefinementUnavailable`] describing why it was skipped.
/// The input `fields` are never modified.
pub async fn refine_fields(
    llm: Option<&Arc<dyn LlmService>>,
    fields: &TenderFields,
    document_text: &str,
) -> (Option<RefinedFields>, Option<BranchError>) {
    let Some(llm) = llm else {
        debug!("Refinement skipped: no LLM service configured");
        return (
            None,
            Some(BranchError::RefinementUnavailable {
                reason: "not configured".into(),
            }),
        );
    };

    let mut refined = RefinedFields::default();
    let mut first_failure: Option<String> = None;

    // Pass 1: spec formatting — only when there are specs to format.
    if !fields.raw_specs.is_empty() {
        let prompt = prompts::spec_format_prompt(&fields.raw_specs);
        match llm.complete(prompts::SPEC_FORMAT_SYSTEM, &prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                refined.spec_text = Some(text.trim().to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Spec formatting call failed: {}", e);
                first_failure.get_or_insert_with(|| e.to_string());
            }
        }
    }

    // Pass 2: structured extras over the (bounded) document text.
    if !document_text.trim().is_empty() {
        let prompt = prompts::structured_info_prompt(document_text);
        match llm.complete(prompts::STRUCTURED_SYSTEM, &prompt).await {
            Ok(completion) => match parse_extras(&completion) {
                Some(extras) => {
                    if refined.spec_text.is_none() {
                        refined.spec_text = value_to_text(extras.technical_specs);
                    }
                    refined.delivery = value_to_text(extras.delivery);
                    refined.project_name = value_to_text(extras.project_name);
                    refined.ministry = value_to_text(extras.ministry);
                }
                None => {
                    warn!("Structured extraction returned no parseable JSON");
                    first_failure.get_or_insert_with(|| "unparseable JSON response".into());
                }
            },
            Err(e) => {
                warn!("Structured extraction call failed: {}", e);
                first_failure.get_or_insert_with(|| e.to_string());
            }
        }
    }

    if refined.is_empty() {
        let reason = first_failure.unwrap_or_else(|| "empty refinement result".into());
        return (None, Some(BranchError::RefinementUnavailable { reason }));
    }

    let error = first_failure.map(|reason| BranchError::RefinementUnavailable { reason });
    (Some(refined), error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{LlmError, LlmService};
    use async_trait::async_trait;

    struct CannedLlm {
        spec_reply: Result<&'static str, ()>,
        structured_reply: Result<&'static str, ()>,
    }

    #[async_trait]
    impl LlmService for CannedLlm {
        async fn complete(&self, system: &str, _user: &str) -> Result<String, LlmError> {
            let reply = if system == prompts::SPEC_FORMAT_SYSTEM {
                &self.spec_reply
            } else {
                &self.structured_reply
            };
            reply.map(|s| s.to_string()).map_err(|_| LlmError::Timeout { secs: 60 })
        }
    }

    fn fields_with_specs() -> TenderFields {
        TenderFields {
            raw_specs: vec!["XLPE insulation as per IS 7098".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn absent_service_passes_through() {
        let fields = fields_with_specs();
        let (refined, err) = refine_fields(None, &fields, "some text").await;
        assert!(refined.is_none());
        assert!(matches!(
            err,
            Some(BranchError::RefinementUnavailable { .. })
        ));
        // Raw fields untouched by construction: refine_fields takes &fields.
        assert_eq!(fields.raw_specs.len(), 1);
    }

    #[tokio::test]
    async fn failing_service_passes_through() {
        let llm: Arc<dyn LlmService> = Arc::new(CannedLlm {
            spec_reply: Err(()),
            structured_reply: Err(()),
        });
        let (refined, err) = refine_fields(Some(&llm), &fields_with_specs(), "text").await;
        assert!(refined.is_none());
        assert!(err.is_some());
    }

    #[tokio::test]
    async fn successful_refinement_is_stored_alongside() {
        let llm: Arc<dyn LlmService> = Arc::new(CannedLlm {
            spec_reply: Ok("• XLPE insulation, IS 7098"),
            structured_reply: Ok(
                r#"Here you go: {"technical_specs": "XLPE", "delivery": "30 days",
                   "project_name": "Rural Electrification", "ministry": "Power"}"#,
            ),
        });
        let (refined, err) = refine_fields(Some(&llm), &fields_with_specs(), "text").await;
        let refined = refined.unwrap();
        assert!(err.is_none());
        assert_eq!(refined.spec_text.as_deref(), Some("• XLPE insulation, IS 7098"));
        assert_eq!(refined.delivery.as_deref(), Some("30 days"));
        assert_eq!(refined.ministry.as_deref(), Some("Power"));
    }

    #[tokio::test]
    async fn non_string_json_values_are_ignored() {
        let llm: Arc<dyn LlmService> = Arc::new(CannedLlm {
            spec_reply: Err(()),
            structured_reply: Ok(r#"{"delivery": 30, "ministry": null, "project_name": "P"}"#),
        });
        let (refined, _) = refine_fields(Some(&llm), &TenderFields::default(), "text").await;
        let refined = refined.unwrap();
        assert_eq!(refined.delivery, None);
        assert_eq!(refined.ministry, None);
        assert_eq!(refined.project_name.as_deref(), Some("P"));
    }

    #[test]
    fn parse_extras_finds_embedded_json() {
        let extras =
            parse_extras("```json\n{\"delivery\": \"45 days\"}\n```").unwrap();
        assert_eq!(value_to_text(extras.delivery).as_deref(), Some("45 days"));
        assert!(parse_extras("no json here").is_none());
    }
}
