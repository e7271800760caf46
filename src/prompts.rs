//! Prompts for the LLM refinement pass.
//!
//! Centralising every prompt here keeps the refinement stage thin and
//! lets unit tests inspect prompt construction (including the length
//! bounds) without a live endpoint.

/// Cap on the raw-spec payload embedded in the formatting prompt.
pub const MAX_SPEC_PROMPT_CHARS: usize = 4000;

/// Cap on the document text embedded in the structured-extraction prompt.
pub const MAX_TEXT_PROMPT_CHARS: usize = 5000;

/// System prompt for formatting raw technical specifications.
pub const SPEC_FORMAT_SYSTEM: &str = "You are a technical specification formatter. \
Format technical specifications into clean, structured bullet points. \
Remove redundancy and organize information clearly.";

/// System prompt for structured field extraction.
pub const STRUCTURED_SYSTEM: &str = "You are a tender information extraction expert. \
Extract technical specifications, delivery deadlines, quantities, warranty, and other \
important information from tender documents. Return structured JSON format.";

/// Build the user prompt asking for cleaned spec bullet points.
pub fn spec_format_prompt(raw_specs: &[String]) -> String {
    let mut payload = String::new();
    for spec in raw_specs {
        if payload.len() + spec.len() + 1 > MAX_SPEC_PROMPT_CHARS {
            break;
        }
        payload.push_str(spec);
        payload.push('\n');
    }

    format!(
        "Format the following technical specifications into clean bullet points:\n\n\
{payload}\n\
Output format:\n\
- Each specification as a clear bullet point\n\
- Remove redundant information\n\
- Organize by category if applicable\n\
- Keep technical details precise"
    )
}

/// Build the user prompt asking for structured JSON extras.
pub fn structured_info_prompt(text: &str) -> String {
    let bounded = truncate_on_char_boundary(text, MAX_TEXT_PROMPT_CHARS);
    format!(
        "Extract the following information from this tender document text:\n\n\
{bounded}\n\n\
Extract ONLY these fields:\n\
1. Technical specifications (detailed, if present in document)\n\
2. Delivery deadline/period\n\
3. Project name (the name/title of the project/tender)\n\
4. Ministry (the ministry or department issuing the tender)\n\n\
Return as JSON with these keys: technical_specs, delivery, project_name, ministry"
    )
}

fn truncate_on_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_prompt_is_bounded() {
        let specs: Vec<String> = (0..200).map(|i| format!("spec item number {i} {}", "x".repeat(50))).collect();
        let prompt = spec_format_prompt(&specs);
        assert!(prompt.len() < MAX_SPEC_PROMPT_CHARS + 500);
        assert!(prompt.contains("spec item number 0"));
    }

    #[test]
    fn structured_prompt_truncates_on_char_boundary() {
        let text = "é".repeat(MAX_TEXT_PROMPT_CHARS); // 2 bytes per char
        let prompt = structured_info_prompt(&text);
        assert!(prompt.contains('é'));
        assert!(prompt.len() < MAX_TEXT_PROMPT_CHARS + 600);
    }

    #[test]
    fn structured_prompt_names_expected_keys() {
        let prompt = structured_info_prompt("short text");
        for key in ["technical_specs", "delivery", "project_name", "ministry"] {
            assert!(prompt.contains(key));
        }
    }
}
