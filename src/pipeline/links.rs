//! Hyperlink discovery: find URLs of dependent PDF documents.
//!
//! Discovery is best-effort, not validation: URLs come from two places —
//! the recovered text (regex scan) and, for local PDF bytes, the
//! document's URI annotations read structurally via lopdf. Malformed URLs
//! are dropped silently. The resolver only *yields* references; fetching
//! is the [`crate::services::NetworkFetcher`]'s job, and the traversal in
//! [`crate::process`] carries the visited set and the depth/count bounds.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// HTTP/HTTPS URLs; the character class mirrors what tender portals
/// actually emit and stops at whitespace and common delimiters.
static RE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).unwrap());

/// Bare `www.` links, normalised to https before use.
static RE_WWW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bwww\.[^\s<>"{}|\\^`\[\]]+"#).unwrap());

const TRAILING_JUNK: &[char] = &['.', ',', ';', ':', ')', '(', ']', '[', '}', '{', '"', '\''];

/// Extract candidate URLs from recovered text, deduplicated
/// (case-insensitively) in first-occurrence order.
pub fn extract_urls_from_text(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();

    let mut push = |raw: &str| {
        let cleaned = raw.trim_matches(TRAILING_JUNK);
        if cleaned.is_empty() {
            return;
        }
        let normalized = if cleaned.to_ascii_lowercase().starts_with("www.") {
            format!("https://{cleaned}")
        } else {
            cleaned.to_string()
        };
        if !normalized.starts_with("http") {
            return;
        }
        if !urls
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(&normalized))
        {
            urls.push(normalized);
        }
    };

    for m in RE_URL.find_iter(text) {
        push(m.as_str());
    }
    for m in RE_WWW.find_iter(text) {
        push(m.as_str());
    }

    urls
}

/// Extract URI link annotations from PDF bytes via lopdf. Best-effort:
/// any structural error yields an empty list.
pub fn extract_annotation_urls(bytes: &[u8]) -> Vec<String> {
    let doc = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            debug!("Annotation scan skipped (unparseable PDF): {}", e);
            return Vec::new();
        }
    };

    let mut urls = Vec::new();
    for (_, page_id) in doc.get_pages() {
        let Ok(page) = doc.get_dictionary(page_id) else {
            continue;
        };
        let Ok(annots) = page.get(b"Annots") else {
            continue;
        };
        let Some(annots) = as_array(&doc, annots) else {
            continue;
        };
        for annot in annots {
            let Some(annot) = as_dict(&doc, annot) else {
                continue;
            };
            let Ok(action) = annot.get(b"A") else {
                continue;
            };
            let Some(action) = as_dict(&doc, action) else {
                continue;
            };
            let Ok(uri) = action.get(b"URI") else {
                continue;
            };
            let uri = match uri {
                lopdf::Object::Reference(id) => match doc.get_object(*id) {
                    Ok(resolved) => resolved,
                    Err(_) => continue,
                },
                other => other,
            };
            if let lopdf::Object::String(raw, _) = uri {
                if let Ok(s) = std::str::from_utf8(raw) {
                    if !urls.iter().any(|u: &String| u.eq_ignore_ascii_case(s)) {
                        urls.push(s.to_string());
                    }
                }
            }
        }
    }
    urls
}

fn as_array<'a>(doc: &'a lopdf::Document, obj: &'a lopdf::Object) -> Option<&'a [lopdf::Object]> {
    match obj {
        lopdf::Object::Array(a) => Some(a),
        lopdf::Object::Reference(id) => match doc.get_object(*id).ok()? {
            lopdf::Object::Array(a) => Some(a),
            _ => None,
        },
        _ => None,
    }
}

fn as_dict<'a>(doc: &'a lopdf::Document, obj: &'a lopdf::Object) -> Option<&'a lopdf::Dictionary> {
    match obj {
        lopdf::Object::Dictionary(d) => Some(d),
        lopdf::Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok(),
        _ => None,
    }
}

/// Does this URL plausibly point at a PDF or a specification document?
pub fn is_pdf_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or("");
    path.ends_with(".pdf")
        || path.contains("pdf")
        || lower.contains("specification")
        || lower.contains("spec")
        || lower.contains("download")
}

/// Canonical form of a URL used by the traversal's visited set: parsed
/// scheme/host lowercased and the fragment dropped, so trivially
/// different spellings of the same resource count as one visit.
pub fn normalize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().to_ascii_lowercase(),
    }
}

/// Discover dependent-document URLs for one recovered document: text scan
/// plus annotation scan over the original bytes, filtered to PDF-looking
/// targets, deduplicated against each other.
pub fn discover_links(text: &str, bytes: Option<&[u8]>) -> Vec<String> {
    let mut urls = extract_urls_from_text(text);
    if let Some(bytes) = bytes {
        for u in extract_annotation_urls(bytes) {
            if !urls.iter().any(|e| e.eq_ignore_ascii_case(&u)) {
                urls.push(u);
            }
        }
    }
    let discovered: Vec<String> = urls.into_iter().filter(|u| is_pdf_url(u)).collect();
    debug!("Discovered {} candidate linked documents", discovered.len());
    discovered
}
