//! Paragraph segmentation: recovered text → ordered, addressable units.
//!
//! A pure, deterministic function. Splitting happens on blank-line runs
//! and on structural markers (bullets, numbered/lettered list items);
//! hyphen-broken words are re-joined across line wraps and intra-paragraph
//! whitespace is collapsed. Idempotence is a contract: segmenting the
//! re-joined output yields the same units, so re-running the segmenter on
//! already-clean text is always safe.

use crate::record::ParagraphUnit;
use once_cell::sync::Lazy;
use regex::Regex;

/// A word broken across a line wrap: letter, hyphen, newline, letter.
static RE_HYPHEN_WRAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L})-\n[ \t]*(\p{L})").unwrap());

/// Blank-line runs separating paragraphs.
static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n+").unwrap());

/// Bullet characters and list markers that force a new unit.
static RE_LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[•‣◦·∙*\-+]|\d{1,3}[.)]|[a-z][.)])\s+").unwrap());

static RE_INTRA_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Segment recovered text into ordered paragraph units.
///
/// `start_index` is the index assigned to the first unit; corpus-wide
/// callers pass the running total so indices stay globally unique.
pub fn segment(text: &str, source_ref: &str, start_index: usize) -> Vec<ParagraphUnit> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let joined = RE_HYPHEN_WRAP.replace_all(&normalized, "$1$2");

    let mut units: Vec<ParagraphUnit> = Vec::new();
    for block in RE_BLANK_RUN.split(&joined) {
        for piece in split_block(block) {
            let cleaned = RE_INTRA_WS.replace_all(piece.trim(), " ").into_owned();
            if cleaned.is_empty() {
                continue;
            }
            units.push(ParagraphUnit {
                index: start_index + units.len(),
                text: cleaned,
                source_ref: source_ref.to_string(),
            });
        }
    }
    units
}

/// Split a blank-line-delimited block on structural list markers.
///
/// Lines starting with a marker open a new piece (marker stripped);
/// continuation lines are appended to the current piece.
fn split_block(block: &str) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    for line in block.lines() {
        if let Some(m) = RE_LIST_MARKER.find(line) {
            pieces.push(line[m.end()..].to_string());
        } else if let Some(current) = pieces.last_mut() {
            current.push('\n');
            current.push_str(line);
        } else {
            pieces.push(line.to_string());
        }
    }
    pieces
}

/// Re-join units into text whose segmentation reproduces the same units.
/// Used by tests to assert idempotence; exposed for callers that persist
/// a normalized corpus.
pub fn rejoin(units: &[ParagraphUnit]) -> String {
    units
        .iter()
        .map(|u| u.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(units: &[ParagraphUnit]) -> Vec<&str> {
        units.iter().map(|u| u.text.as_str()).collect()
    }

    #[test]
    fn splits_on_blank_lines() {
        let units = segment("first paragraph\n\nsecond paragraph", "doc.pdf", 0);
        assert_eq!(texts(&units), vec!["first paragraph", "second paragraph"]);
        assert_eq!(units[0].index, 0);
        assert_eq!(units[1].index, 1);
    }

    #[test]
    fn splits_on_bullets_and_numbered_items() {
        let text = "Scope of supply:\n• 4 sqmm FR cable\n• 6 sqmm cable\n1. First lot\n2) Second lot";
        let units = segment(text, "doc.pdf", 0);
        assert_eq!(
            texts(&units),
            vec![
                "Scope of supply:",
                "4 sqmm FR cable",
                "6 sqmm cable",
                "First lot",
                "Second lot"
            ]
        );
    }

    #[test]
    fn joins_hyphen_broken_words() {
        let units = segment("the insula-\ntion shall conform", "doc.pdf", 0);
        assert_eq!(texts(&units), vec!["the insulation shall conform"]);
    }

    #[test]
    fn collapses_intra_paragraph_whitespace() {
        let units = segment("Delivery:   30\tdays\nfrom   PO", "doc.pdf", 0);
        assert_eq!(texts(&units), vec!["Delivery: 30 days from PO"]);
    }

    #[test]
    fn drops_empty_units() {
        let units = segment("\n\n  \n\nonly one\n\n   \n", "doc.pdf", 0);
        assert_eq!(texts(&units), vec!["only one"]);
    }

    #[test]
    fn start_index_offsets_numbering() {
        let units = segment("a\n\nb", "linked.pdf", 7);
        assert_eq!(units[0].index, 7);
        assert_eq!(units[1].index, 8);
    }

    #[test]
    fn idempotent_on_rejoined_output() {
        let text = "Tender for cables.\n\n• Item one spec-\nification text\n• Item two\n\nDelivery:  30 days";
        let first = segment(text, "doc.pdf", 0);
        let second = segment(&rejoin(&first), "doc.pdf", 0);
        assert_eq!(first, second);
    }

    #[test]
    fn crlf_input_segments_identically() {
        let unix = segment("para one\n\npara two", "doc.pdf", 0);
        let dos = segment("para one\r\n\r\npara two", "doc.pdf", 0);
        assert_eq!(texts(&unix), texts(&dos));
    }
}
