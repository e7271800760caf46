//! Field classification: heuristic rules over paragraph units.
//!
//! An ordered rule set scans every unit; a rule may fire zero or more
//! times per paragraph. Scalar-field conflicts resolve by rule priority
//! first (an explicit "Delivery Period:" label outranks a generic date
//! pattern), then earliest paragraph, then earliest match within the
//! paragraph. List fields accumulate unique matches in first-occurrence
//! order. When no rule fires the field is simply absent — `None` or an
//! empty list — never an empty-string success.

use crate::record::{FieldCandidate, FieldKind, ParagraphUnit, TenderFields};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// One field-detection rule. Higher `priority` wins scalar reduction.
struct FieldRule {
    kind: FieldKind,
    name: &'static str,
    priority: u8,
    re: Regex,
}

fn rule(kind: FieldKind, name: &'static str, priority: u8, pattern: &str) -> FieldRule {
    FieldRule {
        kind,
        name,
        priority,
        re: RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("field rule pattern"),
    }
}

static RULES: Lazy<Vec<FieldRule>> = Lazy::new(|| {
    use FieldKind::*;
    vec![
        // ── Delivery ─────────────────────────────────────────────────
        rule(
            Delivery,
            "delivery-period-label",
            30,
            r"delivery\s+period[:\s]+\d+\s*(?:days?|weeks?|months?)(?:\s+from\s+\w+(?:\s\w+)?)?",
        ),
        rule(
            Delivery,
            "delivery-label",
            20,
            r"delivery[:\s]+(?:within\s+)?\d+\s*(?:days?|weeks?|months?)(?:\s+from\s+\w+(?:\s\w+)?)?",
        ),
        rule(
            Delivery,
            "lead-time-label",
            10,
            r"lead\s+time[:\s]+\d+\s*(?:days?|weeks?|months?)",
        ),
        // ── Deadline ─────────────────────────────────────────────────
        rule(
            Deadline,
            "submission-date-label",
            30,
            r"(?:submission|closing|last)\s+date[:\s]+\d{1,2}[/-]\d{1,2}[/-]\d{2,4}",
        ),
        rule(
            Deadline,
            "deadline-label",
            20,
            r"deadline[:\s]+\d{1,2}[/-]\d{1,2}[/-]\d{2,4}",
        ),
        rule(
            Deadline,
            "bid-submission-label",
            20,
            r"bid\s+submission[:\s]+\d{1,2}[/-]\d{1,2}[/-]\d{2,4}",
        ),
        rule(
            Deadline,
            "date-before-keyword",
            10,
            r"\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\s+(?:is\s+)?(?:the\s+)?(?:submission|closing|deadline)",
        ),
        // ── Warranty ─────────────────────────────────────────────────
        rule(
            Warranty,
            "warranty-label",
            30,
            r"warranty[:\s]+\d+\s*(?:years?|months?|days?)",
        ),
        rule(
            Warranty,
            "guarantee-label",
            20,
            r"guarantee[:\s]+\d+\s*(?:years?|months?|days?)",
        ),
        rule(
            Warranty,
            "trailing-warranty",
            10,
            r"\d+\s*(?:years?|months?|days?)\s+warranty",
        ),
        // ── Quantity ─────────────────────────────────────────────────
        rule(
            Quantity,
            "quantity-label",
            30,
            r"(?:quantity|qty\.?)[:\s]+\d+(?:[.,]\d+)?\s*(?:meters?|metres?|pieces?|units?|nos?\.?|sets?)",
        ),
        rule(
            Quantity,
            "amount-of",
            10,
            r"\d+(?:[.,]\d+)?\s*(?:meters?|metres?|pieces?|units?|nos?\.?|sets?)\s+(?:of|quantity)",
        ),
        // ── Voltage ──────────────────────────────────────────────────
        rule(
            Voltage,
            "voltage-grade-label",
            30,
            r"voltage\s+grade[:\s]+\d+\s*(?:k?V)\b",
        ),
        rule(Voltage, "voltage-label", 20, r"voltage[:\s]+\d+\s*(?:k?V)\b"),
        rule(Voltage, "grade-rating", 10, r"\d+\s*(?:k?V)\s*(?:grade|rating)"),
        // ── Standards ────────────────────────────────────────────────
        rule(
            Standard,
            "standard-code",
            20,
            r"\b(?:IS|IEC|IEEE|BS|ASTM|ISO)\s+\d+(?:[/-]\d+)*(?:\s*:\s*\d{4})?",
        ),
    ]
});

/// Proper-noun standard prefixes are case-sensitive in real documents
/// ("is 5" inside prose must not match). The standard-code rule above is
/// case-insensitive like the rest; this guard re-checks the prefix.
fn standard_prefix_ok(value: &str) -> bool {
    ["IS ", "IEC ", "IEEE ", "BS ", "ASTM ", "ISO "]
        .iter()
        .any(|p| value.starts_with(p))
}

// ── Whole-paragraph heuristics ───────────────────────────────────────────

const TECH_KEYWORDS: &[&str] = &[
    "specification",
    "technical",
    "standard",
    "grade",
    "voltage",
    "conductor",
    "insulation",
    "sheath",
    "compliance",
    "conforms to",
    "as per",
];

const TECH_TERMS: &[&str] = &[
    "conductor",
    "insulation",
    "sheath",
    "voltage",
    "grade",
    "specification",
    "compliance",
    "conforms",
    "as per",
];

const ITEM_KEYWORDS: &[&str] = &[
    "cable",
    "conductor",
    "insulation",
    "sheath",
    "wire",
    "item",
    "description",
    "material",
    "product",
];

const TENDER_KEYWORDS: &[&str] = &[
    "tender",
    "bid",
    "bidding",
    "rfq",
    "rfp",
    "request for quotation",
    "request for proposal",
    "procurement",
    "supply",
    "technical specification",
    "boq",
    "bill of quantities",
];

/// Does this paragraph read like a technical specification?
pub fn is_technical_spec(text: &str) -> bool {
    let lower = text.to_lowercase();
    let keyword_hits = TECH_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();
    let has_standard = ["IS ", "IEC ", "IEEE ", "BS ", "ASTM ", "ISO "]
        .iter()
        .any(|s| text.contains(s));
    let has_technical_term = TECH_TERMS.iter().any(|t| lower.contains(t));

    keyword_hits >= 1 || (has_standard && has_technical_term)
}

/// Does this paragraph read like a bill-of-quantities item description?
fn is_item_description(text: &str) -> bool {
    let lower = text.to_lowercase();
    let has_keyword = ITEM_KEYWORDS.iter().any(|k| lower.contains(k));
    // Headers are short or shouty; real item rows are neither.
    has_keyword && text.len() > 20 && text.chars().any(|c| c.is_lowercase())
}

/// Does this text look like a tender document at all? Used by callers to
/// skip unrelated documents before running the full pipeline.
pub fn is_tender_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    TENDER_KEYWORDS.iter().filter(|k| lower.contains(*k)).count() >= 2
}

// ── Classification ───────────────────────────────────────────────────────

/// Run every rule over every unit and collect candidates with provenance.
pub fn classify_units(units: &[ParagraphUnit]) -> Vec<FieldCandidate> {
    let mut candidates = Vec::new();

    for unit in units {
        for rule in RULES.iter() {
            for m in rule.re.find_iter(&unit.text) {
                let value = m.as_str().trim().to_string();
                if rule.kind == FieldKind::Standard && !standard_prefix_ok(&value) {
                    continue;
                }
                candidates.push(FieldCandidate {
                    kind: rule.kind,
                    value,
                    paragraph: unit.index,
                    rule: rule.name.to_string(),
                    priority: rule.priority,
                });
            }
        }

        if is_technical_spec(&unit.text) {
            candidates.push(FieldCandidate {
                kind: FieldKind::Spec,
                value: unit.text.clone(),
                paragraph: unit.index,
                rule: "spec-heuristic".to_string(),
                priority: 10,
            });
        }
        if is_item_description(&unit.text) {
            candidates.push(FieldCandidate {
                kind: FieldKind::ItemDescription,
                value: unit.text.clone(),
                paragraph: unit.index,
                rule: "item-heuristic".to_string(),
                priority: 10,
            });
        }
    }

    candidates
}

/// Reduce candidates into the record's field values.
///
/// Scalars: highest rule priority, then lowest paragraph index, then
/// earliest match. Lists: unique values (case-insensitive), order of
/// first occurrence.
pub fn reduce_candidates(candidates: &[FieldCandidate]) -> TenderFields {
    let mut fields = TenderFields {
        delivery: reduce_scalar(candidates, FieldKind::Delivery),
        deadline: reduce_scalar(candidates, FieldKind::Deadline),
        warranty: reduce_scalar(candidates, FieldKind::Warranty),
        voltage: reduce_scalar(candidates, FieldKind::Voltage),
        raw_specs: reduce_list(candidates, FieldKind::Spec),
        quantities: reduce_list(candidates, FieldKind::Quantity),
        standards: reduce_list(candidates, FieldKind::Standard),
        item_descriptions: reduce_list(candidates, FieldKind::ItemDescription),
        spec_text: None,
    };
    fields.spec_text = format_spec_text(&fields.raw_specs);
    fields
}

fn reduce_scalar(candidates: &[FieldCandidate], kind: FieldKind) -> Option<String> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.kind == kind)
        // min_by_key with (−priority, paragraph, position) picks the
        // documented winner deterministically.
        .min_by_key(|(pos, c)| (std::cmp::Reverse(c.priority), c.paragraph, *pos))
        .map(|(_, c)| c.value.clone())
}

fn reduce_list(candidates: &[FieldCandidate], kind: FieldKind) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut values = Vec::new();
    for c in candidates.iter().filter(|c| c.kind == kind) {
        let lowered = c.value.to_lowercase();
        if seen.contains(&lowered) {
            continue;
        }
        seen.push(lowered);
        values.push(c.value.clone());
    }
    values
}

/// Deterministic bullet-list rendering of the raw specs — the fallback
/// "formatted" representation used whenever refinement is absent.
pub fn format_spec_text(raw_specs: &[String]) -> Option<String> {
    if raw_specs.is_empty() {
        return None;
    }
    Some(
        raw_specs
            .iter()
            .map(|s| format!("• {s}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units_of(texts: &[&str]) -> Vec<ParagraphUnit> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| ParagraphUnit {
                index: i,
                text: t.to_string(),
                source_ref: "doc.pdf".into(),
            })
            .collect()
    }

    #[test]
    fn extracts_delivery_warranty_standard() {
        let units = units_of(&[
            "Delivery: 30 days from PO, Warranty: 2 years, Cable: 4 sqmm FR single core, IS 5831",
        ]);
        let fields = reduce_candidates(&classify_units(&units));
        assert_eq!(fields.delivery.as_deref(), Some("Delivery: 30 days from PO"));
        assert_eq!(fields.warranty.as_deref(), Some("Warranty: 2 years"));
        assert!(fields.standards.iter().any(|s| s == "IS 5831"), "{:?}", fields.standards);
    }

    #[test]
    fn scalar_priority_beats_paragraph_order() {
        // The generic lead-time match appears first, but the explicit
        // "Delivery Period:" label in a later paragraph outranks it.
        let units = units_of(&[
            "Lead time: 45 days as indicated",
            "Delivery period: 30 days from purchase order",
        ]);
        let fields = reduce_candidates(&classify_units(&units));
        assert_eq!(
            fields.delivery.as_deref(),
            Some("Delivery period: 30 days from purchase order")
        );
    }

    #[test]
    fn equal_priority_ties_break_on_earliest_paragraph() {
        let units = units_of(&[
            "Warranty: 2 years on all items",
            "Warranty: 5 years extended option",
        ]);
        let fields = reduce_candidates(&classify_units(&units));
        assert_eq!(fields.warranty.as_deref(), Some("Warranty: 2 years"));
    }

    #[test]
    fn list_fields_dedupe_preserving_first_occurrence() {
        let units = units_of(&[
            "Conforms to IS 5831 and IEC 60502",
            "Insulation as per IS 5831",
        ]);
        let fields = reduce_candidates(&classify_units(&units));
        assert_eq!(fields.standards, vec!["IS 5831", "IEC 60502"]);
    }

    #[test]
    fn no_match_means_absent_not_empty() {
        let units = units_of(&["Completely unrelated prose about gardening."]);
        let fields = reduce_candidates(&classify_units(&units));
        assert_eq!(fields.delivery, None);
        assert_eq!(fields.deadline, None);
        assert!(fields.quantities.is_empty());
        assert_eq!(fields.spec_text, None);
    }

    #[test]
    fn deadline_label_formats() {
        let units = units_of(&[
            "Last date: 15/09/2025 for submission",
            "Deadline: 01-10-2025",
        ]);
        let fields = reduce_candidates(&classify_units(&units));
        // submission-date-label (priority 30) wins over deadline-label (20)
        assert_eq!(fields.deadline.as_deref(), Some("Last date: 15/09/2025"));
    }

    #[test]
    fn quantity_keeps_unit_in_value() {
        let units = units_of(&["Quantity: 5000 meters, armoured cable"]);
        let fields = reduce_candidates(&classify_units(&units));
        assert_eq!(fields.quantities, vec!["Quantity: 5000 meters"]);
    }

    #[test]
    fn voltage_rules() {
        let units = units_of(&["Voltage grade: 1100 V as per drawing"]);
        let fields = reduce_candidates(&classify_units(&units));
        assert_eq!(fields.voltage.as_deref(), Some("Voltage grade: 1100 V"));
    }

    #[test]
    fn lowercase_is_prose_is_not_a_standard() {
        let units = units_of(&["this is 5 of the items supplied"]);
        let fields = reduce_candidates(&classify_units(&units));
        assert!(fields.standards.is_empty(), "{:?}", fields.standards);
    }

    #[test]
    fn spec_heuristic_flags_technical_paragraphs() {
        assert!(is_technical_spec(
            "XLPE insulation, conductor grade as per IS 7098"
        ));
        assert!(!is_technical_spec("Please find attached our invoice."));
    }

    #[test]
    fn item_description_heuristic() {
        let units = units_of(&[
            "Item 1: 4 sqmm FR single core copper cable, red",
            "CABLE", // shouty header, too short
        ]);
        let fields = reduce_candidates(&classify_units(&units));
        assert_eq!(fields.item_descriptions.len(), 1);
    }

    #[test]
    fn tender_text_detection() {
        assert!(is_tender_text(
            "Tender for supply of cables. Bill of quantities attached."
        ));
        assert!(!is_tender_text("Lunch menu for the office canteen."));
    }

    #[test]
    fn spec_text_is_bulleted() {
        let text = format_spec_text(&["alpha".into(), "beta".into()]).unwrap();
        assert_eq!(text, "• alpha\n• beta");
        assert_eq!(format_spec_text(&[]), None);
    }
}
