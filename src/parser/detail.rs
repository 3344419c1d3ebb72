use std::collections::BTreeMap;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::content::{element_text, extract_section};
use super::slots;
use crate::error::ParseError;
use crate::model::{DetailRecord, Section};

pub(super) static CONTENT_AREA: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".content-area").unwrap());
static METRIC_BOX: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.metric-box").unwrap());
static BOX_HEADER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("header, h1, h2, h3, h4, h5, h6").unwrap());
static BOX_SECTION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("section").unwrap());
static METADATA_LIST: LazyLock<Selector> = LazyLock::new(|| Selector::parse("section#metadata ul").unwrap());
static LIST_ITEMS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li").unwrap());

pub const METADATA_LABELS: &[&str] = &[
    "Reporting Format",
    "Metric Type",
    "Metric Level",
    "IRIS Metric Citation",
];

/// Extract a full detail record from a detail page. Never fails: a page
/// without the content container comes back with `content_found = false`
/// and the reason in `error`.
pub fn parse_detail(html: &str, scraped_at: String) -> DetailRecord {
    let doc = Html::parse_document(html);

    let Some(content_area) = doc.select(&CONTENT_AREA).next() else {
        let err = ParseError::MissingContainer("content-area");
        warn!("{}", err);
        return DetailRecord::failed(err.to_string(), scraped_at);
    };

    let metadata = extract_metadata(&doc);
    let boxes: Vec<ElementRef> = content_area.select(&METRIC_BOX).collect();
    let sections = map_boxes(&boxes);
    debug!("Extracted {} sections from {} metric boxes", sections.len(), boxes.len());

    DetailRecord {
        success: true,
        content_found: true,
        error: None,
        scraped_at,
        metadata,
        sections,
    }
}

/// Known label/value pairs from `section#metadata`.
pub fn extract_metadata(doc: &Html) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    let Some(list) = doc.select(&METADATA_LIST).next() else {
        return metadata;
    };
    for li in list.select(&LIST_ITEMS) {
        let text = element_text(li);
        if let Some(label) = METADATA_LABELS.iter().find(|l| text.contains(*l)) {
            metadata.insert(label.to_string(), text.replace(label, "").trim().to_string());
        }
    }
    metadata
}

/// Classify each box by its header and extract its content. Boxes without
/// a header are skipped; a later box with the same slot replaces an earlier one.
pub fn map_boxes(boxes: &[ElementRef]) -> BTreeMap<String, Section> {
    let mut sections = BTreeMap::new();
    for b in boxes {
        let Some(header) = b.select(&BOX_HEADER).next() else {
            continue;
        };
        let title = element_text(header);
        let body = b.select(&BOX_SECTION).next().unwrap_or(*b);
        let slot = slots::classify(&title);
        debug!("Box '{}' -> {}", title, slot);
        sections.insert(
            slot,
            Section {
                title,
                content: extract_section(body),
            },
        );
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> DetailRecord {
        let html = std::fs::read_to_string("tests/fixtures/iris_detail.html").unwrap();
        parse_detail(&html, "2026-01-01T00:00:00Z".into())
    }

    #[test]
    fn detail_fixture_slots() {
        let d = fixture();
        assert!(d.success);
        assert!(d.content_found);
        assert!(d.error.is_none());
        let keys: Vec<&str> = d.sections.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["calculation_and_notes", "definition", "impact_categories", "sdg_goals", "usage_guidance"]
        );
        assert_eq!(d.sections["usage_guidance"].content.paragraphs, vec!["Use this metric to..."]);
        assert_eq!(d.sections["definition"].title, "Water Use (PI1234)");
    }

    #[test]
    fn box_without_section_uses_box() {
        let d = fixture();
        let notes = &d.sections["calculation_and_notes"];
        assert_eq!(notes.title, "Calculation & Notes");
        assert!(notes.content.raw_text.contains("Report in cubic meters."));
        assert_eq!(notes.content.other_elements[0].text, "Report in cubic meters.");
    }

    #[test]
    fn headings_in_impact_categories() {
        let d = fixture();
        let texts: Vec<_> = d.sections["impact_categories"]
            .content
            .headings
            .iter()
            .map(|h| h.text.as_str())
            .collect();
        assert_eq!(texts, vec!["Water", "Climate"]);
    }

    #[test]
    fn metadata_labels() {
        let d = fixture();
        assert_eq!(d.metadata.len(), 4);
        assert_eq!(d.metadata["Reporting Format"], "Volume");
        assert_eq!(d.metadata["Metric Type"], "Performance");
        assert_eq!(d.metadata["Metric Level"], "Product/Service");
        assert_eq!(d.metadata["IRIS Metric Citation"], "IRIS+ System, PI1234, Water Use");
    }

    #[test]
    fn missing_container_is_not_fatal() {
        let d = parse_detail("<html><body><p>maintenance</p></body></html>", "t".into());
        assert!(!d.content_found);
        assert!(!d.success);
        assert!(d.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert!(d.sections.is_empty());
    }

    #[test]
    fn malformed_markup_does_not_panic() {
        let d = parse_detail(
            "<div class=\"content-area\"><div class=\"metric-box\"><header>Usage Guidance<section><p>unclosed",
            "t".into(),
        );
        assert!(d.content_found);
    }

    #[test]
    fn same_input_same_slots() {
        let a = fixture();
        let b = fixture();
        assert_eq!(a.sections, b.sections);
    }
}
