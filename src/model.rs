use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One row of a catalog listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub title: String,
    #[serde(rename = "data_id")]
    pub identifier: String,
    pub relative_path: String,
    pub detail_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    pub tag: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Ul,
    Ol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListBlock {
    #[serde(rename = "type")]
    pub kind: ListKind,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherElement {
    pub tag: String,
    pub text: String,
    #[serde(rename = "class")]
    pub classes: Vec<String>,
}

/// Everything pulled out of one container element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionContent {
    pub headings: Vec<Heading>,
    pub paragraphs: Vec<String>,
    pub lists: Vec<ListBlock>,
    pub other_elements: Vec<OtherElement>,
    pub raw_text: String,
}

impl SectionContent {
    /// Best single-string rendering: paragraphs, then list items, then
    /// headings, then the raw text fallback.
    pub fn primary_text(&self) -> String {
        if !self.paragraphs.is_empty() {
            return self.paragraphs.join("\n\n");
        }
        let items: Vec<&str> = self
            .lists
            .iter()
            .flat_map(|l| l.items.iter().map(String::as_str))
            .collect();
        if !items.is_empty() {
            return items.join("\n");
        }
        if !self.headings.is_empty() {
            return self
                .headings
                .iter()
                .map(|h| h.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
        }
        self.raw_text.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub content: SectionContent,
}

/// Full extraction result for one detail page. A re-scrape replaces it whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub success: bool,
    pub content_found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub scraped_at: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Slot name to section, in slot-name order.
    #[serde(default)]
    pub sections: BTreeMap<String, Section>,
}

impl DetailRecord {
    pub fn failed(error: impl Into<String>, scraped_at: String) -> Self {
        DetailRecord {
            success: false,
            content_found: false,
            error: Some(error.into()),
            scraped_at,
            ..Default::default()
        }
    }
}

/// A listing entry with its (possibly not yet scraped) detail record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    #[serde(flatten)]
    pub entry: ListingEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<DetailRecord>,
}

impl From<ListingEntry> for MetricRecord {
    fn from(entry: ListingEntry) -> Self {
        MetricRecord { entry, details: None }
    }
}

impl MetricRecord {
    pub fn succeeded(&self) -> bool {
        self.details.as_ref().is_some_and(|d| d.success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub href: String,
}

/// Element inventory of a content container. Empty groups are left out
/// of the JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSummary {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headings: Vec<Heading>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paragraphs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lists: Vec<ListBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub css_classes: Vec<String>,
}

/// Diagnostic view of one detail page's content container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub title: String,
    pub data_id: String,
    pub url: String,
    pub content_found: bool,
    pub elements: ElementSummary,
    pub text_content: String,
    pub error: Option<String>,
}

/// `{en: value, ko: null}`; the secondary language is filled by a later
/// translation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bilingual {
    pub en: Option<String>,
    pub ko: Option<String>,
}

impl Bilingual {
    pub fn english(text: String) -> Self {
        Bilingual { en: Some(text), ko: None }
    }
}

/// Fixed-shape, database-ready row. Every key is always serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedRecord {
    pub title_en: String,
    pub title_ko: Option<String>,
    pub data_id: String,
    pub relative_path: String,
    pub detail_url: String,

    pub reporting_format: Option<String>,
    pub metric_type: Option<String>,
    pub metric_level: Option<String>,
    pub iris_citation: Option<String>,

    pub definition: Option<Bilingual>,
    pub usage_guidance: Option<Bilingual>,
    pub impact_categories: Option<Bilingual>,
    pub sdg_goals: Option<Bilingual>,
    pub metric_history: Option<Bilingual>,
    pub related_metrics: Option<Bilingual>,

    pub scraped_at: Option<String>,
    pub translated_at: Option<String>,
    pub success: bool,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_text_prefers_paragraphs() {
        let c = SectionContent {
            paragraphs: vec!["a".into(), "b".into()],
            lists: vec![ListBlock { kind: ListKind::Ul, items: vec!["x".into()] }],
            raw_text: "a b x".into(),
            ..Default::default()
        };
        assert_eq!(c.primary_text(), "a\n\nb");
    }

    #[test]
    fn primary_text_falls_back() {
        let lists = SectionContent {
            lists: vec![ListBlock { kind: ListKind::Ol, items: vec!["x".into(), "y".into()] }],
            raw_text: "x y".into(),
            ..Default::default()
        };
        assert_eq!(lists.primary_text(), "x\ny");

        let raw = SectionContent { raw_text: "only raw".into(), ..Default::default() };
        assert_eq!(raw.primary_text(), "only raw");
    }

    #[test]
    fn converted_keeps_null_keys() {
        let r = ConvertedRecord {
            title_en: "Water Use".into(),
            title_ko: None,
            data_id: "PI1234".into(),
            relative_path: "/metric/pi1234/".into(),
            detail_url: String::new(),
            reporting_format: None,
            metric_type: None,
            metric_level: None,
            iris_citation: None,
            definition: None,
            usage_guidance: Some(Bilingual::english("x".into())),
            impact_categories: None,
            sdg_goals: None,
            metric_history: None,
            related_metrics: None,
            scraped_at: None,
            translated_at: None,
            success: true,
            version: "v5.3b".into(),
        };
        let v = serde_json::to_value(&r).unwrap();
        assert!(v["title_ko"].is_null());
        assert!(v["definition"].is_null());
        assert!(v["usage_guidance"]["ko"].is_null());
        assert_eq!(v["usage_guidance"]["en"], "x");
    }

    #[test]
    fn listing_entry_uses_data_id_key() {
        let e = ListingEntry {
            title: "Water Use".into(),
            identifier: "PI1234".into(),
            relative_path: "/metrics/pi1234".into(),
            detail_url: "https://iris.thegiin.org/metric/5.3b/pi1234/".into(),
        };
        let v = serde_json::to_value(MetricRecord::from(e)).unwrap();
        assert_eq!(v["data_id"], "PI1234");
        assert!(v.get("details").is_none());
    }
}
