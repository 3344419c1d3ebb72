use std::collections::BTreeSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};

use super::content::{element_text, extract_section, joined_text};
use super::detail::CONTENT_AREA;
use crate::error::ParseError;
use crate::model::{ContentAnalysis, ElementSummary, Link, ListingEntry};

static TABLES: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static LINKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static CLASSED: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[class]").unwrap());

pub const TEXT_PREVIEW_CHARS: usize = 500;

/// Inventory the `content-area` of a detail page: headings, paragraphs,
/// lists, table count, links, CSS classes in use and a text preview.
pub fn analyze_page(html: &str, entry: &ListingEntry) -> ContentAnalysis {
    let mut analysis = ContentAnalysis {
        title: entry.title.clone(),
        data_id: entry.identifier.clone(),
        url: entry.detail_url.clone(),
        content_found: false,
        elements: ElementSummary::default(),
        text_content: String::new(),
        error: None,
    };

    let doc = Html::parse_document(html);
    let Some(area) = doc.select(&CONTENT_AREA).next() else {
        analysis.error = Some(ParseError::MissingContainer("content-area").to_string());
        return analysis;
    };

    let section = extract_section(area);
    let tables = area.select(&TABLES).count();
    let links = area
        .select(&LINKS)
        .filter_map(|a| {
            a.value().attr("href").map(|href| Link {
                text: element_text(a),
                href: href.to_string(),
            })
        })
        .collect();
    let classes: BTreeSet<String> = area
        .select(&CLASSED)
        .flat_map(|el| el.value().classes().map(str::to_string).collect::<Vec<_>>())
        .collect();

    analysis.content_found = true;
    analysis.elements = ElementSummary {
        headings: section.headings,
        paragraphs: section.paragraphs,
        lists: section.lists,
        tables: (tables > 0).then_some(tables),
        links,
        css_classes: classes.into_iter().collect(),
    };
    analysis.text_content = joined_text(area).chars().take(TEXT_PREVIEW_CHARS).collect();
    analysis
}
