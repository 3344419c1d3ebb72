use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use super::content::element_text;
use crate::model::ListingEntry;

static CATALOG_LIST: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".catalog-list").unwrap());
static LINKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static ID_SPAN: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.id").unwrap());
static TRAILING_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\([A-Za-z]{2}\d+\)\s*$").unwrap());

/// URL of listing page `page` (1-based).
pub fn listing_url(base_url: &str, page: u32) -> String {
    format!("{}/metrics/?page={}", base_url, page)
}

/// URL of an entity's detail page; empty when the identifier is unknown.
pub fn detail_url(base_url: &str, version: &str, identifier: &str) -> String {
    if identifier.is_empty() {
        return String::new();
    }
    format!("{}/metric/{}/{}/", base_url, version, identifier.to_lowercase())
}

/// Parse one listing page. A page without the catalog container yields no entries.
pub fn parse_listing(html: &str, base_url: &str, version: &str) -> Vec<ListingEntry> {
    let doc = Html::parse_document(html);
    let Some(catalog) = doc.select(&CATALOG_LIST).next() else {
        warn!("catalog-list element not found");
        return Vec::new();
    };

    catalog
        .select(&LINKS)
        .map(|link| {
            let href = link.value().attr("href").unwrap_or_default().to_string();
            let identifier = link
                .select(&ID_SPAN)
                .next()
                .and_then(|s| s.value().attr("data-id"))
                .unwrap_or_default()
                .trim()
                .to_string();
            let title = clean_title(&element_text(link));
            let entry = ListingEntry {
                detail_url: detail_url(base_url, version, &identifier),
                title,
                identifier,
                relative_path: href,
            };
            debug!("Listing entry: {} ({})", entry.title, entry.identifier);
            entry
        })
        .collect()
}

/// Drop a trailing "(PI1653)"-style identifier from link text.
fn clean_title(text: &str) -> String {
    TRAILING_ID_RE.replace(text, "").trim().to_string()
}
