pub mod analysis;
pub mod content;
pub mod detail;
pub mod listing;
pub mod slots;

use crate::model::{DetailRecord, ListingEntry};

/// Listing page HTML → entries for its detail pages.
pub fn process_listing(html: &str, base_url: &str, version: &str) -> Vec<ListingEntry> {
    listing::parse_listing(html, base_url, version)
}

/// Detail page HTML → metadata + content-area boxes → slot-keyed record.
pub fn process_detail(html: &str) -> DetailRecord {
    detail::parse_detail(html, chrono::Utc::now().to_rfc3339())
}
