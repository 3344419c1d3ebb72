use std::collections::BTreeMap;

use tracing::info;

use crate::model::{Bilingual, ConvertedRecord, DetailRecord, MetricRecord};
use crate::parser::slots;

/// Slots carried into the converted schema, in column order.
pub const CONVERTED_SLOTS: &[&str] = &[
    slots::DEFINITION,
    slots::USAGE_GUIDANCE,
    slots::IMPACT_CATEGORIES,
    slots::SDG_GOALS,
    slots::METRIC_HISTORY,
    slots::RELATED_METRICS,
];

fn slot_stub(details: Option<&DetailRecord>, slot: &str) -> Option<Bilingual> {
    details?
        .sections
        .get(slot)
        .map(|s| Bilingual::english(s.content.primary_text()))
}

fn meta(details: Option<&DetailRecord>, label: &str) -> Option<String> {
    details?.metadata.get(label).cloned()
}

/// Project one scraped record onto the fixed database schema.
pub fn convert(record: &MetricRecord, version: &str) -> ConvertedRecord {
    let d = record.details.as_ref();
    ConvertedRecord {
        title_en: record.entry.title.clone(),
        title_ko: None,
        data_id: record.entry.identifier.clone(),
        relative_path: record.entry.relative_path.clone(),
        detail_url: record.entry.detail_url.clone(),

        reporting_format: meta(d, "Reporting Format"),
        metric_type: meta(d, "Metric Type"),
        metric_level: meta(d, "Metric Level"),
        iris_citation: meta(d, "IRIS Metric Citation"),

        definition: slot_stub(d, slots::DEFINITION),
        usage_guidance: slot_stub(d, slots::USAGE_GUIDANCE),
        impact_categories: slot_stub(d, slots::IMPACT_CATEGORIES),
        sdg_goals: slot_stub(d, slots::SDG_GOALS),
        metric_history: slot_stub(d, slots::METRIC_HISTORY),
        related_metrics: slot_stub(d, slots::RELATED_METRICS),

        scraped_at: d.map(|d| d.scraped_at.clone()),
        translated_at: None,
        success: d.map_or(true, |d| d.success),
        version: version.to_string(),
    }
}

pub fn convert_all(records: &[MetricRecord], version: &str) -> Vec<ConvertedRecord> {
    let converted: Vec<_> = records.iter().map(|r| convert(r, version)).collect();
    info!("Converted {} records", converted.len());
    converted
}

/// How many records populate each converted slot.
pub fn slot_counts(records: &[ConvertedRecord]) -> BTreeMap<&'static str, usize> {
    let mut counts: BTreeMap<&'static str, usize> = CONVERTED_SLOTS.iter().map(|s| (*s, 0)).collect();
    for r in records {
        let filled = [
            (slots::DEFINITION, &r.definition),
            (slots::USAGE_GUIDANCE, &r.usage_guidance),
            (slots::IMPACT_CATEGORIES, &r.impact_categories),
            (slots::SDG_GOALS, &r.sdg_goals),
            (slots::METRIC_HISTORY, &r.metric_history),
            (slots::RELATED_METRICS, &r.related_metrics),
        ];
        for (slot, value) in filled {
            if value.is_some() {
                *counts.entry(slot).or_default() += 1;
            }
        }
    }
    counts
}
