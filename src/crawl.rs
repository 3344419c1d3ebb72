use std::path::PathBuf;
use std::thread;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::config::CrawlConfig;
use crate::fetch::Fetcher;
use crate::model::{ContentAnalysis, DetailRecord, ListingEntry, MetricRecord};
use crate::parser::{self, analysis, listing};
use crate::store::{self, MetricsEnvelope};

/// Outcome of a detail batch run.
pub struct DetailRun {
    pub records: Vec<MetricRecord>,
    pub checkpoints: Vec<PathBuf>,
    pub ok: usize,
    pub errors: usize,
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// Walk listing pages `1..=listing_pages` serially. Failed pages are
/// logged and skipped.
pub fn crawl_listing(fetcher: &dyn Fetcher, cfg: &CrawlConfig) -> Vec<ListingEntry> {
    let pb = progress_bar(cfg.listing_pages as usize);
    let mut entries = Vec::new();

    for page in 1..=cfg.listing_pages {
        let url = listing::listing_url(&cfg.base_url, page);
        match fetcher.fetch(&url) {
            Ok(html) => {
                let found = parser::process_listing(&html, &cfg.base_url, &cfg.version);
                info!("Listing page {}: {} entries", page, found.len());
                entries.extend(found);
            }
            Err(e) => error!("Listing page {} failed: {}", page, e),
        }
        thread::sleep(cfg.request_delay);
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Collected {} listing entries from {} pages", entries.len(), cfg.listing_pages);
    entries
}

/// Fetch and extract every record's detail page, at most `limit` of them.
///
/// A fetch failure is recorded on the record and the loop moves on. The
/// full accumulated set is checkpointed after every `batch_size` records and
/// once more for a trailing partial batch.
pub fn process_details(
    fetcher: &dyn Fetcher,
    cfg: &CrawlConfig,
    records: Vec<MetricRecord>,
    limit: Option<usize>,
) -> DetailRun {
    let total = limit.map_or(records.len(), |n| n.min(records.len()));
    let batch = cfg.batch_size.max(1);
    let pb = progress_bar(total);

    let mut run = DetailRun {
        records: Vec::with_capacity(total),
        checkpoints: Vec::new(),
        ok: 0,
        errors: 0,
    };

    for mut record in records.into_iter().take(total) {
        let details = match fetcher.fetch(&record.entry.detail_url) {
            Ok(html) => parser::process_detail(&html),
            Err(e) => {
                warn!("Detail fetch failed for {}: {}", record.entry.identifier, e);
                DetailRecord::failed(e.to_string(), chrono::Utc::now().to_rfc3339())
            }
        };
        thread::sleep(cfg.request_delay);

        if details.success {
            run.ok += 1;
        } else {
            run.errors += 1;
        }
        record.details = Some(details);
        run.records.push(record);
        pb.inc(1);

        let done = run.records.len();
        if done % batch == 0 || done == total {
            let n = done.div_ceil(batch);
            let path = store::checkpoint_path(&cfg.checkpoint_dir, n);
            let env = MetricsEnvelope::detailed(run.records.clone(), &cfg.version);
            match store::save_json(&path, &env) {
                Ok(()) => {
                    info!("Checkpoint {} written ({}/{} records)", n, done, total);
                    run.checkpoints.push(path);
                }
                Err(e) => error!("Checkpoint {} failed: {}", n, e),
            }
            if done < total {
                thread::sleep(cfg.batch_pause);
            }
        }
    }

    pb.finish_and_clear();
    info!("Processed {} detail pages ({} ok, {} errors)", total, run.ok, run.errors);
    run
}

/// Content-area diagnostic over the last `last_n` entries. Entries whose
/// page cannot be fetched are skipped.
pub fn analyze_details(
    fetcher: &dyn Fetcher,
    cfg: &CrawlConfig,
    entries: &[ListingEntry],
    last_n: usize,
) -> Vec<ContentAnalysis> {
    let tail = &entries[entries.len().saturating_sub(last_n)..];
    let pb = progress_bar(tail.len());
    let mut results = Vec::with_capacity(tail.len());

    for entry in tail {
        match fetcher.fetch(&entry.detail_url) {
            Ok(html) => {
                let a = analysis::analyze_page(&html, entry);
                info!(
                    "Analyzed {} ({}): content {}",
                    entry.title,
                    entry.identifier,
                    if a.content_found { "found" } else { "missing" }
                );
                results.push(a);
            }
            Err(e) => warn!("Skipping analysis of {}: {}", entry.identifier, e),
        }
        thread::sleep(cfg.request_delay);
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Analyzed {} of {} detail pages", results.len(), tail.len());
    results
}
