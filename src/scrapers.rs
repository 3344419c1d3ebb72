use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use tracing::{error, info};

use crate::catalog::{self, NewFile};
use crate::config::Settings;
use crate::convert;
use crate::crawl;
use crate::fetch::Fetcher;
use crate::model::{ListingEntry, MetricRecord};
use crate::store::{self, AnalysisEnvelope, ConvertedEnvelope, MetricsEnvelope};

pub const CATALOG_SOURCE: &str = "iris";
/// Entries the content diagnostic looks at when no limit is given.
pub const DEFAULT_ANALYZE_COUNT: usize = 30;

/// Shared handles a scraper runs against.
pub struct RunContext<'a> {
    pub settings: &'a Settings,
    pub fetcher: &'a dyn Fetcher,
    pub conn: &'a Connection,
}

impl RunContext<'_> {
    fn data_path(&self, file: &str) -> PathBuf {
        self.settings.data_dir.join(file)
    }

    fn converted_version(&self) -> String {
        format!("v{}", self.settings.iris_version)
    }
}

pub trait Scraper {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// File name of the output.
    fn output(&self) -> &'static str;
    fn output_path(&self, settings: &Settings) -> PathBuf {
        settings.data_dir.join(self.output())
    }
    /// Whether `run_all` includes this scraper.
    fn in_pipeline(&self) -> bool {
        true
    }
    /// Catalog data type of the output.
    fn data_type(&self) -> &'static str;
    /// Run to completion and return the written file. `limit` caps the
    /// amount of work (pages or records) where meaningful.
    fn run(&self, ctx: &RunContext, limit: Option<usize>) -> Result<PathBuf>;
}

struct IrisListing;
struct IrisDetail;
struct IrisConvert;
struct IrisAnalyze;

impl Scraper for IrisListing {
    fn name(&self) -> &'static str {
        "iris"
    }
    fn description(&self) -> &'static str {
        "IRIS+ catalog listing pages -> metric identifiers and detail URLs"
    }
    fn output(&self) -> &'static str {
        store::LISTING_FILE
    }
    fn data_type(&self) -> &'static str {
        "listing"
    }

    fn run(&self, ctx: &RunContext, limit: Option<usize>) -> Result<PathBuf> {
        let mut cfg = ctx.settings.crawl();
        if let Some(n) = limit {
            cfg.listing_pages = cfg.listing_pages.min(n as u32);
        }
        let entries = crawl::crawl_listing(ctx.fetcher, &cfg);
        if entries.is_empty() {
            bail!("No listing entries found in {} pages", cfg.listing_pages);
        }
        let records: Vec<MetricRecord> = entries.into_iter().map(MetricRecord::from).collect();
        let path = self.output_path(ctx.settings);
        store::save_json(&path, &MetricsEnvelope::listing(records, &cfg.version))?;
        Ok(path)
    }
}

impl Scraper for IrisDetail {
    fn name(&self) -> &'static str {
        "iris_detail"
    }
    fn description(&self) -> &'static str {
        "IRIS+ detail pages -> slot-keyed sections, checkpointed in batches"
    }
    fn output(&self) -> &'static str {
        store::COMPLETE_FILE
    }
    fn data_type(&self) -> &'static str {
        "detail"
    }

    fn run(&self, ctx: &RunContext, limit: Option<usize>) -> Result<PathBuf> {
        let cfg = ctx.settings.crawl();
        let input = ctx.data_path(store::LISTING_FILE);
        let listing: MetricsEnvelope = store::load_json(&input)
            .with_context(|| format!("Run the iris scraper first ({} unreadable)", input.display()))?;

        let run = crawl::process_details(ctx.fetcher, &cfg, listing.metrics, limit);
        info!(
            "Detail run: {} ok, {} errors, {} checkpoints",
            run.ok,
            run.errors,
            run.checkpoints.len()
        );
        let path = self.output_path(ctx.settings);
        store::save_json(&path, &MetricsEnvelope::detailed(run.records, &cfg.version))?;
        Ok(path)
    }
}

impl Scraper for IrisConvert {
    fn name(&self) -> &'static str {
        "iris_convert"
    }
    fn description(&self) -> &'static str {
        "Complete IRIS+ records -> bilingual, database-ready rows"
    }
    fn output(&self) -> &'static str {
        store::CONVERTED_FILE
    }
    fn data_type(&self) -> &'static str {
        "converted"
    }

    fn run(&self, ctx: &RunContext, _limit: Option<usize>) -> Result<PathBuf> {
        let input = ctx.data_path(store::COMPLETE_FILE);
        let output = self.output_path(ctx.settings);
        convert_file(&input, &output, &ctx.converted_version())?;
        Ok(output)
    }
}

impl Scraper for IrisAnalyze {
    fn name(&self) -> &'static str {
        "iris_analyze"
    }
    fn description(&self) -> &'static str {
        "Content-area diagnostic over the last listing entries (default 30)"
    }
    fn output(&self) -> &'static str {
        store::ANALYSIS_FILE
    }
    fn output_path(&self, settings: &Settings) -> PathBuf {
        settings.temp_dir.join(self.output())
    }
    fn data_type(&self) -> &'static str {
        "analysis"
    }
    fn in_pipeline(&self) -> bool {
        false
    }

    fn run(&self, ctx: &RunContext, limit: Option<usize>) -> Result<PathBuf> {
        let cfg = ctx.settings.crawl();
        let input = ctx.data_path(store::LISTING_FILE);
        let listing: MetricsEnvelope = store::load_json(&input)
            .with_context(|| format!("Run the iris scraper first ({} unreadable)", input.display()))?;
        let entries: Vec<ListingEntry> = listing.metrics.into_iter().map(|m| m.entry).collect();

        let analyses = crawl::analyze_details(
            ctx.fetcher,
            &cfg,
            &entries,
            limit.unwrap_or(DEFAULT_ANALYZE_COUNT),
        );
        if analyses.is_empty() {
            bail!("No detail page could be analyzed");
        }
        let env = AnalysisEnvelope::new(analyses);
        info!(
            "Content area found on {}/{} pages",
            env.metadata.successful_analyses, env.metadata.total_analyzed
        );
        let path = self.output_path(ctx.settings);
        store::save_json(&path, &env)?;
        Ok(path)
    }
}

/// Read a complete envelope, convert it and write the converted envelope.
/// Returns the converted envelope for reporting.
pub fn convert_file(input: &Path, output: &Path, version: &str) -> Result<ConvertedEnvelope> {
    let complete: MetricsEnvelope =
        store::load_json(input).with_context(|| format!("Failed to load {}", input.display()))?;
    let rows = convert::convert_all(&complete.metrics, version);
    for (slot, n) in convert::slot_counts(&rows) {
        info!("{}: {}/{}", slot, n, rows.len());
    }
    let env = ConvertedEnvelope::new(rows, version);
    store::save_json(output, &env)?;
    Ok(env)
}

/// Every scraper, pipeline stages first in run-all order.
pub fn registry() -> Vec<Box<dyn Scraper>> {
    vec![
        Box::new(IrisListing),
        Box::new(IrisDetail),
        Box::new(IrisConvert),
        Box::new(IrisAnalyze),
    ]
}

pub fn find(name: &str) -> Option<Box<dyn Scraper>> {
    registry().into_iter().find(|s| s.name() == name)
}

/// Run one scraper and register its output in the catalog.
pub fn run_one(scraper: &dyn Scraper, ctx: &RunContext, limit: Option<usize>) -> Result<PathBuf> {
    info!("Running scraper {}", scraper.name());
    let path = scraper.run(ctx, limit)?;
    catalog::register_file(
        ctx.conn,
        &NewFile {
            path: &path,
            data_source: CATALOG_SOURCE,
            data_type: scraper.data_type(),
            version: &ctx.settings.iris_version,
            description: scraper.description(),
            tags: &[scraper.name().to_string()],
        },
    )?;
    Ok(path)
}

/// Run every pipeline scraper in order. A failure is reported and the rest
/// still run.
pub fn run_all(ctx: &RunContext) -> Vec<(&'static str, Result<PathBuf>)> {
    registry()
        .iter()
        .filter(|s| s.in_pipeline())
        .map(|s| {
            let result = run_one(s.as_ref(), ctx, None);
            if let Err(e) = &result {
                error!("Scraper {} failed: {:#}", s.name(), e);
            }
            (s.name(), result)
        })
        .collect()
}
