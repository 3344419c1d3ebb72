mod backup;
mod catalog;
mod config;
mod convert;
mod crawl;
mod error;
mod fetch;
mod model;
mod parser;
mod scrapers;
mod store;
mod supabase;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{Settings, SupabaseConfig, Tier};
use crate::supabase::{ObjectStore, SupabaseClient};

#[derive(Parser)]
#[command(name = "metrics_scraper", about = "IRIS+ metric catalog scraper and Supabase loader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List, inspect and run the registered scrapers
    Scrapers {
        #[command(subcommand)]
        action: ScraperCmd,
    },
    /// Convert the complete envelope into database-ready rows
    Convert {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Upload converted rows to the Supabase table
    Upload {
        #[arg(long)]
        input: Option<PathBuf>,
        /// Delete every existing row first
        #[arg(long)]
        clear: bool,
    },
    /// Supabase Storage operations on the files bucket
    Storage {
        #[command(subcommand)]
        action: StorageCmd,
    },
    /// Local file catalog
    Catalog {
        #[command(subcommand)]
        action: CatalogCmd,
    },
    /// Storage backups
    Backup {
        #[command(subcommand)]
        action: BackupCmd,
    },
}

#[derive(Subcommand)]
enum ScraperCmd {
    /// Show registered scrapers
    List,
    /// Show one scraper's details
    Info { name: String },
    /// Run one scraper
    Run {
        name: String,
        /// Max pages/records to process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Run every scraper in order
    RunAll,
}

#[derive(Subcommand)]
enum StorageCmd {
    /// Upload a local directory recursively
    UploadDir {
        dir: PathBuf,
        #[arg(long, default_value = "")]
        prefix: String,
    },
    List { prefix: Option<String> },
    Download { remote: String, local: PathBuf },
    Delete { remote: String },
    /// Print a JSON manifest of the files under a prefix
    Manifest { prefix: Option<String> },
}

#[derive(Subcommand)]
enum CatalogCmd {
    /// Create tables and register default sources
    Init,
    Register {
        path: PathBuf,
        #[arg(long)]
        source: String,
        #[arg(long)]
        data_type: String,
        #[arg(long, default_value = "")]
        version: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    Sources,
    Files {
        #[arg(long)]
        source: Option<String>,
    },
    Search { query: String },
    Stats,
    /// Markdown report, printed or written to a file
    Report {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BackupCmd {
    Daily,
    Weekly,
    Monthly,
    /// Delete daily backups past the retention window
    Cleanup,
    Status,
    /// Run the backup scheduler until interrupted
    Schedule,
    /// Copy a backup back into a folder of the files bucket
    Restore { name: String, target: String },
}

fn init_logging(settings: &Settings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    match &settings.log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load().context("Invalid configuration")?;
    init_logging(&settings)?;

    let result = match cli.command {
        Commands::Scrapers { action } => run_scrapers(&settings, action),
        Commands::Convert { input, output } => {
            let input = input.unwrap_or_else(|| settings.data_dir.join(store::COMPLETE_FILE));
            let output = output.unwrap_or_else(|| settings.data_dir.join(store::CONVERTED_FILE));
            let env = scrapers::convert_file(&input, &output, &format!("v{}", settings.iris_version))?;
            println!("Converted {} metrics -> {}", env.metadata.total_metrics, output.display());
            for (slot, n) in convert::slot_counts(&env.metrics) {
                println!("  {:<18} {}", slot, n);
            }
            Ok(())
        }
        Commands::Upload { input, clear } => run_upload(&settings, input, clear),
        Commands::Storage { action } => run_storage(&settings, action),
        Commands::Catalog { action } => run_catalog(&settings, action),
        Commands::Backup { action } => run_backup(&settings, action),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_catalog(settings: &Settings) -> anyhow::Result<rusqlite::Connection> {
    let conn = catalog::connect(&settings.catalog_db)?;
    catalog::init_schema(&conn)?;
    Ok(conn)
}

/// Fails on missing credentials before any request is made.
fn client(settings: &Settings, tier: Tier) -> anyhow::Result<(SupabaseClient, SupabaseConfig)> {
    let cfg = settings.supabase(tier)?;
    let client = SupabaseClient::new(&cfg, settings.fetch().timeout)?;
    Ok((client, cfg))
}

fn run_scrapers(settings: &Settings, action: ScraperCmd) -> anyhow::Result<()> {
    match action {
        ScraperCmd::List => {
            for s in scrapers::registry() {
                println!("{:<14} {}", s.name(), s.description());
            }
            Ok(())
        }
        ScraperCmd::Info { name } => {
            let Some(s) = scrapers::find(&name) else {
                bail!("Unknown scraper '{}'. Try 'scrapers list'.", name);
            };
            println!("Name:        {}", s.name());
            println!("Description: {}", s.description());
            println!("Output:      {}", s.output_path(settings).display());
            Ok(())
        }
        ScraperCmd::Run { name, limit } => {
            let Some(s) = scrapers::find(&name) else {
                bail!("Unknown scraper '{}'. Try 'scrapers list'.", name);
            };
            let conn = open_catalog(settings)?;
            let fetcher = fetch::HttpFetcher::new(&settings.fetch())?;
            let ctx = scrapers::RunContext { settings, fetcher: &fetcher, conn: &conn };
            let path = scrapers::run_one(s.as_ref(), &ctx, limit)?;
            println!("{} -> {}", name, path.display());
            Ok(())
        }
        ScraperCmd::RunAll => {
            let conn = open_catalog(settings)?;
            let fetcher = fetch::HttpFetcher::new(&settings.fetch())?;
            let ctx = scrapers::RunContext { settings, fetcher: &fetcher, conn: &conn };
            let results = scrapers::run_all(&ctx);
            let mut failed = 0;
            for (name, r) in &results {
                match r {
                    Ok(path) => println!("  ok    {:<14} {}", name, path.display()),
                    Err(e) => {
                        failed += 1;
                        println!("  FAIL  {:<14} {:#}", name, e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} scrapers failed", failed, results.len());
            }
            Ok(())
        }
    }
}

fn run_upload(settings: &Settings, input: Option<PathBuf>, clear: bool) -> anyhow::Result<()> {
    let (client, cfg) = client(settings, Tier::Privileged)?;
    let input = input.unwrap_or_else(|| settings.data_dir.join(store::CONVERTED_FILE));
    let env: store::ConvertedEnvelope = store::load_json(&input)?;

    client.test_connection().context("Supabase connection test failed")?;
    if clear {
        client.clear()?;
    }
    let report = supabase::upload_records(&client, &env.metrics, cfg.chunk_size);
    println!(
        "Uploaded {}/{} rows in {} chunks ({} failed)",
        report.uploaded, report.expected, report.chunks, report.failed_chunks
    );
    match report.remote_count {
        Some(n) => println!(
            "Remote count: {} ({})",
            n,
            if report.verified { "verified" } else { "MISMATCH" }
        ),
        None => println!("Remote count unavailable"),
    }
    Ok(())
}

fn run_storage(settings: &Settings, action: StorageCmd) -> anyhow::Result<()> {
    let tier = match action {
        StorageCmd::UploadDir { .. } | StorageCmd::Delete { .. } => Tier::Privileged,
        _ => Tier::Read,
    };
    let (client, cfg) = client(settings, tier)?;
    let bucket = &cfg.storage_bucket;

    match action {
        StorageCmd::UploadDir { dir, prefix } => {
            client.create_bucket(bucket)?;
            let results = supabase::upload_dir(&client, bucket, &dir, &prefix)?;
            let failed: Vec<_> = results.iter().filter(|r| r.error.is_some()).collect();
            println!("Uploaded {}/{} files", results.len() - failed.len(), results.len());
            for r in failed {
                println!(
                    "  FAIL {} -> {}: {}",
                    r.local_path.display(),
                    r.remote_path,
                    r.error.as_deref().unwrap_or_default()
                );
            }
        }
        StorageCmd::List { prefix } => {
            let files = supabase::list_files(&client, bucket, prefix.as_deref().unwrap_or(""))?;
            for (path, info) in &files {
                let size = info.metadata.as_ref().and_then(|m| m.size).unwrap_or(0);
                println!("{:>10}  {}", size, path);
            }
            println!("{} files", files.len());
        }
        StorageCmd::Download { remote, local } => {
            let bytes = client.download(bucket, &remote)?;
            write_file(&local, &bytes)?;
            println!("{} -> {} ({} bytes)", remote, local.display(), bytes.len());
        }
        StorageCmd::Delete { remote } => {
            client.delete(bucket, &[remote.clone()])?;
            println!("Deleted {}", remote);
        }
        StorageCmd::Manifest { prefix } => {
            let m = supabase::manifest(&client, bucket, prefix.as_deref().unwrap_or(""))?;
            println!("{}", serde_json::to_string_pretty(&m)?);
        }
    }
    Ok(())
}

fn run_catalog(settings: &Settings, action: CatalogCmd) -> anyhow::Result<()> {
    let conn = open_catalog(settings)?;
    match action {
        CatalogCmd::Init => {
            let n = catalog::init_defaults(&conn)?;
            println!("Catalog ready at {} ({} sources)", settings.catalog_db.display(), n);
        }
        CatalogCmd::Register { path, source, data_type, version, description, tags } => {
            let id = catalog::register_file(
                &conn,
                &catalog::NewFile {
                    path: &path,
                    data_source: &source,
                    data_type: &data_type,
                    version: &version,
                    description: &description,
                    tags: &tags,
                },
            )?;
            println!("Registered {} as #{}", path.display(), id);
        }
        CatalogCmd::Sources => {
            for s in catalog::list_sources(&conn)? {
                println!(
                    "{:<12} {:<34} {:<16} {:<10} {}",
                    s.code,
                    truncate(&s.name, 34),
                    s.category,
                    s.status,
                    s.last_updated.as_deref().unwrap_or("-")
                );
            }
        }
        CatalogCmd::Files { source } => print_files(&catalog::list_files(&conn, source.as_deref())?),
        CatalogCmd::Search { query } => print_files(&catalog::search(&conn, &query)?),
        CatalogCmd::Stats => {
            println!("{}", serde_json::to_string_pretty(&catalog::stats(&conn)?)?);
        }
        CatalogCmd::Report { output } => {
            let md = catalog::report(&conn)?;
            match output {
                Some(path) => {
                    write_file(&path, md.as_bytes())?;
                    println!("Report written to {}", path.display());
                }
                None => print!("{}", md),
            }
        }
    }
    Ok(())
}

fn run_backup(settings: &Settings, action: BackupCmd) -> anyhow::Result<()> {
    let (client, cfg) = client(settings, Tier::Privileged)?;
    let conn = open_catalog(settings)?;
    let backups = backup::Backups {
        conn: &conn,
        store: &client,
        storage_bucket: cfg.storage_bucket.clone(),
        backup_bucket: cfg.backup_bucket.clone(),
        source_folder: String::new(),
        cfg: settings.backup(),
    };
    let now = chrono::Local::now().naive_local();

    let kind = match action {
        BackupCmd::Daily => backup::BackupKind::Daily,
        BackupCmd::Weekly => backup::BackupKind::Weekly,
        BackupCmd::Monthly => backup::BackupKind::Monthly,
        BackupCmd::Cleanup => {
            let n = backups.cleanup(now)?;
            println!("Removed {} expired daily backups", n);
            return Ok(());
        }
        BackupCmd::Status => {
            println!("{}", serde_json::to_string_pretty(&backups.status()?)?);
            return Ok(());
        }
        BackupCmd::Schedule => return backups.schedule(),
        BackupCmd::Restore { name, target } => {
            let n = backups.restore(&name, &target)?;
            println!("Restored {} objects from {} into {}", n, name, target);
            return Ok(());
        }
    };

    client.create_bucket(&cfg.backup_bucket)?;
    let name = backup::backup_name(kind, now);
    if backups.run(kind, now)? {
        println!("Backup {} complete", name);
        Ok(())
    } else {
        bail!("Backup {} failed", name)
    }
}

fn print_files(files: &[catalog::DataFile]) {
    if files.is_empty() {
        println!("No files found.");
        return;
    }
    println!(
        "{:>4} | {:<36} | {:<12} | {:<10} | {:>10}",
        "#", "File", "Source", "Type", "Bytes"
    );
    println!("{}", "-".repeat(84));
    for f in files {
        println!(
            "{:>4} | {:<36} | {:<12} | {:<10} | {:>10}",
            f.id,
            truncate(&f.filename, 36),
            f.data_source,
            f.data_type,
            f.file_size
        );
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
