use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::info;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS data_sources (
            code             TEXT PRIMARY KEY,
            name             TEXT NOT NULL,
            description      TEXT NOT NULL DEFAULT '',
            website          TEXT NOT NULL DEFAULT '',
            category         TEXT NOT NULL DEFAULT '',
            update_frequency TEXT NOT NULL DEFAULT '',
            last_updated     TEXT,
            status           TEXT NOT NULL DEFAULT 'active'
                             CHECK(status IN ('active','inactive','deprecated'))
        );

        CREATE TABLE IF NOT EXISTS data_files (
            id            INTEGER PRIMARY KEY,
            filename      TEXT NOT NULL,
            data_source   TEXT NOT NULL,
            data_type     TEXT NOT NULL,
            version       TEXT NOT NULL DEFAULT '',
            file_path     TEXT NOT NULL,
            file_size     INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            description   TEXT NOT NULL DEFAULT '',
            tags          TEXT NOT NULL DEFAULT '[]',
            quality_score REAL
        );
        CREATE INDEX IF NOT EXISTS idx_files_source ON data_files(data_source);

        CREATE TABLE IF NOT EXISTS backups (
            id         INTEGER PRIMARY KEY,
            kind       TEXT NOT NULL CHECK(kind IN ('daily','weekly','monthly')),
            name       TEXT NOT NULL,
            created_at TEXT NOT NULL,
            success    BOOLEAN NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_backups_kind ON backups(kind);
        ",
    )?;
    Ok(())
}

// ── Sources ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSource {
    pub code: String,
    pub name: String,
    pub description: String,
    pub website: String,
    pub category: String,
    pub update_frequency: String,
    pub last_updated: Option<String>,
    pub status: String,
}

fn source(code: &str, name: &str, description: &str, website: &str, category: &str, freq: &str) -> DataSource {
    DataSource {
        code: code.into(),
        name: name.into(),
        description: description.into(),
        website: website.into(),
        category: category.into(),
        update_frequency: freq.into(),
        last_updated: None,
        status: "active".into(),
    }
}

pub fn default_sources() -> Vec<DataSource> {
    vec![
        source(
            "iris",
            "IRIS+ Metrics",
            "Impact investing metrics from the Global Impact Investing Network",
            "https://iris.thegiin.org/",
            "impact_investing",
            "quarterly",
        ),
        source(
            "un_sdg",
            "UN Sustainable Development Goals",
            "UN Sustainable Development Goal indicators",
            "https://unstats.un.org/sdgs/",
            "sustainability",
            "annual",
        ),
        source("esg_ratings", "ESG Ratings", "ESG assessment and rating data", "", "esg", "monthly"),
    ]
}

pub fn upsert_source(conn: &Connection, s: &DataSource) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO data_sources
         (code, name, description, website, category, update_frequency, last_updated, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![s.code, s.name, s.description, s.website, s.category, s.update_frequency, s.last_updated, s.status],
    )?;
    Ok(())
}

/// Register the built-in sources. Returns how many were written.
pub fn init_defaults(conn: &Connection) -> Result<usize> {
    let sources = default_sources();
    let tx = conn.unchecked_transaction()?;
    for s in &sources {
        upsert_source(&tx, s)?;
    }
    tx.commit()?;
    info!("Registered {} default data sources", sources.len());
    Ok(sources.len())
}

pub fn list_sources(conn: &Connection) -> Result<Vec<DataSource>> {
    let mut stmt = conn.prepare(
        "SELECT code, name, description, website, category, update_frequency, last_updated, status
         FROM data_sources ORDER BY code",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(DataSource {
                code: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                website: row.get(3)?,
                category: row.get(4)?,
                update_frequency: row.get(5)?,
                last_updated: row.get(6)?,
                status: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn touch_source(conn: &Connection, code: &str) -> Result<()> {
    conn.execute(
        "UPDATE data_sources SET last_updated = ?2 WHERE code = ?1",
        params![code, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

// ── Files ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataFile {
    pub id: i64,
    pub filename: String,
    pub data_source: String,
    pub data_type: String,
    pub version: String,
    pub file_path: String,
    pub file_size: i64,
    pub created_at: String,
    pub updated_at: String,
    pub description: String,
    pub tags: Vec<String>,
    pub quality_score: Option<f64>,
}

pub struct NewFile<'a> {
    pub path: &'a Path,
    pub data_source: &'a str,
    pub data_type: &'a str,
    pub version: &'a str,
    pub description: &'a str,
    pub tags: &'a [String],
}

/// Record a file on disk; its size is read from the filesystem.
pub fn register_file(conn: &Connection, f: &NewFile) -> Result<i64> {
    let size = fs::metadata(f.path)
        .with_context(|| format!("Failed to stat {}", f.path.display()))?
        .len() as i64;
    let filename = f
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let now = chrono::Utc::now().to_rfc3339();
    let tags = serde_json::to_string(f.tags)?;

    conn.execute(
        "INSERT INTO data_files
         (filename, data_source, data_type, version, file_path, file_size, created_at, updated_at, description, tags)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?9)",
        params![
            filename,
            f.data_source,
            f.data_type,
            f.version,
            f.path.to_string_lossy().into_owned(),
            size,
            now,
            f.description,
            tags,
        ],
    )?;
    touch_source(conn, f.data_source)?;
    info!("Registered {} ({} bytes) under {}", filename, size, f.data_source);
    Ok(conn.last_insert_rowid())
}

const FILE_COLUMNS: &str = "id, filename, data_source, data_type, version, file_path, file_size,
     created_at, updated_at, description, tags, quality_score";

fn file_from_row(row: &rusqlite::Row) -> rusqlite::Result<DataFile> {
    let tags: String = row.get(10)?;
    Ok(DataFile {
        id: row.get(0)?,
        filename: row.get(1)?,
        data_source: row.get(2)?,
        data_type: row.get(3)?,
        version: row.get(4)?,
        file_path: row.get(5)?,
        file_size: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        description: row.get(9)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        quality_score: row.get(11)?,
    })
}

pub fn list_files(conn: &Connection, data_source: Option<&str>) -> Result<Vec<DataFile>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM data_files WHERE ?1 IS NULL OR data_source = ?1 ORDER BY id",
        FILE_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![data_source], file_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Case-insensitive substring of filename or description, or an exact tag.
pub fn search(conn: &Connection, query: &str) -> Result<Vec<DataFile>> {
    let q = query.to_lowercase();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM data_files
         WHERE instr(lower(filename), ?1) > 0
            OR instr(lower(description), ?1) > 0
            OR EXISTS (SELECT 1 FROM json_each(data_files.tags) WHERE lower(value) = ?1)
         ORDER BY id",
        FILE_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![q], file_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats & report ──

#[derive(Debug, PartialEq, Serialize)]
pub struct CatalogStats {
    pub total_files: usize,
    pub total_size_mb: f64,
    pub by_source: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
}

fn grouped(conn: &Connection, column: &str) -> Result<BTreeMap<String, usize>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {0}, COUNT(*) FROM data_files GROUP BY {0}",
        column
    ))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(rows)
}

pub fn stats(conn: &Connection) -> Result<CatalogStats> {
    let (total, bytes): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(file_size), 0) FROM data_files",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(CatalogStats {
        total_files: total as usize,
        total_size_mb: (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
        by_source: grouped(conn, "data_source")?,
        by_type: grouped(conn, "data_type")?,
    })
}

pub fn report(conn: &Connection) -> Result<String> {
    let s = stats(conn)?;
    let mut out = String::new();
    writeln!(out, "# Data Catalog Report")?;
    writeln!(out, "Generated: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(out)?;
    writeln!(out, "## Totals")?;
    writeln!(out, "- Files: {}", s.total_files)?;
    writeln!(out, "- Size: {}MB", s.total_size_mb)?;
    writeln!(out)?;
    writeln!(out, "## Files by source")?;
    for (source, n) in &s.by_source {
        writeln!(out, "- {}: {}", source, n)?;
    }
    writeln!(out)?;
    writeln!(out, "## Files by type")?;
    for (kind, n) in &s.by_type {
        writeln!(out, "- {}: {}", kind, n)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = connect(&dir.path().join("catalog.sqlite")).unwrap();
        init_schema(&conn).unwrap();
        (dir, conn)
    }

    fn write(dir: &Path, name: &str, bytes: usize) -> std::path::PathBuf {
        let p = dir.join(name);
        fs::write(&p, vec![b'x'; bytes]).unwrap();
        p
    }

    #[test]
    fn default_sources_idempotent() {
        let (_dir, conn) = setup();
        init_defaults(&conn).unwrap();
        init_defaults(&conn).unwrap();
        let codes: Vec<_> = list_sources(&conn).unwrap().into_iter().map(|s| s.code).collect();
        assert_eq!(codes, vec!["esg_ratings", "iris", "un_sdg"]);
    }

    #[test]
    fn register_and_list() {
        let (dir, conn) = setup();
        init_defaults(&conn).unwrap();
        let p = write(dir.path(), "iris_metrics.json", 2048);
        let tags = vec!["metrics".to_string()];
        register_file(
            &conn,
            &NewFile {
                path: &p,
                data_source: "iris",
                data_type: "listing",
                version: "5.3b",
                description: "IRIS+ listing",
                tags: &tags,
            },
        )
        .unwrap();

        let files = list_files(&conn, Some("iris")).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "iris_metrics.json");
        assert_eq!(files[0].file_size, 2048);
        assert_eq!(files[0].tags, tags);
        assert!(list_files(&conn, Some("un_sdg")).unwrap().is_empty());
        assert_eq!(list_files(&conn, None).unwrap().len(), 1);

        let iris = list_sources(&conn).unwrap().into_iter().find(|s| s.code == "iris").unwrap();
        assert!(iris.last_updated.is_some());
    }

    #[test]
    fn search_matches_name_description_and_tag() {
        let (dir, conn) = setup();
        let a = write(dir.path(), "Water_Report.pdf", 10);
        let b = write(dir.path(), "other.xlsx", 10);
        let tags_a: Vec<String> = vec![];
        let tags_b = vec!["framework".to_string()];
        let reg = |p: &Path, desc: &str, tags: &[String]| {
            register_file(
                &conn,
                &NewFile { path: p, data_source: "un_sdg", data_type: "raw", version: "", description: desc, tags },
            )
            .unwrap();
        };
        reg(&a, "", &tags_a);
        reg(&b, "Indicator FRAMEWORK sheet", &tags_b);

        assert_eq!(search(&conn, "water").unwrap().len(), 1);
        assert_eq!(search(&conn, "Framework").unwrap()[0].filename, "other.xlsx");
        assert!(search(&conn, "nothing").unwrap().is_empty());
    }

    #[test]
    fn stats_and_report() {
        let (dir, conn) = setup();
        for (name, source, kind) in [("a.json", "iris", "listing"), ("b.json", "iris", "detail"), ("c.pdf", "un_sdg", "raw")] {
            let p = write(dir.path(), name, 1024 * 1024);
            register_file(
                &conn,
                &NewFile { path: &p, data_source: source, data_type: kind, version: "", description: "", tags: &[] },
            )
            .unwrap();
        }
        let s = stats(&conn).unwrap();
        assert_eq!(s.total_files, 3);
        assert_eq!(s.total_size_mb, 3.0);
        assert_eq!(s.by_source["iris"], 2);
        assert_eq!(s.by_type["raw"], 1);

        let md = report(&conn).unwrap();
        assert!(md.starts_with("# Data Catalog Report"));
        assert!(md.contains("- iris: 2"));
        assert!(md.contains("- Files: 3"));
    }

    #[test]
    fn register_missing_file_fails() {
        let (dir, conn) = setup();
        let missing = dir.path().join("absent.json");
        let err = register_file(
            &conn,
            &NewFile { path: &missing, data_source: "iris", data_type: "x", version: "", description: "", tags: &[] },
        );
        assert!(err.is_err());
    }
}
