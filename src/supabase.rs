//! Supabase REST (table rows) and Storage (objects) client.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::SupabaseConfig;
use crate::error::UploadError;
use crate::model::ConvertedRecord;

/// Row-level operations on the destination table.
pub trait TableApi {
    fn insert_many(&self, rows: &[ConvertedRecord]) -> Result<(), UploadError>;
    fn count(&self) -> Result<u64, UploadError>;
}

/// Object storage addressed by bucket + path.
pub trait ObjectStore {
    fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), UploadError>;
    /// One page of the direct children of `prefix`, sorted by name; folders
    /// come back with `id == None`.
    fn list_page(&self, bucket: &str, prefix: &str, limit: usize, offset: usize)
        -> Result<Vec<ObjectInfo>, UploadError>;
    /// Every direct child of `prefix`.
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>, UploadError> {
        paged(LIST_PAGE_SIZE, |limit, offset| self.list_page(bucket, prefix, limit, offset))
    }
    fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, UploadError>;
    fn delete(&self, bucket: &str, paths: &[String]) -> Result<(), UploadError>;
}

/// Largest page the storage list endpoint serves.
pub const LIST_PAGE_SIZE: usize = 1000;

/// Request pages of `page_size` until a short page comes back.
pub fn paged<T>(
    page_size: usize,
    mut fetch: impl FnMut(usize, usize) -> Result<Vec<T>, UploadError>,
) -> Result<Vec<T>, UploadError> {
    let mut all = Vec::new();
    loop {
        let page = fetch(page_size, all.len())?;
        let short = page.len() < page_size;
        all.extend(page);
        if short {
            return Ok(all);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub metadata: Option<ObjectMetadata>,
}

impl ObjectInfo {
    pub fn is_folder(&self) -> bool {
        self.id.is_none()
    }
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    key: String,
    table: String,
}

impl SupabaseClient {
    pub fn new(cfg: &SupabaseConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(SupabaseClient {
            client,
            base_url: cfg.url.clone(),
            key: cfg.key.clone(),
            table: cfg.table.clone(),
        })
    }

    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path.trim_start_matches('/'))
    }

    /// Cheap read against the table to prove URL and key are usable.
    pub fn test_connection(&self) -> Result<(), UploadError> {
        let rb = self.client.get(format!("{}?select=*&limit=1", self.table_url()));
        check(self.authed(rb).send()?)?;
        info!("Connection to {} ok", self.table);
        Ok(())
    }

    /// Delete every row in the table.
    pub fn clear(&self) -> Result<(), UploadError> {
        let rb = self.client.delete(format!("{}?id=not.is.null", self.table_url()));
        check(self.authed(rb).send()?)?;
        info!("Cleared table {}", self.table);
        Ok(())
    }

    /// Create a private bucket. An existing bucket is not an error.
    pub fn create_bucket(&self, bucket: &str) -> Result<(), UploadError> {
        let rb = self
            .client
            .post(format!("{}/storage/v1/bucket", self.base_url))
            .json(&json!({ "id": bucket, "name": bucket, "public": false }));
        match check(self.authed(rb).send()?) {
            Ok(_) => {
                info!("Created bucket {}", bucket);
                Ok(())
            }
            Err(UploadError::Rejected { status, body }) if status == 409 || body.contains("already exists") => {
                debug!("Bucket {} already exists", bucket);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl TableApi for SupabaseClient {
    fn insert_many(&self, rows: &[ConvertedRecord]) -> Result<(), UploadError> {
        let rb = self
            .client
            .post(self.table_url())
            .header("Prefer", "return=minimal")
            .json(rows);
        check(self.authed(rb).send()?)?;
        Ok(())
    }

    fn count(&self) -> Result<u64, UploadError> {
        let rb = self
            .client
            .get(format!("{}?select=id&limit=1", self.table_url()))
            .header("Prefer", "count=exact");
        let resp = check(self.authed(rb).send()?)?;
        resp.headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or(UploadError::MissingCountHeader)
    }
}

impl ObjectStore for SupabaseClient {
    fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), UploadError> {
        let rb = self
            .client
            .post(self.object_url(bucket, path))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes);
        check(self.authed(rb).send()?)?;
        debug!("Uploaded {}/{}", bucket, path);
        Ok(())
    }

    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ObjectInfo>, UploadError> {
        let rb = self
            .client
            .post(format!("{}/storage/v1/object/list/{}", self.base_url, bucket))
            .json(&json!({
                "prefix": prefix.trim_matches('/'),
                "limit": limit,
                "offset": offset,
                "sortBy": { "column": "name", "order": "asc" },
            }));
        let resp = check(self.authed(rb).send()?)?;
        Ok(resp.json()?)
    }

    fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, UploadError> {
        let rb = self.client.get(self.object_url(bucket, path));
        let resp = check(self.authed(rb).send()?)?;
        Ok(resp.bytes()?.to_vec())
    }

    fn delete(&self, bucket: &str, paths: &[String]) -> Result<(), UploadError> {
        let rb = self
            .client
            .delete(format!("{}/storage/v1/object/{}", self.base_url, bucket))
            .json(&json!({ "prefixes": paths }));
        check(self.authed(rb).send()?)?;
        info!("Deleted {} objects from {}", paths.len(), bucket);
        Ok(())
    }
}

fn check(resp: Response) -> Result<Response, UploadError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(UploadError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// Total from a PostgREST `Content-Range` value such as `0-0/120` or `*/0`.
pub fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

// ── Table upload ──

#[derive(Debug, Default, PartialEq)]
pub struct UploadReport {
    pub expected: usize,
    pub uploaded: usize,
    pub chunks: usize,
    pub failed_chunks: usize,
    pub remote_count: Option<u64>,
    /// Advisory only: remote count matched the expected total.
    pub verified: bool,
}

/// Insert `rows` in chunks of `chunk_size`. A rejected chunk is logged and
/// skipped; later chunks are still sent. Finishes with a count check.
pub fn upload_records(api: &dyn TableApi, rows: &[ConvertedRecord], chunk_size: usize) -> UploadReport {
    let chunk_size = chunk_size.max(1);
    let mut report = UploadReport {
        expected: rows.len(),
        ..Default::default()
    };

    let pb = ProgressBar::new(rows.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} rows") {
        pb.set_style(style.progress_chars("=> "));
    }

    for (i, chunk) in rows.chunks(chunk_size).enumerate() {
        report.chunks += 1;
        match api.insert_many(chunk) {
            Ok(()) => {
                report.uploaded += chunk.len();
                debug!("Chunk {} ok ({} rows, {} total)", i + 1, chunk.len(), report.uploaded);
            }
            Err(e) => {
                report.failed_chunks += 1;
                error!("Chunk {} rejected: {}", i + 1, e);
            }
        }
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();

    match api.count() {
        Ok(n) => {
            report.remote_count = Some(n);
            report.verified = n == rows.len() as u64;
            if !report.verified {
                warn!("Remote count {} does not match expected {}", n, rows.len());
            }
        }
        Err(e) => warn!("Count verification failed: {}", e),
    }

    info!(
        "Uploaded {}/{} rows in {} chunks ({} failed)",
        report.uploaded, report.expected, report.chunks, report.failed_chunks
    );
    report
}

// ── Storage helpers ──

/// Every file object under `prefix`, descending into folders. Paths are
/// returned relative to the bucket root.
pub fn list_files(store: &dyn ObjectStore, bucket: &str, prefix: &str) -> Result<Vec<(String, ObjectInfo)>, UploadError> {
    let prefix = prefix.trim_matches('/');
    let mut out = Vec::new();
    for obj in store.list(bucket, prefix)? {
        let path = if prefix.is_empty() {
            obj.name.clone()
        } else {
            format!("{}/{}", prefix, obj.name)
        };
        if obj.is_folder() {
            out.extend(list_files(store, bucket, &path)?);
        } else {
            out.push((path, obj));
        }
    }
    Ok(out)
}

#[derive(Debug)]
pub struct DirUpload {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub error: Option<String>,
}

/// Upload every file under `dir` to `prefix/<relative path>`.
pub fn upload_dir(store: &dyn ObjectStore, bucket: &str, dir: &Path, prefix: &str) -> Result<Vec<DirUpload>> {
    let mut files = Vec::new();
    collect_files(dir, &mut files).with_context(|| format!("Failed to read {}", dir.display()))?;
    files.sort();

    let prefix = prefix.trim_matches('/');
    let mut results = Vec::with_capacity(files.len());
    for local in files {
        let rel = local
            .strip_prefix(dir)
            .unwrap_or(&local)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let remote = if prefix.is_empty() { rel } else { format!("{}/{}", prefix, rel) };

        let error = match fs::read(&local) {
            Ok(bytes) => store
                .upload(bucket, &remote, bytes, content_type_for(&local))
                .err()
                .map(|e| e.to_string()),
            Err(e) => Some(e.to_string()),
        };
        match &error {
            None => info!("Uploaded {} -> {}", local.display(), remote),
            Some(e) => error!("Upload of {} failed: {}", local.display(), e),
        }
        results.push(DirUpload {
            local_path: local,
            remote_path: remote,
            error,
        });
    }
    Ok(results)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ManifestEntry {
    pub name: String,
    pub size: Option<u64>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub bucket: String,
    pub folder: String,
    pub total_files: usize,
    pub files: Vec<ManifestEntry>,
}

pub fn manifest(store: &dyn ObjectStore, bucket: &str, folder: &str) -> Result<Manifest, UploadError> {
    let files: Vec<ManifestEntry> = list_files(store, bucket, folder)?
        .into_iter()
        .map(|(name, info)| {
            let meta = info.metadata.unwrap_or_default();
            ManifestEntry {
                name,
                size: meta.size,
                last_modified: info.updated_at,
                content_type: meta.mimetype,
            }
        })
        .collect();
    Ok(Manifest {
        bucket: bucket.to_string(),
        folder: folder.to_string(),
        total_files: files.len(),
        files,
    })
}
