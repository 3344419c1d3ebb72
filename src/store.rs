use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PersistenceError;
use crate::model::{ContentAnalysis, ConvertedRecord, MetricRecord};

pub const LISTING_FILE: &str = "iris_metrics.json";
pub const COMPLETE_FILE: &str = "iris_metrics_complete.json";
pub const CONVERTED_FILE: &str = "iris_metrics_supabase_format.json";
pub const ANALYSIS_FILE: &str = "detail_analysis.json";
pub const SOURCE_NAME: &str = "IRIS+ System";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsMetadata {
    pub source: String,
    pub total_metrics: usize,
    pub scraped_at: String,
    pub version: String,
    /// Only present on detail envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<usize>,
}

/// Listing and detail results share this envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsEnvelope {
    pub metadata: MetricsMetadata,
    pub metrics: Vec<MetricRecord>,
}

impl MetricsEnvelope {
    pub fn listing(metrics: Vec<MetricRecord>, version: &str) -> Self {
        MetricsEnvelope {
            metadata: MetricsMetadata {
                source: SOURCE_NAME.to_string(),
                total_metrics: metrics.len(),
                scraped_at: now(),
                version: version.to_string(),
                successful: None,
            },
            metrics,
        }
    }

    pub fn detailed(metrics: Vec<MetricRecord>, version: &str) -> Self {
        let mut env = Self::listing(metrics, version);
        env.metadata.successful = Some(env.metrics.iter().filter(|m| m.succeeded()).count());
        env
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedMetadata {
    pub total_metrics: usize,
    pub converted_at: String,
    pub format: String,
    pub language_support: Vec<String>,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedEnvelope {
    pub metadata: ConvertedMetadata,
    pub metrics: Vec<ConvertedRecord>,
}

impl ConvertedEnvelope {
    pub fn new(metrics: Vec<ConvertedRecord>, version: &str) -> Self {
        ConvertedEnvelope {
            metadata: ConvertedMetadata {
                total_metrics: metrics.len(),
                converted_at: now(),
                format: "supabase_ready".to_string(),
                language_support: vec!["en".to_string(), "ko".to_string()],
                version: version.to_string(),
            },
            metrics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub total_analyzed: usize,
    pub analyzed_at: String,
    pub successful_analyses: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEnvelope {
    pub metadata: AnalysisMetadata,
    pub analyses: Vec<ContentAnalysis>,
}

impl AnalysisEnvelope {
    pub fn new(analyses: Vec<ContentAnalysis>) -> Self {
        AnalysisEnvelope {
            metadata: AnalysisMetadata {
                total_analyzed: analyses.len(),
                analyzed_at: now(),
                successful_analyses: analyses.iter().filter(|a| a.content_found).count(),
            },
            analyses,
        }
    }
}

pub fn checkpoint_path(dir: &Path, n: usize) -> PathBuf {
    dir.join(format!("final_metrics_temp_{}.json", n))
}

/// Pretty-printed (2-space) UTF-8 JSON. Parent directories are created.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let body = serde_json::to_string_pretty(value).map_err(|source| PersistenceError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, body).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Saved {}", path.display());
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let body = fs::read_to_string(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&body).map_err(|source| PersistenceError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DetailRecord, ListingEntry};

    fn record(id: &str, title: &str, ok: bool) -> MetricRecord {
        MetricRecord {
            entry: ListingEntry {
                title: title.into(),
                identifier: id.into(),
                relative_path: format!("/metric/5.3b/{}/", id.to_lowercase()),
                detail_url: String::new(),
            },
            details: Some(if ok {
                DetailRecord { success: true, content_found: true, ..Default::default() }
            } else {
                DetailRecord::failed("HTTP 500", "t".into())
            }),
        }
    }

    #[test]
    fn envelope_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(COMPLETE_FILE);
        let env = MetricsEnvelope::detailed(
            vec![record("PI1234", "Water Use", true), record("PI5678", "Énergie 사용", false)],
            "5.3b",
        );
        save_json(&path, &env).unwrap();

        let back: MetricsEnvelope = load_json(&path).unwrap();
        assert_eq!(back.metrics.len(), 2);
        let ids: Vec<_> = back.metrics.iter().map(|m| m.entry.identifier.as_str()).collect();
        assert_eq!(ids, vec!["PI1234", "PI5678"]);
        assert_eq!(back.metadata.successful, Some(1));
        assert_eq!(back, env);
    }

    #[test]
    fn writes_readable_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LISTING_FILE);
        let env = MetricsEnvelope::listing(vec![record("PI1", "사용 Énergie", true)], "5.3b");
        save_json(&path, &env).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("사용 Énergie"));
        assert!(text.contains("\n  \"metadata\": {"));
        assert!(!text.contains("\"successful\""));
    }

    #[test]
    fn converted_metadata() {
        let env = ConvertedEnvelope::new(Vec::new(), "v5.3b");
        assert_eq!(env.metadata.format, "supabase_ready");
        assert_eq!(env.metadata.language_support, vec!["en", "ko"]);
        assert_eq!(env.metadata.total_metrics, 0);
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_json::<MetricsEnvelope>(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }

    #[test]
    fn checkpoint_names() {
        assert_eq!(
            checkpoint_path(Path::new("data_temp"), 3),
            PathBuf::from("data_temp/final_metrics_temp_3.json")
        );
    }
}
