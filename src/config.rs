use std::path::PathBuf;
use std::time::Duration;

use config::Config;
use serde::Deserialize;

use crate::error::ConfigError;

/// One hundred years.
pub const MAX_RETENTION_DAYS: i64 = 36_500;
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Every recognized environment option, read once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub supabase_service_role_key: Option<String>,
    pub supabase_storage_bucket: String,
    pub supabase_backup_bucket: String,
    pub supabase_table: String,

    pub batch_size: usize,
    pub upload_chunk_size: usize,
    pub request_delay_ms: u64,
    pub batch_pause_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,

    pub iris_base_url: String,
    pub iris_version: String,
    pub listing_pages: u32,

    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub catalog_db: PathBuf,

    pub log_level: String,
    pub log_file: Option<PathBuf>,

    pub backup_retention_days: i64,
    pub auto_backup_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            supabase_url: None,
            supabase_anon_key: None,
            supabase_service_role_key: None,
            supabase_storage_bucket: "sdgs-files".into(),
            supabase_backup_bucket: "sdgs-backup".into(),
            supabase_table: "iris_metrics".into(),
            batch_size: 50,
            upload_chunk_size: 50,
            request_delay_ms: 1500,
            batch_pause_ms: 3000,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.into(),
            iris_base_url: "https://iris.thegiin.org".into(),
            iris_version: "5.3b".into(),
            listing_pages: 63,
            data_dir: PathBuf::from("data"),
            temp_dir: PathBuf::from("data_temp"),
            catalog_db: PathBuf::from("data/catalog.sqlite"),
            log_level: "info".into(),
            log_file: None,
            backup_retention_days: 30,
            auto_backup_enabled: true,
        }
    }
}

/// Which Supabase credential a command needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Read,
    Privileged,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub base_url: String,
    pub version: String,
    pub listing_pages: u32,
    pub batch_size: usize,
    pub request_delay: Duration,
    pub batch_pause: Duration,
    pub checkpoint_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
    pub table: String,
    pub chunk_size: usize,
    pub storage_bucket: String,
    pub backup_bucket: String,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub retention_days: i64,
    pub auto_enabled: bool,
}

impl Settings {
    /// Load `.env` (if present) and then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!("Loaded environment file {:?}", path);
        }
        Self::from_source(config::Environment::default().try_parsing(true))
    }

    pub fn from_source(env: config::Environment) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(env)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("BATCH_SIZE must be at least 1".into()));
        }
        if self.upload_chunk_size == 0 {
            return Err(ConfigError::Invalid("UPLOAD_CHUNK_SIZE must be at least 1".into()));
        }
        if !(0..=MAX_RETENTION_DAYS).contains(&self.backup_retention_days) {
            return Err(ConfigError::Invalid(format!(
                "BACKUP_RETENTION_DAYS must be between 0 and {}",
                MAX_RETENTION_DAYS
            )));
        }
        Ok(())
    }

    pub fn fetch(&self) -> FetchConfig {
        FetchConfig {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            base_backoff: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn crawl(&self) -> CrawlConfig {
        CrawlConfig {
            base_url: self.iris_base_url.trim_end_matches('/').to_string(),
            version: self.iris_version.clone(),
            listing_pages: self.listing_pages,
            batch_size: self.batch_size,
            request_delay: Duration::from_millis(self.request_delay_ms),
            batch_pause: Duration::from_millis(self.batch_pause_ms),
            checkpoint_dir: self.temp_dir.clone(),
        }
    }

    pub fn backup(&self) -> BackupConfig {
        BackupConfig {
            retention_days: self.backup_retention_days,
            auto_enabled: self.auto_backup_enabled,
        }
    }

    /// Remote service settings for the given credential tier. The read tier
    /// falls back to the privileged key when no anon key is configured.
    pub fn supabase(&self, tier: Tier) -> Result<SupabaseConfig, ConfigError> {
        let url = non_empty(&self.supabase_url).ok_or(ConfigError::MissingCredential("SUPABASE_URL"))?;
        let key = match tier {
            Tier::Privileged => non_empty(&self.supabase_service_role_key)
                .ok_or(ConfigError::MissingCredential("SUPABASE_SERVICE_ROLE_KEY"))?,
            Tier::Read => non_empty(&self.supabase_anon_key)
                .or_else(|| non_empty(&self.supabase_service_role_key))
                .ok_or(ConfigError::MissingCredential("SUPABASE_ANON_KEY"))?,
        };
        Ok(SupabaseConfig {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            table: self.supabase_table.clone(),
            chunk_size: self.upload_chunk_size,
            storage_bucket: self.supabase_storage_bucket.clone(),
            backup_bucket: self.supabase_backup_bucket.clone(),
        })
    }
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_source(config::Environment::default().source(Some(map)).try_parsing(true))
    }

    #[test]
    fn defaults_when_empty() {
        let s = from_map(&[]).unwrap();
        assert_eq!(s.batch_size, 50);
        assert_eq!(s.listing_pages, 63);
        assert_eq!(s.supabase_storage_bucket, "sdgs-files");
        assert!(s.auto_backup_enabled);
        assert!(s.supabase_url.is_none());
    }

    #[test]
    fn env_overrides() {
        let s = from_map(&[
            ("BATCH_SIZE", "10"),
            ("REQUEST_DELAY_MS", "0"),
            ("AUTO_BACKUP_ENABLED", "false"),
            ("IRIS_BASE_URL", "http://localhost:8080/"),
        ])
        .unwrap();
        assert_eq!(s.batch_size, 10);
        assert!(!s.auto_backup_enabled);
        assert_eq!(s.crawl().request_delay, Duration::ZERO);
        assert_eq!(s.crawl().base_url, "http://localhost:8080");
    }

    #[test]
    fn zero_batch_rejected() {
        assert!(matches!(from_map(&[("BATCH_SIZE", "0")]), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn retention_days_bounded() {
        assert!(from_map(&[("BACKUP_RETENTION_DAYS", "36500")]).is_ok());
        assert!(matches!(
            from_map(&[("BACKUP_RETENTION_DAYS", "1000000000000")]),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(from_map(&[("BACKUP_RETENTION_DAYS", "-1")]), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_credentials() {
        let s = from_map(&[("SUPABASE_URL", "https://x.supabase.co")]).unwrap();
        assert!(matches!(
            s.supabase(Tier::Privileged),
            Err(ConfigError::MissingCredential("SUPABASE_SERVICE_ROLE_KEY"))
        ));
        assert!(matches!(
            s.supabase(Tier::Read),
            Err(ConfigError::MissingCredential("SUPABASE_ANON_KEY"))
        ));
    }

    #[test]
    fn read_tier_falls_back_to_service_key() {
        let s = from_map(&[
            ("SUPABASE_URL", "https://x.supabase.co/"),
            ("SUPABASE_SERVICE_ROLE_KEY", "svc"),
        ])
        .unwrap();
        let cfg = s.supabase(Tier::Read).unwrap();
        assert_eq!(cfg.key, "svc");
        assert_eq!(cfg.url, "https://x.supabase.co");
    }
}
