use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::BackupConfig;
use crate::supabase::{self, ObjectStore};

const TIMESTAMP_FMT: &str = "%Y-%m-%dT%H:%M:%S";
const BACKUP_ROOT: &str = "backups";
const TICK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupKind {
    Daily,
    Weekly,
    Monthly,
}

impl BackupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupKind::Daily => "daily",
            BackupKind::Weekly => "weekly",
            BackupKind::Monthly => "monthly",
        }
    }
}

pub fn backup_name(kind: BackupKind, now: NaiveDateTime) -> String {
    let stamp = match kind {
        BackupKind::Daily => now.format("%Y%m%d"),
        BackupKind::Weekly => now.format("%Y%W"),
        BackupKind::Monthly => now.format("%Y%m"),
    };
    format!("{}_{}", kind.as_str(), stamp)
}

fn backup_prefix(name: &str) -> String {
    format!("{}/{}", BACKUP_ROOT, name)
}

/// Copy every object under `from_prefix` in `from_bucket` to `to_prefix` in
/// `to_bucket`, keeping relative paths. Returns (copied, failed).
fn copy_tree(
    store: &dyn ObjectStore,
    from_bucket: &str,
    from_prefix: &str,
    to_bucket: &str,
    to_prefix: &str,
) -> Result<(usize, usize)> {
    let from_prefix = from_prefix.trim_matches('/');
    let mut copied = 0;
    let mut failed = 0;

    for (path, info) in supabase::list_files(store, from_bucket, from_prefix)? {
        let rel = path
            .strip_prefix(from_prefix)
            .unwrap_or(&path)
            .trim_start_matches('/');
        let dest = match to_prefix.trim_matches('/') {
            "" => rel.to_string(),
            p => format!("{}/{}", p, rel),
        };
        let content_type = info
            .metadata
            .and_then(|m| m.mimetype)
            .unwrap_or_else(|| supabase::content_type_for(std::path::Path::new(&path)).to_string());

        let result = store
            .download(from_bucket, &path)
            .and_then(|bytes| store.upload(to_bucket, &dest, bytes, &content_type));
        match result {
            Ok(()) => copied += 1,
            Err(e) => {
                failed += 1;
                error!("Copy {}/{} -> {}/{} failed: {}", from_bucket, path, to_bucket, dest, e);
            }
        }
    }
    Ok((copied, failed))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupEntry {
    pub kind: String,
    pub name: String,
    pub created_at: String,
    pub success: bool,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct BackupStatus {
    pub total_backups: usize,
    pub successful_backups: usize,
    pub recent_backups: Vec<BackupEntry>,
}

/// Backup operations over the storage bucket, logged in the catalog database.
pub struct Backups<'a> {
    pub conn: &'a Connection,
    pub store: &'a dyn ObjectStore,
    pub storage_bucket: String,
    pub backup_bucket: String,
    pub source_folder: String,
    pub cfg: BackupConfig,
}

impl Backups<'_> {
    /// Snapshot the source folder under `backups/<name>/`. A backup with any
    /// failed copy is logged as unsuccessful.
    pub fn run(&self, kind: BackupKind, now: NaiveDateTime) -> Result<bool> {
        let name = backup_name(kind, now);
        info!("Starting {} backup {}", kind.as_str(), name);

        let success = match copy_tree(
            self.store,
            &self.storage_bucket,
            &self.source_folder,
            &self.backup_bucket,
            &backup_prefix(&name),
        ) {
            Ok((copied, 0)) => {
                info!("Backup {} complete ({} objects)", name, copied);
                true
            }
            Ok((copied, failed)) => {
                warn!("Backup {} incomplete: {} copied, {} failed", name, copied, failed);
                false
            }
            Err(e) => {
                error!("Backup {} failed: {:#}", name, e);
                false
            }
        };

        self.log(kind, &name, now, success)?;
        Ok(success)
    }

    fn log(&self, kind: BackupKind, name: &str, at: NaiveDateTime, success: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO backups (kind, name, created_at, success) VALUES (?1, ?2, ?3, ?4)",
            params![kind.as_str(), name, at.format(TIMESTAMP_FMT).to_string(), success],
        )?;
        Ok(())
    }

    /// Remove daily backups older than the retention window, both the
    /// objects and their log rows. Returns how many backups were removed.
    pub fn cleanup(&self, now: NaiveDateTime) -> Result<usize> {
        let cutoff = chrono::Duration::try_days(self.cfg.retention_days)
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| anyhow!("Retention window of {} days is out of range", self.cfg.retention_days))?;
        let cutoff = cutoff.format(TIMESTAMP_FMT).to_string();
        info!("Cleaning daily backups older than {}", cutoff);

        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT name FROM backups WHERE kind = 'daily' AND created_at < ?1 ORDER BY name",
        )?;
        let names = stmt
            .query_map(params![cutoff], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut removed = 0;
        for name in names {
            let paths: Vec<String> = supabase::list_files(self.store, &self.backup_bucket, &backup_prefix(&name))?
                .into_iter()
                .map(|(p, _)| p)
                .collect();
            if !paths.is_empty() {
                self.store.delete(&self.backup_bucket, &paths)?;
            }
            self.conn.execute(
                "DELETE FROM backups WHERE kind = 'daily' AND name = ?1",
                params![name],
            )?;
            info!("Removed backup {} ({} objects)", name, paths.len());
            removed += 1;
        }
        Ok(removed)
    }

    pub fn status(&self) -> Result<BackupStatus> {
        let (total, successful): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM backups",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let mut stmt = self.conn.prepare(
            "SELECT kind, name, created_at, success FROM backups
             WHERE success = 1 ORDER BY id DESC LIMIT 5",
        )?;
        let mut recent = stmt
            .query_map([], |row| {
                Ok(BackupEntry {
                    kind: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                    success: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        recent.reverse();
        Ok(BackupStatus {
            total_backups: total as usize,
            successful_backups: successful as usize,
            recent_backups: recent,
        })
    }

    /// Copy a named backup back into `target` in the storage bucket.
    pub fn restore(&self, name: &str, target: &str) -> Result<usize> {
        let (copied, failed) = copy_tree(
            self.store,
            &self.backup_bucket,
            &backup_prefix(name),
            &self.storage_bucket,
            target,
        )?;
        if copied == 0 && failed == 0 {
            bail!("Backup {} not found in {}", name, self.backup_bucket);
        }
        if failed > 0 {
            bail!("Restore of {} incomplete: {} copied, {} failed", name, copied, failed);
        }
        info!("Restored {} objects from {} into {}", copied, name, target);
        Ok(copied)
    }

    fn run_job(&self, job: Job, now: NaiveDateTime) {
        let outcome = match job {
            Job::Backup(kind) => self.run(kind, now).map(|_| ()),
            Job::Cleanup => self.cleanup(now).map(|_| ()),
        };
        if let Err(e) = outcome {
            error!("Scheduled {:?} failed: {:#}", job, e);
        }
    }

    /// Blocking scheduler loop. Only returns on error.
    pub fn schedule(&self) -> Result<()> {
        if !self.cfg.auto_enabled {
            bail!("Automatic backups are disabled (AUTO_BACKUP_ENABLED=false)");
        }
        info!("Backup scheduler started: daily 02:00, weekly Sun 03:00, monthly 1st 04:00, cleanup 05:00");
        let mut scheduler = Scheduler::default();
        loop {
            let now = chrono::Local::now().naive_local();
            for job in scheduler.tick(now) {
                self.run_job(job, now);
            }
            std::thread::sleep(TICK);
        }
    }
}

// ── Scheduling ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    Backup(BackupKind),
    Cleanup,
}

impl Job {
    fn at(self) -> NaiveTime {
        let hour = match self {
            Job::Backup(BackupKind::Daily) => 2,
            Job::Backup(BackupKind::Weekly) => 3,
            Job::Backup(BackupKind::Monthly) => 4,
            Job::Cleanup => 5,
        };
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default()
    }

    fn runs_on(self, day: NaiveDate) -> bool {
        match self {
            Job::Backup(BackupKind::Weekly) => day.weekday() == Weekday::Sun,
            Job::Backup(BackupKind::Monthly) => day.day() == 1,
            _ => true,
        }
    }
}

const JOBS: [Job; 4] = [
    Job::Backup(BackupKind::Daily),
    Job::Backup(BackupKind::Weekly),
    Job::Backup(BackupKind::Monthly),
    Job::Cleanup,
];

/// A job fires once per day it is scheduled for, during the hour after
/// its start time.
#[derive(Debug, Default)]
pub struct Scheduler {
    last_run: HashMap<Job, NaiveDate>,
}

impl Scheduler {
    pub fn tick(&mut self, now: NaiveDateTime) -> Vec<Job> {
        let today = now.date();
        let time = now.time();
        let mut due = Vec::new();
        for job in JOBS {
            let start = job.at();
            let in_window = time >= start && time - start < chrono::Duration::hours(1);
            if job.runs_on(today) && in_window && self.last_run.get(&job) != Some(&today) {
                self.last_run.insert(job, today);
                due.push(job);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::supabase::memory::MemoryStore;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn setup() -> (tempfile::TempDir, Connection, MemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let conn = catalog::connect(&dir.path().join("c.sqlite")).unwrap();
        catalog::init_schema(&conn).unwrap();
        let store = MemoryStore::default();
        store.put("files", "un_sdg/a.json", "{}");
        store.put("files", "un_sdg/framework/b.pdf", "pdf");
        (dir, conn, store)
    }

    fn backups<'a>(conn: &'a Connection, store: &'a MemoryStore) -> Backups<'a> {
        Backups {
            conn,
            store,
            storage_bucket: "files".into(),
            backup_bucket: "backup".into(),
            source_folder: String::new(),
            cfg: BackupConfig { retention_days: 30, auto_enabled: true },
        }
    }

    #[test]
    fn names() {
        let now = at("2026-03-09 02:00");
        assert_eq!(backup_name(BackupKind::Daily, now), "daily_20260309");
        assert_eq!(backup_name(BackupKind::Weekly, now), "weekly_202610");
        assert_eq!(backup_name(BackupKind::Monthly, now), "monthly_202603");
    }

    #[test]
    fn backup_copies_tree_and_logs() {
        let (_dir, conn, store) = setup();
        let b = backups(&conn, &store);
        assert!(b.run(BackupKind::Daily, at("2026-03-09 02:00")).unwrap());
        assert_eq!(
            store.paths("backup"),
            vec![
                "backups/daily_20260309/un_sdg/a.json",
                "backups/daily_20260309/un_sdg/framework/b.pdf"
            ]
        );
        let s = b.status().unwrap();
        assert_eq!(s.total_backups, 1);
        assert_eq!(s.successful_backups, 1);
        assert_eq!(s.recent_backups[0].name, "daily_20260309");
    }

    #[test]
    fn cleanup_removes_only_old_daily() {
        let (_dir, conn, store) = setup();
        let b = backups(&conn, &store);
        b.run(BackupKind::Daily, at("2026-01-01 02:00")).unwrap();
        b.run(BackupKind::Monthly, at("2026-01-01 04:00")).unwrap();
        b.run(BackupKind::Daily, at("2026-03-01 02:00")).unwrap();

        let removed = b.cleanup(at("2026-03-09 05:00")).unwrap();
        assert_eq!(removed, 1);
        let remaining = store.paths("backup");
        assert!(remaining.iter().all(|p| !p.contains("daily_20260101")));
        assert!(remaining.iter().any(|p| p.contains("monthly_202601")));
        assert!(remaining.iter().any(|p| p.contains("daily_20260301")));
        assert_eq!(b.status().unwrap().total_backups, 2);
    }

    #[test]
    fn cleanup_rejects_out_of_range_retention() {
        let (_dir, conn, store) = setup();
        let mut b = backups(&conn, &store);
        b.run(BackupKind::Daily, at("2026-01-01 02:00")).unwrap();
        b.cfg.retention_days = 1_000_000_000_000;

        let err = b.cleanup(at("2026-03-09 05:00")).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert_eq!(b.status().unwrap().total_backups, 1);
    }

    #[test]
    fn status_keeps_last_five_successful() {
        let (_dir, conn, store) = setup();
        let b = backups(&conn, &store);
        for day in 1..=7 {
            b.run(BackupKind::Daily, at(&format!("2026-03-{:02} 02:00", day))).unwrap();
        }
        let s = b.status().unwrap();
        assert_eq!(s.total_backups, 7);
        let names: Vec<_> = s.recent_backups.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names.first(), Some(&"daily_20260303"));
        assert_eq!(names.last(), Some(&"daily_20260307"));
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn restore_round_trip() {
        let (_dir, conn, store) = setup();
        let b = backups(&conn, &store);
        b.run(BackupKind::Weekly, at("2026-03-08 03:00")).unwrap();
        let n = b.restore("weekly_202609", "restored").unwrap();
        assert_eq!(n, 2);
        assert!(store.paths("files").contains(&"restored/un_sdg/framework/b.pdf".to_string()));
        assert!(b.restore("daily_19990101", "x").is_err());
    }

    #[test]
    fn scheduler_refuses_when_disabled() {
        let (_dir, conn, store) = setup();
        let mut b = backups(&conn, &store);
        b.cfg.auto_enabled = false;
        assert!(b.schedule().is_err());
    }

    #[test]
    fn scheduler_slots() {
        let mut s = Scheduler::default();
        // 2026-03-01 is a Sunday and the 1st.
        assert!(s.tick(at("2026-03-01 01:59")).is_empty());
        assert_eq!(s.tick(at("2026-03-01 02:00")), vec![Job::Backup(BackupKind::Daily)]);
        assert!(s.tick(at("2026-03-01 02:01")).is_empty());
        assert_eq!(s.tick(at("2026-03-01 03:00")), vec![Job::Backup(BackupKind::Weekly)]);
        assert_eq!(s.tick(at("2026-03-01 04:30")), vec![Job::Backup(BackupKind::Monthly)]);
        assert_eq!(s.tick(at("2026-03-01 05:00")), vec![Job::Cleanup]);
        assert!(s.tick(at("2026-03-02 03:00")).is_empty());
        assert_eq!(s.tick(at("2026-03-02 02:10")), vec![Job::Backup(BackupKind::Daily)]);
    }
}
