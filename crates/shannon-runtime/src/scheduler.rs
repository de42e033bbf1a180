//! Heartbeat and cron-based task scheduler.
//!
//! Two loops: a heartbeat timer that records liveness to a file, and a cron
//! dispatcher that fires `SchedulerTrigger` events for persisted jobs. Both
//! check the pause manager first: while paused, ticks are skipped and
//! logged, never queued (cron jobs are recurring by nature).

use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use shannon_config::SchedulerConfig;
use shannon_core::{Event, EventBus, Result, ShannonError};

use crate::pause::PauseManager;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        cron_expr TEXT NOT NULL,
        action TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_run TEXT,
        created_at TEXT NOT NULL
    );
";

const CRON_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// A persisted cron job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub cron_expr: String,
    pub action: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Accept the common 5-field cron dialect by prepending a seconds field.
fn normalize_cron(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn parse_cron(expr: &str) -> Result<Schedule> {
    Schedule::from_str(&normalize_cron(expr))
        .map_err(|e| ShannonError::InvalidInput(format!("invalid cron expression '{expr}': {e}")))
}

struct SchedulerInner {
    config: SchedulerConfig,
    bus: EventBus,
    pause: PauseManager,
    db: Mutex<Connection>,
    heartbeat_path: PathBuf,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The pause-aware heartbeat + cron scheduler. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn open(
        config: SchedulerConfig,
        bus: EventBus,
        pause: PauseManager,
        data_dir: &Path,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let conn = Connection::open(data_dir.join("jobs.db")).map_err(persistence)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(persistence)?;
        Self::build(config, bus, pause, conn, data_dir)
    }

    pub fn open_in_memory(
        config: SchedulerConfig,
        bus: EventBus,
        pause: PauseManager,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(persistence)?;
        let dir = std::env::temp_dir();
        Self::build(config, bus, pause, conn, &dir)
    }

    fn build(
        config: SchedulerConfig,
        bus: EventBus,
        pause: PauseManager,
        conn: Connection,
        data_dir: &Path,
    ) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(persistence)?;
        let heartbeat_path = if config.heartbeat_file.is_empty() {
            data_dir.join("heartbeat")
        } else {
            PathBuf::from(&config.heartbeat_file)
        };
        let scheduler = Self {
            inner: Arc::new(SchedulerInner {
                config,
                bus,
                pause,
                db: Mutex::new(conn),
                heartbeat_path,
                running: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        };
        scheduler.seed_config_jobs()?;
        Ok(scheduler)
    }

    /// Insert config-declared jobs that don't exist yet (idempotent by name).
    fn seed_config_jobs(&self) -> Result<()> {
        for job in &self.inner.config.jobs {
            if let Err(e) = parse_cron(&job.cron) {
                warn!(job = %job.name, error = %e, "skipping config job with bad cron");
                continue;
            }
            let now = Utc::now().to_rfc3339();
            self.inner
                .db
                .lock()
                .execute(
                    "INSERT OR IGNORE INTO jobs (name, cron_expr, action, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![job.name, job.cron, job.action, now],
                )
                .map_err(persistence)?;
        }
        Ok(())
    }

    /// Spawn the heartbeat and cron loops.
    pub fn start(&self) {
        self.check_stale_heartbeat();
        self.inner.running.store(true, Ordering::SeqCst);

        let heartbeat = self.clone();
        let cron = self.clone();
        let mut tasks = self.inner.tasks.lock();
        tasks.push(tokio::spawn(async move {
            heartbeat.heartbeat_loop().await;
        }));
        tasks.push(tokio::spawn(async move {
            cron.cron_loop().await;
        }));
        info!("scheduler started");
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        info!("scheduler stopped");
    }

    fn check_stale_heartbeat(&self) {
        let Ok(raw) = std::fs::read_to_string(&self.inner.heartbeat_path) else {
            return;
        };
        let Ok(last_beat) = raw.trim().parse::<i64>() else {
            return;
        };
        let age = Utc::now().timestamp() - last_beat;
        if age > (self.inner.config.heartbeat_interval as i64) * 3 {
            warn!(age_seconds = age, "stale heartbeat detected");
        }
    }

    async fn heartbeat_loop(&self) {
        let interval = Duration::from_secs(self.inner.config.heartbeat_interval.max(1));
        while self.inner.running.load(Ordering::SeqCst) {
            if self.inner.pause.is_paused() {
                debug!("heartbeat skipped while paused");
            } else if let Err(e) = self.write_heartbeat() {
                error!(error = %e, "heartbeat write failed");
            }
            tokio::time::sleep(interval).await;
        }
    }

    fn write_heartbeat(&self) -> Result<()> {
        if let Some(parent) = self.inner.heartbeat_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.inner.heartbeat_path, Utc::now().timestamp().to_string())?;
        Ok(())
    }

    async fn cron_loop(&self) {
        while self.inner.running.load(Ordering::SeqCst) {
            tokio::time::sleep(CRON_CHECK_INTERVAL).await;
            if self.inner.pause.is_paused() {
                debug!("cron check skipped while paused");
                continue;
            }
            if let Err(e) = self.check_and_fire_jobs() {
                error!(error = %e, "cron check failed");
            }
        }
    }

    /// Fire every enabled job whose next occurrence after its last run (or
    /// creation) is due.
    pub fn check_and_fire_jobs(&self) -> Result<usize> {
        let now = Utc::now();
        let jobs = self.list_jobs()?;
        let mut fired = 0usize;

        for job in jobs.iter().filter(|j| j.enabled) {
            let schedule = match parse_cron(&job.cron_expr) {
                Ok(s) => s,
                Err(e) => {
                    error!(job = %job.name, error = %e, "disabling job with invalid cron");
                    self.set_enabled(&job.name, false)?;
                    continue;
                }
            };
            let since = job.last_run.unwrap_or(job.created_at);
            let due = schedule.after(&since).next().is_some_and(|next| next <= now);
            if !due {
                continue;
            }

            info!(job = %job.name, "cron job firing");
            self.inner.bus.publish(Event::SchedulerTrigger {
                job_id: job.id,
                job_name: job.name.clone(),
                action: job.action.clone(),
            });
            self.inner
                .db
                .lock()
                .execute(
                    "UPDATE jobs SET last_run = ?1 WHERE id = ?2",
                    params![now.to_rfc3339(), job.id],
                )
                .map_err(persistence)?;
            fired += 1;
        }
        Ok(fired)
    }

    pub fn add_job(&self, name: &str, cron_expr: &str, action: &str) -> Result<Job> {
        parse_cron(cron_expr)?;
        let now = Utc::now();
        let db = self.inner.db.lock();
        db.execute(
            "INSERT INTO jobs (name, cron_expr, action, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, cron_expr, action, now.to_rfc3339()],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ShannonError::InvalidInput(format!("job '{name}' already exists"))
            }
            other => persistence(other),
        })?;
        let id = db.last_insert_rowid();
        Ok(Job {
            id,
            name: name.to_string(),
            cron_expr: cron_expr.to_string(),
            action: action.to_string(),
            enabled: true,
            last_run: None,
            created_at: now,
        })
    }

    pub fn remove_job(&self, name: &str) -> Result<bool> {
        let rows = self
            .inner
            .db
            .lock()
            .execute("DELETE FROM jobs WHERE name = ?1", params![name])
            .map_err(persistence)?;
        Ok(rows > 0)
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let db = self.inner.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT id, name, cron_expr, action, enabled, last_run, created_at
                 FROM jobs ORDER BY id",
            )
            .map_err(persistence)?;
        let jobs = stmt
            .query_map([], |row| {
                let last_run: Option<String> = row.get(5)?;
                let created_at: String = row.get(6)?;
                Ok(Job {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    cron_expr: row.get(2)?,
                    action: row.get(3)?,
                    enabled: row.get::<_, i64>(4)? != 0,
                    last_run: last_run.as_deref().map(parse_ts),
                    created_at: parse_ts(&created_at),
                })
            })
            .map_err(persistence)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(persistence)?;
        Ok(jobs)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.inner
            .db
            .lock()
            .execute(
                "UPDATE jobs SET enabled = ?1 WHERE name = ?2",
                params![enabled as i64, name],
            )
            .map_err(persistence)?;
        Ok(())
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn persistence(e: rusqlite::Error) -> ShannonError {
    ShannonError::Persistence(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> Scheduler {
        let bus = EventBus::default();
        let pause = PauseManager::new(bus.clone());
        Scheduler::open_in_memory(SchedulerConfig::default(), bus, pause).unwrap()
    }

    #[tokio::test]
    async fn test_add_list_remove() {
        let s = scheduler();
        let job = s.add_job("daily", "0 9 * * *", "check the news").unwrap();
        assert!(job.enabled);
        assert_eq!(s.list_jobs().unwrap().len(), 1);
        assert!(s.remove_job("daily").unwrap());
        assert!(s.list_jobs().unwrap().is_empty());
        assert!(!s.remove_job("daily").unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let s = scheduler();
        s.add_job("x", "* * * * *", "a").unwrap();
        let err = s.add_job("x", "* * * * *", "b").unwrap_err();
        assert!(matches!(err, ShannonError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_invalid_cron_rejected() {
        let s = scheduler();
        assert!(s.add_job("bad", "not a cron", "a").is_err());
    }

    #[test]
    fn test_normalize_cron_prepends_seconds() {
        assert_eq!(normalize_cron("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron("0 */5 * * * *"), "0 */5 * * * *");
    }

    #[tokio::test]
    async fn test_due_job_fires_trigger() {
        let bus = EventBus::default();
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        bus.subscribe(shannon_core::EventKind::SchedulerTrigger, "sink", move |e| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(e).await;
            }
        });
        bus.start().await;

        let pause = PauseManager::new(bus.clone());
        let s = Scheduler::open_in_memory(SchedulerConfig::default(), bus.clone(), pause).unwrap();
        // Every-second schedule created in the past is immediately due.
        s.add_job("tick", "* * * * * *", "beat").unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let fired = s.check_and_fire_jobs().unwrap();
        assert_eq!(fired, 1);
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            Event::SchedulerTrigger { job_name, action, .. } => {
                assert_eq!(job_name, "tick");
                assert_eq!(action, "beat");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        bus.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_paused_scheduler_does_not_fire() {
        let bus = EventBus::default();
        let pause = PauseManager::new(bus.clone());
        let s =
            Scheduler::open_in_memory(SchedulerConfig::default(), bus.clone(), pause.clone())
                .unwrap();
        s.add_job("tick", "* * * * * *", "beat").unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        pause.pause(None);

        // The loop gates on pause before checking; emulate one loop pass.
        if !pause.is_paused() {
            s.check_and_fire_jobs().unwrap();
        }
        // Nothing fired, and nothing was queued for later either.
        assert_eq!(pause.queued_count(), 0);
        let unfired: Vec<_> = s.list_jobs().unwrap();
        assert!(unfired[0].last_run.is_none());
    }
}
