use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use sqlx::SqlitePool;
use tracker_sql::{audit, settings};

use crate::bug_updater;
use crate::ingest;

pub const POLLER_JOB_ID: &str = "jenkins_poller";
pub const BUG_UPDATER_JOB_ID: &str = "bug_updater";
const POLLER_JOB_NAME: &str = "Jenkins Polling Task";

struct ScheduledJob {
    name: &'static str,
    handle: tokio::task::JoinHandle<()>,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Drop for ScheduledJob {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub job_enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub job_name: Option<String>,
}

/// Background job scheduler: the Jenkins poller on a configurable interval
/// and the bug updater daily at 02:00.
///
/// Jobs are singletons per id; re-registering replaces the prior task. A
/// job's loop runs one tick at a time, so a still-running tick simply delays
/// the next trigger instead of overlapping it.
#[derive(Clone)]
pub struct Scheduler {
    pool: SqlitePool,
    logs_base: PathBuf,
    bug_data_url: Option<String>,
    jobs: Arc<Mutex<HashMap<&'static str, ScheduledJob>>>,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, logs_base: PathBuf, bug_data_url: Option<String>) -> Scheduler {
        Scheduler {
            pool,
            logs_base,
            bug_data_url,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register jobs according to the current settings. Called at startup.
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        let enabled = settings::get_bool(
            models::keys::AUTO_UPDATE_ENABLED,
            models::defaults::AUTO_UPDATE_ENABLED,
            &mut *conn,
        )
        .await?;
        let interval_hours = settings::polling_interval_hours(&mut conn).await?;
        drop(conn);

        if enabled {
            tracing::info!(interval_hours, "starting Jenkins polling scheduler");
            self.add_poller(interval_hours);
        } else {
            tracing::info!("auto-update disabled, poller not scheduled");
        }

        self.add_bug_updater();
        Ok(())
    }

    fn add_poller(&self, interval_hours: f64) {
        let interval = Duration::from_secs_f64((interval_hours * 3600.0).max(1.0));
        let pool = self.pool.clone();
        let logs_base = self.logs_base.clone();
        let next_run = Arc::new(Mutex::new(None));

        let next_run_task = next_run.clone();
        let handle = tokio::spawn(poller_loop(pool, logs_base, next_run_task, interval));

        self.jobs.lock().unwrap().insert(
            POLLER_JOB_ID,
            ScheduledJob {
                name: POLLER_JOB_NAME,
                handle,
                next_run,
            },
        );
    }

    fn add_bug_updater(&self) {
        let pool = self.pool.clone();
        let bug_data_url = self.bug_data_url.clone();
        let next_run = Arc::new(Mutex::new(None));

        let next_run_task = next_run.clone();
        let handle = tokio::spawn(async move {
            loop {
                let next = next_daily_2am(Utc::now());
                *next_run_task.lock().unwrap() = Some(next);
                let wait = (next - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::from_secs(60));
                tokio::time::sleep(wait).await;

                let Some(url) = bug_data_url.as_deref() else {
                    tracing::warn!("bug data URL not configured, skipping bug update");
                    continue;
                };
                match bug_updater::run_update(&pool, url).await {
                    Ok(stats) => tracing::info!(?stats, "bug update completed"),
                    Err(err) => tracing::error!(error = %format!("{err:#}"), "bug update failed"),
                }
            }
        });

        self.jobs.lock().unwrap().insert(
            BUG_UPDATER_JOB_ID,
            ScheduledJob {
                name: "Bug Mappings Updater",
                handle,
                next_run,
            },
        );
    }

    /// Replace the poller registration atomically. Concurrent updates
    /// converge on exactly one registration because the whole swap happens
    /// under the registry lock.
    pub fn update_polling_schedule(&self, enabled: bool, interval_hours: f64) {
        {
            let mut jobs = self.jobs.lock().unwrap();
            jobs.remove(POLLER_JOB_ID);
        }
        if enabled {
            tracing::info!(interval_hours, "polling schedule updated");
            self.add_poller(interval_hours);
        } else {
            tracing::info!("polling schedule disabled");
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let jobs = self.jobs.lock().unwrap();
        match jobs.get(POLLER_JOB_ID) {
            Some(job) => SchedulerStatus {
                running: true,
                job_enabled: true,
                next_run: *job.next_run.lock().unwrap(),
                job_name: Some(job.name.to_string()),
            },
            None => SchedulerStatus {
                running: !jobs.is_empty(),
                job_enabled: false,
                next_run: None,
                job_name: None,
            },
        }
    }

    pub fn shutdown(&self) {
        self.jobs.lock().unwrap().clear();
        tracing::info!("scheduler stopped");
    }
}

async fn poller_loop(
    pool: SqlitePool,
    logs_base: PathBuf,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    interval: Duration,
) {
    loop {
        *next_run.lock().unwrap() = Some(Utc::now() + chrono::Duration::from_std(interval).unwrap());
        tokio::time::sleep(interval).await;

        run_poller_tick(&pool, &logs_base).await;
    }
}

/// One poller tick: resolve credentials, then run the polling pass.
/// Credential failures are recorded as a failed poll rather than crashing
/// the loop.
async fn run_poller_tick(pool: &SqlitePool, logs_base: &std::path::Path) {
    let client = match jenkins_client::Credentials::from_env()
        .and_then(|creds| jenkins_client::Client::new(&creds))
    {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(%err, "Jenkins credentials not configured");
            let started_at = Utc::now();
            if let Ok(mut conn) = pool.acquire().await {
                let _ = audit::insert_polling_log(
                    None,
                    "failed",
                    0,
                    Some(&err.to_string()),
                    started_at,
                    &mut conn,
                )
                .await;
            }
            return;
        }
    };

    if let Err(err) = ingest::poll_jenkins(pool, &client, logs_base).await {
        tracing::error!(error = %format!("{err:#}"), "polling tick failed");
    }
}

/// The next 02:00 UTC strictly after `now`.
fn next_daily_2am(now: DateTime<Utc>) -> DateTime<Utc> {
    let today_2am = Utc
        .with_ymd_and_hms(
            now.date_naive().year(),
            now.date_naive().month(),
            now.date_naive().day(),
            2,
            0,
            0,
        )
        .single()
        .expect("02:00 exists in UTC");
    if today_2am > now {
        today_2am
    } else {
        today_2am + chrono::Duration::days(1)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn next_2am_rolls_to_tomorrow() {
        let before = Utc.with_ymd_and_hms(2026, 3, 1, 1, 30, 0).unwrap();
        assert_eq!(
            next_daily_2am(before),
            Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap()
        );

        let after = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 1).unwrap();
        assert_eq!(
            next_daily_2am(after),
            Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn schedule_updates_replace_the_job() {
        let pool = tracker_sql::memory_pool().await;
        let scheduler = Scheduler::new(pool, PathBuf::from("/tmp/logs"), None);

        assert!(!scheduler.status().job_enabled);

        scheduler.update_polling_schedule(true, 12.0);
        let status = scheduler.status();
        assert!(status.job_enabled);
        assert_eq!(status.job_name.as_deref(), Some(POLLER_JOB_NAME));
        assert!(status.next_run.is_some());

        // Re-registering keeps exactly one job.
        scheduler.update_polling_schedule(true, 1.0);
        assert!(scheduler.status().job_enabled);

        scheduler.update_polling_schedule(false, 1.0);
        assert!(!scheduler.status().job_enabled);

        scheduler.shutdown();
    }

    #[tokio::test]
    async fn start_honors_disabled_auto_update() {
        let pool = tracker_sql::memory_pool().await;
        {
            let mut conn = pool.acquire().await.unwrap();
            settings::set_setting(models::keys::AUTO_UPDATE_ENABLED, "false", None, &mut conn)
                .await
                .unwrap();
        }

        let scheduler = Scheduler::new(pool, PathBuf::from("/tmp/logs"), None);
        scheduler.start().await.unwrap();

        let status = scheduler.status();
        assert!(!status.job_enabled);
        // The bug updater still registers.
        assert!(status.running);
        scheduler.shutdown();
    }
}
