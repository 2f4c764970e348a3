use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use jenkins_client::JenkinsApi;
use lazy_static::lazy_static;
use models::{extract_version_from_title, map_version_to_release, normalize_module_name};
use regex::Regex;
use sqlx::SqlitePool;
use tracker_sql::{audit, jobs, releases, settings, test_results};

use crate::cleanup::cleanup_artifacts;
use crate::import::{import_job, JobIdentity};
use crate::tracker::{JobStatus, JobTracker};

/// Concurrent module downloads per parent build.
const MODULE_WORKERS: usize = 5;

lazy_static! {
    static ref PARENT_URL_RE: Regex = Regex::new(r"^(.*)/job/[^/]+/\d+/?$").unwrap();
}

/// Progress sink for pipeline runs: scheduled runs log through tracing only,
/// on-demand runs additionally stream through a job's log queue.
#[derive(Clone, Default)]
pub struct Progress {
    tracker: Option<(JobTracker, String)>,
}

impl Progress {
    pub fn tracing() -> Progress {
        Progress::default()
    }

    pub fn tracker(tracker: JobTracker, job_id: String) -> Progress {
        Progress {
            tracker: Some((tracker, job_id)),
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        if let Some((tracker, job_id)) = &self.tracker {
            tracker.push_log(job_id, message.clone());
        }
        tracing::info!("{message}");
    }
}

/// Expand a parent build's `build_map.json` into per-module job URLs:
/// `{"BUSINESS_POLICY_ESXI": 144}` under `.../job/MAIN-RUN/216/` becomes
/// `business_policy -> (<base>/job/BUSINESS-POLICY-ESXI/144/, "144")`.
pub fn parse_build_map(
    build_map: &HashMap<String, i64>,
    parent_build_url: &str,
) -> HashMap<String, (String, String)> {
    let Some(caps) = PARENT_URL_RE.captures(parent_build_url.trim_end_matches('/')) else {
        tracing::error!(%parent_build_url, "could not derive base URL from parent build URL");
        return HashMap::new();
    };
    let base_url = caps[1].to_string();

    build_map
        .iter()
        .map(|(job_name, job_id)| {
            let jenkins_job_name = job_name.replace('_', "-");
            let job_url = format!("{base_url}/job/{jenkins_job_name}/{job_id}/");
            (
                normalize_module_name(job_name),
                (job_url, job_id.to_string()),
            )
        })
        .collect()
}

fn executed_at_from_millis(timestamp: Option<i64>) -> Option<DateTime<Utc>> {
    timestamp.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Fetch the artifacts of one module job: run logs land directly in the job
/// directory, JUnit reports re-root from `hapy/reports/` to `junit/...`.
async fn download_module_artifacts(
    api: &dyn JenkinsApi,
    job_url: &str,
    dest_dir: &Path,
) -> anyhow::Result<(usize, usize)> {
    let artifacts = api.get_artifacts_list(job_url).await?;

    let mut order_count = 0;
    let mut junit_count = 0;
    for artifact in &artifacts {
        let dest = if artifact.relative_path.starts_with("hapy/")
            && artifact.file_name.ends_with(".order.txt")
        {
            dest_dir.join(&artifact.file_name)
        } else if artifact.relative_path.starts_with("hapy/reports/junit/")
            && artifact.file_name.ends_with(".xml")
        {
            let rerooted = artifact
                .relative_path
                .strip_prefix("hapy/reports/")
                .expect("checked prefix");
            dest_dir.join(rerooted)
        } else {
            continue;
        };

        match api
            .download_artifact(job_url, &artifact.relative_path, &dest)
            .await
        {
            Ok(()) if artifact.file_name.ends_with(".order.txt") => order_count += 1,
            Ok(()) => junit_count += 1,
            Err(err) => {
                tracing::error!(path = %artifact.relative_path, %err, "failed to download artifact");
            }
        }
    }
    Ok((order_count, junit_count))
}

/// How a module job finds its release.
#[derive(Clone)]
enum ReleaseRoute {
    /// Scheduled path: route by the module's `VER:` version (parent build
    /// version as fallback), creating the release when new.
    ByVersion {
        parent_version: Option<String>,
        parent_url: String,
    },
    /// On-demand path: the release was chosen at discovery time.
    Fixed { release: String },
}

struct ModuleTask<'a> {
    pool: &'a SqlitePool,
    api: &'a dyn JenkinsApi,
    logs_base: &'a Path,
    cleanup_enabled: bool,
    parent_build: String,
    progress: Progress,
}

impl ModuleTask<'_> {
    /// Download, parse and import one module job. Returns whether the module
    /// counts as successfully handled; errors are logged and isolated so
    /// sibling modules continue.
    async fn run(
        &self,
        module_name: &str,
        job_url: &str,
        job_id: &str,
        route: &ReleaseRoute,
    ) -> bool {
        match self.run_inner(module_name, job_url, job_id, route).await {
            Ok(success) => success,
            Err(err) => {
                self.progress
                    .log(format!("  ERROR processing {module_name} job {job_id}: {err:#}"));
                false
            }
        }
    }

    async fn run_inner(
        &self,
        module_name: &str,
        job_url: &str,
        job_id: &str,
        route: &ReleaseRoute,
    ) -> anyhow::Result<bool> {
        // Module metadata: version and execution timestamp.
        let info = match self.api.get_job_info(job_url).await {
            Ok(info) => Some(info),
            Err(err) => {
                tracing::debug!(%job_url, %err, "could not fetch module job info");
                None
            }
        };
        let module_version = info
            .as_ref()
            .and_then(|i| extract_version_from_title(&i.display_name));
        let executed_at = executed_at_from_millis(info.as_ref().and_then(|i| i.timestamp));

        let (release_name, parent_url, version) = match route {
            ReleaseRoute::Fixed { release } => {
                (release.clone(), None, module_version.clone())
            }
            ReleaseRoute::ByVersion {
                parent_version,
                parent_url,
            } => {
                let version = module_version.clone().or_else(|| {
                    if parent_version.is_some() {
                        self.progress.log(format!(
                            "  {module_name}: using parent build version (module version unavailable)"
                        ));
                    }
                    parent_version.clone()
                });
                let Some(version) = version else {
                    self.progress
                        .log(format!("  {module_name}: no version available, skipping"));
                    return Ok(false);
                };
                let Some(release) = map_version_to_release(&version) else {
                    self.progress.log(format!(
                        "  {module_name}: version {version} has no release mapping, skipping"
                    ));
                    return Ok(false);
                };
                (release, Some(parent_url.clone()), Some(version))
            }
        };

        // An already-imported job is a success without re-download.
        let mut conn = self.pool.acquire().await?;
        let release =
            releases::upsert_release(&release_name, parent_url.as_deref(), &mut conn).await?;
        let module = jobs::upsert_module(release.id, module_name, &mut conn).await?;
        if jobs::fetch_job(module.id, job_id, &mut *conn).await?.is_some() {
            self.progress.log(format!(
                "  Job {release_name}/{module_name}/{job_id} already exists, skipping"
            ));
            return Ok(true);
        }
        drop(conn);

        self.progress
            .log(format!("  Downloading {module_name} (job {job_id})..."));
        let dest_dir = self
            .logs_base
            .join(&release_name)
            .join(module_name)
            .join(job_id);
        let (order_count, junit_count) =
            download_module_artifacts(self.api, job_url, &dest_dir).await?;
        self.progress
            .log(format!("    {order_count} run logs, {junit_count} junit reports"));
        if order_count == 0 && junit_count == 0 {
            return Ok(false);
        }

        let results = parser::parse_job_directory(&dest_dir);

        // Each module imports in its own transaction and commits
        // immediately, so a crash mid-build loses at most one module.
        let mut txn = self.pool.begin().await?;
        let outcome = import_job(
            JobIdentity {
                release: &release_name,
                module: module_name,
                job_id,
                jenkins_url: Some(job_url),
                version: version.as_deref(),
                parent_job_id: Some(&self.parent_build),
                executed_at,
            },
            &results,
            true,
            &mut txn,
        )
        .await?;
        txn.commit().await?;
        self.progress.log(format!(
            "  Imported {release_name}/{module_name} job {job_id}: {} tests",
            outcome.inserted
        ));

        if self.cleanup_enabled {
            cleanup_artifacts(self.logs_base, &release_name, module_name, job_id);
        }
        Ok(true)
    }
}

/// Process one parent build: fetch its build map and run every module job
/// through download/parse/import on a bounded worker pool. Returns the
/// number of successfully handled modules.
async fn process_parent_build(
    pool: &SqlitePool,
    api: &dyn JenkinsApi,
    logs_base: &Path,
    cleanup_enabled: bool,
    parent_url: &str,
    build_number: i64,
    progress: &Progress,
) -> anyhow::Result<usize> {
    let build_url = format!("{}/{build_number}/", parent_url.trim_end_matches('/'));

    let Some(build_map) = api.download_build_map(&build_url).await? else {
        progress.log(format!(
            "Build {build_number}: no build_map.json, skipping"
        ));
        return Ok(0);
    };
    let module_jobs = parse_build_map(&build_map, &build_url);
    progress.log(format!(
        "Build {build_number}: found {} modules",
        module_jobs.len()
    ));

    // The parent build's own version backstops modules without one.
    let parent_version = match api.get_job_info(&build_url).await {
        Ok(info) => extract_version_from_title(&info.display_name),
        Err(err) => {
            tracing::debug!(%build_url, %err, "could not fetch parent build info");
            None
        }
    };

    let route = ReleaseRoute::ByVersion {
        parent_version,
        parent_url: parent_url.to_string(),
    };
    let task = ModuleTask {
        pool,
        api,
        logs_base,
        cleanup_enabled,
        parent_build: build_number.to_string(),
        progress: progress.clone(),
    };

    let successes = futures::stream::iter(module_jobs.into_iter())
        .map(|(module_name, (job_url, job_id))| {
            let task = &task;
            let route = route.clone();
            async move { task.run(&module_name, &job_url, &job_id, &route).await }
        })
        .buffer_unordered(MODULE_WORKERS)
        .filter(|success| futures::future::ready(*success))
        .count()
        .await;
    Ok(successes)
}

/// Scheduled polling pass over the unified parent job.
///
/// Discovers builds past the smallest active-release watermark, processes
/// them oldest first, and advances every active release's watermark after
/// each completed build. Failures are recorded in the polling log; the next
/// tick starts over from the watermark, which is safe because imports are
/// idempotent on (module, job id).
#[tracing::instrument(skip_all)]
pub async fn poll_jenkins(
    pool: &SqlitePool,
    api: &dyn JenkinsApi,
    logs_base: &Path,
) -> anyhow::Result<()> {
    let started_at = Utc::now();

    let active = releases::fetch_releases(true, pool).await?;
    if active.is_empty() {
        tracing::info!("no active releases, skipping poll");
        return Ok(());
    }
    let log_release_id = Some(active[0].id);

    let Some(parent_url) = active.iter().find_map(|r| r.jenkins_job_url.clone()) else {
        tracing::warn!("no Jenkins job URL configured on any active release");
        record_poll_result(
            pool,
            log_release_id,
            "failed",
            0,
            Some("No Jenkins job URL configured".to_string()),
            started_at,
        )
        .await?;
        return Ok(());
    };

    match poll_inner(pool, api, logs_base, &active, &parent_url).await {
        Ok(modules) => {
            tracing::info!(modules, "polling cycle completed");
            record_poll_result(pool, log_release_id, "success", modules as i64, None, started_at)
                .await?;
        }
        Err(err) => {
            if err.downcast_ref::<jenkins_client::Error>().is_some()
                || err.downcast_ref::<serde_json::Error>().is_some()
            {
                tracing::error!(error = %format!("{err:#}"), "polling failed");
            } else {
                // Unknown failure class; keep the service up but make noise.
                tracing::error!(error = %format!("{err:#}"), unexpected = true, "polling failed");
            }
            record_poll_result(
                pool,
                log_release_id,
                "failed",
                0,
                Some(format!("{err:#}")),
                started_at,
            )
            .await?;
        }
    }
    Ok(())
}

async fn record_poll_result(
    pool: &SqlitePool,
    log_release_id: Option<i64>,
    status: &'static str,
    modules: i64,
    error: Option<String>,
    started_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;
    audit::insert_polling_log(
        log_release_id,
        status,
        modules,
        error.as_deref(),
        started_at,
        &mut conn,
    )
    .await?;
    Ok(())
}

async fn poll_inner(
    pool: &SqlitePool,
    api: &dyn JenkinsApi,
    logs_base: &Path,
    active: &[releases::Release],
    parent_url: &str,
) -> anyhow::Result<usize> {
    let cleanup_enabled = cleanup_after_import(pool).await?;
    let min_build = active
        .iter()
        .map(|r| r.last_processed_build)
        .min()
        .unwrap_or(0);

    let builds = api.get_job_builds(parent_url, min_build).await?;
    if builds.is_empty() {
        tracing::info!(min_build, "no new parent builds");
        return Ok(0);
    }
    tracing::info!(count = builds.len(), min_build, "found new parent builds");

    let progress = Progress::tracing();
    let mut total_modules = 0;

    // Oldest first, so the watermark only ever covers fully-attempted builds.
    for build_number in builds.iter().rev() {
        total_modules += process_parent_build(
            pool,
            api,
            logs_base,
            cleanup_enabled,
            parent_url,
            *build_number,
            &progress,
        )
        .await?;

        // All active releases share the parent, so they advance together.
        let mut conn = pool.acquire().await?;
        for release in active {
            releases::advance_last_processed_build(release.id, *build_number, &mut conn).await?;
        }
    }
    Ok(total_modules)
}

async fn cleanup_after_import(pool: &SqlitePool) -> anyhow::Result<bool> {
    Ok(settings::get_bool(
        models::keys::CLEANUP_ARTIFACTS_AFTER_IMPORT,
        models::defaults::CLEANUP_ARTIFACTS_AFTER_IMPORT,
        pool,
    )
    .await?)
}

/// A parent build offered for on-demand download.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DiscoveredMainJob {
    /// `release/build_number`.
    pub key: String,
    pub release: String,
    pub release_id: i64,
    pub build_number: i64,
    pub build_url: String,
    pub jenkins_job_url: String,
}

/// List parent builds past each active release's watermark.
pub async fn discover_jobs(
    pool: &SqlitePool,
    api: &dyn JenkinsApi,
) -> anyhow::Result<Vec<DiscoveredMainJob>> {
    let mut discovered = Vec::new();

    for release in releases::fetch_releases(true, pool).await? {
        let Some(job_url) = release.jenkins_job_url.clone() else {
            tracing::warn!(release = %release.name, "release has no Jenkins job URL configured");
            continue;
        };
        match api.get_job_builds(&job_url, release.last_processed_build).await {
            Ok(builds) => {
                for build_number in builds {
                    discovered.push(DiscoveredMainJob {
                        key: format!("{}/{build_number}", release.name),
                        release: release.name.clone(),
                        release_id: release.id,
                        build_number,
                        build_url: format!("{}/{build_number}/", job_url.trim_end_matches('/')),
                        jenkins_job_url: job_url.clone(),
                    });
                }
            }
            Err(err) => {
                tracing::error!(release = %release.name, %err, "error discovering builds");
            }
        }
    }
    Ok(discovered)
}

/// On-demand ingestion of selected parent builds, streaming progress into
/// the job tracker. Modules download in parallel per build; each release's
/// watermark advances to its highest successfully handled build.
pub async fn run_selected_download(
    pool: SqlitePool,
    api: Arc<dyn JenkinsApi>,
    logs_base: PathBuf,
    tracker: JobTracker,
    tracker_job_id: String,
    main_jobs: Vec<DiscoveredMainJob>,
) {
    let progress = Progress::tracker(tracker.clone(), tracker_job_id.clone());

    match run_selected_inner(&pool, api.as_ref(), &logs_base, &progress, &main_jobs).await {
        Ok(successes) => {
            tracker.set_status(&tracker_job_id, JobStatus::Completed, None);
            progress.log(format!(
                "Download completed: {successes}/{} builds succeeded",
                main_jobs.len()
            ));
        }
        Err(err) => {
            let rendered = format!("{err:#}");
            tracker.set_status(&tracker_job_id, JobStatus::Failed, Some(rendered.clone()));
            progress.log(format!("FATAL ERROR: {rendered}"));
        }
    }
}

async fn run_selected_inner(
    pool: &SqlitePool,
    api: &dyn JenkinsApi,
    logs_base: &Path,
    progress: &Progress,
    main_jobs: &[DiscoveredMainJob],
) -> anyhow::Result<usize> {
    progress.log(format!(
        "Starting on-demand download for {} main builds",
        main_jobs.len()
    ));
    let cleanup_enabled = cleanup_after_import(pool).await?;

    let mut success_builds_by_release: HashMap<String, Vec<i64>> = HashMap::new();

    for main_job in main_jobs {
        progress.log(format!(
            "Processing {} build #{}...",
            main_job.release, main_job.build_number
        ));

        let build_map = match api.download_build_map(&main_job.build_url).await {
            Ok(Some(build_map)) => build_map,
            Ok(None) => {
                progress.log(format!(
                    "  ERROR: no build_map found for build #{}",
                    main_job.build_number
                ));
                continue;
            }
            Err(err) => {
                progress.log(format!(
                    "  ERROR processing build #{}: {err}",
                    main_job.build_number
                ));
                continue;
            }
        };
        let module_jobs = parse_build_map(&build_map, &main_job.build_url);
        progress.log(format!(
            "  Found {} modules to download (parallel mode)",
            module_jobs.len()
        ));

        let route = ReleaseRoute::Fixed {
            release: main_job.release.clone(),
        };
        let task = ModuleTask {
            pool,
            api,
            logs_base,
            cleanup_enabled,
            parent_build: main_job.build_number.to_string(),
            progress: progress.clone(),
        };

        let module_successes = futures::stream::iter(module_jobs.iter())
            .map(|(module_name, (job_url, job_id))| {
                let task = &task;
                let route = route.clone();
                let module_name = module_name.clone();
                let job_url = job_url.clone();
                let job_id = job_id.clone();
                async move { task.run(&module_name, &job_url, &job_id, &route).await }
            })
            .buffer_unordered(MODULE_WORKERS)
            .filter(|success| futures::future::ready(*success))
            .count()
            .await;

        if module_successes > 0 {
            success_builds_by_release
                .entry(main_job.release.clone())
                .or_default()
                .push(main_job.build_number);
            progress.log(format!(
                "  Completed build #{}: {module_successes}/{} modules succeeded",
                main_job.build_number,
                module_jobs.len()
            ));
        } else {
            progress.log(format!(
                "  Build #{} failed - no modules imported",
                main_job.build_number
            ));
        }
    }

    progress.log("Updating last_processed_build tracker...".to_string());
    let mut conn = pool.acquire().await?;
    for (release_name, builds) in &success_builds_by_release {
        if let Some(release) = releases::fetch_release(release_name, &mut *conn).await? {
            let highest = builds.iter().copied().max().unwrap_or(0);
            releases::advance_last_processed_build(release.id, highest, &mut conn).await?;
            progress.log(format!("  Updated {release_name} to build {highest}"));
        }
    }

    // Re-imports can race duplicate rows in; sweep them here.
    let removed = test_results::remove_duplicate_results(&mut conn).await?;
    if removed > 0 {
        tracing::warn!(removed, "removed duplicate test results after import");
    }

    Ok(success_builds_by_release.values().map(Vec::len).sum())
}
