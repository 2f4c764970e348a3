use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use agent::ingest::{self, DiscoveredMainJob};
use agent::sse::{stream_events, DrainConfig, StreamEvent};
use agent::tracker::{JobState, JobStatus, JobTracker};
use jenkins_client::{Artifact, Error, JenkinsApi, JobInfo};
use sqlx::SqlitePool;
use tracker_sql::{jobs, releases, test_results};

const PARENT_URL: &str = "https://ci.example.com/job/MODULE-RUN-ESXI-IPV4-ALL";

/// In-memory Jenkins double: canned builds, build maps, job infos and
/// artifact bodies, with per-URL failure injection.
#[derive(Default)]
struct FakeJenkins {
    builds: Vec<i64>,
    build_maps: HashMap<String, HashMap<String, i64>>,
    job_infos: HashMap<String, JobInfo>,
    artifacts: HashMap<String, Vec<Artifact>>,
    bodies: HashMap<(String, String), String>,
    fail_artifact_lists: HashSet<String>,
    downloads: Mutex<Vec<String>>,
}

impl FakeJenkins {
    fn add_module_job(&mut self, job_url: &str, version: &str, files: &[(&str, &str)]) {
        self.job_infos.insert(
            job_url.to_string(),
            JobInfo {
                display_name: format!("REL: X | VER: {version} | MOD: FULL-RUN"),
                timestamp: Some(1_700_000_000_000),
                ..Default::default()
            },
        );
        let artifacts = files
            .iter()
            .map(|(rel, _)| Artifact {
                relative_path: rel.to_string(),
                file_name: rel.rsplit('/').next().unwrap().to_string(),
            })
            .collect();
        self.artifacts.insert(job_url.to_string(), artifacts);
        for (rel, body) in files {
            self.bodies
                .insert((job_url.to_string(), rel.to_string()), body.to_string());
        }
    }
}

#[async_trait::async_trait]
impl JenkinsApi for FakeJenkins {
    async fn get_artifacts_list(&self, job_url: &str) -> Result<Vec<Artifact>, Error> {
        if self.fail_artifact_lists.contains(job_url) {
            return Err(Error::NotFound {
                url: job_url.to_string(),
            });
        }
        Ok(self.artifacts.get(job_url).cloned().unwrap_or_default())
    }

    async fn download_artifact(
        &self,
        job_url: &str,
        relative_path: &str,
        dest_path: &Path,
    ) -> Result<(), Error> {
        let body = self
            .bodies
            .get(&(job_url.to_string(), relative_path.to_string()))
            .ok_or_else(|| Error::NotFound {
                url: format!("{job_url}/artifact/{relative_path}"),
            })?;
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(dest_path, body).unwrap();
        self.downloads.lock().unwrap().push(relative_path.to_string());
        Ok(())
    }

    async fn get_job_builds(&self, _job_url: &str, min_build: i64) -> Result<Vec<i64>, Error> {
        let mut builds: Vec<i64> = self
            .builds
            .iter()
            .copied()
            .filter(|b| *b > min_build)
            .collect();
        builds.sort_unstable_by(|a, b| b.cmp(a));
        Ok(builds)
    }

    async fn get_job_info(&self, job_url: &str) -> Result<JobInfo, Error> {
        self.job_infos
            .get(job_url.trim_end_matches('/'))
            .or_else(|| self.job_infos.get(job_url))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                url: job_url.to_string(),
            })
    }

    async fn download_build_map(
        &self,
        job_url: &str,
    ) -> Result<Option<HashMap<String, i64>>, Error> {
        Ok(self.build_maps.get(job_url).cloned())
    }

    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, Error> {
        Err(Error::NotFound {
            url: url.to_string(),
        })
    }
}

async fn seed_release(pool: &SqlitePool, name: &str) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    let release = releases::create_release(name, Some(PARENT_URL), true, None, &mut conn)
        .await
        .unwrap();
    release.id
}

fn order_log(module: &str) -> String {
    format!(
        "[10.0.0.1] PASSED data_plane/tests/{module}/smoke_test.py::TestSmoke::test_up\n\
         [10.0.0.1] FAILED data_plane/tests/{module}/smoke_test.py::TestSmoke::test_down\n"
    )
}

/// A module job whose displayName says 6.4.2.0 lands in release "6.4", not
/// the release that owns the parent URL.
#[tokio::test]
async fn modules_route_to_release_by_version() {
    let pool = tracker_sql::memory_pool().await;
    seed_release(&pool, "7.0").await;
    let logs_base = tempfile::tempdir().unwrap();

    let mut fake = FakeJenkins::default();
    fake.builds = vec![216];
    fake.build_maps.insert(
        format!("{PARENT_URL}/216/"),
        HashMap::from([("BUSINESS_POLICY_ESXI".to_string(), 144i64)]),
    );
    let module_url = "https://ci.example.com/job/BUSINESS-POLICY-ESXI/144/";
    fake.add_module_job(
        module_url,
        "6.4.2.0",
        &[(
            "hapy/1700000000_bp_5s.order.txt",
            &order_log("business_policy"),
        )],
    );

    ingest::poll_jenkins(&pool, &fake, logs_base.path())
        .await
        .unwrap();

    // Imported under 6.4, which did not exist before the poll.
    let release = releases::fetch_release("6.4", &pool).await.unwrap().unwrap();
    let module = jobs::fetch_module(release.id, "business_policy", &pool)
        .await
        .unwrap()
        .unwrap();
    let job = jobs::fetch_job(module.id, "144", &pool).await.unwrap().unwrap();
    assert_eq!(job.parent_job_id.as_deref(), Some("216"));
    assert_eq!(job.version.as_deref(), Some("6.4.2.0"));
    assert_eq!((job.total, job.passed, job.failed), (2, 1, 1));
    assert!(job.executed_at.is_some());

    // The active release's watermark advanced past the processed build.
    let origin = releases::fetch_release("7.0", &pool).await.unwrap().unwrap();
    assert_eq!(origin.last_processed_build, 216);

    // Artifacts were cleaned up after import (the default).
    assert!(!logs_base.path().join("6.4/business_policy/144").exists());

    let logs = tracker_sql::audit::recent_polling_logs(5, &pool).await.unwrap();
    assert_eq!(logs[0].status.as_deref(), Some("success"));
    assert_eq!(logs[0].modules_downloaded, 1);
}

#[tokio::test]
async fn discovery_starts_from_min_watermark() {
    let pool = tracker_sql::memory_pool().await;
    let ahead = seed_release(&pool, "7.0").await;
    seed_release(&pool, "6.4").await;
    {
        // 7.0 already saw build 210; 6.4 lags at 0.
        let mut conn = pool.acquire().await.unwrap();
        releases::advance_last_processed_build(ahead, 210, &mut conn)
            .await
            .unwrap();
    }
    let logs_base = tempfile::tempdir().unwrap();

    let mut fake = FakeJenkins::default();
    fake.builds = vec![205, 216];
    // Neither build has a build map; both are skipped but still watermarked.

    ingest::poll_jenkins(&pool, &fake, logs_base.path())
        .await
        .unwrap();

    // min watermark 0 pulled both builds back in, ascending.
    for name in ["7.0", "6.4"] {
        let release = releases::fetch_release(name, &pool).await.unwrap().unwrap();
        assert_eq!(release.last_processed_build, 216, "release {name}");
    }
}

#[tokio::test]
async fn existing_jobs_skip_but_count_as_success() {
    let pool = tracker_sql::memory_pool().await;
    seed_release(&pool, "6.4").await;
    let logs_base = tempfile::tempdir().unwrap();

    let mut fake = FakeJenkins::default();
    fake.builds = vec![216];
    fake.build_maps.insert(
        format!("{PARENT_URL}/216/"),
        HashMap::from([("BUSINESS_POLICY_ESXI".to_string(), 144i64)]),
    );
    let module_url = "https://ci.example.com/job/BUSINESS-POLICY-ESXI/144/";
    fake.add_module_job(
        module_url,
        "6.4.2.0",
        &[(
            "hapy/1700000000_bp_5s.order.txt",
            &order_log("business_policy"),
        )],
    );

    ingest::poll_jenkins(&pool, &fake, logs_base.path())
        .await
        .unwrap();
    let downloads_after_first = fake.downloads.lock().unwrap().len();

    // Reset the watermark so the same build is rediscovered.
    {
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("UPDATE releases SET last_processed_build = 0")
            .execute(&mut *conn)
            .await
            .unwrap();
    }
    ingest::poll_jenkins(&pool, &fake, logs_base.path())
        .await
        .unwrap();

    // No re-download, no duplicate rows, and the pass is recorded a success.
    assert_eq!(fake.downloads.lock().unwrap().len(), downloads_after_first);
    let release = releases::fetch_release("6.4", &pool).await.unwrap().unwrap();
    let module = jobs::fetch_module(release.id, "business_policy", &pool)
        .await
        .unwrap()
        .unwrap();
    let job = jobs::fetch_job(module.id, "144", &pool).await.unwrap().unwrap();
    assert_eq!(
        test_results::count_for_job(job.id, &pool).await.unwrap(),
        2
    );
    let logs = tracker_sql::audit::recent_polling_logs(5, &pool).await.unwrap();
    assert!(logs.iter().all(|l| l.status.as_deref() == Some("success")));
}

#[tokio::test]
async fn one_broken_module_does_not_sink_the_build() {
    let pool = tracker_sql::memory_pool().await;
    seed_release(&pool, "6.4").await;
    let logs_base = tempfile::tempdir().unwrap();

    let mut fake = FakeJenkins::default();
    fake.builds = vec![216];
    fake.build_maps.insert(
        format!("{PARENT_URL}/216/"),
        HashMap::from([
            ("BUSINESS_POLICY_ESXI".to_string(), 144i64),
            ("ROUTING_MODULE_ESXI".to_string(), 97i64),
        ]),
    );
    let good_url = "https://ci.example.com/job/BUSINESS-POLICY-ESXI/144/";
    fake.add_module_job(
        good_url,
        "6.4.2.0",
        &[(
            "hapy/1700000000_bp_5s.order.txt",
            &order_log("business_policy"),
        )],
    );
    let bad_url = "https://ci.example.com/job/ROUTING-MODULE-ESXI/97/";
    fake.add_module_job(bad_url, "6.4.2.0", &[]);
    fake.fail_artifact_lists.insert(bad_url.to_string());

    ingest::poll_jenkins(&pool, &fake, logs_base.path())
        .await
        .unwrap();

    let release = releases::fetch_release("6.4", &pool).await.unwrap().unwrap();
    let module = jobs::fetch_module(release.id, "business_policy", &pool)
        .await
        .unwrap()
        .unwrap();
    assert!(jobs::fetch_job(module.id, "144", &pool).await.unwrap().is_some());

    // The healthy module imported and the build completed.
    assert_eq!(release.last_processed_build, 216);
    let logs = tracker_sql::audit::recent_polling_logs(5, &pool).await.unwrap();
    assert_eq!(logs[0].status.as_deref(), Some("success"));
    assert_eq!(logs[0].modules_downloaded, 1);
}

#[tokio::test]
async fn on_demand_download_streams_logs_through_drain() {
    let pool = tracker_sql::memory_pool().await;
    seed_release(&pool, "7.0").await;
    let logs_base = tempfile::tempdir().unwrap();

    let mut fake = FakeJenkins::default();
    fake.build_maps.insert(
        format!("{PARENT_URL}/216/"),
        HashMap::from([("FIREWALL_ESXI".to_string(), 55i64)]),
    );
    let module_url = "https://ci.example.com/job/FIREWALL-ESXI/55/";
    fake.add_module_job(
        module_url,
        "7.0.0.0",
        &[("hapy/1700000000_bp_5s.order.txt", &order_log("firewall"))],
    );

    let tracker = JobTracker::new();
    let tracker_job = "dl-1".to_string();
    tracker.set_job(JobState::new(
        tracker_job.clone(),
        "on-demand",
        serde_json::Value::Null,
    ));
    tracker.set_status(&tracker_job, JobStatus::Running, None);

    let selected = vec![DiscoveredMainJob {
        key: "7.0/216".to_string(),
        release: "7.0".to_string(),
        release_id: 1,
        build_number: 216,
        build_url: format!("{PARENT_URL}/216/"),
        jenkins_job_url: PARENT_URL.to_string(),
    }];

    ingest::run_selected_download(
        pool.clone(),
        Arc::new(fake),
        logs_base.path().to_path_buf(),
        tracker.clone(),
        tracker_job.clone(),
        selected,
    )
    .await;

    assert_eq!(
        tracker.get_job(&tracker_job).unwrap().status,
        JobStatus::Completed
    );

    // The on-demand path pins the discovered release rather than routing by
    // version.
    let release = releases::fetch_release("7.0", &pool).await.unwrap().unwrap();
    assert_eq!(release.last_processed_build, 216);
    let module = jobs::fetch_module(release.id, "firewall", &pool)
        .await
        .unwrap()
        .unwrap();
    assert!(jobs::fetch_job(module.id, "55", &pool).await.unwrap().is_some());

    // Everything the workers pushed is still in the queue; the drain phase
    // delivers it all even though the job is already terminal.
    let drain = DrainConfig {
        timeout: std::time::Duration::from_millis(300),
        poll_interval: std::time::Duration::from_millis(20),
    };
    let mut rx = stream_events(tracker.clone(), tracker_job.clone(), drain);
    let mut messages = Vec::new();
    let mut saw_complete = false;
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Message { message, .. } => messages.push(message),
            StreamEvent::Complete { status } => {
                assert_eq!(status, JobStatus::Completed);
                saw_complete = true;
            }
            StreamEvent::Status { status, error } => {
                assert_eq!(status, JobStatus::Completed);
                assert!(error.is_none());
            }
        }
    }
    assert!(saw_complete);
    assert!(messages.iter().any(|m| m.contains("Processing 7.0 build #216")));
    assert!(messages
        .iter()
        .any(|m| m.contains("Download completed: 1/1 builds succeeded")));
    assert!(!tracker.has_queue(&tracker_job));
}

#[tokio::test]
async fn discover_lists_builds_past_each_watermark() {
    let pool = tracker_sql::memory_pool().await;
    let id = seed_release(&pool, "7.0").await;
    {
        let mut conn = pool.acquire().await.unwrap();
        releases::advance_last_processed_build(id, 210, &mut conn)
            .await
            .unwrap();
    }

    let mut fake = FakeJenkins::default();
    fake.builds = vec![205, 212, 216];

    let discovered = ingest::discover_jobs(&pool, &fake).await.unwrap();
    let keys: Vec<&str> = discovered.iter().map(|d| d.key.as_str()).collect();
    assert_eq!(keys, vec!["7.0/216", "7.0/212"]);
    assert_eq!(discovered[0].build_url, format!("{PARENT_URL}/216/"));
}
