use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use models::{extract_module_from_path, normalize_test_name};
use parser::ParsedTest;
use sqlx::SqliteConnection;
use tracker_sql::jobs::{self, Job};
use tracker_sql::test_results::NewTestResult;
use tracker_sql::{metadata, releases, test_results};

/// Identifying fields of a job being imported.
#[derive(Debug, Clone)]
pub struct JobIdentity<'a> {
    pub release: &'a str,
    pub module: &'a str,
    pub job_id: &'a str,
    pub jenkins_url: Option<&'a str>,
    pub version: Option<&'a str>,
    pub parent_job_id: Option<&'a str>,
    pub executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub job: Job,
    pub inserted: usize,
}

/// Import a parsed job into the store, creating the release/module/job
/// hierarchy as needed. Idempotent under `skip_if_exists`: a job that
/// already holds results is returned untouched. The caller owns the
/// transaction.
///
/// ERROR statuses fold to FAILED here; the persisted job statistic divides
/// by the full total, unlike the parser's executed-only summary rate.
pub async fn import_job(
    identity: JobIdentity<'_>,
    results: &[ParsedTest],
    skip_if_exists: bool,
    conn: &mut SqliteConnection,
) -> anyhow::Result<ImportOutcome> {
    let release = releases::upsert_release(identity.release, identity.jenkins_url, conn).await?;
    let module = jobs::upsert_module(release.id, identity.module, conn).await?;

    let job = match jobs::fetch_job(module.id, identity.job_id, &mut *conn).await? {
        Some(job) => {
            if skip_if_exists && test_results::count_for_job(job.id, &mut *conn).await? > 0 {
                tracing::info!(
                    release = identity.release,
                    module = identity.module,
                    job_id = identity.job_id,
                    "job already imported, skipping"
                );
                return Ok(ImportOutcome { job, inserted: 0 });
            }
            job
        }
        None => {
            jobs::create_job(
                module.id,
                identity.job_id,
                identity.jenkins_url,
                identity.version,
                identity.parent_job_id,
                identity.executed_at,
                conn,
            )
            .await?
        }
    };

    if results.is_empty() {
        tracing::warn!(
            release = identity.release,
            module = identity.module,
            job_id = identity.job_id,
            "no test results to import"
        );
        return Ok(ImportOutcome { job, inserted: 0 });
    }

    // Job statistics over the parsed results; ERROR counts as FAILED.
    let total = results.len() as i64;
    let passed = results
        .iter()
        .filter(|r| r.status == models::TestStatus::Passed)
        .count() as i64;
    let skipped = results
        .iter()
        .filter(|r| r.status == models::TestStatus::Skipped)
        .count() as i64;
    let failed = total - passed - skipped;
    let pass_rate = if total > 0 {
        (passed as f64 / total as f64 * 10_000.0).round() / 100.0
    } else {
        0.0
    };
    jobs::update_job_stats(job.id, total, passed, failed, skipped, pass_rate, conn).await?;

    // One metadata lookup covers priority and design-topology
    // denormalization for every result.
    let names: Vec<String> = results
        .iter()
        .map(|r| normalize_test_name(&r.test_name).to_string())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let metadata_by_name: HashMap<String, (Option<String>, Option<String>)> =
        metadata::fetch_by_names(&names, &mut *conn)
            .await?
            .into_iter()
            .map(|m| (m.testcase_name, (m.priority, m.topology)))
            .collect();

    let rows: Vec<NewTestResult> = results
        .iter()
        .map(|r| {
            let (priority, topology_metadata) = metadata_by_name
                .get(normalize_test_name(&r.test_name))
                .cloned()
                .unwrap_or((None, None));
            NewTestResult {
                file_path: r.file_path.clone(),
                class_name: r.class_name.clone(),
                test_name: r.test_name.clone(),
                status: r.status.fold_error(),
                setup_ip: Some(r.setup_ip.clone()),
                jenkins_topology: Some(r.topology.clone()),
                order_index: r.order_index,
                was_rerun: r.was_rerun,
                rerun_still_failed: r.rerun_still_failed,
                failure_message: r.failure_message.clone(),
                priority,
                topology_metadata,
                testcase_module: extract_module_from_path(&r.file_path).map(String::from),
            }
        })
        .collect();
    test_results::insert_test_results(job.id, &rows, conn).await?;

    let job = jobs::fetch_job(module.id, identity.job_id, &mut *conn)
        .await?
        .expect("job row just written");
    Ok(ImportOutcome {
        job,
        inserted: rows.len(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use models::TestStatus;
    use tracker_sql::metadata::MetadataUpsert;

    fn parsed(name: &str, file_path: &str, status: TestStatus) -> ParsedTest {
        ParsedTest {
            setup_ip: "10.0.0.1".to_string(),
            status,
            file_path: file_path.to_string(),
            class_name: "TestSuite".to_string(),
            test_name: name.to_string(),
            topology: "5s".to_string(),
            order_index: 0,
            was_rerun: false,
            rerun_still_failed: false,
            failure_message: None,
        }
    }

    fn identity<'a>() -> JobIdentity<'a> {
        JobIdentity {
            release: "7.0",
            module: "routing",
            job_id: "101",
            jenkins_url: None,
            version: Some("7.0.0.0"),
            parent_job_id: Some("17"),
            executed_at: None,
        }
    }

    #[tokio::test]
    async fn statistics_fold_error_to_failed() {
        let pool = tracker_sql::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let results = vec![
            parsed("t1", "data_plane/tests/routing/a_test.py", TestStatus::Passed),
            parsed("t2", "data_plane/tests/routing/a_test.py", TestStatus::Failed),
            parsed("t3", "data_plane/tests/routing/a_test.py", TestStatus::Error),
            parsed("t4", "data_plane/tests/routing/a_test.py", TestStatus::Skipped),
        ];
        let outcome = import_job(identity(), &results, true, &mut conn)
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 4);

        let job = &outcome.job;
        assert_eq!((job.total, job.passed, job.failed, job.skipped), (4, 1, 2, 1));
        // Stored rate divides by total, skipped included.
        assert_eq!(job.pass_rate, 25.0);
        // The summed counts never exceed the total.
        assert!(job.passed + job.failed + job.skipped <= job.total);

        // No ERROR survives persistence.
        let rows = test_results::fetch_results_for_jobs(&[job.id], None, &pool)
            .await
            .unwrap();
        assert!(rows.iter().all(|r| r.status != TestStatus::Error));
        assert!(rows.iter().all(|r| r.testcase_module.as_deref() == Some("routing")));
    }

    #[tokio::test]
    async fn reimport_is_a_noop_with_skip() {
        let pool = tracker_sql::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let results = vec![parsed(
            "t1",
            "data_plane/tests/routing/a_test.py",
            TestStatus::Passed,
        )];
        let first = import_job(identity(), &results, true, &mut conn)
            .await
            .unwrap();
        assert_eq!(first.inserted, 1);

        let second = import_job(identity(), &results, true, &mut conn)
            .await
            .unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.job.id, first.job.id);

        assert_eq!(
            test_results::count_for_job(first.job.id, &pool).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn metadata_denormalizes_onto_results() {
        let pool = tracker_sql::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        metadata::upsert_testcase_metadata(
            &MetadataUpsert {
                testcase_name: "t_param".to_string(),
                priority: Some("P0".to_string()),
                topology: Some("5-site".to_string()),
                ..Default::default()
            },
            &mut conn,
        )
        .await
        .unwrap();

        let results = vec![parsed(
            "t_param[Hub]",
            "data_plane/tests/routing/a_test.py",
            TestStatus::Failed,
        )];
        let outcome = import_job(identity(), &results, true, &mut conn)
            .await
            .unwrap();

        let rows = test_results::fetch_results_for_jobs(&[outcome.job.id], None, &pool)
            .await
            .unwrap();
        assert_eq!(rows[0].priority.as_deref(), Some("P0"));
        assert_eq!(rows[0].topology_metadata.as_deref(), Some("5-site"));
        // The stored name keeps its parameters.
        assert_eq!(rows[0].test_name, "t_param[Hub]");
    }

    #[tokio::test]
    async fn outside_tree_paths_have_no_module() {
        let pool = tracker_sql::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let results = vec![parsed("t1", "tests/unit/a_test.py", TestStatus::Passed)];
        let outcome = import_job(identity(), &results, true, &mut conn)
            .await
            .unwrap();

        let rows = test_results::fetch_results_for_jobs(&[outcome.job.id], None, &pool)
            .await
            .unwrap();
        assert!(rows[0].testcase_module.is_none());
    }
}
