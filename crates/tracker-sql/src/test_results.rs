use std::collections::HashMap;

use chrono::{DateTime, Utc};
use models::TestStatus;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct TestResultRow {
    pub id: i64,
    pub job_id: i64,
    pub file_path: String,
    pub class_name: String,
    pub test_name: String,
    pub status: TestStatus,
    pub setup_ip: Option<String>,
    pub jenkins_topology: Option<String>,
    pub order_index: i64,
    pub was_rerun: bool,
    pub rerun_still_failed: bool,
    pub failure_message: Option<String>,
    pub priority: Option<String>,
    pub topology_metadata: Option<String>,
    pub testcase_module: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TestResultRow {
    pub fn test_key(&self) -> String {
        models::test_key(&self.file_path, &self.class_name, &self.test_name)
    }
}

/// A result to be inserted under a job. Status must already be folded
/// (no ERROR rows are ever persisted).
#[derive(Debug, Clone)]
pub struct NewTestResult {
    pub file_path: String,
    pub class_name: String,
    pub test_name: String,
    pub status: TestStatus,
    pub setup_ip: Option<String>,
    pub jenkins_topology: Option<String>,
    pub order_index: i64,
    pub was_rerun: bool,
    pub rerun_still_failed: bool,
    pub failure_message: Option<String>,
    pub priority: Option<String>,
    pub topology_metadata: Option<String>,
    pub testcase_module: Option<String>,
}

pub async fn insert_test_results(
    job_pk: i64,
    results: &[NewTestResult],
    conn: &mut SqliteConnection,
) -> sqlx::Result<()> {
    let now = Utc::now();
    for r in results {
        sqlx::query(
            "INSERT INTO test_results
                (job_id, file_path, class_name, test_name, status, setup_ip, jenkins_topology,
                 order_index, was_rerun, rerun_still_failed, failure_message, priority,
                 topology_metadata, testcase_module, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job_pk)
        .bind(&r.file_path)
        .bind(&r.class_name)
        .bind(&r.test_name)
        .bind(r.status)
        .bind(&r.setup_ip)
        .bind(&r.jenkins_topology)
        .bind(r.order_index)
        .bind(r.was_rerun)
        .bind(r.rerun_still_failed)
        .bind(&r.failure_message)
        .bind(&r.priority)
        .bind(&r.topology_metadata)
        .bind(&r.testcase_module)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn count_for_job(
    job_pk: i64,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM test_results WHERE job_id = ?")
        .bind(job_pk)
        .fetch_one(db)
        .await
}

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct JobStats {
    pub total: i64,
    pub passed: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl JobStats {
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64 * 10_000.0).round() / 100.0
        }
    }

    pub fn accumulate(&mut self, other: &JobStats) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Per-job status counts for a set of jobs in one round trip, optionally
/// restricted to one path-derived module.
pub async fn stats_for_jobs(
    job_pks: &[i64],
    testcase_module: Option<&str>,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<HashMap<i64, JobStats>> {
    if job_pks.is_empty() {
        return Ok(HashMap::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT job_id, status, COUNT(*) AS n FROM test_results WHERE job_id IN (",
    );
    let mut separated = builder.separated(", ");
    for pk in job_pks {
        separated.push_bind(*pk);
    }
    builder.push(")");
    if let Some(module) = testcase_module {
        builder.push(" AND testcase_module = ").push_bind(module);
    }
    builder.push(" GROUP BY job_id, status");

    let rows: Vec<(i64, TestStatus, i64)> = builder.build_query_as().fetch_all(db).await?;

    let mut stats: HashMap<i64, JobStats> = HashMap::new();
    for (job_pk, status, n) in rows {
        let entry = stats.entry(job_pk).or_default();
        entry.total += n;
        match status {
            TestStatus::Passed => entry.passed += n,
            TestStatus::Failed | TestStatus::Error => entry.failed += n,
            TestStatus::Skipped => entry.skipped += n,
        }
    }
    Ok(stats)
}

/// Per-module status counts across a job set, one round trip. Feeds the
/// All-Modules breakdown.
pub async fn stats_by_module_for_jobs(
    job_pks: &[i64],
    priorities: &[String],
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<HashMap<String, JobStats>> {
    if job_pks.is_empty() {
        return Ok(HashMap::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT testcase_module, status, COUNT(*) AS n FROM test_results
         WHERE testcase_module IS NOT NULL AND job_id IN (",
    );
    let mut separated = builder.separated(", ");
    for pk in job_pks {
        separated.push_bind(*pk);
    }
    builder.push(")");
    if !priorities.is_empty() {
        builder.push(" AND COALESCE(priority, 'UNKNOWN') IN (");
        let mut separated = builder.separated(", ");
        for priority in priorities {
            separated.push_bind(priority.clone());
        }
        builder.push(")");
    }
    builder.push(" GROUP BY testcase_module, status");

    let rows: Vec<(String, TestStatus, i64)> = builder.build_query_as().fetch_all(db).await?;

    let mut stats: HashMap<String, JobStats> = HashMap::new();
    for (module, status, n) in rows {
        let entry = stats.entry(module).or_default();
        entry.total += n;
        match status {
            TestStatus::Passed => entry.passed += n,
            TestStatus::Failed | TestStatus::Error => entry.failed += n,
            TestStatus::Skipped => entry.skipped += n,
        }
    }
    Ok(stats)
}

/// Per-priority status counts across a job set, one round trip. NULL
/// priorities land in the UNKNOWN bucket.
pub async fn stats_by_priority_for_jobs(
    job_pks: &[i64],
    testcase_module: Option<&str>,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<HashMap<String, JobStats>> {
    if job_pks.is_empty() {
        return Ok(HashMap::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT COALESCE(priority, 'UNKNOWN') AS bucket, status, COUNT(*) AS n
         FROM test_results WHERE job_id IN (",
    );
    let mut separated = builder.separated(", ");
    for pk in job_pks {
        separated.push_bind(*pk);
    }
    builder.push(")");
    if let Some(module) = testcase_module {
        builder.push(" AND testcase_module = ").push_bind(module);
    }
    builder.push(" GROUP BY bucket, status");

    let rows: Vec<(String, TestStatus, i64)> = builder.build_query_as().fetch_all(db).await?;

    let mut stats: HashMap<String, JobStats> = HashMap::new();
    for (bucket, status, n) in rows {
        let entry = stats.entry(bucket).or_default();
        entry.total += n;
        match status {
            TestStatus::Passed => entry.passed += n,
            TestStatus::Failed | TestStatus::Error => entry.failed += n,
            TestStatus::Skipped => entry.skipped += n,
        }
    }
    Ok(stats)
}

/// All results of a set of jobs, optionally restricted to one path-derived
/// module. Trend computation feeds on this single query.
pub async fn fetch_results_for_jobs(
    job_pks: &[i64],
    testcase_module: Option<&str>,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<TestResultRow>> {
    if job_pks.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder =
        QueryBuilder::<Sqlite>::new("SELECT * FROM test_results WHERE job_id IN (");
    let mut separated = builder.separated(", ");
    for pk in job_pks {
        separated.push_bind(*pk);
    }
    builder.push(")");
    if let Some(module) = testcase_module {
        builder.push(" AND testcase_module = ").push_bind(module);
    }
    builder.push(" ORDER BY job_id, order_index");

    builder.build_query_as::<TestResultRow>().fetch_all(db).await
}

/// PASSED (job, test_key) pairs for a set of jobs. The exclude-flaky
/// adjustment intersects these with the flaky key set; one query covers all
/// job groups.
pub async fn passed_keys_for_jobs(
    job_pks: &[i64],
    testcase_module: Option<&str>,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<(i64, String)>> {
    if job_pks.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT job_id, file_path || '::' || class_name || '::' || test_name AS test_key
         FROM test_results WHERE status = 'PASSED' AND job_id IN (",
    );
    let mut separated = builder.separated(", ");
    for pk in job_pks {
        separated.push_bind(*pk);
    }
    builder.push(")");
    if let Some(module) = testcase_module {
        builder.push(" AND testcase_module = ").push_bind(module);
    }

    builder.build_query_as::<(i64, String)>().fetch_all(db).await
}

#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    pub statuses: Vec<TestStatus>,
    /// Priority buckets; `UNKNOWN` matches rows with NULL priority.
    pub priorities: Vec<String>,
    /// Case-insensitive substring over test name, class and file path.
    pub search: Option<String>,
    pub testcase_module: Option<String>,
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, job_pks: &[i64], filter: &ResultFilter) {
    builder.push(" WHERE job_id IN (");
    let mut separated = builder.separated(", ");
    for pk in job_pks {
        separated.push_bind(*pk);
    }
    builder.push(")");

    if let Some(module) = &filter.testcase_module {
        builder
            .push(" AND testcase_module = ")
            .push_bind(module.clone());
    }
    if !filter.statuses.is_empty() {
        builder.push(" AND status IN (");
        let mut separated = builder.separated(", ");
        for status in &filter.statuses {
            separated.push_bind(*status);
        }
        builder.push(")");
    }
    if !filter.priorities.is_empty() {
        let with_unknown = filter.priorities.iter().any(|p| p == models::UNKNOWN_PRIORITY);
        builder.push(" AND (priority IN (");
        let mut separated = builder.separated(", ");
        for priority in &filter.priorities {
            separated.push_bind(priority.clone());
        }
        builder.push(")");
        if with_unknown {
            builder.push(" OR priority IS NULL");
        }
        builder.push(")");
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", escape_like(search));
        builder
            .push(" AND (test_name LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR class_name LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR file_path LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

/// Page of results across a parent's sub-jobs, with the matching total.
pub async fn fetch_results_filtered(
    job_pks: &[i64],
    filter: &ResultFilter,
    limit: i64,
    offset: i64,
    db: impl sqlx::Executor<'_, Database = Sqlite> + Copy,
) -> sqlx::Result<(Vec<TestResultRow>, i64)> {
    if job_pks.is_empty() {
        return Ok((Vec::new(), 0));
    }

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM test_results");
    push_filter(&mut count, job_pks, filter);
    let (total,): (i64,) = count.build_query_as().fetch_one(db).await?;

    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM test_results");
    push_filter(&mut builder, job_pks, filter);
    builder
        .push(" ORDER BY job_id, order_index LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows = builder.build_query_as::<TestResultRow>().fetch_all(db).await?;
    Ok((rows, total))
}

/// FAILED rows of a set of jobs, for failure clustering.
pub async fn fetch_failures_for_jobs(
    job_pks: &[i64],
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<TestResultRow>> {
    if job_pks.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT * FROM test_results WHERE status = 'FAILED' AND job_id IN (",
    );
    let mut separated = builder.separated(", ");
    for pk in job_pks {
        separated.push_bind(*pk);
    }
    builder.push(") ORDER BY job_id, order_index");
    builder.build_query_as::<TestResultRow>().fetch_all(db).await
}

/// Drop duplicate (job, test) rows, keeping the highest id. Re-imports with
/// crashed predecessors can leave these behind.
pub async fn remove_duplicate_results(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
    let done = sqlx::query(
        "DELETE FROM test_results WHERE id NOT IN (
            SELECT MAX(id) FROM test_results
            GROUP BY job_id, file_path, class_name, test_name
         )",
    )
    .execute(conn)
    .await?;
    Ok(done.rows_affected())
}

/// Distinct path-derived modules of a release, for module listings and the
/// All-Modules aggregation.
pub async fn distinct_testcase_modules(
    release_name: &str,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<String>> {
    distinct_testcase_modules_for_version(release_name, None, db).await
}

pub async fn distinct_testcase_modules_for_version(
    release_name: &str,
    version: Option<&str>,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<String>> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT DISTINCT test_results.testcase_module
         FROM test_results
         JOIN jobs ON jobs.id = test_results.job_id
         JOIN modules ON modules.id = jobs.module_id
         JOIN releases ON releases.id = modules.release_id
         WHERE test_results.testcase_module IS NOT NULL AND releases.name = ",
    );
    builder.push_bind(release_name);
    if let Some(version) = version {
        builder.push(" AND jobs.version = ").push_bind(version);
    }
    builder.push(" ORDER BY test_results.testcase_module");

    let rows: Vec<(String,)> = builder.build_query_as().fetch_all(db).await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// One run of a test joined with its job, module and release context.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ExecutionRow {
    pub test_name: String,
    pub status: TestStatus,
    pub jenkins_topology: Option<String>,
    pub topology_metadata: Option<String>,
    pub was_rerun: bool,
    pub rerun_still_failed: bool,
    pub setup_ip: Option<String>,
    pub failure_message: Option<String>,
    pub job_id: String,
    pub jenkins_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub version: Option<String>,
    pub module_name: String,
    pub release_name: String,
}

const EXECUTION_SELECT: &str = "SELECT test_results.test_name, test_results.status, test_results.jenkins_topology,
        test_results.topology_metadata, test_results.was_rerun, test_results.rerun_still_failed,
        test_results.setup_ip, test_results.failure_message,
        jobs.job_id, jobs.jenkins_url, jobs.created_at, jobs.version,
        modules.name AS module_name, releases.name AS release_name
     FROM test_results
     JOIN jobs ON jobs.id = test_results.job_id
     JOIN modules ON modules.id = jobs.module_id
     JOIN releases ON releases.id = modules.release_id";

/// Paginated execution history of one exact (possibly parameterized) test
/// name, newest first.
pub async fn history_for_test(
    test_name: &str,
    limit: i64,
    offset: i64,
    db: impl sqlx::Executor<'_, Database = Sqlite> + Copy,
) -> sqlx::Result<(Vec<ExecutionRow>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM test_results WHERE test_name = ?")
        .bind(test_name)
        .fetch_one(db)
        .await?;

    let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
        "{EXECUTION_SELECT}
         WHERE test_results.test_name = ?
         ORDER BY jobs.created_at DESC
         LIMIT ? OFFSET ?"
    ))
    .bind(test_name)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;

    Ok((rows, total))
}

/// Execution history for many tests at once, at most `limit_per_test` most
/// recent runs each. Matches parameterized result names against normalized
/// metadata names. Single query; the search surface calls this once per
/// request rather than once per hit.
pub async fn history_for_normalized_names(
    names: &[String],
    limit_per_test: i64,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<ExecutionRow>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }

    let normalized = crate::normalized_name_expr("test_results.test_name");
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT * FROM (
            SELECT test_results.test_name, test_results.status, test_results.jenkins_topology,
                   test_results.topology_metadata, test_results.was_rerun,
                   test_results.rerun_still_failed, test_results.setup_ip,
                   test_results.failure_message,
                   jobs.job_id, jobs.jenkins_url, jobs.created_at, jobs.version,
                   modules.name AS module_name, releases.name AS release_name,
                   ROW_NUMBER() OVER (
                       PARTITION BY test_results.test_name ORDER BY jobs.created_at DESC
                   ) AS rn
            FROM test_results
            JOIN jobs ON jobs.id = test_results.job_id
            JOIN modules ON modules.id = jobs.module_id
            JOIN releases ON releases.id = modules.release_id
            WHERE {normalized} IN ("
    ));
    let mut separated = builder.separated(", ");
    for name in names {
        separated.push_bind(name.clone());
    }
    builder.push(")) WHERE rn <= ").push_bind(limit_per_test);

    builder.build_query_as::<ExecutionRow>().fetch_all(db).await
}

/// Distinct test names having any execution history, optionally restricted
/// to a set of jobs.
pub async fn names_with_history(
    job_pks: Option<&[i64]>,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<String>> {
    match job_pks {
        None => {
            sqlx::query_scalar("SELECT DISTINCT test_name FROM test_results")
                .fetch_all(db)
                .await
        }
        Some(pks) if pks.is_empty() => Ok(Vec::new()),
        Some(pks) => {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT DISTINCT test_name FROM test_results WHERE job_id IN (",
            );
            let mut separated = builder.separated(", ");
            for pk in pks {
                separated.push_bind(*pk);
            }
            builder.push(")");
            let rows: Vec<(String,)> = builder.build_query_as().fetch_all(db).await?;
            Ok(rows.into_iter().map(|(name,)| name).collect())
        }
    }
}

/// Escape `%`, `_` and `\` for a LIKE pattern with `ESCAPE '\'`.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jobs::{create_job, upsert_module};
    use crate::releases::upsert_release;

    fn new_result(name: &str, status: TestStatus) -> NewTestResult {
        NewTestResult {
            file_path: "data_plane/tests/routing/bgp_test.py".to_string(),
            class_name: "TestBgp".to_string(),
            test_name: name.to_string(),
            status,
            setup_ip: Some("10.0.0.1".to_string()),
            jenkins_topology: Some("5s".to_string()),
            order_index: 0,
            was_rerun: false,
            rerun_still_failed: false,
            failure_message: None,
            priority: None,
            topology_metadata: None,
            testcase_module: Some("routing".to_string()),
        }
    }

    async fn seed_job(pool: &sqlx::SqlitePool, job_id: &str) -> i64 {
        let mut conn = pool.acquire().await.unwrap();
        let release = upsert_release("7.0", None, &mut conn).await.unwrap();
        let module = upsert_module(release.id, "routing", &mut conn).await.unwrap();
        create_job(module.id, job_id, None, None, None, None, &mut conn)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn stats_group_in_one_query() {
        let pool = crate::memory_pool().await;
        let job_pk = seed_job(&pool, "1").await;

        let mut conn = pool.acquire().await.unwrap();
        insert_test_results(
            job_pk,
            &[
                new_result("t1", TestStatus::Passed),
                new_result("t2", TestStatus::Passed),
                new_result("t3", TestStatus::Failed),
                new_result("t4", TestStatus::Skipped),
            ],
            &mut conn,
        )
        .await
        .unwrap();

        let stats = stats_for_jobs(&[job_pk], None, &pool).await.unwrap();
        let s = stats[&job_pk];
        assert_eq!(
            (s.total, s.passed, s.failed, s.skipped),
            (4, 2, 1, 1)
        );
        assert_eq!(s.pass_rate(), 50.0);

        // Module filter restricts the same query.
        let filtered = stats_for_jobs(&[job_pk], Some("other"), &pool).await.unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn duplicate_cleanup_keeps_highest_id() {
        let pool = crate::memory_pool().await;
        let job_pk = seed_job(&pool, "1").await;

        let mut conn = pool.acquire().await.unwrap();
        insert_test_results(job_pk, &[new_result("t1", TestStatus::Failed)], &mut conn)
            .await
            .unwrap();
        insert_test_results(job_pk, &[new_result("t1", TestStatus::Passed)], &mut conn)
            .await
            .unwrap();

        let removed = remove_duplicate_results(&mut conn).await.unwrap();
        assert_eq!(removed, 1);

        let rows = fetch_results_for_jobs(&[job_pk], None, &pool).await.unwrap();
        assert_eq!(rows.len(), 1);
        // The later row survives.
        assert_eq!(rows[0].status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn filtered_fetch_paginates_with_total() {
        let pool = crate::memory_pool().await;
        let job_pk = seed_job(&pool, "1").await;

        let mut conn = pool.acquire().await.unwrap();
        let mut results = Vec::new();
        for i in 0..5 {
            let mut r = new_result(&format!("test_pag_{i}"), TestStatus::Failed);
            r.order_index = i;
            results.push(r);
        }
        results.push(new_result("test_other", TestStatus::Passed));
        insert_test_results(job_pk, &results, &mut conn).await.unwrap();

        let filter = ResultFilter {
            statuses: vec![TestStatus::Failed],
            search: Some("pag".to_string()),
            ..Default::default()
        };
        let (page, total) = fetch_results_filtered(&[job_pk], &filter, 2, 2, &pool)
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].test_name, "test_pag_2");
    }

    #[tokio::test]
    async fn like_escaping() {
        assert_eq!(escape_like("50%_done\\x"), "50\\%\\_done\\\\x");
    }

    #[tokio::test]
    async fn passed_keys_cover_job_set() {
        let pool = crate::memory_pool().await;
        let job_pk = seed_job(&pool, "1").await;

        let mut conn = pool.acquire().await.unwrap();
        insert_test_results(
            job_pk,
            &[
                new_result("t1", TestStatus::Passed),
                new_result("t2", TestStatus::Failed),
            ],
            &mut conn,
        )
        .await
        .unwrap();

        let keys = passed_keys_for_jobs(&[job_pk], None, &pool).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(
            keys[0].1,
            "data_plane/tests/routing/bgp_test.py::TestBgp::t1"
        );
    }
}
