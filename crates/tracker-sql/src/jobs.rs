use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqliteConnection};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Module {
    pub id: i64,
    pub release_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Job {
    pub id: i64,
    pub module_id: i64,
    pub job_id: String,
    pub parent_job_id: Option<String>,
    pub total: i64,
    pub passed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub pass_rate: f64,
    pub jenkins_url: Option<String>,
    pub version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Grouping key for parent-build aggregation; standalone jobs group
    /// under their own id.
    pub fn parent_key(&self) -> &str {
        self.parent_job_id.as_deref().unwrap_or(&self.job_id)
    }
}

/// A job joined with its module and release names.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct JobWithContext {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub job: Job,
    pub module_name: String,
    pub release_name: String,
}

pub async fn fetch_module(
    release_id: i64,
    name: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
) -> sqlx::Result<Option<Module>> {
    sqlx::query_as::<_, Module>(
        "SELECT id, release_id, name FROM modules WHERE release_id = ? AND name = ?",
    )
    .bind(release_id)
    .bind(name)
    .fetch_optional(db)
    .await
}

pub async fn upsert_module(
    release_id: i64,
    name: &str,
    conn: &mut SqliteConnection,
) -> sqlx::Result<Module> {
    if let Some(module) = fetch_module(release_id, name, &mut *conn).await? {
        return Ok(module);
    }
    let now = Utc::now();
    sqlx::query("INSERT INTO modules (release_id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(release_id)
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    fetch_module(release_id, name, conn)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn fetch_job(
    module_id: i64,
    job_id: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
) -> sqlx::Result<Option<Job>> {
    sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE module_id = ? AND job_id = ?")
        .bind(module_id)
        .bind(job_id)
        .fetch_optional(db)
        .await
}

pub async fn create_job(
    module_id: i64,
    job_id: &str,
    jenkins_url: Option<&str>,
    version: Option<&str>,
    parent_job_id: Option<&str>,
    executed_at: Option<DateTime<Utc>>,
    conn: &mut SqliteConnection,
) -> sqlx::Result<Job> {
    sqlx::query(
        "INSERT INTO jobs
            (module_id, job_id, parent_job_id, jenkins_url, version, created_at, executed_at, downloaded_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(module_id)
    .bind(job_id)
    .bind(parent_job_id)
    .bind(jenkins_url)
    .bind(version)
    .bind(Utc::now())
    .bind(executed_at)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    fetch_job(module_id, job_id, conn)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn update_job_stats(
    id: i64,
    total: i64,
    passed: i64,
    failed: i64,
    skipped: i64,
    pass_rate: f64,
    conn: &mut SqliteConnection,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE jobs SET total = ?, passed = ?, failed = ?, skipped = ?, pass_rate = ?
         WHERE id = ?",
    )
    .bind(total)
    .bind(passed)
    .bind(failed)
    .bind(skipped)
    .bind(pass_rate)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

const JOB_CONTEXT_SELECT: &str = "SELECT jobs.*, modules.name AS module_name, releases.name AS release_name
     FROM jobs
     JOIN modules ON modules.id = jobs.module_id
     JOIN releases ON releases.id = modules.release_id";

/// All jobs of a release, newest job id first.
pub async fn fetch_jobs_for_release(
    release_name: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
) -> sqlx::Result<Vec<JobWithContext>> {
    sqlx::query_as::<_, JobWithContext>(&format!(
        "{JOB_CONTEXT_SELECT} WHERE releases.name = ? ORDER BY CAST(jobs.job_id AS INTEGER) DESC"
    ))
    .bind(release_name)
    .fetch_all(db)
    .await
}

/// Jobs of a release holding at least one result for the given
/// path-derived module. This is the authoritative module grouping.
pub async fn fetch_jobs_for_testcase_module(
    release_name: &str,
    testcase_module: &str,
    version: Option<&str>,
    db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
) -> sqlx::Result<Vec<JobWithContext>> {
    let mut builder = QueryBuilder::<sqlx::Sqlite>::new(JOB_CONTEXT_SELECT);
    builder
        .push(" WHERE releases.name = ")
        .push_bind(release_name)
        .push(
            " AND EXISTS (SELECT 1 FROM test_results
                 WHERE test_results.job_id = jobs.id AND test_results.testcase_module = ",
        )
        .push_bind(testcase_module)
        .push(")");
    if let Some(version) = version {
        builder.push(" AND jobs.version = ").push_bind(version);
    }
    builder.push(" ORDER BY CAST(jobs.job_id AS INTEGER) DESC");

    builder.build_query_as::<JobWithContext>().fetch_all(db).await
}

/// Jobs of a release under one parent build. Jobs without a recorded parent
/// match on their own id.
pub async fn fetch_jobs_by_parent(
    release_name: &str,
    parent_job_id: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
) -> sqlx::Result<Vec<JobWithContext>> {
    sqlx::query_as::<_, JobWithContext>(&format!(
        "{JOB_CONTEXT_SELECT}
         WHERE releases.name = ?
           AND COALESCE(jobs.parent_job_id, jobs.job_id) = ?
         ORDER BY CAST(jobs.job_id AS INTEGER) DESC"
    ))
    .bind(release_name)
    .bind(parent_job_id)
    .fetch_all(db)
    .await
}

/// Primary keys of jobs matching an id either as their own Jenkins id or as
/// their parent build, across all releases.
pub async fn job_pks_for_job_or_parent(
    job_id: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
) -> sqlx::Result<Vec<i64>> {
    sqlx::query_scalar("SELECT id FROM jobs WHERE parent_job_id = ? OR job_id = ?")
        .bind(job_id)
        .bind(job_id)
        .fetch_all(db)
        .await
}

pub async fn fetch_distinct_versions(
    release_name: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar(
        "SELECT DISTINCT jobs.version
         FROM jobs
         JOIN modules ON modules.id = jobs.module_id
         JOIN releases ON releases.id = modules.release_id
         WHERE releases.name = ? AND jobs.version IS NOT NULL
         ORDER BY jobs.version DESC",
    )
    .bind(release_name)
    .fetch_all(db)
    .await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::releases::upsert_release;

    #[tokio::test]
    async fn module_and_job_upserts_are_unique() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let release = upsert_release("7.0", None, &mut conn).await.unwrap();
        let m1 = upsert_module(release.id, "routing", &mut conn).await.unwrap();
        let m2 = upsert_module(release.id, "routing", &mut conn).await.unwrap();
        assert_eq!(m1.id, m2.id);

        let job = create_job(m1.id, "101", None, Some("7.0.0.0"), Some("17"), None, &mut conn)
            .await
            .unwrap();
        assert_eq!(job.parent_key(), "17");
        assert!(fetch_job(m1.id, "101", &mut *conn).await.unwrap().is_some());

        // The (module, job_id) pair is unique.
        assert!(
            create_job(m1.id, "101", None, None, None, None, &mut conn)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn release_delete_cascades_to_jobs() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let release = upsert_release("7.0", None, &mut conn).await.unwrap();
        let module = upsert_module(release.id, "routing", &mut conn).await.unwrap();
        create_job(module.id, "1", None, None, None, None, &mut conn)
            .await
            .unwrap();

        crate::releases::delete_release(release.id, &mut conn)
            .await
            .unwrap();

        let jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(jobs, 0);
    }

    #[tokio::test]
    async fn jobs_sort_numerically_not_lexically() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let release = upsert_release("7.0", None, &mut conn).await.unwrap();
        let module = upsert_module(release.id, "routing", &mut conn).await.unwrap();
        for id in ["9", "10", "101"] {
            create_job(module.id, id, None, None, None, None, &mut conn)
                .await
                .unwrap();
        }

        let jobs = fetch_jobs_for_release("7.0", &mut *conn).await.unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.job.job_id.as_str()).collect();
        assert_eq!(ids, vec!["101", "10", "9"]);
    }
}
