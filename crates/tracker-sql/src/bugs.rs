use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct BugRow {
    pub id: i64,
    pub defect_id: String,
    pub bug_type: String,
    pub url: String,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub component: Option<String>,
    pub resolution: Option<String>,
    pub affected_versions: Option<String>,
    /// JSON array of labels.
    pub labels: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct BugUpsert {
    pub defect_id: String,
    pub bug_type: String,
    pub url: String,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub component: Option<String>,
    pub resolution: Option<String>,
    pub affected_versions: Option<String>,
    pub labels: String,
}

pub async fn upsert_bug(bug: &BugUpsert, conn: &mut SqliteConnection) -> sqlx::Result<()> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO bug_metadata
            (defect_id, bug_type, url, status, summary, priority, assignee, component,
             resolution, affected_versions, labels, is_active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
         ON CONFLICT(defect_id) DO UPDATE SET
            bug_type = excluded.bug_type,
            url = excluded.url,
            status = excluded.status,
            summary = excluded.summary,
            priority = excluded.priority,
            assignee = excluded.assignee,
            component = excluded.component,
            resolution = excluded.resolution,
            affected_versions = excluded.affected_versions,
            labels = excluded.labels,
            is_active = 1,
            updated_at = excluded.updated_at",
    )
    .bind(&bug.defect_id)
    .bind(&bug.bug_type)
    .bind(&bug.url)
    .bind(&bug.status)
    .bind(&bug.summary)
    .bind(&bug.priority)
    .bind(&bug.assignee)
    .bind(&bug.component)
    .bind(&bug.resolution)
    .bind(&bug.affected_versions)
    .bind(&bug.labels)
    .bind(now)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

/// Deactivate every bug absent from the latest feed.
pub async fn deactivate_bugs_except(
    defect_ids: &[String],
    conn: &mut SqliteConnection,
) -> sqlx::Result<u64> {
    if defect_ids.is_empty() {
        let done = sqlx::query("UPDATE bug_metadata SET is_active = 0")
            .execute(conn)
            .await?;
        return Ok(done.rows_affected());
    }

    let mut builder =
        QueryBuilder::<Sqlite>::new("UPDATE bug_metadata SET is_active = 0 WHERE defect_id NOT IN (");
    let mut separated = builder.separated(", ");
    for id in defect_ids {
        separated.push_bind(id.clone());
    }
    builder.push(")");
    let done = builder.build().execute(conn).await?;
    Ok(done.rows_affected())
}

pub async fn bug_pk_by_defect(
    defect_id: &str,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar("SELECT id FROM bug_metadata WHERE defect_id = ?")
        .bind(defect_id)
        .fetch_optional(db)
        .await
}

/// Mappings are rebuilt wholesale on every refresh so reassigned bugs leave
/// no stale rows behind.
pub async fn delete_all_mappings(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
    let done = sqlx::query("DELETE FROM bug_testcase_mappings")
        .execute(conn)
        .await?;
    Ok(done.rows_affected())
}

pub async fn insert_mapping(
    bug_pk: i64,
    case_id: &str,
    conn: &mut SqliteConnection,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO bug_testcase_mappings (bug_id, case_id, created_at)
         VALUES (?, ?, ?)
         ON CONFLICT(bug_id, case_id) DO NOTHING",
    )
    .bind(bug_pk)
    .bind(case_id)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct TopImpactingBug {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub bug: BugRow,
    pub case_count: i64,
}

pub async fn top_impacting(
    limit: i64,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<TopImpactingBug>> {
    sqlx::query_as::<_, TopImpactingBug>(
        "SELECT bug_metadata.*, COUNT(bug_testcase_mappings.id) AS case_count
         FROM bug_metadata
         JOIN bug_testcase_mappings ON bug_metadata.id = bug_testcase_mappings.bug_id
         WHERE bug_metadata.is_active = 1
         GROUP BY bug_metadata.id
         ORDER BY case_count DESC
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(db)
    .await
}

/// One (bug, affected test result) pair within a set of jobs. The bug impact
/// aggregations group these in memory.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BugAffectedRow {
    pub defect_id: String,
    pub bug_type: String,
    pub bug_status: Option<String>,
    pub summary: Option<String>,
    pub url: String,
    pub bug_priority: Option<String>,
    pub testcase_module: Option<String>,
    pub test_name: String,
    pub file_path: String,
    pub test_priority: Option<String>,
    pub result_status: models::TestStatus,
    pub test_case_id: Option<String>,
}

/// Join active bugs onto the test results of a job set, matching metadata by
/// normalized test name and mappings by either `test_case_id` or
/// `testrail_id`. One round trip serves every per-module/per-bug breakdown.
pub async fn affected_rows_for_jobs(
    job_pks: &[i64],
    module_filter: Option<&str>,
    priorities: &[String],
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<BugAffectedRow>> {
    if job_pks.is_empty() {
        return Ok(Vec::new());
    }

    let normalized = crate::normalized_name_expr("test_results.test_name");
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT bug_metadata.defect_id, bug_metadata.bug_type,
                bug_metadata.status AS bug_status, bug_metadata.summary, bug_metadata.url,
                bug_metadata.priority AS bug_priority,
                test_results.testcase_module, test_results.test_name, test_results.file_path,
                test_results.priority AS test_priority, test_results.status AS result_status,
                testcase_metadata.test_case_id
         FROM test_results
         JOIN testcase_metadata ON testcase_metadata.testcase_name = {normalized}
         JOIN bug_testcase_mappings ON bug_testcase_mappings.case_id = testcase_metadata.test_case_id
              OR bug_testcase_mappings.case_id = testcase_metadata.testrail_id
         JOIN bug_metadata ON bug_metadata.id = bug_testcase_mappings.bug_id
         WHERE bug_metadata.is_active = 1 AND test_results.job_id IN ("
    ));
    let mut separated = builder.separated(", ");
    for pk in job_pks {
        separated.push_bind(*pk);
    }
    builder.push(")");

    if let Some(module) = module_filter {
        builder
            .push(" AND test_results.testcase_module = ")
            .push_bind(module);
    }
    if !priorities.is_empty() {
        builder.push(" AND COALESCE(test_results.priority, 'UNKNOWN') IN (");
        let mut separated = builder.separated(", ");
        for priority in priorities {
            separated.push_bind(priority.clone());
        }
        builder.push(")");
    }

    builder.build_query_as::<BugAffectedRow>().fetch_all(db).await
}

#[cfg(test)]
mod test {
    use super::*;

    fn bug(defect_id: &str, bug_type: &str) -> BugUpsert {
        BugUpsert {
            defect_id: defect_id.to_string(),
            bug_type: bug_type.to_string(),
            url: format!("https://bugs.example.com/{defect_id}"),
            labels: "[]".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_reactivates_and_sweep_deactivates() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        upsert_bug(&bug("VLEI-1", "VLEI"), &mut conn).await.unwrap();
        upsert_bug(&bug("VLENG-2", "VLENG"), &mut conn).await.unwrap();

        deactivate_bugs_except(&["VLEI-1".to_string()], &mut conn)
            .await
            .unwrap();

        let active: Vec<String> =
            sqlx::query_scalar("SELECT defect_id FROM bug_metadata WHERE is_active = 1")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(active, vec!["VLEI-1".to_string()]);

        // A later feed containing VLENG-2 flips it back on.
        upsert_bug(&bug("VLENG-2", "VLENG"), &mut conn).await.unwrap();
        let active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM bug_metadata WHERE is_active = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(active, 2);
    }

    #[tokio::test]
    async fn mappings_rebuild_and_dedup() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        upsert_bug(&bug("VLEI-1", "VLEI"), &mut conn).await.unwrap();
        let pk = bug_pk_by_defect("VLEI-1", &pool).await.unwrap().unwrap();

        insert_mapping(pk, "TC-100", &mut conn).await.unwrap();
        insert_mapping(pk, "TC-100", &mut conn).await.unwrap();
        insert_mapping(pk, "TC-200", &mut conn).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bug_testcase_mappings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);

        assert_eq!(delete_all_mappings(&mut conn).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn top_impacting_orders_by_case_count() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        upsert_bug(&bug("VLEI-1", "VLEI"), &mut conn).await.unwrap();
        upsert_bug(&bug("VLENG-2", "VLENG"), &mut conn).await.unwrap();
        let a = bug_pk_by_defect("VLEI-1", &pool).await.unwrap().unwrap();
        let b = bug_pk_by_defect("VLENG-2", &pool).await.unwrap().unwrap();

        insert_mapping(a, "TC-1", &mut conn).await.unwrap();
        insert_mapping(b, "TC-1", &mut conn).await.unwrap();
        insert_mapping(b, "TC-2", &mut conn).await.unwrap();

        let top = top_impacting(10, &pool).await.unwrap();
        assert_eq!(top[0].bug.defect_id, "VLENG-2");
        assert_eq!(top[0].case_count, 2);
    }
}
