use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::normalized_name_expr;
use crate::test_results::escape_like;

pub const AUTOMATED_STATUSES: [&str; 2] = ["Hapy Automated", "Automated"];

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct TestcaseMetadataRow {
    pub id: i64,
    pub testcase_name: String,
    pub test_case_id: Option<String>,
    pub priority: Option<String>,
    pub testrail_id: Option<String>,
    pub component: Option<String>,
    pub automation_status: Option<String>,
    pub module: Option<String>,
    pub test_state: Option<String>,
    pub test_class_name: Option<String>,
    pub test_path: Option<String>,
    pub topology: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One metadata record as produced by the metadata source. Field contract of
/// the upstream CSV exports.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct MetadataUpsert {
    pub testcase_name: String,
    #[serde(default)]
    pub test_case_id: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub testrail_id: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub automation_status: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub test_state: Option<String>,
    #[serde(default)]
    pub test_class_name: Option<String>,
    #[serde(default)]
    pub test_path: Option<String>,
    #[serde(default)]
    pub topology: Option<String>,
}

pub async fn upsert_testcase_metadata(
    record: &MetadataUpsert,
    conn: &mut SqliteConnection,
) -> sqlx::Result<()> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO testcase_metadata
            (testcase_name, test_case_id, priority, testrail_id, component, automation_status,
             module, test_state, test_class_name, test_path, topology, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(testcase_name) DO UPDATE SET
            test_case_id = excluded.test_case_id,
            priority = excluded.priority,
            testrail_id = excluded.testrail_id,
            component = excluded.component,
            automation_status = excluded.automation_status,
            module = excluded.module,
            test_state = excluded.test_state,
            test_class_name = excluded.test_class_name,
            test_path = excluded.test_path,
            topology = excluded.topology,
            updated_at = excluded.updated_at",
    )
    .bind(&record.testcase_name)
    .bind(&record.test_case_id)
    .bind(&record.priority)
    .bind(&record.testrail_id)
    .bind(&record.component)
    .bind(&record.automation_status)
    .bind(&record.module)
    .bind(&record.test_state)
    .bind(&record.test_class_name)
    .bind(&record.test_path)
    .bind(&record.topology)
    .bind(now)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_by_name(
    testcase_name: &str,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Option<TestcaseMetadataRow>> {
    sqlx::query_as::<_, TestcaseMetadataRow>(
        "SELECT * FROM testcase_metadata WHERE testcase_name = ?",
    )
    .bind(testcase_name)
    .fetch_optional(db)
    .await
}

/// Batched lookup by (already normalized) test names.
pub async fn fetch_by_names(
    names: &[String],
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<TestcaseMetadataRow>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT * FROM testcase_metadata WHERE testcase_name IN (",
    );
    let mut separated = builder.separated(", ");
    for name in names {
        separated.push_bind(name.clone());
    }
    builder.push(")");
    builder
        .build_query_as::<TestcaseMetadataRow>()
        .fetch_all(db)
        .await
}

/// Case-insensitive search across ids and names.
pub async fn search(
    query: &str,
    limit: i64,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<TestcaseMetadataRow>> {
    let pattern = format!("%{}%", escape_like(query.trim()));
    sqlx::query_as::<_, TestcaseMetadataRow>(
        "SELECT * FROM testcase_metadata
         WHERE test_case_id LIKE ? ESCAPE '\\'
            OR testrail_id LIKE ? ESCAPE '\\'
            OR testcase_name LIKE ? ESCAPE '\\'
         LIMIT ?",
    )
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .bind(limit)
    .fetch_all(db)
    .await
}

#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    /// `UNKNOWN` matches NULL or out-of-range priorities.
    pub priority: Option<String>,
    pub module: Option<String>,
    pub test_states: Vec<String>,
    pub component: Option<String>,
    pub topology: Option<String>,
}

/// Automated testcases matching the filter.
pub async fn fetch_automated_filtered(
    filter: &MetadataFilter,
    limit: i64,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<TestcaseMetadataRow>> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT * FROM testcase_metadata WHERE automation_status IN (",
    );
    let mut separated = builder.separated(", ");
    for status in AUTOMATED_STATUSES {
        separated.push_bind(status);
    }
    builder.push(")");

    if let Some(priority) = &filter.priority {
        if priority == models::UNKNOWN_PRIORITY {
            builder.push(" AND (priority IS NULL OR priority NOT IN ('P0', 'P1', 'P2', 'P3'))");
        } else {
            builder.push(" AND priority = ").push_bind(priority.clone());
        }
    }
    if let Some(module) = &filter.module {
        builder.push(" AND module = ").push_bind(module.clone());
    }
    if !filter.test_states.is_empty() {
        builder.push(" AND test_state IN (");
        let mut separated = builder.separated(", ");
        for state in &filter.test_states {
            separated.push_bind(state.clone());
        }
        builder.push(")");
    }
    if let Some(component) = &filter.component {
        builder.push(" AND component = ").push_bind(component.clone());
    }
    if let Some(topology) = &filter.topology {
        builder.push(" AND topology = ").push_bind(topology.clone());
    }
    builder.push(" LIMIT ").push_bind(limit);

    builder
        .build_query_as::<TestcaseMetadataRow>()
        .fetch_all(db)
        .await
}

/// All automated testcases (name, priority) for statistics.
pub async fn fetch_automated_names(
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<(String, Option<String>)>> {
    sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT testcase_name, priority FROM testcase_metadata
         WHERE automation_status IN ('Hapy Automated', 'Automated')",
    )
    .fetch_all(db)
    .await
}

/// Copy metadata priority and topology onto existing test results, matching
/// parameterized names via the SQL normalizer. Returns updated row count.
pub async fn backfill_test_results(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
    let normalized = normalized_name_expr("test_results.test_name");
    let done = sqlx::query(&format!(
        "UPDATE test_results SET
            priority = (SELECT priority FROM testcase_metadata
                        WHERE testcase_metadata.testcase_name = {normalized}),
            topology_metadata = (SELECT topology FROM testcase_metadata
                                 WHERE testcase_metadata.testcase_name = {normalized})
         WHERE EXISTS (SELECT 1 FROM testcase_metadata
                       WHERE testcase_metadata.testcase_name = {normalized})"
    ))
    .execute(conn)
    .await?;
    Ok(done.rows_affected())
}

pub async fn count_all(db: impl sqlx::Executor<'_, Database = Sqlite>) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM testcase_metadata")
        .fetch_one(db)
        .await
}

pub async fn count_results_with_priority(
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM test_results WHERE priority IS NOT NULL")
        .fetch_one(db)
        .await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jobs::{create_job, upsert_module};
    use crate::releases::upsert_release;
    use crate::test_results::{fetch_results_for_jobs, insert_test_results, NewTestResult};
    use models::TestStatus;

    fn record(name: &str, priority: Option<&str>, topology: Option<&str>) -> MetadataUpsert {
        MetadataUpsert {
            testcase_name: name.to_string(),
            priority: priority.map(String::from),
            topology: topology.map(String::from),
            automation_status: Some("Hapy Automated".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_replaces_fields() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        upsert_testcase_metadata(&record("test_a", Some("P1"), None), &mut conn)
            .await
            .unwrap();
        upsert_testcase_metadata(&record("test_a", Some("P0"), Some("5-site")), &mut conn)
            .await
            .unwrap();

        let row = fetch_by_name("test_a", &pool).await.unwrap().unwrap();
        assert_eq!(row.priority.as_deref(), Some("P0"));
        assert_eq!(row.topology.as_deref(), Some("5-site"));
        assert_eq!(count_all(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn backfill_matches_parameterized_names() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let release = upsert_release("7.0", None, &mut conn).await.unwrap();
        let module = upsert_module(release.id, "routing", &mut conn).await.unwrap();
        let job = create_job(module.id, "1", None, None, None, None, &mut conn)
            .await
            .unwrap();

        insert_test_results(
            job.id,
            &[NewTestResult {
                file_path: "a.py".to_string(),
                class_name: "C".to_string(),
                test_name: "test_steering[Hub]".to_string(),
                status: TestStatus::Failed,
                setup_ip: None,
                jenkins_topology: None,
                order_index: 0,
                was_rerun: false,
                rerun_still_failed: false,
                failure_message: None,
                priority: None,
                topology_metadata: None,
                testcase_module: None,
            }],
            &mut conn,
        )
        .await
        .unwrap();

        upsert_testcase_metadata(&record("test_steering", Some("P2"), Some("5-site")), &mut conn)
            .await
            .unwrap();
        let updated = backfill_test_results(&mut conn).await.unwrap();
        assert_eq!(updated, 1);

        let rows = fetch_results_for_jobs(&[job.id], None, &pool).await.unwrap();
        assert_eq!(rows[0].priority.as_deref(), Some("P2"));
        assert_eq!(rows[0].topology_metadata.as_deref(), Some("5-site"));
    }

    #[tokio::test]
    async fn search_escapes_like_wildcards() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        upsert_testcase_metadata(&record("test_underscore", None, None), &mut conn)
            .await
            .unwrap();
        upsert_testcase_metadata(&record("testXunderscore", None, None), &mut conn)
            .await
            .unwrap();

        // `_` must be literal, not a single-char wildcard.
        let hits = search("test_under", 10, &pool).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].testcase_name, "test_underscore");
    }

    #[tokio::test]
    async fn filtered_listing_honors_unknown_priority() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        upsert_testcase_metadata(&record("test_a", Some("P0"), None), &mut conn)
            .await
            .unwrap();
        upsert_testcase_metadata(&record("test_b", None, None), &mut conn)
            .await
            .unwrap();

        let filter = MetadataFilter {
            priority: Some("UNKNOWN".to_string()),
            ..Default::default()
        };
        let rows = fetch_automated_filtered(&filter, 100, &pool).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].testcase_name, "test_b");
    }
}
