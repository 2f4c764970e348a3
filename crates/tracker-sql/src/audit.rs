use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection};

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct PollingLog {
    pub id: i64,
    pub release_id: Option<i64>,
    pub status: Option<String>,
    pub modules_downloaded: i64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub async fn insert_polling_log(
    release_id: Option<i64>,
    status: &str,
    modules_downloaded: i64,
    error_message: Option<&str>,
    started_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO jenkins_polling_logs
            (release_id, status, modules_downloaded, error_message, started_at, completed_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(release_id)
    .bind(status)
    .bind(modules_downloaded)
    .bind(error_message)
    .bind(started_at)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn recent_polling_logs(
    limit: i64,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<PollingLog>> {
    sqlx::query_as::<_, PollingLog>(
        "SELECT id, release_id, status, modules_downloaded, error_message, started_at, completed_at
         FROM jenkins_polling_logs ORDER BY started_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(db)
    .await
}

#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub tests_discovered: i64,
    pub tests_added: i64,
    pub tests_updated: i64,
    pub tests_removed: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct MetadataSyncLog {
    pub id: i64,
    pub status: String,
    pub sync_type: Option<String>,
    pub tests_discovered: i64,
    pub tests_added: i64,
    pub tests_updated: i64,
    pub tests_removed: i64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub async fn insert_sync_log(
    status: &str,
    sync_type: &str,
    stats: &SyncStats,
    error_message: Option<&str>,
    started_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> sqlx::Result<i64> {
    let done = sqlx::query(
        "INSERT INTO metadata_sync_logs
            (status, sync_type, tests_discovered, tests_added, tests_updated, tests_removed,
             error_message, started_at, completed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(status)
    .bind(sync_type)
    .bind(stats.tests_discovered)
    .bind(stats.tests_added)
    .bind(stats.tests_updated)
    .bind(stats.tests_removed)
    .bind(error_message)
    .bind(started_at)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(done.last_insert_rowid())
}

/// Audit one metadata record's change under a sync log entry.
pub async fn insert_metadata_change(
    sync_log_id: i64,
    testcase_name: &str,
    change_type: &str,
    old_values: Option<&str>,
    new_values: Option<&str>,
    conn: &mut SqliteConnection,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO testcase_metadata_changes
            (sync_log_id, testcase_name, change_type, old_values, new_values, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(sync_log_id)
    .bind(testcase_name)
    .bind(change_type)
    .bind(old_values)
    .bind(new_values)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn recent_sync_logs(
    limit: i64,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<MetadataSyncLog>> {
    sqlx::query_as::<_, MetadataSyncLog>(
        "SELECT id, status, sync_type, tests_discovered, tests_added, tests_updated,
                tests_removed, error_message, started_at, completed_at
         FROM metadata_sync_logs ORDER BY started_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(db)
    .await
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn polling_logs_round_trip() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        insert_polling_log(None, "failed", 0, Some("credentials missing"), Utc::now(), &mut conn)
            .await
            .unwrap();
        insert_polling_log(None, "success", 12, None, Utc::now(), &mut conn)
            .await
            .unwrap();

        let logs = recent_polling_logs(10, &pool).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status.as_deref(), Some("success"));
        assert_eq!(logs[0].modules_downloaded, 12);
    }

    #[tokio::test]
    async fn sync_log_with_changes() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let stats = SyncStats {
            tests_discovered: 3,
            tests_added: 1,
            tests_updated: 2,
            tests_removed: 0,
        };
        let log_id = insert_sync_log("success", "manual", &stats, None, Utc::now(), &mut conn)
            .await
            .unwrap();
        insert_metadata_change(log_id, "test_a", "added", None, Some("{}"), &mut conn)
            .await
            .unwrap();

        let logs = recent_sync_logs(5, &pool).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].tests_updated, 2);
    }
}
