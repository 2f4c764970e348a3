use chrono::Utc;
use sqlx::SqlitePool;
use tracker_sql::audit::{self, SyncStats};
use tracker_sql::metadata::{self, MetadataUpsert};

const VALID_PRIORITIES: [&str; 4] = ["P0", "P1", "P2", "P3"];

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MetadataImportStats {
    pub records_imported: i64,
    pub tests_added: i64,
    pub tests_updated: i64,
    pub invalid_priority_count: i64,
    pub test_results_updated: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetadataStatus {
    pub total_metadata_records: i64,
    pub test_results_with_priority: i64,
    pub recent_syncs: Vec<audit::MetadataSyncLog>,
}

/// Import testcase metadata records (the field contract of the upstream CSV
/// exports), then backfill priority and design topology onto existing test
/// results. Records with out-of-range priorities keep a NULL priority.
/// Writes a sync log with per-record change rows.
pub async fn import_metadata(
    pool: &SqlitePool,
    records: Vec<MetadataUpsert>,
    sync_type: &str,
) -> anyhow::Result<MetadataImportStats> {
    let started_at = Utc::now();
    let mut stats = MetadataImportStats::default();
    let mut changes: Vec<(String, &'static str, Option<String>)> = Vec::new();

    let mut txn = pool.begin().await?;
    for mut record in records {
        record.testcase_name = record.testcase_name.trim().to_string();
        if record.testcase_name.is_empty() {
            continue;
        }
        if let Some(priority) = &record.priority {
            if !VALID_PRIORITIES.contains(&priority.trim()) {
                tracing::warn!(
                    testcase = %record.testcase_name,
                    priority = %priority,
                    "invalid priority, storing NULL"
                );
                stats.invalid_priority_count += 1;
                record.priority = None;
            }
        }

        let existing = metadata::fetch_by_name(&record.testcase_name, &mut *txn).await?;
        let change_type = if existing.is_some() { "updated" } else { "added" };
        let old_values = existing
            .map(|row| serde_json::json!({"priority": row.priority, "module": row.module}).to_string());

        metadata::upsert_testcase_metadata(&record, &mut txn).await?;
        stats.records_imported += 1;
        if change_type == "added" {
            stats.tests_added += 1;
        } else {
            stats.tests_updated += 1;
        }
        changes.push((record.testcase_name.clone(), change_type, old_values));
    }

    stats.test_results_updated = metadata::backfill_test_results(&mut txn).await? as i64;

    let sync_log_id = audit::insert_sync_log(
        "success",
        sync_type,
        &SyncStats {
            tests_discovered: stats.records_imported,
            tests_added: stats.tests_added,
            tests_updated: stats.tests_updated,
            tests_removed: 0,
        },
        None,
        started_at,
        &mut txn,
    )
    .await?;
    for (testcase_name, change_type, old_values) in changes {
        audit::insert_metadata_change(
            sync_log_id,
            &testcase_name,
            change_type,
            old_values.as_deref(),
            None,
            &mut txn,
        )
        .await?;
    }
    txn.commit().await?;

    tracing::info!(?stats, "metadata import completed");
    Ok(stats)
}

pub async fn metadata_status(pool: &SqlitePool) -> anyhow::Result<MetadataStatus> {
    Ok(MetadataStatus {
        total_metadata_records: metadata::count_all(pool).await?,
        test_results_with_priority: metadata::count_results_with_priority(pool).await?,
        recent_syncs: audit::recent_sync_logs(10, pool).await?,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(name: &str, priority: Option<&str>) -> MetadataUpsert {
        MetadataUpsert {
            testcase_name: name.to_string(),
            priority: priority.map(String::from),
            automation_status: Some("Hapy Automated".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn import_counts_adds_and_updates() {
        let pool = tracker_sql::memory_pool().await;

        let stats = import_metadata(
            &pool,
            vec![record("test_a", Some("P0")), record("test_b", None)],
            "manual",
        )
        .await
        .unwrap();
        assert_eq!(stats.records_imported, 2);
        assert_eq!(stats.tests_added, 2);

        let stats = import_metadata(&pool, vec![record("test_a", Some("P1"))], "manual")
            .await
            .unwrap();
        assert_eq!(stats.tests_updated, 1);
        assert_eq!(stats.tests_added, 0);

        let status = metadata_status(&pool).await.unwrap();
        assert_eq!(status.total_metadata_records, 2);
        assert_eq!(status.recent_syncs.len(), 2);
    }

    #[tokio::test]
    async fn invalid_priorities_store_null() {
        let pool = tracker_sql::memory_pool().await;

        let stats = import_metadata(&pool, vec![record("test_x", Some("P9"))], "manual")
            .await
            .unwrap();
        assert_eq!(stats.invalid_priority_count, 1);

        let row = metadata::fetch_by_name("test_x", &pool).await.unwrap().unwrap();
        assert!(row.priority.is_none());
    }

    #[tokio::test]
    async fn blank_names_are_dropped() {
        let pool = tracker_sql::memory_pool().await;
        let stats = import_metadata(&pool, vec![record("  ", Some("P0"))], "manual")
            .await
            .unwrap();
        assert_eq!(stats.records_imported, 0);
    }
}
