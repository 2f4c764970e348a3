use std::collections::{HashMap, HashSet};

use sqlx::SqlitePool;
use tracker_sql::bugs::{self, BugUpsert};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BugUpdateStats {
    pub bugs_updated: i64,
    pub vlei_count: i64,
    pub vleng_count: i64,
    pub mappings_created: i64,
}

/// Refresh bug metadata and testcase mappings from the tracker feed:
/// `{"VLEI": [...], "VLENG": [...]}` where each entry carries `defect_id`,
/// `URL`, `labels`, a comma-separated `case_id` list and a `jira_info`
/// object.
///
/// Bugs upsert by defect id; bugs absent from the feed turn inactive; the
/// mapping table is rebuilt wholesale so reassignments leave nothing stale.
pub async fn update_bug_mappings(
    pool: &SqlitePool,
    feed: &serde_json::Value,
) -> anyhow::Result<BugUpdateStats> {
    let mut stats = BugUpdateStats::default();
    let mut mappings: Vec<(String, String)> = Vec::new();
    let mut defect_ids: Vec<String> = Vec::new();

    let mut txn = pool.begin().await?;
    for bug_type in ["VLEI", "VLENG"] {
        let entries = feed
            .get(bug_type)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for entry in entries {
            let Some(defect_id) = entry.get("defect_id").and_then(|v| v.as_str()) else {
                tracing::warn!(bug_type, "bug entry without defect_id, skipping");
                continue;
            };
            let jira = entry.get("jira_info").cloned().unwrap_or_default();
            let field = |key: &str| {
                jira.get(key)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            };

            let upsert = BugUpsert {
                defect_id: defect_id.to_string(),
                bug_type: bug_type.to_string(),
                url: entry
                    .get("URL")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                status: field("status"),
                summary: field("summary"),
                priority: field("priority"),
                assignee: field("assignee"),
                component: field("component"),
                resolution: field("resolution"),
                affected_versions: field("affected_versions"),
                labels: entry
                    .get("labels")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "[]".to_string()),
            };
            bugs::upsert_bug(&upsert, &mut txn).await?;

            stats.bugs_updated += 1;
            if bug_type == "VLEI" {
                stats.vlei_count += 1;
            } else {
                stats.vleng_count += 1;
            }
            defect_ids.push(defect_id.to_string());

            if let Some(case_ids) = entry.get("case_id").and_then(|v| v.as_str()) {
                for case_id in case_ids.split(',').map(str::trim).filter(|c| !c.is_empty()) {
                    mappings.push((defect_id.to_string(), case_id.to_string()));
                }
            }
        }
    }

    bugs::deactivate_bugs_except(&defect_ids, &mut txn).await?;

    // Rebuild mappings: drop everything, dedup, insert.
    bugs::delete_all_mappings(&mut txn).await?;
    let mut pk_by_defect: HashMap<String, i64> = HashMap::new();
    let mut seen: HashSet<(i64, String)> = HashSet::new();
    for (defect_id, case_id) in mappings {
        let pk = match pk_by_defect.get(&defect_id) {
            Some(pk) => *pk,
            None => {
                let Some(pk) = bugs::bug_pk_by_defect(&defect_id, &mut *txn).await? else {
                    continue;
                };
                pk_by_defect.insert(defect_id.clone(), pk);
                pk
            }
        };
        if seen.insert((pk, case_id.clone())) {
            bugs::insert_mapping(pk, &case_id, &mut txn).await?;
            stats.mappings_created += 1;
        }
    }
    txn.commit().await?;

    tracing::info!(?stats, "bug mappings updated");
    Ok(stats)
}

/// Fetch the feed with CI credentials and apply it.
pub async fn run_update(pool: &SqlitePool, bug_data_url: &str) -> anyhow::Result<BugUpdateStats> {
    use jenkins_client::JenkinsApi;

    let creds = jenkins_client::Credentials::from_env()?;
    let client = jenkins_client::Client::new(&creds)?;
    let feed = client.fetch_json(bug_data_url).await?;
    update_bug_mappings(pool, &feed).await
}

#[cfg(test)]
mod test {
    use super::*;

    fn feed() -> serde_json::Value {
        serde_json::json!({
            "VLEI": [
                {
                    "defect_id": "VLEI-100",
                    "URL": "https://bugs.example.com/VLEI-100",
                    "labels": ["dataplane"],
                    "case_id": "TC-1, TC-2, TC-1",
                    "jira_info": {
                        "status": "Open",
                        "summary": "packets drop under load",
                        "priority": "P1",
                        "assignee": "dev1"
                    }
                }
            ],
            "VLENG": [
                {
                    "defect_id": "VLENG-7",
                    "URL": "https://bugs.example.com/VLENG-7",
                    "case_id": "TC-2",
                    "jira_info": {"status": "Resolved", "resolution": "Fixed"}
                }
            ]
        })
    }

    #[tokio::test]
    async fn feed_parses_and_dedups_mappings() {
        let pool = tracker_sql::memory_pool().await;

        let stats = update_bug_mappings(&pool, &feed()).await.unwrap();
        assert_eq!(stats.bugs_updated, 2);
        assert_eq!(stats.vlei_count, 1);
        assert_eq!(stats.vleng_count, 1);
        // TC-1 repeats in the feed but maps once.
        assert_eq!(stats.mappings_created, 3);

        let labels: String = sqlx::query_scalar(
            "SELECT labels FROM bug_metadata WHERE defect_id = 'VLEI-100'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(labels, r#"["dataplane"]"#);
    }

    #[tokio::test]
    async fn refresh_rebuilds_mappings_and_deactivates() {
        let pool = tracker_sql::memory_pool().await;
        update_bug_mappings(&pool, &feed()).await.unwrap();

        // Second feed drops VLENG-7 and reassigns VLEI-100.
        let second = serde_json::json!({
            "VLEI": [{
                "defect_id": "VLEI-100",
                "URL": "https://bugs.example.com/VLEI-100",
                "case_id": "TC-9",
                "jira_info": {"status": "Open"}
            }],
            "VLENG": []
        });
        let stats = update_bug_mappings(&pool, &second).await.unwrap();
        assert_eq!(stats.bugs_updated, 1);
        assert_eq!(stats.mappings_created, 1);

        let active: Vec<String> =
            sqlx::query_scalar("SELECT defect_id FROM bug_metadata WHERE is_active = 1")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(active, vec!["VLEI-100".to_string()]);

        let case_ids: Vec<String> =
            sqlx::query_scalar("SELECT case_id FROM bug_testcase_mappings")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(case_ids, vec!["TC-9".to_string()]);
    }
}
