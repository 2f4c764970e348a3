use std::collections::{HashMap, HashSet};

use models::TestStatus;
use sqlx::SqlitePool;
use tracker_sql::bugs::{self, BugAffectedRow};
use tracker_sql::jobs;

async fn parent_job_pks(
    pool: &SqlitePool,
    release: &str,
    parent_job_id: &str,
) -> anyhow::Result<Vec<i64>> {
    Ok(jobs::fetch_jobs_by_parent(release, parent_job_id, pool)
        .await?
        .into_iter()
        .map(|j| j.job.id)
        .collect())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ModuleBugStats {
    pub module_name: String,
    pub vlei_count: i64,
    pub vleng_count: i64,
    pub affected_test_count: i64,
    pub total_bug_count: i64,
}

/// Per-module bug counts for one parent build: distinct VLEI/VLENG defects
/// and distinct tests they touch.
pub async fn bug_breakdown(
    pool: &SqlitePool,
    release: &str,
    parent_job_id: &str,
    module_filter: Option<&str>,
    priorities: &[String],
) -> anyhow::Result<Vec<ModuleBugStats>> {
    let job_pks = parent_job_pks(pool, release, parent_job_id).await?;
    let rows = bugs::affected_rows_for_jobs(&job_pks, module_filter, priorities, pool).await?;

    struct Accumulator {
        vlei: HashSet<String>,
        vleng: HashSet<String>,
        tests: HashSet<String>,
    }
    let mut by_module: HashMap<String, Accumulator> = HashMap::new();

    for row in &rows {
        let module = row
            .testcase_module
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let entry = by_module.entry(module).or_insert_with(|| Accumulator {
            vlei: HashSet::new(),
            vleng: HashSet::new(),
            tests: HashSet::new(),
        });
        match row.bug_type.as_str() {
            "VLEI" => entry.vlei.insert(row.defect_id.clone()),
            _ => entry.vleng.insert(row.defect_id.clone()),
        };
        entry.tests.insert(row.test_name.clone());
    }

    let mut breakdown: Vec<ModuleBugStats> = by_module
        .into_iter()
        .map(|(module_name, acc)| ModuleBugStats {
            module_name,
            vlei_count: acc.vlei.len() as i64,
            vleng_count: acc.vleng.len() as i64,
            affected_test_count: acc.tests.len() as i64,
            total_bug_count: (acc.vlei.len() + acc.vleng.len()) as i64,
        })
        .collect();
    breakdown.sort_by(|a, b| a.module_name.cmp(&b.module_name));
    Ok(breakdown)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BugDetails {
    pub defect_id: String,
    pub bug_type: String,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub url: String,
    pub priority: Option<String>,
    pub affected_test_count: i64,
    pub priority_breakdown: HashMap<String, i64>,
}

/// Bugs affecting one module within a parent build, with per-priority
/// affected-test counts.
pub async fn bug_details(
    pool: &SqlitePool,
    release: &str,
    parent_job_id: &str,
    module: &str,
    bug_type: Option<&str>,
) -> anyhow::Result<Vec<BugDetails>> {
    let job_pks = parent_job_pks(pool, release, parent_job_id).await?;
    let module_filter = (module != models::ALL_MODULES_IDENTIFIER).then_some(module);
    let rows = bugs::affected_rows_for_jobs(&job_pks, module_filter, &[], pool).await?;

    let mut by_defect: HashMap<String, (Vec<&BugAffectedRow>, HashSet<String>)> = HashMap::new();
    for row in &rows {
        if let Some(wanted) = bug_type {
            if row.bug_type != wanted {
                continue;
            }
        }
        let entry = by_defect.entry(row.defect_id.clone()).or_default();
        if entry.1.insert(row.test_name.clone()) {
            entry.0.push(row);
        }
    }

    let mut details: Vec<BugDetails> = by_defect
        .into_iter()
        .map(|(defect_id, (members, tests))| {
            let first = members[0];
            let mut priority_breakdown: HashMap<String, i64> = HashMap::new();
            for row in &members {
                let bucket = row
                    .test_priority
                    .clone()
                    .unwrap_or_else(|| models::UNKNOWN_PRIORITY.to_string());
                *priority_breakdown.entry(bucket).or_insert(0) += 1;
            }
            BugDetails {
                defect_id,
                bug_type: first.bug_type.clone(),
                status: first.bug_status.clone(),
                summary: first.summary.clone(),
                url: first.url.clone(),
                priority: first.bug_priority.clone(),
                affected_test_count: tests.len() as i64,
                priority_breakdown,
            }
        })
        .collect();
    details.sort_by(|a, b| {
        b.affected_test_count
            .cmp(&a.affected_test_count)
            .then_with(|| a.defect_id.cmp(&b.defect_id))
    });
    Ok(details)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AffectedTestcase {
    pub testcase_name: String,
    pub priority: Option<String>,
    pub status: TestStatus,
    pub test_case_id: Option<String>,
    pub file_path: String,
}

/// Tests a specific defect touches within a parent build and module.
pub async fn bug_affected_tests(
    pool: &SqlitePool,
    release: &str,
    parent_job_id: &str,
    module: &str,
    defect_id: &str,
) -> anyhow::Result<Vec<AffectedTestcase>> {
    let job_pks = parent_job_pks(pool, release, parent_job_id).await?;
    let module_filter = (module != models::ALL_MODULES_IDENTIFIER).then_some(module);
    let rows = bugs::affected_rows_for_jobs(&job_pks, module_filter, &[], pool).await?;

    let mut seen = HashSet::new();
    let mut affected: Vec<AffectedTestcase> = rows
        .into_iter()
        .filter(|row| row.defect_id == defect_id)
        .filter(|row| seen.insert(row.test_name.clone()))
        .map(|row| AffectedTestcase {
            testcase_name: row.test_name,
            priority: row.test_priority,
            status: row.result_status,
            test_case_id: row.test_case_id,
            file_path: row.file_path,
        })
        .collect();
    affected.sort_by(|a, b| a.testcase_name.cmp(&b.testcase_name));
    Ok(affected)
}
