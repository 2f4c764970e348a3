use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use models::{normalize_test_name, TestStatus, PRIORITY_LEVELS, UNKNOWN_PRIORITY};
use tracker_sql::metadata::{self, MetadataFilter, TestcaseMetadataRow};
use tracker_sql::test_results::{self, ExecutionRow};
use tracker_sql::jobs;

use super::error::ApiError;
use super::App;

const EXECUTION_HISTORY_LIMIT: i64 = 10;

#[derive(serde::Deserialize)]
pub struct AutocompleteQuery {
    q: String,
    #[serde(default = "default_autocomplete_limit")]
    limit: i64,
}

fn default_autocomplete_limit() -> i64 {
    10
}

#[derive(serde::Serialize)]
pub struct Suggestion {
    testcase_name: String,
    test_case_id: String,
    priority: String,
}

pub async fn autocomplete(
    State(app): State<Arc<App>>,
    Query(query): Query<AutocompleteQuery>,
) -> Result<Json<Vec<Suggestion>>, ApiError> {
    let q = query.q.trim();
    if q.len() < 2 || q.len() > 200 {
        return Err(ApiError::bad_request(
            "query must be between 2 and 200 characters",
        ));
    }
    let limit = query.limit.clamp(1, 20);

    let hits = metadata::search(q, limit, &app.pool).await?;
    Ok(Json(
        hits.into_iter()
            .map(|m| Suggestion {
                testcase_name: m.testcase_name,
                test_case_id: m.test_case_id.unwrap_or_default(),
                priority: m.priority.unwrap_or_else(|| UNKNOWN_PRIORITY.to_string()),
            })
            .collect(),
    ))
}

#[derive(serde::Serialize)]
pub struct HistoryOut {
    job_id: String,
    module: String,
    release: String,
    status: TestStatus,
    jenkins_url: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    jenkins_topology: Option<String>,
    topology_metadata: Option<String>,
    was_rerun: bool,
    rerun_still_failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    setup_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_message: Option<String>,
}

impl HistoryOut {
    fn from_row(row: ExecutionRow, detailed: bool) -> HistoryOut {
        HistoryOut {
            job_id: row.job_id,
            module: row.module_name,
            release: row.release_name,
            status: row.status,
            jenkins_url: row.jenkins_url,
            created_at: row.created_at,
            jenkins_topology: row.jenkins_topology,
            topology_metadata: row.topology_metadata,
            was_rerun: row.was_rerun,
            rerun_still_failed: row.rerun_still_failed,
            version: detailed.then_some(row.version).flatten(),
            setup_ip: detailed.then_some(row.setup_ip).flatten(),
            failure_message: detailed.then_some(row.failure_message).flatten(),
        }
    }
}

#[derive(serde::Deserialize)]
pub struct SearchQuery {
    q: String,
    #[serde(default = "default_search_limit")]
    limit: i64,
}

fn default_search_limit() -> i64 {
    50
}

#[derive(serde::Serialize)]
pub struct SearchHit {
    testcase_name: String,
    test_case_id: Option<String>,
    testrail_id: Option<String>,
    priority: Option<String>,
    component: Option<String>,
    automation_status: Option<String>,
    test_class_name: Option<String>,
    test_path: Option<String>,
    test_state: Option<String>,
    execution_history: Vec<HistoryOut>,
    total_executions: usize,
}

/// Global test-case search, with the last ten runs of every hit fetched in
/// one batched query.
pub async fn search_testcases(
    State(app): State<Arc<App>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let q = query.q.trim();
    if q.is_empty() || q.len() > 200 {
        return Err(ApiError::bad_request(
            "query must be between 1 and 200 characters",
        ));
    }
    let limit = query.limit.clamp(1, 100);

    let hits = metadata::search(q, limit, &app.pool).await?;
    if hits.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let names: Vec<String> = hits.iter().map(|m| m.testcase_name.clone()).collect();
    let history =
        test_results::history_for_normalized_names(&names, EXECUTION_HISTORY_LIMIT, &app.pool)
            .await?;

    // Parameterized executions attach to their normalized metadata name.
    let mut history_by_name: HashMap<String, Vec<HistoryOut>> = HashMap::new();
    for row in history {
        let name = normalize_test_name(&row.test_name).to_string();
        history_by_name
            .entry(name)
            .or_default()
            .push(HistoryOut::from_row(row, false));
    }

    Ok(Json(
        hits.into_iter()
            .map(|m| {
                let execution_history = history_by_name
                    .remove(&m.testcase_name)
                    .unwrap_or_default();
                SearchHit {
                    total_executions: execution_history.len(),
                    testcase_name: m.testcase_name,
                    test_case_id: m.test_case_id,
                    testrail_id: m.testrail_id,
                    priority: m.priority,
                    component: m.component,
                    automation_status: m.automation_status,
                    test_class_name: m.test_class_name,
                    test_path: m.test_path,
                    test_state: m.test_state,
                    execution_history,
                }
            })
            .collect(),
    ))
}

#[derive(serde::Deserialize)]
pub struct DetailsQuery {
    #[serde(default = "default_details_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_details_limit() -> i64 {
    100
}

#[derive(serde::Serialize)]
pub struct TestcaseDetails {
    testcase_name: String,
    test_case_id: Option<String>,
    testrail_id: Option<String>,
    priority: String,
    component: Option<String>,
    automation_status: Option<String>,
    test_class_name: Option<String>,
    test_path: Option<String>,
    test_state: Option<String>,
    execution_history: Vec<HistoryOut>,
    statistics: PageStatistics,
    pagination: Pagination,
}

#[derive(serde::Serialize)]
pub struct PageStatistics {
    total_runs: usize,
    passed: usize,
    failed: usize,
    skipped: usize,
    pass_rate: Option<f64>,
}

#[derive(serde::Serialize)]
pub struct Pagination {
    total: i64,
    limit: i64,
    offset: i64,
    has_more: bool,
}

/// Details for one exact (possibly parameterized) test name. Metadata is
/// optional; a test with history but no metadata still reports.
pub async fn testcase_details(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
    Query(query): Query<DetailsQuery>,
) -> Result<Json<TestcaseDetails>, ApiError> {
    let limit = query.limit.clamp(1, 500);
    let offset = query.offset.max(0);

    let normalized = normalize_test_name(&name);
    let meta = metadata::fetch_by_name(normalized, &app.pool).await?;
    let (rows, total) = test_results::history_for_test(&name, limit, offset, &app.pool).await?;

    if meta.is_none() && total == 0 {
        return Err(ApiError::not_found(format!(
            "test case {name:?} not found in metadata or execution history"
        )));
    }

    let execution_history: Vec<HistoryOut> = rows
        .into_iter()
        .map(|row| HistoryOut::from_row(row, true))
        .collect();

    let passed = execution_history
        .iter()
        .filter(|h| h.status == TestStatus::Passed)
        .count();
    let failed = execution_history
        .iter()
        .filter(|h| h.status == TestStatus::Failed)
        .count();
    let skipped = execution_history
        .iter()
        .filter(|h| h.status == TestStatus::Skipped)
        .count();
    let total_runs = execution_history.len();
    let pass_rate = (total_runs > 0)
        .then(|| (passed as f64 / total_runs as f64 * 10_000.0).round() / 100.0);

    Ok(Json(TestcaseDetails {
        testcase_name: meta
            .as_ref()
            .map(|m| m.testcase_name.clone())
            .unwrap_or_else(|| name.clone()),
        test_case_id: meta.as_ref().and_then(|m| m.test_case_id.clone()),
        testrail_id: meta.as_ref().and_then(|m| m.testrail_id.clone()),
        priority: meta
            .as_ref()
            .and_then(|m| m.priority.clone())
            .unwrap_or_else(|| UNKNOWN_PRIORITY.to_string()),
        component: meta.as_ref().and_then(|m| m.component.clone()),
        automation_status: meta.as_ref().and_then(|m| m.automation_status.clone()),
        test_class_name: meta.as_ref().and_then(|m| m.test_class_name.clone()),
        test_path: meta.as_ref().and_then(|m| m.test_path.clone()),
        test_state: meta.as_ref().and_then(|m| m.test_state.clone()),
        execution_history,
        statistics: PageStatistics {
            total_runs,
            passed,
            failed,
            skipped,
            pass_rate,
        },
        pagination: Pagination {
            total,
            limit,
            offset,
            has_more: offset + limit < total,
        },
    }))
}

#[derive(serde::Serialize, Default, Clone, Copy)]
pub struct HistoryBucket {
    total: i64,
    with_history: i64,
    without_history: i64,
}

#[derive(serde::Serialize)]
pub struct StatisticsOut {
    automated: HistoryBucket,
    by_priority: HashMap<String, HistoryBucket>,
}

/// Coverage statistics over automated testcases: which of them have ever
/// executed, overall and per priority.
pub async fn statistics(
    State(app): State<Arc<App>>,
) -> Result<Json<StatisticsOut>, ApiError> {
    let automated = metadata::fetch_automated_names(&app.pool).await?;
    let with_history: HashSet<String> = test_results::names_with_history(None, &app.pool)
        .await?
        .into_iter()
        .map(|name| normalize_test_name(&name).to_string())
        .collect();

    let mut overall = HistoryBucket::default();
    let mut by_priority: HashMap<String, HistoryBucket> = PRIORITY_LEVELS
        .iter()
        .map(|p| (p.to_string(), HistoryBucket::default()))
        .collect();

    for (name, priority) in automated {
        let bucket_name = match priority.as_deref() {
            Some(p) if PRIORITY_LEVELS.contains(&p) => p.to_string(),
            _ => UNKNOWN_PRIORITY.to_string(),
        };
        let executed = with_history.contains(&name);

        overall.total += 1;
        let bucket = by_priority.get_mut(&bucket_name).expect("seeded above");
        bucket.total += 1;
        if executed {
            overall.with_history += 1;
            bucket.with_history += 1;
        } else {
            overall.without_history += 1;
            bucket.without_history += 1;
        }
    }

    Ok(Json(StatisticsOut {
        automated: overall,
        by_priority,
    }))
}

#[derive(serde::Deserialize)]
pub struct FilteredQuery {
    priority: Option<String>,
    has_history: Option<bool>,
    module: Option<String>,
    test_state: Option<String>,
    component: Option<String>,
    topology: Option<String>,
    /// Restrict the history check to one job or parent build.
    job_id: Option<String>,
    #[serde(default = "default_details_limit")]
    limit: i64,
}

pub async fn filtered_testcases(
    State(app): State<Arc<App>>,
    Query(query): Query<FilteredQuery>,
) -> Result<Json<Vec<TestcaseMetadataRow>>, ApiError> {
    if let Some(priority) = &query.priority {
        if !PRIORITY_LEVELS.contains(&priority.as_str()) {
            return Err(ApiError::bad_request(format!(
                "invalid priority {priority:?}"
            )));
        }
    }
    let limit = query.limit.clamp(1, 500);

    let filter = MetadataFilter {
        priority: query.priority.clone(),
        module: query.module.clone(),
        test_states: query
            .test_state
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
        component: query.component.clone(),
        topology: query.topology.clone(),
    };

    let mut rows = metadata::fetch_automated_filtered(&filter, limit, &app.pool).await?;

    if let Some(wants_history) = query.has_history {
        let job_pks = match &query.job_id {
            Some(job_id) => Some(jobs::job_pks_for_job_or_parent(job_id, &app.pool).await?),
            None => None,
        };
        let executed: HashSet<String> =
            test_results::names_with_history(job_pks.as_deref(), &app.pool)
                .await?
                .into_iter()
                .map(|name| normalize_test_name(&name).to_string())
                .collect();
        rows.retain(|m| executed.contains(&m.testcase_name) == wants_history);
    }

    Ok(Json(rows))
}
