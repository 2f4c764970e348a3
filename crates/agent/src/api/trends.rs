use std::collections::HashSet;
use std::sync::Arc;

use analytics::{TestTrend, TrendFilter};
use axum::extract::{Path, Query, State};
use axum::Json;
use models::TestStatus;
use tracker_sql::releases;

use super::error::ApiError;
use super::params::{parse_priorities, validate_segment};
use super::App;

#[derive(serde::Deserialize)]
pub struct TrendsQuery {
    #[serde(default)]
    flaky_only: bool,
    #[serde(default)]
    regression_only: bool,
    #[serde(default)]
    always_failing_only: bool,
    #[serde(default)]
    new_failures_only: bool,
    #[serde(default)]
    failed_only: bool,
    priorities: Option<String>,
    /// Restrict to the most recent N parent builds.
    job_limit: Option<usize>,
    /// Group by the Jenkins job module instead of the path-derived module.
    #[serde(default)]
    use_jenkins_module: bool,
}

#[derive(serde::Serialize)]
pub struct TrendOut {
    #[serde(flatten)]
    trend: TestTrend,
    latest_status: Option<TestStatus>,
    is_flaky: bool,
    is_regression: bool,
    is_always_passing: bool,
    is_always_failing: bool,
    is_new_failure: bool,
}

#[derive(serde::Serialize)]
pub struct TrendsResponse {
    release: String,
    module: String,
    total_tests: usize,
    /// Union of job ids across the returned trends, ascending.
    job_ids: Vec<String>,
    trends: Vec<TrendOut>,
}

pub async fn trends(
    State(app): State<Arc<App>>,
    Path((release, module)): Path<(String, String)>,
    Query(query): Query<TrendsQuery>,
) -> Result<Json<TrendsResponse>, ApiError> {
    validate_segment("release", &release)?;
    validate_segment("module", &module)?;
    releases::fetch_release(&release, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("release {release:?} not found")))?;

    let filter = TrendFilter {
        flaky_only: query.flaky_only,
        regression_only: query.regression_only,
        always_failing_only: query.always_failing_only,
        new_failures_only: query.new_failures_only,
        failed_only: query.failed_only,
        priorities: parse_priorities(query.priorities.as_deref())?,
    };

    let computed = analytics::calculate_test_trends(
        &app.pool,
        &release,
        &module,
        !query.use_jenkins_module,
        query.job_limit,
    )
    .await?;
    let filtered = analytics::filter_trends(computed, &filter);

    let mut job_ids: Vec<String> = filtered
        .iter()
        .flat_map(|t| t.results_by_job.keys().cloned())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    job_ids.sort_by_key(|id| id.parse::<i64>().unwrap_or(0));

    let mut trends: Vec<TrendOut> = filtered
        .into_iter()
        .map(|trend| TrendOut {
            latest_status: trend.latest_status(),
            is_flaky: trend.is_flaky(),
            is_regression: trend.is_regression(),
            is_always_passing: trend.is_always_passing(),
            is_always_failing: trend.is_always_failing(),
            is_new_failure: trend.is_new_failure(&trend.sorted_job_ids()),
            trend,
        })
        .collect();
    trends.sort_by(|a, b| {
        (&a.trend.file_path, &a.trend.class_name, &a.trend.test_name).cmp(&(
            &b.trend.file_path,
            &b.trend.class_name,
            &b.trend.test_name,
        ))
    });

    Ok(Json(TrendsResponse {
        release,
        module,
        total_tests: trends.len(),
        job_ids,
        trends,
    }))
}
