use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use models::ALL_MODULES_IDENTIFIER;
use tracker_sql::jobs;
use tracker_sql::test_results::{self, ResultFilter, TestResultRow};

use super::error::ApiError;
use super::pagination::Page;
use super::params::{parse_priorities, parse_statuses, validate_segment};
use super::App;

/// Sub-job primary keys of one parent build, restricted to a module unless
/// the aggregated pseudo-module was requested.
async fn resolve_parent_jobs(
    app: &App,
    release: &str,
    module: &str,
    parent_job_id: &str,
) -> Result<Vec<i64>, ApiError> {
    validate_segment("release", release)?;
    validate_segment("module", module)?;

    let selected = if module == ALL_MODULES_IDENTIFIER {
        jobs::fetch_jobs_by_parent(release, parent_job_id, &app.pool).await?
    } else {
        jobs::fetch_jobs_for_testcase_module(release, module, None, &app.pool)
            .await?
            .into_iter()
            .filter(|j| j.job.parent_key() == parent_job_id)
            .collect()
    };

    if selected.is_empty() {
        return Err(ApiError::not_found(format!(
            "no jobs found for parent_job_id {parent_job_id:?} with tests for module \
             {module:?} in release {release:?}"
        )));
    }
    Ok(selected.into_iter().map(|j| j.job.id).collect())
}

#[derive(serde::Deserialize)]
pub struct JobTestsQuery {
    statuses: Option<String>,
    priorities: Option<String>,
    search: Option<String>,
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn job_tests(
    State(app): State<Arc<App>>,
    Path((release, module, job_id)): Path<(String, String, String)>,
    Query(query): Query<JobTestsQuery>,
) -> Result<Json<Page<TestResultRow>>, ApiError> {
    let job_pks = resolve_parent_jobs(&app, &release, &module, &job_id).await?;

    let filter = ResultFilter {
        statuses: parse_statuses(query.statuses.as_deref())?,
        priorities: parse_priorities(query.priorities.as_deref())?,
        search: query.search.filter(|s| !s.trim().is_empty()),
        testcase_module: (module != ALL_MODULES_IDENTIFIER).then(|| module.clone()),
    };
    let skip = query.skip.max(0);
    let limit = query.limit.clamp(1, 500);

    let (items, total) =
        test_results::fetch_results_filtered(&job_pks, &filter, limit, skip, &app.pool).await?;
    Ok(Json(Page::new(items, total, skip, limit)))
}

pub async fn clustered_failures(
    State(app): State<Arc<App>>,
    Path((release, module, job_id)): Path<(String, String, String)>,
) -> Result<Json<analytics::ClusteredFailures>, ApiError> {
    let job_pks = resolve_parent_jobs(&app, &release, &module, &job_id).await?;
    let clustered = analytics::clustered_failures_for_jobs(&app.pool, &job_pks).await?;
    Ok(Json(clustered))
}
