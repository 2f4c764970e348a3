use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use models::ALL_MODULES_IDENTIFIER;
use tracker_sql::{jobs, releases, test_results};

use super::error::ApiError;
use super::params::{parse_priorities, validate_segment};
use super::App;

async fn require_release(app: &App, release: &str) -> Result<releases::Release, ApiError> {
    validate_segment("release", release)?;
    releases::fetch_release(release, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("release {release:?} not found")))
}

#[derive(serde::Deserialize)]
pub struct ReleasesQuery {
    #[serde(default)]
    active_only: bool,
}

#[derive(serde::Serialize)]
pub struct ReleaseOut {
    name: String,
    is_active: bool,
    jenkins_job_url: Option<String>,
    last_processed_build: i64,
    created_at: DateTime<Utc>,
}

pub async fn releases(
    State(app): State<Arc<App>>,
    Query(query): Query<ReleasesQuery>,
) -> Result<Json<Vec<ReleaseOut>>, ApiError> {
    let releases = releases::fetch_releases(query.active_only, &app.pool).await?;
    Ok(Json(
        releases
            .into_iter()
            .map(|r| ReleaseOut {
                name: r.name,
                is_active: r.is_active,
                jenkins_job_url: r.jenkins_job_url,
                last_processed_build: r.last_processed_build,
                created_at: r.created_at,
            })
            .collect(),
    ))
}

#[derive(serde::Deserialize)]
pub struct VersionQuery {
    version: Option<String>,
}

#[derive(serde::Serialize)]
pub struct ModuleOut {
    name: String,
    release: String,
}

/// Modules are path-derived (`testcase_module`), not Jenkins job names; the
/// aggregated pseudo-module leads the list.
pub async fn modules(
    State(app): State<Arc<App>>,
    Path(release): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<Vec<ModuleOut>>, ApiError> {
    require_release(&app, &release).await?;

    let names = test_results::distinct_testcase_modules_for_version(
        &release,
        query.version.as_deref(),
        &app.pool,
    )
    .await?;
    if names.is_empty() {
        return Err(ApiError::not_found(format!(
            "no modules found for release {release:?}"
        )));
    }

    let mut out = vec![ModuleOut {
        name: ALL_MODULES_IDENTIFIER.to_string(),
        release: release.clone(),
    }];
    out.extend(names.into_iter().map(|name| ModuleOut {
        name,
        release: release.clone(),
    }));
    Ok(Json(out))
}

pub async fn versions(
    State(app): State<Arc<App>>,
    Path(release): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    require_release(&app, &release).await?;
    Ok(Json(jobs::fetch_distinct_versions(&release, &app.pool).await?))
}

#[derive(serde::Deserialize)]
pub struct ParentJobsQuery {
    version: Option<String>,
    #[serde(default = "default_parent_limit")]
    limit: usize,
}

fn default_parent_limit() -> usize {
    10
}

pub async fn parent_jobs(
    State(app): State<Arc<App>>,
    Path((release, module)): Path<(String, String)>,
    Query(query): Query<ParentJobsQuery>,
) -> Result<Json<Vec<analytics::ParentJobEntry>>, ApiError> {
    require_release(&app, &release).await?;
    validate_segment("module", &module)?;
    let limit = query.limit.clamp(1, 50);

    let entries =
        analytics::parent_jobs(&app.pool, &release, &module, query.version.as_deref(), limit)
            .await?;
    Ok(Json(entries))
}

#[derive(serde::Deserialize)]
pub struct SummaryQuery {
    version: Option<String>,
    parent_job_id: Option<String>,
    priorities: Option<String>,
    #[serde(default)]
    exclude_flaky: bool,
}

pub async fn summary(
    State(app): State<Arc<App>>,
    Path((release, module)): Path<(String, String)>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<analytics::DashboardSummary>, ApiError> {
    require_release(&app, &release).await?;
    validate_segment("module", &module)?;
    let priorities = parse_priorities(query.priorities.as_deref())?;
    let window = app.flaky_window().await?;

    let summary = if module == ALL_MODULES_IDENTIFIER {
        analytics::all_modules_summary(
            &app.pool,
            &release,
            query.version.as_deref(),
            query.parent_job_id.as_deref(),
            &priorities,
            query.exclude_flaky,
            window,
        )
        .await?
    } else {
        analytics::module_summary(
            &app.pool,
            &release,
            &module,
            query.version.as_deref(),
            query.parent_job_id.as_deref(),
            query.exclude_flaky,
            window,
        )
        .await?
    };

    summary.map(Json).ok_or_else(|| {
        ApiError::not_found(format!(
            "no jobs found with tests for module {module:?} in release {release:?}"
        ))
    })
}

#[derive(serde::Deserialize)]
pub struct PriorityStatsQuery {
    #[serde(default)]
    compare: bool,
    #[serde(default)]
    exclude_flaky: bool,
}

pub async fn priority_stats(
    State(app): State<Arc<App>>,
    Path((release, module, job_id)): Path<(String, String, String)>,
    Query(query): Query<PriorityStatsQuery>,
) -> Result<Json<Vec<analytics::PriorityStat>>, ApiError> {
    require_release(&app, &release).await?;
    validate_segment("module", &module)?;
    let window = app.flaky_window().await?;

    let stats = analytics::priority_stats(
        &app.pool,
        &release,
        &module,
        &job_id,
        query.compare,
        query.exclude_flaky,
        window,
    )
    .await?;

    stats.map(Json).ok_or_else(|| {
        ApiError::not_found(format!(
            "no jobs found for parent_job_id {job_id:?} in release {release:?}"
        ))
    })
}

#[derive(serde::Deserialize)]
pub struct BugBreakdownQuery {
    parent_job_id: Option<String>,
    priorities: Option<String>,
}

pub async fn bug_breakdown(
    State(app): State<Arc<App>>,
    Path((release, module)): Path<(String, String)>,
    Query(query): Query<BugBreakdownQuery>,
) -> Result<Json<Vec<analytics::ModuleBugStats>>, ApiError> {
    require_release(&app, &release).await?;
    validate_segment("module", &module)?;
    let Some(parent_job_id) = query.parent_job_id else {
        return Err(ApiError::bad_request(
            "parent_job_id parameter is required for bug breakdown",
        ));
    };
    let priorities = parse_priorities(query.priorities.as_deref())?;
    let module_filter = (module != ALL_MODULES_IDENTIFIER).then_some(module.as_str());

    let breakdown = analytics::bug_breakdown(
        &app.pool,
        &release,
        &parent_job_id,
        module_filter,
        &priorities,
    )
    .await?;
    Ok(Json(breakdown))
}

#[derive(serde::Deserialize)]
pub struct BugDetailsQuery {
    parent_job_id: String,
    bug_type: Option<String>,
}

pub async fn bug_details(
    State(app): State<Arc<App>>,
    Path((release, module)): Path<(String, String)>,
    Query(query): Query<BugDetailsQuery>,
) -> Result<Json<Vec<analytics::BugDetails>>, ApiError> {
    require_release(&app, &release).await?;
    validate_segment("module", &module)?;
    if let Some(bug_type) = &query.bug_type {
        if bug_type != "VLEI" && bug_type != "VLENG" {
            return Err(ApiError::bad_request("bug_type must be VLEI or VLENG"));
        }
    }

    let details = analytics::bug_details(
        &app.pool,
        &release,
        &query.parent_job_id,
        &module,
        query.bug_type.as_deref(),
    )
    .await?;
    Ok(Json(details))
}

#[derive(serde::Deserialize)]
pub struct AffectedTestsQuery {
    parent_job_id: String,
}

pub async fn bug_affected_tests(
    State(app): State<Arc<App>>,
    Path((release, module, defect_id)): Path<(String, String, String)>,
    Query(query): Query<AffectedTestsQuery>,
) -> Result<Json<Vec<analytics::AffectedTestcase>>, ApiError> {
    require_release(&app, &release).await?;
    validate_segment("module", &module)?;

    let affected = analytics::bug_affected_tests(
        &app.pool,
        &release,
        &query.parent_job_id,
        &module,
        &defect_id,
    )
    .await?;
    Ok(Json(affected))
}
