use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use tracker_sql::metadata::MetadataUpsert;
use tracker_sql::{audit, releases, settings};

use super::auth::require_admin_pin;
use super::error::ApiError;
use super::params::validate_segment;
use super::App;
use crate::metadata_sync;

pub async fn all_settings(
    State(app): State<Arc<App>>,
) -> Result<Json<Vec<settings::Setting>>, ApiError> {
    Ok(Json(settings::fetch_settings(&app.pool).await?))
}

pub async fn get_setting(
    State(app): State<Arc<App>>,
    Path(key): Path<String>,
) -> Result<Json<settings::Setting>, ApiError> {
    settings::fetch_setting(&key, &app.pool)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("setting {key:?} not found")))
}

#[derive(serde::Deserialize)]
pub struct SettingUpdate {
    /// JSON-encoded value.
    value: String,
}

/// Update a setting. Changes to the polling keys re-register the scheduler
/// immediately.
pub async fn update_setting(
    State(app): State<Arc<App>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(update): Json<SettingUpdate>,
) -> Result<Json<settings::Setting>, ApiError> {
    require_admin_pin(&app, &headers)?;

    if serde_json::from_str::<serde_json::Value>(&update.value).is_err() {
        return Err(ApiError::bad_request("value must be valid JSON"));
    }
    let mut conn = app.pool.acquire().await?;
    if settings::fetch_setting(&key, &mut *conn).await?.is_none() {
        return Err(ApiError::not_found(format!("setting {key:?} not found")));
    }
    settings::set_setting(&key, &update.value, None, &mut conn).await?;

    if matches!(
        key.as_str(),
        models::keys::AUTO_UPDATE_ENABLED
            | models::keys::POLLING_INTERVAL_HOURS
            | models::keys::POLLING_INTERVAL_MINUTES
    ) {
        let enabled = settings::get_bool(
            models::keys::AUTO_UPDATE_ENABLED,
            models::defaults::AUTO_UPDATE_ENABLED,
            &mut *conn,
        )
        .await?;
        let interval_hours = settings::polling_interval_hours(&mut conn).await?;
        app.scheduler.update_polling_schedule(enabled, interval_hours);
    }

    let setting = settings::fetch_setting(&key, &mut *conn)
        .await?
        .expect("setting just written");
    Ok(Json(setting))
}

#[derive(serde::Serialize)]
pub struct ReleaseOut {
    id: i64,
    name: String,
    jenkins_job_url: Option<String>,
    is_active: bool,
    last_processed_build: i64,
    git_branch: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    module_count: i64,
}

pub async fn list_releases(
    State(app): State<Arc<App>>,
) -> Result<Json<Vec<ReleaseOut>>, ApiError> {
    let rows = releases::fetch_releases(false, &app.pool).await?;
    let mut out = Vec::with_capacity(rows.len());
    for release in rows {
        let module_count = releases::module_count(release.id, &app.pool).await?;
        out.push(ReleaseOut {
            id: release.id,
            name: release.name,
            jenkins_job_url: release.jenkins_job_url,
            is_active: release.is_active,
            last_processed_build: release.last_processed_build,
            git_branch: release.git_branch,
            created_at: release.created_at,
            module_count,
        });
    }
    Ok(Json(out))
}

#[derive(serde::Deserialize)]
pub struct ReleaseCreate {
    name: String,
    jenkins_job_url: Option<String>,
    #[serde(default = "default_true")]
    is_active: bool,
    git_branch: Option<String>,
}

fn default_true() -> bool {
    true
}

pub async fn create_release(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Json(request): Json<ReleaseCreate>,
) -> Result<Json<releases::Release>, ApiError> {
    require_admin_pin(&app, &headers)?;
    validate_segment("release", &request.name)?;

    let mut conn = app.pool.acquire().await?;
    if releases::fetch_release(&request.name, &mut *conn)
        .await?
        .is_some()
    {
        return Err(ApiError::bad_request(format!(
            "release {:?} already exists",
            request.name
        )));
    }
    let release = releases::create_release(
        &request.name,
        request.jenkins_job_url.as_deref(),
        request.is_active,
        request.git_branch.as_deref(),
        &mut conn,
    )
    .await?;
    Ok(Json(release))
}

#[derive(serde::Deserialize)]
pub struct ReleaseUpdate {
    name: Option<String>,
    jenkins_job_url: Option<String>,
    is_active: Option<bool>,
    git_branch: Option<String>,
}

pub async fn update_release(
    State(app): State<Arc<App>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<ReleaseUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin_pin(&app, &headers)?;
    if let Some(name) = &request.name {
        validate_segment("release", name)?;
    }

    let mut conn = app.pool.acquire().await?;
    let updated = releases::update_release(
        id,
        request.name.as_deref(),
        request.jenkins_job_url.as_deref(),
        request.is_active,
        request.git_branch.as_deref(),
        &mut conn,
    )
    .await?;
    if updated == 0 {
        return Err(ApiError::not_found(format!("release {id} not found")));
    }
    Ok(Json(serde_json::json!({ "updated": true })))
}

/// Deleting a release cascades through its modules, jobs and results.
pub async fn delete_release(
    State(app): State<Arc<App>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin_pin(&app, &headers)?;

    let mut conn = app.pool.acquire().await?;
    let deleted = releases::delete_release(id, &mut conn).await?;
    if deleted == 0 {
        return Err(ApiError::not_found(format!("release {id} not found")));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(serde::Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_limit")]
    limit: i64,
}

fn default_log_limit() -> i64 {
    50
}

pub async fn polling_logs(
    State(app): State<Arc<App>>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<audit::PollingLog>>, ApiError> {
    let limit = query.limit.clamp(1, 500);
    Ok(Json(audit::recent_polling_logs(limit, &app.pool).await?))
}

/// Import metadata rows matching the upstream CSV field contract and
/// backfill priorities/topologies onto stored results.
pub async fn import_metadata(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Json(records): Json<Vec<MetadataUpsert>>,
) -> Result<Json<metadata_sync::MetadataImportStats>, ApiError> {
    require_admin_pin(&app, &headers)?;
    if records.is_empty() {
        return Err(ApiError::bad_request("no metadata records provided"));
    }
    let stats = metadata_sync::import_metadata(&app.pool, records, "manual").await?;
    Ok(Json(stats))
}

pub async fn metadata_status(
    State(app): State<Arc<App>>,
) -> Result<Json<metadata_sync::MetadataStatus>, ApiError> {
    Ok(Json(metadata_sync::metadata_status(&app.pool).await?))
}
