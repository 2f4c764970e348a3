use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{KeepAlive, Sse};
use axum::Json;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracker_sql::settings;

use super::auth::require_admin_pin;
use super::error::ApiError;
use super::App;
use crate::ingest::{self, DiscoveredMainJob};
use crate::sse::{stream_events, DrainConfig};
use crate::tracker::{JobState, JobStatus};

fn jenkins_client() -> Result<jenkins_client::Client, ApiError> {
    let creds = jenkins_client::Credentials::from_env()
        .map_err(|err| ApiError::internal(err.to_string()))?;
    jenkins_client::Client::new(&creds).map_err(|err| ApiError::internal(err.to_string()))
}

#[derive(serde::Serialize)]
pub struct DiscoverResponse {
    jobs: Vec<DiscoveredMainJob>,
    total: usize,
}

/// Discover parent builds newer than each active release's watermark.
pub async fn discover_jobs(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
) -> Result<Json<DiscoverResponse>, ApiError> {
    require_admin_pin(&app, &headers)?;
    let client = jenkins_client()?;

    let jobs = ingest::discover_jobs(&app.pool, &client).await?;
    Ok(Json(DiscoverResponse {
        total: jobs.len(),
        jobs,
    }))
}

#[derive(serde::Deserialize)]
pub struct DownloadSelectedRequest {
    jobs: Vec<DiscoveredMainJob>,
}

#[derive(serde::Serialize)]
pub struct DownloadStartedResponse {
    job_id: String,
    message: String,
    logs_url: String,
}

/// Kick off a background ingestion over the selected parent builds and hand
/// back the SSE URL for progress.
pub async fn download_selected(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Json(request): Json<DownloadSelectedRequest>,
) -> Result<Json<DownloadStartedResponse>, ApiError> {
    require_admin_pin(&app, &headers)?;
    if request.jobs.is_empty() {
        return Err(ApiError::bad_request("no jobs selected"));
    }
    let client = jenkins_client()?;

    let job_id = uuid::Uuid::new_v4().to_string();
    app.tracker.set_job(JobState::new(
        job_id.clone(),
        "on-demand",
        serde_json::to_value(&request.jobs).unwrap_or_default(),
    ));
    app.tracker.set_status(&job_id, JobStatus::Running, None);

    tokio::spawn(ingest::run_selected_download(
        app.pool.clone(),
        Arc::new(client),
        app.logs_base.clone(),
        app.tracker.clone(),
        job_id.clone(),
        request.jobs.clone(),
    ));

    Ok(Json(DownloadStartedResponse {
        message: format!("Download started for {} builds", request.jobs.len()),
        logs_url: format!("/api/v1/jenkins/download-selected/{job_id}"),
        job_id,
    }))
}

/// Stream a download job's progress. The drain phase keeps the stream alive
/// briefly after completion so log lines pushed by straggling workers still
/// reach the client.
pub async fn stream_download_logs(
    State(app): State<Arc<App>>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, Infallible>>>, ApiError>
{
    if app.tracker.get_job(&job_id).is_none() {
        return Err(ApiError::not_found("job not found"));
    }

    let drain_timeout = settings::get_f64(
        models::keys::SSE_DRAIN_TIMEOUT_SECONDS,
        models::defaults::SSE_DRAIN_TIMEOUT_SECONDS,
        &app.pool,
    )
    .await?;
    let poll_interval = settings::get_f64(
        models::keys::SSE_DRAIN_POLL_INTERVAL,
        models::defaults::SSE_DRAIN_POLL_INTERVAL,
        &app.pool,
    )
    .await?;
    let drain = DrainConfig {
        timeout: Duration::from_secs_f64(drain_timeout.max(0.0)),
        poll_interval: Duration::from_secs_f64(poll_interval.clamp(0.01, 5.0)),
    };

    let events = ReceiverStream::new(stream_events(app.tracker.clone(), job_id, drain))
        .map(|event| Ok(event.into_sse()));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub async fn download_status(
    State(app): State<Arc<App>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobState>, ApiError> {
    app.tracker
        .get_job(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("job not found"))
}

#[derive(serde::Serialize)]
pub struct PollingStatusResponse {
    enabled: bool,
    interval_hours: f64,
    scheduler: crate::scheduler::SchedulerStatus,
}

pub async fn polling_status(
    State(app): State<Arc<App>>,
) -> Result<Json<PollingStatusResponse>, ApiError> {
    let mut conn = app.pool.acquire().await?;
    let enabled = settings::get_bool(
        models::keys::AUTO_UPDATE_ENABLED,
        models::defaults::AUTO_UPDATE_ENABLED,
        &mut *conn,
    )
    .await?;
    let interval_hours = settings::polling_interval_hours(&mut conn).await?;

    Ok(Json(PollingStatusResponse {
        enabled,
        interval_hours,
        scheduler: app.scheduler.status(),
    }))
}

#[derive(serde::Deserialize)]
pub struct PollingToggleRequest {
    enabled: bool,
}

/// Flip automatic polling and re-register the scheduler job accordingly.
pub async fn polling_toggle(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Json(request): Json<PollingToggleRequest>,
) -> Result<Json<PollingStatusResponse>, ApiError> {
    require_admin_pin(&app, &headers)?;

    let mut conn = app.pool.acquire().await?;
    settings::set_setting(
        models::keys::AUTO_UPDATE_ENABLED,
        &request.enabled.to_string(),
        Some("Enable automatic Jenkins polling"),
        &mut conn,
    )
    .await?;
    let interval_hours = settings::polling_interval_hours(&mut conn).await?;
    drop(conn);

    app.scheduler
        .update_polling_schedule(request.enabled, interval_hours);

    Ok(Json(PollingStatusResponse {
        enabled: request.enabled,
        interval_hours,
        scheduler: app.scheduler.status(),
    }))
}
