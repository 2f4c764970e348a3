use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use sqlx::SqlitePool;

mod admin;
mod auth;
mod bugs;
mod dashboard;
mod error;
mod jenkins;
mod jobs;
mod pagination;
mod params;
mod search;
mod trends;

pub use auth::hash_pin;
pub use error::ApiError;

use crate::scheduler::Scheduler;
use crate::tracker::JobTracker;

/// Shared state behind every handler.
pub struct App {
    pub pool: SqlitePool,
    pub tracker: JobTracker,
    pub scheduler: Scheduler,
    pub logs_base: PathBuf,
    /// SHA-256 hex digest of the admin PIN; admin routes 500 when unset.
    pub admin_pin_hash: Option<String>,
    pub bug_data_url: Option<String>,
}

impl App {
    /// The flaky-analysis parent window, runtime tunable.
    pub async fn flaky_window(&self) -> Result<usize, ApiError> {
        let window = tracker_sql::settings::get_i64(
            models::keys::FLAKY_DETECTION_JOB_WINDOW,
            models::defaults::FLAKY_DETECTION_JOB_WINDOW,
            &self.pool,
        )
        .await?;
        Ok(window.max(1) as usize)
    }
}

fn api_v1_router() -> axum::Router<Arc<App>> {
    axum::Router::new()
        // Dashboard.
        .route("/dashboard/releases", get(dashboard::releases))
        .route("/dashboard/modules/:release", get(dashboard::modules))
        .route("/dashboard/versions/:release", get(dashboard::versions))
        .route(
            "/dashboard/parent-jobs/:release/:module",
            get(dashboard::parent_jobs),
        )
        .route(
            "/dashboard/summary/:release/:module",
            get(dashboard::summary),
        )
        .route(
            "/dashboard/priority-stats/:release/:module/:job_id",
            get(dashboard::priority_stats),
        )
        .route(
            "/dashboard/bug-breakdown/:release/:module",
            get(dashboard::bug_breakdown),
        )
        .route(
            "/dashboard/bug-details/:release/:module",
            get(dashboard::bug_details),
        )
        .route(
            "/dashboard/bug-affected-tests/:release/:module/:defect_id",
            get(dashboard::bug_affected_tests),
        )
        // Trends.
        .route("/trends/:release/:module", get(trends::trends))
        // Jobs.
        .route("/jobs/:release/:module/:job_id/tests", get(jobs::job_tests))
        .route(
            "/jobs/:release/:module/:job_id/failures/clustered",
            get(jobs::clustered_failures),
        )
        // Search.
        .route("/search/autocomplete", get(search::autocomplete))
        .route("/search/testcases", get(search::search_testcases))
        .route("/search/testcases/:name", get(search::testcase_details))
        .route("/search/statistics", get(search::statistics))
        .route("/search/filtered-testcases", get(search::filtered_testcases))
        // Jenkins control.
        .route("/jenkins/discover-jobs", post(jenkins::discover_jobs))
        .route("/jenkins/download-selected", post(jenkins::download_selected))
        .route(
            "/jenkins/download-selected/:job_id",
            get(jenkins::stream_download_logs),
        )
        .route(
            "/jenkins/download-selected/:job_id/status",
            get(jenkins::download_status),
        )
        .route("/jenkins/polling/status", get(jenkins::polling_status))
        .route("/jenkins/polling/toggle", post(jenkins::polling_toggle))
        // Admin.
        .route("/admin/settings", get(admin::all_settings))
        .route(
            "/admin/settings/:key",
            get(admin::get_setting).put(admin::update_setting),
        )
        .route(
            "/admin/releases",
            get(admin::list_releases).post(admin::create_release),
        )
        .route(
            "/admin/releases/:id",
            put(admin::update_release).delete(admin::delete_release),
        )
        .route("/admin/polling-logs", get(admin::polling_logs))
        .route("/admin/metadata/import", post(admin::import_metadata))
        .route("/admin/metadata/status", get(admin::metadata_status))
        // Bugs.
        .route("/bugs/update", post(bugs::trigger_update))
        .route("/bugs/top-impacting", get(bugs::top_impacting))
}

/// Build the service router: `/api/v1` plus health probes, wrapped in
/// request tracing and CORS.
pub fn build_router(app: Arc<App>, allow_origin: &[String]) -> anyhow::Result<axum::Router> {
    let allow_origin = allow_origin
        .iter()
        .map(|o| o.parse())
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse allowed origins")?;

    let allow_headers = ["Content-Type", "Authorization", "X-Admin-PIN"]
        .into_iter()
        .map(|h| h.parse().unwrap())
        .collect::<Vec<_>>();

    let cors = tower_http::cors::CorsLayer::new()
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_origin(tower_http::cors::AllowOrigin::list(allow_origin))
        .allow_headers(allow_headers);

    let router = axum::Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .nest("/api/v1", api_v1_router())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app);

    Ok(router)
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ready(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> axum::response::Response {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&app.pool).await {
        Ok(_) => axum::Json(serde_json::json!({ "status": "ready" })).into_response(),
        Err(err) => {
            tracing::error!(%err, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(serde_json::json!({
                    "status": "not ready",
                    "reason": "database unavailable",
                })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// An App over an in-memory database, for router tests.
    pub async fn test_app(admin_pin: Option<&str>) -> Arc<App> {
        let pool = tracker_sql::memory_pool().await;
        let scheduler = Scheduler::new(pool.clone(), PathBuf::from("/tmp/logs"), None);
        Arc::new(App {
            pool,
            tracker: JobTracker::new(),
            scheduler,
            logs_base: PathBuf::from("/tmp/logs"),
            admin_pin_hash: admin_pin.map(hash_pin),
            bug_data_url: None,
        })
    }

    pub fn test_router(app: Arc<App>) -> axum::Router {
        build_router(app, &[]).unwrap()
    }
}
