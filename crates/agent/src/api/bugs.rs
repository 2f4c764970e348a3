use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use tracker_sql::bugs;

use super::auth::require_admin_pin;
use super::error::ApiError;
use super::App;
use crate::bug_updater;

#[derive(serde::Serialize)]
pub struct UpdateResponse {
    success: bool,
    message: String,
    stats: bug_updater::BugUpdateStats,
}

/// Run the bug updater now instead of waiting for the nightly schedule.
pub async fn trigger_update(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
) -> Result<Json<UpdateResponse>, ApiError> {
    require_admin_pin(&app, &headers)?;
    let Some(url) = app.bug_data_url.as_deref() else {
        return Err(ApiError::internal("bug data URL not configured"));
    };

    let stats = bug_updater::run_update(&app.pool, url)
        .await
        .map_err(|err| ApiError::internal(format!("update failed: {err:#}")))?;

    Ok(Json(UpdateResponse {
        success: true,
        message: format!(
            "Updated {} bugs ({} VLEI, {} VLENG) with {} mappings",
            stats.bugs_updated, stats.vlei_count, stats.vleng_count, stats.mappings_created
        ),
        stats,
    }))
}

#[derive(serde::Deserialize)]
pub struct TopImpactingQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

/// Active bugs ordered by how many testcases they map to.
pub async fn top_impacting(
    State(app): State<Arc<App>>,
    Query(query): Query<TopImpactingQuery>,
) -> Result<Json<Vec<bugs::TopImpactingBug>>, ApiError> {
    let limit = query.limit.clamp(1, 100);
    Ok(Json(bugs::top_impacting(limit, &app.pool).await?))
}
