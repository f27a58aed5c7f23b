//! On-demand checks

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::debug;

use crate::{
    MonitoringResult,
    api::{
        error::{ApiError, ApiResult},
        state::ApiState,
    },
};

/// POST /api/v1/websites/:id/check
///
/// Runs a check through the website's monitor, so the result is also queued and
/// broadcast like a scheduled one.
pub async fn check_website(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<MonitoringResult>> {
    let Some(monitor) = state.engine.monitor(id) else {
        return Err(ApiError::NotFound(format!("no active website with id {id}")));
    };

    debug!("manual check requested for website {id}");
    let result = monitor.check_now().await?;

    Ok(Json(result))
}
