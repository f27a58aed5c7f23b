//! Engine statistics endpoint

use axum::{Json, extract::State};

use crate::{api::state::ApiState, engine::EngineStats};

/// GET /api/v1/stats
///
/// Pool, breaker, queue, consumer, broadcast and alert counters
pub async fn get_stats(State(state): State<ApiState>) -> Json<EngineStats> {
    Json(state.engine.stats())
}
