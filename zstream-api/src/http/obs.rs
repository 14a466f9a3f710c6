//! OBS status and maintenance endpoints

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::http::{AppError, AppResult, AppState};

pub fn create_obs_router() -> Router<AppState> {
    Router::new()
        .route("/api/obs/status", get(status))
        .route("/api/obs/diagnose", get(diagnose_collections))
        .route("/api/obs/diagnose-scenes", get(diagnose_scenes))
        .route("/api/obs/fix-media-bounds", post(fix_media_bounds))
        .route("/api/obs/reconnect", post(reconnect))
}

#[derive(Debug, Deserialize)]
pub struct StreamerQuery {
    pub streamer: Option<String>,
}

impl StreamerQuery {
    fn require(self) -> AppResult<String> {
        self.streamer
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::bad_request("Missing streamer parameter"))
    }
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let status = state.reconciler.status().await;
    Json(json!({ "success": true, "status": status }))
}

pub async fn diagnose_collections(State(state): State<AppState>) -> AppResult<Json<Value>> {
    info!("OBS collection diagnosis requested");
    let diagnosis = state.reconciler.diagnose_collections().await?;
    Ok(Json(json!({ "success": true, "diagnosis": diagnosis })))
}

pub async fn diagnose_scenes(
    State(state): State<AppState>,
    Query(query): Query<StreamerQuery>,
) -> AppResult<Json<Value>> {
    let streamer = query.require()?;
    let diagnosis = state.reconciler.diagnose_scenes(&streamer).await?;
    Ok(Json(json!({ "success": true, "diagnosis": diagnosis })))
}

pub async fn fix_media_bounds(
    State(state): State<AppState>,
    Query(query): Query<StreamerQuery>,
) -> AppResult<Json<Value>> {
    let streamer = query.require()?;
    if !state.reconciler.fix_media_bounds(&streamer).await {
        return Err(AppError::internal(format!("Failed to fix media bounds for {streamer}")));
    }
    Ok(Json(json!({
        "success": true,
        "message": format!("Media bounds fixed for {streamer}"),
    })))
}

/// Resume connection attempts after the supervisor gave up
pub async fn reconnect(State(state): State<AppState>) -> AppResult<Json<Value>> {
    if !state.supervisor().reconnect() {
        return Err(AppError::bad_request("OBS integration is disabled"));
    }
    Ok(Json(json!({
        "success": true,
        "message": "OBS reconnect requested",
        "status": state.supervisor().status(),
    })))
}
