//! ZEvent data endpoints

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::http::{AppError, AppResult, AppState};

pub fn create_zevent_router() -> Router<AppState> {
    Router::new()
        .route("/api/zevent-streamers", get(streamers))
        .route("/api/zevent-stats", get(stats))
}

/// Raw ZEvent payload with a success flag added
pub async fn streamers(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let snapshot = state
        .zevent
        .snapshot()
        .await
        .map_err(|e| AppError::internal(format!("Failed to fetch ZEvent data: {e}")))?;

    let mut body = snapshot.raw.clone();
    if let Value::Object(map) = &mut body {
        map.insert("success".to_string(), Value::Bool(true));
    }
    Ok(Json(body))
}

pub async fn stats(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let stats = state
        .zevent
        .stats()
        .await
        .map_err(|e| AppError::internal(format!("Failed to fetch ZEvent data: {e}")))?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}
