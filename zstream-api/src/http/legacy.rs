//! `/get-url`: resolve a channel once without tracking it

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use zstream_core::resolver::extract_channel_login;

use crate::http::{AppError, AppResult, AppState};

pub fn create_legacy_router() -> Router<AppState> {
    Router::new().route("/get-url", get(get_url))
}

#[derive(Debug, Deserialize)]
pub struct GetUrlQuery {
    pub streamer: Option<String>,
    pub quality: Option<String>,
}

pub async fn get_url(State(state): State<AppState>, Query(query): Query<GetUrlQuery>) -> AppResult<Json<Value>> {
    let streamer = query
        .streamer
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("missing streamer query param"))?;
    let login = extract_channel_login(&streamer).ok_or_else(|| AppError::bad_request("invalid twitch url or name"))?;
    let quality = query
        .quality
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| state.default_quality.clone());

    let url = state.resolver.resolve(&login, &quality).await?;
    Ok(Json(json!({ "url": url })))
}
