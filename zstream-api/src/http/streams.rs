//! Tracked stream endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use zstream_core::resolver::{channel_url, extract_channel_login};
use zstream_core::{NewStream, TrackedStream};

use crate::http::{AppError, AppResult, AppState};

pub fn create_streams_router() -> Router<AppState> {
    Router::new()
        .route("/api/streams", get(list_streams).post(create_stream))
        .route("/api/streams/{id}", axum::routing::delete(delete_stream).put(start_stop))
        .route("/api/streams/{id}/quality", patch(update_quality))
        .route("/api/streams/{id}/hardware-decoding", patch(set_hardware_decoding))
        .route("/api/streams/{id}/chat", patch(set_chat))
        .route("/api/qualities", get(list_qualities))
}

/// A tracked stream with live and OBS details folded in
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamView {
    pub id: String,
    pub name: String,
    pub twitch_url: String,
    pub m3u8_url: String,
    pub quality: String,
    pub is_live: bool,
    pub is_z_event: bool,
    pub twitch_title: Option<String>,
    pub twitch_viewers: Option<u64>,
    pub profile_url: Option<String>,
    pub hardware_decoding: bool,
    pub chat_enabled: bool,
}

async fn enrich(state: &AppState, stream: TrackedStream) -> StreamView {
    let login = stream.channel_login();
    let mut view = StreamView {
        is_live: false,
        is_z_event: stream.is_z_event_streamer,
        twitch_title: None,
        twitch_viewers: None,
        profile_url: None,
        hardware_decoding: stream.hardware_decoding(),
        chat_enabled: false,
        id: stream.id,
        name: stream.name,
        twitch_url: stream.twitch_url,
        m3u8_url: stream.m3u8_url,
        quality: stream.quality,
    };

    if let Some(login) = &login {
        view.is_live = state.liveness.is_live(login).await.unwrap_or(false);
        if state.twitch.is_configured() {
            match state.twitch.channel_status(login).await {
                Ok(status) => {
                    view.is_live = status.online;
                    view.twitch_title = status.title;
                    view.twitch_viewers = status.viewer_count;
                    view.profile_url = status.profile_image_url;
                }
                Err(e) => warn!(channel = %login, error = %e, "Twitch status unavailable"),
            }
        }
    }

    if state.supervisor().is_connected() {
        view.hardware_decoding = state.reconciler.hardware_decoding_status(&view.name).await;
        view.chat_enabled = state.reconciler.chat_enabled(&view.name).await;
    }
    view
}

pub async fn list_streams(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let streams = state.registry.list().await;
    let mut views = Vec::with_capacity(streams.len());
    for stream in streams {
        views.push(enrich(&state, stream).await);
    }
    Ok(Json(json!({ "success": true, "streams": views })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStreamRequest {
    pub name: Option<String>,
    #[serde(alias = "twitch")]
    pub twitch_url: Option<String>,
    pub quality: Option<String>,
    pub hardware_decoding: Option<bool>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub async fn create_stream(
    State(state): State<AppState>,
    payload: Result<Json<CreateStreamRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(req) = payload?;
    let name = non_empty(req.name);
    let source = non_empty(req.twitch_url).or_else(|| name.clone()).unwrap_or_default();
    let login = extract_channel_login(&source).ok_or_else(|| AppError::bad_request("invalid twitch url or name"))?;
    let quality = non_empty(req.quality).unwrap_or_else(|| state.default_quality.clone());
    let hardware_decoding = req.hardware_decoding.unwrap_or(false);

    let m3u8_url = state.resolver.resolve(&login, &quality).await?;
    let is_z_event_streamer = state.zevent.participants().await.contains(&login.to_lowercase());

    let stream = state
        .registry
        .add(NewStream {
            name: name.unwrap_or_else(|| login.clone()),
            twitch_url: channel_url(&login),
            quality,
            m3u8_url,
            hardware_decoding,
            is_z_event_streamer,
        })
        .await?;

    if state.supervisor().is_connected() {
        let reconciler = state.reconciler.clone();
        let (name, url) = (stream.name.clone(), stream.m3u8_url.clone());
        tokio::spawn(async move {
            reconciler.ensure_scene_for_stream(&name, &url, hardware_decoding).await;
        });
    }

    Ok((StatusCode::CREATED, Json(json!({ "success": true, "stream": stream }))))
}

pub async fn delete_stream(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Value>> {
    let stream = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| AppError::not_found("Stream not found"))?;

    let obs_connected = state.supervisor().is_connected();
    if obs_connected {
        match state.reconciler.removal_refusal(&stream.name).await {
            Ok(Some(reason)) => {
                return Err(AppError::bad_request(format!(
                    "Cannot remove stream \"{}\": {reason}",
                    stream.name
                )))
            }
            Ok(None) => {}
            // the scene is removed best-effort below
            Err(e) => warn!(stream = %stream.name, error = %e, "Could not check OBS scene before removal"),
        }
    }

    state.registry.remove(&id).await?;

    if obs_connected && !state.reconciler.delete_scene_for_stream(&stream.name).await {
        warn!(stream = %stream.name, "OBS scene could not be deleted");
    }

    info!(stream = %stream.name, id = %id, "Stream removed");
    Ok(Json(json!({
        "success": true,
        "message": format!("Stream \"{}\" removed", stream.name),
    })))
}

/// Starting and stopping individual streams is not supported
pub async fn start_stop() -> AppError {
    AppError::method_not_allowed("start/stop not supported")
}

#[derive(Debug, Default, Deserialize)]
pub struct QualityRequest {
    pub quality: Option<String>,
}

pub async fn update_quality(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<QualityRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let stream = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| AppError::not_found("Stream not found"))?;
    let Json(req) = payload?;
    let quality = non_empty(req.quality).unwrap_or_else(|| state.default_quality.clone());

    let login = stream
        .channel_login()
        .or_else(|| extract_channel_login(&stream.name))
        .ok_or_else(|| AppError::bad_request("cannot extract Twitch login"))?;
    let m3u8_url = state.resolver.resolve(&login, &quality).await?;

    let updated = state
        .registry
        .update_quality(&id, &quality, &m3u8_url)
        .await?
        .ok_or_else(|| AppError::not_found("Stream not found"))?;

    if state.supervisor().is_connected() && !state.reconciler.update_media_url(&updated.name, &m3u8_url).await {
        warn!(stream = %updated.name, "OBS media source keeps the previous URL");
    }

    Ok(Json(json!({ "success": true, "restarted": false, "stream": updated })))
}

/// `enabled` from a toggle body; anything but a boolean is rejected
fn enabled_flag(payload: Result<Json<Value>, JsonRejection>) -> AppResult<bool> {
    let Json(body) = payload?;
    body.get("enabled")
        .and_then(Value::as_bool)
        .ok_or_else(|| AppError::bad_request("enabled field is required and must be boolean"))
}

pub async fn set_hardware_decoding(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let enabled = enabled_flag(payload)?;
    let stream = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| AppError::not_found("Stream not found"))?;

    if !state.reconciler.set_hardware_decode(&stream.name, enabled).await {
        return Err(AppError::internal("Failed to update hardware decoding in OBS"));
    }

    let state_word = if enabled { "enabled" } else { "disabled" };
    Ok(Json(json!({
        "success": true,
        "message": format!("Hardware decoding {state_word} for {}", stream.name),
        "hardwareDecoding": enabled,
    })))
}

pub async fn set_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let enabled = enabled_flag(payload)?;
    let stream = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| AppError::not_found("Stream not found"))?;
    let login = stream
        .channel_login()
        .ok_or_else(|| AppError::bad_request("cannot extract Twitch login from the channel URL"))?;

    if !state.reconciler.set_chat_visible(&stream.name, &login, enabled).await {
        return Err(AppError::internal("Failed to update chat display in OBS"));
    }

    let state_word = if enabled { "enabled" } else { "disabled" };
    Ok(Json(json!({
        "success": true,
        "message": format!("Chat {state_word} for {}", stream.name),
        "chatEnabled": enabled,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitiesQuery {
    pub twitch_url: Option<String>,
    pub streamer: Option<String>,
}

pub async fn list_qualities(
    State(state): State<AppState>,
    Query(query): Query<QualitiesQuery>,
) -> AppResult<Json<Value>> {
    let source = non_empty(query.twitch_url)
        .or_else(|| non_empty(query.streamer))
        .ok_or_else(|| AppError::bad_request("missing twitchUrl param"))?;
    let login = extract_channel_login(&source).ok_or_else(|| AppError::bad_request("invalid twitch url or name"))?;

    let qualities = match state.resolver.available_qualities(&login).await {
        Ok(qualities) => qualities,
        Err(e) => {
            warn!(channel = %login, error = %e, "Could not list qualities");
            Vec::new()
        }
    };
    Ok(Json(json!({ "success": true, "qualities": qualities })))
}
