//! Health check endpoint
//!
//! Probes every upstream the control-plane depends on and folds the
//! results into one overall status. Unhealthy answers with 503.

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::http::AppState;

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Disabled,
}

#[derive(Debug, Serialize)]
pub struct Services {
    pub twitch_api: ServiceHealth,
    pub zevent_api: ServiceHealth,
    pub streamlink: ServiceHealth,
    pub obs_websocket: ServiceHealth,
}

impl Services {
    fn overall(&self) -> ServiceHealth {
        let all = [self.twitch_api, self.zevent_api, self.streamlink, self.obs_websocket];
        if all.contains(&ServiceHealth::Unhealthy) {
            ServiceHealth::Unhealthy
        } else if all.contains(&ServiceHealth::Degraded) {
            ServiceHealth::Degraded
        } else {
            ServiceHealth::Healthy
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStats {
    pub total_streams: usize,
    pub active_streams: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: ServiceHealth,
    pub timestamp: String,
    pub uptime: u64,
    pub response_time: u64,
    pub services: Services,
    pub stats: HealthStats,
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();

    let twitch_api = if !state.twitch.is_configured() {
        ServiceHealth::Disabled
    } else if state.twitch.app_token().await.is_ok() {
        ServiceHealth::Healthy
    } else {
        ServiceHealth::Unhealthy
    };

    let zevent_api = match state.zevent.snapshot().await {
        Ok(_) => ServiceHealth::Healthy,
        Err(_) => ServiceHealth::Degraded,
    };

    let streamlink = match state.resolver.version().await {
        Ok(_) => ServiceHealth::Healthy,
        Err(e) => {
            tracing::warn!(error = %e, "streamlink probe failed");
            ServiceHealth::Unhealthy
        }
    };

    let obs = state.supervisor().status();
    let obs_websocket = if !obs.enabled {
        ServiceHealth::Disabled
    } else if obs.connected {
        ServiceHealth::Healthy
    } else if obs.parked {
        ServiceHealth::Unhealthy
    } else {
        ServiceHealth::Degraded
    };

    let streams = state.registry.list().await;
    let mut active_streams = 0;
    for stream in &streams {
        if let Some(login) = stream.channel_login() {
            if state.liveness.is_live(&login).await == Some(true) {
                active_streams += 1;
            }
        }
    }

    let services = Services {
        twitch_api,
        zevent_api,
        streamlink,
        obs_websocket,
    };
    let status = services.overall();
    let code = if status == ServiceHealth::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let report = HealthReport {
        status,
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime: state.started_at.elapsed().as_secs(),
        response_time: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        services,
        stats: HealthStats {
            total_streams: streams.len(),
            active_streams,
        },
    };
    (code, Json(report))
}
